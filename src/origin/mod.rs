//! Fetch strategies backed by external origins.

mod http;

pub use http::HttpOrigin;
