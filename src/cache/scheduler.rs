//! Recurring background job.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Default period between two runs: one minute.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Shortest period a scheduler runs at.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A job that runs every `period` on its own tokio task.
///
/// The first run happens one full period after creation. A run that
/// overshoots the period delays the next one instead of bunching up. The
/// task stops when the job returns `false` or when the scheduler is dropped.
/// Periods shorter than [`MIN_INTERVAL`] are raised to it.
#[derive(Debug)]
pub struct Scheduler {
  handle: JoinHandle<()>,
  period: Duration,
}

impl Scheduler {
  /// Spawn `job` every `period`. Must be called within a tokio runtime.
  pub fn every<F, Fut>(period: Duration, mut job: F) -> Self
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
  {
    let period = period.max(MIN_INTERVAL);
    let handle = tokio::spawn(async move {
      let mut ticker = interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        ticker.tick().await;
        if !job().await {
          debug!("Scheduled job finished");
          break;
        }
      }
    });

    Self { handle, period }
  }

  /// Time between two runs.
  pub fn period(&self) -> Duration {
    self.period
  }

  /// Whether the background task has exited.
  pub fn is_finished(&self) -> bool {
    self.handle.is_finished()
  }
}

impl Drop for Scheduler {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn counting(counter: &Arc<AtomicU32>) -> impl FnMut() -> std::future::Ready<bool> + Send + 'static {
    let counter = counter.clone();
    move || {
      counter.fetch_add(1, Ordering::SeqCst);
      std::future::ready(true)
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_runs_once_per_period() {
    let counter = Arc::new(AtomicU32::new(0));
    let scheduler = Scheduler::every(Duration::from_secs(60), counting(&counter));

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(scheduler.period(), Duration::from_secs(60));
  }

  #[tokio::test(start_paused = true)]
  async fn test_drop_stops_runs() {
    let counter = Arc::new(AtomicU32::new(0));
    let scheduler = Scheduler::every(Duration::from_secs(60), counting(&counter));

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    drop(scheduler);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_zero_period_is_clamped() {
    let counter = Arc::new(AtomicU32::new(0));
    let scheduler = Scheduler::every(Duration::ZERO, counting(&counter));
    assert_eq!(scheduler.period(), MIN_INTERVAL);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let runs = counter.load(Ordering::SeqCst);
    assert!((9..=10).contains(&runs), "{runs} runs");
    assert!(!scheduler.is_finished());
  }

  #[tokio::test(start_paused = true)]
  async fn test_job_can_stop_itself() {
    let counter = Arc::new(AtomicU32::new(0));
    let seen = counter.clone();
    let scheduler = Scheduler::every(Duration::from_secs(10), move || {
      let runs = seen.fetch_add(1, Ordering::SeqCst) + 1;
      std::future::ready(runs < 2)
    });

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert!(scheduler.is_finished());
  }
}
