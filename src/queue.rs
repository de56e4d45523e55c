use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::warn;

use crate::event::ChangeEvent;
use crate::metrics::Metrics;

/// Producer half of the shared event queue between the ingestor and the
/// dispatcher. Offers are bounded: an event that cannot be enqueued within the
/// configured timeout is dropped, counted, and logged, so the replication
/// session is never stalled indefinitely by a slow delivery path.
#[derive(Debug, Clone)]
pub struct EventQueue {
  tx: mpsc::Sender<ChangeEvent>,
  timeout: Duration,
  metrics: Arc<Metrics>,
}

impl EventQueue {
  pub fn channel(
    capacity: usize,
    timeout: Duration,
    metrics: Arc<Metrics>,
  ) -> (Self, mpsc::Receiver<ChangeEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Self { tx, timeout, metrics }, rx)
  }

  /// Returns `true` when the event was enqueued.
  pub async fn offer(&self, event: ChangeEvent) -> bool {
    match self.tx.send_timeout(event, self.timeout).await {
      Ok(()) => true,
      Err(SendTimeoutError::Timeout(event)) => {
        warn!(
          task_id = %event.task_id,
          event_type = %event.event,
          table = %event.table,
          "event queue timeout, event dropped"
        );
        self.metrics.inc_events_dropped();
        false
      }
      Err(SendTimeoutError::Closed(_)) => false,
    }
  }

  /// Sender clone for queue-depth reporting.
  pub fn depth_sender(&self) -> mpsc::Sender<ChangeEvent> {
    self.tx.clone()
  }
}

#[cfg(test)]
mod test {
  use std::sync::Arc;
  use std::time::{Duration, Instant};

  use chrono::Utc;

  use super::EventQueue;
  use crate::event::{ChangeEvent, EventKind};
  use crate::metrics::Metrics;
  use crate::value::PrimaryId;

  fn event(n: i64) -> ChangeEvent {
    ChangeEvent {
      task_id: format!("t{}", n),
      event: EventKind::Insert,
      table: "users".to_string(),
      primary_id: PrimaryId::Scalar(crate::value::Value::I64(n)),
      old_data: None,
      new_data: Default::default(),
      timestamp: Utc::now(),
    }
  }

  #[tokio::test]
  async fn drops_after_timeout_when_full() {
    let metrics = Arc::new(Metrics::new());
    let (queue, _rx) = EventQueue::channel(1, Duration::from_millis(50), metrics.clone());

    assert!(queue.offer(event(1)).await);

    // Nothing is consuming, so subsequent offers must give up within the
    // timeout instead of blocking.
    for n in 2..4 {
      let start = Instant::now();
      assert!(!queue.offer(event(n)).await);
      let elapsed = start.elapsed();
      assert!(elapsed >= Duration::from_millis(45), "gave up too early: {:?}", elapsed);
      assert!(elapsed < Duration::from_secs(1), "blocked too long: {:?}", elapsed);
    }

    assert_eq!(2, metrics.events_dropped());
  }

  #[tokio::test]
  async fn preserves_fifo_order() {
    let metrics = Arc::new(Metrics::new());
    let (queue, mut rx) = EventQueue::channel(8, Duration::from_millis(50), metrics);

    for n in 0..5 {
      assert!(queue.offer(event(n)).await);
    }
    for n in 0..5 {
      assert_eq!(format!("t{}", n), rx.recv().await.unwrap().task_id);
    }
  }
}
