use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::event::ChangeEvent;

/// Pipeline counters, shared by the ingestor and the dispatcher.
#[derive(Debug, Default)]
pub struct Metrics {
  events_queued: AtomicU64,
  events_dropped: AtomicU64,
  cache_size: AtomicU64,
}

impl Metrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn inc_events_queued(&self) {
    self.events_queued.fetch_add(1, Ordering::Relaxed);
  }

  pub fn inc_events_dropped(&self) {
    self.events_dropped.fetch_add(1, Ordering::Relaxed);
  }

  pub fn set_cache_size(&self, size: u64) {
    self.cache_size.store(size, Ordering::Relaxed);
  }

  pub fn events_queued(&self) -> u64 {
    self.events_queued.load(Ordering::Relaxed)
  }

  pub fn events_dropped(&self) -> u64 {
    self.events_dropped.load(Ordering::Relaxed)
  }

  pub fn cache_size(&self) -> u64 {
    self.cache_size.load(Ordering::Relaxed)
  }
}

/// Read-only view over the pipeline for the health endpoint. Components report
/// their state through this handle instead of exposing themselves.
#[derive(Debug)]
pub struct StatusHandle {
  metrics: Arc<Metrics>,
  queue: mpsc::Sender<ChangeEvent>,
  task_count: usize,
  monitor_running: AtomicBool,
  dispatcher_running: AtomicBool,
  last_event: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
  pub status: &'static str,
  pub monitor_running: bool,
  pub dispatcher_running: bool,
  pub event_queue_size: usize,
  pub last_event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
  pub task_count: usize,
  pub monitor_running: bool,
  pub dispatcher_running: bool,
  pub event_queue_size: usize,
  pub last_event_time: Option<DateTime<Utc>>,
  pub events_queued: u64,
  pub events_dropped: u64,
  pub cache_size: u64,
}

impl StatusHandle {
  pub fn new(metrics: Arc<Metrics>, queue: mpsc::Sender<ChangeEvent>, task_count: usize) -> Self {
    Self {
      metrics,
      queue,
      task_count,
      monitor_running: AtomicBool::new(false),
      dispatcher_running: AtomicBool::new(false),
      last_event: Mutex::new(None),
    }
  }

  pub fn set_monitor_running(&self, running: bool) {
    self.monitor_running.store(running, Ordering::Relaxed);
  }

  pub fn set_dispatcher_running(&self, running: bool) {
    self.dispatcher_running.store(running, Ordering::Relaxed);
  }

  /// Called by the ingestor after each successful enqueue.
  pub fn mark_event(&self) {
    *self.last_event.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
  }

  pub fn queue_depth(&self) -> usize {
    self.queue.max_capacity() - self.queue.capacity()
  }

  pub fn healthy(&self) -> bool {
    self.monitor_running.load(Ordering::Relaxed) && self.dispatcher_running.load(Ordering::Relaxed)
  }

  pub fn health(&self) -> HealthSnapshot {
    let healthy = self.healthy();
    HealthSnapshot {
      status: if healthy { "UP" } else { "DOWN" },
      monitor_running: self.monitor_running.load(Ordering::Relaxed),
      dispatcher_running: self.dispatcher_running.load(Ordering::Relaxed),
      event_queue_size: self.queue_depth(),
      last_event_time: *self.last_event.lock().unwrap_or_else(|e| e.into_inner()),
    }
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      task_count: self.task_count,
      monitor_running: self.monitor_running.load(Ordering::Relaxed),
      dispatcher_running: self.dispatcher_running.load(Ordering::Relaxed),
      event_queue_size: self.queue_depth(),
      last_event_time: *self.last_event.lock().unwrap_or_else(|e| e.into_inner()),
      events_queued: self.metrics.events_queued(),
      events_dropped: self.metrics.events_dropped(),
      cache_size: self.metrics.cache_size(),
    }
  }
}

#[cfg(test)]
mod test {
  use std::sync::Arc;

  use tokio::sync::mpsc;

  use super::{Metrics, StatusHandle};

  #[test]
  fn counters_accumulate() {
    let metrics = Metrics::new();
    metrics.inc_events_queued();
    metrics.inc_events_queued();
    metrics.inc_events_dropped();
    metrics.set_cache_size(4);

    assert_eq!(2, metrics.events_queued());
    assert_eq!(1, metrics.events_dropped());
    assert_eq!(4, metrics.cache_size());
  }

  #[tokio::test]
  async fn status_reflects_queue_depth_and_components() {
    let (tx, _rx) = mpsc::channel(4);
    let status = StatusHandle::new(Arc::new(Metrics::new()), tx.clone(), 2);

    assert!(!status.healthy());
    status.set_monitor_running(true);
    status.set_dispatcher_running(true);
    assert!(status.healthy());

    tx.send(crate::event::ChangeEvent {
      task_id: "t".into(),
      event: crate::event::EventKind::Insert,
      table: "t".into(),
      primary_id: crate::value::PrimaryId::None,
      old_data: None,
      new_data: Default::default(),
      timestamp: chrono::Utc::now(),
    })
    .await
    .unwrap();

    let health = status.health();
    assert_eq!("UP", health.status);
    assert_eq!(1, health.event_queue_size);
    assert_eq!(2, status.metrics().task_count);
  }
}
