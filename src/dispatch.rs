use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{cache_key, PayloadCache, DEFAULT_TTL};
use crate::config::{Config, DispatcherConfig, Task};
use crate::error::RelayError;
use crate::event::{CallbackTask, ChangeEvent, WebhookPayload};
use crate::metrics::{Metrics, StatusHandle};

/// Delivers change events as webhooks through a pool of workers.
///
/// Each worker owns a private bounded queue; events are assigned round-robin.
/// A full worker queue drops the event rather than blocking or spilling onto a
/// neighbour, which keeps per-worker FIFO order intact and keeps backpressure
/// from feeding back into the ingestor.
pub struct Dispatcher {
  shared: Arc<Shared>,
  events: Option<mpsc::Receiver<ChangeEvent>>,
  retry_rx: Option<mpsc::UnboundedReceiver<RetryEntry>>,
  worker_count: usize,
  handles: Vec<JoinHandle<()>>,
}

struct Shared {
  config: DispatcherConfig,
  tasks: HashMap<String, Arc<Task>>,
  client: reqwest::Client,
  cache: PayloadCache,
  metrics: Arc<Metrics>,
  status: Arc<StatusHandle>,
  workers: RwLock<Vec<mpsc::Sender<CallbackTask>>>,
  workers_ready: AtomicUsize,
  worker_cursor: AtomicUsize,
  retry_tx: mpsc::UnboundedSender<RetryEntry>,
  cancel: CancellationToken,
}

struct RetryEntry {
  due: Instant,
  task: CallbackTask,
}

impl PartialEq for RetryEntry {
  fn eq(&self, other: &Self) -> bool {
    self.due == other.due
  }
}

impl Eq for RetryEntry {}

impl PartialOrd for RetryEntry {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for RetryEntry {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.due.cmp(&other.due)
  }
}

const USER_AGENT_VALUE: &str = concat!("pikachu/", env!("CARGO_PKG_VERSION"));

impl Dispatcher {
  pub fn new(
    config: &Config,
    tasks: &[Arc<Task>],
    events: mpsc::Receiver<ChangeEvent>,
    metrics: Arc<Metrics>,
    status: Arc<StatusHandle>,
    cancel: CancellationToken,
  ) -> Result<Self, RelayError> {
    let d = &config.dispatcher;

    // One request per worker at a time bounds in-flight connections; the pool
    // settings bound what stays open in between.
    let client = reqwest::Client::builder()
      .timeout(d.timeout)
      .pool_max_idle_per_host(d.max_idle_conns / 2)
      .pool_idle_timeout(d.idle_conn_timeout)
      .gzip(true)
      .build()?;

    let task_map = tasks.iter().map(|t| (t.task_id.clone(), t.clone())).collect();

    let (retry_tx, retry_rx) = mpsc::unbounded_channel();

    let shared = Arc::new(Shared {
      config: d.clone(),
      tasks: task_map,
      client,
      cache: PayloadCache::new(DEFAULT_TTL),
      metrics,
      status,
      workers: RwLock::new(Vec::new()),
      workers_ready: AtomicUsize::new(0),
      worker_cursor: AtomicUsize::new(0),
      retry_tx,
      cancel,
    });

    Ok(Self {
      shared,
      events: Some(events),
      retry_rx: Some(retry_rx),
      worker_count: d.worker_count,
      handles: Vec::new(),
    })
  }

  /// Spawns the worker pool, the retry scheduler and the event loop. Returns
  /// once every worker has registered its queue.
  pub async fn start(&mut self) {
    info!("starting webhook dispatcher");

    for id in 0..self.worker_count {
      let shared = self.shared.clone();
      self.handles.push(tokio::spawn(worker(id, shared)));
    }

    while self.shared.workers_ready.load(Ordering::SeqCst) < self.worker_count {
      tokio::time::sleep(Duration::from_millis(10)).await;
    }

    if let Some(retry_rx) = self.retry_rx.take() {
      let shared = self.shared.clone();
      self.handles.push(tokio::spawn(retry_scheduler(shared, retry_rx)));
    }

    if let Some(events) = self.events.take() {
      let shared = self.shared.clone();
      self.handles.push(tokio::spawn(event_loop(shared, events)));
    }

    self.shared.status.set_dispatcher_running(true);
  }

  /// Waits for workers to observe cancellation, then clears the cache.
  pub async fn stop(&mut self) {
    info!("stopping webhook dispatcher");

    for handle in self.handles.drain(..) {
      handle.await.ok();
    }

    self.shared.cache.clear();
    self.shared.metrics.set_cache_size(0);
    self.shared.status.set_dispatcher_running(false);
  }
}

async fn event_loop(shared: Arc<Shared>, mut events: mpsc::Receiver<ChangeEvent>) {
  loop {
    tokio::select! {
      _ = shared.cancel.cancelled() => break,
      event = events.recv() => match event {
        Some(event) => assign(&shared, event),
        None => break,
      },
    }
  }
}

/// Admits one event into the pipeline: resolves its task, requires a ready
/// worker, and enqueues round-robin.
fn assign(shared: &Arc<Shared>, event: ChangeEvent) {
  let Some(task) = shared.tasks.get(&event.task_id) else {
    error!(task_id = %event.task_id, "task not found for event");
    return;
  };

  if shared.workers_ready.load(Ordering::SeqCst) == 0 {
    error!(task_id = %event.task_id, "no workers available, dropping event");
    shared.metrics.inc_events_dropped();
    return;
  }

  let callback = CallbackTask {
    event,
    callback_url: task.prebuilt_callback_url.clone(),
    retry_count: 0,
    max_retries: shared.config.max_retries,
  };

  match push_round_robin(shared, callback) {
    Ok(()) => shared.metrics.inc_events_queued(),
    Err(PushError::Full(task)) => {
      warn!(task_id = %task.event.task_id, "worker queue full, dropping event");
      shared.metrics.inc_events_dropped();
    }
    Err(PushError::NoWorkers) => {
      shared.metrics.inc_events_dropped();
    }
  }
}

enum PushError {
  Full(CallbackTask),
  NoWorkers,
}

/// Non-blocking enqueue onto the next worker in round-robin order. No fallback
/// to another worker on a full queue.
fn push_round_robin(shared: &Arc<Shared>, task: CallbackTask) -> Result<(), PushError> {
  let workers = shared.workers.read().unwrap_or_else(|e| e.into_inner());
  if workers.is_empty() {
    return Err(PushError::NoWorkers);
  }

  let index = shared.worker_cursor.fetch_add(1, Ordering::SeqCst) % workers.len();
  match workers[index].try_send(task) {
    Ok(()) => Ok(()),
    Err(TrySendError::Full(task)) => Err(PushError::Full(task)),
    Err(TrySendError::Closed(_)) => Err(PushError::NoWorkers),
  }
}

async fn worker(id: usize, shared: Arc<Shared>) {
  let (tx, mut rx) = mpsc::channel(shared.config.queue_size);
  {
    let mut workers = shared.workers.write().unwrap_or_else(|e| e.into_inner());
    workers.push(tx);
  }
  shared.workers_ready.fetch_add(1, Ordering::SeqCst);
  info!(worker_id = id, "webhook worker started");

  // Scratch buffer reused across payload encodes on this worker.
  let mut encode_buf = Vec::with_capacity(1024);

  loop {
    tokio::select! {
      _ = shared.cancel.cancelled() => break,
      task = rx.recv() => match task {
        Some(task) => deliver(&shared, &mut encode_buf, task).await,
        None => break,
      },
    }
  }

  shared.workers_ready.fetch_sub(1, Ordering::SeqCst);
  info!(worker_id = id, "webhook worker stopped");
}

/// One delivery attempt: serialize (or reuse cached bytes), POST, classify.
async fn deliver(shared: &Arc<Shared>, encode_buf: &mut Vec<u8>, task: CallbackTask) {
  let task_id = task.event.task_id.clone();

  let primary_id = match serde_json::to_string(&task.event.primary_id) {
    Ok(primary_id) => primary_id,
    Err(err) => {
      error!(task_id = %task_id, error = %err, "failed to serialize primary id, event dropped");
      return;
    }
  };
  let key = cache_key(
    &task_id,
    &task.event.table,
    task.event.event.as_str(),
    &primary_id,
    &task.callback_url,
  );

  let body = match shared.cache.get(&key) {
    Some(body) => {
      debug!(task_id = %task_id, "using cached payload bytes");
      body
    }
    None => {
      let payload = WebhookPayload::from_event(&task.event);
      encode_buf.clear();
      if let Err(err) = serde_json::to_writer(&mut *encode_buf, &payload) {
        error!(task_id = %task_id, error = %err, "failed to serialize webhook payload, event dropped");
        return;
      }
      let body = Bytes::copy_from_slice(encode_buf);

      // Cache only on the first attempt; retries re-use, success evicts.
      if task.retry_count == 0 {
        shared.cache.insert(key.clone(), body.clone());
        shared.metrics.set_cache_size(shared.cache.len() as u64);
      }
      body
    }
  };

  let response = shared
    .client
    .post(&task.callback_url)
    .header(CONTENT_TYPE, "application/json")
    .header(USER_AGENT, USER_AGENT_VALUE)
    .body(body)
    .send()
    .await;

  match response {
    Ok(response) if response.status().is_success() => {
      info!(
        task_id = %task_id,
        url = %task.callback_url,
        status_code = response.status().as_u16(),
        "webhook callback successful"
      );
      shared.cache.remove(&key);
      shared.metrics.set_cache_size(shared.cache.len() as u64);
    }
    Ok(response) => {
      let reason = format!("webhook returned status code {}", response.status().as_u16());
      schedule_retry(shared, task, &reason);
    }
    Err(err) => {
      schedule_retry(shared, task, &err.to_string());
    }
  }
}

/// Retry path: exhausted tasks are dropped, everything else goes to the retry
/// scheduler with capped exponential backoff.
fn schedule_retry(shared: &Arc<Shared>, mut task: CallbackTask, reason: &str) {
  info!(
    task_id = %task.event.task_id,
    url = %task.callback_url,
    retry_count = task.retry_count,
    reason = %reason,
    "webhook delivery failed"
  );

  if task.retry_count >= task.max_retries {
    error!(
      task_id = %task.event.task_id,
      max_retries = task.max_retries,
      reason = %reason,
      "webhook failed permanently after max retries"
    );
    return;
  }

  task.retry_count += 1;
  let delay = backoff_delay(
    shared.config.retry_base_delay,
    shared.config.retry_max_delay,
    task.retry_count,
  );
  let due = Instant::now() + delay;

  if shared.retry_tx.send(RetryEntry { due, task }).is_err() {
    warn!("retry scheduler is gone, dropping retry");
  }
}

/// `min(retry_base_delay * 2^retry_count, retry_max_delay)`.
pub(crate) fn backoff_delay(base: Duration, max: Duration, retry_count: u32) -> Duration {
  2_u32
    .checked_pow(retry_count)
    .and_then(|factor| base.checked_mul(factor))
    .map(|delay| delay.min(max))
    .unwrap_or(max)
}

/// Single task draining a monotonic min-heap of pending retries. Bounds the
/// cost of a retry storm to one task and one heap instead of a sleeper per
/// pending retry.
async fn retry_scheduler(shared: Arc<Shared>, mut retry_rx: mpsc::UnboundedReceiver<RetryEntry>) {
  let mut pending: BinaryHeap<Reverse<RetryEntry>> = BinaryHeap::new();

  loop {
    let next_due = pending.peek().map(|Reverse(entry)| entry.due);

    tokio::select! {
      _ = shared.cancel.cancelled() => break,
      entry = retry_rx.recv() => match entry {
        Some(entry) => pending.push(Reverse(entry)),
        None => break,
      },
      _ = tokio::time::sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
        let now = Instant::now();
        while pending.peek().map(|Reverse(e)| e.due <= now).unwrap_or(false) {
          let Reverse(entry) = pending.pop().unwrap();
          dispatch_retry(&shared, entry.task);
        }
      },
    }
  }
}

fn dispatch_retry(shared: &Arc<Shared>, task: CallbackTask) {
  if shared.workers_ready.load(Ordering::SeqCst) == 0 {
    warn!(
      task_id = %task.event.task_id,
      retry_count = task.retry_count,
      "no workers available for retry, dropping task"
    );
    return;
  }

  match push_round_robin(shared, task) {
    Ok(()) => {}
    Err(PushError::Full(task)) => {
      warn!(
        task_id = %task.event.task_id,
        retry_count = task.retry_count,
        "worker queue full, dropping retry task"
      );
    }
    Err(PushError::NoWorkers) => {
      warn!("no worker queues registered, dropping retry task");
    }
  }
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use super::backoff_delay;

  #[test]
  fn backoff_doubles_then_caps() {
    let base = Duration::from_secs(1);
    let max = Duration::from_secs(60);

    assert_eq!(Duration::from_secs(2), backoff_delay(base, max, 1));
    assert_eq!(Duration::from_secs(4), backoff_delay(base, max, 2));
    assert_eq!(Duration::from_secs(8), backoff_delay(base, max, 3));
    assert_eq!(Duration::from_secs(32), backoff_delay(base, max, 5));
    assert_eq!(max, backoff_delay(base, max, 6));
    assert_eq!(max, backoff_delay(base, max, 40));
  }

  #[test]
  fn backoff_is_monotonic_until_the_cap() {
    let base = Duration::from_secs(1);
    let max = Duration::from_secs(60);

    let mut previous = Duration::ZERO;
    for retry_count in 1..64 {
      let delay = backoff_delay(base, max, retry_count);
      assert!(delay >= previous);
      assert!(delay <= max);
      previous = delay;
    }
  }

  #[test]
  fn backoff_survives_overflowing_shifts() {
    let base = Duration::from_secs(5);
    let max = Duration::from_secs(60);
    assert_eq!(max, backoff_delay(base, max, u32::MAX));
  }
}
