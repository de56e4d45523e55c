use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cache of serialized webhook bodies, keyed by delivery identity. A payload
/// that fails with a transient error gets retried with the exact same bytes
/// instead of being re-encoded on every attempt.
///
/// Entries are inserted on the first delivery attempt only and evicted on
/// success, so the population is bounded by the set of currently-retrying
/// deliveries plus the TTL.
#[derive(Debug)]
pub struct PayloadCache {
  entries: DashMap<String, CacheEntry>,
  ttl: Duration,
}

#[derive(Debug)]
struct CacheEntry {
  body: Bytes,
  created_at: Instant,
}

impl PayloadCache {
  pub fn new(ttl: Duration) -> Self {
    Self {
      entries: DashMap::new(),
      ttl,
    }
  }

  /// Expired entries are removed and reported as a miss.
  pub fn get(&self, key: &str) -> Option<Bytes> {
    let expired = match self.entries.get(key) {
      Some(entry) if entry.created_at.elapsed() < self.ttl => return Some(entry.body.clone()),
      Some(_) => true,
      None => false,
    };
    if expired {
      self.entries.remove(key);
    }
    None
  }

  pub fn insert(&self, key: String, body: Bytes) {
    self.entries.insert(
      key,
      CacheEntry {
        body,
        created_at: Instant::now(),
      },
    );
  }

  pub fn remove(&self, key: &str) {
    self.entries.remove(key);
  }

  pub fn clear(&self) {
    self.entries.clear();
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Cache key for one delivery: md5 over the routing identity and target URL.
pub fn cache_key(task_id: &str, table: &str, event: &str, primary_id: &str, url: &str) -> String {
  let raw = format!("{}:{}:{}:{}:{}", task_id, table, event, primary_id, url);
  format!("{:x}", md5::compute(raw.as_bytes()))
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use bytes::Bytes;

  use super::{cache_key, PayloadCache};

  #[test]
  fn hit_within_ttl_miss_after() {
    let cache = PayloadCache::new(Duration::from_millis(20));
    cache.insert("k".to_string(), Bytes::from_static(b"body"));

    assert_eq!(Some(Bytes::from_static(b"body")), cache.get("k"));

    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(None, cache.get("k"));
    // The expired entry is gone, not just hidden.
    assert!(cache.is_empty());
  }

  #[test]
  fn remove_evicts() {
    let cache = PayloadCache::new(Duration::from_secs(300));
    cache.insert("k".to_string(), Bytes::from_static(b"body"));
    cache.remove("k");
    assert_eq!(None, cache.get("k"));
  }

  #[test]
  fn key_is_stable_and_distinguishes_deliveries() {
    let a = cache_key("t1", "users", "insert", "7", "http://h/cb");
    let b = cache_key("t1", "users", "insert", "7", "http://h/cb");
    let c = cache_key("t1", "users", "insert", "8", "http://h/cb");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(32, a.len());
  }
}
