use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::event::EventKind;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("failed to parse config file: {0}")]
  Parse(#[from] serde_yaml::Error),
  #[error("no tasks configured")]
  NoTasks,
  #[error("database config validation failed: {0}")]
  Database(String),
  #[error("task[{index}]: {reason}")]
  Task { index: usize, reason: String },
  #[error("{0}")]
  Dispatcher(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub database: DatabaseConfig,
  pub tasks: Vec<Task>,
  pub log: LogConfig,
  pub server: ServerConfig,
  pub dispatcher: DispatcherConfig,
  pub monitor: MonitorConfig,
  pub callback_host: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
  pub host: String,
  pub port: u16,
  pub user: String,
  pub password: String,
  pub database: String,
  pub server_id: u32,
  pub charset: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Task {
  pub task_id: String,
  pub name: String,
  pub table_name: String,
  pub events: Vec<EventKind>,
  pub callback_url: String,
  /// Resolved against `callback_host` once, during validation.
  #[serde(skip)]
  pub prebuilt_callback_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  pub level: String,
  pub format: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub enabled: bool,
  pub port: u16,
  pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
  pub worker_count: usize,
  pub queue_size: usize,
  #[serde(with = "duration")]
  pub timeout: Duration,
  pub max_retries: u32,
  #[serde(with = "duration")]
  pub retry_base_delay: Duration,
  #[serde(with = "duration")]
  pub retry_max_delay: Duration,
  pub max_connections: usize,
  pub max_idle_conns: usize,
  #[serde(with = "duration")]
  pub idle_conn_timeout: Duration,
  pub batch_size: usize,
  #[serde(with = "duration")]
  pub batch_timeout: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  pub event_queue_size: usize,
  #[serde(with = "duration")]
  pub event_queue_timeout: Duration,
  pub batch_size: usize,
  #[serde(with = "duration")]
  pub batch_timeout: Duration,
  #[serde(with = "duration")]
  pub flush_interval: Duration,
}

impl Config {
  /// Loads the YAML config. A `tasks.yaml` next to the config file overrides
  /// the inline task list when present.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let mut config: Config = serde_yaml::from_str(&raw)?;

    let tasks_path = path.with_file_name("tasks.yaml");
    match std::fs::read_to_string(&tasks_path) {
      Ok(raw) => {
        #[derive(Deserialize)]
        struct TasksFile {
          tasks: Vec<Task>,
        }
        let tasks_file: TasksFile = serde_yaml::from_str(&raw)?;
        config.tasks = tasks_file.tasks;
      }
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
        if config.tasks.is_empty() {
          return Err(ConfigError::NoTasks);
        }
      }
      Err(source) => {
        return Err(ConfigError::Read {
          path: tasks_path,
          source,
        })
      }
    }

    Ok(config)
  }

  /// Validates the configuration, fills defaults, and prebuilds callback URLs.
  pub fn validate(&mut self) -> Result<(), ConfigError> {
    if self.tasks.is_empty() {
      return Err(ConfigError::NoTasks);
    }

    validate_database(&self.database)?;

    for (index, task) in self.tasks.iter().enumerate() {
      validate_task(task, index)?;
    }

    self.apply_defaults();
    validate_dispatcher_constraints(&self.dispatcher)?;

    for task in self.tasks.iter_mut() {
      task.prebuilt_callback_url = resolve_callback_url(&self.callback_host, &task.callback_url);
    }

    Ok(())
  }

  fn apply_defaults(&mut self) {
    let d = &mut self.dispatcher;
    if d.worker_count == 0 {
      d.worker_count = 20;
    }
    if d.queue_size == 0 {
      d.queue_size = 1000;
    }
    if d.timeout.is_zero() {
      d.timeout = Duration::from_secs(30);
    }
    if d.max_retries == 0 {
      d.max_retries = 3;
    }
    if d.retry_base_delay.is_zero() {
      d.retry_base_delay = Duration::from_secs(5);
    }
    if d.retry_max_delay.is_zero() {
      d.retry_max_delay = Duration::from_secs(60);
    }
    if d.max_connections == 0 {
      d.max_connections = 100;
    }
    if d.max_idle_conns == 0 {
      d.max_idle_conns = 20;
    }
    if d.idle_conn_timeout.is_zero() {
      d.idle_conn_timeout = Duration::from_secs(90);
    }
    if d.batch_size == 0 {
      d.batch_size = 1;
    }
    if d.batch_timeout.is_zero() {
      d.batch_timeout = Duration::from_millis(100);
    }

    let m = &mut self.monitor;
    if m.event_queue_size == 0 {
      m.event_queue_size = 10000;
    }
    if m.event_queue_timeout.is_zero() {
      m.event_queue_timeout = Duration::from_secs(2);
    }
    if m.batch_size == 0 {
      m.batch_size = 1;
    }
    if m.batch_timeout.is_zero() {
      m.batch_timeout = Duration::from_millis(50);
    }
    if m.flush_interval.is_zero() {
      m.flush_interval = Duration::from_secs(1);
    }

    if self.log.level.is_empty() {
      self.log.level = "info".to_string();
    }
    if self.log.format.is_empty() {
      self.log.format = "text".to_string();
    }

    if self.database.charset.is_empty() {
      self.database.charset = "utf8mb4".to_string();
    }
  }
}

fn validate_database(db: &DatabaseConfig) -> Result<(), ConfigError> {
  if db.host.is_empty() {
    return Err(ConfigError::Database("database host cannot be empty".into()));
  }
  if db.port == 0 {
    return Err(ConfigError::Database("database port must be between 1 and 65535".into()));
  }
  if db.user.is_empty() {
    return Err(ConfigError::Database("database user cannot be empty".into()));
  }
  if db.database.is_empty() {
    return Err(ConfigError::Database("database name cannot be empty".into()));
  }
  if db.server_id == 0 {
    return Err(ConfigError::Database("database server_id cannot be zero".into()));
  }
  Ok(())
}

fn validate_task(task: &Task, index: usize) -> Result<(), ConfigError> {
  let fail = |reason: String| ConfigError::Task { index, reason };

  if task.task_id.is_empty() {
    return Err(fail("task_id cannot be empty".into()));
  }
  if task.table_name.is_empty() {
    return Err(fail("table_name cannot be empty".into()));
  }
  if task.callback_url.is_empty() {
    return Err(fail("callback_url cannot be empty".into()));
  }
  if task.events.is_empty() {
    return Err(fail("events cannot be empty".into()));
  }

  validate_callback_url(&task.callback_url).map_err(|reason| fail(format!("invalid callback_url: {}", reason)))
}

// Absolute http(s) URLs and host-relative paths are both accepted.
fn validate_callback_url(raw: &str) -> Result<(), String> {
  if raw.starts_with('/') {
    return Ok(());
  }

  let parsed = Url::parse(raw).map_err(|err| format!("invalid callback URL format: {}", err))?;
  match parsed.scheme() {
    "http" | "https" => {}
    scheme => return Err(format!("callback URL scheme must be http or https, got: {}", scheme)),
  }
  if parsed.host_str().map(str::is_empty).unwrap_or(true) {
    return Err("callback URL host cannot be empty for absolute URLs".into());
  }
  Ok(())
}

fn validate_dispatcher_constraints(d: &DispatcherConfig) -> Result<(), ConfigError> {
  if d.max_retries > 0 && d.retry_base_delay < Duration::from_secs(1) {
    return Err(ConfigError::Dispatcher(format!(
      "retry_base_delay cannot be less than 1 second when max_retries is set (current: {:?}, minimum: 1s)",
      d.retry_base_delay
    )));
  }

  if !d.retry_max_delay.is_zero() && d.retry_base_delay >= d.retry_max_delay {
    return Err(ConfigError::Dispatcher(format!(
      "retry_max_delay ({:?}) must be greater than retry_base_delay ({:?})",
      d.retry_max_delay, d.retry_base_delay
    )));
  }

  if d.worker_count > 1000 {
    return Err(ConfigError::Dispatcher(format!(
      "worker_count ({}) is too high, maximum recommended is 1000",
      d.worker_count
    )));
  }

  if d.queue_size > 100_000 {
    return Err(ConfigError::Dispatcher(format!(
      "queue_size ({}) is too large, maximum recommended is 100000",
      d.queue_size
    )));
  }

  if d.max_connections > 0 && d.max_idle_conns > d.max_connections {
    return Err(ConfigError::Dispatcher(format!(
      "max_idle_conns ({}) cannot be greater than max_connections ({})",
      d.max_idle_conns, d.max_connections
    )));
  }

  if d.batch_size > 1000 {
    return Err(ConfigError::Dispatcher(format!(
      "batch_size ({}) is too large, maximum recommended is 1000",
      d.batch_size
    )));
  }

  Ok(())
}

/// Resolves a task callback URL against the process-wide callback host.
/// Absolute URLs pass through untouched, which makes resolution idempotent.
pub fn resolve_callback_url(callback_host: &str, callback_url: &str) -> String {
  if callback_url.starts_with("http://") || callback_url.starts_with("https://") {
    return callback_url.to_string();
  }

  if callback_host.is_empty() {
    return callback_url.to_string();
  }

  let host = callback_host.trim_end_matches('/');
  let path = callback_url.trim_start_matches('/');
  format!("{}/{}", host, path)
}

// YAML durations use Go-style strings: "30s", "100ms", "1m", "1h".
mod duration {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer};

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
  }

  pub fn parse(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
      .find(|c: char| !c.is_ascii_digit() && c != '.')
      .ok_or_else(|| format!("duration {:?} is missing a unit (ms, s, m, h)", raw))?;
    let (number, unit) = raw.split_at(split);
    let number: f64 = number.parse().map_err(|_| format!("invalid duration {:?}", raw))?;

    let factor = match unit {
      "ms" => 0.001,
      "s" => 1.0,
      "m" => 60.0,
      "h" => 3600.0,
      _ => return Err(format!("unknown duration unit {:?}", unit)),
    };

    Ok(Duration::from_secs_f64(number * factor))
  }
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use super::{resolve_callback_url, Config};

  fn minimal_config() -> Config {
    let raw = r#"
database:
  host: 127.0.0.1
  port: 3306
  user: repl
  password: secret
  database: shop
  server_id: 1001

tasks:
  - task_id: orders-insert
    table_name: orders
    events: [insert, update]
    callback_url: /hooks/orders

callback_host: http://hooks.internal:9000
"#;
    serde_yaml::from_str(raw).unwrap()
  }

  #[test]
  fn validation_fills_defaults() {
    let mut config = minimal_config();
    config.validate().unwrap();

    assert_eq!(20, config.dispatcher.worker_count);
    assert_eq!(1000, config.dispatcher.queue_size);
    assert_eq!(Duration::from_secs(30), config.dispatcher.timeout);
    assert_eq!(3, config.dispatcher.max_retries);
    assert_eq!(Duration::from_secs(5), config.dispatcher.retry_base_delay);
    assert_eq!(Duration::from_secs(60), config.dispatcher.retry_max_delay);
    assert_eq!(10000, config.monitor.event_queue_size);
    assert_eq!(Duration::from_secs(2), config.monitor.event_queue_timeout);
    assert_eq!("utf8mb4", config.database.charset);
    assert_eq!("info", config.log.level);
  }

  #[test]
  fn validation_prebuilds_callback_urls() {
    let mut config = minimal_config();
    config.validate().unwrap();
    assert_eq!(
      "http://hooks.internal:9000/hooks/orders",
      config.tasks[0].prebuilt_callback_url
    );
  }

  #[test]
  fn rejects_zero_server_id() {
    let mut config = minimal_config();
    config.database.server_id = 0;
    assert!(config.validate().is_err());
  }

  #[test]
  fn rejects_relative_url_without_leading_slash() {
    let mut config = minimal_config();
    config.tasks[0].callback_url = "hooks/orders".to_string();
    assert!(config.validate().is_err());
  }

  #[test]
  fn rejects_short_retry_base_delay() {
    let mut config = minimal_config();
    config.dispatcher.max_retries = 3;
    config.dispatcher.retry_base_delay = Duration::from_millis(200);
    assert!(config.validate().is_err());
  }

  #[test]
  fn rejects_retry_max_below_base() {
    let mut config = minimal_config();
    config.dispatcher.retry_base_delay = Duration::from_secs(60);
    config.dispatcher.retry_max_delay = Duration::from_secs(10);
    assert!(config.validate().is_err());
  }

  #[test]
  fn url_resolution_is_idempotent() {
    let host = "http://hooks.internal:9000/";
    for raw in ["/cb", "cb/nested", "https://other.example.com/cb"] {
      let once = resolve_callback_url(host, raw);
      assert_eq!(once, resolve_callback_url(host, &once));
    }
  }

  #[test]
  fn url_resolution_normalizes_slashes() {
    assert_eq!(
      "http://h:1/cb",
      resolve_callback_url("http://h:1/", "/cb")
    );
    assert_eq!("http://h:1/cb", resolve_callback_url("http://h:1", "cb"));
  }

  #[test]
  fn load_prefers_tasks_yaml_next_to_the_config() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    std::fs::write(
      &config_path,
      r#"
database:
  host: 127.0.0.1
  port: 3306
  user: repl
  database: shop
  server_id: 1

tasks:
  - task_id: inline
    table_name: orders
    events: [insert]
    callback_url: /inline
"#,
    )
    .unwrap();
    std::fs::write(
      dir.path().join("tasks.yaml"),
      r#"
tasks:
  - task_id: from-file
    table_name: orders
    events: [delete]
    callback_url: /from-file
"#,
    )
    .unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(1, config.tasks.len());
    assert_eq!("from-file", config.tasks[0].task_id);
  }

  #[test]
  fn load_keeps_inline_tasks_without_tasks_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    std::fs::write(
      &config_path,
      r#"
database:
  host: 127.0.0.1
  port: 3306
  user: repl
  database: shop
  server_id: 1

tasks:
  - task_id: inline
    table_name: orders
    events: [insert]
    callback_url: /inline
"#,
    )
    .unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!("inline", config.tasks[0].task_id);
  }

  #[test]
  fn parses_duration_strings() {
    assert_eq!(Duration::from_millis(100), super::duration::parse("100ms").unwrap());
    assert_eq!(Duration::from_secs(30), super::duration::parse("30s").unwrap());
    assert_eq!(Duration::from_secs(90), super::duration::parse("1.5m").unwrap());
    assert!(super::duration::parse("10").is_err());
    assert!(super::duration::parse("10d").is_err());
  }
}
