use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mysql::binlog::{BinlogEvent, BinlogEventPacket, QueryEvent, RowsEvent, TableMapEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DatabaseConfig, Task};
use crate::error::RelayError;
use crate::event::{ChangeEvent, EventKind};
use crate::metrics::StatusHandle;
use crate::queue::EventQueue;
use crate::schema::{self, SchemaCache, TableSchema};
use crate::value::{PrimaryId, Row, Value};

/// Routing key for the primary event index: `<table>.<event_kind>`.
pub fn event_task_id(table: &str, kind: EventKind) -> String {
  format!("{}.{}", table, kind)
}

/// Maintains the replication session against the primary, filters row events to
/// the configured tables, materializes typed change events and offers them to
/// the shared queue.
pub struct Ingestor {
  db: DatabaseConfig,
  database: String,
  server_id: u32,
  tasks_by_table: HashMap<String, Vec<Arc<Task>>>,
  event_task_map: HashMap<String, Vec<Arc<Task>>>,
  table_maps: HashMap<u64, TableMapEvent>,
  schema_cache: Arc<SchemaCache>,
  queue: EventQueue,
  status: Arc<StatusHandle>,
  cancel: CancellationToken,
}

/// Builds both routing indexes from the configured tasks.
pub fn build_routing(
  tasks: &[Arc<Task>],
) -> (HashMap<String, Vec<Arc<Task>>>, HashMap<String, Vec<Arc<Task>>>) {
  let mut tasks_by_table: HashMap<String, Vec<Arc<Task>>> = HashMap::new();
  let mut event_task_map: HashMap<String, Vec<Arc<Task>>> = HashMap::new();

  for task in tasks {
    tasks_by_table
      .entry(task.table_name.clone())
      .or_default()
      .push(task.clone());

    for kind in &task.events {
      event_task_map
        .entry(event_task_id(&task.table_name, *kind))
        .or_default()
        .push(task.clone());
    }
  }

  (tasks_by_table, event_task_map)
}

impl Ingestor {
  pub fn new(
    config: &Config,
    tasks: &[Arc<Task>],
    schema_cache: Arc<SchemaCache>,
    queue: EventQueue,
    status: Arc<StatusHandle>,
    cancel: CancellationToken,
  ) -> Self {
    let (tasks_by_table, event_task_map) = build_routing(tasks);

    Self {
      db: config.database.clone(),
      database: config.database.database.clone(),
      server_id: config.database.server_id,
      tasks_by_table,
      event_task_map,
      table_maps: HashMap::new(),
      schema_cache,
      queue,
      status,
      cancel,
    }
  }

  /// Attaches to the primary and consumes the binlog until cancellation or a
  /// stream failure. Stream failures are fatal: the caller terminates the
  /// process rather than resuming from an unknown position.
  pub async fn run(mut self) -> Result<(), RelayError> {
    let mut conn = schema::connect(&self.db).await?;
    let cursor = conn.binlog_cursor().await?;
    info!(position = %cursor, "starting from primary binlog position");

    for tasks in self.tasks_by_table.values() {
      for task in tasks {
        info!(task_id = %task.task_id, task_name = %task.name, table_name = %task.table_name, "task started");
      }
    }

    let mut stream = conn.binlog_stream(self.server_id, cursor).await?;
    self.status.set_monitor_running(true);

    let cancel = self.cancel.clone();
    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        evt = stream.recv() => match evt {
          Some(Ok(packet)) => self.handle_packet(packet).await,
          Some(Err(err)) => {
            error!(error = %err, "replication stream error");
            self.status.set_monitor_running(false);
            stream.close().await.ok();
            return Err(RelayError::Database(err));
          }
          None => break,
        },
      }
    }

    self.status.set_monitor_running(false);
    stream.close().await.ok();
    info!("replication session closed");
    Ok(())
  }

  async fn handle_packet(&mut self, packet: BinlogEventPacket) {
    match packet.event {
      BinlogEvent::TableMap(evt) => self.handle_table_map(evt),
      BinlogEvent::Insert(evt) => self.handle_rows(EventKind::Insert, evt).await,
      BinlogEvent::Update(evt) => self.handle_rows(EventKind::Update, evt).await,
      BinlogEvent::Delete(evt) => self.handle_rows(EventKind::Delete, evt).await,
      BinlogEvent::Rotate(evt) => {
        info!(next_log_file = %evt.next_log_file, "binary log rotated");
      }
      BinlogEvent::Query(evt) => self.handle_query(evt).await,
      BinlogEvent::Format(evt) => {
        debug!(server_version = %evt.server_version, "format description received");
      }
      BinlogEvent::Heartbeat => {}
      BinlogEvent::NotSupported(event_type) => {
        debug!(event_type = ?event_type, "binlog event observed");
      }
    }
  }

  fn handle_table_map(&mut self, evt: TableMapEvent) {
    if evt.schema == self.database && self.tasks_by_table.contains_key(&evt.table) {
      // Forward the primary key surfaced by the replication metadata.
      let primary_key = evt
        .primary_key
        .iter()
        .filter_map(|i| evt.column_names.get(*i).cloned())
        .collect();
      self.schema_cache.set_primary_key(&evt.table, primary_key);
    }
    self.table_maps.insert(evt.table_id, evt);
  }

  async fn handle_rows(&mut self, kind: EventKind, evt: RowsEvent) {
    let Some(table_map) = self.table_maps.get(&evt.table_id) else {
      warn!(table_id = evt.table_id, "rows event without a preceding table map");
      return;
    };

    if table_map.schema != self.database {
      return;
    }

    let table = table_map.table.clone();
    let Some(tasks) = self.event_task_map.get(&event_task_id(&table, kind)) else {
      return;
    };

    let Some(table_schema) = self.schema_cache.get(&table) else {
      warn!(table = %table, "rows event for a table with no cached schema");
      return;
    };

    let rows = match evt.decode(table_map) {
      Ok(rows) => rows,
      Err(err) => {
        error!(table = %table, error = %err, "failed to decode row image, event dropped");
        return;
      }
    };

    let events = build_events(tasks, kind, &table, &table_schema, &rows, Utc::now());
    for event in events {
      info!(
        task_id = %event.task_id,
        event_type = %event.event,
        table = %event.table,
        primary_id = ?event.primary_id,
        "change event detected"
      );

      if self.queue.offer(event).await {
        self.status.mark_event();
      }
    }
  }

  async fn handle_query(&mut self, evt: QueryEvent) {
    if !is_ddl(&evt.query) {
      return;
    }

    info!(schema = %evt.schema, query = %evt.query, "ddl executed");

    if !evt.schema.is_empty() && evt.schema != self.database {
      return;
    }

    let affected: Vec<String> = self
      .tasks_by_table
      .keys()
      .filter(|table| mentions_table(&evt.query, table))
      .cloned()
      .collect();

    for table in affected {
      info!(table = %table, "table schema changed, reloading");
      if let Err(err) = self.schema_cache.reload(&table).await {
        error!(table = %table, error = %err, "failed to reload table schema");
      }
    }
  }
}

fn is_ddl(query: &str) -> bool {
  let query = query.trim_start().to_ascii_uppercase();
  ["ALTER TABLE", "CREATE TABLE", "DROP TABLE", "RENAME TABLE", "TRUNCATE"]
    .iter()
    .any(|prefix| query.starts_with(prefix))
}

fn mentions_table(query: &str, table: &str) -> bool {
  query.to_ascii_uppercase().contains(&table.to_ascii_uppercase())
}

/// Fans one decoded rows event out to every interested task. Update events
/// arrive as before/after pairs: even indices are the before image, odd indices
/// the after image.
pub fn build_events(
  tasks: &[Arc<Task>],
  kind: EventKind,
  table: &str,
  schema: &TableSchema,
  rows: &[mysql::binlog::Row],
  timestamp: DateTime<Utc>,
) -> Vec<ChangeEvent> {
  let mut events = Vec::new();

  match kind {
    EventKind::Insert | EventKind::Delete => {
      for row in rows {
        let data = build_row_data(&schema.columns, row);
        let primary_id = primary_id_for(schema, &data, None);
        for task in tasks {
          events.push(ChangeEvent {
            task_id: task.task_id.clone(),
            event: kind,
            table: table.to_string(),
            primary_id: primary_id.clone(),
            old_data: None,
            new_data: data.clone(),
            timestamp,
          });
        }
      }
    }
    EventKind::Update => {
      for pair in rows.chunks_exact(2) {
        let old_data = build_row_data(&schema.columns, &pair[0]);
        let new_data = build_row_data(&schema.columns, &pair[1]);
        let primary_id = primary_id_for(schema, &new_data, Some(&old_data));
        for task in tasks {
          events.push(ChangeEvent {
            task_id: task.task_id.clone(),
            event: kind,
            table: table.to_string(),
            primary_id: primary_id.clone(),
            old_data: Some(old_data.clone()),
            new_data: new_data.clone(),
            timestamp,
          });
        }
      }
    }
  }

  events
}

/// Maps positional row values onto schema column names. Columns absent from
/// the row image are left out; SQL NULL becomes an explicit null value.
fn build_row_data(columns: &[String], row: &mysql::binlog::Row) -> Row {
  let mut data = Row::new();
  for (i, column) in columns.iter().enumerate() {
    if let Some(Some(value)) = row.get(i) {
      data.insert(column.clone(), value.clone().into());
    }
  }
  data
}

/// Primary identity of a row: the PRIMARY index value(s) when one exists, the
/// `id` column as a fallback, otherwise none.
fn primary_id_for(schema: &TableSchema, new_data: &Row, old_data: Option<&Row>) -> PrimaryId {
  let source = if !new_data.is_empty() {
    new_data
  } else {
    match old_data {
      Some(old) => old,
      None => return PrimaryId::None,
    }
  };

  match schema.primary_key.len() {
    0 => match source.get("id") {
      Some(id) => PrimaryId::Scalar(id.clone()),
      None => PrimaryId::None,
    },
    1 => PrimaryId::Scalar(source.get(&schema.primary_key[0]).cloned().unwrap_or(Value::Null)),
    _ => PrimaryId::Composite(
      schema
        .primary_key
        .iter()
        .map(|col| (col.clone(), source.get(col).cloned().unwrap_or(Value::Null)))
        .collect(),
    ),
  }
}

/// Verifies the replication account holds the privileges the relay needs.
pub async fn check_permissions(db: &DatabaseConfig) -> Result<(), RelayError> {
  let mut conn = schema::connect(db).await?;
  conn.ping().await?;
  let results = conn.query("SHOW GRANTS FOR CURRENT_USER()").await?;
  let grants: Vec<String> = results.values.iter().flatten().cloned().collect();
  conn.close().await.ok();

  verify_grants(&grants)
}

fn verify_grants(grants: &[String]) -> Result<(), RelayError> {
  const REQUIRED_PRIVILEGES: [&str; 3] = ["SELECT", "REPLICATION SLAVE", "REPLICATION CLIENT"];

  if grants
    .iter()
    .any(|g| g.contains("ALL PRIVILEGES") || g.contains("GRANT ALL"))
  {
    return Ok(());
  }

  for privilege in REQUIRED_PRIVILEGES {
    if !grants.iter().any(|g| g.contains(privilege)) {
      return Err(RelayError::MissingPrivilege(privilege.to_string()));
    }
  }

  Ok(())
}

#[cfg(test)]
mod test {
  use std::sync::Arc;

  use chrono::Utc;

  use super::{build_events, build_routing, event_task_id, is_ddl, verify_grants};
  use crate::config::Task;
  use crate::event::EventKind;
  use crate::schema::TableSchema;
  use crate::value::{PrimaryId, Value};

  fn task(task_id: &str, table: &str, events: &[EventKind]) -> Arc<Task> {
    Arc::new(Task {
      task_id: task_id.to_string(),
      name: String::new(),
      table_name: table.to_string(),
      events: events.to_vec(),
      callback_url: "/cb".to_string(),
      prebuilt_callback_url: "http://sink/cb".to_string(),
    })
  }

  #[test]
  fn routing_index_groups_by_table_and_event() {
    let tasks = vec![
      task("a", "users", &[EventKind::Insert, EventKind::Update]),
      task("b", "users", &[EventKind::Insert]),
      task("c", "orders", &[EventKind::Delete]),
    ];

    let (by_table, by_event) = build_routing(&tasks);

    assert_eq!(2, by_table["users"].len());
    assert_eq!(1, by_table["orders"].len());
    assert_eq!(2, by_event[&event_task_id("users", EventKind::Insert)].len());
    assert_eq!(1, by_event[&event_task_id("users", EventKind::Update)].len());
    assert!(!by_event.contains_key(&event_task_id("orders", EventKind::Insert)));
  }

  #[test]
  fn insert_with_single_column_primary_key() {
    let schema = TableSchema {
      columns: vec!["id".to_string(), "name".to_string()],
      primary_key: vec!["id".to_string()],
    };
    let tasks = vec![task("t", "t", &[EventKind::Insert])];
    let rows = vec![vec![
      Some(mysql::binlog::Value::I64(7)),
      Some(mysql::binlog::Value::Str("a".to_string())),
    ]];

    let events = build_events(&tasks, EventKind::Insert, "t", &schema, &rows, Utc::now());

    assert_eq!(1, events.len());
    assert_eq!(PrimaryId::Scalar(Value::I64(7)), events[0].primary_id);
    assert_eq!(Some(&Value::Str("a".to_string())), events[0].new_data.get("name"));
    assert!(events[0].old_data.is_none());
  }

  #[test]
  fn update_with_composite_primary_key() {
    let schema = TableSchema {
      columns: vec!["a".to_string(), "b".to_string(), "v".to_string()],
      primary_key: vec!["a".to_string(), "b".to_string()],
    };
    let tasks = vec![task("t", "t", &[EventKind::Update])];
    let rows = vec![
      vec![
        Some(mysql::binlog::Value::I64(1)),
        Some(mysql::binlog::Value::I64(2)),
        Some(mysql::binlog::Value::Str("x".to_string())),
      ],
      vec![
        Some(mysql::binlog::Value::I64(1)),
        Some(mysql::binlog::Value::I64(2)),
        Some(mysql::binlog::Value::Str("y".to_string())),
      ],
    ];

    let events = build_events(&tasks, EventKind::Update, "t", &schema, &rows, Utc::now());

    assert_eq!(1, events.len());
    match &events[0].primary_id {
      PrimaryId::Composite(cols) => {
        assert_eq!(Some(&Value::I64(1)), cols.get("a"));
        assert_eq!(Some(&Value::I64(2)), cols.get("b"));
      }
      other => panic!("unexpected primary id {:?}", other),
    }
    assert_eq!(
      Some(&Value::Str("x".to_string())),
      events[0].old_data.as_ref().unwrap().get("v")
    );
    assert_eq!(Some(&Value::Str("y".to_string())), events[0].new_data.get("v"));
  }

  #[test]
  fn delete_without_primary_key_falls_back_to_id_column() {
    let schema = TableSchema {
      columns: vec!["id".to_string(), "name".to_string()],
      primary_key: Vec::new(),
    };
    let tasks = vec![task("t", "t", &[EventKind::Delete])];
    let rows = vec![vec![
      Some(mysql::binlog::Value::I64(9)),
      Some(mysql::binlog::Value::Str("z".to_string())),
    ]];

    let events = build_events(&tasks, EventKind::Delete, "t", &schema, &rows, Utc::now());

    assert_eq!(PrimaryId::Scalar(Value::I64(9)), events[0].primary_id);
    assert_eq!(Some(&Value::Str("z".to_string())), events[0].new_data.get("name"));
  }

  #[test]
  fn no_primary_key_and_no_id_column_yields_none() {
    let schema = TableSchema {
      columns: vec!["name".to_string()],
      primary_key: Vec::new(),
    };
    let tasks = vec![task("t", "t", &[EventKind::Insert])];
    let rows = vec![vec![Some(mysql::binlog::Value::Str("z".to_string()))]];

    let events = build_events(&tasks, EventKind::Insert, "t", &schema, &rows, Utc::now());
    assert_eq!(PrimaryId::None, events[0].primary_id);
  }

  #[test]
  fn one_row_change_fans_out_to_all_matching_tasks() {
    let schema = TableSchema {
      columns: vec!["id".to_string()],
      primary_key: vec!["id".to_string()],
    };
    let tasks = vec![task("a", "t", &[EventKind::Insert]), task("b", "t", &[EventKind::Insert])];
    let rows = vec![vec![Some(mysql::binlog::Value::I64(1))]];

    let events = build_events(&tasks, EventKind::Insert, "t", &schema, &rows, Utc::now());
    assert_eq!(2, events.len());
    assert_eq!("a", events[0].task_id);
    assert_eq!("b", events[1].task_id);
  }

  #[test]
  fn recognizes_ddl_statements() {
    assert!(is_ddl("ALTER TABLE users ADD COLUMN email VARCHAR(255)"));
    assert!(is_ddl("  drop table users"));
    assert!(is_ddl("TRUNCATE users"));
    assert!(!is_ddl("BEGIN"));
    assert!(!is_ddl("INSERT INTO users VALUES (1)"));
  }

  #[test]
  fn grant_check_accepts_all_privileges_or_the_minimum_set() {
    assert!(verify_grants(&["GRANT ALL PRIVILEGES ON *.* TO 'root'@'%'".to_string()]).is_ok());

    assert!(verify_grants(&[
      "GRANT SELECT, REPLICATION SLAVE, REPLICATION CLIENT ON *.* TO 'repl'@'%'".to_string()
    ])
    .is_ok());

    let err = verify_grants(&["GRANT SELECT, REPLICATION SLAVE ON *.* TO 'repl'@'%'".to_string()]);
    assert!(err.is_err());
  }
}
