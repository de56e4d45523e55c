use std::collections::HashMap;
use std::io;
use std::sync::RwLock;

use mysql::{CharacterSet, Connection, ConnectionOptions};
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::error::RelayError;

/// Column layout of one watched table.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
  /// Column names in table order.
  pub columns: Vec<String>,
  /// Columns of the PRIMARY index, in index order. Empty when the table has no
  /// primary key.
  pub primary_key: Vec<String>,
}

/// Per-table column metadata, loaded from the source database and refreshed on
/// DDL. Columns come from a zero-row probe query; the primary key is forwarded
/// by the ingestor from replication metadata.
#[derive(Debug)]
pub struct SchemaCache {
  db: DatabaseConfig,
  tables: RwLock<HashMap<String, TableSchema>>,
}

impl SchemaCache {
  pub fn new(db: DatabaseConfig) -> Self {
    Self {
      db,
      tables: RwLock::new(HashMap::new()),
    }
  }

  /// Loads every watched table on one short-lived connection. Any failure here
  /// is fatal to start-up.
  pub async fn load_all(&self, tables: &[String]) -> Result<(), RelayError> {
    let mut conn = connect(&self.db).await?;

    for table in tables {
      let columns = match probe_columns(&mut conn, table).await {
        Ok(columns) => columns,
        Err(source) => {
          conn.close().await.ok();
          return Err(RelayError::SchemaLoad {
            table: table.clone(),
            source,
          });
        }
      };
      let mut guard = self.tables.write().unwrap_or_else(|e| e.into_inner());
      let entry = guard.entry(table.clone()).or_default();
      entry.columns = columns;
    }

    conn.close().await.ok();
    Ok(())
  }

  /// Re-probes a single table. On failure the previous schema stays in place
  /// and the error is returned for logging.
  pub async fn reload(&self, table: &str) -> Result<(), RelayError> {
    let mut conn = connect(&self.db).await?;
    let result = probe_columns(&mut conn, table).await;
    conn.close().await.ok();

    let columns = result.map_err(|source| RelayError::SchemaLoad {
      table: table.to_string(),
      source,
    })?;

    let mut guard = self.tables.write().unwrap_or_else(|e| e.into_inner());
    guard.entry(table.to_string()).or_default().columns = columns;
    Ok(())
  }

  pub fn get(&self, table: &str) -> Option<TableSchema> {
    self
      .tables
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .get(table)
      .cloned()
  }

  /// Records the primary-key columns surfaced by a TABLE_MAP event.
  pub fn set_primary_key(&self, table: &str, primary_key: Vec<String>) {
    let mut guard = self.tables.write().unwrap_or_else(|e| e.into_inner());
    let entry = guard.entry(table.to_string()).or_default();
    if entry.primary_key != primary_key {
      debug!(table, primary_key = ?primary_key, "primary key columns updated");
      entry.primary_key = primary_key;
    }
  }
}

async fn probe_columns(conn: &mut Connection, table: &str) -> io::Result<Vec<String>> {
  let query = format!("SELECT * FROM {} LIMIT 0", ensure_quoted(table));
  debug!(table, query = %query, "loading table schema");

  let results = conn.query(query).await?;
  Ok(results.columns.iter().map(|c| c.name().to_string()).collect())
}

/// Opens a connection to the configured source database.
pub(crate) async fn connect(db: &DatabaseConfig) -> io::Result<Connection> {
  let addrs = tokio::net::lookup_host(format!("{}:{}", db.host, db.port))
    .await?
    .collect::<Vec<_>>();

  let charset = match db.charset.as_str() {
    "utf8" => CharacterSet::UTF8,
    _ => CharacterSet::UTF8MB4,
  };

  Connection::connect_tcp(
    addrs,
    ConnectionOptions {
      user: db.user.clone(),
      password: (!db.password.is_empty()).then(|| db.password.clone()),
      database: Some(db.database.clone()),
      charset,
      connect_timeout: Some(std::time::Duration::from_secs(10)),
    },
  )
  .await
}

/// Wraps an identifier in back-ticks unless it already is.
pub fn ensure_quoted(identifier: &str) -> String {
  if identifier.is_empty() {
    return identifier.to_string();
  }
  if identifier.starts_with('`') && identifier.ends_with('`') {
    return identifier.to_string();
  }
  format!("`{}`", identifier)
}
