use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error("database error: {0}")]
  Database(#[from] std::io::Error),

  #[error("missing required privilege: {0}")]
  MissingPrivilege(String),

  #[error("failed to load schema for table {table}: {source}")]
  SchemaLoad {
    table: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to build http client: {0}")]
  HttpClient(#[from] reqwest::Error),
}
