use std::path::PathBuf;
use std::sync::Arc;

use clap::{value_parser, Arg, Command};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pikachu::config::{Config, Task};
use pikachu::dispatch::Dispatcher;
use pikachu::health;
use pikachu::ingest::{self, Ingestor};
use pikachu::metrics::{Metrics, StatusHandle};
use pikachu::queue::EventQueue;
use pikachu::schema::SchemaCache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cmd = Command::new("pikachu")
    .version(pikachu::VERSION)
    .about("MySQL change-data-capture relay that delivers row changes as webhooks")
    .arg(
      Arg::new("config")
        .long("config")
        .short('c')
        .default_value("config.yaml")
        .value_parser(value_parser!(PathBuf)),
    );

  let matches = cmd.get_matches();
  let config_path = matches.get_one::<PathBuf>("config").unwrap();

  let mut config = Config::load(config_path)?;
  config.validate()?;

  init_tracing(&config.log.level, &config.log.format);
  info!(version = pikachu::VERSION, "starting pikachu relay");

  ingest::check_permissions(&config.database).await?;
  info!("database permission check passed");

  let tasks: Vec<Arc<Task>> = config.tasks.iter().cloned().map(Arc::new).collect();
  let mut tables: Vec<String> = tasks.iter().map(|t| t.table_name.clone()).collect();
  tables.sort();
  tables.dedup();

  let schema_cache = Arc::new(SchemaCache::new(config.database.clone()));
  schema_cache.load_all(&tables).await?;
  info!(tables = tables.len(), "table schemas loaded");

  let metrics = Arc::new(Metrics::new());
  let (queue, events) = EventQueue::channel(
    config.monitor.event_queue_size,
    config.monitor.event_queue_timeout,
    metrics.clone(),
  );
  let status = Arc::new(StatusHandle::new(metrics.clone(), queue.depth_sender(), tasks.len()));

  let cancel = CancellationToken::new();

  if config.server.enabled {
    let server = config.server.clone();
    let status = status.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if let Err(err) = health::serve(server, status, cancel).await {
        error!(error = %err, "health check server failed");
      }
    });
  }

  let mut dispatcher = Dispatcher::new(&config, &tasks, events, metrics, status.clone(), cancel.clone())?;
  dispatcher.start().await;

  let ingestor = Ingestor::new(&config, &tasks, schema_cache, queue, status, cancel.clone());
  let ingest_handle = tokio::spawn({
    let cancel = cancel.clone();
    async move {
      if let Err(err) = ingestor.run().await {
        error!(error = %err, "replication session failed");
        cancel.cancel();
      }
    }
  });

  info!("pikachu started successfully");

  tokio::select! {
    _ = tokio::signal::ctrl_c() => {}
    _ = terminate_signal() => {}
    _ = cancel.cancelled() => {}
  }
  info!("received shutdown signal");

  // Ingestor first, so no new events race into a stopping dispatcher.
  cancel.cancel();
  ingest_handle.await.ok();
  dispatcher.stop().await;

  info!("pikachu stopped");
  Ok(())
}

#[cfg(unix)]
async fn terminate_signal() {
  use tokio::signal::unix::{signal, SignalKind};
  match signal(SignalKind::terminate()) {
    Ok(mut stream) => {
      stream.recv().await;
    }
    Err(_) => std::future::pending::<()>().await,
  }
}

#[cfg(not(unix))]
async fn terminate_signal() {
  std::future::pending::<()>().await
}

fn init_tracing(level: &str, format: &str) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  if format == "json" {
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
  } else {
    tracing_subscriber::fmt().with_env_filter(filter).init();
  }
}
