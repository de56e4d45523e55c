use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{PrimaryId, Row};

/// Kind of row change a task subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
  Insert,
  Update,
  Delete,
}

impl EventKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      EventKind::Insert => "insert",
      EventKind::Update => "update",
      EventKind::Delete => "delete",
    }
  }
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One materialized row change, routed to a single task.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
  pub task_id: String,
  pub event: EventKind,
  pub table: String,
  pub primary_id: PrimaryId,
  pub old_data: Option<Row>,
  pub new_data: Row,
  pub timestamp: DateTime<Utc>,
}

/// Webhook wire format. Insert and delete carry `data`; update carries
/// `old_data` and `new_data`. Absent fields are omitted from the JSON object.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
  pub event: EventKind,
  pub table: &'a str,
  pub primary_id: &'a PrimaryId,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<&'a Row>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub old_data: Option<&'a Row>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub new_data: Option<&'a Row>,
  pub timestamp: &'a DateTime<Utc>,
}

impl<'a> WebhookPayload<'a> {
  pub fn from_event(event: &'a ChangeEvent) -> Self {
    let mut payload = Self {
      event: event.event,
      table: &event.table,
      primary_id: &event.primary_id,
      data: None,
      old_data: None,
      new_data: None,
      timestamp: &event.timestamp,
    };

    match event.event {
      EventKind::Insert | EventKind::Delete => payload.data = Some(&event.new_data),
      EventKind::Update => {
        payload.old_data = event.old_data.as_ref();
        payload.new_data = Some(&event.new_data);
      }
    }

    payload
  }
}

/// One delivery attempt, owned by a single worker at a time.
#[derive(Debug)]
pub struct CallbackTask {
  pub event: ChangeEvent,
  pub callback_url: String,
  pub retry_count: u32,
  pub max_retries: u32,
}
