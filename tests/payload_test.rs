use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use pikachu::config::Task;
use pikachu::event::{EventKind, WebhookPayload};
use pikachu::ingest::build_events;
use pikachu::schema::TableSchema;

fn task(task_id: &str, table: &str, events: &[EventKind]) -> Arc<Task> {
  Arc::new(Task {
    task_id: task_id.to_string(),
    name: String::new(),
    table_name: table.to_string(),
    events: events.to_vec(),
    callback_url: "/cb".to_string(),
    prebuilt_callback_url: "http://hooks.internal/cb".to_string(),
  })
}

fn to_json(payload: &WebhookPayload<'_>) -> serde_json::Value {
  serde_json::to_value(payload).unwrap()
}

#[test]
fn insert_with_single_column_primary_key_produces_spec_body() {
  let schema = TableSchema {
    columns: vec!["id".to_string(), "name".to_string()],
    primary_key: vec!["id".to_string()],
  };
  let rows = vec![vec![
    Some(mysql::binlog::Value::I64(7)),
    Some(mysql::binlog::Value::Str("a".to_string())),
  ]];

  let events = build_events(
    &[task("t-insert", "t", &[EventKind::Insert])],
    EventKind::Insert,
    "t",
    &schema,
    &rows,
    Utc::now(),
  );
  assert_eq!(1, events.len());

  let body = to_json(&WebhookPayload::from_event(&events[0]));
  assert_eq!("insert", body["event"]);
  assert_eq!("t", body["table"]);
  assert_eq!(7, body["primary_id"]);
  assert_eq!(json!({"id": 7, "name": "a"}), body["data"]);
  assert!(body.get("old_data").is_none());
  assert!(body.get("new_data").is_none());
}

#[test]
fn update_with_composite_primary_key_produces_spec_body() {
  let schema = TableSchema {
    columns: vec!["a".to_string(), "b".to_string(), "v".to_string()],
    primary_key: vec!["a".to_string(), "b".to_string()],
  };
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

  let events = build_events(
    &[task("t-update", "t", &[EventKind::Update])],
    EventKind::Update,
    "t",
    &schema,
    &rows,
    Utc::now(),
  );
  assert_eq!(1, events.len());

  let body = to_json(&WebhookPayload::from_event(&events[0]));
  assert_eq!(json!({"a": 1, "b": 2}), body["primary_id"]);
  assert_eq!(json!({"a": 1, "b": 2, "v": "x"}), body["old_data"]);
  assert_eq!(json!({"a": 1, "b": 2, "v": "y"}), body["new_data"]);
  assert!(body.get("data").is_none());
}

#[test]
fn delete_without_primary_index_falls_back_to_id_column() {
  let schema = TableSchema {
    columns: vec!["id".to_string(), "name".to_string()],
    primary_key: Vec::new(),
  };
  let rows = vec![vec![
    Some(mysql::binlog::Value::I64(9)),
    Some(mysql::binlog::Value::Str("z".to_string())),
  ]];

  let events = build_events(
    &[task("t-delete", "t", &[EventKind::Delete])],
    EventKind::Delete,
    "t",
    &schema,
    &rows,
    Utc::now(),
  );

  let body = to_json(&WebhookPayload::from_event(&events[0]));
  assert_eq!(9, body["primary_id"]);
  assert_eq!(json!({"id": 9, "name": "z"}), body["data"]);
}

#[test]
fn decoding_an_emitted_body_reproduces_the_payload() {
  let schema = TableSchema {
    columns: vec!["id".to_string(), "note".to_string()],
    primary_key: vec!["id".to_string()],
  };
  let rows = vec![vec![
    Some(mysql::binlog::Value::U64(u64::MAX)),
    Some(mysql::binlog::Value::Null),
  ]];

  let events = build_events(
    &[task("t", "t", &[EventKind::Insert])],
    EventKind::Insert,
    "t",
    &schema,
    &rows,
    Utc::now(),
  );

  let payload = WebhookPayload::from_event(&events[0]);
  let bytes = serde_json::to_vec(&payload).unwrap();
  let decoded: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

  assert_eq!(to_json(&payload), decoded);
  // 64-bit integers survive the trip exactly.
  assert_eq!(u64::MAX, decoded["data"]["id"].as_u64().unwrap());
  assert!(decoded["data"]["note"].is_null());
}
