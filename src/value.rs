use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// A single column value as it travels from the replication stream into a
/// webhook body.
///
/// JSON rendering rules: integers keep their full 64-bit precision, byte
/// columns render as base64, temporal values keep MySQL's text format.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  I64(i64),
  U64(u64),
  F64(f64),
  Str(String),
  Bytes(Vec<u8>),
  Temporal(String),
}

/// One row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

impl From<mysql::binlog::Value> for Value {
  fn from(v: mysql::binlog::Value) -> Self {
    match v {
      mysql::binlog::Value::Null => Value::Null,
      mysql::binlog::Value::I64(v) => Value::I64(v),
      mysql::binlog::Value::U64(v) => Value::U64(v),
      mysql::binlog::Value::F64(v) => Value::F64(v),
      mysql::binlog::Value::Str(v) => Value::Str(v),
      mysql::binlog::Value::Bytes(v) => Value::Bytes(v),
      mysql::binlog::Value::Temporal(v) => Value::Temporal(v),
    }
  }
}

impl Serialize for Value {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Value::Null => serializer.serialize_none(),
      Value::I64(v) => serializer.serialize_i64(*v),
      Value::U64(v) => serializer.serialize_u64(*v),
      Value::F64(v) => serializer.serialize_f64(*v),
      Value::Str(v) | Value::Temporal(v) => serializer.serialize_str(v),
      Value::Bytes(v) => serializer.serialize_str(&BASE64.encode(v)),
    }
  }
}

/// The primary identity of a changed row.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryId {
  /// No primary index and no `id` column.
  None,
  /// Single-column primary key (or the `id` fallback).
  Scalar(Value),
  /// Composite primary key, column name to value.
  Composite(BTreeMap<String, Value>),
}

impl Serialize for PrimaryId {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      PrimaryId::None => serializer.serialize_none(),
      PrimaryId::Scalar(v) => v.serialize(serializer),
      PrimaryId::Composite(columns) => {
        let mut map = serializer.serialize_map(Some(columns.len()))?;
        for (name, value) in columns {
          map.serialize_entry(name, value)?;
        }
        map.end()
      }
    }
  }
}
