use bitflags::bitflags;

pub const MYSQL_NATIVE_PASSWORD_PLUGIN_NAME: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD_PLUGIN_NAME: &str = "caching_sha2_password";
pub const MAX_PAYLOAD_LEN: usize = 16777215;

// https://dev.mysql.com/doc/dev/mysql-server/latest/group__group__cs__capabilities__flags.html
bitflags! {
  #[derive(Debug, Clone, Copy)]
  pub struct CapabilityFlags: u32 {
    const CLIENT_LONG_PASSWORD = 0x00000001;
    const CLIENT_FOUND_ROWS = 0x00000002;
    const CLIENT_LONG_FLAG = 0x00000004;
    const CLIENT_CONNECT_WITH_DB = 0x00000008;
    const CLIENT_COMPRESS = 0x00000020;
    const CLIENT_LOCAL_FILES = 0x00000080;
    const CLIENT_PROTOCOL_41 = 0x00000200;
    const CLIENT_INTERACTIVE = 0x00000400;
    const CLIENT_SSL = 0x00000800;
    const CLIENT_TRANSACTIONS = 0x00002000;
    const CLIENT_RESERVED = 0x00004000;
    const CLIENT_RESERVED2 = 0x00008000;
    const CLIENT_MULTI_STATEMENTS = 0x00010000;
    const CLIENT_MULTI_RESULTS = 0x00020000;
    const CLIENT_PLUGIN_AUTH = 0x00080000;
    const CLIENT_CONNECT_ATTRS = 0x00100000;
    const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA = 0x00200000;
    const CLIENT_SESSION_TRACK = 0x00800000;
    const CLIENT_DEPRECATE_EOF = 0x01000000;
  }
}

bitflags! {
  #[derive(Debug, Clone, Copy)]
  pub struct StatusFlags: u16 {
    const SERVER_STATUS_IN_TRANS = 0x0001;
    const SERVER_STATUS_AUTOCOMMIT = 0x0002;
    const SERVER_MORE_RESULTS_EXISTS = 0x0008;
    const SERVER_STATUS_NO_GOOD_INDEX_USED = 0x0010;
    const SERVER_STATUS_NO_INDEX_USED = 0x0020;
    const SERVER_STATUS_CURSOR_EXISTS = 0x0040;
    const SERVER_STATUS_LAST_ROW_SENT = 0x0080;
    const SERVER_STATUS_DB_DROPPED = 0x0100;
    const SERVER_STATUS_NO_BACKSLASH_ESCAPES = 0x0200;
    const SERVER_STATUS_METADATA_CHANGED = 0x0400;
    const SERVER_QUERY_WAS_SLOW = 0x0800;
    const SERVER_PS_OUT_PARAMS = 0x1000;
    const SERVER_STATUS_IN_TRANS_READONLY = 0x2000;
    const SERVER_SESSION_STATE_CHANGED = 0x4000;
  }
}

bitflags! {
  #[derive(Debug, Clone, Copy)]
  pub struct BinlogDumpFlags: u16 {
    const NON_BLOCK = 0x0001;
  }
}

// Only the character sets this client ever offers during the handshake. Column
// definitions carry the raw collation id instead (the full table is huge and
// irrelevant to replication).
#[allow(non_camel_case_types)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
  UTF8 = 0x21,
  BINARY = 0x3F,
  UTF8MB4 = 0xFF,
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum Command {
  COM_QUIT = 0x01,
  COM_QUERY = 0x03,
  COM_PING = 0x0e,
  COM_BINLOG_DUMP = 0x12,
  COM_REGISTER_SLAVE = 0x15,
}

/// Type of a MySQL column, as carried in column definitions and TABLE_MAP events.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum ColumnType {
  MYSQL_TYPE_DECIMAL = 0x00,
  MYSQL_TYPE_TINY = 0x01,
  MYSQL_TYPE_SHORT = 0x02,
  MYSQL_TYPE_LONG = 0x03,
  MYSQL_TYPE_FLOAT = 0x04,
  MYSQL_TYPE_DOUBLE = 0x05,
  MYSQL_TYPE_NULL = 0x06,
  MYSQL_TYPE_TIMESTAMP = 0x07,
  MYSQL_TYPE_LONGLONG = 0x08,
  MYSQL_TYPE_INT24 = 0x09,
  MYSQL_TYPE_DATE = 0x0a,
  MYSQL_TYPE_TIME = 0x0b,
  MYSQL_TYPE_DATETIME = 0x0c,
  MYSQL_TYPE_YEAR = 0x0d,
  MYSQL_TYPE_VARCHAR = 0x0f,
  MYSQL_TYPE_BIT = 0x10,
  MYSQL_TYPE_TIMESTAMP2 = 0x11,
  MYSQL_TYPE_DATETIME2 = 0x12,
  MYSQL_TYPE_TIME2 = 0x13,
  MYSQL_TYPE_JSON = 0xf5,
  MYSQL_TYPE_NEWDECIMAL = 0xf6,
  MYSQL_TYPE_ENUM = 0xf7,
  MYSQL_TYPE_SET = 0xf8,
  MYSQL_TYPE_TINY_BLOB = 0xf9,
  MYSQL_TYPE_MEDIUM_BLOB = 0xfa,
  MYSQL_TYPE_LONG_BLOB = 0xfb,
  MYSQL_TYPE_BLOB = 0xfc,
  MYSQL_TYPE_VAR_STRING = 0xfd,
  MYSQL_TYPE_STRING = 0xfe,
  MYSQL_TYPE_GEOMETRY = 0xff,
}

impl TryFrom<u8> for ColumnType {
  type Error = u8;

  fn try_from(v: u8) -> Result<Self, Self::Error> {
    match v {
      0x00 => Ok(ColumnType::MYSQL_TYPE_DECIMAL),
      0x01 => Ok(ColumnType::MYSQL_TYPE_TINY),
      0x02 => Ok(ColumnType::MYSQL_TYPE_SHORT),
      0x03 => Ok(ColumnType::MYSQL_TYPE_LONG),
      0x04 => Ok(ColumnType::MYSQL_TYPE_FLOAT),
      0x05 => Ok(ColumnType::MYSQL_TYPE_DOUBLE),
      0x06 => Ok(ColumnType::MYSQL_TYPE_NULL),
      0x07 => Ok(ColumnType::MYSQL_TYPE_TIMESTAMP),
      0x08 => Ok(ColumnType::MYSQL_TYPE_LONGLONG),
      0x09 => Ok(ColumnType::MYSQL_TYPE_INT24),
      0x0a => Ok(ColumnType::MYSQL_TYPE_DATE),
      0x0b => Ok(ColumnType::MYSQL_TYPE_TIME),
      0x0c => Ok(ColumnType::MYSQL_TYPE_DATETIME),
      0x0d => Ok(ColumnType::MYSQL_TYPE_YEAR),
      0x0f => Ok(ColumnType::MYSQL_TYPE_VARCHAR),
      0x10 => Ok(ColumnType::MYSQL_TYPE_BIT),
      0x11 => Ok(ColumnType::MYSQL_TYPE_TIMESTAMP2),
      0x12 => Ok(ColumnType::MYSQL_TYPE_DATETIME2),
      0x13 => Ok(ColumnType::MYSQL_TYPE_TIME2),
      0xf5 => Ok(ColumnType::MYSQL_TYPE_JSON),
      0xf6 => Ok(ColumnType::MYSQL_TYPE_NEWDECIMAL),
      0xf7 => Ok(ColumnType::MYSQL_TYPE_ENUM),
      0xf8 => Ok(ColumnType::MYSQL_TYPE_SET),
      0xf9 => Ok(ColumnType::MYSQL_TYPE_TINY_BLOB),
      0xfa => Ok(ColumnType::MYSQL_TYPE_MEDIUM_BLOB),
      0xfb => Ok(ColumnType::MYSQL_TYPE_LONG_BLOB),
      0xfc => Ok(ColumnType::MYSQL_TYPE_BLOB),
      0xfd => Ok(ColumnType::MYSQL_TYPE_VAR_STRING),
      0xfe => Ok(ColumnType::MYSQL_TYPE_STRING),
      0xff => Ok(ColumnType::MYSQL_TYPE_GEOMETRY),
      unsupported => Err(unsupported),
    }
  }
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum BinlogEventType {
  UNKNOWN_EVENT,
  START_EVENT_V3,
  QUERY_EVENT,
  STOP_EVENT,
  ROTATE_EVENT,
  INTVAR_EVENT,
  LOAD_EVENT,
  SLAVE_EVENT,
  CREATE_FILE_EVENT,
  APPEND_BLOCK_EVENT,
  EXEC_LOAD_EVENT,
  DELETE_FILE_EVENT,
  NEW_LOAD_EVENT,
  RAND_EVENT,
  USER_VAR_EVENT,
  FORMAT_DESCRIPTION_EVENT,
  XID_EVENT,
  BEGIN_LOAD_QUERY_EVENT,
  EXECUTE_LOAD_QUERY_EVENT,
  TABLE_MAP_EVENT,
  WRITE_ROWS_EVENTV0,
  UPDATE_ROWS_EVENTV0,
  DELETE_ROWS_EVENTV0,
  WRITE_ROWS_EVENTV1,
  UPDATE_ROWS_EVENTV1,
  DELETE_ROWS_EVENTV1,
  INCIDENT_EVENT,
  HEARTBEAT_EVENT,
  IGNORABLE_EVENT,
  ROWS_QUERY_EVENT,
  WRITE_ROWS_EVENTV2,
  UPDATE_ROWS_EVENTV2,
  DELETE_ROWS_EVENTV2,
  GTID_EVENT,
  ANONYMOUS_GTID_EVENT,
  PREVIOUS_GTIDS_EVENT,
}

impl TryFrom<u8> for BinlogEventType {
  type Error = u8;

  fn try_from(v: u8) -> Result<Self, Self::Error> {
    match v {
      0x00 => Ok(BinlogEventType::UNKNOWN_EVENT),
      0x01 => Ok(BinlogEventType::START_EVENT_V3),
      0x02 => Ok(BinlogEventType::QUERY_EVENT),
      0x03 => Ok(BinlogEventType::STOP_EVENT),
      0x04 => Ok(BinlogEventType::ROTATE_EVENT),
      0x05 => Ok(BinlogEventType::INTVAR_EVENT),
      0x06 => Ok(BinlogEventType::LOAD_EVENT),
      0x07 => Ok(BinlogEventType::SLAVE_EVENT),
      0x08 => Ok(BinlogEventType::CREATE_FILE_EVENT),
      0x09 => Ok(BinlogEventType::APPEND_BLOCK_EVENT),
      0x0a => Ok(BinlogEventType::EXEC_LOAD_EVENT),
      0x0b => Ok(BinlogEventType::DELETE_FILE_EVENT),
      0x0c => Ok(BinlogEventType::NEW_LOAD_EVENT),
      0x0d => Ok(BinlogEventType::RAND_EVENT),
      0x0e => Ok(BinlogEventType::USER_VAR_EVENT),
      0x0f => Ok(BinlogEventType::FORMAT_DESCRIPTION_EVENT),
      0x10 => Ok(BinlogEventType::XID_EVENT),
      0x11 => Ok(BinlogEventType::BEGIN_LOAD_QUERY_EVENT),
      0x12 => Ok(BinlogEventType::EXECUTE_LOAD_QUERY_EVENT),
      0x13 => Ok(BinlogEventType::TABLE_MAP_EVENT),
      0x14 => Ok(BinlogEventType::WRITE_ROWS_EVENTV0),
      0x15 => Ok(BinlogEventType::UPDATE_ROWS_EVENTV0),
      0x16 => Ok(BinlogEventType::DELETE_ROWS_EVENTV0),
      0x17 => Ok(BinlogEventType::WRITE_ROWS_EVENTV1),
      0x18 => Ok(BinlogEventType::UPDATE_ROWS_EVENTV1),
      0x19 => Ok(BinlogEventType::DELETE_ROWS_EVENTV1),
      0x1a => Ok(BinlogEventType::INCIDENT_EVENT),
      0x1b => Ok(BinlogEventType::HEARTBEAT_EVENT),
      0x1c => Ok(BinlogEventType::IGNORABLE_EVENT),
      0x1d => Ok(BinlogEventType::ROWS_QUERY_EVENT),
      0x1e => Ok(BinlogEventType::WRITE_ROWS_EVENTV2),
      0x1f => Ok(BinlogEventType::UPDATE_ROWS_EVENTV2),
      0x20 => Ok(BinlogEventType::DELETE_ROWS_EVENTV2),
      0x21 => Ok(BinlogEventType::GTID_EVENT),
      0x22 => Ok(BinlogEventType::ANONYMOUS_GTID_EVENT),
      0x23 => Ok(BinlogEventType::PREVIOUS_GTIDS_EVENT),
      unsupported => Err(unsupported),
    }
  }
}
