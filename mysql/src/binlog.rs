use std::io;

use bytes::{Buf, Bytes};

use super::buf_ext::BufExt;
use super::constants::{BinlogEventType, ColumnType};

fn invalid(msg: impl Into<String>) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// One event received from the replication stream, envelope included.
#[derive(Debug)]
pub struct BinlogEventPacket {
  pub timestamp: u32,
  pub server_id: u32,
  pub log_position: u32,
  pub flags: u16,
  pub event: BinlogEvent,
}

impl BinlogEventPacket {
  pub fn parse(buffer: impl AsRef<[u8]>) -> io::Result<BinlogEventPacket> {
    let mut b = buffer.as_ref();

    // skip OK byte
    b.advance(1);

    let timestamp = b.get_u32_le();
    let event_type = b
      .get_u8()
      .try_into()
      .map_err(|t| invalid(format!("unknown binlog event type {:#x}", t)))?;
    let server_id = b.get_u32_le();
    let _event_size = b.get_u32_le();
    let log_position = b.get_u32_le();
    let flags = b.get_u16_le();
    let payload = Bytes::copy_from_slice(b);

    let event = match event_type {
      BinlogEventType::TABLE_MAP_EVENT => TableMapEvent::parse(payload).map(BinlogEvent::TableMap),
      BinlogEventType::ROTATE_EVENT => RotateEvent::parse(payload).map(BinlogEvent::Rotate),
      BinlogEventType::FORMAT_DESCRIPTION_EVENT => FormatDescriptionEvent::parse(payload).map(BinlogEvent::Format),
      BinlogEventType::QUERY_EVENT => QueryEvent::parse(payload).map(BinlogEvent::Query),
      BinlogEventType::WRITE_ROWS_EVENTV0 => RowsEvent::parse(payload, false, false).map(BinlogEvent::Insert),
      BinlogEventType::WRITE_ROWS_EVENTV1 => RowsEvent::parse(payload, false, false).map(BinlogEvent::Insert),
      BinlogEventType::WRITE_ROWS_EVENTV2 => RowsEvent::parse(payload, true, false).map(BinlogEvent::Insert),
      BinlogEventType::UPDATE_ROWS_EVENTV0 => RowsEvent::parse(payload, false, false).map(BinlogEvent::Update),
      BinlogEventType::UPDATE_ROWS_EVENTV1 => RowsEvent::parse(payload, false, true).map(BinlogEvent::Update),
      BinlogEventType::UPDATE_ROWS_EVENTV2 => RowsEvent::parse(payload, true, true).map(BinlogEvent::Update),
      BinlogEventType::DELETE_ROWS_EVENTV0 => RowsEvent::parse(payload, false, false).map(BinlogEvent::Delete),
      BinlogEventType::DELETE_ROWS_EVENTV1 => RowsEvent::parse(payload, false, false).map(BinlogEvent::Delete),
      BinlogEventType::DELETE_ROWS_EVENTV2 => RowsEvent::parse(payload, true, false).map(BinlogEvent::Delete),
      BinlogEventType::HEARTBEAT_EVENT => Ok(BinlogEvent::Heartbeat),
      not_supported => Ok(BinlogEvent::NotSupported(not_supported)),
    }?;

    Ok(BinlogEventPacket {
      timestamp,
      server_id,
      log_position,
      flags,
      event,
    })
  }
}

#[derive(Debug)]
pub enum BinlogEvent {
  TableMap(TableMapEvent),
  Rotate(RotateEvent),
  Format(FormatDescriptionEvent),
  Query(QueryEvent),
  Insert(RowsEvent),
  Update(RowsEvent),
  Delete(RowsEvent),
  Heartbeat,
  NotSupported(BinlogEventType),
}

#[derive(Debug)]
pub struct RotateEvent {
  pub next_log_position: u32,
  pub next_log_file: String,
}

impl RotateEvent {
  fn parse(mut b: Bytes) -> io::Result<Self> {
    let next_log_position = b.get_u64_le() as u32;
    let next_log_file = b.mysql_get_eof_string()?;

    Ok(Self {
      next_log_position,
      next_log_file,
    })
  }
}

#[derive(Debug)]
pub struct FormatDescriptionEvent {
  pub version: u16,
  pub server_version: String,
  pub create_timestamp: u32,
  pub event_header_length: u8,
}

impl FormatDescriptionEvent {
  fn parse(mut b: Bytes) -> io::Result<Self> {
    if b.remaining() < 57 {
      return Err(invalid("format description event is truncated"));
    }
    let version = b.get_u16_le();

    let server_version_raw = b.split_to(50);
    let null_terminated = server_version_raw.iter().position(|x| *x == 0x00).unwrap_or(0);
    let server_version = String::from_utf8_lossy(&server_version_raw[..null_terminated]).into_owned();

    let create_timestamp = b.get_u32_le();
    let event_header_length = b.get_u8();

    Ok(Self {
      version,
      server_version,
      create_timestamp,
      event_header_length,
    })
  }
}

/// Statement event. In row mode these carry DDL (and BEGIN markers).
#[derive(Debug)]
pub struct QueryEvent {
  pub schema: String,
  pub query: String,
}

impl QueryEvent {
  fn parse(mut b: Bytes) -> io::Result<Self> {
    // https://dev.mysql.com/doc/dev/mysql-server/latest/classbinary__log_1_1Query__event.html
    let _thread_id = b.get_u32_le();
    let _execution_time = b.get_u32_le();
    let schema_len = b.get_u8() as usize;
    let _error_code = b.get_u16_le();
    let status_vars_len = b.get_u16_le() as usize;
    if b.remaining() < status_vars_len + schema_len + 1 {
      return Err(invalid("query event is truncated"));
    }
    b.advance(status_vars_len);
    let schema = String::from_utf8_lossy(&b.split_to(schema_len)).into_owned();
    b.advance(1);
    let query = String::from_utf8_lossy(b.chunk()).into_owned();

    Ok(Self { schema, query })
  }
}

/// TABLE_MAP event. With `binlog_row_metadata=FULL` the trailing metadata block
/// also carries column names, signedness and the primary key.
#[derive(Debug, Clone)]
pub struct TableMapEvent {
  pub table_id: u64,
  pub flags: u16,
  pub schema: String,
  pub table: String,
  pub column_types: Vec<ColumnType>,
  pub column_metas: Vec<u16>,
  pub null_bitmap: Vec<u8>,
  pub column_unsigned: Vec<bool>,
  pub column_names: Vec<String>,
  pub primary_key: Vec<usize>,
}

// Optional metadata field types.
const TABLE_MAP_SIGNEDNESS: u8 = 1;
const TABLE_MAP_COLUMN_NAME: u8 = 4;
const TABLE_MAP_SIMPLE_PRIMARY_KEY: u8 = 8;
const TABLE_MAP_PRIMARY_KEY_WITH_PREFIX: u8 = 9;

impl TableMapEvent {
  fn parse(mut b: Bytes) -> io::Result<Self> {
    let table_id = b.get_uint_le(6);
    let flags = b.get_u16_le();

    let schema_len = b.get_u8() as usize;
    let schema = String::from_utf8_lossy(&b.split_to(schema_len)).into_owned();
    b.advance(1); // \0

    let table_len = b.get_u8() as usize;
    let table = String::from_utf8_lossy(&b.split_to(table_len)).into_owned();
    b.advance(1); // \0

    let column_count = b.mysql_get_lenc_uint()? as usize;
    let column_types = b
      .split_to(column_count)
      .iter()
      .map(|v| ColumnType::try_from(*v).map_err(|t| invalid(format!("unknown column type {:#x}", t))))
      .collect::<io::Result<Vec<ColumnType>>>()?;

    let meta_block_len = b.mysql_get_lenc_uint()? as usize;
    let mut meta_block = b.split_to(meta_block_len);
    let column_metas = Self::parse_column_metas(&mut meta_block, &column_types)?;

    let null_bitmap_len = (column_count + 7) / 8;
    let null_bitmap = b.split_to(null_bitmap_len).to_vec();

    // Everything after the null bitmap is the optional metadata block.
    let mut column_unsigned = vec![false; column_count];
    let mut column_names = Vec::new();
    let mut primary_key = Vec::new();

    while b.has_remaining() {
      let field_type = b.get_u8();
      let field_len = b.mysql_get_lenc_uint()? as usize;
      if b.remaining() < field_len {
        return Err(invalid("table map optional metadata is truncated"));
      }
      let mut field = b.split_to(field_len);

      match field_type {
        TABLE_MAP_SIGNEDNESS => {
          // One bit per numeric column, most significant bit first.
          let bits = field.to_vec();
          let mut numeric_idx = 0;
          for (i, t) in column_types.iter().enumerate() {
            if is_numeric(*t) {
              let set = bits
                .get(numeric_idx / 8)
                .map(|byte| byte & (0x80 >> (numeric_idx % 8)) != 0)
                .unwrap_or(false);
              column_unsigned[i] = set;
              numeric_idx += 1;
            }
          }
        }
        TABLE_MAP_COLUMN_NAME => {
          while field.has_remaining() {
            column_names.push(field.mysql_get_lenc_string()?);
          }
        }
        TABLE_MAP_SIMPLE_PRIMARY_KEY => {
          while field.has_remaining() {
            primary_key.push(field.mysql_get_lenc_uint()? as usize);
          }
        }
        TABLE_MAP_PRIMARY_KEY_WITH_PREFIX => {
          while field.has_remaining() {
            primary_key.push(field.mysql_get_lenc_uint()? as usize);
            let _prefix_len = field.mysql_get_lenc_uint()?;
          }
        }
        _ => {}
      }
    }

    Ok(Self {
      table_id,
      flags,
      schema,
      table,
      column_types,
      column_metas,
      null_bitmap,
      column_unsigned,
      column_names,
      primary_key,
    })
  }

  // https://dev.mysql.com/doc/dev/mysql-server/latest/classbinary__log_1_1Table__map__event.html
  fn parse_column_metas(b: &mut Bytes, column_types: &[ColumnType]) -> io::Result<Vec<u16>> {
    let mut column_metas = vec![0_u16; column_types.len()];

    for (i, t) in column_types.iter().enumerate() {
      match t {
        // 2 bytes, little endian: maximum field length.
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING | ColumnType::MYSQL_TYPE_BIT => {
          column_metas[i] = b.get_u16_le();
        }

        // 2 bytes: (real type, field length) packed big endian.
        ColumnType::MYSQL_TYPE_STRING | ColumnType::MYSQL_TYPE_ENUM | ColumnType::MYSQL_TYPE_SET => {
          column_metas[i] = b.get_u16();
        }

        // 2 bytes: (precision, scale) packed big endian.
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
          column_metas[i] = b.get_u16();
        }

        // 1 byte: pack length.
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_GEOMETRY
        | ColumnType::MYSQL_TYPE_JSON
        | ColumnType::MYSQL_TYPE_DOUBLE
        | ColumnType::MYSQL_TYPE_FLOAT => {
          column_metas[i] = b.get_u8() as u16;
        }

        // 1 byte: fractional second precision.
        ColumnType::MYSQL_TYPE_TIME2 | ColumnType::MYSQL_TYPE_DATETIME2 | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
          column_metas[i] = b.get_u8() as u16;
        }

        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_NULL
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_DATE
        | ColumnType::MYSQL_TYPE_TIME
        | ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_YEAR => {
          column_metas[i] = 0;
        }
      }
    }

    Ok(column_metas)
  }
}

fn is_numeric(t: ColumnType) -> bool {
  matches!(
    t,
    ColumnType::MYSQL_TYPE_TINY
      | ColumnType::MYSQL_TYPE_SHORT
      | ColumnType::MYSQL_TYPE_INT24
      | ColumnType::MYSQL_TYPE_LONG
      | ColumnType::MYSQL_TYPE_LONGLONG
      | ColumnType::MYSQL_TYPE_FLOAT
      | ColumnType::MYSQL_TYPE_DOUBLE
      | ColumnType::MYSQL_TYPE_DECIMAL
      | ColumnType::MYSQL_TYPE_NEWDECIMAL
  )
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  I64(i64),
  U64(u64),
  F64(f64),
  Str(String),
  Bytes(Vec<u8>),
  /// Dates, times and datetimes, rendered in MySQL's text format.
  Temporal(String),
}

/// One row image: one entry per table column. `None` marks a column absent from
/// the image (partial row images); SQL NULL decodes to `Some(Value::Null)`.
pub type Row = Vec<Option<Value>>;

#[derive(Debug)]
pub struct RowsEvent {
  pub table_id: u64,
  pub flags: u16,
  pub column_count: u64,
  pub columns_present: Vec<u8>,
  pub columns_present_update: Vec<u8>,
  pub rows_data: Bytes,
}

impl RowsEvent {
  fn parse(mut b: Bytes, use_extras: bool, use_bitmap2: bool) -> io::Result<Self> {
    let table_id = b.get_uint_le(6);
    let flags = b.get_u16_le();

    if use_extras {
      let extras_len = b.get_u16_le() as usize;
      if extras_len < 2 || b.remaining() < extras_len - 2 {
        return Err(invalid("rows event extras are truncated"));
      }
      b.advance(extras_len - 2);
    }

    let column_count = b.mysql_get_lenc_uint()?;
    let bitmap_len = ((column_count + 7) / 8) as usize;

    let columns_present = b.split_to(bitmap_len).to_vec();
    let columns_present_update = if use_bitmap2 {
      b.split_to(bitmap_len).to_vec()
    } else {
      Vec::new()
    };

    let rows_data = b;

    Ok(Self {
      table_id,
      flags,
      column_count,
      columns_present,
      columns_present_update,
      rows_data,
    })
  }

  /// Decodes every row image in the event. Updates yield pairs: even indices
  /// carry the before image, odd indices the after image.
  pub fn decode(&self, table_map: &TableMapEvent) -> io::Result<Vec<Row>> {
    let is_update = !self.columns_present_update.is_empty();
    let mut b = self.rows_data.clone();
    let mut rows = Vec::new();

    while b.has_remaining() {
      rows.push(decode_image(&mut b, table_map, &self.columns_present)?);
      if is_update {
        rows.push(decode_image(&mut b, table_map, &self.columns_present_update)?);
      }
    }

    Ok(rows)
  }
}

fn bitmap_get(bitmap: &[u8], i: usize) -> bool {
  bitmap.get(i / 8).map(|byte| byte & (1 << (i % 8)) != 0).unwrap_or(false)
}

fn decode_image(b: &mut Bytes, table_map: &TableMapEvent, present: &[u8]) -> io::Result<Row> {
  let column_count = table_map.column_types.len();

  let present_count = (0..column_count).filter(|i| bitmap_get(present, *i)).count();
  let null_bitmap_len = (present_count + 7) / 8;
  if b.remaining() < null_bitmap_len {
    return Err(invalid("row image is truncated"));
  }
  let null_bitmap = b.split_to(null_bitmap_len).to_vec();

  let mut row = Vec::with_capacity(column_count);
  let mut image_idx = 0;

  for i in 0..column_count {
    if !bitmap_get(present, i) {
      row.push(None);
      continue;
    }

    let is_null = bitmap_get(&null_bitmap, image_idx);
    image_idx += 1;

    if is_null {
      row.push(Some(Value::Null));
      continue;
    }

    let value = decode_value(
      b,
      table_map.column_types[i],
      table_map.column_metas[i],
      table_map.column_unsigned[i],
    )?;
    row.push(Some(value));
  }

  Ok(row)
}

fn check_remaining(b: &Bytes, len: usize) -> io::Result<()> {
  if b.remaining() < len {
    return Err(invalid("row value is truncated"));
  }
  Ok(())
}

fn decode_value(b: &mut Bytes, column_type: ColumnType, meta: u16, unsigned: bool) -> io::Result<Value> {
  match column_type {
    ColumnType::MYSQL_TYPE_TINY => {
      check_remaining(b, 1)?;
      let v = b.get_u8();
      Ok(if unsigned { Value::U64(v.into()) } else { Value::I64((v as i8).into()) })
    }

    ColumnType::MYSQL_TYPE_SHORT => {
      check_remaining(b, 2)?;
      let v = b.get_u16_le();
      Ok(if unsigned { Value::U64(v.into()) } else { Value::I64((v as i16).into()) })
    }

    ColumnType::MYSQL_TYPE_INT24 => {
      check_remaining(b, 3)?;
      let v = b.get_uint_le(3) as u32;
      if unsigned {
        Ok(Value::U64(v.into()))
      } else {
        // sign-extend 24 -> 32 bits
        let v = ((v << 8) as i32) >> 8;
        Ok(Value::I64(v.into()))
      }
    }

    ColumnType::MYSQL_TYPE_LONG => {
      check_remaining(b, 4)?;
      let v = b.get_u32_le();
      Ok(if unsigned { Value::U64(v.into()) } else { Value::I64((v as i32).into()) })
    }

    ColumnType::MYSQL_TYPE_LONGLONG => {
      check_remaining(b, 8)?;
      let v = b.get_u64_le();
      Ok(if unsigned { Value::U64(v) } else { Value::I64(v as i64) })
    }

    ColumnType::MYSQL_TYPE_FLOAT => {
      check_remaining(b, 4)?;
      Ok(Value::F64(b.get_f32_le().into()))
    }

    ColumnType::MYSQL_TYPE_DOUBLE => {
      check_remaining(b, 8)?;
      Ok(Value::F64(b.get_f64_le()))
    }

    ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => {
      let len = if meta > 255 {
        check_remaining(b, 2)?;
        b.get_u16_le() as usize
      } else {
        check_remaining(b, 1)?;
        b.get_u8() as usize
      };
      check_remaining(b, len)?;
      Ok(string_or_bytes(b.split_to(len)))
    }

    ColumnType::MYSQL_TYPE_STRING => {
      // The metadata smuggles the real type for ENUM and SET columns, and the
      // declared length for CHAR (possibly spilling into the high byte).
      let b0 = (meta >> 8) as u8;
      let b1 = (meta & 0xFF) as u8;
      if b0 != 0 && (b0 & 0x30) != 0x30 {
        let real_type = b0 | 0x30;
        let length = b1 as usize | ((((b0 & 0x30) ^ 0x30) as usize) << 4);
        decode_string_like(b, real_type, length)
      } else if b0 == ColumnType::MYSQL_TYPE_ENUM as u8 || b0 == ColumnType::MYSQL_TYPE_SET as u8 {
        decode_string_like(b, b0, b1 as usize)
      } else {
        decode_string_like(b, ColumnType::MYSQL_TYPE_STRING as u8, b1 as usize)
      }
    }

    ColumnType::MYSQL_TYPE_ENUM => decode_enum(b, (meta & 0xFF) as usize),
    ColumnType::MYSQL_TYPE_SET => decode_set(b, (meta & 0xFF) as usize),

    ColumnType::MYSQL_TYPE_BIT => {
      let nbits = ((meta >> 8) * 8 + (meta & 0xFF)) as usize;
      let len = (nbits + 7) / 8;
      check_remaining(b, len)?;
      Ok(Value::U64(b.get_uint(len)))
    }

    ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
      let precision = (meta >> 8) as usize;
      let scale = (meta & 0xFF) as usize;
      decode_decimal(b, precision, scale)
    }

    ColumnType::MYSQL_TYPE_YEAR => {
      check_remaining(b, 1)?;
      let v = b.get_u8();
      Ok(Value::U64(if v == 0 { 0 } else { 1900 + v as u64 }))
    }

    ColumnType::MYSQL_TYPE_DATE => {
      check_remaining(b, 3)?;
      let v = b.get_uint_le(3);
      let day = v & 0x1F;
      let month = (v >> 5) & 0x0F;
      let year = v >> 9;
      Ok(Value::Temporal(format!("{:04}-{:02}-{:02}", year, month, day)))
    }

    ColumnType::MYSQL_TYPE_TIME => {
      check_remaining(b, 3)?;
      let v = b.get_uint_le(3) as i64;
      Ok(Value::Temporal(format!(
        "{:02}:{:02}:{:02}",
        v / 10000,
        (v / 100) % 100,
        v % 100
      )))
    }

    ColumnType::MYSQL_TYPE_DATETIME => {
      check_remaining(b, 8)?;
      let v = b.get_u64_le();
      let date = v / 1_000_000;
      let time = v % 1_000_000;
      Ok(Value::Temporal(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        date / 10000,
        (date / 100) % 100,
        date % 100,
        time / 10000,
        (time / 100) % 100,
        time % 100
      )))
    }

    ColumnType::MYSQL_TYPE_TIMESTAMP => {
      check_remaining(b, 4)?;
      let secs = b.get_u32_le() as i64;
      Ok(Value::Temporal(format_unix(secs, 0, 0)))
    }

    ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
      check_remaining(b, 4)?;
      let secs = b.get_u32() as i64;
      let fsp = meta as usize;
      let micros = decode_fractional(b, fsp)?;
      Ok(Value::Temporal(format_unix(secs, micros, fsp)))
    }

    ColumnType::MYSQL_TYPE_DATETIME2 => decode_datetime2(b, meta as usize),
    ColumnType::MYSQL_TYPE_TIME2 => decode_time2(b, meta as usize),

    ColumnType::MYSQL_TYPE_TINY_BLOB
    | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
    | ColumnType::MYSQL_TYPE_LONG_BLOB
    | ColumnType::MYSQL_TYPE_BLOB
    | ColumnType::MYSQL_TYPE_GEOMETRY => {
      let len_bytes = meta as usize;
      check_remaining(b, len_bytes)?;
      let len = b.get_uint_le(len_bytes) as usize;
      check_remaining(b, len)?;
      Ok(string_or_bytes(b.split_to(len)))
    }

    ColumnType::MYSQL_TYPE_JSON => {
      let len_bytes = meta as usize;
      check_remaining(b, len_bytes)?;
      let len = b.get_uint_le(len_bytes) as usize;
      check_remaining(b, len)?;
      let blob = b.split_to(len);
      json::decode(&blob).map(Value::Str)
    }

    ColumnType::MYSQL_TYPE_NULL => Ok(Value::Null),
  }
}

fn decode_string_like(b: &mut Bytes, real_type: u8, max_length: usize) -> io::Result<Value> {
  if real_type == ColumnType::MYSQL_TYPE_ENUM as u8 {
    return decode_enum(b, max_length);
  }
  if real_type == ColumnType::MYSQL_TYPE_SET as u8 {
    return decode_set(b, max_length);
  }

  let len = if max_length > 255 {
    check_remaining(b, 2)?;
    b.get_u16_le() as usize
  } else {
    check_remaining(b, 1)?;
    b.get_u8() as usize
  };
  check_remaining(b, len)?;
  Ok(string_or_bytes(b.split_to(len)))
}

fn decode_enum(b: &mut Bytes, pack_length: usize) -> io::Result<Value> {
  check_remaining(b, pack_length)?;
  match pack_length {
    1 => Ok(Value::U64(b.get_u8().into())),
    2 => Ok(Value::U64(b.get_u16_le().into())),
    n => Err(invalid(format!("enum pack length {} is not supported", n))),
  }
}

fn decode_set(b: &mut Bytes, pack_length: usize) -> io::Result<Value> {
  if pack_length == 0 || pack_length > 8 {
    return Err(invalid(format!("set pack length {} is not supported", pack_length)));
  }
  check_remaining(b, pack_length)?;
  Ok(Value::U64(b.get_uint_le(pack_length)))
}

// Binary and text collations are indistinguishable at the binlog level, so
// anything that decodes as utf-8 is surfaced as a string.
fn string_or_bytes(raw: Bytes) -> Value {
  match String::from_utf8(raw.to_vec()) {
    Ok(s) => Value::Str(s),
    Err(err) => Value::Bytes(err.into_bytes()),
  }
}

// https://dev.mysql.com/doc/dev/mysql-server/latest/classmy__decimal.html
const DIG_TO_BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

fn decode_decimal(b: &mut Bytes, precision: usize, scale: usize) -> io::Result<Value> {
  let intg = precision - scale;
  let intg0 = intg / 9;
  let frac0 = scale / 9;
  let intg0x = intg % 9;
  let frac0x = scale % 9;

  let binsize = intg0 * 4 + DIG_TO_BYTES[intg0x] + frac0 * 4 + DIG_TO_BYTES[frac0x];
  check_remaining(b, binsize)?;
  let mut buf = b.split_to(binsize).to_vec();

  let negative = buf[0] & 0x80 == 0;
  buf[0] ^= 0x80;
  if negative {
    for byte in buf.iter_mut() {
      *byte = !*byte;
    }
  }

  let mut cursor = &buf[..];
  let mut digits = String::new();

  if intg0x > 0 {
    let v = cursor.get_uint(DIG_TO_BYTES[intg0x]);
    digits.push_str(&v.to_string());
  }
  for _ in 0..intg0 {
    let v = cursor.get_u32();
    if digits.is_empty() {
      digits.push_str(&v.to_string());
    } else {
      digits.push_str(&format!("{:09}", v));
    }
  }
  let int_part = digits.trim_start_matches('0');
  let int_part = if int_part.is_empty() { "0" } else { int_part };

  let mut frac_digits = String::new();
  for _ in 0..frac0 {
    let v = cursor.get_u32();
    frac_digits.push_str(&format!("{:09}", v));
  }
  if frac0x > 0 {
    let v = cursor.get_uint(DIG_TO_BYTES[frac0x]);
    frac_digits.push_str(&format!("{:0width$}", v, width = frac0x));
  }

  let mut out = String::new();
  if negative {
    out.push('-');
  }
  out.push_str(int_part);
  if scale > 0 {
    out.push('.');
    out.push_str(&frac_digits[..scale]);
  }

  Ok(Value::Str(out))
}

fn decode_fractional(b: &mut Bytes, fsp: usize) -> io::Result<u32> {
  let frac_bytes = (fsp + 1) / 2;
  if frac_bytes == 0 {
    return Ok(0);
  }
  check_remaining(b, frac_bytes)?;
  let frac = b.get_uint(frac_bytes) as u32;
  Ok(frac * 100_u32.pow(3 - frac_bytes as u32))
}

fn decode_datetime2(b: &mut Bytes, fsp: usize) -> io::Result<Value> {
  check_remaining(b, 5)?;
  let int_part = b.get_uint(5) as i64 - 0x8000000000;
  let micros = decode_fractional(b, fsp)?;

  let ymd = int_part >> 17;
  let ym = ymd >> 5;
  let hms = int_part & 0x1FFFF;

  let day = ymd & 0x1F;
  let month = ym % 13;
  let year = ym / 13;

  let second = hms & 0x3F;
  let minute = (hms >> 6) & 0x3F;
  let hour = hms >> 12;

  let mut out = format!(
    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
    year, month, day, hour, minute, second
  );
  push_fractional(&mut out, micros, fsp);
  Ok(Value::Temporal(out))
}

fn decode_time2(b: &mut Bytes, fsp: usize) -> io::Result<Value> {
  check_remaining(b, 3)?;
  let int_part = b.get_uint(3) as i64 - 0x800000;
  let micros = decode_fractional(b, fsp)?;

  let (sign, magnitude, micros) = if int_part < 0 {
    let magnitude = if micros > 0 { -int_part - 1 } else { -int_part };
    let micros = if micros > 0 { 1_000_000 - micros } else { 0 };
    ("-", magnitude, micros)
  } else {
    ("", int_part, micros)
  };

  let hour = (magnitude >> 12) & 0x3FF;
  let minute = (magnitude >> 6) & 0x3F;
  let second = magnitude & 0x3F;

  let mut out = format!("{}{:02}:{:02}:{:02}", sign, hour, minute, second);
  push_fractional(&mut out, micros, fsp);
  Ok(Value::Temporal(out))
}

fn push_fractional(out: &mut String, micros: u32, fsp: usize) {
  if fsp > 0 {
    let digits = format!("{:06}", micros);
    out.push('.');
    out.push_str(&digits[..fsp]);
  }
}

// Days-to-civil conversion, from Howard Hinnant's date algorithms.
fn civil_from_days(days: i64) -> (i64, i64, i64) {
  let z = days + 719_468;
  let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
  let doe = z - era * 146_097;
  let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
  let y = yoe + era * 400;
  let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
  let mp = (5 * doy + 2) / 153;
  let d = doy - (153 * mp + 2) / 5 + 1;
  let m = if mp < 10 { mp + 3 } else { mp - 9 };
  (if m <= 2 { y + 1 } else { y }, m, d)
}

fn format_unix(secs: i64, micros: u32, fsp: usize) -> String {
  let days = secs.div_euclid(86_400);
  let rem = secs.rem_euclid(86_400);
  let (year, month, day) = civil_from_days(days);

  let mut out = format!(
    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
    year,
    month,
    day,
    rem / 3600,
    (rem / 60) % 60,
    rem % 60
  );
  push_fractional(&mut out, micros, fsp);
  out
}

/// Decoder for MySQL's binary JSON column format.
///
/// https://dev.mysql.com/doc/dev/mysql-server/latest/json__binary_8h.html
mod json {
  use std::io;

  use super::invalid;

  const TYPE_SMALL_OBJECT: u8 = 0x00;
  const TYPE_LARGE_OBJECT: u8 = 0x01;
  const TYPE_SMALL_ARRAY: u8 = 0x02;
  const TYPE_LARGE_ARRAY: u8 = 0x03;
  const TYPE_LITERAL: u8 = 0x04;
  const TYPE_INT16: u8 = 0x05;
  const TYPE_UINT16: u8 = 0x06;
  const TYPE_INT32: u8 = 0x07;
  const TYPE_UINT32: u8 = 0x08;
  const TYPE_INT64: u8 = 0x09;
  const TYPE_UINT64: u8 = 0x0a;
  const TYPE_DOUBLE: u8 = 0x0b;
  const TYPE_STRING: u8 = 0x0c;

  pub fn decode(blob: &[u8]) -> io::Result<String> {
    if blob.is_empty() {
      return Ok("null".to_string());
    }
    let mut out = String::new();
    decode_value(blob[0], &blob[1..], &mut out)?;
    Ok(out)
  }

  fn read_u16(data: &[u8], at: usize) -> io::Result<usize> {
    data
      .get(at..at + 2)
      .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
      .ok_or_else(|| invalid("json value is truncated"))
  }

  fn read_u32(data: &[u8], at: usize) -> io::Result<usize> {
    data
      .get(at..at + 4)
      .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
      .ok_or_else(|| invalid("json value is truncated"))
  }

  fn read_offset(data: &[u8], at: usize, large: bool) -> io::Result<usize> {
    if large {
      read_u32(data, at)
    } else {
      read_u16(data, at)
    }
  }

  // Variable length: 7 bits per byte, least significant group first.
  fn read_var_len(data: &[u8], at: usize) -> io::Result<(usize, usize)> {
    let mut len = 0_usize;
    let mut pos = at;
    loop {
      let byte = *data.get(pos).ok_or_else(|| invalid("json value is truncated"))?;
      len |= ((byte & 0x7F) as usize) << (7 * (pos - at));
      pos += 1;
      if byte & 0x80 == 0 {
        break;
      }
    }
    Ok((len, pos))
  }

  fn decode_value(t: u8, data: &[u8], out: &mut String) -> io::Result<()> {
    match t {
      TYPE_SMALL_OBJECT => decode_object(data, false, out),
      TYPE_LARGE_OBJECT => decode_object(data, true, out),
      TYPE_SMALL_ARRAY => decode_array(data, false, out),
      TYPE_LARGE_ARRAY => decode_array(data, true, out),
      TYPE_LITERAL => {
        match data.first() {
          Some(0x00) => out.push_str("null"),
          Some(0x01) => out.push_str("true"),
          Some(0x02) => out.push_str("false"),
          _ => return Err(invalid("unknown json literal")),
        }
        Ok(())
      }
      TYPE_INT16 => {
        let v = read_u16(data, 0)? as u16 as i16;
        out.push_str(&v.to_string());
        Ok(())
      }
      TYPE_UINT16 => {
        out.push_str(&read_u16(data, 0)?.to_string());
        Ok(())
      }
      TYPE_INT32 => {
        let v = read_u32(data, 0)? as u32 as i32;
        out.push_str(&v.to_string());
        Ok(())
      }
      TYPE_UINT32 => {
        out.push_str(&read_u32(data, 0)?.to_string());
        Ok(())
      }
      TYPE_INT64 => {
        let v = data
          .get(..8)
          .map(|b| i64::from_le_bytes(b.try_into().unwrap()))
          .ok_or_else(|| invalid("json value is truncated"))?;
        out.push_str(&v.to_string());
        Ok(())
      }
      TYPE_UINT64 => {
        let v = data
          .get(..8)
          .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
          .ok_or_else(|| invalid("json value is truncated"))?;
        out.push_str(&v.to_string());
        Ok(())
      }
      TYPE_DOUBLE => {
        let v = data
          .get(..8)
          .map(|b| f64::from_le_bytes(b.try_into().unwrap()))
          .ok_or_else(|| invalid("json value is truncated"))?;
        out.push_str(&v.to_string());
        Ok(())
      }
      TYPE_STRING => {
        let (len, start) = read_var_len(data, 0)?;
        let raw = data
          .get(start..start + len)
          .ok_or_else(|| invalid("json value is truncated"))?;
        push_json_string(out, &String::from_utf8_lossy(raw));
        Ok(())
      }
      unknown => Err(invalid(format!("json type {:#x} is not supported", unknown))),
    }
  }

  // Inlined values sit directly in the value entry instead of behind an offset.
  fn is_inlined(t: u8, large: bool) -> bool {
    match t {
      TYPE_LITERAL | TYPE_INT16 | TYPE_UINT16 => true,
      TYPE_INT32 | TYPE_UINT32 => large,
      _ => false,
    }
  }

  fn decode_object(data: &[u8], large: bool, out: &mut String) -> io::Result<()> {
    let offset_size = if large { 4 } else { 2 };
    let count = read_offset(data, 0, large)?;
    let _size = read_offset(data, offset_size, large)?;

    let key_entries = 2 * offset_size;
    let value_entries = key_entries + count * (offset_size + 2);

    out.push('{');
    for i in 0..count {
      if i > 0 {
        out.push(',');
      }

      let key_offset = read_offset(data, key_entries + i * (offset_size + 2), large)?;
      let key_len = read_u16(data, key_entries + i * (offset_size + 2) + offset_size)?;
      let key = data
        .get(key_offset..key_offset + key_len)
        .ok_or_else(|| invalid("json key is out of bounds"))?;
      push_json_string(out, &String::from_utf8_lossy(key));
      out.push(':');

      decode_element(data, value_entries + i * (offset_size + 1), large, out)?;
    }
    out.push('}');
    Ok(())
  }

  fn decode_array(data: &[u8], large: bool, out: &mut String) -> io::Result<()> {
    let offset_size = if large { 4 } else { 2 };
    let count = read_offset(data, 0, large)?;
    let _size = read_offset(data, offset_size, large)?;

    let value_entries = 2 * offset_size;

    out.push('[');
    for i in 0..count {
      if i > 0 {
        out.push(',');
      }
      decode_element(data, value_entries + i * (offset_size + 1), large, out)?;
    }
    out.push(']');
    Ok(())
  }

  fn decode_element(data: &[u8], entry_at: usize, large: bool, out: &mut String) -> io::Result<()> {
    let t = *data.get(entry_at).ok_or_else(|| invalid("json value is truncated"))?;
    if is_inlined(t, large) {
      let inline = data
        .get(entry_at + 1..entry_at + 1 + if large { 4 } else { 2 })
        .ok_or_else(|| invalid("json value is truncated"))?;
      decode_value(t, inline, out)
    } else {
      let offset = read_offset(data, entry_at + 1, large)?;
      let value = data.get(offset..).ok_or_else(|| invalid("json value is out of bounds"))?;
      decode_value(t, value, out)
    }
  }

  fn push_json_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
      match c {
        '"' => out.push_str("\\\""),
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
        c => out.push(c),
      }
    }
    out.push('"');
  }
}

#[cfg(test)]
mod test {
  use bytes::{BufMut, BytesMut};

  use super::super::constants::ColumnType;
  use super::{BinlogEvent, BinlogEventPacket, TableMapEvent, Value};

  #[test]
  fn parses_rotate() {
    const ROTATE_EVENT: &[u8] = b"\x00\x00\x00\x00\x00\x04\x01\x00\x00\x00\x2d\x00\x00\x00\x00\x00\x00\
                                       \x00\x20\x00\x96\x00\x00\x00\x00\x00\x00\x00\x73\x68\x6f\x70\x69\x66\
                                       \x79\x2d\x62\x69\x6e\x2e\x30\x30\x30\x30\x30\x35";

    let packet = BinlogEventPacket::parse(ROTATE_EVENT).unwrap();
    match packet.event {
      BinlogEvent::Rotate(evt) => {
        assert_eq!(150, evt.next_log_position);
        assert_eq!("shopify-bin.000005", evt.next_log_file);
      }
      unexpected => panic!("unexpected {:?}", unexpected),
    }
  }

  #[test]
  fn parses_format_description() {
    const FORMAT_DESCRIPTION_EVENT: &[u8] = b"\x00\xf2\x43\x5d\x5d\x0f\x01\x00\x00\x00\x77\x00\x00\x00\x00\x00\x00\
                                                   \x00\x00\x00\x04\x00\x35\x2e\x37\x2e\x31\x38\x2d\x31\x36\x2d\x6c\x6f\
                                                   \x67\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
                                                   \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
                                                   \x00\x00\x00\x00\x00\x00\x00\x00\x13\x38\x0d\x00\x08\x00\x12\x00\x04\
                                                   \x04\x04\x04\x12\x00\x00\x5f\x00\x04\x1a\x08\x00\x00\x00\x08\x08\x08\
                                                   \x02\x00\x00\x00\x0a\x0a\x0a\x2a\x2a\x00\x12\x34\x00\x00\xc2\x36\x0c\
                                                   \xdf";

    let packet = BinlogEventPacket::parse(FORMAT_DESCRIPTION_EVENT).unwrap();
    match packet.event {
      BinlogEvent::Format(evt) => {
        assert_eq!(4, evt.version);
        assert_eq!("5.7.18-16-log", evt.server_version);
        assert_eq!(0, evt.create_timestamp);
      }
      unexpected => panic!("unexpected {:?}", unexpected),
    }
  }

  #[test]
  fn parses_table_map() {
    const TABLE_MAP_EVENT: &[u8] = b"\x00\xfc\x5a\x5d\x5d\x13\x01\x00\x00\x00\x32\x00\x00\x00\x49\x01\x00\
                                          \x00\x00\x00\x2d\x0a\x00\x00\x00\x00\x01\x00\x04\x70\x65\x74\x73\x00\
                                          \x04\x63\x61\x74\x73\x00\x04\x03\x0f\x0f\x0a\x04\x58\x02\x58\x02\x00";

    let packet = BinlogEventPacket::parse(TABLE_MAP_EVENT).unwrap();
    match packet.event {
      BinlogEvent::TableMap(evt) => {
        assert_eq!(2605, evt.table_id);
        assert_eq!(1, evt.flags);
        assert_eq!("pets", evt.schema);
        assert_eq!("cats", evt.table);
        assert_eq!(
          vec![
            ColumnType::MYSQL_TYPE_LONG,
            ColumnType::MYSQL_TYPE_VARCHAR,
            ColumnType::MYSQL_TYPE_VARCHAR,
            ColumnType::MYSQL_TYPE_DATE
          ],
          evt.column_types
        );
        assert_eq!(vec![0, 600, 600, 0], evt.column_metas);
        assert!(evt.column_names.is_empty());
        assert!(evt.primary_key.is_empty());
      }
      unexpected => panic!("unexpected {:?}", unexpected),
    }
  }

  #[test]
  fn parses_anonymous_gtid_as_not_supported() {
    const ANONYMOUS_GTID_EVENT: &[u8] = b"\x00\xfc\x5a\x5d\x5d\x22\x01\x00\x00\x00\x3d\x00\x00\x00\xd3\x00\x00\
                                               \x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\
                                               \x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x02\x00\x00\x00\x00\x00\
                                               \x00\x00\x00\x01\x00\x00\x00\x00\x00\x00\x00";

    let packet = BinlogEventPacket::parse(ANONYMOUS_GTID_EVENT).unwrap();
    match packet.event {
      BinlogEvent::NotSupported(super::BinlogEventType::ANONYMOUS_GTID_EVENT) => {}
      unexpected => panic!("unexpected {:?}", unexpected),
    }
  }

  #[test]
  fn parses_query_event_with_ddl() {
    const QUERY_EVENT: &[u8] = b"\x00\xfc\x5a\x5d\x5d\x02\x01\x00\x00\x00\x44\x00\x00\x00\x17\x01\x00\
                                      \x00\x08\x00\x3b\x18\x00\x00\x00\x00\x00\x00\x04\x00\x00\x1a\x00\x00\
                                      \x00\x00\x00\x00\x01\x00\x00\x00\x40\x00\x00\x00\x00\x06\x03\x73\x74\
                                      \x64\x04\x21\x00\x21\x00\x2d\x00\x70\x65\x74\x73\x00\x42\x45\x47\x49\
                                      \x4e";

    let packet = BinlogEventPacket::parse(QUERY_EVENT).unwrap();
    match packet.event {
      BinlogEvent::Query(evt) => {
        assert_eq!("pets", evt.schema);
        assert_eq!("BEGIN", evt.query);
      }
      unexpected => panic!("unexpected {:?}", unexpected),
    }
  }

  // Builds a packet envelope around an event payload.
  fn packet(event_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut b = BytesMut::new();
    b.put_u8(0x00);
    b.put_u32_le(0x5d5d5afc); // timestamp
    b.put_u8(event_type);
    b.put_u32_le(1); // server id
    b.put_u32_le(19 + payload.len() as u32);
    b.put_u32_le(0); // log position
    b.put_u16_le(0); // flags
    b.put(payload);
    b.to_vec()
  }

  fn table_map_payload(full_metadata: bool) -> Vec<u8> {
    let mut b = BytesMut::new();
    b.put_uint_le(2605, 6); // table id
    b.put_u16_le(1); // flags
    b.put_u8(4);
    b.put(&b"pets"[..]);
    b.put_u8(0);
    b.put_u8(4);
    b.put(&b"cats"[..]);
    b.put_u8(0);
    b.put_u8(4); // column count
    b.put_u8(ColumnType::MYSQL_TYPE_LONG as u8);
    b.put_u8(ColumnType::MYSQL_TYPE_VARCHAR as u8);
    b.put_u8(ColumnType::MYSQL_TYPE_VARCHAR as u8);
    b.put_u8(ColumnType::MYSQL_TYPE_DATE as u8);
    b.put_u8(4); // meta block length
    b.put_u16_le(600);
    b.put_u16_le(600);
    b.put_u8(0x0e); // null bitmap: id is NOT NULL

    if full_metadata {
      // SIGNEDNESS over the single numeric column: signed.
      b.put_u8(1);
      b.put_u8(1);
      b.put_u8(0x00);
      // COLUMN_NAME
      let names: &[&[u8]] = &[b"id", b"name", b"owner", b"adopted_on"];
      let names_len: usize = names.iter().map(|n| 1 + n.len()).sum();
      b.put_u8(4);
      b.put_u8(names_len as u8);
      for name in names {
        b.put_u8(name.len() as u8);
        b.put(*name);
      }
      // SIMPLE_PRIMARY_KEY: column 0
      b.put_u8(8);
      b.put_u8(1);
      b.put_u8(0);
    }

    b.to_vec()
  }

  #[test]
  fn parses_table_map_full_metadata() {
    let raw = packet(0x13, &table_map_payload(true));
    let packet = BinlogEventPacket::parse(raw).unwrap();
    match packet.event {
      BinlogEvent::TableMap(evt) => {
        assert_eq!(vec!["id", "name", "owner", "adopted_on"], evt.column_names);
        assert_eq!(vec![0], evt.primary_key);
        assert_eq!(vec![false, false, false, false], evt.column_unsigned);
      }
      unexpected => panic!("unexpected {:?}", unexpected),
    }
  }

  fn parse_table_map(full_metadata: bool) -> TableMapEvent {
    let raw = packet(0x13, &table_map_payload(full_metadata));
    match BinlogEventPacket::parse(raw).unwrap().event {
      BinlogEvent::TableMap(evt) => evt,
      unexpected => panic!("unexpected {:?}", unexpected),
    }
  }

  #[test]
  fn decodes_insert_row() {
    const INSERT_ROW_EVENT: &[u8] = b"\x00\xfc\x5a\x5d\x5d\x1e\x01\x00\x00\x00\x37\x00\x00\x00\x80\x01\x00\
                                           \x00\x00\x00\x2d\x0a\x00\x00\x00\x00\x01\x00\x02\x00\x04\xff\xf0\x04\
                                           \x00\x00\x00\x07\x00\x43\x68\x61\x72\x6c\x69\x65\x05\x00\x52\x69\x76\
                                           \x65\x72\xb5\xc0\x0f";

    let table_map = parse_table_map(false);

    let packet = BinlogEventPacket::parse(INSERT_ROW_EVENT).unwrap();
    let rows = match packet.event {
      BinlogEvent::Insert(evt) => {
        assert_eq!(2605, evt.table_id);
        evt.decode(&table_map).unwrap()
      }
      unexpected => panic!("unexpected {:?}", unexpected),
    };

    assert_eq!(1, rows.len());
    assert_eq!(
      vec![
        Some(Value::I64(4)),
        Some(Value::Str("Charlie".to_string())),
        Some(Value::Str("River".to_string())),
        Some(Value::Temporal("2016-05-21".to_string())),
      ],
      rows[0]
    );
  }

  #[test]
  fn decodes_update_row_pairs() {
    let table_map = parse_table_map(true);

    // UPDATE_ROWS_EVENTV2 with before and after images for a single row.
    let mut payload = BytesMut::new();
    payload.put_uint_le(2605, 6);
    payload.put_u16_le(1);
    payload.put_u16_le(2); // extras length (no extras)
    payload.put_u8(4); // column count
    payload.put_u8(0x0f); // before image columns
    payload.put_u8(0x0f); // after image columns
    for (id, name) in [(7_u32, &b"Charlie"[..]), (7_u32, &b"Chuck"[..])] {
      payload.put_u8(0x08); // null bitmap: adopted_on is NULL
      payload.put_u32_le(id);
      payload.put_u16_le(name.len() as u16);
      payload.put(name);
      payload.put_u16_le(5);
      payload.put(&b"River"[..]);
    }

    let raw = packet(0x1f, &payload);
    let rows = match BinlogEventPacket::parse(raw).unwrap().event {
      BinlogEvent::Update(evt) => evt.decode(&table_map).unwrap(),
      unexpected => panic!("unexpected {:?}", unexpected),
    };

    assert_eq!(2, rows.len());
    assert_eq!(Some(Value::Str("Charlie".to_string())), rows[0][1]);
    assert_eq!(Some(Value::Str("Chuck".to_string())), rows[1][1]);
    assert_eq!(Some(Value::Null), rows[0][3]);
    assert_eq!(Some(Value::I64(7)), rows[1][0]);
  }

  #[test]
  fn decodes_decimal_values() {
    use bytes::Bytes;

    // DECIMAL(10, 0), value 1234567890: one leading digit then one 9-digit group.
    let mut b = Bytes::from_static(&[0x81, 0x0D, 0xFB, 0x38, 0xD2]);
    assert_eq!(
      Value::Str("1234567890".to_string()),
      super::decode_decimal(&mut b, 10, 0).unwrap()
    );

    // Same magnitude, negative: all bytes complemented.
    let mut b = Bytes::from_static(&[0x7E, 0xF2, 0x04, 0xC7, 0x2D]);
    assert_eq!(
      Value::Str("-1234567890".to_string()),
      super::decode_decimal(&mut b, 10, 0).unwrap()
    );

    // DECIMAL(6, 2), value 1234.56: 1234 in two bytes (sign bit on the first),
    // 56 in one fractional byte.
    let mut b = Bytes::from_static(&[0x84, 0xD2, 0x38]);
    assert_eq!(
      Value::Str("1234.56".to_string()),
      super::decode_decimal(&mut b, 6, 2).unwrap()
    );
  }

  #[test]
  fn decodes_datetime2() {
    use bytes::Bytes;

    // 2024-01-01 01:01:01, fsp 0.
    let ym = 2024 * 13 + 1;
    let ymd = (ym << 5) | 1;
    let hms = (1 << 12) | (1 << 6) | 1;
    let int_part = ((ymd as u64) << 17 | hms as u64) + 0x8000000000;
    let mut b = Bytes::copy_from_slice(&int_part.to_be_bytes()[3..8]);

    assert_eq!(
      Value::Temporal("2024-01-01 01:01:01".to_string()),
      super::decode_datetime2(&mut b, 0).unwrap()
    );
  }

  #[test]
  fn decodes_json_object() {
    // {"a":"b"} in the small-object encoding.
    const BLOB: &[u8] = &[
      0x00, // small object
      0x01, 0x00, // count
      0x0e, 0x00, // size
      0x0b, 0x00, // key offset
      0x01, 0x00, // key length
      0x0c, // value type: string
      0x0c, 0x00, // value offset
      0x61, // "a"
      0x01, 0x62, // "b"
    ];
    assert_eq!("{\"a\":\"b\"}", super::json::decode(BLOB).unwrap());
  }

  #[test]
  fn decodes_json_inlined_scalar() {
    // [3, true] in the small-array encoding: both elements inlined.
    const BLOB: &[u8] = &[
      0x02, // small array
      0x02, 0x00, // count
      0x0a, 0x00, // size
      0x05, 0x03, 0x00, // int16, inlined
      0x04, 0x01, 0x00, // literal true, inlined
    ];
    assert_eq!("[3,true]", super::json::decode(BLOB).unwrap());
  }

  #[test]
  fn decodes_unsigned_via_signedness_metadata() {
    use bytes::Bytes;

    // TINY UNSIGNED 200 would read as -56 if signedness were ignored.
    let mut b = Bytes::from_static(&[200]);
    assert_eq!(
      Value::U64(200),
      super::decode_value(&mut b, ColumnType::MYSQL_TYPE_TINY, 0, true).unwrap()
    );

    let mut b = Bytes::from_static(&[200]);
    assert_eq!(
      Value::I64(-56),
      super::decode_value(&mut b, ColumnType::MYSQL_TYPE_TINY, 0, false).unwrap()
    );
  }
}
