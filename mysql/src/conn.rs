use std::cmp::max;
use std::net::SocketAddr;
use std::time::Duration;
use std::{fmt, io};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::binlog::BinlogEventPacket;
use super::buf_ext::{BufExt, BufMutExt};
use super::constants::{
  BinlogDumpFlags, CapabilityFlags, CharacterSet, Command, StatusFlags, CACHING_SHA2_PASSWORD_PLUGIN_NAME,
  MAX_PAYLOAD_LEN, MYSQL_NATIVE_PASSWORD_PLUGIN_NAME,
};
use super::query::{Column, QueryResults, RowValue};
use super::scramble;
use super::stream::Stream;

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
  pub user: String,
  pub password: Option<String>,
  pub database: Option<String>,
  pub charset: CharacterSet,
  pub connect_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
  fn default() -> Self {
    Self {
      user: "mysql".to_string(),
      password: None,
      database: None,
      charset: CharacterSet::UTF8MB4,
      connect_timeout: None,
    }
  }
}

#[derive(Debug)]
pub struct Connection {
  stream: Stream,
  capabilities: CapabilityFlags,
  status_flags: StatusFlags,
  sequence_id: u8,
  options: ConnectionOptions,
  max_packet_size: u32,
  warnings: u16,
  affected_rows: u64,
  last_inserted_id: u64,
}

impl Connection {
  pub async fn connect_tcp(addrs: impl Into<Vec<SocketAddr>>, options: ConnectionOptions) -> io::Result<Self> {
    let addrs = addrs.into();
    let stream = match options.connect_timeout {
      Some(timeout) => tokio::time::timeout(timeout, Stream::connect_tcp(addrs))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??,
      None => Stream::connect_tcp(addrs).await?,
    };
    Self::connect(stream, options).await
  }

  async fn connect(stream: Stream, options: ConnectionOptions) -> io::Result<Self> {
    let mut connection = Self {
      stream,
      capabilities: CapabilityFlags::empty(),
      status_flags: StatusFlags::empty(),
      sequence_id: 0,
      options,
      max_packet_size: 16_777_216, // 16MB
      warnings: 0,
      affected_rows: 0,
      last_inserted_id: 0,
    };

    connection.handshake().await?;

    Ok(connection)
  }

  pub fn affected_rows(&self) -> u64 {
    self.affected_rows
  }

  pub fn last_inserted_id(&self) -> u64 {
    self.last_inserted_id
  }

  pub fn warnings(&self) -> u16 {
    self.warnings
  }

  pub async fn close(mut self) -> io::Result<()> {
    self.write_command(Command::COM_QUIT, &[]).await?;
    match self.read_payload().await {
      Ok(payload) => Err(self.parse_and_handle_server_error(payload)),
      // read_exact returns UnexpectedEof once the server hangs up, which is the
      // expected reply to COM_QUIT.
      Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(()),
      Err(err) => Err(err),
    }
  }

  async fn handshake(&mut self) -> io::Result<()> {
    // https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase.html
    let payload = self.read_payload().await?;

    match payload.first() {
      Some(0xFF) => Err(self.parse_and_handle_server_error(payload)),
      Some(_) => {
        let handshake = Handshake::parse(payload)?;
        self.handle_handshake(handshake).await
      }
      None => Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "Unexpected EOF while parsing handshake response",
      )),
    }
  }

  async fn handle_handshake(&mut self, p: Handshake) -> io::Result<()> {
    if p.protocol_version != 10u8 {
      return Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("protocol version {} is not supported", p.protocol_version),
      ));
    }

    if !p.capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
      return Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "server does not support the 4.1 protocol",
      ));
    }

    // Intersection between what the server supports, and what our client supports.
    self.capabilities = p.capabilities & default_client_capabilities(&self.options);
    self.status_flags = p.status_flags;

    self
      .write_handshake_response(p.auth_plugin.as_str(), p.nonce().chunk())
      .await?;
    self.read_auth_response().await
  }

  async fn read_auth_response(&mut self) -> io::Result<()> {
    loop {
      let mut payload = self.read_payload().await?;

      match payload.first() {
        Some(0x00) => return self.parse_and_handle_server_ok(payload),
        // AuthMoreData: caching_sha2 fast path sends 0x03 (success, OK follows)
        // or 0x04 (full auth required, which needs TLS or an RSA exchange).
        Some(0x01) => {
          if payload.chunk() == [0x01, 0x03] {
            continue;
          }
          return Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "server requires full caching_sha2 authentication, which needs a TLS channel",
          ));
        }
        // AuthSwitch
        Some(0xFE) => {
          payload.advance(1);
          let auth_plugin = payload.mysql_get_null_terminated_string()?;
          let nonce = payload.mysql_get_null_terminated_string()?;
          self
            .write_auth_switch_response(auth_plugin.as_str(), nonce.as_bytes())
            .await?;
        }
        Some(0xFF) => return Err(self.parse_and_handle_server_error(payload)),
        Some(other) => {
          return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected auth packet {:#x}", other),
          ))
        }
        None => {
          return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "Unexpected EOF while parsing login response",
          ))
        }
      }
    }
  }

  /// Sends a text query and collects the full result set.
  pub async fn query(&mut self, query: impl AsRef<str>) -> io::Result<QueryResults> {
    self
      .write_command(Command::COM_QUERY, query.as_ref().as_bytes())
      .await?;
    self.read_results().await
  }

  pub async fn ping(&mut self) -> io::Result<()> {
    self.write_command(Command::COM_PING, &[]).await?;

    let payload = self.read_payload().await?;
    match payload.first() {
      Some(0x00) => self.parse_and_handle_server_ok(payload),
      _ => Err(io::Error::new(io::ErrorKind::InvalidData, "unexpected reply to ping")),
    }
  }

  async fn write_command(&mut self, cmd: Command, payload: &[u8]) -> io::Result<()> {
    self.sequence_id = 0;

    let mut b = BytesMut::with_capacity(1 + payload.len());
    b.put_u8(cmd as u8);
    b.put(payload);

    self.write_payload(b.into()).await
  }

  async fn write_payload(&mut self, payload: Bytes) -> io::Result<()> {
    for chunk in payload.chunks(MAX_PAYLOAD_LEN) {
      let mut b = BytesMut::with_capacity(4 + chunk.len());
      b.put_uint_le(chunk.len() as u64, 3);
      b.put_u8(self.sequence_id);
      b.put(chunk);

      self.sequence_id = self.sequence_id.wrapping_add(1);
      self.stream.write_all(&b[..]).await?;
      self.stream.flush().await?;
    }

    Ok(())
  }

  async fn read_generic_response(&mut self) -> io::Result<()> {
    let payload = self.read_payload().await?;

    match payload.first() {
      Some(0x00) => self.parse_and_handle_server_ok(payload),
      Some(0xFF) => Err(self.parse_and_handle_server_error(payload)),
      Some(_) => Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "Invalid data while parsing generic response",
      )),
      None => Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "Unexpected EOF while parsing generic response",
      )),
    }
  }

  async fn read_results(&mut self) -> io::Result<QueryResults> {
    // https://dev.mysql.com/doc/internals/en/com-query-response.html
    let mut payload = self.read_payload().await?;

    match payload.first() {
      Some(0x00) => {
        self.parse_and_handle_server_ok(payload)?;
        Ok(QueryResults::default())
      }
      Some(0xFF) => Err(self.parse_and_handle_server_error(payload)),
      Some(0xFB) => Err(io::Error::new(io::ErrorKind::Unsupported, "LOCAL INFILE is not supported")),
      Some(_) => {
        let column_count = payload
          .mysql_get_lenc_uint()?
          .try_into()
          .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "column count overflow"))?;
        let columns = self.read_columns(column_count).await?;
        let values = self.read_row_values(&columns).await?;
        Ok(QueryResults { columns, values })
      }
      None => Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "Unexpected EOF while parsing query result response",
      )),
    }
  }

  async fn read_columns(&mut self, column_count: usize) -> io::Result<Vec<Column>> {
    let mut columns = Vec::with_capacity(column_count);
    for _ in 0..column_count {
      let payload = self.read_payload().await?;
      match payload.first() {
        Some(0x00) => {
          self.parse_and_handle_server_ok(payload)?;
          break;
        }
        Some(_) => {
          let column = Column::parse(payload)?;
          columns.push(column);
        }
        None => {
          return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "Unexpected EOF while parsing query column response",
          ))
        }
      }
    }
    Ok(columns)
  }

  async fn read_row_values(&mut self, columns: &[Column]) -> io::Result<Vec<RowValue>> {
    let mut row_values = Vec::new();
    loop {
      let mut payload = self.read_payload().await?;

      match payload.first() {
        Some(0x00) | Some(0xFE) => {
          self.parse_and_handle_server_ok(payload)?;
          break;
        }
        Some(_) => {
          for _ in 0..columns.len() {
            match payload.first() {
              Some(0xFB) => {
                payload.advance(1);
                row_values.push(None);
              }
              Some(_) => {
                let value = payload.mysql_get_lenc_string()?;
                row_values.push(Some(value));
              }
              None => {
                return Err(io::Error::new(
                  io::ErrorKind::UnexpectedEof,
                  "Unexpected EOF while parsing query row value",
                ))
              }
            }
          }
        }
        None => {
          return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "Unexpected EOF while parsing query row",
          ))
        }
      }
    }
    Ok(row_values)
  }

  fn handle_server_ok(&mut self, ok: ServerOk) {
    self.affected_rows = ok.affected_rows;
    self.last_inserted_id = ok.last_inserted_id;
    self.status_flags = ok.status_flags.unwrap_or(StatusFlags::empty());
    self.warnings = ok.warnings.unwrap_or(0);
  }

  async fn read_payload(&mut self) -> io::Result<Bytes> {
    let (sequence_id, payload) = self.read_packet().await?;
    if self.sequence_id != sequence_id {
      return Err(io::Error::new(io::ErrorKind::InvalidData, "Packet is out of sync"));
    }
    self.sequence_id = self.sequence_id.wrapping_add(1);
    Ok(payload)
  }

  fn scramble_password(&self, auth_plugin: &str, nonce: &[u8]) -> io::Result<Vec<u8>> {
    let password = self.options.password.as_ref().map(String::as_bytes).unwrap_or_default();

    if password.is_empty() {
      return Err(io::Error::new(io::ErrorKind::InvalidInput, "password is required"));
    }

    match auth_plugin {
      MYSQL_NATIVE_PASSWORD_PLUGIN_NAME => Ok(scramble::scramble_native(nonce, password).to_vec()),
      CACHING_SHA2_PASSWORD_PLUGIN_NAME => Ok(scramble::scramble_sha256(nonce, password).to_vec()),
      custom_auth_plugin => Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} is not supported", custom_auth_plugin),
      )),
    }
  }

  async fn write_auth_switch_response(&mut self, auth_plugin: &str, nonce: &[u8]) -> io::Result<()> {
    let scrambled_data = self.scramble_password(auth_plugin, nonce)?;
    self.write_payload(scrambled_data.into()).await
  }

  async fn write_handshake_response(&mut self, auth_plugin: &str, nonce: &[u8]) -> io::Result<()> {
    let mut b = BytesMut::new();
    b.put_u32_le(self.capabilities.bits());
    b.put_u32_le(self.max_packet_size);
    b.put_u8(self.options.charset as u8);
    b.put(&[0; 23][..]);
    b.put(self.options.user.as_bytes());
    b.put_u8(0);

    let scrambled_data = self.scramble_password(auth_plugin, nonce)?;

    b.mysql_put_lenc_uint(scrambled_data.len() as u64);
    b.put(scrambled_data.as_slice());

    if let Some(db_name) = self.options.database.as_ref() {
      b.put(db_name.as_bytes());
      b.put_u8(0);
    }

    b.put(auth_plugin.as_bytes());
    b.put_u8(0);

    self.write_payload(b.into()).await
  }

  async fn read_packet(&mut self) -> io::Result<(u8, Bytes)> {
    let mut header = vec![0; 4];
    self.stream.read_exact(&mut header).await?;

    let mut header = header.as_slice();

    let payload_len = header.get_uint_le(3) as usize;
    let sequence_id = header.get_u8();

    let mut payload = vec![0; payload_len];
    self.stream.read_exact(&mut payload).await?;

    Ok((sequence_id, payload.into()))
  }

  /// Reads the primary's current binlog file and position.
  pub async fn binlog_cursor(&mut self) -> io::Result<BinlogCursor> {
    let results = self.query("SHOW MASTER STATUS").await?;
    let row = results
      .rows()
      .and_then(|mut rows| rows.next())
      .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "SHOW MASTER STATUS returned no rows"))?;

    let log_file = row
      .first()
      .and_then(|v| v.clone())
      .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing binlog file name"))?;
    let log_position = row
      .get(1)
      .and_then(|v| v.as_deref())
      .and_then(|v| v.parse().ok())
      .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing binlog position"))?;

    Ok(BinlogCursor { log_file, log_position })
  }

  /// Registers as a replica and starts streaming binlog events from the given
  /// position. Consumes the connection: the stream is one-way from here on.
  pub async fn binlog_stream(
    mut self,
    server_id: u32,
    binlog_cursor: impl Into<BinlogCursor>,
  ) -> io::Result<BinlogStream> {
    let binlog_cursor = binlog_cursor.into();
    self.source_configuration_check().await?;
    self.register_as_replica(server_id).await?;
    self.dump_binlog(server_id, &binlog_cursor).await?;
    Ok(BinlogStream { conn: self })
  }

  fn parse_and_handle_server_ok(&mut self, payload: Bytes) -> io::Result<()> {
    ServerOk::parse(payload, self.capabilities).map(|ok| self.handle_server_ok(ok))
  }

  fn parse_and_handle_server_error(&mut self, payload: Bytes) -> io::Error {
    match ServerError::parse(payload, self.capabilities) {
      Ok(err) => io::Error::new(
        io::ErrorKind::Other,
        format!("Server error {}: {}", err.error_code, err.error_message),
      ),
      Err(err) => err,
    }
  }

  async fn source_configuration_check(&mut self) -> io::Result<()> {
    // Event checksums would trail every event payload; disabling them on this
    // session keeps the parser out of the CRC business.
    if self.query("SET @source_binlog_checksum = 'NONE'").await.is_err() {
      // Pre-8.0.26 name.
      self.query("SET @master_binlog_checksum = 'NONE'").await?;
    }

    let format = self.query("SELECT @@GLOBAL.binlog_format").await?;
    if format.scalar() != Some("ROW") {
      return Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("binlog_format must be ROW, found {:?}", format.scalar()),
      ));
    }

    // FULL metadata carries column names and the primary key in TABLE_MAP events.
    let metadata = self.query("SELECT @@GLOBAL.binlog_row_metadata").await?;
    if metadata.scalar() != Some("FULL") {
      return Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("binlog_row_metadata must be FULL, found {:?}", metadata.scalar()),
      ));
    }

    Ok(())
  }

  async fn register_as_replica(&mut self, server_id: u32) -> io::Result<()> {
    // https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_register_slave.html
    // The reported hostname/port are advisory (they show up in SHOW REPLICAS).
    let hostname = &b"localhost"[..];
    let port = 3306;
    let user = self.options.user.as_bytes();
    let password = self.options.password.as_ref().map(String::as_bytes).unwrap_or(b"");

    let payload_len = 4 + 1 + hostname.len() + 1 + user.len() + 1 + password.len() + 2 + 4 + 4;

    let mut b = BytesMut::with_capacity(payload_len);

    b.put_u32_le(server_id);
    b.put_u8(hostname.len() as u8);
    b.put(hostname);
    b.put_u8(user.len() as u8);
    b.put(user);
    b.put_u8(password.len() as u8);
    b.put(password);
    b.put_u16_le(port);
    b.put_u32(0); // replication rank, ignored
    b.put_u32(0); // source id, usually 0

    self.write_command(Command::COM_REGISTER_SLAVE, &b[..]).await?;
    self.read_generic_response().await
  }

  async fn dump_binlog(&mut self, server_id: u32, binlog_cursor: &BinlogCursor) -> io::Result<()> {
    let file = binlog_cursor.log_file.as_bytes();

    let mut b = BytesMut::with_capacity(4 + 2 + 4 + file.len());
    b.put_u32_le(binlog_cursor.log_position);
    b.put_u16_le(BinlogDumpFlags::empty().bits());
    b.put_u32_le(server_id);
    b.put(file);

    self.write_command(Command::COM_BINLOG_DUMP, &b[..]).await
  }
}

// Defines the default capabilities that our client supports.
fn default_client_capabilities(opts: &ConnectionOptions) -> CapabilityFlags {
  let mut capabilities = CapabilityFlags::CLIENT_PROTOCOL_41
    | CapabilityFlags::CLIENT_LONG_PASSWORD
    | CapabilityFlags::CLIENT_PLUGIN_AUTH
    | CapabilityFlags::CLIENT_LONG_FLAG
    | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
    | CapabilityFlags::CLIENT_RESERVED2
    | CapabilityFlags::CLIENT_DEPRECATE_EOF;

  if opts.database.as_ref().filter(|v| !v.is_empty()).is_some() {
    capabilities.insert(CapabilityFlags::CLIENT_CONNECT_WITH_DB);
  }

  capabilities
}

#[derive(Debug)]
struct Handshake {
  capabilities: CapabilityFlags,
  protocol_version: u8,
  scramble_1: Bytes,
  scramble_2: Option<Bytes>,
  auth_plugin: String,
  status_flags: StatusFlags,
}

impl Handshake {
  fn parse(mut b: Bytes) -> io::Result<Self> {
    // https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake.html
    let protocol_version = b.get_u8();
    let _server_version = b.mysql_get_null_terminated_string()?;
    let _connection_id = b.get_u32_le();
    let scramble_1 = b.split_to(8);
    b.advance(1);
    let capabilities_1 = b.get_u16_le();
    let _character_set = b.get_u8();
    let status_flags = StatusFlags::from_bits_truncate(b.get_u16_le());
    let capabilities_2 = b.get_u16_le();

    let capabilities = CapabilityFlags::from_bits_truncate(capabilities_1 as u32 | ((capabilities_2 as u32) << 16));

    if !capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
      return Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "CLIENT_PLUGIN_AUTH flag is not set",
      ));
    }

    let scramble_len: i16 = b.get_u8().into();
    b.advance(10);

    let scramble_2_len = max(12, scramble_len - 9) as usize;
    let scramble_2 = Some(b.split_to(scramble_2_len));
    b.advance(1);

    let auth_plugin = b.mysql_get_null_terminated_string()?;

    Ok(Self {
      capabilities,
      protocol_version,
      scramble_1,
      scramble_2,
      auth_plugin,
      status_flags,
    })
  }

  fn nonce(&self) -> Bytes {
    let mut out = BytesMut::new();
    out.extend_from_slice(self.scramble_1.chunk());

    if let Some(scramble_2) = self.scramble_2.as_ref().map(Bytes::chunk) {
      out.extend_from_slice(scramble_2);
    }

    out.freeze()
  }
}

// https://dev.mysql.com/doc/internals/en/packet-OK_Packet.html
#[derive(Debug)]
struct ServerOk {
  affected_rows: u64,
  last_inserted_id: u64,
  status_flags: Option<StatusFlags>,
  warnings: Option<u16>,
}

impl ServerOk {
  fn parse(mut b: Bytes, capability_flags: CapabilityFlags) -> io::Result<Self> {
    let _header = b.get_u8();
    let affected_rows = b.mysql_get_lenc_uint()?;
    let last_inserted_id = b.mysql_get_lenc_uint()?;

    let mut status_flags = None;
    let mut warnings = None;
    if capability_flags.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
      status_flags = Some(StatusFlags::from_bits_truncate(b.get_u16_le()));
      warnings = Some(b.get_u16_le());
    } else if capability_flags.contains(CapabilityFlags::CLIENT_TRANSACTIONS) {
      status_flags = Some(StatusFlags::from_bits_truncate(b.get_u16_le()));
    }

    Ok(Self {
      affected_rows,
      last_inserted_id,
      status_flags,
      warnings,
    })
  }
}

// https://dev.mysql.com/doc/internals/en/packet-ERR_Packet.html
#[derive(Debug)]
pub struct ServerError {
  error_code: u16,
  error_message: String,
}

impl ServerError {
  fn parse(mut b: Bytes, capability_flags: CapabilityFlags) -> io::Result<Self> {
    let _header = b.get_u8();
    let error_code = b.get_u16_le();

    if capability_flags.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
      let _state_marker = b.mysql_get_fixed_length_string(1)?;
      let _state = b.mysql_get_fixed_length_string(5)?;
    }

    let error_message = b.mysql_get_eof_string()?;
    Ok(Self {
      error_code,
      error_message,
    })
  }
}

#[derive(Debug, PartialEq, PartialOrd, Clone)]
pub struct BinlogCursor {
  pub log_file: String,
  pub log_position: u32,
}

impl fmt::Display for BinlogCursor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.log_file, self.log_position)
  }
}

/// One-way stream of binlog events, produced by [`Connection::binlog_stream`].
#[derive(Debug)]
pub struct BinlogStream {
  conn: Connection,
}

impl BinlogStream {
  pub async fn close(mut self) -> io::Result<()> {
    // Force shutdown the underlying stream since it is no longer in duplex mode.
    self.conn.stream.shutdown().await
  }

  /// Receives the next event. `None` once the server closes the stream.
  pub async fn recv(&mut self) -> Option<io::Result<BinlogEventPacket>> {
    let payload = match self.conn.read_payload().await {
      Ok(payload) => payload,
      Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return None,
      Err(err) => return Some(Err(err)),
    };

    match payload.first() {
      Some(0x00) => Some(BinlogEventPacket::parse(payload)),
      // EOF packet: the server has no more events to send (non-blocking dumps).
      Some(0xFE) if payload.len() < 9 => None,
      Some(0xFF) => Some(Err(self.conn.parse_and_handle_server_error(payload))),
      Some(_) => Some(Err(io::Error::new(
        io::ErrorKind::InvalidData,
        "Invalid data while parsing binlog event response",
      ))),
      None => Some(Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "Unexpected EOF while parsing binlog event response",
      ))),
    }
  }
}
