use std::{io, slice::ChunksExact};

use bytes::Bytes;

use super::buf_ext::BufExt;

/// Owned results for 0..N rows of a text-protocol query.
#[derive(Debug, Default)]
pub struct QueryResults {
  pub columns: Vec<Column>,
  pub values: Vec<RowValue>,
}

impl QueryResults {
  pub fn rows(&self) -> Option<ChunksExact<'_, RowValue>> {
    if !self.columns.is_empty() {
      Some(self.values.chunks_exact(self.columns.len()))
    } else {
      None
    }
  }

  /// Single scalar of a single-row result, if there is one.
  pub fn scalar(&self) -> Option<&str> {
    self.values.first().and_then(|v| v.as_deref())
  }
}

// Text protocol values are strings (or NULL).
pub type RowValue = Option<String>;

// https://dev.mysql.com/doc/internals/en/com-query-response.html#packet-Protocol::ColumnDefinition41
#[derive(Debug)]
pub struct Column {
  name: String,
}

impl Column {
  pub(crate) fn parse(mut b: Bytes) -> io::Result<Self> {
    let catalog = b.mysql_get_lenc_string()?;
    if catalog != "def" {
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unexpected column catalog {:?}", catalog),
      ));
    }
    let _schema = b.mysql_get_lenc_string()?;
    let _table = b.mysql_get_lenc_string()?;
    let _org_table = b.mysql_get_lenc_string()?;
    let name = b.mysql_get_lenc_string()?;
    // The rest of the definition (type, flags, character set) is unused here:
    // row decoding works off TABLE_MAP metadata, not column definitions.

    Ok(Self { name })
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}
