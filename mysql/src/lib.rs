pub mod binlog;
mod buf_ext;
mod conn;
mod constants;
mod query;
mod scramble;
mod stream;

pub use conn::{BinlogCursor, BinlogStream, Connection, ConnectionOptions};
pub use constants::{BinlogEventType, CharacterSet, ColumnType};
pub use query::{Column, QueryResults, RowValue};
