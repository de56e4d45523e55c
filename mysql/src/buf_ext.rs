use std::io;

use bytes::{Buf, BufMut};

fn eof(what: &str) -> io::Error {
  io::Error::new(io::ErrorKind::UnexpectedEof, format!("buffer exhausted reading {}", what))
}

fn invalid_utf8(err: std::string::FromUtf8Error) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, err)
}

pub trait BufExt: Buf {
  fn mysql_get_eof_string(&mut self) -> io::Result<String> {
    self.mysql_get_fixed_length_string(self.remaining())
  }

  // Returns a utf-8 encoded string terminated by \0.
  fn mysql_get_null_terminated_string(&mut self) -> io::Result<String> {
    match self.chunk().iter().position(|x| *x == 0x00) {
      Some(len) => {
        let mut buffer = vec![0; len];
        self.copy_to_slice(buffer.as_mut_slice());
        self.advance(1);
        String::from_utf8(buffer).map_err(invalid_utf8)
      }
      None => Err(eof("null terminated string")),
    }
  }

  // Returns a utf-8 encoded string of length N, where N are in bytes.
  fn mysql_get_fixed_length_string(&mut self, len: usize) -> io::Result<String> {
    if self.remaining() < len {
      return Err(eof("fixed length string"));
    }
    let mut bytes = vec![0; len];
    self.copy_to_slice(bytes.as_mut_slice());
    String::from_utf8(bytes).map_err(invalid_utf8)
  }

  // Returns a utf-8 encoded string of variable length. See `BufExt::mysql_get_lenc_uint`.
  fn mysql_get_lenc_string(&mut self) -> io::Result<String> {
    let len = self.mysql_get_lenc_uint()?;
    let len = len.try_into().map_err(|_| eof("lenc string"))?;
    self.mysql_get_fixed_length_string(len)
  }

  fn mysql_get_lenc_uint(&mut self) -> io::Result<u64> {
    if !self.has_remaining() {
      return Err(eof("lenc uint"));
    }
    let width = match self.get_u8() {
      0xfc => 2,
      0xfd => 3,
      0xfe => 8,
      0xff => {
        return Err(io::Error::new(
          io::ErrorKind::InvalidData,
          "0xFF is not a valid length-encoded integer marker",
        ))
      }
      x => return Ok(x.into()),
    };

    if self.remaining() < width {
      return Err(eof("lenc uint"));
    }
    Ok(self.get_uint_le(width))
  }
}

pub trait BufMutExt: BufMut {
  fn mysql_put_lenc_uint(&mut self, v: u64) {
    if v < 251 {
      self.put_u8(v as u8);
      return;
    }

    if v < 2_u64.pow(16) {
      self.put_u8(0xFC);
      self.put_uint_le(v, 2);
      return;
    }

    if v < 2_u64.pow(24) {
      self.put_u8(0xFD);
      self.put_uint_le(v, 3);
      return;
    }

    self.put_u8(0xFE);
    self.put_uint_le(v, 8);
  }
}

// Blanket implementations
impl<T> BufExt for T where T: Buf {}
impl<T> BufMutExt for T where T: BufMut {}

#[cfg(test)]
mod test {
  use super::{BufExt, BufMutExt};
  use bytes::BytesMut;

  #[test]
  fn lenc_uint_round_trips_across_widths() {
    for v in [0_u64, 250, 251, 65_535, 65_536, 16_777_215, 16_777_216, u64::MAX] {
      let mut b = BytesMut::new();
      b.mysql_put_lenc_uint(v);
      assert_eq!(v, b.freeze().mysql_get_lenc_uint().unwrap());
    }
  }

  #[test]
  fn lenc_uint_rejects_invalid_marker() {
    let mut b = &b"\xff"[..];
    assert!(b.mysql_get_lenc_uint().is_err());
  }

  #[test]
  fn null_terminated_string_requires_terminator() {
    let mut b = &b"mysql_native_password\x00rest"[..];
    assert_eq!("mysql_native_password", b.mysql_get_null_terminated_string().unwrap());
    assert_eq!(b"rest", b);

    let mut b = &b"unterminated"[..];
    assert!(b.mysql_get_null_terminated_string().is_err());
  }

  #[test]
  fn fixed_length_string_checks_remaining() {
    let mut b = &b"abc"[..];
    assert!(b.mysql_get_fixed_length_string(4).is_err());
  }
}
