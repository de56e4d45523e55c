use std::{
  io,
  net::SocketAddr,
  pin::Pin,
  task::{Context, Poll},
};

use tokio::{
  io::{AsyncRead, AsyncWrite, BufStream, ReadBuf},
  net::TcpStream,
};

/// Buffered TCP stream to the server.
#[derive(Debug)]
pub struct Stream {
  inner: BufStream<TcpStream>,
}

impl Stream {
  pub async fn connect_tcp(addrs: impl Into<Vec<SocketAddr>>) -> io::Result<Self> {
    let addrs = addrs.into();
    let inner = TcpStream::connect(addrs.as_slice()).await.map(BufStream::new)?;
    Ok(Self { inner })
  }
}

impl AsyncRead for Stream {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.get_mut().inner).poll_read(cx, buf)
  }
}

impl AsyncWrite for Stream {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
    Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.get_mut().inner).poll_flush(cx)
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
  }
}
