//! Plain-TCP line transport.
//!
//! One connection is split into a buffered reader owned by the dispatcher
//! task and a writer shared by the command lane and timers.

use crate::error::ConnectError;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Upper bound on one protocol line. Anything longer is treated as a
/// connection-level failure.
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// Dial timeout in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Resolve a hostname, preferring IPv6 records and falling back to IPv4.
pub async fn resolve(host: &str, port: u16) -> Result<IpAddr, ConnectError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| ConnectError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv6())
        .or_else(|| addrs.first())
        .map(|addr| addr.ip())
        .ok_or_else(|| ConnectError::NoAddress(host.to_string()))
}

/// Dial with the connect timeout and split into reader/writer halves.
pub async fn dial(addr: SocketAddr) -> Result<(LineReader, LineWriter, SocketAddr), ConnectError> {
    let stream = tokio::time::timeout(
        Duration::from_secs(CONNECT_TIMEOUT_SECS),
        TcpStream::connect(addr),
    )
    .await
    .map_err(|_| ConnectError::Timeout(CONNECT_TIMEOUT_SECS))?
    .map_err(ConnectError::Dial)?;
    let peer = stream.peer_addr().map_err(ConnectError::Dial)?;
    let (read, write) = stream.into_split();
    Ok((
        LineReader {
            inner: BufReader::new(read),
            buf: Vec::with_capacity(512),
        },
        LineWriter { inner: write },
        peer,
    ))
}

/// Reading half of a session connection.
pub struct LineReader {
    inner: BufReader<OwnedReadHalf>,
    buf: Vec<u8>,
}

impl LineReader {
    /// Read one line. `Ok(None)` signals a clean EOF.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        self.buf.clear();
        let n = (&mut self.inner)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if n == MAX_LINE_LEN && self.buf.last() != Some(&b'\n') {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "line exceeds maximum length",
            ));
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

/// Writing half of a session connection.
pub struct LineWriter {
    inner: OwnedWriteHalf,
}

impl LineWriter {
    /// Write one line, appending the CRLF terminator.
    pub async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(b"\r\n").await?;
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn write_appends_crlf_and_read_strips_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 64];
            let n = sock.read(&mut buf).await.expect("read");
            assert_eq!(&buf[..n], b"ping id=5\r\n");
            sock.write_all(b"pong\r\n").await.expect("write");
        });

        let (mut reader, mut writer, peer) = dial(addr).await.expect("dial");
        assert_eq!(peer.port(), addr.port());
        writer.write_line("ping id=5").await.expect("write_line");
        let line = reader.read_line().await.expect("read_line").expect("line");
        assert_eq!(line, "pong\r\n");
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn eof_reads_as_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.expect("accept");
            drop(sock);
        });
        let (mut reader, _writer, _) = dial(addr).await.expect("dial");
        assert!(reader.read_line().await.expect("read").is_none());
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn resolve_localhost_finds_an_address() {
        let ip = resolve("localhost", 10333).await.expect("resolve");
        assert!(ip.is_loopback());
    }
}
