//! Scripted mock TeamTalk server.
//!
//! Tests accept connections from the session under test, read the frames
//! it sends, and reply with scripted protocol lines.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use ttbot::proto::Frame;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MockServer {
    listener: TcpListener,
}

impl MockServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        Self { listener }
    }

    pub fn addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("local addr")
    }

    /// Accept the next session connection.
    pub async fn accept(&self) -> Peer {
        let (stream, _) = timeout(IO_TIMEOUT, self.listener.accept())
            .await
            .expect("timed out waiting for connection")
            .expect("accept");
        Peer::new(stream)
    }
}

pub struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Send one scripted line, CRLF appended.
    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("peer write");
        self.writer.flush().await.expect("peer flush");
    }

    /// Read the next line the session sent, or `None` on EOF.
    pub async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = timeout(IO_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for client line")
            .expect("peer read");
        if n == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Read the next line and require a specific command, skipping
    /// keepalive pings.
    pub async fn expect_cmd(&mut self, cmd: &str) -> Frame {
        loop {
            let line = self.recv().await.expect("connection closed early");
            let frame = Frame::parse(&line).expect("parse client frame");
            if frame.cmd == "ping" && cmd != "ping" {
                self.send(&format!("begin id={}", frame.params.int_or_zero("id")))
                    .await;
                self.send(&format!("end id={}", frame.params.int_or_zero("id")))
                    .await;
                continue;
            }
            assert_eq!(frame.cmd, cmd, "unexpected client command: {line}");
            return frame;
        }
    }

    /// True when nothing arrives within `dur`.
    pub async fn silent_for(&mut self, dur: Duration) -> bool {
        let mut line = String::new();
        match timeout(dur, self.reader.read_line(&mut line)).await {
            Err(_) => true,
            Ok(Ok(0)) => true,
            Ok(_) => false,
        }
    }

    /// Acknowledge a bracketed command.
    pub async fn ack(&mut self, id: i64) {
        self.send(&format!("begin id={id}")).await;
        self.send(&format!("end id={id}")).await;
    }

    /// Standard greeting → login → accepted exchange. Returns the login
    /// frame for assertions.
    pub async fn handshake(&mut self, accepted_extra: &str) -> Frame {
        self.send(
            "teamtalk servername=\"x\" maxusers=50 protocol=\"5.6\" userid=3 usertimeout=60",
        )
        .await;
        let login = self.expect_cmd("login").await;
        self.send(&format!(
            "accepted userid=3 nickname=\"bot\" username=\"admin\" {accepted_extra}"
        ))
        .await;
        self.send("begin id=1").await;
        self.send("end id=1").await;
        login
    }
}
