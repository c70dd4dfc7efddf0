//! Loopback helpers shared by the unit tests.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};

use crate::connection::{Connection, ConnectionId};

pub(crate) const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// The remote end of a test connection, playing the part of a chat client.
pub(crate) struct Peer {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    pub(crate) async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("peer write");
    }

    /// Next line from the server, `None` on end of stream.
    pub(crate) async fn recv(&mut self) -> Option<String> {
        let mut line = String::new();
        let bytes = timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .expect("peer read");
        (bytes > 0).then(|| line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Asserts nothing arrives for a short while.
    pub(crate) async fn expect_silence(&mut self) {
        let mut line = String::new();
        let outcome = timeout(
            Duration::from_millis(150),
            self.reader.read_line(&mut line),
        )
        .await;
        assert!(outcome.is_err(), "unexpected line: {line:?}");
    }

    pub(crate) fn into_parts(self) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        (self.reader, self.writer)
    }
}

/// Accepted server-side stream plus the client that dialed it.
pub(crate) async fn socket_pair() -> (TcpStream, SocketAddr, Peer) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let client = TcpStream::connect(addr).await.expect("connect");
    let (server, peer_addr) = listener.accept().await.expect("accept");
    let (reader, writer) = client.into_split();
    let peer = Peer {
        reader: BufReader::new(reader),
        writer,
    };
    (server, peer_addr, peer)
}

pub(crate) async fn connection_pair(id: ConnectionId) -> (Arc<Connection>, Peer) {
    let (stream, peer_addr, peer) = socket_pair().await;
    (Arc::new(Connection::new(id, stream, peer_addr)), peer)
}

pub(crate) async fn named_connection(id: ConnectionId, name: &str) -> (Arc<Connection>, Peer) {
    let (connection, peer) = connection_pair(id).await;
    connection.set_name(name);
    (connection, peer)
}
