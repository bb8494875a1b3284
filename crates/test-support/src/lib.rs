//! Mock RR peers for exercising `services/server`'s wire surface without a
//! full `Server` running underneath: a `MockAuthServer` that performs the
//! real handshake and answers with whatever a test supplies, and a
//! `RawPeer` for driving a listener with hand-built frames. Grounded in
//! shape on `rt-test-utils`'s `MockServer`/`MockClient` pair, rewritten
//! against `transport`'s length-prefixed framing instead of
//! `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use transport::{client_handshake, read_frame, server_handshake, FramingError, RrConnection};

/// A background RR server that completes the token handshake on every
/// connection, then answers each request by running a test-supplied
/// closure over the raw JSON value — no concrete request/reply type is
/// baked in, so one mock works for state, watcher and result traffic
/// alike.
pub struct MockAuthServer {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl MockAuthServer {
    /// Binds a random port and starts serving in the background.
    pub async fn start<F>(secret: impl Into<String>, handler: F) -> std::io::Result<Self>
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let secret = secret.into();
        let handler = Arc::new(handler);
        let task = tokio::spawn(async move {
            loop {
                let (stream, _peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                let secret = secret.clone();
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let mut conn = RrConnection::from_stream(stream);
                    if !matches!(server_handshake(&mut conn, &secret).await, Ok(true)) {
                        return;
                    }
                    loop {
                        let request: Value = match conn.recv().await {
                            Ok(r) => r,
                            Err(_) => break,
                        };
                        let reply = handler(request);
                        if conn.send(&reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        Ok(MockAuthServer { addr, _task: task })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

/// A typed client over the same handshake every real client uses.
pub struct MockClient {
    conn: RrConnection,
}

impl MockClient {
    pub async fn connect_authenticated(addr: SocketAddr, secret: &str) -> Result<Self, FramingError> {
        let mut conn = RrConnection::connect(&addr.to_string()).await?;
        client_handshake(&mut conn, secret).await?;
        Ok(MockClient { conn })
    }

    pub async fn call<Req: Serialize, Rep: DeserializeOwned>(&mut self, request: &Req) -> Result<Rep, FramingError> {
        self.conn.call(request).await
    }
}

/// A bare TCP peer for asserting a listener's framing layer rejects
/// malformed input before any handshake or JSON decoding gets a chance to
/// — a length-prefixed junk body, a declared length that exceeds
/// `transport::MAX_FRAME_LEN`, or a connection closed mid-frame.
pub struct RawPeer {
    stream: TcpStream,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        Ok(RawPeer { stream })
    }

    /// Writes a length prefix and body supplied verbatim, bypassing JSON
    /// serialization entirely.
    pub async fn send_raw_frame(&mut self, len: u32, body: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(body).await?;
        self.stream.flush().await
    }

    pub async fn recv_frame<Rep: DeserializeOwned>(&mut self) -> Result<Rep, FramingError> {
        read_frame(&mut self.stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn authenticated_round_trip_reaches_the_handler() {
        let server = MockAuthServer::start("sekret", |req| json!({"echo": req})).await.unwrap();
        let mut client = MockClient::connect_authenticated(server.local_addr(), "sekret").await.unwrap();
        let reply: Value = client.call(&json!({"hello": "world"})).await.unwrap();
        assert_eq!(reply, json!({"echo": {"hello": "world"}}));
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected_before_any_request_is_served() {
        let server = MockAuthServer::start("sekret", |req| req).await.unwrap();
        let result = MockClient::connect_authenticated(server.local_addr(), "wrong").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let server = MockAuthServer::start("sekret", |req| req).await.unwrap();
        let mut peer = RawPeer::connect(server.local_addr()).await.unwrap();
        peer.send_raw_frame(transport::MAX_FRAME_LEN + 1, b"").await.unwrap();
        let result: Result<Value, FramingError> = peer.recv_frame().await;
        assert!(result.is_err());
    }
}
