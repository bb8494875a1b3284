use std::future::Future;
use std::net::SocketAddr;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};

use crate::framing::{read_frame, write_frame, FramingError};

/// One persistent, duplex, identity-preserving request/reply connection.
///
/// A bare TCP connection already preserves "identity" in the ROUTER/DEALER
/// sense used by `spec.md` §4.A: every request on this connection is known
/// to come from the same logical client without a separate routing frame.
pub struct RrConnection {
    stream: TcpStream,
}

impl RrConnection {
    pub async fn connect(addr: &str) -> Result<Self, FramingError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        Ok(RrConnection { stream })
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        stream.set_nodelay(true).ok();
        RrConnection { stream }
    }

    /// Sends `request` and waits for exactly one reply, matching the
    /// blocking-receive-with-deadline contract; callers wrap this in
    /// `tokio::time::timeout` for the deadline in `spec.md` §5.
    pub async fn call<Req, Rep>(&mut self, request: &Req) -> Result<Rep, FramingError>
    where
        Req: Serialize,
        Rep: DeserializeOwned,
    {
        write_frame(&mut self.stream, request).await?;
        read_frame(&mut self.stream).await
    }

    pub async fn send<Req: Serialize>(&mut self, request: &Req) -> Result<(), FramingError> {
        write_frame(&mut self.stream, request).await
    }

    pub async fn recv<Rep: DeserializeOwned>(&mut self) -> Result<Rep, FramingError> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

/// Binds an RR endpoint and serves `handler` against every connection, one
/// request at a time per connection, until the listener is dropped.
///
/// Each accepted connection runs on its own task so that slow clients never
/// block others — the server-side serialization point (spec.md §4.C) lives
/// one layer up, inside the handler's shared state, not in this loop.
pub async fn serve_rr<Req, Rep, F, Fut>(listener: TcpListener, handler: F)
where
    Req: DeserializeOwned + Send + 'static,
    Rep: Serialize + Send + Sync + 'static,
    F: Fn(Req) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Rep> + Send + 'static,
{
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "rr accept failed");
                continue;
            }
        };
        let handler = handler.clone();
        tokio::spawn(async move {
            let mut conn = RrConnection::from_stream(stream);
            loop {
                let request: Req = match conn.recv().await {
                    Ok(r) => r,
                    Err(FramingError::Closed) => break,
                    Err(e) => {
                        tracing::debug!(%peer, error = %e, "rr connection error");
                        break;
                    }
                };
                let reply = handler(request).await;
                if let Err(e) = conn.send(&reply).await {
                    tracing::debug!(%peer, error = %e, "rr reply failed");
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Echo(i32);

    #[tokio::test]
    async fn client_call_round_trips_through_a_bound_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_rr::<Echo, Echo, _, _>(listener, |req| async move {
            Echo(req.0 * 2)
        }));

        let mut client = RrConnection::connect(&addr.to_string()).await.unwrap();
        let reply: Echo = client.call(&Echo(21)).await.unwrap();
        assert_eq!(reply.0, 42);

        // a second call on the same connection is served too
        let reply2: Echo = client.call(&Echo(10)).await.unwrap();
        assert_eq!(reply2.0, 20);
    }
}
