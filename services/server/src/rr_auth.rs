use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpListener;
use transport::{server_handshake, FramingError, RrConnection};

/// [`transport::serve_rr`], but every connection completes the `Hello`/
/// `HelloAck` handshake against `secret` before its first request is
/// trusted — the per-connection gate SPEC_FULL §4.B requires on every RR
/// endpoint, not just the bootstrap one.
pub async fn serve_authenticated_rr<Req, Rep, F, Fut>(listener: TcpListener, secret: String, handler: F)
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
        let secret = secret.clone();
        tokio::spawn(async move {
            let mut conn = RrConnection::from_stream(stream);
            match server_handshake(&mut conn, &secret).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(%peer, "rejected connection with an invalid signing token");
                    return;
                }
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "handshake failed");
                    return;
                }
            }
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
