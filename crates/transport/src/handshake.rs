use proto::{compute_token, verify_token, ErrorMessage, Hello, HelloAck};

use crate::framing::FramingError;
use crate::rr::RrConnection;

/// Client half of the per-connection auth handshake: send the digest of the
/// shared secret and fail fast if the server rejects it.
pub async fn client_handshake(conn: &mut RrConnection, secret: &str) -> Result<(), FramingError> {
    conn.send(&Hello { token: compute_token(secret) }).await?;
    match conn.recv::<HelloAck>().await? {
        HelloAck::Accepted => Ok(()),
        HelloAck::Rejected(err) => Err(FramingError::Rejected(format!("{}: {}", err.code, err.message))),
    }
}

/// Server half: read one `Hello` frame and answer with acceptance or
/// rejection, before any further frame on this connection is trusted.
/// Grounded on the teacher's `ws_forwarder.rs` handshake-then-reject flow.
pub async fn server_handshake(conn: &mut RrConnection, secret: &str) -> Result<bool, FramingError> {
    let hello: Hello = conn.recv().await?;
    if verify_token(secret, &hello.token) {
        conn.send(&HelloAck::Accepted).await?;
        Ok(true)
    } else {
        let err = ErrorMessage {
            code: proto::error_codes::INVALID_TOKEN.to_owned(),
            message: "invalid or missing signing token".to_owned(),
            retryable: false,
        };
        conn.send(&HelloAck::Rejected(err)).await?;
        Ok(false)
    }
}
