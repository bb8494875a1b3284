use sha2::{Digest, Sha256};

/// Turns the shared signing key into the token carried on `Hello` frames.
///
/// Neither side ever puts the configured secret itself on the wire — only
/// its digest, so a packet capture doesn't leak the secret.
#[must_use]
pub fn compute_token(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(digest)
}

/// Constant-time-ish comparison between a received token and the one
/// derived from the locally configured secret.
#[must_use]
pub fn verify_token(secret: &str, received: &str) -> bool {
    let expected = compute_token(secret);
    expected.len() == received.len()
        && expected.bytes().zip(received.bytes()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}
