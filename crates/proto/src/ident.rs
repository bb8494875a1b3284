use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Minimum length accepted for a [`ClientIdentity`] supplied by a caller.
///
/// Matches the original 5-byte ZMQ identity minimum; identities this crate
/// generates itself are longer (see [`ClientIdentity::random`]).
pub const MIN_IDENTITY_LEN: usize = 5;

/// Opaque per-client tag used for RR routing and FAN echo suppression.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIdentity(Vec<u8>);

impl ClientIdentity {
    /// Generates a fresh 16-byte random identity.
    pub fn random() -> Self {
        let mut bytes = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        ClientIdentity(bytes)
    }

    /// Wraps caller-supplied bytes, rejecting anything shorter than
    /// [`MIN_IDENTITY_LEN`].
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, &'static str> {
        if bytes.len() < MIN_IDENTITY_LEN {
            return Err("client identity must be at least 5 bytes");
        }
        Ok(ClientIdentity(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientIdentity({})", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_identities_are_distinct_and_long_enough() {
        let a = ClientIdentity::random();
        let b = ClientIdentity::random();
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert!(a.as_bytes().len() >= MIN_IDENTITY_LEN);
    }

    #[test]
    fn short_identity_is_rejected() {
        assert!(ClientIdentity::from_bytes(vec![1, 2, 3]).is_err());
        assert!(ClientIdentity::from_bytes(vec![1, 2, 3, 4, 5]).is_ok());
    }
}
