use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Identifier for a submitted task.
///
/// Mirrors `zproc.consts`: a 5-byte nonce, optionally followed by the
/// `(chunk_length, total_length, num_chunks)` triple (each a big-endian
/// `u32`) for chunked map tasks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskId {
    Single { nonce: [u8; 5] },
    Chunked {
        nonce: [u8; 5],
        chunk_length: u32,
        total_length: u32,
        num_chunks: u32,
    },
}

impl TaskId {
    #[must_use]
    pub fn new_single() -> Self {
        TaskId::Single { nonce: random_nonce() }
    }

    #[must_use]
    pub fn new_chunked(total_length: u32, num_chunks: u32) -> Self {
        let chunk_length = total_length.div_ceil(num_chunks);
        TaskId::Chunked {
            nonce: random_nonce(),
            chunk_length,
            total_length,
            num_chunks,
        }
    }

    #[must_use]
    pub fn num_chunks(&self) -> u32 {
        match self {
            TaskId::Single { .. } => 1,
            TaskId::Chunked { num_chunks, .. } => *num_chunks,
        }
    }

    /// Wire layout: `nonce(5B) ++ chunk_length(4B) ++ total_length(4B) ++ num_chunks(4B)`,
    /// all-zero info fields for a single-call task.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 17] {
        let mut out = [0u8; 17];
        match self {
            TaskId::Single { nonce } => {
                out[..5].copy_from_slice(nonce);
            }
            TaskId::Chunked { nonce, chunk_length, total_length, num_chunks } => {
                out[..5].copy_from_slice(nonce);
                out[5..9].copy_from_slice(&chunk_length.to_be_bytes());
                out[9..13].copy_from_slice(&total_length.to_be_bytes());
                out[13..17].copy_from_slice(&num_chunks.to_be_bytes());
            }
        }
        out
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 17]) -> Self {
        let nonce: [u8; 5] = bytes[..5].try_into().expect("slice is 5 bytes");
        let chunk_length = u32::from_be_bytes(bytes[5..9].try_into().expect("4 bytes"));
        let total_length = u32::from_be_bytes(bytes[9..13].try_into().expect("4 bytes"));
        let num_chunks = u32::from_be_bytes(bytes[13..17].try_into().expect("4 bytes"));
        if num_chunks == 0 {
            TaskId::Single { nonce }
        } else {
            TaskId::Chunked { nonce, chunk_length, total_length, num_chunks }
        }
    }
}

fn random_nonce() -> [u8; 5] {
    let mut nonce = [0u8; 5];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// `(task_id, chunk_index)`; `chunk_index == -1` means "the sole result of a
/// single-call task".
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    pub task_id: TaskId,
    pub chunk_index: i32,
}

impl ChunkId {
    #[must_use]
    pub fn single(task_id: TaskId) -> Self {
        ChunkId { task_id, chunk_index: -1 }
    }

    #[must_use]
    pub fn chunk(task_id: TaskId, index: u32) -> Self {
        ChunkId { task_id, chunk_index: index as i32 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_task_id_round_trips_through_bytes() {
        let id = TaskId::new_chunked(10_000, 8);
        let bytes = id.to_bytes();
        assert_eq!(TaskId::from_bytes(bytes), id);
    }

    #[test]
    fn single_task_id_round_trips_through_bytes() {
        let id = TaskId::new_single();
        let bytes = id.to_bytes();
        assert_eq!(TaskId::from_bytes(bytes), id);
    }

    #[test]
    fn chunk_length_is_ceil_division() {
        match TaskId::new_chunked(10_000, 3) {
            TaskId::Chunked { chunk_length, .. } => assert_eq!(chunk_length, 3_334),
            TaskId::Single { .. } => panic!("expected chunked"),
        }
    }
}
