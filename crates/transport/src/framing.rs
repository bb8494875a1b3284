use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// No frame the transport primitives produce is expected to exceed this;
/// guards a misbehaving peer from driving an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer closed the connection")]
    Closed,
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    TooLarge(u32),
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("peer rejected the connection: {0}")]
    Rejected(String),
}

/// Writes `value` as a single `u32`-big-endian-length-prefixed JSON frame.
///
/// No codec crate in the retrieval pack attests a length-delimited framing
/// dependency, so this builds directly on `tokio::io`, the same primitive
/// every websocket handler in the corpus is layered on.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value)?;
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| FramingError::TooLarge(u32::MAX))?;
    if len > MAX_FRAME_LEN {
        return Err(FramingError::TooLarge(len));
    }
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed JSON frame, or `Err(FramingError::Closed)` if
/// the peer closed the connection cleanly before sending a length prefix.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, FramingError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FramingError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(FramingError::TooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}
