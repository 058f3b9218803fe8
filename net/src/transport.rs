//! Framed read/write helpers over TCP streams.
//!
//! Both the node client and the relay use these to move length-prefixed
//! envelopes. Reads distinguish a clean end-of-stream (`Ok(None)`) from a
//! transport failure; a frame that decodes to garbage is an error the
//! caller may log and skip without dropping the connection.

use {
    crate::{
        error::{NetError, Result},
        message::Envelope,
    },
    log::warn,
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

/// Read one raw frame payload. Returns `Ok(None)` on a clean EOF at a
/// frame boundary.
pub async fn read_frame<R>(reader: &mut R, max_message_size: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(NetError::Transport(e)),
    }

    let len = Envelope::read_frame_len(&header);
    if len > max_message_size {
        warn!("oversized frame ({len} > {max_message_size}), dropping connection");
        return Err(NetError::MessageTooLarge {
            size: len,
            max: max_message_size,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Read and decode one envelope. `Ok(None)` on clean EOF.
pub async fn read_envelope<R>(reader: &mut R, max_message_size: usize) -> Result<Option<Envelope>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, max_message_size).await? {
        Some(payload) => Ok(Some(Envelope::deserialize(&payload)?)),
        None => Ok(None),
    }
}

/// Frame and send one envelope.
pub async fn write_envelope<W>(
    writer: &mut W,
    envelope: &Envelope,
    max_message_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = envelope.serialize_framed(max_message_size)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Send an already-framed buffer.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
