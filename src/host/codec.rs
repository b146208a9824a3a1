//! Browser native-messaging framing: a 4-byte little-endian length followed
//! by that many bytes of UTF-8 JSON.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame the browser will send to a native host.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;
/// Largest frame the browser accepts from a native host.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;

#[derive(Debug)]
pub enum Frame {
    Message(Vec<u8>),
    /// Length prefix was zero or above `MAX_INBOUND_FRAME`; the body has
    /// been skipped.
    Rejected(usize),
}

/// Read one frame. `Ok(None)` on a clean EOF before a length prefix.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let len = u32::from_le_bytes(prefix) as usize;
    if len == 0 || len > MAX_INBOUND_FRAME {
        let mut skipped = reader.take(len as u64);
        tokio::io::copy(&mut skipped, &mut tokio::io::sink()).await?;
        return Ok(Some(Frame::Rejected(len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(Frame::Message(body)))
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_OUTBOUND_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds native messaging limit", body.len()),
        ));
    }
    let len = u32::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}
