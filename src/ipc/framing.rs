//! Frame boundaries for raw bridge messages on a byte stream.
//!
//! Each message is preceded by a `Content-Length` header block, as in LSP:
//!
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <message-body>
//! ```
//!
//! Header names are matched case-insensitively, bare `\n` line endings are
//! accepted, and headers other than `Content-Length` are skipped.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::MAX_MESSAGE_SIZE;

const CONTENT_LENGTH: &str = "Content-Length";

/// Read one framed message.
///
/// Returns `Ok(None)` if the stream ends cleanly between frames.
///
/// # Errors
///
/// Returns an error if the stream ends mid-frame, the header block has no
/// usable `Content-Length`, the length exceeds `MAX_MESSAGE_SIZE`, or the
/// body is not UTF-8.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(size) = read_frame_length(reader).await? else {
        return Ok(None);
    };

    if size > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Message size {} exceeds maximum {} bytes",
            size,
            MAX_MESSAGE_SIZE
        ));
    }

    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .await
        .context("Connection closed in the middle of a frame body")?;

    let body = String::from_utf8(body).context("Frame body is not valid UTF-8")?;
    Ok(Some(body))
}

/// Consume a header block and return its declared body length.
async fn read_frame_length<R>(reader: &mut R) -> Result<Option<usize>>
where
    R: AsyncBufRead + Unpin,
{
    let mut length = None;
    let mut line = String::new();
    let mut started = false;

    loop {
        line.clear();
        if reader.read_line(&mut line).await.context("Failed to read frame header")? == 0 {
            if started {
                return Err(anyhow!("Connection closed in the middle of a frame"));
            }
            return Ok(None);
        }
        started = true;

        let header = line.trim();
        if header.is_empty() {
            break;
        }
        if let Some(value) = content_length_value(header) {
            let parsed = value
                .parse::<usize>()
                .with_context(|| format!("Invalid Content-Length value: {}", value))?;
            length = Some(parsed);
        }
    }

    length
        .map(Some)
        .ok_or_else(|| anyhow!("Missing Content-Length header"))
}

fn content_length_value(header: &str) -> Option<&str> {
    let (name, value) = header.split_once(':')?;
    name.trim()
        .eq_ignore_ascii_case(CONTENT_LENGTH)
        .then(|| value.trim())
}

/// Write `body` as one frame and flush.
///
/// # Errors
///
/// Returns an error if the write or the flush fails.
pub async fn write_message<W>(writer: &mut W, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = format!("{}: {}\r\n\r\n", CONTENT_LENGTH, body.len()).into_bytes();
    frame.extend_from_slice(body.as_bytes());

    writer.write_all(&frame).await.context("Failed to write frame")?;
    writer.flush().await.context("Failed to flush frame")?;
    Ok(())
}
