//! Framed reads over a buffered async stream: CRLF lines, header blocks, and length-delimited bodies.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite};

/// Longest accepted line, terminator included.
pub const MAX_LINE_LEN: usize = 8 * 1024;

/// Most header lines accepted in one block.
pub const MAX_HEADERS: usize = 32;

/// Failure reading protocol framing off a stream. Always fatal for the connection.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line longer than {} bytes", MAX_LINE_LEN)]
    LineTooLong,
    #[error("more than {} header lines", MAX_HEADERS)]
    TooManyHeaders,
}

/// Read one line, without its `\n` or `\r\n` terminator. `Ok(None)` on EOF before any byte.
/// A final line cut off by EOF is returned as is. Invalid UTF-8 is replaced, not rejected.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>, WireError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if n == MAX_LINE_LEN {
        return Err(WireError::LineTooLong);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Read header lines up to and including the blank line that ends the block (or EOF).
/// Returns the block normalized to CRLF endings, ready for `wire::parse_header_block`.
pub async fn read_header_block<R>(reader: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncBufRead + Unpin,
{
    let mut block = Vec::new();
    let mut count = 0usize;
    while let Some(line) = read_line(reader).await? {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        count += 1;
        if count > MAX_HEADERS {
            return Err(WireError::TooManyHeaders);
        }
        block.extend_from_slice(line.as_bytes());
        block.extend_from_slice(b"\r\n");
    }
    block.extend_from_slice(b"\r\n");
    Ok(block)
}

/// Copy exactly `len` bytes from `reader` to `writer`, or fewer if the stream ends first.
/// Returns the number of bytes copied.
pub async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, len: u64) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut limited = (&mut *reader).take(len);
    tokio::io::copy(&mut limited, writer).await
}

/// Copy everything until the peer closes its side.
pub async fn copy_to_end<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::io::copy(reader, writer).await
}
