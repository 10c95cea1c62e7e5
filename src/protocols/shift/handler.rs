//! Shift protocol handler for the Tokio runtime.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::parser::{self, FrameState, HANDSHAKE};

/// Handle a shift protocol connection until the peer closes it.
///
/// Reads up to `chunk_size` bytes at a time and writes back whatever the
/// chunk produced before reading again.
pub async fn handle_connection<S>(mut stream: S, chunk_size: usize) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[HANDSHAKE]).await?;

    let mut state = FrameState::default();
    let mut input = BytesMut::with_capacity(chunk_size);
    let mut output = BytesMut::with_capacity(chunk_size);

    loop {
        input.clear();
        let n = stream.read_buf(&mut input).await?;
        if n == 0 {
            // EOF
            break;
        }

        output.clear();
        if parser::transform_into(&mut state, &input, &mut output) > 0 {
            stream.write_all(&output).await?;
        }
    }

    Ok(())
}
