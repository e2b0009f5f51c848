//! Newline-delimited JSON-RPC over stdio.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use super::handler::ActionHandler;
use super::protocol::McpProtocol;

/// Serves MCP on the process's stdin and stdout until stdin closes.
///
/// # Errors
/// I/O errors on either stream.
pub async fn serve_stdio(handler: ActionHandler) -> io::Result<()> {
    serve(handler, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serves MCP on any reader/writer pair until the reader hits EOF.
///
/// Engine calls block on store locks, so each request runs on the blocking
/// pool. Requests are handled one at a time, in arrival order.
///
/// # Errors
/// I/O errors on either stream.
pub async fn serve<R, W>(handler: ActionHandler, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let protocol = Arc::new(McpProtocol::new(handler));
    let mut lines = BufReader::new(reader).lines();
    let mut writer = BufWriter::new(writer);

    tracing::info!("MCP server ready");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let protocol = Arc::clone(&protocol);
        let response = tokio::task::spawn_blocking(move || protocol.handle_line(&line))
            .await
            .map_err(io::Error::other)?;

        if let Some(response) = response {
            writer.write_all(response.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }
    tracing::info!("stdin closed; MCP server stopping");
    Ok(())
}
