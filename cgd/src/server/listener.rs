//! Socket setup and line framing

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tracing::{debug, warn};

use crate::session::Outbound;

/// Create and bind the listener, creating the parent directory and removing
/// a stale socket from a previous run
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener_at: creating socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind socket")?;
    debug!(?socket_path, "create_listener_at: socket bound successfully");

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// One framed read
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Line(String),
    TooLarge(usize),
    Closed,
}

/// Read one newline-terminated message of at most `max_bytes`
pub async fn read_frame<R>(reader: &mut R, max_bytes: usize) -> Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let bytes_read = reader
        .take(limit)
        .read_line(&mut line)
        .await
        .context("Failed to read message")?;

    if bytes_read == 0 {
        return Ok(Frame::Closed);
    }
    if bytes_read > max_bytes {
        return Ok(Frame::TooLarge(bytes_read));
    }
    Ok(Frame::Line(line.trim_end().to_string()))
}

/// Write one message as a JSON line
pub async fn write_frame<W>(writer: &mut W, message: &Outbound) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(message).context("Failed to serialize message")?;
    writer.write_all(json.as_bytes()).await.context("Failed to write message")?;
    writer.write_all(b"\n").await.context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush message")?;
    Ok(())
}
