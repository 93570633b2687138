//! Chat transport over a Unix Domain Socket
//!
//! Clients connect, send a `handshake` with their tenant context, then exchange
//! newline-delimited JSON messages. Each connection hosts at most one live
//! conversation at a time.

use std::path::PathBuf;

mod connection;
pub mod listener;

pub use connection::Server;
pub use listener::{cleanup_socket, create_listener_at};

/// Default socket path for the daemon
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("campaignd")
        .join("campaignd.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_ends_with_campaignd_sock() {
        let path = default_socket_path();
        assert!(path.ends_with("campaignd/campaignd.sock"));
    }
}
