//! JSON-over-Unix-socket IPC.
//!
//! Newline-delimited messages; every request gets exactly one response,
//! except `Subscribe` on the store socket which turns the connection into
//! an event stream.

pub mod client;
pub mod protocol;
pub mod server;

use std::path::PathBuf;

pub fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

pub fn socket_dir() -> PathBuf {
    runtime_dir().join("droidhost")
}

pub fn session_socket_path() -> PathBuf {
    socket_dir().join("session.sock")
}

pub fn store_socket_path() -> PathBuf {
    socket_dir().join("store.sock")
}
