//! Error taxonomy (spec §7). Domain crates return these typed errors; `main`
//! wraps the top-level result with `anyhow::Context`.

use thiserror::Error;

/// Transport-level failure talking to a remote playout engine. Triggers
/// reconnect on the owning [`crate::remote::Connection`].
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("write to {host}:{port} failed: {source}")]
    Write {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("read from {host}:{port} failed: {source}")]
    Read {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("connection to {host}:{port} closed by peer")]
    Closed { host: String, port: u16 },
}

/// Malformed reply from the remote — the protocol layer assumes desync and
/// the connection is dropped and reconnected.
#[derive(Debug, Error)]
#[error("protocol error: {0}")]
pub struct ProtocolError(pub String);

/// Non-success reply code from the remote. Does **not** trigger reconnect.
#[derive(Debug, Error)]
#[error("remote error {code}: {message}")]
pub struct RemoteError {
    pub code: u16,
    pub message: String,
}

/// Malformed persisted config. Fatal at startup; at runtime the offending
/// field is rejected with an HTTP 400 instead of propagating here.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// A single connection's failure within an aggregated multi-slot operation
/// (spec §7 propagation policy: one connection's failure never aborts others).
#[derive(Debug, Error)]
pub enum RemoteCallError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// `{slotIndex, error}` — the aggregated failure shape returned by sync
/// operations per spec §7.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SlotError {
    pub slot_index: u32,
    pub error: String,
}
