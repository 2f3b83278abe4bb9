//! Errors surfaced by the safe Rust side of the bridge.
//!
//! The callback state machine itself has no error paths: losing a cancel/invoke
//! race is a no-op, not a failure. What remains is lifecycle misuse and a host
//! loop that stopped accepting work.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// `install` was called while another bridge is still installed.
    #[error("event loop bridge is already installed")]
    AlreadyInstalled,
    /// A hook needed the installed bridge but none is present.
    #[error("event loop bridge is not installed")]
    NotInstalled,
    /// The bridge was torn down or the host loop dropped its queue.
    #[error("host loop is no longer accepting work")]
    LoopClosed,
    /// The host loop runtime could not be built.
    #[error("failed to start host loop runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// The JSON configuration could not be parsed.
    #[error("invalid bridge configuration: {0}")]
    Config(#[from] serde_json::Error),
}
