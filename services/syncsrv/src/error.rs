//! Engine error types
//!
//! `SyncError` is the single error surface of the service. Protocol errors
//! convert in via `#[from]`; transport and storage failures carry a message
//! from the backend. Frame-local errors are handled (logged and dropped)
//! close to where they occur, so anything that reaches a caller through
//! `Result` concerns the engine itself.

use thiserror::Error;
use wearlink_proto::{CommandError, FrameError};

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Byte buffer failed frame validation
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Valid frame carried a payload violating a command contract
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Write or notify-subscription failure on the device link
    #[error("transport error: {0}")]
    Transport(String),

    /// Telemetry store rejected an append or query
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid or unloadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine worker is gone; the handle can no longer enqueue
    #[error("engine stopped: {0}")]
    EngineStopped(String),
}

impl SyncError {
    pub fn transport(msg: impl Into<String>) -> Self {
        SyncError::Transport(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        SyncError::Storage(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SyncError::Config(msg.into())
    }

    pub fn engine_stopped(msg: impl Into<String>) -> Self {
        SyncError::EngineStopped(msg.into())
    }
}

impl From<figment::Error> for SyncError {
    fn from(err: figment::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}
