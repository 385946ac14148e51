//! AMQP 0-9-1 Error Handling
//!
//! This module provides the error types surfaced by the client. Each kind
//! maps to one failure class: transport problems, protocol violations,
//! liveness loss, cooperative cancellation, and user callback failures.
//!
//! # Examples
//!
//! ```rust
//! use dumq_amqp091::error::{AmqpError, AmqpResult};
//!
//! fn check(result: AmqpResult<()>) {
//!     match result {
//!         Ok(()) => {}
//!         Err(AmqpError::HeartbeatTimeout) => eprintln!("peer went silent"),
//!         Err(AmqpError::Cancelled) => eprintln!("shutdown requested"),
//!         Err(e) => eprintln!("session error: {}", e),
//!     }
//! }
//! ```

use thiserror::Error;

/// AMQP 0-9-1 client error types
#[derive(Error, Debug)]
pub enum AmqpError {
    /// An operation was attempted before `setup` established the session.
    #[error("session is not initialized")]
    NotInitialized,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Version or mechanism rejection during the handshake.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A synchronous reply did not match the expected class/method pair.
    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Too many missed heartbeat intervals inside the sliding window.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The host environment requested shutdown.
    #[error("exiting")]
    Cancelled,

    /// A delivery callback reported failure.
    #[error("Callback error: {0}")]
    Callback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for AMQP operations
pub type AmqpResult<T> = Result<T, AmqpError>;

impl AmqpError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        AmqpError::Connection(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        AmqpError::Transport(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        AmqpError::Protocol(msg.into())
    }

    /// Create an unexpected-frame error
    pub fn unexpected_frame(msg: impl Into<String>) -> Self {
        AmqpError::UnexpectedFrame(msg.into())
    }

    /// Create an encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        AmqpError::Encoding(msg.into())
    }

    /// Create a decoding error
    pub fn decoding(msg: impl Into<String>) -> Self {
        AmqpError::Decoding(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        AmqpError::Timeout(msg.into())
    }

    /// Create a callback error
    pub fn callback(msg: impl Into<String>) -> Self {
        AmqpError::Callback(msg.into())
    }

    /// Get the error code as a string
    pub fn error_code(&self) -> &str {
        match self {
            AmqpError::NotInitialized => "not-initialized",
            AmqpError::Connection(_) => "connection-error",
            AmqpError::Transport(_) => "transport-error",
            AmqpError::Protocol(_) => "protocol-error",
            AmqpError::UnexpectedFrame(_) => "unexpected-frame",
            AmqpError::Encoding(_) => "encoding-error",
            AmqpError::Decoding(_) => "decoding-error",
            AmqpError::Timeout(_) => "timeout-error",
            AmqpError::HeartbeatTimeout => "heartbeat-timeout",
            AmqpError::Cancelled => "cancelled",
            AmqpError::Callback(_) => "callback-error",
            AmqpError::Io(_) => "io-error",
            AmqpError::Serialization(_) => "serialization-error",
        }
    }
}
