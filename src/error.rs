//! Relay Error Types

use std::time::Duration;
use thiserror::Error;

/// Errors that can terminate a relay session.
///
/// Partial socket writes are not represented here: they are recovered in
/// place by resubmitting the unwritten tail and never surface to callers.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Malformed SOCKS5 message, unsupported auth method or unknown command
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The cipher or HMAC primitive rejected its input
    #[error("cipher transform failed: {0}")]
    Transform(String),

    /// Resolve/connect/bind/listen/accept/read/write failure
    #[error("network error: {0}")]
    Connectivity(#[from] std::io::Error),

    /// No activity within the configured window, detected by periodic sweep
    #[error("connection idle for longer than {0:?}")]
    IdleTimeout(Duration),
}
