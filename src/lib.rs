//! ssrelay Library
//!
//! Encrypting SOCKS5 relay client: accepts local SOCKS5 connections and
//! tunnels them to a remote server over a password-derived stream cipher,
//! with optional per-chunk one-time-auth framing.

pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod relay;

pub use config::Config;
pub use crypto::Encryptor;
pub use error::RelayError;
pub use relay::RelayManager;

/// Common error type for the relay
pub type Result<T> = anyhow::Result<T>;
