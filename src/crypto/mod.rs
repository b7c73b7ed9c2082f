//! Cipher registry, stream cipher engine and encryptor

pub mod encryptor;
pub mod engine;
pub mod kdf;
pub mod registry;

pub use encryptor::Encryptor;
pub use engine::{CipherState, OpCode};
pub use registry::{lookup_cipher, supported_ciphers, BackendKind, CipherSpec};
