//! Stream Cipher Engine
//!
//! Per-session stateful encrypt/decrypt transforms. Two backend families:
//!
//! - Block-derived: the key and IV feed a block-cipher keystream mode
//!   (CTR/OFB/CFB over AES, or RC4 keyed with MD5(key || iv)). The
//!   primitive keeps its own feedback register, so successive calls of
//!   arbitrary length continue the stream.
//! - Stream-counter: salsa20/chacha20 take an explicit 64-bit block index.
//!   A running byte counter is kept per state; each call front-pads the
//!   input to the current sub-block offset, transforms from the containing
//!   block boundary and discards the padding, so byte-granular calls still
//!   produce one continuous keystream.

use aes::{Aes128, Aes192, Aes256};
use cfb_mode::{BufDecryptor, BufEncryptor};
use chacha20::ChaCha20Legacy;
use cipher::{BlockCipher, BlockEncryptMut, KeyInit, KeyIvInit, StreamCipher, StreamCipherSeek};
use ctr::Ctr128BE;
use md5::{Digest, Md5};
use ofb::Ofb;
use rc4::consts::U16;
use rc4::Rc4;
use salsa20::Salsa20;
use std::marker::PhantomData;

use super::registry::{CipherKind, CipherSpec};
use crate::error::RelayError;

/// Keystream block size of the stream-counter backends.
const BLOCK_SIZE: u64 = 64;

/// Transform direction. Pure keystream modes ignore it; CFB does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Encrypt,
    Decrypt,
}

fn transform_err<E: std::fmt::Display>(err: E) -> RelayError {
    RelayError::Transform(err.to_string())
}

/// Backend-specific keystream progress.
trait KeystreamState: Send {
    fn advance(&mut self, input: &[u8]) -> Result<Vec<u8>, RelayError>;
}

/// Any synchronous stream cipher: CTR, OFB, RC4. Encrypt and decrypt are
/// the same XOR, and the primitive tracks its own position.
struct XorStream<C: StreamCipher + Send>(C);

impl<C: StreamCipher + Send> KeystreamState for XorStream<C> {
    fn advance(&mut self, input: &[u8]) -> Result<Vec<u8>, RelayError> {
        let mut out = input.to_vec();
        self.0.try_apply_keystream(&mut out).map_err(transform_err)?;
        Ok(out)
    }
}

struct CfbEncryptState<C: BlockEncryptMut + BlockCipher + Send>(BufEncryptor<C>);

impl<C: BlockEncryptMut + BlockCipher + Send> KeystreamState for CfbEncryptState<C> {
    fn advance(&mut self, input: &[u8]) -> Result<Vec<u8>, RelayError> {
        let mut out = input.to_vec();
        self.0.encrypt(&mut out);
        Ok(out)
    }
}

struct CfbDecryptState<C: BlockEncryptMut + BlockCipher + Send>(BufDecryptor<C>);

impl<C: BlockEncryptMut + BlockCipher + Send> KeystreamState for CfbDecryptState<C> {
    fn advance(&mut self, input: &[u8]) -> Result<Vec<u8>, RelayError> {
        let mut out = input.to_vec();
        self.0.decrypt(&mut out);
        Ok(out)
    }
}

/// Stream-counter backend. The primitive is block-indexed, so the state
/// keeps a byte counter and reconciles sub-block offsets with zero padding.
struct CounterState<C> {
    key: Vec<u8>,
    iv: Vec<u8>,
    counter: u64,
    _cipher: PhantomData<C>,
}

impl<C> CounterState<C>
where
    C: KeyIvInit + StreamCipher + StreamCipherSeek,
{
    fn new(key: &[u8], iv: &[u8]) -> Result<Self, RelayError> {
        // Construct once up front so bad key/IV lengths fail at state
        // creation, not on the first update.
        C::new_from_slices(key, iv).map_err(transform_err)?;
        Ok(Self {
            key: key.to_vec(),
            iv: iv.to_vec(),
            counter: 0,
            _cipher: PhantomData,
        })
    }
}

impl<C> KeystreamState for CounterState<C>
where
    C: KeyIvInit + StreamCipher + StreamCipherSeek + Send,
{
    fn advance(&mut self, input: &[u8]) -> Result<Vec<u8>, RelayError> {
        let block_index = self.counter / BLOCK_SIZE;
        let padding = (self.counter % BLOCK_SIZE) as usize;

        let mut buf = vec![0u8; padding + input.len()];
        buf[padding..].copy_from_slice(input);

        let mut cipher = C::new_from_slices(&self.key, &self.iv).map_err(transform_err)?;
        cipher.try_seek(block_index * BLOCK_SIZE).map_err(transform_err)?;
        cipher.try_apply_keystream(&mut buf).map_err(transform_err)?;

        self.counter += input.len() as u64;
        buf.drain(..padding);
        Ok(buf)
    }
}

/// One direction of a session's cipher stream.
pub struct CipherState {
    inner: Box<dyn KeystreamState>,
}

impl CipherState {
    /// Create a transform state for one direction of a session.
    ///
    /// Fails with a transform error if the key or IV length does not match
    /// the registry entry, or the primitive rejects the combination.
    pub fn new(
        spec: &CipherSpec,
        key: &[u8],
        iv: &[u8],
        opcode: OpCode,
    ) -> Result<Self, RelayError> {
        if key.len() != spec.key_size {
            return Err(RelayError::Transform(format!(
                "{}: key length {} does not match expected {}",
                spec.name,
                key.len(),
                spec.key_size
            )));
        }
        if iv.len() != spec.iv_size {
            return Err(RelayError::Transform(format!(
                "{}: IV length {} does not match expected {}",
                spec.name,
                iv.len(),
                spec.iv_size
            )));
        }

        let inner: Box<dyn KeystreamState> = match spec.kind {
            CipherKind::Rc4Md5 => {
                // Legacy variant: the effective RC4 key is MD5(key || iv).
                let mut hasher = Md5::new();
                hasher.update(key);
                hasher.update(iv);
                let effective: [u8; 16] = hasher.finalize().into();
                let rc4 = Rc4::<U16>::new_from_slice(&effective).map_err(transform_err)?;
                Box::new(XorStream(rc4))
            }
            CipherKind::Aes128Ctr => Box::new(XorStream(
                Ctr128BE::<Aes128>::new_from_slices(key, iv).map_err(transform_err)?,
            )),
            CipherKind::Aes192Ctr => Box::new(XorStream(
                Ctr128BE::<Aes192>::new_from_slices(key, iv).map_err(transform_err)?,
            )),
            CipherKind::Aes256Ctr => Box::new(XorStream(
                Ctr128BE::<Aes256>::new_from_slices(key, iv).map_err(transform_err)?,
            )),
            CipherKind::Aes128Ofb => Box::new(XorStream(
                Ofb::<Aes128>::new_from_slices(key, iv).map_err(transform_err)?,
            )),
            CipherKind::Aes192Ofb => Box::new(XorStream(
                Ofb::<Aes192>::new_from_slices(key, iv).map_err(transform_err)?,
            )),
            CipherKind::Aes256Ofb => Box::new(XorStream(
                Ofb::<Aes256>::new_from_slices(key, iv).map_err(transform_err)?,
            )),
            CipherKind::Aes128Cfb => Self::new_cfb::<Aes128>(key, iv, opcode)?,
            CipherKind::Aes192Cfb => Self::new_cfb::<Aes192>(key, iv, opcode)?,
            CipherKind::Aes256Cfb => Self::new_cfb::<Aes256>(key, iv, opcode)?,
            CipherKind::Salsa20 => Box::new(CounterState::<Salsa20>::new(key, iv)?),
            CipherKind::ChaCha20 => Box::new(CounterState::<ChaCha20Legacy>::new(key, iv)?),
        };

        Ok(Self { inner })
    }

    fn new_cfb<C>(key: &[u8], iv: &[u8], opcode: OpCode) -> Result<Box<dyn KeystreamState>, RelayError>
    where
        C: BlockEncryptMut + BlockCipher + KeyInit + Send + 'static,
    {
        Ok(match opcode {
            OpCode::Encrypt => Box::new(CfbEncryptState(
                BufEncryptor::<C>::new_from_slices(key, iv).map_err(transform_err)?,
            )),
            OpCode::Decrypt => Box::new(CfbDecryptState(
                BufDecryptor::<C>::new_from_slices(key, iv).map_err(transform_err)?,
            )),
        })
    }

    /// Transform `input`, continuing the session keystream. The output
    /// always has the same length as the input.
    pub fn update(&mut self, input: &[u8]) -> Result<Vec<u8>, RelayError> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        self.inner.advance(input)
    }
}
