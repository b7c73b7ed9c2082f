//! Encryptor / OTA Framer
//!
//! Wraps one encrypt and one decrypt [`CipherState`], created lazily: the
//! encrypt state on the first `encrypt` call with a freshly generated IV
//! (prepended to that first ciphertext), the decrypt state on the first
//! `decrypt` call from the IV carried in the leading bytes of the peer's
//! stream. When one-time auth is enabled the plaintext is framed with
//! truncated HMAC-SHA1 tags before encryption so the peer can detect
//! tampering chunk by chunk.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use super::engine::{CipherState, OpCode};
use super::kdf;
use super::registry::CipherSpec;
use crate::error::RelayError;

type HmacSha1 = Hmac<Sha1>;

/// Flag ORed into the first plaintext byte of an OTA-enabled stream.
pub const ONE_TIME_AUTH_FLAG: u8 = 0x10;

/// Length of the truncated HMAC-SHA1 tag carried per chunk.
pub const ONE_TIME_AUTH_BYTES: usize = 10;

/// Bytes of data-chunk framing in front of the payload: u16 length + tag.
const CHUNK_OVERHEAD: usize = 2 + ONE_TIME_AUTH_BYTES;

/// Per-session cipher pair with optional one-time-auth framing.
pub struct Encryptor {
    spec: &'static CipherSpec,
    key: Vec<u8>,
    enc_iv: Vec<u8>,
    dec_iv: Vec<u8>,
    enc_state: Option<CipherState>,
    dec_state: Option<CipherState>,
    one_time_auth: bool,
    chunk_id: u32,
    recv_chunk_id: u32,
}

impl Encryptor {
    /// Create an encryptor for one session. The symmetric key is derived
    /// from the password and the outbound IV is generated immediately; no
    /// cipher state exists until the first call in each direction.
    pub fn new(password: &str, spec: &'static CipherSpec, one_time_auth: bool) -> Self {
        let key = kdf::derive_key(password.as_bytes(), spec.key_size);
        let mut enc_iv = vec![0u8; spec.iv_size];
        rand::thread_rng().fill_bytes(&mut enc_iv);

        Self {
            spec,
            key,
            enc_iv,
            dec_iv: Vec::new(),
            enc_state: None,
            dec_state: None,
            one_time_auth,
            chunk_id: 0,
            recv_chunk_id: 0,
        }
    }

    /// IV used for the outbound stream.
    pub fn encrypt_iv(&self) -> &[u8] {
        &self.enc_iv
    }

    /// Encrypt one chunk of the uplink stream. The first call prepends the
    /// session IV to the returned ciphertext.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, RelayError> {
        let first = self.enc_state.is_none();

        let framed;
        let data: &[u8] = if self.one_time_auth {
            framed = if first {
                self.frame_first_chunk(plaintext)?
            } else {
                self.frame_data_chunks(plaintext)?
            };
            &framed
        } else {
            plaintext
        };

        if let Some(state) = self.enc_state.as_mut() {
            return state.update(data);
        }

        let mut state = CipherState::new(self.spec, &self.key, &self.enc_iv, OpCode::Encrypt)?;
        let body = state.update(data)?;
        self.enc_state = Some(state);

        let mut out = self.enc_iv.clone();
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decrypt one chunk of the downlink stream. The first call consumes
    /// the leading IV and fails if the buffer is shorter than it.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, RelayError> {
        if let Some(state) = self.dec_state.as_mut() {
            return state.update(ciphertext);
        }

        if ciphertext.len() < self.spec.iv_size {
            return Err(RelayError::Protocol(format!(
                "first ciphertext shorter than {}-byte IV",
                self.spec.iv_size
            )));
        }

        self.dec_iv = ciphertext[..self.spec.iv_size].to_vec();
        let mut state = CipherState::new(self.spec, &self.key, &self.dec_iv, OpCode::Decrypt)?;
        let out = state.update(&ciphertext[self.spec.iv_size..])?;
        self.dec_state = Some(state);
        Ok(out)
    }

    /// Build the pre-encryption buffer for the first OTA chunk: the first
    /// plaintext byte is flagged with 0x10 and a truncated HMAC-SHA1 over
    /// the flagged plaintext, keyed with IV || key, is appended.
    pub fn frame_first_chunk(&self, plaintext: &[u8]) -> Result<Vec<u8>, RelayError> {
        if plaintext.is_empty() {
            return Err(RelayError::Protocol(
                "first one-time-auth chunk must not be empty".to_string(),
            ));
        }

        let mut buf = plaintext.to_vec();
        buf[0] |= ONE_TIME_AUTH_FLAG;

        let mut hmac_key = self.enc_iv.clone();
        hmac_key.extend_from_slice(&self.key);
        let tag = hmac_sha1(&hmac_key, &buf)?;
        buf.extend_from_slice(&tag[..ONE_TIME_AUTH_BYTES]);
        Ok(buf)
    }

    /// Build the pre-encryption buffer for a subsequent OTA chunk:
    /// `[u16 BE length][10-byte tag keyed IV || chunk_id][payload]`.
    /// The chunk counter is incremented after use.
    pub fn frame_data_chunk(&mut self, payload: &[u8]) -> Result<Vec<u8>, RelayError> {
        if payload.len() > u16::MAX as usize {
            return Err(RelayError::Protocol(format!(
                "one-time-auth chunk of {} bytes exceeds framing limit",
                payload.len()
            )));
        }

        let mut hmac_key = self.enc_iv.clone();
        hmac_key.extend_from_slice(&self.chunk_id.to_be_bytes());
        let tag = hmac_sha1(&hmac_key, payload)?;
        self.chunk_id = self.chunk_id.wrapping_add(1);

        let mut buf = Vec::with_capacity(CHUNK_OVERHEAD + payload.len());
        buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&tag[..ONE_TIME_AUTH_BYTES]);
        buf.extend_from_slice(payload);
        Ok(buf)
    }

    /// Frame a payload as one or more data chunks. The u16 length field
    /// caps a single frame at 65535 bytes, so larger payloads split across
    /// consecutive frames, each with its own tag and counter value.
    fn frame_data_chunks(&mut self, payload: &[u8]) -> Result<Vec<u8>, RelayError> {
        if payload.len() <= u16::MAX as usize {
            return self.frame_data_chunk(payload);
        }

        let mut buf = Vec::with_capacity(payload.len() + 2 * CHUNK_OVERHEAD);
        for piece in payload.chunks(u16::MAX as usize) {
            buf.extend_from_slice(&self.frame_data_chunk(piece)?);
        }
        Ok(buf)
    }

    /// Verify and strip the framing of a decrypted first OTA chunk,
    /// mirroring [`frame_first_chunk`]. Returns the plaintext with the
    /// flag bit cleared; a missing flag or tag mismatch is fatal.
    pub fn verify_first_chunk(&self, chunk: &[u8]) -> Result<Vec<u8>, RelayError> {
        if chunk.len() <= ONE_TIME_AUTH_BYTES {
            return Err(RelayError::Protocol(
                "one-time-auth chunk shorter than its tag".to_string(),
            ));
        }

        let (payload, tag) = chunk.split_at(chunk.len() - ONE_TIME_AUTH_BYTES);
        if payload[0] & ONE_TIME_AUTH_FLAG == 0 {
            return Err(RelayError::Protocol(
                "peer stream does not carry the one-time-auth flag".to_string(),
            ));
        }

        let mut hmac_key = self.dec_iv.clone();
        hmac_key.extend_from_slice(&self.key);
        verify_hmac_sha1(&hmac_key, payload, tag)?;

        let mut out = payload.to_vec();
        out[0] &= !ONE_TIME_AUTH_FLAG;
        Ok(out)
    }

    /// Verify and strip the framing of a decrypted data chunk, mirroring
    /// [`frame_data_chunk`]. The expected chunk counter is incremented on
    /// success.
    pub fn verify_data_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>, RelayError> {
        if chunk.len() < CHUNK_OVERHEAD {
            return Err(RelayError::Protocol(
                "one-time-auth chunk shorter than its framing".to_string(),
            ));
        }

        let declared = u16::from_be_bytes([chunk[0], chunk[1]]) as usize;
        let (tag, payload) = chunk[2..].split_at(ONE_TIME_AUTH_BYTES);
        if payload.len() != declared {
            return Err(RelayError::Protocol(format!(
                "one-time-auth length mismatch: declared {}, carried {}",
                declared,
                payload.len()
            )));
        }

        let mut hmac_key = self.dec_iv.clone();
        hmac_key.extend_from_slice(&self.recv_chunk_id.to_be_bytes());
        verify_hmac_sha1(&hmac_key, payload, tag)?;
        self.recv_chunk_id = self.recv_chunk_id.wrapping_add(1);

        Ok(payload.to_vec())
    }

    /// One-shot encryption with a throwaway cipher state: generates a fresh
    /// IV, prepends it raw, and discards all state. Used for UDP datagrams,
    /// where every packet is an independent cryptographic unit.
    pub fn encrypt_once(
        password: &str,
        spec: &'static CipherSpec,
        payload: &[u8],
    ) -> Result<Vec<u8>, RelayError> {
        let key = kdf::derive_key(password.as_bytes(), spec.key_size);
        let mut iv = vec![0u8; spec.iv_size];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut state = CipherState::new(spec, &key, &iv, OpCode::Encrypt)?;
        let body = state.update(payload)?;

        let mut out = iv;
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// One-shot decryption counterpart of [`encrypt_once`]: reads the IV
    /// from the leading bytes and decrypts the remainder.
    pub fn decrypt_once(
        password: &str,
        spec: &'static CipherSpec,
        datagram: &[u8],
    ) -> Result<Vec<u8>, RelayError> {
        if datagram.len() < spec.iv_size {
            return Err(RelayError::Protocol(format!(
                "datagram shorter than {}-byte IV",
                spec.iv_size
            )));
        }

        let key = kdf::derive_key(password.as_bytes(), spec.key_size);
        let (iv, body) = datagram.split_at(spec.iv_size);
        let mut state = CipherState::new(spec, &key, iv, OpCode::Decrypt)?;
        state.update(body)
    }
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> Result<[u8; 20], RelayError> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|e| RelayError::Transform(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn verify_hmac_sha1(key: &[u8], data: &[u8], tag: &[u8]) -> Result<(), RelayError> {
    let mut mac = HmacSha1::new_from_slice(key)
        .map_err(|e| RelayError::Transform(e.to_string()))?;
    mac.update(data);
    mac.verify_truncated_left(tag)
        .map_err(|_| RelayError::Protocol("one-time-auth tag mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::registry::{lookup_cipher, supported_ciphers};

    #[test]
    fn test_stream_roundtrip_mismatched_chunking() {
        let plaintext: Vec<u8> = (0..400u16).map(|v| (v % 256) as u8).collect();
        for name in supported_ciphers() {
            let spec = lookup_cipher(name).unwrap();
            let mut sender = Encryptor::new("hunter2", spec, false);
            let mut receiver = Encryptor::new("hunter2", spec, false);

            let mut wire = Vec::new();
            for chunk in plaintext.chunks(10) {
                wire.extend(sender.encrypt(chunk).unwrap());
            }

            let mut recovered = Vec::new();
            for chunk in wire.chunks(33) {
                recovered.extend(receiver.decrypt(chunk).unwrap());
            }
            assert_eq!(recovered, plaintext, "{}", name);
        }
    }

    #[test]
    fn test_first_encrypt_prepends_iv() {
        let spec = lookup_cipher("aes-256-cfb").unwrap();
        let mut enc = Encryptor::new("pw", spec, false);
        let iv = enc.encrypt_iv().to_vec();

        let out = enc.encrypt(b"hello").unwrap();
        assert_eq!(&out[..spec.iv_size], &iv[..]);
        assert_eq!(out.len(), spec.iv_size + 5);

        // Only the first call carries the IV.
        let out = enc.encrypt(b"hello").unwrap();
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_decrypt_short_first_buffer_fails() {
        let spec = lookup_cipher("aes-128-cfb").unwrap();
        let mut dec = Encryptor::new("pw", spec, false);
        let result = dec.decrypt(&[0u8; 15]);
        assert!(matches!(result, Err(RelayError::Protocol(_))));
    }

    #[test]
    fn test_ota_first_chunk_layout() {
        let spec = lookup_cipher("aes-128-ctr").unwrap();
        let enc = Encryptor::new("test", spec, true);

        let framed = enc.frame_first_chunk(&[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(framed.len(), 3 + ONE_TIME_AUTH_BYTES);
        assert_eq!(framed[0], 0x01 | ONE_TIME_AUTH_FLAG);
        assert_eq!(framed[1], 0x02);
        assert_eq!(framed[2], 0x03);
    }

    #[test]
    fn test_ota_roundtrip_through_cipher_stream() {
        let spec = lookup_cipher("chacha20").unwrap();
        let mut sender = Encryptor::new("s3cret", spec, true);
        let mut receiver = Encryptor::new("s3cret", spec, true);

        let header = [0x03u8, 0x04, b'h', b'o', b's', b't', 0x1f, 0x90];
        let wire = sender.encrypt(&header).unwrap();
        let framed = receiver.decrypt(&wire).unwrap();
        let recovered = receiver.verify_first_chunk(&framed).unwrap();
        assert_eq!(recovered, header);

        for payload in [&b"first payload"[..], &b"second"[..]] {
            let wire = sender.encrypt(payload).unwrap();
            let framed = receiver.decrypt(&wire).unwrap();
            let recovered = receiver.verify_data_chunk(&framed).unwrap();
            assert_eq!(recovered, payload);
        }
    }

    #[test]
    fn test_ota_payload_larger_than_frame_limit_splits() {
        let spec = lookup_cipher("aes-128-ctr").unwrap();
        let mut sender = Encryptor::new("pw", spec, true);
        let mut receiver = Encryptor::new("pw", spec, true);

        let wire = sender.encrypt(&[0x01]).unwrap();
        let framed = receiver.decrypt(&wire).unwrap();
        receiver.verify_first_chunk(&framed).unwrap();

        // Larger than one u16-length frame can carry: must go out as
        // multiple frames, not fail.
        let payload = vec![0xaa; 70_000];
        let wire = sender.encrypt(&payload).unwrap();
        let mut framed = receiver.decrypt(&wire).unwrap();

        let mut recovered = Vec::new();
        let mut frames = 0;
        while !framed.is_empty() {
            let declared = u16::from_be_bytes([framed[0], framed[1]]) as usize;
            let total = 2 + ONE_TIME_AUTH_BYTES + declared;
            recovered.extend(receiver.verify_data_chunk(&framed[..total]).unwrap());
            framed.drain(..total);
            frames += 1;
        }
        assert_eq!(frames, 2);
        assert_eq!(recovered, payload);
    }

    #[test]
    fn test_ota_tampered_chunk_rejected() {
        let spec = lookup_cipher("aes-256-ctr").unwrap();
        let mut sender = Encryptor::new("s3cret", spec, true);
        let mut receiver = Encryptor::new("s3cret", spec, true);

        let wire = sender.encrypt(&[0x01, 0xde, 0xad]).unwrap();
        let mut framed = receiver.decrypt(&wire).unwrap();
        framed[1] ^= 0xff;
        assert!(matches!(
            receiver.verify_first_chunk(&framed),
            Err(RelayError::Protocol(_))
        ));
    }

    #[test]
    fn test_ota_chunk_counter_must_match() {
        let spec = lookup_cipher("aes-128-ctr").unwrap();
        let mut sender = Encryptor::new("pw", spec, true);
        let mut receiver = Encryptor::new("pw", spec, true);

        let wire = sender.encrypt(&[0x01]).unwrap();
        let framed = receiver.decrypt(&wire).unwrap();
        receiver.verify_first_chunk(&framed).unwrap();

        // Decrypt chunk 0 but never verify it: chunk 1 then arrives while
        // the receiver still expects counter 0 and must be rejected.
        let wire = sender.encrypt(b"chunk zero").unwrap();
        let _unverified = receiver.decrypt(&wire).unwrap();
        let wire = sender.encrypt(b"chunk one").unwrap();
        let framed = receiver.decrypt(&wire).unwrap();
        assert!(matches!(
            receiver.verify_data_chunk(&framed),
            Err(RelayError::Protocol(_))
        ));
    }

    #[test]
    fn test_one_shot_roundtrip() {
        for name in supported_ciphers() {
            let spec = lookup_cipher(name).unwrap();
            let payload = b"independent datagram";

            let sealed = Encryptor::encrypt_once("udp-pass", spec, payload).unwrap();
            assert_eq!(sealed.len(), spec.iv_size + payload.len());

            let opened = Encryptor::decrypt_once("udp-pass", spec, &sealed).unwrap();
            assert_eq!(opened, payload, "{}", name);
        }
    }

    #[test]
    fn test_one_shot_fresh_iv_per_datagram() {
        let spec = lookup_cipher("aes-128-cfb").unwrap();
        let a = Encryptor::encrypt_once("pw", spec, b"same payload").unwrap();
        let b = Encryptor::encrypt_once("pw", spec, b"same payload").unwrap();
        assert_ne!(a[..spec.iv_size], b[..spec.iv_size]);
    }

    #[test]
    fn test_one_shot_short_datagram_fails() {
        let spec = lookup_cipher("salsa20").unwrap();
        let result = Encryptor::decrypt_once("pw", spec, &[0u8; 7]);
        assert!(matches!(result, Err(RelayError::Protocol(_))));
    }
}
