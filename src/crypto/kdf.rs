//! Password Key Derivation
//!
//! OpenSSL EVP_BytesToKey with MD5 and a single iteration: the key is the
//! concatenation of D_1 = MD5(password), D_n = MD5(D_{n-1} || password),
//! truncated to the requested length. This is the derivation every
//! shadowsocks implementation expects, so it cannot be swapped for a modern
//! KDF without breaking interoperability.

use md5::{Digest, Md5};

/// Derive a symmetric key of `key_len` bytes from a password.
pub fn derive_key(password: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut previous: Option<[u8; 16]> = None;

    while key.len() < key_len {
        let mut hasher = Md5::new();
        if let Some(digest) = previous {
            hasher.update(digest);
        }
        hasher.update(password);
        let digest: [u8; 16] = hasher.finalize().into();
        key.extend_from_slice(&digest);
        previous = Some(digest);
    }

    key.truncate(key_len);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block_key_is_md5_of_password() {
        // MD5("foobar") = 3858f62230ac3c915f300c664312c63f
        let key = derive_key(b"foobar", 16);
        assert_eq!(
            key,
            [
                0x38, 0x58, 0xf6, 0x22, 0x30, 0xac, 0x3c, 0x91, 0x5f, 0x30, 0x0c, 0x66, 0x43,
                0x12, 0xc6, 0x3f
            ]
        );
    }

    #[test]
    fn test_long_key_chains_digests() {
        let key = derive_key(b"test", 32);
        assert_eq!(key.len(), 32);

        let first: [u8; 16] = Md5::digest(b"test").into();
        assert_eq!(&key[..16], &first);

        let mut hasher = Md5::new();
        hasher.update(first);
        hasher.update(b"test");
        let second: [u8; 16] = hasher.finalize().into();
        assert_eq!(&key[16..], &second);
    }

    #[test]
    fn test_truncated_key() {
        let full = derive_key(b"secret", 16);
        let short = derive_key(b"secret", 7);
        assert_eq!(short, &full[..7]);
    }
}
