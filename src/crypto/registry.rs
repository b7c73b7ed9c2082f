//! Cipher Registry
//!
//! Static table of the supported stream ciphers. Each entry records the key
//! and IV sizes plus which backend drives the keystream: a generic block
//! cipher in CFB/OFB/CTR mode, or a dedicated stream cipher taking an
//! explicit 64-bit block counter.

/// How the keystream for a cipher is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Key/IV feed a block-cipher keystream mode (CFB, OFB, CTR, RC4-MD5)
    BlockDerived,
    /// Key/IV feed a counter-mode stream cipher with an explicit block index
    StreamCounter,
}

/// The concrete cipher selected by a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Rc4Md5,
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    Aes128Ofb,
    Aes192Ofb,
    Aes256Ofb,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    Salsa20,
    ChaCha20,
}

/// Immutable description of a supported cipher.
#[derive(Debug)]
pub struct CipherSpec {
    pub name: &'static str,
    pub key_size: usize,
    pub iv_size: usize,
    pub kind: CipherKind,
}

impl CipherSpec {
    /// Backend family for this cipher.
    pub fn backend(&self) -> BackendKind {
        match self.kind {
            CipherKind::Salsa20 | CipherKind::ChaCha20 => BackendKind::StreamCounter,
            _ => BackendKind::BlockDerived,
        }
    }
}

static CIPHERS: &[CipherSpec] = &[
    CipherSpec { name: "rc4-md5", key_size: 16, iv_size: 16, kind: CipherKind::Rc4Md5 },
    CipherSpec { name: "aes-128-cfb", key_size: 16, iv_size: 16, kind: CipherKind::Aes128Cfb },
    CipherSpec { name: "aes-192-cfb", key_size: 24, iv_size: 16, kind: CipherKind::Aes192Cfb },
    CipherSpec { name: "aes-256-cfb", key_size: 32, iv_size: 16, kind: CipherKind::Aes256Cfb },
    CipherSpec { name: "aes-128-ofb", key_size: 16, iv_size: 16, kind: CipherKind::Aes128Ofb },
    CipherSpec { name: "aes-192-ofb", key_size: 24, iv_size: 16, kind: CipherKind::Aes192Ofb },
    CipherSpec { name: "aes-256-ofb", key_size: 32, iv_size: 16, kind: CipherKind::Aes256Ofb },
    CipherSpec { name: "aes-128-ctr", key_size: 16, iv_size: 16, kind: CipherKind::Aes128Ctr },
    CipherSpec { name: "aes-192-ctr", key_size: 24, iv_size: 16, kind: CipherKind::Aes192Ctr },
    CipherSpec { name: "aes-256-ctr", key_size: 32, iv_size: 16, kind: CipherKind::Aes256Ctr },
    CipherSpec { name: "salsa20", key_size: 32, iv_size: 8, kind: CipherKind::Salsa20 },
    CipherSpec { name: "chacha20", key_size: 32, iv_size: 8, kind: CipherKind::ChaCha20 },
];

/// Look up a cipher by its wire name.
pub fn lookup_cipher(name: &str) -> Option<&'static CipherSpec> {
    CIPHERS.iter().find(|spec| spec.name == name)
}

/// Names of all supported ciphers, for diagnostics.
pub fn supported_ciphers() -> impl Iterator<Item = &'static str> {
    CIPHERS.iter().map(|spec| spec.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_ciphers() {
        let spec = lookup_cipher("aes-256-cfb").unwrap();
        assert_eq!(spec.key_size, 32);
        assert_eq!(spec.iv_size, 16);
        assert_eq!(spec.backend(), BackendKind::BlockDerived);

        let spec = lookup_cipher("salsa20").unwrap();
        assert_eq!(spec.key_size, 32);
        assert_eq!(spec.iv_size, 8);
        assert_eq!(spec.backend(), BackendKind::StreamCounter);

        let spec = lookup_cipher("chacha20").unwrap();
        assert_eq!(spec.iv_size, 8);
        assert_eq!(spec.backend(), BackendKind::StreamCounter);
    }

    #[test]
    fn test_lookup_unknown_cipher() {
        assert!(lookup_cipher("aes-512-gcm").is_none());
        assert!(lookup_cipher("").is_none());
    }

    #[test]
    fn test_rc4_md5_is_block_derived() {
        let spec = lookup_cipher("rc4-md5").unwrap();
        assert_eq!(spec.key_size, 16);
        assert_eq!(spec.iv_size, 16);
        assert_eq!(spec.backend(), BackendKind::BlockDerived);
    }

    #[test]
    fn test_all_entries_resolvable_by_name() {
        for name in supported_ciphers() {
            assert!(lookup_cipher(name).is_some(), "missing entry for {}", name);
        }
    }
}
