//! AEAD cipher registry and seal/open primitives

use crate::{Error, Result};
use aead::generic_array::typenum::U12;
use aead::{Aead, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use aes_gcm::{AesGcm, Nonce};
use chacha20poly1305::ChaCha20Poly1305;

type Aes128Gcm = AesGcm<Aes128, U12>;
type Aes192Gcm = AesGcm<Aes192, U12>;
type Aes256Gcm = AesGcm<Aes256, U12>;

/// Supported AEAD cipher methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Aes128Gcm,
    Aes192Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl CipherKind {
    pub fn key_len(&self) -> usize {
        match self {
            CipherKind::Aes128Gcm => 16,
            CipherKind::Aes192Gcm => 24,
            CipherKind::Aes256Gcm => 32,
            CipherKind::ChaCha20Poly1305 => 32,
        }
    }

    pub fn salt_len(&self) -> usize {
        self.key_len()
    }

    pub fn tag_len(&self) -> usize {
        16
    }

    pub fn nonce_len(&self) -> usize {
        12
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CipherKind::Aes128Gcm => "aes-128-gcm",
            CipherKind::Aes192Gcm => "aes-192-gcm",
            CipherKind::Aes256Gcm => "aes-256-gcm",
            CipherKind::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }
}

impl std::fmt::Display for CipherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for CipherKind {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "aes-128-gcm" => Ok(CipherKind::Aes128Gcm),
            "aes-192-gcm" => Ok(CipherKind::Aes192Gcm),
            "aes-256-gcm" => Ok(CipherKind::Aes256Gcm),
            "chacha20-ietf-poly1305" | "chacha20-poly1305" => Ok(CipherKind::ChaCha20Poly1305),
            _ => Err(Error::config(format!("unsupported cipher: {}", s))),
        }
    }
}

/// An AEAD instance bound to one direction's subkey.
pub enum AeadCipher {
    Aes128Gcm(Box<Aes128Gcm>),
    Aes192Gcm(Box<Aes192Gcm>),
    Aes256Gcm(Box<Aes256Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
}

impl AeadCipher {
    pub fn new(kind: CipherKind, subkey: &[u8]) -> Result<Self> {
        let cipher = match kind {
            CipherKind::Aes128Gcm => AeadCipher::Aes128Gcm(Box::new(
                Aes128Gcm::new_from_slice(subkey).map_err(|e| Error::crypto(e.to_string()))?,
            )),
            CipherKind::Aes192Gcm => AeadCipher::Aes192Gcm(Box::new(
                Aes192Gcm::new_from_slice(subkey).map_err(|e| Error::crypto(e.to_string()))?,
            )),
            CipherKind::Aes256Gcm => AeadCipher::Aes256Gcm(Box::new(
                Aes256Gcm::new_from_slice(subkey).map_err(|e| Error::crypto(e.to_string()))?,
            )),
            CipherKind::ChaCha20Poly1305 => AeadCipher::ChaCha20Poly1305(Box::new(
                ChaCha20Poly1305::new_from_slice(subkey)
                    .map_err(|e| Error::crypto(e.to_string()))?,
            )),
        };
        Ok(cipher)
    }

    /// Encrypt `plain`, returning ciphertext with the 16-byte tag appended.
    pub fn seal(&self, nonce: &[u8; 12], plain: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::from(*nonce);
        let sealed = match self {
            AeadCipher::Aes128Gcm(c) => c.encrypt(&nonce, plain),
            AeadCipher::Aes192Gcm(c) => c.encrypt(&nonce, plain),
            AeadCipher::Aes256Gcm(c) => c.encrypt(&nonce, plain),
            AeadCipher::ChaCha20Poly1305(c) => c.encrypt(&nonce, plain),
        };
        sealed.map_err(|e| Error::crypto(e.to_string()))
    }

    /// Verify the trailing tag and decrypt. Any mismatch is an error with no
    /// partial plaintext.
    pub fn open(&self, nonce: &[u8; 12], sealed: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::from(*nonce);
        let plain = match self {
            AeadCipher::Aes128Gcm(c) => c.decrypt(&nonce, sealed),
            AeadCipher::Aes192Gcm(c) => c.decrypt(&nonce, sealed),
            AeadCipher::Aes256Gcm(c) => c.decrypt(&nonce, sealed),
            AeadCipher::ChaCha20Poly1305(c) => c.decrypt(&nonce, sealed),
        };
        plain.map_err(|_| Error::crypto("AEAD tag verification failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_kind_parse() {
        assert_eq!(
            CipherKind::try_from("aes-128-gcm").unwrap(),
            CipherKind::Aes128Gcm
        );
        assert_eq!(
            CipherKind::try_from("aes-192-gcm").unwrap(),
            CipherKind::Aes192Gcm
        );
        assert_eq!(
            CipherKind::try_from("AES-256-GCM").unwrap(),
            CipherKind::Aes256Gcm
        );
        assert_eq!(
            CipherKind::try_from("chacha20-poly1305").unwrap(),
            CipherKind::ChaCha20Poly1305
        );
        assert!(CipherKind::try_from("rc4-md5").is_err());
    }

    #[test]
    fn test_registry_lengths() {
        for (kind, key_len) in [
            (CipherKind::Aes128Gcm, 16),
            (CipherKind::Aes192Gcm, 24),
            (CipherKind::Aes256Gcm, 32),
            (CipherKind::ChaCha20Poly1305, 32),
        ] {
            assert_eq!(kind.key_len(), key_len);
            assert_eq!(kind.salt_len(), key_len);
            assert_eq!(kind.tag_len(), 16);
            assert_eq!(kind.nonce_len(), 12);
        }
    }

    #[test]
    fn test_seal_open_round_trip() {
        for kind in [
            CipherKind::Aes128Gcm,
            CipherKind::Aes192Gcm,
            CipherKind::Aes256Gcm,
            CipherKind::ChaCha20Poly1305,
        ] {
            let key = vec![0x42u8; kind.key_len()];
            let cipher = AeadCipher::new(kind, &key).unwrap();
            let nonce = [0u8; 12];
            let sealed = cipher.seal(&nonce, b"hello").unwrap();
            assert_eq!(sealed.len(), 5 + kind.tag_len());
            assert_eq!(cipher.open(&nonce, &sealed).unwrap(), b"hello");
        }
    }

    #[test]
    fn test_open_rejects_tampering() {
        let kind = CipherKind::Aes256Gcm;
        let cipher = AeadCipher::new(kind, &[7u8; 32]).unwrap();
        let nonce = [0u8; 12];
        let mut sealed = cipher.seal(&nonce, b"hello").unwrap();
        sealed[0] ^= 0x01;
        assert!(cipher.open(&nonce, &sealed).is_err());
    }

    #[test]
    fn test_open_rejects_wrong_nonce() {
        let cipher = AeadCipher::new(CipherKind::ChaCha20Poly1305, &[7u8; 32]).unwrap();
        let sealed = cipher.seal(&[0u8; 12], b"hello").unwrap();
        let mut wrong = [0u8; 12];
        wrong[0] = 1;
        assert!(cipher.open(&wrong, &sealed).is_err());
    }
}
