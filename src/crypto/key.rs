//! Password-based key derivation (EVP_BytesToKey + HKDF-SHA1 subkeys)

use crate::{Error, Result};
use bytes::Bytes;
use hkdf::Hkdf;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use sha1::Sha1;
use std::collections::HashMap;

/// HKDF info string fixed by the Shadowsocks AEAD spec
const SUBKEY_INFO: &[u8] = b"ss-subkey";

/// Derive the master key from a password using EVP_BytesToKey
/// (MD5, count=1, no salt), compatible with original Shadowsocks.
pub fn derive_master_key(password: &str, key_len: usize) -> Bytes {
    let mut key = Vec::with_capacity(key_len);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password.as_bytes());
        let digest = hasher.finalize();
        prev = digest.to_vec();
        key.extend_from_slice(&prev);
    }

    key.truncate(key_len);
    Bytes::from(key)
}

/// Derive a per-session subkey from the master key and a salt using
/// HKDF-SHA1.
pub fn derive_subkey(master_key: &[u8], salt: &[u8], key_len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha1>::new(Some(salt), master_key);
    let mut subkey = vec![0u8; key_len];
    hk.expand(SUBKEY_INFO, &mut subkey)
        .map_err(|e| Error::crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(subkey)
}

/// Memoizes master keys by `(password, key_len)`. Derivation is cheap but
/// runs on every accepted connection otherwise; writers are serialized by a
/// mutex and contention is negligible.
#[derive(Default)]
pub struct KeyCache {
    inner: Mutex<HashMap<(String, usize), Bytes>>,
}

impl KeyCache {
    pub fn new() -> Self {
        KeyCache {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn master_key(&self, password: &str, key_len: usize) -> Bytes {
        let mut cache = self.inner.lock();
        if let Some(key) = cache.get(&(password.to_string(), key_len)) {
            return key.clone();
        }
        let key = derive_master_key(password, key_len);
        cache.insert((password.to_string(), key_len), key.clone());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_key_deterministic() {
        let a = derive_master_key("test", 16);
        let b = derive_master_key("test", 16);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_master_key_known_vector() {
        // EVP_BytesToKey("test", 16) with MD5 is MD5("test")
        let key = derive_master_key("test", 16);
        assert_eq!(
            key.as_ref(),
            [
                0x09, 0x8f, 0x6b, 0xcd, 0x46, 0x21, 0xd3, 0x73, 0xca, 0xde, 0x4e, 0x83, 0x26,
                0x27, 0xb4, 0xf6
            ]
        );
    }

    #[test]
    fn test_master_key_extension() {
        // Longer keys extend by chaining MD5(prev || password)
        let short = derive_master_key("secret", 16);
        let long = derive_master_key("secret", 32);
        assert_eq!(&long[..16], short.as_ref());
        assert_ne!(&long[16..], short.as_ref());
    }

    #[test]
    fn test_subkey_depends_on_salt() {
        let master = derive_master_key("test", 32);
        let a = derive_subkey(&master, &[0u8; 32], 32).unwrap();
        let b = derive_subkey(&master, &[1u8; 32], 32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_cache_hits() {
        let cache = KeyCache::new();
        let a = cache.master_key("test", 16);
        let b = cache.master_key("test", 16);
        assert_eq!(a, b);
        assert_eq!(a, derive_master_key("test", 16));
        assert_ne!(cache.master_key("test", 32), a);
    }
}
