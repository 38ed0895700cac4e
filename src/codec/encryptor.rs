//! Encrypting half of the AEAD stream codec

use super::MAX_PAYLOAD;
use crate::crypto::{derive_subkey, AeadCipher, CipherKind, NonceSequence};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Turns plaintext into the salted AEAD frame stream.
///
/// The salt is generated at construction and emitted as a prefix ahead of
/// the first frame. Each input slice becomes `ceil(n / MAX_PAYLOAD)` frames;
/// empty slices produce no frames.
pub struct Encryptor {
    cipher: AeadCipher,
    nonce: NonceSequence,
    salt: Vec<u8>,
    salt_sent: bool,
}

impl Encryptor {
    pub fn new(kind: CipherKind, master_key: &[u8]) -> Result<Self> {
        let mut salt = vec![0u8; kind.salt_len()];
        getrandom::getrandom(&mut salt).map_err(|e| Error::crypto(e.to_string()))?;
        Self::with_salt(kind, master_key, salt)
    }

    /// Construct with a caller-provided salt. Production paths use `new`;
    /// this exists so tests can pin the subkey.
    pub fn with_salt(kind: CipherKind, master_key: &[u8], salt: Vec<u8>) -> Result<Self> {
        if salt.len() != kind.salt_len() {
            return Err(Error::crypto(format!(
                "salt length {} does not match cipher {}",
                salt.len(),
                kind
            )));
        }
        let subkey = derive_subkey(master_key, &salt, kind.key_len())?;
        let cipher = AeadCipher::new(kind, &subkey)?;
        Ok(Encryptor {
            cipher,
            nonce: NonceSequence::new(),
            salt,
            salt_sent: false,
        })
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Frame and seal `plain`, appending ciphertext to `out`.
    pub fn encrypt(&mut self, plain: &[u8], out: &mut BytesMut) -> Result<()> {
        if !self.salt_sent {
            out.put_slice(&self.salt);
            self.salt_sent = true;
        }

        for chunk in plain.chunks(MAX_PAYLOAD) {
            let len_cell = (chunk.len() as u16).to_be_bytes();
            let sealed_len = self.cipher.seal(self.nonce.current(), &len_cell)?;
            self.nonce.advance();

            let sealed_payload = self.cipher.seal(self.nonce.current(), chunk)?;
            self.nonce.advance();

            out.put_slice(&sealed_len);
            out.put_slice(&sealed_payload);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_master_key;

    fn encryptor(kind: CipherKind) -> Encryptor {
        let key = derive_master_key("test", kind.key_len());
        Encryptor::with_salt(kind, &key, vec![0x5Au8; kind.salt_len()]).unwrap()
    }

    #[test]
    fn test_salt_prefix_once() {
        let kind = CipherKind::Aes128Gcm;
        let mut enc = encryptor(kind);
        let mut out = BytesMut::new();
        enc.encrypt(b"ping", &mut out).unwrap();
        assert_eq!(&out[..kind.salt_len()], enc.salt());
        assert_eq!(enc.salt(), &[0x5Au8; 16][..]);

        let first_len = out.len();
        enc.encrypt(b"pong", &mut out).unwrap();
        // Second write adds exactly one frame, no second salt
        assert_eq!(out.len() - first_len, 2 + 16 + 4 + 16);
    }

    #[test]
    fn test_empty_input_emits_no_frames() {
        let kind = CipherKind::Aes256Gcm;
        let mut enc = encryptor(kind);
        let mut out = BytesMut::new();
        enc.encrypt(b"", &mut out).unwrap();
        assert_eq!(out.len(), kind.salt_len());
    }

    #[test]
    fn test_max_payload_split() {
        let kind = CipherKind::Aes128Gcm;
        let mut enc = encryptor(kind);
        let mut out = BytesMut::new();
        enc.encrypt(&vec![0xAB; 40_000], &mut out).unwrap();

        // ceil(40000 / 16383) = 3 frames: 16383, 16383, 7234
        let expected = kind.salt_len() + 3 * (2 + 16) + 40_000 + 3 * 16;
        assert_eq!(out.len(), expected);
    }

    #[test]
    fn test_nonce_sequence_across_frames() {
        // Decrypt each cell by hand at its expected counter value: frame i
        // uses nonces 2i (length) and 2i+1 (payload).
        let kind = CipherKind::ChaCha20Poly1305;
        let key = derive_master_key("test", kind.key_len());
        let salt = vec![0x11u8; kind.salt_len()];
        let mut enc = Encryptor::with_salt(kind, &key, salt.clone()).unwrap();

        let mut out = BytesMut::new();
        for _ in 0..3 {
            enc.encrypt(b"abc", &mut out).unwrap();
        }

        let subkey = derive_subkey(&key, &salt, kind.key_len()).unwrap();
        let cipher = AeadCipher::new(kind, &subkey).unwrap();
        let mut nonce = crate::crypto::NonceSequence::new();
        let mut off = kind.salt_len();
        for _ in 0..3 {
            let len_cell = cipher.open(nonce.current(), &out[off..off + 18]).unwrap();
            nonce.advance();
            let len = u16::from_be_bytes([len_cell[0], len_cell[1]]) as usize;
            assert_eq!(len, 3);
            off += 18;
            let plain = cipher
                .open(nonce.current(), &out[off..off + len + 16])
                .unwrap();
            nonce.advance();
            assert_eq!(plain, b"abc");
            off += len + 16;
        }
        assert_eq!(off, out.len());
    }
}
