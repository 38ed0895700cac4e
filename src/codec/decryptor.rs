//! Decrypting half of the AEAD stream codec

use super::MAX_PAYLOAD;
use crate::crypto::{derive_subkey, AeadCipher, CipherKind, NonceSequence};
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

enum DecryptState {
    /// Waiting for the salt prefix
    WaitSalt,
    /// Waiting for a sealed 2-byte length cell
    ReadLength,
    /// Waiting for a sealed payload of the decrypted length
    ReadData { len: usize },
}

/// Incremental AEAD frame decoder.
///
/// Input may arrive in arbitrary chunks; a single carry buffer holds the
/// bytes of the cell currently being assembled. Decoded plaintext
/// accumulates until pulled. Any authentication or framing failure is
/// terminal: every later call returns the same error and no further
/// plaintext is produced.
///
/// With `with_hold` (server peer), the first frame's plaintext is captured
/// out-of-band via `take_first_payload` and later frames are withheld until
/// `resume`, covering the window in which the upstream connection is
/// established.
pub struct Decryptor {
    kind: CipherKind,
    master_key: Bytes,
    cipher: Option<AeadCipher>,
    nonce: NonceSequence,
    state: DecryptState,
    carry: BytesMut,
    pending: BytesMut,
    hold: bool,
    first_payload: Option<Bytes>,
    held: BytesMut,
    failed: bool,
}

impl Decryptor {
    pub fn new(kind: CipherKind, master_key: Bytes) -> Self {
        Decryptor {
            kind,
            master_key,
            cipher: None,
            nonce: NonceSequence::new(),
            state: DecryptState::WaitSalt,
            carry: BytesMut::new(),
            pending: BytesMut::new(),
            hold: false,
            first_payload: None,
            held: BytesMut::new(),
            failed: false,
        }
    }

    /// Enable first-payload hold mode (server peer).
    pub fn with_hold(mut self) -> Self {
        self.hold = true;
        self
    }

    /// Feed raw ciphertext bytes and decode as many complete cells as the
    /// carry buffer allows.
    pub fn push(&mut self, input: &[u8]) -> Result<()> {
        if self.failed {
            return Err(Error::crypto("decrypt stream already failed"));
        }
        self.carry.extend_from_slice(input);

        loop {
            match self.state {
                DecryptState::WaitSalt => {
                    let salt_len = self.kind.salt_len();
                    if self.carry.len() < salt_len {
                        break;
                    }
                    let salt = self.carry.split_to(salt_len);
                    let subkey = match derive_subkey(&self.master_key, &salt, self.kind.key_len())
                    {
                        Ok(subkey) => subkey,
                        Err(e) => {
                            self.failed = true;
                            return Err(e);
                        }
                    };
                    let cipher = match AeadCipher::new(self.kind, &subkey) {
                        Ok(cipher) => cipher,
                        Err(e) => {
                            self.failed = true;
                            return Err(e);
                        }
                    };
                    self.cipher = Some(cipher);
                    self.state = DecryptState::ReadLength;
                }
                DecryptState::ReadLength => {
                    let need = 2 + self.kind.tag_len();
                    if self.carry.len() < need {
                        break;
                    }
                    let sealed = self.carry.split_to(need);
                    let cipher = self
                        .cipher
                        .as_ref()
                        .ok_or_else(|| Error::crypto("decrypt before salt"))?;
                    let len_cell = match cipher.open(self.nonce.current(), &sealed) {
                        Ok(cell) => cell,
                        Err(e) => {
                            self.failed = true;
                            return Err(e);
                        }
                    };
                    let len = u16::from_be_bytes([len_cell[0], len_cell[1]]) as usize;
                    // Validate before advancing the nonce so counter state
                    // stays consistent with frames actually accepted.
                    if len == 0 || len > MAX_PAYLOAD {
                        self.failed = true;
                        return Err(Error::protocol(format!(
                            "invalid frame payload length: {}",
                            len
                        )));
                    }
                    self.nonce.advance();
                    self.state = DecryptState::ReadData { len };
                }
                DecryptState::ReadData { len } => {
                    let need = len + self.kind.tag_len();
                    if self.carry.len() < need {
                        break;
                    }
                    let sealed = self.carry.split_to(need);
                    let cipher = self
                        .cipher
                        .as_ref()
                        .ok_or_else(|| Error::crypto("decrypt before salt"))?;
                    let plain = match cipher.open(self.nonce.current(), &sealed) {
                        Ok(plain) => plain,
                        Err(e) => {
                            self.failed = true;
                            return Err(e);
                        }
                    };
                    self.nonce.advance();
                    self.deliver(plain);
                    self.state = DecryptState::ReadLength;
                }
            }
        }

        Ok(())
    }

    fn deliver(&mut self, plain: Vec<u8>) {
        if self.hold {
            if self.first_payload.is_none() {
                self.first_payload = Some(Bytes::from(plain));
            } else {
                self.held.put_slice(&plain);
            }
        } else {
            self.pending.put_slice(&plain);
        }
    }

    /// Take the first frame's plaintext, once available (hold mode only).
    pub fn take_first_payload(&mut self) -> Option<Bytes> {
        self.first_payload.take()
    }

    /// End hold mode; plaintext withheld since the first frame becomes
    /// pullable. Idempotent, but the hold window exists once per session.
    pub fn resume(&mut self) {
        if self.hold {
            self.hold = false;
            if !self.held.is_empty() {
                let held = std::mem::take(&mut self.held);
                self.pending.unsplit(held);
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.hold && !self.pending.is_empty()
    }

    /// Pull up to `max` bytes of decoded plaintext.
    pub fn pull(&mut self, max: usize) -> Bytes {
        if self.hold {
            return Bytes::new();
        }
        let n = max.min(self.pending.len());
        self.pending.split_to(n).freeze()
    }

    /// Bytes currently sitting in the carry buffer (always smaller than the
    /// active cell's expected size once `push` returns).
    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }
}
