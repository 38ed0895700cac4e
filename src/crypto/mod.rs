//! Cipher registry, key derivation and nonce bookkeeping

mod cipher;
mod key;
mod nonce;

pub use cipher::{AeadCipher, CipherKind};
pub use key::{derive_master_key, derive_subkey, KeyCache};
pub use nonce::NonceSequence;
