//! Chunked AEAD stream framing
//!
//! Wire layout per direction, after the salt prefix:
//!
//! ```plain
//! salt (saltLen) || frame*
//! frame := seal(len as u16_be, nonce=N) || seal(payload, nonce=N+1)
//!          where 1 <= len <= 0x3FFF and each seal carries a 16-byte tag
//! ```

mod decryptor;
mod encryptor;
mod stream;

pub use decryptor::Decryptor;
pub use encryptor::Encryptor;
pub use stream::CryptoStream;

/// Largest payload a single frame may carry
pub const MAX_PAYLOAD: usize = 0x3FFF;
