//! `CryptoStream`: the AEAD codec bound to a byte duplex

use super::{Decryptor, Encryptor};
use crate::crypto::CipherKind;
use crate::Result;
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Wraps any byte duplex so reads decrypt and writes encrypt.
///
/// The relay engine sees only this; whether the underlying transport is a
/// TCP socket or a WebSocket bridge is invisible here.
pub struct CryptoStream<S> {
    inner: S,
    encryptor: Encryptor,
    decryptor: Decryptor,
    write_buf: BytesMut,
    read_eof: bool,
}

impl<S> CryptoStream<S> {
    pub fn new(inner: S, kind: CipherKind, master_key: Bytes) -> Result<Self> {
        let encryptor = Encryptor::new(kind, &master_key)?;
        let decryptor = Decryptor::new(kind, master_key);
        Ok(Self::from_parts(inner, encryptor, decryptor))
    }

    /// Assemble from codec halves that already carry session state; the
    /// server peer hands over a decryptor that consumed the first payload.
    pub fn from_parts(inner: S, encryptor: Encryptor, decryptor: Decryptor) -> Self {
        CryptoStream {
            inner,
            encryptor,
            decryptor,
            write_buf: BytesMut::new(),
            read_eof: false,
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for CryptoStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.decryptor.has_pending() {
                let chunk = this.decryptor.pull(buf.remaining());
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            if this.read_eof {
                return Poll::Ready(Ok(()));
            }

            let mut tmp = [0u8; 4096];
            let mut tmp_buf = ReadBuf::new(&mut tmp);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut tmp_buf))?;
            let filled = tmp_buf.filled();
            if filled.is_empty() {
                this.read_eof = true;
                return Poll::Ready(Ok(()));
            }

            if let Err(e) = this.decryptor.push(filled) {
                return Poll::Ready(Err(e.into()));
            }
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for CryptoStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        // Previously framed ciphertext must fully reach the transport
        // before new plaintext is accepted.
        while !this.write_buf.is_empty() {
            let n = ready!(Pin::new(&mut this.inner).poll_write(cx, &this.write_buf))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write zero",
                )));
            }
            this.write_buf.advance(n);
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if let Err(e) = this.encryptor.encrypt(buf, &mut this.write_buf) {
            return Poll::Ready(Err(e.into()));
        }

        // Opportunistic drain; leftovers go out on the next write or flush.
        while !this.write_buf.is_empty() {
            match Pin::new(&mut this.inner).poll_write(cx, &this.write_buf) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write zero",
                    )))
                }
                Poll::Ready(Ok(n)) => this.write_buf.advance(n),
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => break,
            }
        }

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while !this.write_buf.is_empty() {
            let n = ready!(Pin::new(&mut this.inner).poll_write(cx, &this.write_buf))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write zero",
                )));
            }
            this.write_buf.advance(n);
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.as_mut().poll_flush(cx))?;
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_master_key;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn stream_pair(
        kind: CipherKind,
        password: &str,
    ) -> (
        CryptoStream<tokio::io::DuplexStream>,
        CryptoStream<tokio::io::DuplexStream>,
    ) {
        let key = derive_master_key(password, kind.key_len());
        let (a, b) = tokio::io::duplex(64 * 1024);
        let left = CryptoStream::new(a, kind, key.clone()).unwrap();
        let right = CryptoStream::new(b, kind, key).unwrap();
        (left, right)
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let (mut left, mut right) = stream_pair(CipherKind::Aes128Gcm, "stream");

        left.write_all(b"ping").await.unwrap();
        left.flush().await.unwrap();

        let mut got = [0u8; 4];
        right.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"ping");

        right.write_all(b"pong").await.unwrap();
        right.flush().await.unwrap();
        left.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"pong");
    }

    #[tokio::test]
    async fn test_stream_large_transfer() {
        let (mut left, mut right) = stream_pair(CipherKind::ChaCha20Poly1305, "bulk");
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 239) as u8).collect();

        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            left.write_all(&payload).await.unwrap();
            left.shutdown().await.unwrap();
        });

        let mut got = Vec::new();
        right.read_to_end(&mut got).await.unwrap();
        writer.await.unwrap();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_stream_rejects_garbage() {
        let kind = CipherKind::Aes256Gcm;
        let key = derive_master_key("garbage", kind.key_len());
        let (a, mut b) = tokio::io::duplex(4096);
        let mut crypto = CryptoStream::new(a, kind, key).unwrap();

        // Salt-sized noise followed by bytes that cannot authenticate.
        b.write_all(&[0x99u8; 128]).await.unwrap();
        b.flush().await.unwrap();

        let mut buf = [0u8; 16];
        assert!(crypto.read(&mut buf).await.is_err());
    }
}
