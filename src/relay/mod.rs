//! Full-duplex relay with inactivity teardown
//!
//! One call owns both endpoints for the rest of the session. The first
//! direction to finish (EOF, error, decrypt failure surfacing as an IO
//! error, or the idle timer) ends the session, and both endpoints drop
//! and close together on return. Nothing is ever retried here.

use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Pipe `a` and `b` into each other until either side ends.
///
/// Returns `(a_to_b_bytes, b_to_a_bytes)` on a clean EOF.
pub async fn pipe<A, B>(a: A, b: B, idle: Duration) -> Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ar, mut aw) = tokio::io::split(a);
    let (mut br, mut bw) = tokio::io::split(b);

    let a_to_b = AtomicU64::new(0);
    let b_to_a = AtomicU64::new(0);

    let result = tokio::select! {
        r = copy_with_idle(&mut ar, &mut bw, idle, &a_to_b) => r,
        r = copy_with_idle(&mut br, &mut aw, idle, &b_to_a) => r,
    };

    let sent = a_to_b.load(Ordering::Relaxed);
    let received = b_to_a.load(Ordering::Relaxed);
    result.map(|_| (sent, received))
}

/// Copy until EOF, resetting the idle deadline on every read.
async fn copy_with_idle<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle: Duration,
    total: &AtomicU64,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = timeout(idle, reader.read(&mut buf))
            .await
            .map_err(|_| Error::timeout("session idle timeout"))??;
        if n == 0 {
            let _ = writer.shutdown().await;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        // Framing writers stage ciphertext internally; drain it before
        // parking on the next read or the tail never leaves the process.
        writer.flush().await?;
        total.fetch_add(n as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_pipe_both_directions() {
        let (client, client_far) = tokio::io::duplex(4096);
        let (server, server_far) = tokio::io::duplex(4096);

        let relay = tokio::spawn(pipe(client_far, server_far, Duration::from_secs(5)));

        let mut client = client;
        let mut server = server;

        client.write_all(b"ping").await.unwrap();
        let mut got = [0u8; 4];
        server.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"ping");

        server.write_all(b"pong").await.unwrap();
        client.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"pong");

        // EOF on one side ends the session; the relay reports totals.
        drop(client);
        drop(server);
        let (sent, received) = relay.await.unwrap().unwrap();
        assert_eq!(sent, 4);
        assert_eq!(received, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipe_idle_timeout() {
        let (_client, client_far) = tokio::io::duplex(4096);
        let (_server, server_far) = tokio::io::duplex(4096);

        let result = pipe(client_far, server_far, Duration::from_secs(300)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_pipe_eof_closes_peer() {
        let (client, client_far) = tokio::io::duplex(4096);
        let (mut server, server_far) = tokio::io::duplex(4096);

        let relay = tokio::spawn(pipe(client_far, server_far, Duration::from_secs(5)));

        // Client hangs up without sending anything.
        drop(client);

        // The server side sees EOF rather than hanging forever.
        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
        relay.await.unwrap().unwrap();
    }
}
