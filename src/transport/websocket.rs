//! WebSocket transport bridge
//!
//! Each binary message is an opaque slice of the tunnel byte stream: writes
//! become one binary frame, received binary payloads are appended to the
//! read side. Control frames never surface to the codec.

use crate::{Error, Result};
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};
use rand::Rng;
use sha1::{Digest, Sha1};
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Refuse frames that declare more than this; the tunnel never produces them
const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl TryFrom<u8> for OpCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::protocol(format!(
                "unknown WebSocket opcode: {}",
                value
            ))),
        }
    }
}

/// Apply WebSocket masking in place
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

fn generate_mask_key() -> [u8; 4] {
    rand::thread_rng().gen()
}

fn compute_accept(key_b64: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key_b64.as_bytes());
    hasher.update(WS_GUID);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

fn write_frame_header(buf: &mut BytesMut, opcode: OpCode, payload_len: usize, mask: Option<[u8; 4]>) {
    buf.put_u8(0x80 | opcode as u8);

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    if payload_len < 126 {
        buf.put_u8(mask_bit | payload_len as u8);
    } else if payload_len <= u16::MAX as usize {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(payload_len as u64);
    }

    if let Some(key) = mask {
        buf.put_slice(&key);
    }
}

/// Try to take one complete frame out of `buf`. Returns `None` (consuming
/// nothing) until the whole frame is buffered.
fn parse_frame(buf: &mut BytesMut) -> Result<Option<(OpCode, BytesMut)>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let opcode = OpCode::try_from(buf[0] & 0x0F)?;
    let masked = buf[1] & 0x80 != 0;
    let len7 = (buf[1] & 0x7F) as usize;

    let mut header_len = 2;
    let payload_len = match len7 {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            header_len += 2;
            u16::from_be_bytes([buf[2], buf[3]]) as usize
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            header_len += 8;
            let mut be = [0u8; 8];
            be.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(be);
            if len > MAX_FRAME_PAYLOAD as u64 {
                return Err(Error::protocol(format!("WebSocket frame too large: {}", len)));
            }
            len as usize
        }
        n => n,
    };

    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(Error::protocol(format!(
            "WebSocket frame too large: {}",
            payload_len
        )));
    }

    let mask_key = if masked {
        if buf.len() < header_len + 4 {
            return Ok(None);
        }
        let key = [
            buf[header_len],
            buf[header_len + 1],
            buf[header_len + 2],
            buf[header_len + 3],
        ];
        header_len += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < header_len + payload_len {
        return Ok(None);
    }

    buf.advance(header_len);
    let mut payload = buf.split_to(payload_len);
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }
    Ok(Some((opcode, payload)))
}

/// WebSocket connection as a plain byte duplex
pub struct WsStream<S> {
    inner: S,
    read_buf: BytesMut,
    pending: BytesMut,
    write_buf: BytesMut,
    mask_frames: bool,
    peer_closed: bool,
    close_queued: bool,
}

impl<S> WsStream<S> {
    /// `mask_frames` is true on the client side; servers send unmasked.
    pub fn new(inner: S, mask_frames: bool) -> Self {
        WsStream {
            inner,
            read_buf: BytesMut::with_capacity(4096),
            pending: BytesMut::new(),
            write_buf: BytesMut::new(),
            mask_frames,
            peer_closed: false,
            close_queued: false,
        }
    }

    fn frame_payload(&mut self, opcode: OpCode, payload: &[u8]) {
        let mask = self.mask_frames.then(generate_mask_key);
        write_frame_header(&mut self.write_buf, opcode, payload.len(), mask);
        match mask {
            Some(key) => {
                let start = self.write_buf.len();
                self.write_buf.put_slice(payload);
                apply_mask(&mut self.write_buf[start..], key);
            }
            None => self.write_buf.put_slice(payload),
        }
    }

    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>
    where
        S: AsyncWrite + Unpin,
    {
        while !self.write_buf.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.write_buf))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "write zero",
                )));
            }
            self.write_buf.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for WsStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.pending.is_empty() {
                let n = buf.remaining().min(this.pending.len());
                buf.put_slice(&this.pending.split_to(n));
                return Poll::Ready(Ok(()));
            }

            if this.peer_closed {
                return Poll::Ready(Ok(()));
            }

            match parse_frame(&mut this.read_buf) {
                Ok(Some((opcode, payload))) => {
                    match opcode {
                        OpCode::Binary | OpCode::Continuation => {
                            this.pending.unsplit(payload);
                        }
                        OpCode::Close => this.peer_closed = true,
                        OpCode::Ping | OpCode::Pong => {}
                        OpCode::Text => {
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "unexpected text frame on tunnel",
                            )))
                        }
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => return Poll::Ready(Err(e.into())),
            }

            let mut tmp = [0u8; 4096];
            let mut tmp_buf = ReadBuf::new(&mut tmp);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut tmp_buf))?;
            let filled = tmp_buf.filled();
            if filled.is_empty() {
                this.peer_closed = true;
                return Poll::Ready(Ok(()));
            }
            this.read_buf.extend_from_slice(filled);
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for WsStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        ready!(this.poll_drain(cx))?;

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        this.frame_payload(OpCode::Binary, buf);
        let _ = this.poll_drain(cx)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.close_queued {
            this.frame_payload(OpCode::Close, &[]);
            this.close_queued = true;
        }
        ready!(this.poll_drain(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

/// Perform the client side of the WebSocket upgrade
pub async fn client_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    path: &str,
) -> Result<()> {
    let ws_key: [u8; 16] = rand::thread_rng().gen();
    let ws_key_b64 = base64::engine::general_purpose::STANDARD.encode(ws_key);

    let request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        path, host, ws_key_b64
    );
    stream.write_all(request.as_bytes()).await?;

    let response = read_http_head(stream).await?;
    if !response.starts_with("HTTP/1.1 101") {
        return Err(Error::protocol(format!(
            "WebSocket handshake failed: {}",
            response.lines().next().unwrap_or("unknown")
        )));
    }

    let expected_accept = compute_accept(&ws_key_b64);
    let accept_header = response
        .lines()
        .find(|line| line.to_lowercase().starts_with("sec-websocket-accept:"))
        .and_then(|line| line.split(':').nth(1))
        .map(|v| v.trim());

    if accept_header != Some(expected_accept.as_str()) {
        return Err(Error::protocol("invalid Sec-WebSocket-Accept"));
    }

    debug!("WebSocket client handshake completed");
    Ok(())
}

/// Perform the server side of the WebSocket upgrade
pub async fn server_handshake<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> Result<()> {
    let request = read_http_head(stream).await?;

    let first_line = request.lines().next().unwrap_or("");
    if !first_line.starts_with("GET ") {
        return Err(Error::protocol(format!(
            "not a WebSocket upgrade: {}",
            first_line
        )));
    }

    let upgrade = request
        .lines()
        .find(|line| line.to_lowercase().starts_with("upgrade:"))
        .map(|line| line[8..].trim().to_lowercase());
    if upgrade.as_deref() != Some("websocket") {
        return Err(Error::protocol("missing Upgrade: websocket header"));
    }

    let key = request
        .lines()
        .find(|line| line.to_lowercase().starts_with("sec-websocket-key:"))
        .and_then(|line| line.split(':').nth(1))
        .map(|v| v.trim().to_string())
        .ok_or_else(|| Error::protocol("missing Sec-WebSocket-Key"))?;

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        compute_accept(&key)
    );
    stream.write_all(response.as_bytes()).await?;

    debug!("WebSocket server handshake completed");
    Ok(())
}

/// Read an HTTP head (request or response) up to the blank line
async fn read_http_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String> {
    let mut head = String::new();
    let mut buf = [0u8; 1];
    loop {
        stream.read_exact(&mut buf).await?;
        head.push(buf[0] as char);
        if head.ends_with("\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > 4096 {
            return Err(Error::protocol("HTTP head too long"));
        }
    }
}
