//! Length-prefixed framing for byte-stream transports
//!
//! WebSocket channels carry message boundaries themselves. This module is the
//! fallback for plain byte streams: each message is a 4-byte big-endian
//! length followed by the payload. When several kinds share one connection a
//! 1-byte tag (`'V'`, `'A'`, `'C'`) precedes the length.
//!
//! ```text
//! plain:   [len: u32 BE][payload ...]
//! tagged:  [tag: u8][len: u32 BE][payload ...]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetworkError;
use crate::network::ChannelKind;

const LEN_PREFIX: usize = 4;

/// Message kind marker for multiplexed streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    Video,
    Audio,
    Chat,
}

impl FrameTag {
    pub fn as_byte(self) -> u8 {
        match self {
            FrameTag::Video => b'V',
            FrameTag::Audio => b'A',
            FrameTag::Chat => b'C',
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, NetworkError> {
        match byte {
            b'V' => Ok(FrameTag::Video),
            b'A' => Ok(FrameTag::Audio),
            b'C' => Ok(FrameTag::Chat),
            other => Err(NetworkError::InvalidFrame(other)),
        }
    }
}

impl From<ChannelKind> for FrameTag {
    fn from(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Video => FrameTag::Video,
            ChannelKind::Audio => FrameTag::Audio,
            ChannelKind::Chat => FrameTag::Chat,
        }
    }
}

/// One decoded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Present only in tagged mode
    pub tag: Option<FrameTag>,
    pub payload: Bytes,
}

/// Append a plain frame to `dst`
pub fn encode_frame(payload: &[u8], max_len: usize, dst: &mut BytesMut) -> Result<(), NetworkError> {
    if payload.len() > max_len || payload.len() > u32::MAX as usize {
        return Err(NetworkError::FrameTooLarge(payload.len()));
    }
    dst.reserve(LEN_PREFIX + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Append a tagged frame to `dst`
pub fn encode_tagged(
    tag: FrameTag,
    payload: &[u8],
    max_len: usize,
    dst: &mut BytesMut,
) -> Result<(), NetworkError> {
    if payload.len() > max_len || payload.len() > u32::MAX as usize {
        return Err(NetworkError::FrameTooLarge(payload.len()));
    }
    dst.reserve(1 + LEN_PREFIX + payload.len());
    dst.put_u8(tag.as_byte());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Incremental decoder fed with arbitrary slices of the stream
pub struct FrameDecoder {
    buffer: BytesMut,
    max_len: usize,
    tagged: bool,
}

impl FrameDecoder {
    /// Decoder for single-kind streams
    pub fn plain(max_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_len,
            tagged: false,
        }
    }

    /// Decoder for multiplexed streams
    pub fn tagged(max_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_len,
            tagged: true,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet returned as a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame, or `None` until more bytes arrive. Errors are
    /// unrecoverable for the stream: the peer is out of sync.
    pub fn next_frame(&mut self) -> Result<Option<DecodedFrame>, NetworkError> {
        let header = if self.tagged { 1 + LEN_PREFIX } else { LEN_PREFIX };
        if self.buffer.len() < header {
            return Ok(None);
        }

        let tag = if self.tagged {
            Some(FrameTag::from_byte(self.buffer[0])?)
        } else {
            None
        };
        let offset = header - LEN_PREFIX;
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&self.buffer[offset..header]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > self.max_len {
            return Err(NetworkError::FrameTooLarge(len));
        }
        if self.buffer.len() < header + len {
            return Ok(None);
        }

        self.buffer.advance(header);
        let payload = self.buffer.split_to(len).freeze();
        Ok(Some(DecodedFrame { tag, payload }))
    }
}

/// Write one plain frame
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_len: usize) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    encode_frame(payload, max_len, &mut buf)?;
    writer
        .write_all(&buf)
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))
}

/// Write one tagged frame
pub async fn write_tagged<W>(
    writer: &mut W,
    tag: FrameTag,
    payload: &[u8],
    max_len: usize,
) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    encode_tagged(tag, payload, max_len, &mut buf)?;
    writer
        .write_all(&buf)
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))
}

/// Read one plain frame. `Ok(None)` means the stream ended cleanly between
/// frames.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Bytes>, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
    };
    read_payload(reader, len, max_len).await.map(Some)
}

/// Read one tagged frame. `Ok(None)` means the stream ended cleanly between
/// frames.
pub async fn read_tagged<R>(
    reader: &mut R,
    max_len: usize,
) -> Result<Option<(FrameTag, Bytes)>, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let tag = match reader.read_u8().await {
        Ok(byte) => FrameTag::from_byte(byte)?,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(NetworkError::ReceiveFailed(e.to_string())),
    };
    let len = reader
        .read_u32()
        .await
        .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))? as usize;
    let payload = read_payload(reader, len, max_len).await?;
    Ok(Some((tag, payload)))
}

async fn read_payload<R>(reader: &mut R, len: usize, max_len: usize) -> Result<Bytes, NetworkError>
where
    R: AsyncRead + Unpin,
{
    if len > max_len {
        return Err(NetworkError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
    Ok(Bytes::from(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_FRAME_LEN;
    use proptest::prelude::*;

    #[test]
    fn test_plain_layout() {
        let mut buf = BytesMut::new();
        encode_frame(b"abc", MAX_FRAME_LEN, &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_tagged_layout() {
        let mut buf = BytesMut::new();
        encode_tagged(FrameTag::Audio, &[9, 8], MAX_FRAME_LEN, &mut buf).unwrap();
        assert_eq!(&buf[..], &[b'A', 0, 0, 0, 2, 9, 8]);
    }

    #[test]
    fn test_decoder_waits_for_complete_frame() {
        let mut buf = BytesMut::new();
        encode_tagged(FrameTag::Video, b"hello", MAX_FRAME_LEN, &mut buf).unwrap();
        encode_tagged(FrameTag::Audio, b"", MAX_FRAME_LEN, &mut buf).unwrap();

        let mut decoder = FrameDecoder::tagged(MAX_FRAME_LEN);
        decoder.push(&buf[..3]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.push(&buf[3..8]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.push(&buf[8..]);

        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!(first.tag, Some(FrameTag::Video));
        assert_eq!(&first.payload[..], b"hello");

        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!(second.tag, Some(FrameTag::Audio));
        assert!(second.payload.is_empty());

        assert_eq!(decoder.next_frame().unwrap(), None);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_rejects_unknown_tag_and_oversize() {
        let mut decoder = FrameDecoder::tagged(MAX_FRAME_LEN);
        decoder.push(&[b'X', 0, 0, 0, 1, 0]);
        assert!(matches!(decoder.next_frame(), Err(NetworkError::InvalidFrame(b'X'))));

        let mut decoder = FrameDecoder::plain(4);
        decoder.push(&[0, 0, 0, 5]);
        assert!(matches!(decoder.next_frame(), Err(NetworkError::FrameTooLarge(5))));

        let mut buf = BytesMut::new();
        assert!(encode_frame(&[0; 5], 4, &mut buf).is_err());
    }

    #[tokio::test]
    async fn test_async_read_write_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            write_tagged(&mut client, FrameTag::Video, &[1; 100], MAX_FRAME_LEN).await.unwrap();
            write_tagged(&mut client, FrameTag::Audio, &[2; 3], MAX_FRAME_LEN).await.unwrap();
        });

        let (tag, payload) = read_tagged(&mut server, MAX_FRAME_LEN).await.unwrap().unwrap();
        assert_eq!(tag, FrameTag::Video);
        assert_eq!(payload.len(), 100);

        let (tag, payload) = read_tagged(&mut server, MAX_FRAME_LEN).await.unwrap().unwrap();
        assert_eq!(tag, FrameTag::Audio);
        assert_eq!(&payload[..], &[2, 2, 2]);

        writer.await.unwrap();
        assert!(read_tagged(&mut server, MAX_FRAME_LEN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 10, 1, 2]).await.unwrap();
        drop(client);

        assert!(matches!(
            read_frame(&mut server, MAX_FRAME_LEN).await,
            Err(NetworkError::ReceiveFailed(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_arbitrary_split_points(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8),
            split in 1usize..16,
        ) {
            let mut stream = BytesMut::new();
            for payload in &payloads {
                encode_frame(payload, MAX_FRAME_LEN, &mut stream).unwrap();
            }

            let mut decoder = FrameDecoder::plain(MAX_FRAME_LEN);
            let mut out = Vec::new();
            for piece in stream.chunks(split) {
                decoder.push(piece);
                while let Some(frame) = decoder.next_frame().unwrap() {
                    out.push(frame.payload.to_vec());
                }
            }
            prop_assert_eq!(out, payloads);
        }
    }
}
