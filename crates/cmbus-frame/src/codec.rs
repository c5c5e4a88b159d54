use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

/// Default stream buffer capacity: the most a receiver reads per envelope.
pub const DEFAULT_BUFFER_CAPACITY: usize = 32 * 1024;

/// Marker byte announcing a 4-byte length.
const LONG_SIZE_MARKER: u8 = 0xFF;

/// Size of the length header in front of each envelope on a byte stream.
pub const ENVELOPE_HEADER_LEN: usize = 4;

/// Serialize an envelope's frames into one contiguous buffer.
///
/// Wire format, repeated per frame:
/// ```text
/// ┌────────────────────────────┬──────────────┐
/// │ Size                       │ Frame bytes  │
/// │ 1B if < 255                │ (Size bytes) │
/// │ else 0xFF + 4B big-endian  │              │
/// └────────────────────────────┴──────────────┘
/// ```
pub fn encode_envelope(envelope: &Envelope, dst: &mut BytesMut) -> Result<()> {
    dst.reserve(encoded_len(envelope));
    for frame in envelope.frames() {
        let len = frame.len();
        if len < usize::from(LONG_SIZE_MARKER) {
            dst.put_u8(len as u8);
        } else {
            let len = u32::try_from(len).map_err(|_| {
                FrameError::InvalidArgument(format!("frame too large ({len} bytes)"))
            })?;
            dst.put_u8(LONG_SIZE_MARKER);
            dst.put_u32(len);
        }
        dst.put_slice(frame);
    }
    Ok(())
}

/// Number of bytes `encode_envelope` produces for `envelope`.
pub fn encoded_len(envelope: &Envelope) -> usize {
    envelope
        .frames()
        .iter()
        .map(|frame| {
            let prefix = if frame.len() < usize::from(LONG_SIZE_MARKER) { 1 } else { 5 };
            prefix + frame.len()
        })
        .sum()
}

/// Rebuild an envelope from one buffer produced by `encode_envelope`.
///
/// A buffer that ends inside a size prefix or a frame is a protocol error.
pub fn decode_envelope(mut src: &[u8]) -> Result<Envelope> {
    let mut envelope = Envelope::new();

    while src.has_remaining() {
        let mut len = usize::from(src.get_u8());
        if len == usize::from(LONG_SIZE_MARKER) {
            if src.remaining() < 4 {
                return Err(FrameError::Protocol(
                    "truncated frame size prefix".to_string(),
                ));
            }
            len = src.get_u32() as usize;
        }
        if src.remaining() < len {
            return Err(FrameError::Protocol(format!(
                "truncated frame ({len} bytes declared, {} available)",
                src.remaining()
            )));
        }
        envelope.push(Bytes::copy_from_slice(&src[..len]));
        src.advance(len);
    }

    Ok(envelope)
}

/// Serialize one envelope for a byte stream.
///
/// ```text
/// ┌──────────────────────┬───────────────────────────┐
/// │ Body length          │ Body                      │
/// │ 4B big-endian        │ `encode_envelope` output  │
/// └──────────────────────┴───────────────────────────┘
/// ```
pub fn encode_stream_envelope(envelope: &Envelope, dst: &mut BytesMut) -> Result<()> {
    let len = encoded_len(envelope);
    let header = u32::try_from(len).map_err(|_| {
        FrameError::InvalidArgument(format!("envelope too large ({len} bytes)"))
    })?;
    dst.reserve(ENVELOPE_HEADER_LEN + len);
    dst.put_u32(header);
    encode_envelope(envelope, dst)
}

/// Take one complete envelope off the front of `src`.
///
/// Returns `Ok(None)` until the whole body is buffered. Bytes past the body
/// stay in `src` for the next call. A body longer than `max_len` is a
/// protocol error.
pub fn decode_stream_envelope(src: &mut BytesMut, max_len: usize) -> Result<Option<Envelope>> {
    if src.len() < ENVELOPE_HEADER_LEN {
        return Ok(None);
    }

    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len > max_len {
        return Err(FrameError::Protocol(format!(
            "envelope of {len} bytes exceeds stream capacity {max_len}"
        )));
    }

    let total = ENVELOPE_HEADER_LEN + len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(ENVELOPE_HEADER_LEN);
    let body = src.split_to(len);
    decode_envelope(&body).map(Some)
}

/// Configuration for the byte-stream carrier.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Largest serialized envelope body, in bytes. Default: 32 KiB.
    pub buffer_capacity: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_frames_use_one_byte_prefix() {
        let env = Envelope::from_frames(["hop", "", "kvs.get"]);
        let mut buf = BytesMut::new();
        encode_envelope(&env, &mut buf).unwrap();

        assert_eq!(&buf[..], b"\x03hop\x00\x07kvs.get");
        assert_eq!(buf.len(), encoded_len(&env));
    }

    #[test]
    fn long_frame_uses_marker_and_big_endian_length() {
        let data = vec![0xAB; 300];
        let env = Envelope::from_frames([Bytes::from_static(b"t"), Bytes::from(data.clone())]);
        let mut buf = BytesMut::new();
        encode_envelope(&env, &mut buf).unwrap();

        assert_eq!(&buf[2..7], &[0xFF, 0x00, 0x00, 0x01, 0x2C]);
        assert_eq!(buf.len(), encoded_len(&env));

        let decoded = decode_envelope(&buf).unwrap();
        assert_eq!(decoded.frame(1).unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn boundary_at_254_and_255() {
        let env = Envelope::from_frames([vec![1u8; 254], vec![2u8; 255]]);
        let mut buf = BytesMut::new();
        encode_envelope(&env, &mut buf).unwrap();

        assert_eq!(buf[0], 254);
        assert_eq!(buf[255], 0xFF);
        assert_eq!(decode_envelope(&buf).unwrap(), env);
    }

    #[test]
    fn delimiter_survives_serialization() {
        let env = Envelope::from_frames(["a", "", "tag", "{}", "data"]);
        let mut buf = BytesMut::new();
        encode_envelope(&env, &mut buf).unwrap();

        let decoded = decode_envelope(&buf).unwrap();
        assert_eq!(decoded, env);
        assert!(decoded.frame(1).unwrap().is_empty());
    }

    #[test]
    fn empty_buffer_decodes_to_empty_envelope() {
        assert!(decode_envelope(&[]).unwrap().is_empty());
    }

    #[test]
    fn truncated_frame_is_protocol_error() {
        let err = decode_envelope(b"\x05abc").unwrap_err();
        assert!(matches!(err, FrameError::Protocol(_)));
    }

    #[test]
    fn truncated_long_prefix_is_protocol_error() {
        let err = decode_envelope(&[0xFF, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, FrameError::Protocol(_)));
    }

    #[test]
    fn back_to_back_stream_envelopes_decode_separately() {
        let first = Envelope::from_frames(["echo.a"]);
        let second = Envelope::from_frames(["hop", "", "echo.b", "{}"]);
        let mut buf = BytesMut::new();
        encode_stream_envelope(&first, &mut buf).unwrap();
        encode_stream_envelope(&second, &mut buf).unwrap();

        assert_eq!(decode_stream_envelope(&mut buf, 1024).unwrap(), Some(first));
        assert_eq!(decode_stream_envelope(&mut buf, 1024).unwrap(), Some(second));
        assert!(buf.is_empty());
        assert_eq!(decode_stream_envelope(&mut buf, 1024).unwrap(), None);
    }

    #[test]
    fn partial_stream_envelope_is_kept() {
        let env = Envelope::from_frames(["kvs.get", "{\"key\":\"a\"}"]);
        let mut wire = BytesMut::new();
        encode_stream_envelope(&env, &mut wire).unwrap();
        assert_eq!(&wire[..4], &(encoded_len(&env) as u32).to_be_bytes());

        let mut buf = BytesMut::from(&wire[..6]);
        assert_eq!(decode_stream_envelope(&mut buf, 1024).unwrap(), None);
        assert_eq!(buf.len(), 6);

        buf.extend_from_slice(&wire[6..]);
        assert_eq!(decode_stream_envelope(&mut buf, 1024).unwrap(), Some(env));
    }

    #[test]
    fn oversized_stream_envelope_is_protocol_error() {
        let env = Envelope::from_frames(["kvs.put", "{}", "0123456789"]);
        let mut buf = BytesMut::new();
        encode_stream_envelope(&env, &mut buf).unwrap();

        let err = decode_stream_envelope(&mut buf, 10).unwrap_err();
        assert!(matches!(err, FrameError::Protocol(_)));
    }
}
