//! Length-prefixed text framing codec.
//!
//! Frames are a 2-byte big-endian payload length followed by exactly that
//! many bytes of UTF-8 text. The length field caps payloads at 65,535 bytes;
//! oversized payloads are rejected at encode time, never truncated.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::NetError;

/// Header size: 2-byte big-endian payload length.
const HEADER_SIZE: usize = 2;

/// Largest payload the length field can represent.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Reserved payload acknowledging a just-accepted connection. An ordinary
/// frame on the wire; any special meaning belongs to the application layer.
pub const CONFIRM_TAG: &str = "[CONFIRM]";

/// Reserved payload that ends the receiving side's decode loop.
pub const CLOSE_SENTINEL: &str = "CLOSE";

/// Codec for length-prefixed UTF-8 text framing.
#[derive(Debug, Default)]
pub struct TextCodec {
    /// Expected length of the current payload (if the header has been read).
    current_length: Option<usize>,
}

impl TextCodec {
    /// Create a new text codec.
    pub fn new() -> Self {
        Self {
            current_length: None,
        }
    }
}

impl Decoder for TextCodec {
    type Item = String;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, NetError> {
        // If we don't have the length yet, try to read the header
        if self.current_length.is_none() {
            if src.len() < HEADER_SIZE {
                // Not enough data for header
                return Ok(None);
            }

            let length = u16::from_be_bytes([src[0], src[1]]) as usize;
            self.current_length = Some(length);
        }

        let length = self.current_length.unwrap();

        // Check if we have the full payload
        if src.len() < HEADER_SIZE + length {
            // Reserve space for the full frame to avoid reallocations
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        // Skip header and extract payload bytes
        src.advance(HEADER_SIZE);
        let payload_bytes = src.split_to(length);

        // Reset state for next frame
        self.current_length = None;

        let payload = String::from_utf8(payload_bytes.to_vec())?;
        Ok(Some(payload))
    }
}

impl Encoder<String> for TextCodec {
    type Error = NetError;

    fn encode(&mut self, payload: String, dst: &mut BytesMut) -> Result<(), NetError> {
        let bytes = payload.as_bytes();

        if bytes.len() > MAX_PAYLOAD_SIZE {
            return Err(NetError::PayloadTooLarge {
                size: bytes.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        dst.reserve(HEADER_SIZE + bytes.len());
        dst.put_u16(bytes.len() as u16);
        dst.put_slice(bytes);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_ascii() {
        let mut codec = TextCodec::new();
        let original = "hello".to_string();

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_roundtrip_empty_payload() {
        let mut codec = TextCodec::new();

        let mut buf = BytesMut::new();
        codec.encode(String::new(), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, "");
    }

    #[test]
    fn test_roundtrip_multibyte_utf8() {
        let mut codec = TextCodec::new();
        let original = "påckmän ⟂ 迷路".to_string();

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_wire_layout() {
        let mut codec = TextCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("abc".to_string(), &mut buf).unwrap();

        assert_eq!(&buf[..], &[0x00, 0x03, b'a', b'b', b'c']);
    }

    #[test]
    fn test_partial_header() {
        let mut codec = TextCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u8(0x00);
        // Only 1 byte, not enough for header

        let result = codec.decode(&mut buf).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_partial_payload() {
        let mut codec = TextCodec::new();
        let mut buf = BytesMut::new();

        buf.put_u16(100); // 100 bytes expected
        buf.put_slice(&[b'x'; 50]); // Only 50 bytes

        let result = codec.decode(&mut buf).unwrap();
        assert!(result.is_none());

        // Remaining bytes arrive
        buf.put_slice(&[b'x'; 50]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.len(), 100);
    }

    #[test]
    fn test_max_payload_accepted() {
        let mut codec = TextCodec::new();
        let payload = "a".repeat(MAX_PAYLOAD_SIZE);

        let mut buf = BytesMut::new();
        codec.encode(payload.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + MAX_PAYLOAD_SIZE);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut codec = TextCodec::new();
        let payload = "a".repeat(MAX_PAYLOAD_SIZE + 1);

        let mut buf = BytesMut::new();
        let result = codec.encode(payload, &mut buf);
        assert!(matches!(result, Err(NetError::PayloadTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut codec = TextCodec::new();
        let mut buf = BytesMut::new();

        buf.put_u16(2);
        buf.put_slice(&[0xFF, 0xFE]);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(NetError::InvalidUtf8(_))));
    }

    #[test]
    fn test_multiple_frames() {
        let mut codec = TextCodec::new();
        let mut buf = BytesMut::new();

        codec.encode("first".to_string(), &mut buf).unwrap();
        codec.encode("second".to_string(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "first");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "second");
        assert!(buf.is_empty());
    }
}
