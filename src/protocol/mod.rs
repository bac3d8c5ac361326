//! Wire format for frame messages.
//!
//! One WebSocket binary message carries exactly one frame: a 4-byte
//! big-endian signed 32-bit opcode followed by the raw payload. There is no
//! payload length prefix — the transport already delivers whole messages.

use thiserror::Error;

/// Wire value of the JPEG image opcode.
pub const OPCODE_JPEG: i32 = 1;

/// Kind tag of a frame. Opcodes outside the known set decode as `Unknown`
/// so newer peers can add message kinds without breaking older ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// A complete JPEG-encoded still image.
    Jpeg,
    /// An opcode this version does not understand. Carried, never acted on.
    Unknown(i32),
}

impl Opcode {
    pub fn from_wire(value: i32) -> Self {
        match value {
            OPCODE_JPEG => Opcode::Jpeg,
            other => Opcode::Unknown(other),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Opcode::Jpeg => OPCODE_JPEG,
            Opcode::Unknown(value) => value,
        }
    }
}

/// One protocol message: opcode + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Inbound bytes too short to contain an opcode. Recoverable: the offending
/// message is dropped and the receive loop continues.
#[derive(Debug, Error)]
#[error("invalid frame: {len} bytes, need at least 4")]
pub struct InvalidFrame {
    pub len: usize,
}

impl Frame {
    pub fn jpeg(payload: Vec<u8>) -> Self {
        Self {
            opcode: Opcode::Jpeg,
            payload,
        }
    }

    /// Serialize for the wire: big-endian opcode, then the payload verbatim.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.payload.len());
        data.extend_from_slice(&self.opcode.to_wire().to_be_bytes());
        data.extend_from_slice(&self.payload);
        data
    }

    /// Parse one wire message. Unknown opcodes parse successfully; only
    /// undersized input is an error.
    pub fn decode(data: &[u8]) -> Result<Self, InvalidFrame> {
        if data.len() < 4 {
            return Err(InvalidFrame { len: data.len() });
        }

        let opcode = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        Ok(Self {
            opcode: Opcode::from_wire(opcode),
            payload: data[4..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let frame = Frame::jpeg(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00]);
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_round_trip_empty_payload() {
        let frame = Frame::jpeg(Vec::new());
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(frame.encode().len(), 4);
    }

    #[test]
    fn test_wire_layout_is_big_endian() {
        let encoded = Frame::jpeg(vec![0xAB]).encode();
        assert_eq!(encoded, vec![0x00, 0x00, 0x00, 0x01, 0xAB]);
    }

    #[test]
    fn test_undersized_input_rejected() {
        for len in 0..4 {
            let err = Frame::decode(&vec![0u8; len]).unwrap_err();
            assert_eq!(err.len, len);
        }
    }

    #[test]
    fn test_unknown_opcode_is_not_an_error() {
        let mut data = 99i32.to_be_bytes().to_vec();
        data.extend_from_slice(b"future stuff");

        let frame = Frame::decode(&data).unwrap();
        assert_eq!(frame.opcode, Opcode::Unknown(99));
        assert_eq!(frame.payload, b"future stuff");

        // Unknown frames still round-trip unchanged
        assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn test_negative_opcode_round_trips() {
        let frame = Frame {
            opcode: Opcode::Unknown(-7),
            payload: vec![1, 2, 3],
        };
        assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }
}
