//! Wire-format definitions for the feed protocol.
//!
//! Every response frame on the feed connection is a fixed 17-byte packet and
//! every request is a fixed 2-byte frame. This module defines the on-wire
//! layout, decodes response frames into [`Packet`] values and encodes the two
//! request frames. No I/O happens here, only data transformation.
//!
//! # Packet layout
//!
//! All multi-byte integers are big-endian (network byte order).
//!
//! ```text
//! offset  size  field
//!      0     4  symbol    raw bytes, not null-terminated, padding allowed
//!      4     1  side      raw byte indicator, e.g. b'B' / b'S'
//!      5     4  quantity  i32
//!      9     4  price     i32, integer units
//!     13     4  sequence  i32, 1..N with no gaps in a healthy stream
//! ```
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Byte length of a response packet frame on the wire.
pub const PACKET_LEN: usize = 17;

/// Byte length of a request frame on the wire.
pub const REQUEST_LEN: usize = 2;

/// Call type requesting the full packet stream.
pub const CALL_STREAM_ALL: u8 = 1;

/// Call type requesting the resend of a single sequence.
pub const CALL_RESEND: u8 = 2;

// Byte offsets of each field within a packet frame.
const OFF_SYMBOL: usize = 0;
const OFF_SIDE: usize = 4;
const OFF_QUANTITY: usize = 5;
const OFF_PRICE: usize = 9;
const OFF_SEQUENCE: usize = 13;

/// A single market-data packet, immutable once decoded.
///
/// `symbol` and `side` keep the raw bytes received; no character-set or
/// enumeration validation is applied at this layer. Consumers interpret
/// semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Instrument identifier, exactly 4 bytes.
    pub symbol: [u8; 4],
    /// Buy/sell indicator as its raw byte.
    pub side: u8,
    /// Traded quantity.
    pub quantity: i32,
    /// Price in integer units (no implied decimal scaling here).
    pub price: i32,
    /// Position of this packet in the feed's logical ordering.
    pub sequence: i32,
}

/// Errors that can arise when decoding a packet frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The input is not exactly one packet frame long.
    #[error("packet frame must be 17 bytes, got {len}")]
    WrongLength { len: usize },
}

impl Packet {
    /// Parse a [`Packet`] from a raw frame of exactly [`PACKET_LEN`] bytes.
    ///
    /// Pure and deterministic; fails only on wrong input length.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() != PACKET_LEN {
            return Err(DecodeError::WrongLength { len: buf.len() });
        }
        let mut symbol = [0u8; 4];
        symbol.copy_from_slice(&buf[OFF_SYMBOL..OFF_SYMBOL + 4]);
        Ok(Packet {
            symbol,
            side: buf[OFF_SIDE],
            quantity: i32::from_be_bytes(buf[OFF_QUANTITY..OFF_QUANTITY + 4].try_into().unwrap()),
            price: i32::from_be_bytes(buf[OFF_PRICE..OFF_PRICE + 4].try_into().unwrap()),
            sequence: i32::from_be_bytes(buf[OFF_SEQUENCE..OFF_SEQUENCE + 4].try_into().unwrap()),
        })
    }

    /// Serialise this packet into its 17-byte wire representation.
    ///
    /// Exact inverse of [`Packet::decode`].
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[OFF_SYMBOL..OFF_SYMBOL + 4].copy_from_slice(&self.symbol);
        buf[OFF_SIDE] = self.side;
        buf[OFF_QUANTITY..OFF_QUANTITY + 4].copy_from_slice(&self.quantity.to_be_bytes());
        buf[OFF_PRICE..OFF_PRICE + 4].copy_from_slice(&self.price.to_be_bytes());
        buf[OFF_SEQUENCE..OFF_SEQUENCE + 4].copy_from_slice(&self.sequence.to_be_bytes());
        buf
    }

    /// The symbol as text, lossy where the raw bytes are not UTF-8.
    pub fn symbol_str(&self) -> String {
        String::from_utf8_lossy(&self.symbol).into_owned()
    }
}

/// Encode the 2-byte "stream all packets" request frame.
///
/// The second byte is reserved and must be present on the wire.
pub fn stream_all_request() -> [u8; REQUEST_LEN] {
    [CALL_STREAM_ALL, 0]
}

/// Encode the 2-byte "resend one packet" request frame.
///
/// Only the low 8 bits of `sequence` travel on the wire, so resend targets
/// above 255 are not addressable by this request format.
pub fn resend_request(sequence: i32) -> [u8; REQUEST_LEN] {
    [CALL_RESEND, sequence as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet {
            symbol: *b"AAPL",
            side: b'B',
            quantity: 50,
            price: 100,
            sequence: 1,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = sample();
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn decode_reads_fields_at_fixed_offsets() {
        let mut buf = [0u8; PACKET_LEN];
        buf[..4].copy_from_slice(b"MSFT");
        buf[4] = b'S';
        buf[5..9].copy_from_slice(&[0, 0, 0, 42]);
        buf[9..13].copy_from_slice(&[0, 0, 0, 55]);
        buf[13..17].copy_from_slice(&[0, 0, 0, 7]);
        let pkt = Packet::decode(&buf).unwrap();
        assert_eq!(pkt.symbol, *b"MSFT");
        assert_eq!(pkt.side, b'S');
        assert_eq!(pkt.quantity, 42);
        assert_eq!(pkt.price, 55);
        assert_eq!(pkt.sequence, 7);
    }

    #[test]
    fn decode_is_twos_complement() {
        let mut buf = [0u8; PACKET_LEN];
        buf[5..9].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        let pkt = Packet::decode(&buf).unwrap();
        assert_eq!(pkt.quantity, -1);
    }

    #[test]
    fn decode_rejects_wrong_lengths() {
        assert_eq!(
            Packet::decode(&[]),
            Err(DecodeError::WrongLength { len: 0 })
        );
        assert_eq!(
            Packet::decode(&[0u8; PACKET_LEN - 1]),
            Err(DecodeError::WrongLength { len: 16 })
        );
        assert_eq!(
            Packet::decode(&[0u8; PACKET_LEN + 1]),
            Err(DecodeError::WrongLength { len: 18 })
        );
    }

    #[test]
    fn encode_is_big_endian_on_wire() {
        let pkt = Packet {
            sequence: 0x0102_0304,
            ..sample()
        };
        let bytes = pkt.encode();
        assert_eq!(&bytes[13..17], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn raw_symbol_and_side_bytes_survive() {
        let pkt = Packet {
            symbol: [0x00, 0xFF, b' ', b'X'],
            side: 0xA5,
            ..sample()
        };
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded.symbol, [0x00, 0xFF, b' ', b'X']);
        assert_eq!(decoded.side, 0xA5);
    }

    #[test]
    fn stream_all_request_bytes() {
        assert_eq!(stream_all_request(), [1, 0]);
    }

    #[test]
    fn resend_request_sends_low_byte_only() {
        assert_eq!(resend_request(3), [2, 3]);
        assert_eq!(resend_request(255), [2, 255]);
        // 300 = 0x12C; only the low 8 bits fit in the request frame.
        assert_eq!(resend_request(300), [2, 0x2C]);
    }
}
