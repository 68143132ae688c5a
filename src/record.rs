//! Durable capture format for recorded feed sessions.
//!
//! A capture is a flat sequence of frames, each laid out as
//! `[len: u32 LE][crc32: u32 LE][bincode payload]`. The first frame is a
//! [`CaptureHeader`] describing the run; every following frame carries one
//! [`Packet`]. The CRC is over the payload bytes and is verified on read, so
//! a flipped bit on disk surfaces as an error instead of a silent bad trade.
use std::io::{Read, Write};

use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wire::Packet;

/// Current on-disk format version, written into every header.
pub const CAPTURE_VERSION: u16 = 1;

/// First frame of every capture file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureHeader {
    pub version: u16,
    /// Wall-clock time the capture was written, nanoseconds since the epoch.
    pub created_unix_ns: u128,
    /// Feed server the session ran against.
    pub host: String,
    pub port: u16,
    /// Highest sequence the session observed; the dataset is expected to
    /// cover `1..=max_seq`.
    pub max_seq: i32,
}

/// One frame in a capture file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CaptureFrame {
    Header(CaptureHeader),
    Packet(Packet),
}

/// Errors surfaced when writing or reading capture frames.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("capture i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame payload corrupt: crc {found:#010x} on disk, {computed:#010x} computed")]
    CrcMismatch { found: u32, computed: u32 },
    #[error("frame payload does not round-trip: {0}")]
    Codec(#[from] bincode::Error),
}

/// Append one frame to `w`.
pub fn write_frame<W: Write>(w: &mut W, frame: &CaptureFrame) -> Result<(), FrameError> {
    let payload = bincode::serialize(frame)?;
    let mut hasher = Crc32::new();
    hasher.update(&payload);
    let crc = hasher.finalize();

    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(&crc.to_le_bytes())?;
    w.write_all(&payload)?;
    Ok(())
}

/// Read the next frame from `r`, or `None` at a clean end of file.
///
/// End of file inside a frame is an error; so is a CRC mismatch.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Option<CaptureFrame>, FrameError> {
    let mut len_buf = [0u8; 4];
    if !fill_or_eof(r, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut crc_buf = [0u8; 4];
    r.read_exact(&mut crc_buf)?;
    let found = u32::from_le_bytes(crc_buf);

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;

    let mut hasher = Crc32::new();
    hasher.update(&payload);
    let computed = hasher.finalize();
    if computed != found {
        return Err(FrameError::CrcMismatch { found, computed });
    }
    Ok(Some(bincode::deserialize(&payload)?))
}

/// Fill `buf` completely, or report `false` if the reader was already at end
/// of file. End of file after a partial fill is an `UnexpectedEof` error.
fn fill_or_eof<R: Read>(r: &mut R, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "capture truncated mid-frame",
            ));
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header() -> CaptureHeader {
        CaptureHeader {
            version: CAPTURE_VERSION,
            created_unix_ns: 1_700_000_000_000_000_000,
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_seq: 2,
        }
    }

    fn packet(sequence: i32) -> Packet {
        Packet {
            symbol: *b"MSFT",
            side: b'S',
            quantity: 30,
            price: 55,
            sequence,
        }
    }

    #[test]
    fn frames_round_trip_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &CaptureFrame::Header(header())).unwrap();
        write_frame(&mut buf, &CaptureFrame::Packet(packet(1))).unwrap();
        write_frame(&mut buf, &CaptureFrame::Packet(packet(2))).unwrap();

        let mut rdr = Cursor::new(buf);
        match read_frame(&mut rdr).unwrap().unwrap() {
            CaptureFrame::Header(h) => {
                assert_eq!(h.version, CAPTURE_VERSION);
                assert_eq!(h.max_seq, 2);
            }
            CaptureFrame::Packet(_) => panic!("expected header first"),
        }
        for want in 1..=2 {
            match read_frame(&mut rdr).unwrap().unwrap() {
                CaptureFrame::Packet(p) => assert_eq!(p.sequence, want),
                CaptureFrame::Header(_) => panic!("expected a packet frame"),
            }
        }
        assert!(read_frame(&mut rdr).unwrap().is_none());
    }

    #[test]
    fn empty_input_is_a_clean_end() {
        let mut rdr = Cursor::new(Vec::new());
        assert!(read_frame(&mut rdr).unwrap().is_none());
    }

    #[test]
    fn corrupt_payload_fails_crc() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &CaptureFrame::Packet(packet(1))).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0x01;

        let mut rdr = Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut rdr),
            Err(FrameError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn truncation_mid_frame_is_an_error() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &CaptureFrame::Packet(packet(1))).unwrap();
        buf.truncate(buf.len() - 3);

        let mut rdr = Cursor::new(buf);
        assert!(matches!(read_frame(&mut rdr), Err(FrameError::Io(_))));
    }
}
