//! The feed session: connection-scoped request dispatch and gap recovery.
//!
//! A session owns one connection end to end and drives the protocol through
//! its phases: connect, request the full stream, read packet frames until the
//! server ends the stream, then request a resend for every missing sequence
//! and read the single reply each one owes. The failure policy is tagged by
//! [`Phase`]: while streaming every failure aborts the session, while
//! recovering a failed resend only leaves that sequence missing.
//!
//! [`run_session`] is the TCP entry point; [`run_over`] drives the same
//! protocol over any byte stream, which is how the recovery paths are
//! exercised without a network.
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;

use log::{debug, info, warn};
use thiserror::Error;

use crate::gaps;
use crate::wire::{self, DecodeError, PACKET_LEN, Packet};

/// Protocol phase in which the session is operating when an error occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Reading the initial full stream, up to the server's end-of-stream.
    Streaming,
    /// Replaying resend requests for the missing sequences.
    Recovering,
}

impl Phase {
    /// Failure policy for this phase: tolerated failures leave a sequence
    /// missing and let the session continue, the rest abort it.
    fn tolerates_errors(self) -> bool {
        match self {
            Phase::Streaming => false,
            Phase::Recovering => true,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Streaming => write!(f, "streaming"),
            Phase::Recovering => write!(f, "recovering"),
        }
    }
}

/// Errors surfaced by a feed session.
///
/// Everything except [`SessionError::Connect`] carries the [`Phase`] it was
/// observed in, because the phase is what decided whether it reached the
/// caller at all.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Could not resolve or connect to the server. Retry policy is a caller
    /// concern.
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Read or write failure on the established connection, other than a
    /// clean end-of-stream.
    #[error("transport failure while {phase}: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: io::Error,
    },

    /// The stream ended inside a frame: only `got` of the expected
    /// [`PACKET_LEN`] bytes arrived.
    #[error("truncated frame while {phase}: got {got} of 17 bytes")]
    Framing { phase: Phase, got: usize },

    /// The codec rejected a frame.
    #[error("malformed frame while {phase}: {source}")]
    Decode {
        phase: Phase,
        #[source]
        source: DecodeError,
    },
}

/// Accumulated state of one session: every packet obtained so far, keyed by
/// sequence, plus the highest sequence observed during the initial stream.
///
/// Keying by sequence makes duplicates structural (the latest arrival wins)
/// and the final read-out comes back ascending for free.
#[derive(Debug, Default)]
struct SessionState {
    packets: BTreeMap<i32, Packet>,
    max_seq: i32,
}

impl SessionState {
    /// Record a recovered packet. Re-receiving a sequence replaces the
    /// earlier packet.
    fn record(&mut self, packet: Packet) {
        self.packets.insert(packet.sequence, packet);
    }

    /// Record a packet from the initial stream, tracking the running maximum
    /// that defines the expected range `1..=max_seq`.
    fn record_streamed(&mut self, packet: Packet) {
        self.max_seq = self.max_seq.max(packet.sequence);
        self.record(packet);
    }

    fn received_sequences(&self) -> impl Iterator<Item = i32> + '_ {
        self.packets.keys().copied()
    }

    /// The final collection, ascending by sequence, one packet per sequence.
    /// Borrows, so calling it again yields identical output.
    fn ordered_packets(&self) -> Vec<Packet> {
        self.packets.values().copied().collect()
    }
}

/// One read attempt's outcome: a whole frame, or a clean end-of-stream.
enum FrameRead {
    Frame([u8; PACKET_LEN]),
    Eof,
}

/// Read exactly one packet frame, accumulating across short reads.
///
/// A clean end-of-stream is only reported at a frame boundary (zero bytes
/// into a frame); end-of-stream inside a frame is a framing failure, not a
/// short packet.
fn read_frame<S: Read>(transport: &mut S, phase: Phase) -> Result<FrameRead, SessionError> {
    let mut buf = [0u8; PACKET_LEN];
    let mut filled = 0;
    while filled < PACKET_LEN {
        match transport.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(FrameRead::Eof),
            Ok(0) => return Err(SessionError::Framing { phase, got: filled }),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SessionError::Transport { phase, source: e }),
        }
    }
    Ok(FrameRead::Frame(buf))
}

/// Request one missing sequence and read the single reply frame it owes.
///
/// End-of-stream in place of the reply is reported as a framing failure: a
/// frame was owed and never arrived.
fn recover_one<S: Read + Write>(transport: &mut S, seq: i32) -> Result<Packet, SessionError> {
    let phase = Phase::Recovering;
    transport
        .write_all(&wire::resend_request(seq))
        .map_err(|e| SessionError::Transport { phase, source: e })?;
    match read_frame(transport, phase)? {
        FrameRead::Frame(buf) => {
            let packet =
                Packet::decode(&buf).map_err(|e| SessionError::Decode { phase, source: e })?;
            debug!("recovered sequence {}", packet.sequence);
            Ok(packet)
        }
        FrameRead::Eof => Err(SessionError::Framing { phase, got: 0 }),
    }
}

/// Drive a full protocol session over an exclusively owned byte stream:
/// request the stream, read it to its end, recover gaps, and return the
/// sequence-ordered dataset.
///
/// The transport is released on every exit path; for an owned socket that
/// closes the connection exactly once.
pub fn run_over<S: Read + Write>(mut transport: S) -> Result<Vec<Packet>, SessionError> {
    let mut state = SessionState::default();

    // Streaming: one stream-all request, then frames until a clean
    // end-of-stream. Every failure here is fatal.
    transport
        .write_all(&wire::stream_all_request())
        .map_err(|e| SessionError::Transport {
            phase: Phase::Streaming,
            source: e,
        })?;
    loop {
        match read_frame(&mut transport, Phase::Streaming)? {
            FrameRead::Frame(buf) => {
                let packet = Packet::decode(&buf).map_err(|e| SessionError::Decode {
                    phase: Phase::Streaming,
                    source: e,
                })?;
                debug!(
                    "streamed sequence {} ({})",
                    packet.sequence,
                    packet.symbol_str()
                );
                state.record_streamed(packet);
            }
            FrameRead::Eof => break,
        }
    }
    info!(
        "initial stream closed: {} packet(s), highest sequence {}",
        state.packets.len(),
        state.max_seq
    );

    // The stream is exhausted; whatever the sweep finds must be asked for
    // one sequence at a time, in ascending order.
    let missing = gaps::missing_sequences(state.received_sequences(), state.max_seq);
    if !missing.is_empty() {
        info!("{} sequence(s) missing: {:?}", missing.len(), missing);
    }
    let mut recovered = 0usize;
    for &seq in &missing {
        match recover_one(&mut transport, seq) {
            Ok(packet) => {
                state.record(packet);
                recovered += 1;
            }
            Err(err) if Phase::Recovering.tolerates_errors() => {
                warn!("resend of sequence {seq} failed, leaving it missing: {err}");
            }
            Err(err) => return Err(err),
        }
    }
    if !missing.is_empty() {
        info!("recovery finished: {recovered} of {} obtained", missing.len());
    }

    Ok(state.ordered_packets())
}

/// Run a complete session against `host:port` over TCP.
///
/// The connection is owned by the session for its whole lifetime and closed
/// when the session ends, on success and on every failure path.
pub fn run_session(host: &str, port: u16) -> Result<Vec<Packet>, SessionError> {
    let addr = format!("{host}:{port}");
    let stream = TcpStream::connect(&addr).map_err(|e| SessionError::Connect {
        addr: addr.clone(),
        source: e,
    })?;
    // Requests are 2 bytes; don't let Nagle sit on them.
    if let Err(e) = stream.set_nodelay(true) {
        warn!("failed to set TCP_NODELAY: {e}");
    }
    info!("connected to {addr}");
    run_over(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn packet(sequence: i32, quantity: i32) -> Packet {
        Packet {
            symbol: *b"AAPL",
            side: b'B',
            quantity,
            price: 100,
            sequence,
        }
    }

    /// Serves its bytes a few at a time, like a socket under load.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let end = (self.pos + self.chunk).min(self.data.len());
            let n = (end - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn ordered_packets_sorted_by_sequence() {
        let mut state = SessionState::default();
        state.record_streamed(packet(3, 1));
        state.record_streamed(packet(1, 1));
        state.record_streamed(packet(2, 1));
        let seqs: Vec<i32> = state
            .ordered_packets()
            .iter()
            .map(|p| p.sequence)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(state.max_seq, 3);
    }

    #[test]
    fn duplicate_sequence_keeps_latest_packet() {
        let mut state = SessionState::default();
        state.record_streamed(packet(2, 30));
        state.record_streamed(packet(2, 99));
        let out = state.ordered_packets();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].quantity, 99);
    }

    #[test]
    fn ordered_packets_is_repeatable() {
        let mut state = SessionState::default();
        state.record_streamed(packet(2, 5));
        state.record_streamed(packet(1, 5));
        let first = state.ordered_packets();
        let second = state.ordered_packets();
        assert_eq!(first, second);
    }

    #[test]
    fn read_frame_reports_clean_eof_at_boundary() {
        let mut empty = Cursor::new(Vec::new());
        assert!(matches!(
            read_frame(&mut empty, Phase::Streaming),
            Ok(FrameRead::Eof)
        ));
    }

    #[test]
    fn read_frame_rejects_eof_inside_frame() {
        let mut short = Cursor::new(vec![0u8; 5]);
        assert!(matches!(
            read_frame(&mut short, Phase::Streaming),
            Err(SessionError::Framing {
                phase: Phase::Streaming,
                got: 5
            })
        ));
    }

    #[test]
    fn read_frame_assembles_across_short_reads() {
        let pkt = packet(9, 42);
        let mut trickle = Trickle {
            data: pkt.encode().to_vec(),
            pos: 0,
            chunk: 3,
        };
        match read_frame(&mut trickle, Phase::Streaming).unwrap() {
            FrameRead::Frame(buf) => assert_eq!(Packet::decode(&buf).unwrap(), pkt),
            FrameRead::Eof => panic!("expected a frame"),
        }
    }
}
