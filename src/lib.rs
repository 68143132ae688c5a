//! Exchange feed client and capture library.
//!
//! This crate provides the core types and logic used by the `abx-feed`
//! client binary and the companion tools (`player`, `feedsim`):
//!
//! - `wire`: the fixed 17-byte packet codec and the two 2-byte request
//!   frames, pure data transformation
//! - `gaps`: detection of missing sequences in the received range
//! - `session`: the connection-owning protocol driver (request the full
//!   stream, read to end-of-stream, recover gaps one resend at a time)
//! - `record`: durable on-disk capture schema with length and CRC framing
//!
//! The binaries in this repository (`src/main.rs`, `src/bin/player.rs` and
//! `src/bin/feedsim.rs`) use these modules to capture a complete,
//! sequence-ordered dataset from a feed server and read it back with
//! integrity checks.
pub mod gaps;
pub mod record;
pub mod session;
pub mod wire;
