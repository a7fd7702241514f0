#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `stripefs_protocol` implements the framed message protocol spoken between
//! the stripefs client engine and the storage daemons. Every exchange starts
//! with a fixed-width [`MessageHeader`]; payloads follow immediately with no
//! further framing.
//!
//! # Design
//!
//! - `header` defines [`MessageType`] and the 16-byte [`MessageHeader`]
//!   codec together with the typed [`ProtocolError`] decode failures.
//! - `io` provides the blocking framing helpers ([`send_header`],
//!   [`send_message`], [`recv_header`], [`recv_payload_into`]) used by both
//!   endpoints. Receives are fully satisfying: a helper either returns the
//!   complete record or an error.
//!
//! # Invariants
//!
//! - The header encoding is exactly [`HEADER_LEN`] bytes and stable within a
//!   build: a little-endian `u32` discriminant, four zero padding bytes, and
//!   a little-endian `u64` length.
//! - [`CHUNK_SIZE`] is the unit of data transfer: every `Write` payload is
//!   exactly one chunk, and read responses are streamed in chunk-sized sends.
//! - Paths never reach [`MAX_PATH_LEN`]; longer requests are rejected by the
//!   daemon without ending the session.
//!
//! # Errors
//!
//! Header decoding surfaces [`ProtocolError`]; the I/O helpers return
//! [`std::io::Error`] with decode failures mapped to
//! [`std::io::ErrorKind::InvalidData`] so they compose with socket code.

mod header;
mod io;

pub use header::{HEADER_LEN, MessageHeader, MessageType, ProtocolError, RawHeader};
pub use io::{recv_header, recv_payload_into, recv_raw_header, send_header, send_message};

/// Size of one data chunk: the smallest unit of network transfer (1 MiB).
pub const CHUNK_SIZE: usize = 1 << 20;

/// Longest path accepted by a daemon, bounded by its chunk-sized receive buffer.
pub const MAX_PATH_LEN: usize = CHUNK_SIZE - 1;
