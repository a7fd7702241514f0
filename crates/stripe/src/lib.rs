#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `stripefs_stripe` holds the pure arithmetic behind the RAID-4-style data
//! layout: the mapping between file offsets and `(stripe, node, in-chunk
//! offset)` coordinates, and the byte-wise XOR parity codec used to survive
//! the loss of a single node.
//!
//! # Design
//!
//! For a cluster of `n` nodes, each stripe spans `n − 1` data chunks of
//! [`CHUNK_SIZE`] bytes on nodes `0..n−1`, with the parity chunk on node
//! `n − 1`. A single-node cluster has no parity: the stride collapses to one
//! chunk and the codec is bypassed entirely.
//!
//! # Invariants
//!
//! - [`stride_bytes`] is `CHUNK_SIZE · (n − 1)` for `n ≥ 2` and `CHUNK_SIZE`
//!   for `n = 1`.
//! - For every stripe written with parity, the XOR of the `n` chunks stored
//!   across the nodes is the zero chunk.
//! - Reconstruction of one missing data chunk from parity plus the other
//!   `n − 2` data chunks is exact.

mod layout;
mod parity;

pub use layout::{ChunkLocation, data_nodes, locate, stride_bytes, stripe_of, stripe_span};
pub use parity::{parity_of, reconstruct_into, xor_into};

pub use stripefs_protocol::CHUNK_SIZE;
