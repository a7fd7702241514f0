#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `stripefs_engine` is the client-side core of stripefs: it decomposes file
//! I/O into stripes and chunks, dispatches them in parallel to the storage
//! nodes, computes parity on the write path, and reconstructs missing chunks
//! from parity on the read path when a node is down.
//!
//! # Design
//!
//! - `slot` holds the per-node record: the connection (or a *down* mark),
//!   the streaming progress, and the paired mutex/condvar groups that
//!   synchronise readers with the detached streaming workers.
//! - `cluster` drives the pipelines. Writes push one stripe at a time to
//!   all nodes and join before the next stripe; reads make one stripe
//!   resident at a time in the per-slot chunk buffers and copy the requested
//!   sub-ranges out.
//!
//! # Invariants
//!
//! - At most one node may be down; a second failure surfaces
//!   [`EngineError::DataLoss`].
//! - Each slot's `written` counter is monotonic while a chunk is streaming
//!   and never exceeds one chunk.
//! - Every node consumes its stream in whole chunks, so the per-node stream
//!   position is always chunk-aligned.
//! - The parity chunk for a stripe is requested no later than any data chunk
//!   of that stripe while the parity stream is in use.
//!
//! # Errors
//!
//! Network failures during operation never abort a pipeline directly: they
//! mark the offending node down, and the pipeline fails only when too few
//! nodes remain. The mount layer maps [`EngineError`] values onto single
//! errno codes.

mod cluster;
mod error;
mod slot;

pub use cluster::Cluster;
pub use error::{EngineError, EngineResult};
