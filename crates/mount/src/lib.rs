#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `stripefs_mount` bridges the kernel's filesystem-in-userspace interface
//! to the striping engine. Metadata (names, sizes, permissions) lives in a
//! local root directory on the client and is not replicated; file contents
//! live on the storage nodes and flow through
//! [`Cluster`](stripefs_engine::Cluster).
//!
//! # Design
//!
//! - `inode` keeps the ino ↔ root-relative-path table, rooted at ino 1.
//! - `fs` implements the `fuser` callbacks. `open` in read-only mode fans
//!   the read request out through the engine; write-only opens touch no node
//!   until the data arrives; read-write opens are refused. `write` accepts
//!   whole-file writes at offset 0 only and reflects the logical length into
//!   the local metadata file so later stats and reads see it.
//!
//! # Errors
//!
//! Engine failures surface as single errno values: `EIO` for data loss and
//! stream failures, `EACCES` for the unsupported open mode, `EINVAL` for
//! non-zero write offsets, `ENOENT` for names missing from the local root.

mod fs;
mod inode;

pub use fs::{StripeFs, mount};
