//! File-offset to stripe-coordinate mapping.

use crate::CHUNK_SIZE;

/// Coordinates of a single file byte within the striped layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChunkLocation {
    /// Index of the stripe containing the byte.
    pub stripe: u64,
    /// Data-node index within the stripe (`0..data_nodes(n)`).
    pub node: usize,
    /// Offset of the byte within its chunk.
    pub offset: usize,
}

/// Number of data chunks per stripe for an `n`-node cluster.
#[must_use]
pub const fn data_nodes(n: usize) -> usize {
    if n >= 2 { n - 1 } else { 1 }
}

/// Bytes of file data covered by one stripe.
#[must_use]
pub const fn stride_bytes(n: usize) -> u64 {
    (CHUNK_SIZE * data_nodes(n)) as u64
}

/// Index of the stripe containing file byte `byte`.
#[must_use]
pub const fn stripe_of(byte: u64, n: usize) -> u64 {
    byte / stride_bytes(n)
}

/// Number of stripes needed to cover `len` bytes.
#[must_use]
pub const fn stripe_span(len: u64, n: usize) -> u64 {
    len.div_ceil(stride_bytes(n))
}

/// Maps file byte `byte` to its `(stripe, node, in-chunk offset)` location.
#[must_use]
pub fn locate(byte: u64, n: usize) -> ChunkLocation {
    let stride = stride_bytes(n);
    let within = byte % stride;
    ChunkLocation {
        stripe: byte / stride,
        node: (within as usize) / CHUNK_SIZE,
        offset: (within as usize) % CHUNK_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = CHUNK_SIZE as u64;

    #[test]
    fn stride_spans_data_chunks_only() {
        assert_eq!(stride_bytes(3), 2 * MIB);
        assert_eq!(stride_bytes(4), 3 * MIB);
        assert_eq!(stride_bytes(2), MIB);
    }

    #[test]
    fn single_node_stride_is_one_chunk() {
        assert_eq!(stride_bytes(1), MIB);
        assert_eq!(data_nodes(1), 1);
    }

    #[test]
    fn locate_walks_nodes_then_stripes() {
        // n = 3: bytes 0..1MiB on node 0, 1..2MiB on node 1, then stripe 1.
        assert_eq!(
            locate(0, 3),
            ChunkLocation {
                stripe: 0,
                node: 0,
                offset: 0
            }
        );
        assert_eq!(
            locate(MIB, 3),
            ChunkLocation {
                stripe: 0,
                node: 1,
                offset: 0
            }
        );
        assert_eq!(
            locate(2 * MIB + 5, 3),
            ChunkLocation {
                stripe: 1,
                node: 0,
                offset: 5
            }
        );
    }

    #[test]
    fn locate_last_byte_of_stripe() {
        let loc = locate(2 * MIB - 1, 3);
        assert_eq!(loc.stripe, 0);
        assert_eq!(loc.node, 1);
        assert_eq!(loc.offset, CHUNK_SIZE - 1);
    }

    #[test]
    fn stripe_span_rounds_up() {
        assert_eq!(stripe_span(0, 3), 0);
        assert_eq!(stripe_span(1, 3), 1);
        assert_eq!(stripe_span(2 * MIB, 3), 1);
        assert_eq!(stripe_span(2 * MIB + 7, 3), 2);
    }

    #[test]
    fn stripe_of_matches_locate() {
        for byte in [0, MIB - 1, MIB, 5 * MIB + 123, 400 * MIB] {
            for n in [1, 2, 3, 4] {
                assert_eq!(stripe_of(byte, n), locate(byte, n).stripe);
            }
        }
    }
}
