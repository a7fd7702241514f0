//! Byte-wise XOR parity over the data chunks of a stripe.

use crate::{CHUNK_SIZE, data_nodes};

/// Folds `src` into `acc` byte-wise.
///
/// Both slices must be the same length; the accumulator pattern lets callers
/// stream chunks through without materialising the whole stripe twice.
pub fn xor_into(acc: &mut [u8], src: &[u8]) {
    debug_assert_eq!(acc.len(), src.len());
    for (a, s) in acc.iter_mut().zip(src) {
        *a ^= s;
    }
}

/// Computes the parity chunk for one stripe of an `n`-node cluster.
///
/// `stride` holds the stripe's `n − 1` data chunks back to back (zero-padded
/// by the writer when the file data runs out). For `n = 1` parity does not
/// exist and the result is untouched zeroes.
pub fn parity_of(stride: &[u8], n: usize) -> Vec<u8> {
    let mut parity = vec![0u8; CHUNK_SIZE];
    if n >= 2 {
        for chunk in 0..data_nodes(n) {
            xor_into(&mut parity, &stride[chunk * CHUNK_SIZE..(chunk + 1) * CHUNK_SIZE]);
        }
    }
    parity
}

/// Rebuilds a missing data chunk from the parity chunk and the surviving
/// data chunks, writing the result into `out`.
///
/// `out` starts as a copy of the parity chunk; XORing every surviving data
/// chunk back out leaves exactly the missing one.
pub fn reconstruct_into<'a, I>(out: &mut [u8], parity: &[u8], survivors: I)
where
    I: IntoIterator<Item = &'a [u8]>,
{
    out.copy_from_slice(parity);
    for chunk in survivors {
        xor_into(out, chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned_stride(n: usize) -> Vec<u8> {
        (0..CHUNK_SIZE * data_nodes(n))
            .map(|i| (i % 251) as u8)
            .collect()
    }

    #[test]
    fn stripe_xor_sums_to_zero() {
        // Universal property: parity XOR all data chunks is the zero chunk.
        for n in [2, 3, 4] {
            let stride = patterned_stride(n);
            let mut acc = parity_of(&stride, n);
            for chunk in 0..data_nodes(n) {
                xor_into(&mut acc, &stride[chunk * CHUNK_SIZE..(chunk + 1) * CHUNK_SIZE]);
            }
            assert!(acc.iter().all(|byte| *byte == 0), "n = {n}");
        }
    }

    #[test]
    fn reconstruct_recovers_each_position() {
        let n = 4;
        let stride = patterned_stride(n);
        let parity = parity_of(&stride, n);

        for missing in 0..data_nodes(n) {
            let survivors = (0..data_nodes(n))
                .filter(|chunk| *chunk != missing)
                .map(|chunk| &stride[chunk * CHUNK_SIZE..(chunk + 1) * CHUNK_SIZE]);

            let mut rebuilt = vec![0u8; CHUNK_SIZE];
            reconstruct_into(&mut rebuilt, &parity, survivors);
            assert_eq!(
                rebuilt,
                &stride[missing * CHUNK_SIZE..(missing + 1) * CHUNK_SIZE],
                "missing chunk {missing}"
            );
        }
    }

    #[test]
    fn two_node_parity_mirrors_the_data_chunk() {
        // n = 2 has a single data chunk, so parity equals it.
        let stride = patterned_stride(2);
        assert_eq!(parity_of(&stride, 2), stride);
    }

    #[test]
    fn single_node_parity_is_all_zero() {
        let stride = patterned_stride(1);
        assert!(parity_of(&stride, 1).iter().all(|byte| *byte == 0));
    }

    #[test]
    fn zero_padded_tail_contributes_nothing() {
        // S2-shaped stripe: 7 bytes of data then padding; parity must equal
        // those 7 bytes followed by zeroes (the second data chunk is zero).
        let n = 3;
        let mut stride = vec![0u8; CHUNK_SIZE * data_nodes(n)];
        stride[..7].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7]);

        let parity = parity_of(&stride, n);
        assert_eq!(&parity[..7], &[1, 2, 3, 4, 5, 6, 7]);
        assert!(parity[7..].iter().all(|byte| *byte == 0));
    }
}
