//! Reed-Solomon shard construction for encoded video frames.
//!
//! A frame payload is cut into `data_shards` equal blocks (the last one
//! zero-padded) and extended with `parity_shards` parity blocks so that any
//! `data_shards` of the total suffice to rebuild the payload.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{Error, Result};

/// Upper bound on `data_shards + parity_shards` for one frame. Keeps the
/// 10-bit fields of the packed FEC info in range and stays inside the
/// GF(2^8) code limit.
pub const DATA_SHARDS_MAX: usize = 255;

/// Shard counts for a payload: `(data_shards, parity_shards)`.
///
/// `data_shards = ceil(payload_len / block_size)` and
/// `parity_shards = ceil(data_shards * fec_percentage / 100)`. A total
/// above [`DATA_SHARDS_MAX`] is refused; the caller drops the frame.
pub fn shard_counts(
    payload_len: usize,
    block_size: usize,
    fec_percentage: u8,
) -> Result<(usize, usize)> {
    if block_size == 0 {
        return Err(Error::ErrZeroBlockSize);
    }
    if payload_len == 0 {
        return Err(Error::ErrEmptyPayload);
    }
    let data_shards = payload_len.div_ceil(block_size);
    let parity_shards = (data_shards * fec_percentage as usize).div_ceil(100);
    let total = data_shards + parity_shards;
    if total > DATA_SHARDS_MAX {
        return Err(Error::ErrTooManyShards(total, DATA_SHARDS_MAX));
    }
    Ok((data_shards, parity_shards))
}

/// The shards of one frame, data first, parity after.
#[derive(Debug, Clone)]
pub struct FecShardSet {
    data_shards: usize,
    parity_shards: usize,
    block_size: usize,
    payload_len: usize,
    shards: Vec<Vec<u8>>,
}

impl FecShardSet {
    /// Shards `payload` and computes parity. `fec_percentage` of zero
    /// yields a parity-free set; the frame still shards if it spans more
    /// than one block.
    pub fn encode(payload: &[u8], block_size: usize, fec_percentage: u8) -> Result<Self> {
        let (data_shards, parity_shards) = shard_counts(payload.len(), block_size, fec_percentage)?;

        let mut shards = vec![vec![0u8; block_size]; data_shards + parity_shards];
        for (shard, chunk) in shards.iter_mut().zip(payload.chunks(block_size)) {
            shard[..chunk.len()].copy_from_slice(chunk);
        }

        if parity_shards > 0 {
            let rs = ReedSolomon::new(data_shards, parity_shards)?;
            rs.encode(&mut shards)?;
        }

        Ok(FecShardSet {
            data_shards,
            parity_shards,
            block_size,
            payload_len: payload.len(),
            shards,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn shard(&self, index: usize) -> Result<&[u8]> {
        self.shards
            .get(index)
            .map(Vec::as_slice)
            .ok_or(Error::ErrShardIndexOutOfRange(index, self.shards.len()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.shards.iter().map(Vec::as_slice)
    }

    /// Receiver-side recovery: fills the `None` entries of `shards` in
    /// place. Needs at least `data_shards` survivors of the original
    /// `data_shards + parity_shards`.
    pub fn reconstruct(
        data_shards: usize,
        parity_shards: usize,
        block_size: usize,
        shards: &mut [Option<Vec<u8>>],
    ) -> Result<()> {
        let total = data_shards + parity_shards;
        if shards.len() != total {
            return Err(Error::ErrShardLengthMismatch(shards.len(), total));
        }
        for shard in shards.iter().flatten() {
            if shard.len() != block_size {
                return Err(Error::ErrShardLengthMismatch(shard.len(), block_size));
            }
        }
        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < data_shards {
            return Err(Error::ErrNotEnoughShards(present, data_shards));
        }
        if parity_shards == 0 {
            // Nothing to recover from; all data shards must have survived.
            return Ok(());
        }
        let rs = ReedSolomon::new(data_shards, parity_shards)?;
        rs.reconstruct(shards)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn sizing_matches_ceil_arithmetic() {
        for (len, block, pct, want_data, want_parity) in [
            (1usize, 1024usize, 20u8, 1usize, 1usize),
            (1024, 1024, 20, 1, 1),
            (1025, 1024, 20, 2, 1),
            (10 * 1024, 1024, 20, 10, 2),
            (10 * 1024 + 1, 1024, 20, 11, 3),
            (5000, 996, 0, 6, 0),
            (5000, 996, 100, 6, 6),
            (5000, 996, 255, 6, 16),
            (300, 100, 34, 3, 2),
        ] {
            let (data, parity) = shard_counts(len, block, pct).unwrap();
            assert_eq!((data, parity), (want_data, want_parity), "len={len} pct={pct}");
        }
    }

    #[test]
    fn zero_length_and_zero_block_rejected() {
        assert_eq!(shard_counts(0, 1024, 20), Err(Error::ErrEmptyPayload));
        assert_eq!(shard_counts(100, 0, 20), Err(Error::ErrZeroBlockSize));
    }

    #[test]
    fn oversized_frame_refused() {
        // 213 data shards at 20% parity crosses the 255 limit.
        let err = shard_counts(213 * 64, 64, 20).unwrap_err();
        assert_eq!(err, Error::ErrTooManyShards(256, DATA_SHARDS_MAX));
        assert!(FecShardSet::encode(&payload(213 * 64), 64, 20).is_err());
    }

    #[test]
    fn final_shard_zero_padded() {
        let set = FecShardSet::encode(&payload(10), 8, 0).unwrap();
        assert_eq!(set.total_shards(), 2);
        let tail = set.shard(1).unwrap();
        assert_eq!(&tail[2..], &[0u8; 6]);
    }

    #[test]
    fn recovers_from_any_parity_sized_loss() {
        let src = payload(5 * 64 + 13);
        let set = FecShardSet::encode(&src, 64, 40).unwrap();
        let (data, parity) = (set.data_shards(), set.parity_shards());
        assert_eq!((data, parity), (6, 3));

        // Knock out `parity` shards in a few different patterns, data and
        // parity alike.
        let loss_patterns: &[&[usize]] = &[&[0, 1, 2], &[0, 6, 8], &[3, 7, 8], &[5, 6, 7]];
        for pattern in loss_patterns {
            let mut holey: Vec<Option<Vec<u8>>> = set.iter().map(|s| Some(s.to_vec())).collect();
            for &idx in *pattern {
                holey[idx] = None;
            }
            FecShardSet::reconstruct(data, parity, 64, &mut holey).unwrap();

            let mut recovered = Vec::new();
            for shard in holey.iter().take(data) {
                recovered.extend_from_slice(shard.as_ref().unwrap());
            }
            recovered.truncate(set.payload_len());
            assert_eq!(recovered, src, "pattern {pattern:?}");
        }
    }

    #[test]
    fn too_many_losses_detected() {
        let set = FecShardSet::encode(&payload(4 * 32), 32, 50).unwrap();
        let mut holey: Vec<Option<Vec<u8>>> = set.iter().map(|s| Some(s.to_vec())).collect();
        for idx in 0..=set.parity_shards() {
            holey[idx] = None;
        }
        let err =
            FecShardSet::reconstruct(set.data_shards(), set.parity_shards(), 32, &mut holey)
                .unwrap_err();
        assert_eq!(
            err,
            Error::ErrNotEnoughShards(set.total_shards() - set.parity_shards() - 1, 4)
        );
    }

    #[test]
    fn parity_free_set_has_no_recovery_margin() {
        let set = FecShardSet::encode(&payload(3 * 100), 100, 0).unwrap();
        assert_eq!(set.parity_shards(), 0);
        let mut intact: Vec<Option<Vec<u8>>> = set.iter().map(|s| Some(s.to_vec())).collect();
        FecShardSet::reconstruct(3, 0, 100, &mut intact).unwrap();

        let mut holey: Vec<Option<Vec<u8>>> = set.iter().map(|s| Some(s.to_vec())).collect();
        holey[1] = None;
        assert_eq!(
            FecShardSet::reconstruct(3, 0, 100, &mut holey),
            Err(Error::ErrNotEnoughShards(2, 3))
        );
    }

    #[test]
    fn single_block_payload() {
        let set = FecShardSet::encode(&payload(40), 1024, 20).unwrap();
        assert_eq!(set.data_shards(), 1);
        assert_eq!(set.parity_shards(), 1);
        assert_eq!(set.block_size(), 1024);
    }
}
