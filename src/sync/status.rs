//! The append-only log of processed blocks.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::primitives::Hash256;

/// Number of consecutive recent block hashes retained.
pub(crate) const RECENT_HASHES_SIZE: usize = 100;
/// A sparse checkpoint is kept every this many heights.
pub(crate) const CHECKPOINT_INTERVAL: u64 = 5000;

/// Processed (height, hash) history: a dense ring of the most recent
/// [`RECENT_HASHES_SIZE`] entries plus sparse checkpoints every
/// [`CHECKPOINT_INTERVAL`] heights.
///
/// Entry heights are strictly monotonic; storing a hash at or below the last
/// known height (a fork) first discards the orphaned entries above it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    last_known_block_height: u64,
    /// Newest first.
    recent_block_hashes: VecDeque<(u64, Hash256)>,
    /// Newest first, heights on multiples of [`CHECKPOINT_INTERVAL`].
    block_hash_checkpoints: Vec<(u64, Hash256)>,
}

/// The wire/persisted shape of [`SyncStatus`]: hash arrays only. Recent
/// hashes are consecutive below `last_known_block_height`; checkpoints sit on
/// descending multiples of [`CHECKPOINT_INTERVAL`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusDocument {
    /// Recent block hashes, newest first.
    pub last_known_block_hashes: Vec<Hash256>,
    /// Height of the newest processed block.
    pub last_known_block_height: u64,
    /// Sparse checkpoint hashes, newest first.
    pub block_hash_checkpoints: Vec<Hash256>,
}

impl SyncStatus {
    /// An empty status that will resume from `height + 1`.
    #[must_use]
    pub fn starting_at(height: u64) -> Self {
        Self {
            last_known_block_height: height,
            ..Self::default()
        }
    }

    /// Height of the newest processed block.
    #[must_use]
    pub fn last_known_block_height(&self) -> u64 {
        self.last_known_block_height
    }

    /// `true` once at least one block hash has been recorded.
    #[must_use]
    pub fn have_processed_blocks(&self) -> bool {
        !self.recent_block_hashes.is_empty()
    }

    /// Hash of the newest processed block.
    #[must_use]
    pub fn top_hash(&self) -> Option<Hash256> {
        self.recent_block_hashes.front().map(|(_, hash)| *hash)
    }

    /// Records a processed block.
    pub fn store_block_hash(&mut self, height: u64, hash: Hash256) {
        if height <= self.last_known_block_height {
            // Fork: drop orphaned entries so heights stay monotonic.
            self.recent_block_hashes.retain(|(h, _)| *h < height);
            self.block_hash_checkpoints.retain(|(h, _)| *h < height);
        }
        self.recent_block_hashes.push_front((height, hash));
        self.recent_block_hashes.truncate(RECENT_HASHES_SIZE);
        if height % CHECKPOINT_INTERVAL == 0 {
            self.block_hash_checkpoints.insert(0, (height, hash));
        }
        self.last_known_block_height = height;
    }

    /// All checkpoint hashes for a sync request: the dense recent tail
    /// followed by the sparse history, newest first.
    #[must_use]
    pub fn checkpoints(&self) -> Vec<Hash256> {
        self.recent_block_hashes
            .iter()
            .map(|(_, hash)| *hash)
            .chain(self.block_hash_checkpoints.iter().map(|(_, hash)| *hash))
            .collect()
    }

    /// The dense recent hashes, newest first.
    #[must_use]
    pub fn recent_hashes(&self) -> Vec<Hash256> {
        self.recent_block_hashes
            .iter()
            .map(|(_, hash)| *hash)
            .collect()
    }

    /// The sparse checkpoint hashes, newest first.
    #[must_use]
    pub fn sparse_checkpoints(&self) -> Vec<Hash256> {
        self.block_hash_checkpoints
            .iter()
            .map(|(_, hash)| *hash)
            .collect()
    }

    /// Discards all history at or above `height`; the wallet will resume from
    /// `height`.
    pub fn rewind(&mut self, height: u64) {
        self.recent_block_hashes.retain(|(h, _)| *h < height);
        self.block_hash_checkpoints.retain(|(h, _)| *h < height);
        self.last_known_block_height = self
            .last_known_block_height
            .min(height.saturating_sub(1));
    }

    /// Converts to the persisted shape.
    #[must_use]
    pub fn to_document(&self) -> SyncStatusDocument {
        SyncStatusDocument {
            last_known_block_hashes: self
                .recent_block_hashes
                .iter()
                .map(|(_, hash)| *hash)
                .collect(),
            last_known_block_height: self.last_known_block_height,
            block_hash_checkpoints: self
                .block_hash_checkpoints
                .iter()
                .map(|(_, hash)| *hash)
                .collect(),
        }
    }

    /// Reconstructs from the persisted shape, re-deriving entry heights.
    #[must_use]
    pub fn from_document(document: SyncStatusDocument) -> Self {
        let top = document.last_known_block_height;
        let recent_block_hashes = document
            .last_known_block_hashes
            .into_iter()
            .enumerate()
            .map(|(offset, hash)| (top.saturating_sub(offset as u64), hash))
            .collect();
        let newest_checkpoint = (top / CHECKPOINT_INTERVAL) * CHECKPOINT_INTERVAL;
        let block_hash_checkpoints = document
            .block_hash_checkpoints
            .into_iter()
            .enumerate()
            .map(|(offset, hash)| {
                (
                    newest_checkpoint.saturating_sub(offset as u64 * CHECKPOINT_INTERVAL),
                    hash,
                )
            })
            .collect();
        Self {
            last_known_block_height: top,
            recent_block_hashes,
            block_hash_checkpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> Hash256 {
        Hash256::from_bytes([byte; 32])
    }

    #[test]
    fn recent_ring_is_bounded() {
        let mut status = SyncStatus::default();
        for height in 0..150u64 {
            status.store_block_hash(height, hash(height as u8));
        }
        assert_eq!(status.last_known_block_height(), 149);
        assert_eq!(status.top_hash(), Some(hash(149)));
        // 100 recent + 1 checkpoint at height 0.
        assert_eq!(status.checkpoints().len(), RECENT_HASHES_SIZE + 1);
    }

    #[test]
    fn sparse_checkpoints_survive_the_ring() {
        let mut status = SyncStatus::default();
        for height in 0..=CHECKPOINT_INTERVAL {
            status.store_block_hash(height, hash((height % 251) as u8));
        }
        let checkpoints = status.checkpoints();
        // The height-0 entry rolled out of the ring but remains a checkpoint.
        assert!(checkpoints.contains(&hash(0)));
        assert!(checkpoints.contains(&hash((CHECKPOINT_INTERVAL % 251) as u8)));
    }

    #[test]
    fn fork_discards_orphans() {
        let mut status = SyncStatus::default();
        for height in 0..5u64 {
            status.store_block_hash(height, hash(height as u8));
        }
        status.store_block_hash(2, hash(0xbb));
        assert_eq!(status.last_known_block_height(), 2);
        assert_eq!(status.top_hash(), Some(hash(0xbb)));
        assert!(!status.checkpoints().contains(&hash(3)));
        assert!(!status.checkpoints().contains(&hash(4)));
    }

    #[test]
    fn rewind_preserves_older_history() {
        let mut status = SyncStatus::default();
        for height in 0..10u64 {
            status.store_block_hash(height, hash(height as u8));
        }
        status.rewind(6);
        assert_eq!(status.last_known_block_height(), 5);
        assert_eq!(status.top_hash(), Some(hash(5)));
        assert!(!status.checkpoints().contains(&hash(7)));
    }

    #[test]
    fn document_round_trip() {
        let mut status = SyncStatus::default();
        for height in 4990..5003u64 {
            status.store_block_hash(height, hash((height % 251) as u8));
        }
        let rebuilt = SyncStatus::from_document(status.to_document());
        assert_eq!(rebuilt, status);
    }
}
