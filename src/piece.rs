//! Per-piece block bookkeeping and hash verification (C6).
use sha1::{Digest, Sha1};

pub const BLOCK_SIZE: u32 = 16_384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Missing,
    Pending,
    Retrieved,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub offset: u32,
    pub length: u32,
    pub status: BlockStatus,
    pub data: Option<Vec<u8>>,
}

/// One piece's block table. A piece never transitions from `verified` back
/// to unverified — `reset` only touches block state, and callers must not
/// call it once `verified` is true.
#[derive(Debug, Clone)]
pub struct Piece {
    pub index: usize,
    pub expected_hash: [u8; 20],
    pub blocks: Vec<Block>,
    pub verified: bool,
}

impl Piece {
    /// Builds a piece of `piece_length` bytes (the final piece of a torrent
    /// may be shorter; pass its true length here), split into fixed
    /// `BLOCK_SIZE` blocks with a possibly-shorter final block.
    pub fn new(index: usize, expected_hash: [u8; 20], piece_length: u32) -> Self {
        let mut blocks = Vec::new();
        let mut offset = 0u32;
        while offset < piece_length {
            let length = BLOCK_SIZE.min(piece_length - offset);
            blocks.push(Block { offset, length, status: BlockStatus::Missing, data: None });
            offset += length;
        }

        Piece { index, expected_hash, blocks, verified: false }
    }

    pub fn len(&self) -> u32 {
        self.blocks.iter().map(|b| b.length).sum()
    }

    /// Marks the first `Missing` block `Pending` and returns its
    /// `(offset, length)`, or `None` if no block is currently missing.
    pub fn next_missing_block(&mut self) -> Option<(u32, u32)> {
        let block = self.blocks.iter_mut().find(|b| b.status == BlockStatus::Missing)?;
        block.status = BlockStatus::Pending;
        Some((block.offset, block.length))
    }

    /// Records a delivered block. Unknown offsets (a block this piece never
    /// had) are dropped silently — tolerating a buggy or malicious peer
    /// rather than failing the whole session over it.
    pub fn deliver_block(&mut self, offset: u32, data: Vec<u8>) {
        let Some(block) = self.blocks.iter_mut().find(|b| b.offset == offset) else {
            tracing::debug!(piece = self.index, offset, "dropping block at unknown offset");
            return;
        };
        if block.status != BlockStatus::Pending {
            tracing::debug!(piece = self.index, offset, status = ?block.status, "dropping block not pending");
            return;
        }
        if data.len() as u32 != block.length {
            tracing::debug!(piece = self.index, offset, "dropping block of unexpected length");
            return;
        }
        block.data = Some(data);
        block.status = BlockStatus::Retrieved;
    }

    pub fn is_complete(&self) -> bool {
        self.blocks.iter().all(|b| b.status == BlockStatus::Retrieved)
    }

    /// Resets every block to `Missing` and clears its data. Must not be
    /// called once `verified` is true.
    pub fn reset(&mut self) {
        for block in &mut self.blocks {
            block.status = BlockStatus::Missing;
            block.data = None;
        }
    }

    /// Resets the single block at `offset` back to `Missing`, but only if it
    /// is currently `Pending` — used when the one peer it was assigned to
    /// disconnects, without disturbing blocks other peers are fetching.
    pub fn release_pending(&mut self, offset: u32) {
        if let Some(block) = self.blocks.iter_mut().find(|b| b.offset == offset) {
            if block.status == BlockStatus::Pending {
                block.status = BlockStatus::Missing;
            }
        }
    }

    /// Concatenates all blocks (which must all be `Retrieved`) and checks the
    /// SHA-1 digest against `expected_hash`. On success, marks the piece
    /// `verified` and returns the assembled bytes; on failure, resets every
    /// block to `Missing` so the piece can be re-acquired.
    pub fn verify(&mut self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }

        let mut buffer = Vec::with_capacity(self.len() as usize);
        for block in &self.blocks {
            buffer.extend_from_slice(block.data.as_ref().expect("retrieved block has data"));
        }

        let mut hasher = Sha1::new();
        hasher.update(&buffer);
        let digest = hasher.finalize();

        if digest.as_slice() == self.expected_hash {
            self.verified = true;
            Some(buffer)
        } else {
            tracing::warn!(piece = self.index, "piece hash mismatch, resetting");
            self.reset();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(data: &[u8]) -> [u8; 20] {
        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        out
    }

    #[test]
    fn builds_blocks_with_short_final_block() {
        let piece = Piece::new(0, [0u8; 20], BLOCK_SIZE + 100);
        assert_eq!(piece.blocks.len(), 2);
        assert_eq!(piece.blocks[0].length, BLOCK_SIZE);
        assert_eq!(piece.blocks[1].length, 100);
    }

    #[test]
    fn next_missing_block_marks_pending_once() {
        let mut piece = Piece::new(0, [0u8; 20], 100);
        let (offset, length) = piece.next_missing_block().unwrap();
        assert_eq!((offset, length), (0, 100));
        assert_eq!(piece.blocks[0].status, BlockStatus::Pending);
        assert!(piece.next_missing_block().is_none());
    }

    #[test]
    fn deliver_and_verify_round_trip() {
        let data = b"hello world, this is piece data".to_vec();
        let expected = hash_of(&data);
        let mut piece = Piece::new(0, expected, data.len() as u32);
        let (offset, _) = piece.next_missing_block().unwrap();
        piece.deliver_block(offset, data.clone());
        assert!(piece.is_complete());
        let verified = piece.verify().unwrap();
        assert_eq!(verified, data);
        assert!(piece.verified);
    }

    #[test]
    fn verify_resets_on_hash_mismatch() {
        let data = b"actual data".to_vec();
        let mut piece = Piece::new(0, [0xffu8; 20], data.len() as u32);
        let (offset, _) = piece.next_missing_block().unwrap();
        piece.deliver_block(offset, data);
        assert!(piece.verify().is_none());
        assert!(!piece.verified);
        assert_eq!(piece.blocks[0].status, BlockStatus::Missing);
    }

    #[test]
    fn deliver_ignores_unknown_offset() {
        let mut piece = Piece::new(0, [0u8; 20], 100);
        piece.deliver_block(9999, vec![0u8; 100]);
        assert!(!piece.is_complete());
    }

    #[test]
    fn release_pending_leaves_other_blocks_alone() {
        let mut piece = Piece::new(0, [0u8; 20], 20);
        let (first_offset, _) = piece.next_missing_block().unwrap();
        let (second_offset, _) = piece.next_missing_block().unwrap();
        piece.release_pending(second_offset);
        assert_eq!(piece.blocks[0].status, BlockStatus::Pending);
        assert_eq!(piece.blocks[1].status, BlockStatus::Missing);
        let _ = first_offset;
    }
}
