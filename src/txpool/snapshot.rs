//! Upstream mempool snapshot model.
//!
//! The upstream node reports its mempool content as two nested maps, sender
//! address to nonce (as a string) to transaction. The tracker never mutates a
//! snapshot; it only tests membership and walks the records.

use std::collections::HashMap;

use super::{MemPoolTx, TxHash};

/// One side of the upstream mempool content, keyed by sender address, then by
/// nonce rendered as a string.
#[derive(Clone, Debug, Default)]
pub struct PoolContent(HashMap<String, HashMap<String, MemPoolTx>>);

impl PoolContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files a record under its sender and nonce keys.
    pub fn insert(&mut self, tx: MemPoolTx) {
        self.0
            .entry(tx.from.to_string())
            .or_default()
            .insert(tx.nonce.to_string(), tx);
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.iter().any(|tx| tx.hash == *hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemPoolTx> + '_ {
        self.0.values().flat_map(|by_nonce| by_nonce.values())
    }

    pub fn tx_count(&self) -> usize {
        self.0.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tx_count() == 0
    }
}

/// The full snapshot returned by one upstream poll.
#[derive(Clone, Debug, Default)]
pub struct MempoolSnapshot {
    /// Transactions eligible for the next block.
    pub pending: PoolContent,
    /// Transactions blocked by a nonce gap.
    pub queued: PoolContent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txpool::Address;

    fn tx(h: u8, from: u8, nonce: u64) -> MemPoolTx {
        MemPoolTx::new(TxHash([h; 32]), Address([from; 20]), None, nonce, 1)
    }

    #[test]
    fn membership_and_count() {
        let mut content = PoolContent::new();
        assert!(content.is_empty());

        content.insert(tx(1, 1, 0));
        content.insert(tx(2, 1, 1));
        content.insert(tx(3, 2, 7));

        assert_eq!(content.tx_count(), 3);
        assert!(content.contains(&TxHash([2; 32])));
        assert!(!content.contains(&TxHash([9; 32])));
    }

    #[test]
    fn same_sender_same_nonce_replaces() {
        let mut content = PoolContent::new();
        content.insert(tx(1, 1, 0));
        content.insert(tx(2, 1, 0));

        assert_eq!(content.tx_count(), 1);
        assert!(content.contains(&TxHash([2; 32])));
        assert!(!content.contains(&TxHash([1; 32])));
    }
}
