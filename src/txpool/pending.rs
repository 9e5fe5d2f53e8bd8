//! Pending pool: transactions eligible for the next block.
//!
//! Collaborator of the queued pool, mirroring its state shape without the
//! prune machinery: the queued pool hands over records the moment their nonce
//! gap closes, and the polling driver feeds it the upstream pending set
//! directly. Refusing an already-known record is the normal case for a
//! promotion that the upstream snapshot delivered first.

use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::SystemTime,
};

use parking_lot::RwLock;
use tracing::warn;

use crate::publish::{encode_tx, Publisher, TopicPair};

use super::{list::PriceList, ListOrder, MemPoolTx, PoolContent, PoolMetrics, PoolTag, TxHash};

struct PendingState {
    by_hash: HashMap<TxHash, MemPoolTx>,
    asc_by_price: PriceList,
    desc_by_price: PriceList,
}

impl PendingState {
    fn new() -> Self {
        Self {
            by_hash: HashMap::new(),
            asc_by_price: PriceList::new(ListOrder::Ascending),
            desc_by_price: PriceList::new(ListOrder::Descending),
        }
    }
}

pub struct PendingPool {
    state: RwLock<PendingState>,
    topics: TopicPair,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<dyn PoolMetrics>,
}

impl fmt::Debug for PendingPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingPool")
            .field("topics", &self.topics)
            .field("size", &self.count())
            .finish_non_exhaustive()
    }
}

impl PendingPool {
    pub fn new(
        topics: TopicPair,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<dyn PoolMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(PendingState::new()),
            topics,
            publisher,
            metrics,
        })
    }

    /// Admits a record, stamping `pending_at`. `false` when already present;
    /// nothing is published in that case.
    pub async fn add(&self, mut tx: MemPoolTx) -> bool {
        {
            let mut st = self.state.write();
            if st.by_hash.contains_key(&tx.hash) {
                return false;
            }
            tx.pending_at = Some(SystemTime::now());
            tx.pool = PoolTag::Pending;
            st.asc_by_price.insert(tx.gas_price, tx.hash);
            st.desc_by_price.insert(tx.gas_price, tx.hash);
            st.by_hash.insert(tx.hash, tx.clone());
            self.metrics.on_added(st.by_hash.len());
        }
        self.publish_event(&self.topics.entry, &tx).await;
        true
    }

    /// Absorbs the pending side of an upstream snapshot. Returns how many
    /// records were new.
    pub async fn add_pending(&self, content: &PoolContent) -> u64 {
        let mut inserted = 0;
        for tx in content.iter() {
            if self.add(tx.clone()).await {
                inserted += 1;
            }
        }
        inserted
    }

    /// Detaches a record, typically because upstream confirmed or dropped it.
    pub async fn remove(&self, hash: &TxHash) -> Option<MemPoolTx> {
        let removed = {
            let mut st = self.state.write();
            let Some(tx) = st.by_hash.remove(hash) else {
                return None;
            };
            st.asc_by_price.remove(hash);
            st.desc_by_price.remove(hash);
            self.metrics.on_removed(st.by_hash.len());
            tx
        };
        self.publish_event(&self.topics.exit, &removed).await;
        Some(removed)
    }

    pub fn exists(&self, hash: &TxHash) -> bool {
        self.state.read().by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &TxHash) -> Option<MemPoolTx> {
        self.state.read().by_hash.get(hash).cloned()
    }

    pub fn count(&self) -> u64 {
        self.state.read().asc_by_price.len() as u64
    }

    /// Copy of the pool in the requested price order, `None` when empty.
    pub fn list(&self, order: ListOrder) -> Option<Vec<MemPoolTx>> {
        let st = self.state.read();
        let view = match order {
            ListOrder::Ascending => &st.asc_by_price,
            ListOrder::Descending => &st.desc_by_price,
        };
        if view.is_empty() {
            return None;
        }
        Some(
            view.hashes()
                .filter_map(|h| st.by_hash.get(h).cloned())
                .collect(),
        )
    }

    async fn publish_event(&self, topic: &str, tx: &MemPoolTx) {
        let payload = match encode_tx(tx) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(hash = %tx.hash, error = %err, "failed to encode pool event");
                return;
            }
        };
        if let Err(err) = self.publisher.publish(topic, payload).await {
            warn!(hash = %tx.hash, topic, error = %err, "failed to publish pool event");
        }
    }
}
