//! Queued pool: transactions stuck behind a nonce gap.
//!
//! These records are present in the upstream mempool but not eligible for the
//! next block. The pool answers point and range queries, absorbs upstream
//! snapshots and, during a prune, reclassifies every record against the
//! fresh snapshot, promoting the newly eligible ones to the pending pool.
//!
//! Concurrency model: one reader-writer lock guards the hash map, both
//! price-ordered views and the prune latch. Queries take the read lock,
//! mutations a single write-lock span. Prune classification fans out over a
//! bounded worker set; workers feed removals back through the public
//! [`QueuedPool::remove`] so every mutation goes through the same protocol.

use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use parking_lot::RwLock;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    publish::{encode_tx, Publisher, TopicPair},
    rpc::NonceSource,
};

use super::{
    list::PriceList, Address, ListOrder, MemPoolTx, MempoolSnapshot, PendingPool, PoolContent,
    PoolMetrics, PoolTag, PruneStatus, TxHash,
};

/// Classification of one record against a fresh upstream snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxStatus {
    Stuck,
    Unstuck,
}

struct QueuedState {
    by_hash: HashMap<TxHash, MemPoolTx>,
    asc_by_price: PriceList,
    desc_by_price: PriceList,
    /// At most one prune in flight; guarded by the same lock as the data.
    is_pruning: bool,
}

impl QueuedState {
    fn new() -> Self {
        Self {
            by_hash: HashMap::new(),
            asc_by_price: PriceList::new(ListOrder::Ascending),
            desc_by_price: PriceList::new(ListOrder::Descending),
            is_pruning: false,
        }
    }
}

/// The queued pool handle. Cheap to clone via `Arc`; all methods take
/// `&self`.
pub struct QueuedPool {
    state: RwLock<QueuedState>,
    topics: TopicPair,
    /// Worker width of the prune fan-out.
    concurrency: usize,
    rpc: Arc<dyn NonceSource>,
    publisher: Arc<dyn Publisher>,
    pending: Arc<PendingPool>,
    metrics: Arc<dyn PoolMetrics>,
    cancel: CancellationToken,
}

impl fmt::Debug for QueuedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedPool")
            .field("topics", &self.topics)
            .field("concurrency", &self.concurrency)
            .field("size", &self.count())
            .finish_non_exhaustive()
    }
}

impl QueuedPool {
    pub fn new(
        topics: TopicPair,
        concurrency: usize,
        rpc: Arc<dyn NonceSource>,
        publisher: Arc<dyn Publisher>,
        pending: Arc<PendingPool>,
        metrics: Arc<dyn PoolMetrics>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(QueuedState::new()),
            topics,
            concurrency: concurrency.max(1),
            rpc,
            publisher,
            pending,
            metrics,
            cancel,
        })
    }

    /// Admits a record into the pool.
    ///
    /// Returns `true` on a fresh insert; `false` when the hash is already
    /// present, in which case nothing is published.
    pub async fn add(&self, mut tx: MemPoolTx) -> bool {
        {
            let mut st = self.state.write();
            if st.by_hash.contains_key(&tx.hash) {
                return false;
            }
            tx.queued_at = Some(SystemTime::now());
            tx.pool = PoolTag::Queued;
            st.asc_by_price.insert(tx.gas_price, tx.hash);
            st.desc_by_price.insert(tx.gas_price, tx.hash);
            st.by_hash.insert(tx.hash, tx.clone());
            self.metrics.on_added(st.by_hash.len());
        }
        self.publish_event(&self.topics.entry, &tx).await;
        true
    }

    /// Detaches a record, stamping `unstuck_at` before it leaves.
    ///
    /// The exit event carries the record captured here, after the lock is
    /// released; a publish failure never resurrects the record.
    pub async fn remove(&self, hash: &TxHash) -> Option<MemPoolTx> {
        let removed = {
            let mut st = self.state.write();
            let Some(mut tx) = st.by_hash.remove(hash) else {
                return None;
            };
            tx.unstuck_at = Some(SystemTime::now());
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

    /// Whether a prune is currently in flight.
    pub fn is_pruning(&self) -> bool {
        self.state.read().is_pruning
    }

    /// Copies the pool content in the requested price order, or `None` when
    /// the pool is empty. The caller owns the copy; the pool never touches it
    /// again.
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

    pub fn list_asc(&self) -> Option<Vec<MemPoolTx>> {
        self.list(ListOrder::Ascending)
    }

    pub fn list_desc(&self) -> Option<Vec<MemPoolTx>> {
        self.list(ListOrder::Descending)
    }

    /// All records spending the same (sender, nonce) slot as `hash`, the
    /// target itself excluded. `None` when the target is unknown or the pool
    /// is empty.
    pub fn duplicates_of(&self, hash: &TxHash) -> Option<Vec<MemPoolTx>> {
        let target = self.get(hash)?;
        let txs = self.list(ListOrder::Descending)?;
        Some(
            txs.into_iter()
                .filter(|tx| tx.hash != target.hash && tx.is_duplicate_of(&target))
                .collect(),
        )
    }

    pub fn sent_from(&self, address: &Address) -> Option<Vec<MemPoolTx>> {
        let txs = self.list(ListOrder::Descending)?;
        Some(txs.into_iter().filter(|tx| tx.is_sent_from(address)).collect())
    }

    pub fn sent_to(&self, address: &Address) -> Option<Vec<MemPoolTx>> {
        let txs = self.list(ListOrder::Descending)?;
        Some(txs.into_iter().filter(|tx| tx.is_sent_to(address)).collect())
    }

    /// Records queued for at least `age`.
    pub fn older_than(&self, age: Duration) -> Option<Vec<MemPoolTx>> {
        let txs = self.list(ListOrder::Descending)?;
        Some(txs.into_iter().filter(|tx| tx.is_older_than(age)).collect())
    }

    /// Records queued for at most `age`.
    pub fn fresher_than(&self, age: Duration) -> Option<Vec<MemPoolTx>> {
        let txs = self.list(ListOrder::Descending)?;
        Some(txs.into_iter().filter(|tx| tx.is_fresher_than(age)).collect())
    }

    /// The `x` best-paying records.
    ///
    /// # Panics
    ///
    /// Panics when `x` exceeds [`QueuedPool::count`]; callers guard.
    pub fn top_by_highest_price(&self, x: u64) -> Vec<MemPoolTx> {
        let st = self.state.read();
        let want = x as usize;
        assert!(
            want <= st.by_hash.len(),
            "top-x request for {want} txs exceeds pool size {}",
            st.by_hash.len()
        );
        st.desc_by_price
            .hashes()
            .take(want)
            .filter_map(|h| st.by_hash.get(h).cloned())
            .collect()
    }

    /// The `x` worst-paying records.
    ///
    /// # Panics
    ///
    /// Panics when `x` exceeds [`QueuedPool::count`]; callers guard.
    pub fn top_by_lowest_price(&self, x: u64) -> Vec<MemPoolTx> {
        let st = self.state.read();
        let want = x as usize;
        assert!(
            want <= st.by_hash.len(),
            "top-x request for {want} txs exceeds pool size {}",
            st.by_hash.len()
        );
        st.asc_by_price
            .hashes()
            .take(want)
            .filter_map(|h| st.by_hash.get(h).cloned())
            .collect()
    }

    /// Absorbs the queued side of an upstream snapshot. Returns how many
    /// records were new to the pool.
    pub async fn add_queued(&self, content: &PoolContent) -> u64 {
        let mut inserted = 0;
        for tx in content.iter() {
            if self.add(tx.clone()).await {
                inserted += 1;
            }
        }
        inserted
    }

    /// One full reconciliation pass: absorb the queued side, then schedule
    /// the prune against the whole snapshot.
    pub async fn reconcile(self: &Arc<Self>, snapshot: MempoolSnapshot) -> (u64, PruneStatus) {
        let added = self.add_queued(&snapshot.queued).await;
        let status = self.remove_unstuck(snapshot);
        (added, status)
    }

    /// Schedules the prune: reclassify every record against `snapshot` and
    /// promote the unstuck ones to the pending pool.
    ///
    /// Replies immediately. `Pruning` while another prune is in flight,
    /// `Empty` when there is nothing to scan, otherwise `Scheduled` and the
    /// work proceeds on a background task.
    pub fn remove_unstuck(self: &Arc<Self>, snapshot: MempoolSnapshot) -> PruneStatus {
        let batch: Vec<MemPoolTx> = {
            let mut st = self.state.write();
            if st.is_pruning {
                return PruneStatus::Pruning;
            }
            if st.desc_by_price.is_empty() {
                return PruneStatus::Empty;
            }
            st.is_pruning = true;
            st.desc_by_price
                .hashes()
                .filter_map(|h| st.by_hash.get(h).cloned())
                .collect()
        };

        let pool = Arc::clone(self);
        let _prune = tokio::spawn(async move { pool.run_prune(batch, snapshot).await });
        PruneStatus::Scheduled
    }

    async fn run_prune(self: Arc<Self>, batch: Vec<MemPoolTx>, snapshot: MempoolSnapshot) {
        let started = Instant::now();
        let scanned = batch.len();
        let snapshot = Arc::new(snapshot);
        let permits = Arc::new(Semaphore::new(self.concurrency));

        let mut jobs = JoinSet::new();
        for tx in batch {
            let pool = Arc::clone(&self);
            let snapshot = Arc::clone(&snapshot);
            let permits = Arc::clone(&permits);
            jobs.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (tx.hash, TxStatus::Stuck);
                };
                let status = pool.classify(&tx, &snapshot).await;
                (tx.hash, status)
            });
        }

        let mut unstuck = 0u64;
        while let Some(joined) = jobs.join_next().await {
            let Ok((hash, status)) = joined else { continue };
            if status != TxStatus::Unstuck {
                continue;
            }
            // Removal goes back through the public protocol so the exit
            // event fires and the single-writer discipline holds.
            match self.remove(&hash).await {
                Some(removed) => {
                    unstuck += 1;
                    // The pending pool may already hold it; its refusal does
                    // not concern us.
                    let _ = self.pending.add(removed).await;
                }
                None => {
                    debug!(%hash, "unstuck tx vanished before prune removal");
                }
            }
        }

        self.state.write().is_pruning = false;
        self.metrics.on_prune_finished(scanned, unstuck);
        info!(
            scanned,
            unstuck,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "queued pool prune finished"
        );
    }

    /// One classification job. The upstream snapshot settles most records
    /// without touching the network; only records absent from both sides get
    /// the nonce probe.
    async fn classify(&self, tx: &MemPoolTx, snapshot: &MempoolSnapshot) -> TxStatus {
        if snapshot.queued.contains(&tx.hash) {
            return TxStatus::Stuck;
        }
        if snapshot.pending.contains(&tx.hash) {
            return TxStatus::Unstuck;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => TxStatus::Stuck,
            probed = tx.is_unstuck(self.rpc.as_ref()) => match probed {
                Ok(true) => TxStatus::Unstuck,
                Ok(false) => TxStatus::Stuck,
                Err(err) => {
                    warn!(hash = %tx.hash, error = %err, "nonce probe failed, leaving tx queued");
                    TxStatus::Stuck
                }
            },
        }
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
