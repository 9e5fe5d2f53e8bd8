//! End-to-end flows through the queued pool and its collaborators: admission,
//! ordered views, duplicate detection and snapshot reconciliation.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use mempool_tracker::{
    publish::{PublishError, Publisher, TopicPair},
    rpc::{NonceSource, RpcError},
    txpool::{
        Address, MemPoolTx, MempoolSnapshot, NoopMetrics, PendingPool, PruneStatus, QueuedPool,
        TxHash,
    },
};

const QUEUED_ENTRY: &str = "queued_tx_entry";
const QUEUED_EXIT: &str = "queued_tx_exit";

#[derive(Default)]
struct RecordingPublisher {
    messages: Mutex<Vec<(String, Bytes)>>,
}

impl RecordingPublisher {
    fn on_topic(&self, topic: &str) -> Vec<MemPoolTx> {
        self.messages
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| serde_json::from_slice(payload).expect("decodable payload"))
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        self.messages.lock().push((topic.to_owned(), payload));
        Ok(())
    }
}

struct StaticNonces(HashMap<Address, u64>);

#[async_trait]
impl NonceSource for StaticNonces {
    async fn account_nonce(&self, address: Address) -> Result<u64, RpcError> {
        Ok(self.0.get(&address).copied().unwrap_or(0))
    }
}

fn hash(x: u8) -> TxHash {
    TxHash([x; 32])
}

fn addr(x: u8) -> Address {
    Address([x; 20])
}

fn tx(h: u8, from: u8, nonce: u64, gas_price: u128) -> MemPoolTx {
    MemPoolTx::new(hash(h), addr(from), Some(addr(0xee)), nonce, gas_price)
}

fn tracker() -> (Arc<QueuedPool>, Arc<PendingPool>, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::default());
    let pending = PendingPool::new(
        TopicPair {
            entry: "pending_tx_entry".into(),
            exit: "pending_tx_exit".into(),
        },
        publisher.clone(),
        Arc::new(NoopMetrics),
    );
    let queued = QueuedPool::new(
        TopicPair {
            entry: QUEUED_ENTRY.into(),
            exit: QUEUED_EXIT.into(),
        },
        4,
        Arc::new(StaticNonces(HashMap::new())),
        publisher.clone(),
        pending.clone(),
        Arc::new(NoopMetrics),
        CancellationToken::new(),
    );
    (queued, pending, publisher)
}

async fn wait_prune_done(pool: &QueuedPool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while pool.is_pruning() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "prune did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn add_then_query() {
    let (queued, _, publisher) = tracker();
    assert!(queued.add(tx(0xaa, 0xa0, 3, 10)).await);

    assert_eq!(queued.count(), 1);
    assert!(queued.exists(&hash(0xaa)));

    let asc = queued.list_asc().unwrap();
    let desc = queued.list_desc().unwrap();
    assert_eq!(asc.len(), 1);
    assert_eq!(desc.len(), 1);
    assert_eq!(asc[0].hash, hash(0xaa));
    assert_eq!(desc[0].hash, hash(0xaa));
    assert!(asc[0].queued_at.is_some());

    let entries = publisher.on_topic(QUEUED_ENTRY);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].hash, hash(0xaa));
}

#[tokio::test]
async fn views_are_price_sorted() {
    let (queued, _, _) = tracker();
    queued.add(tx(1, 1, 0, 10)).await;
    queued.add(tx(2, 2, 0, 30)).await;
    queued.add(tx(3, 3, 0, 20)).await;

    let asc: Vec<u128> = queued
        .list_asc()
        .unwrap()
        .iter()
        .map(|t| t.gas_price)
        .collect();
    assert_eq!(asc, vec![10, 20, 30]);

    let desc: Vec<u128> = queued
        .list_desc()
        .unwrap()
        .iter()
        .map(|t| t.gas_price)
        .collect();
    assert_eq!(desc, vec![30, 20, 10]);
}

#[tokio::test]
async fn duplicates_are_symmetric() {
    let (queued, _, _) = tracker();
    queued.add(tx(0xa1, 0x0a, 5, 10)).await;
    queued.add(tx(0xa2, 0x0a, 5, 12)).await;

    let of_first = queued.duplicates_of(&hash(0xa1)).unwrap();
    assert_eq!(of_first.len(), 1);
    assert_eq!(of_first[0].hash, hash(0xa2));

    let of_second = queued.duplicates_of(&hash(0xa2)).unwrap();
    assert_eq!(of_second.len(), 1);
    assert_eq!(of_second[0].hash, hash(0xa1));
}

#[tokio::test]
async fn prune_promotes_upstream_pending_tx() {
    let (queued, pending, publisher) = tracker();
    queued.add(tx(0xbb, 0x0b, 7, 10)).await;

    let mut snapshot = MempoolSnapshot::default();
    snapshot.pending.insert(tx(0xbb, 0x0b, 7, 10));

    assert_eq!(queued.remove_unstuck(snapshot), PruneStatus::Scheduled);
    wait_prune_done(&queued).await;

    assert!(!queued.exists(&hash(0xbb)));
    assert_eq!(queued.count(), 0);
    assert!(pending.exists(&hash(0xbb)));

    let exits = publisher.on_topic(QUEUED_EXIT);
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].hash, hash(0xbb));
    assert!(exits[0].unstuck_at.is_some());
}

#[tokio::test]
async fn prune_keeps_upstream_queued_tx() {
    let (queued, pending, publisher) = tracker();
    queued.add(tx(0xcc, 0x0c, 9, 10)).await;

    let mut snapshot = MempoolSnapshot::default();
    snapshot.queued.insert(tx(0xcc, 0x0c, 9, 10));

    assert_eq!(queued.remove_unstuck(snapshot), PruneStatus::Scheduled);
    wait_prune_done(&queued).await;

    assert!(queued.exists(&hash(0xcc)));
    assert_eq!(queued.count(), 1);
    assert_eq!(pending.count(), 0);
    assert!(publisher.on_topic(QUEUED_EXIT).is_empty());
}

#[tokio::test]
async fn back_to_back_prunes_report_busy() {
    let (queued, _, _) = tracker();
    queued.add(tx(0xdd, 0x0d, 1, 10)).await;

    let mut snapshot = MempoolSnapshot::default();
    snapshot.queued.insert(tx(0xdd, 0x0d, 1, 10));

    assert_eq!(
        queued.remove_unstuck(snapshot.clone()),
        PruneStatus::Scheduled
    );
    assert_eq!(queued.remove_unstuck(snapshot), PruneStatus::Pruning);

    wait_prune_done(&queued).await;
    assert!(queued.exists(&hash(0xdd)));
}
