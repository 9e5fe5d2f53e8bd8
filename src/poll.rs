//! Polling driver.
//!
//! Fetches the upstream mempool content on a fixed period and feeds it to the
//! pools: the pending side straight into the pending pool, then one full
//! queued-pool reconciliation (absorb + prune). A failed fetch is logged and
//! retried on the next tick; only cancellation stops the loop.

use std::{sync::Arc, time::Duration};

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    rpc::MempoolSource,
    txpool::{PendingPool, QueuedPool},
};

pub async fn run(
    source: Arc<dyn MempoolSource>,
    queued: Arc<QueuedPool>,
    pending: Arc<PendingPool>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_ms = period.as_millis() as u64, "mempool poller started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("mempool poller stopped");
                break;
            }
            _ = ticker.tick() => {
                let snapshot = match source.mempool_content().await {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        warn!(error = %err, "failed to fetch mempool content");
                        continue;
                    }
                };
                let pending_added = pending.add_pending(&snapshot.pending).await;
                let (queued_added, prune) = queued.reconcile(snapshot).await;
                debug!(queued_added, pending_added, ?prune, "snapshot reconciled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        publish::{BroadcastPublisher, TopicPair},
        rpc::{NonceSource, RpcError},
        txpool::{Address, MemPoolTx, MempoolSnapshot, NoopMetrics, TxHash},
    };
    use async_trait::async_trait;

    struct ZeroNonces;

    #[async_trait]
    impl NonceSource for ZeroNonces {
        async fn account_nonce(&self, _address: Address) -> Result<u64, RpcError> {
            Ok(0)
        }
    }

    struct CannedSource(MempoolSnapshot);

    #[async_trait]
    impl MempoolSource for CannedSource {
        async fn mempool_content(&self) -> Result<MempoolSnapshot, RpcError> {
            Ok(self.0.clone())
        }
    }

    fn topics(prefix: &str) -> TopicPair {
        TopicPair {
            entry: format!("{prefix}_entry"),
            exit: format!("{prefix}_exit"),
        }
    }

    #[tokio::test]
    async fn one_tick_feeds_both_pools_and_stops_on_cancel() {
        let publisher = Arc::new(BroadcastPublisher::new(64));
        let pending = PendingPool::new(topics("pending_tx"), publisher.clone(), Arc::new(NoopMetrics));
        let queued = QueuedPool::new(
            topics("queued_tx"),
            2,
            Arc::new(ZeroNonces),
            publisher.clone(),
            pending.clone(),
            Arc::new(NoopMetrics),
            CancellationToken::new(),
        );

        let mut snapshot = MempoolSnapshot::default();
        snapshot
            .queued
            .insert(MemPoolTx::new(TxHash([1; 32]), Address([1; 20]), None, 5, 10));
        snapshot
            .pending
            .insert(MemPoolTx::new(TxHash([2; 32]), Address([2; 20]), None, 0, 20));

        let cancel = CancellationToken::new();
        let driver = tokio::spawn(run(
            Arc::new(CannedSource(snapshot)),
            queued.clone(),
            pending.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while queued.count() == 0 || pending.count() == 0 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "poller never fed the pools"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(queued.exists(&TxHash([1; 32])));
        assert!(pending.exists(&TxHash([2; 32])));

        cancel.cancel();
        driver.await.unwrap();
    }
}
