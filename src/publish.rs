//! Event publishing seam.
//!
//! Pools announce every entry into and exit out of a pool on two opaque
//! topics. Publishing is fire-and-forget: a failed publish is logged by the
//! caller and the pool mutation stands. Payloads are the self-describing
//! JSON encoding of the full record, so every field survives the trip to a
//! subscriber.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::txpool::MemPoolTx;

/// Default capacity of the in-process event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 512;

/// Errors surfaced by a publish attempt. Callers log and drop them.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode event payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("publish backend error: {0}")]
    Backend(String),
}

/// Entry/exit topic names of one pool.
#[derive(Clone, Debug)]
pub struct TopicPair {
    pub entry: String,
    pub exit: String,
}

/// Outbound pub/sub connection.
#[async_trait]
pub trait Publisher: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError>;
}

/// Encodes a record for the wire.
pub fn encode_tx(tx: &MemPoolTx) -> Result<Bytes, PublishError> {
    Ok(Bytes::from(serde_json::to_vec(tx)?))
}

/// One published event as seen by in-process subscribers.
#[derive(Clone, Debug)]
pub struct PoolMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// In-process fan-out over a broadcast channel.
///
/// A send without live subscribers is still a successful publish; the events
/// are best-effort and nobody is required to listen.
#[derive(Debug)]
pub struct BroadcastPublisher {
    events: broadcast::Sender<PoolMessage>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolMessage> {
        self.events.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        let _ = self.events.send(PoolMessage {
            topic: topic.to_owned(),
            payload,
        });
        Ok(())
    }
}

/// Kafka-backed publisher, compiled in with the `kafka` feature.
#[cfg(feature = "kafka")]
pub mod kafka {
    use std::time::Duration;

    use rdkafka::{
        producer::{FutureProducer, FutureRecord},
        util::Timeout,
        ClientConfig,
    };

    use super::*;

    pub struct KafkaPublisher {
        producer: FutureProducer,
        delivery_timeout: Duration,
    }

    impl KafkaPublisher {
        pub fn new(brokers: &str, delivery_timeout: Duration) -> Result<Self, PublishError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .create()
                .map_err(|e| PublishError::Backend(e.to_string()))?;
            Ok(Self {
                producer,
                delivery_timeout,
            })
        }
    }

    #[async_trait]
    impl Publisher for KafkaPublisher {
        async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
            let record = FutureRecord::<'_, (), _>::to(topic).payload(payload.as_ref());
            self.producer
                .send(record, Timeout::After(self.delivery_timeout))
                .await
                .map(|_| ())
                .map_err(|(e, _)| PublishError::Backend(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txpool::{Address, PoolTag, TxHash};
    use std::time::SystemTime;

    #[test]
    fn payload_roundtrips_every_field() {
        let mut tx = MemPoolTx::new(
            TxHash([0xaa; 32]),
            Address([1; 20]),
            Some(Address([2; 20])),
            7,
            42_000_000_000,
        );
        tx.queued_at = Some(SystemTime::now());
        tx.unstuck_at = Some(SystemTime::now());
        tx.pool = PoolTag::Pending;

        let payload = encode_tx(&tx).unwrap();
        let decoded: MemPoolTx = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded, tx);
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscriber() {
        let publisher = BroadcastPublisher::new(8);
        let mut events = publisher.subscribe();

        let tx = MemPoolTx::new(TxHash([1; 32]), Address([1; 20]), None, 0, 1);
        let payload = encode_tx(&tx).unwrap();
        publisher.publish("queued_tx_entry", payload).await.unwrap();

        let msg = events.recv().await.unwrap();
        assert_eq!(msg.topic, "queued_tx_entry");
        let decoded: MemPoolTx = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(decoded.hash, tx.hash);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let publisher = BroadcastPublisher::new(8);
        let tx = MemPoolTx::new(TxHash([1; 32]), Address([1; 20]), None, 0, 1);
        let payload = encode_tx(&tx).unwrap();
        assert!(publisher.publish("queued_tx_exit", payload).await.is_ok());
    }
}
