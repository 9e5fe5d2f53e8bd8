//! Transaction pool model for the mempool tracker.
//!
//! Features:
//! - `MemPoolTx`: one observed mempool transaction with classification
//!   predicates (duplicate, sender/recipient, age, unstuck probe)
//! - `QueuedPool`: thread-safe store of nonce-gapped transactions with two
//!   price-ordered views and the snapshot reconciliation (prune) protocol
//! - `PendingPool`: the collaborator pool for block-eligible transactions
//! - Pluggable metrics via the `PoolMetrics` trait
//!
//! Notes:
//! - Both pools publish entry/exit events through the `Publisher` seam in
//!   `crate::publish`; publish failures never roll back pool state.
//! - Identity fields of a record (`hash`, `from`, `nonce`) are never mutated
//!   once the record enters a pool; only the transition timestamps are.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, SystemTime},
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::rpc::{NonceSource, RpcError};

mod list;
mod pending;
mod queued;
mod snapshot;

pub use list::PriceList;
pub use pending::PendingPool;
pub use queued::QueuedPool;
pub use snapshot::{MempoolSnapshot, PoolContent};

/// Bid price per unit of gas.
///
/// Wide enough for any observable bid; the upstream decoder rejects
/// quantities that do not fit instead of truncating.
pub type GasPrice = u128;

/// Error returned when decoding a fixed-width hex identifier.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("expected a {expected}-byte hex string")]
pub struct HexParseError {
    expected: usize,
}

fn parse_fixed_hex<const N: usize>(s: &str) -> Result<[u8; N], HexParseError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(digits).map_err(|_| HexParseError { expected: N })?;
    bytes.try_into().map_err(|_| HexParseError { expected: N })
}

/// 32-byte transaction hash, the primary key of every pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

impl FromStr for TxHash {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_hex(s).map(TxHash)
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_hex(s).map(Address)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Advisory label telling which pool currently holds a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolTag {
    #[default]
    Queued,
    Pending,
}

/// Iteration order over a price-sorted view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListOrder {
    Ascending,
    Descending,
}

/// Reply of the prune request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PruneStatus {
    /// The prune was accepted and runs asynchronously.
    Scheduled,
    /// Another prune is already in flight; retry later.
    Pruning,
    /// The pool holds nothing to prune.
    Empty,
}

/// One transaction observed in the upstream mempool.
///
/// Identity (`hash`, `from`, `nonce`) is fixed at creation; the transition
/// timestamps are stamped by the pools and never cleared.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemPoolTx {
    pub hash: TxHash,
    pub from: Address,
    /// Recipient; absent for contract-creation transactions.
    pub to: Option<Address>,
    pub nonce: u64,
    pub gas_price: GasPrice,
    /// When the tracker first saw the record in the queued set.
    #[serde(default)]
    pub queued_at: Option<SystemTime>,
    /// When the record entered the pending pool.
    #[serde(default)]
    pub pending_at: Option<SystemTime>,
    /// When the record was classified unstuck and left the queued pool.
    #[serde(default)]
    pub unstuck_at: Option<SystemTime>,
    #[serde(default)]
    pub pool: PoolTag,
}

impl MemPoolTx {
    /// Builds a record fresh out of an upstream snapshot entry, with no
    /// transition timestamps stamped yet.
    pub fn new(
        hash: TxHash,
        from: Address,
        to: Option<Address>,
        nonce: u64,
        gas_price: GasPrice,
    ) -> Self {
        Self {
            hash,
            from,
            to,
            nonce,
            gas_price,
            queued_at: None,
            pending_at: None,
            unstuck_at: None,
            pool: PoolTag::default(),
        }
    }

    /// Two records are duplicates when they spend the same nonce of the same
    /// sender, regardless of price or payload.
    pub fn is_duplicate_of(&self, other: &MemPoolTx) -> bool {
        self.from == other.from && self.nonce == other.nonce
    }

    pub fn is_sent_from(&self, address: &Address) -> bool {
        self.from == *address
    }

    pub fn is_sent_to(&self, address: &Address) -> bool {
        self.to.as_ref() == Some(address)
    }

    /// Time spent in the queued pool so far. `None` before the record has
    /// been admitted (or if the clock went backwards).
    pub fn queued_for(&self) -> Option<Duration> {
        let queued_at = self.queued_at?;
        SystemTime::now().duration_since(queued_at).ok()
    }

    /// Queued for at least `age`.
    pub fn is_older_than(&self, age: Duration) -> bool {
        self.queued_for().is_some_and(|d| d >= age)
    }

    /// Queued for at most `age`.
    pub fn is_fresher_than(&self, age: Duration) -> bool {
        self.queued_for().is_some_and(|d| d <= age)
    }

    /// Probes whether the sender's current account nonce has caught up with
    /// this record, i.e. the nonce gap closed and the record is eligible for
    /// the pending pool.
    ///
    /// A transport failure is surfaced as an error; callers treat the record
    /// as still stuck in that case.
    pub async fn is_unstuck(&self, rpc: &dyn NonceSource) -> Result<bool, RpcError> {
        let account_nonce = rpc.account_nonce(self.from).await?;
        Ok(self.nonce == account_nonce)
    }
}

/// Pluggable metrics recorder for pool mutations.
pub trait PoolMetrics: Send + Sync + 'static {
    fn on_added(&self, pool_size: usize);
    fn on_removed(&self, pool_size: usize);
    fn on_prune_finished(&self, scanned: usize, removed: u64);
}

/// No-op recorder used as the default.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl PoolMetrics for NoopMetrics {
    fn on_added(&self, _pool_size: usize) {}
    fn on_removed(&self, _pool_size: usize) {}
    fn on_prune_finished(&self, _scanned: usize, _removed: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(x: u8) -> Address {
        Address([x; 20])
    }

    fn hash(x: u8) -> TxHash {
        TxHash([x; 32])
    }

    #[test]
    fn hex_roundtrip() {
        let h = hash(0xab);
        let parsed: TxHash = h.to_string().parse().unwrap();
        assert_eq!(parsed, h);

        let a = addr(0x11);
        let parsed: Address = a.to_string().parse().unwrap();
        assert_eq!(parsed, a);
    }

    #[test]
    fn hex_rejects_wrong_width() {
        assert!("0xdead".parse::<TxHash>().is_err());
        assert!("0xdead".parse::<Address>().is_err());
        assert!("not hex at all".parse::<Address>().is_err());
    }

    #[test]
    fn duplicate_predicate_ignores_price() {
        let a = MemPoolTx::new(hash(1), addr(1), Some(addr(9)), 5, 10);
        let b = MemPoolTx::new(hash(2), addr(1), None, 5, 999);
        let c = MemPoolTx::new(hash(3), addr(1), None, 6, 10);

        assert!(a.is_duplicate_of(&b));
        assert!(b.is_duplicate_of(&a));
        assert!(!a.is_duplicate_of(&c));
    }

    #[test]
    fn address_predicates() {
        let tx = MemPoolTx::new(hash(1), addr(1), Some(addr(2)), 0, 1);
        assert!(tx.is_sent_from(&addr(1)));
        assert!(!tx.is_sent_from(&addr(2)));
        assert!(tx.is_sent_to(&addr(2)));
        assert!(!tx.is_sent_to(&addr(1)));

        let creation = MemPoolTx::new(hash(2), addr(1), None, 0, 1);
        assert!(!creation.is_sent_to(&addr(2)));
    }

    #[test]
    fn age_predicates() {
        let mut tx = MemPoolTx::new(hash(1), addr(1), None, 0, 1);
        // not admitted yet: matches neither bound
        assert!(!tx.is_older_than(Duration::ZERO));
        assert!(!tx.is_fresher_than(Duration::from_secs(3600)));

        tx.queued_at = Some(SystemTime::now() - Duration::from_secs(120));
        assert!(tx.is_older_than(Duration::from_secs(60)));
        assert!(!tx.is_older_than(Duration::from_secs(600)));
        assert!(tx.is_fresher_than(Duration::from_secs(600)));
        assert!(!tx.is_fresher_than(Duration::from_secs(60)));
    }
}
