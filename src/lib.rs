//! mempool-tracker: follows a remote node's transaction mempool, keeps
//! queryable in-memory pools of its queued and pending transactions, and
//! publishes entry/exit events as records move.
//!
//! The heart of the crate is [`txpool::QueuedPool`]: the store of
//! nonce-gapped transactions with two price-ordered views, reconciled against
//! periodic upstream snapshots by [`poll::run`]. Records that become eligible
//! are promoted to the [`txpool::PendingPool`]. The RPC and pub/sub
//! collaborators are trait seams ([`rpc`], [`publish`]) with concrete
//! implementations for the binary.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod config;
pub mod poll;
pub mod publish;
pub mod rpc;
pub mod telemetry;
pub mod txpool;

pub use config::Config;
pub use txpool::{
    Address, GasPrice, ListOrder, MemPoolTx, MempoolSnapshot, PendingPool, PoolContent, PoolTag,
    PruneStatus, QueuedPool, TxHash,
};
