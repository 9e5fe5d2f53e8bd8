//! Price-ordered index over the records of a pool.
//!
//! The pool keeps two instances of this list, one per direction, next to its
//! hash map; the list stores `(gas_price, hash)` keys and the map owns the
//! records. Equal prices keep arrival order in the ascending view and the
//! reversed arrival order in the descending view, so the two views are exact
//! mirrors of each other at all times.

use super::{GasPrice, ListOrder, TxHash};

#[derive(Clone, Copy, Debug)]
struct PriceKey {
    gas_price: GasPrice,
    hash: TxHash,
}

/// Sorted sequence of transaction keys, ascending or descending by price.
#[derive(Debug)]
pub struct PriceList {
    order: ListOrder,
    entries: Vec<PriceKey>,
}

impl PriceList {
    pub fn new(order: ListOrder) -> Self {
        Self {
            order,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a key at its sorted position.
    ///
    /// Ties go after existing equal-priced entries here when ascending and
    /// before them when descending; that keeps the descending list the exact
    /// reverse of the ascending one.
    pub fn insert(&mut self, gas_price: GasPrice, hash: TxHash) {
        let at = match self.order {
            ListOrder::Ascending => self.entries.partition_point(|e| e.gas_price <= gas_price),
            ListOrder::Descending => self.entries.partition_point(|e| e.gas_price > gas_price),
        };
        self.entries.insert(at, PriceKey { gas_price, hash });
    }

    /// Removes the entry for `hash`, by identity rather than by price, since
    /// several records may share a price. Returns whether anything was cut.
    pub fn remove(&mut self, hash: &TxHash) -> bool {
        match self.entries.iter().position(|e| e.hash == *hash) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    /// Hashes in list order.
    pub fn hashes(&self) -> impl Iterator<Item = &TxHash> + '_ {
        self.entries.iter().map(|e| &e.hash)
    }
}
