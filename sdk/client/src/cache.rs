//! Transaction Cache
//!
//! Sparse map from nonce to what is known about it. A nonce that was fetched
//! and turned out empty is recorded explicitly, so "never fetched" and
//! "nothing there" are different states.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::transaction::{ElusivTransaction, TransactionStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonceSlot {
    FetchedEmpty,
    /// Records in chronological order
    Transactions(Vec<ElusivTransaction>),
}

#[derive(Debug, Default)]
pub struct TransactionCache {
    slots: BTreeMap<u32, NonceSlot>,
}

impl TransactionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert records not present yet; existing records are left untouched
    pub fn cache(&mut self, txs: impl IntoIterator<Item = ElusivTransaction>) {
        for tx in txs {
            match self.slots.entry(tx.nonce) {
                Entry::Vacant(e) => {
                    e.insert(NonceSlot::Transactions(vec![tx]));
                }
                Entry::Occupied(mut e) => match e.get_mut() {
                    NonceSlot::Transactions(existing) => {
                        if !existing.iter().any(|t| t.same_record(&tx)) {
                            existing.push(tx);
                        }
                    }
                    slot @ NonceSlot::FetchedEmpty => {
                        *slot = NonceSlot::Transactions(vec![tx]);
                    }
                },
            }
        }
    }

    /// Replace everything stored at the nonces touched by `txs`
    pub fn cache_overwrite(&mut self, txs: impl IntoIterator<Item = ElusivTransaction>) {
        let mut grouped: BTreeMap<u32, Vec<ElusivTransaction>> = BTreeMap::new();
        for tx in txs {
            grouped.entry(tx.nonce).or_default().push(tx);
        }
        for (nonce, txs) in grouped {
            self.slots.insert(nonce, NonceSlot::Transactions(txs));
        }
    }

    /// Record that `nonce` has no transactions, unless something is cached
    pub fn mark_empty(&mut self, nonce: u32) {
        self.slots.entry(nonce).or_insert(NonceSlot::FetchedEmpty);
    }

    pub fn is_fetched(&self, nonce: u32) -> bool {
        self.slots.contains_key(&nonce)
    }

    pub fn slot(&self, nonce: u32) -> Option<&NonceSlot> {
        self.slots.get(&nonce)
    }

    /// Cached records with `from <= nonce < to`, ascending nonce
    pub fn read_range(&self, token_id: Option<u16>, from: u32, to: u32) -> Vec<ElusivTransaction> {
        if from >= to {
            return Vec::new();
        }
        self.slots
            .range(from..to)
            .filter_map(|(_, slot)| match slot {
                NonceSlot::Transactions(txs) => Some(txs),
                NonceSlot::FetchedEmpty => None,
            })
            .flatten()
            .filter(|tx| token_id.is_none_or(|t| tx.token_id == t))
            .cloned()
            .collect()
    }

    /// Advance the status of the record matching `tx`
    pub fn advance_status(&mut self, tx: &ElusivTransaction, status: TransactionStatus) {
        if let Some(NonceSlot::Transactions(txs)) = self.slots.get_mut(&tx.nonce) {
            for cached in txs.iter_mut().filter(|c| c.same_record(tx)) {
                cached.advance_status(status);
            }
        }
    }

    /// Highest nonce known to hold transactions
    pub fn latest_nonce(&self) -> Option<u32> {
        self.slots
            .iter()
            .rev()
            .find(|(_, slot)| matches!(slot, NonceSlot::Transactions(_)))
            .map(|(nonce, _)| *nonce)
    }
}
