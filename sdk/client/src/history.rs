//! History Manager
//!
//! Answers "the last N transactions before nonce C" by walking backwards in
//! fixed-size nonce batches and merging each batch into the cache. Batches
//! are strictly sequential; every batch starts where the previous one ended.
//!
//! Status rule: a nonce can only be used once the operation of the previous
//! one is final, so every record below the newest nonce of the window is
//! confirmed. Records at the newest nonce are checked against the tree one
//! by one, since a top up and a send may share a nonce.

use elusiv_privacy::{CommitmentMetadata, IncompleteCommitment, SeedKeys};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::cache::{NonceSlot, TransactionCache};
use crate::error::{ElusivError, Result};
use crate::fetcher::IdentifierFetcher;
use crate::transaction::{ElusivTransaction, TransactionKind, TransactionStatus};
use crate::tree::manager::TreeManager;

pub const DEFAULT_BATCH_SIZE: u32 = 10;

pub struct HistoryManager {
    fetcher: IdentifierFetcher,
    tree: Arc<TreeManager>,
    keys: Arc<SeedKeys>,
    cache: RwLock<TransactionCache>,
    batch_size: u32,
}

impl HistoryManager {
    pub fn new(
        fetcher: IdentifierFetcher,
        tree: Arc<TreeManager>,
        keys: Arc<SeedKeys>,
        batch_size: u32,
    ) -> Self {
        Self {
            fetcher,
            tree,
            keys,
            cache: RwLock::new(TransactionCache::new()),
            batch_size: batch_size.max(1),
        }
    }

    pub fn tree(&self) -> &Arc<TreeManager> {
        &self.tree
    }

    /// Highest nonce with on-chain activity, `None` for a fresh wallet.
    ///
    /// Nonces are used in sequence, so an exponential probe finds an unused
    /// nonce and a binary search narrows the gap.
    pub async fn latest_nonce(&self) -> Result<Option<u32>> {
        let known = self.cache.read().await.latest_nonce();
        let mut used = match known {
            Some(nonce) => nonce,
            None => {
                if !self.fetcher.has_activity(0).await? {
                    return Ok(None);
                }
                0
            }
        };

        let mut step: u32 = 1;
        let mut unused = loop {
            let probe = used.saturating_add(step);
            if probe == used {
                return Ok(Some(used));
            }
            if !self.fetcher.has_activity(probe).await? {
                break probe;
            }
            used = probe;
            step = step.saturating_mul(2);
        };

        while unused - used > 1 {
            let mid = used + (unused - used) / 2;
            if self.fetcher.has_activity(mid).await? {
                used = mid;
            } else {
                unused = mid;
            }
        }
        debug!("Latest nonce: {}", used);
        Ok(Some(used))
    }

    /// Make sure `[from, to)` is in the cache.
    ///
    /// Nonces whose records are all confirmed are final and never fetched
    /// again; anything else is re-fetched and overwritten, so an in-flight
    /// send is replaced by its finalized record.
    async fn fill(&self, from: u32, to: u32) -> Result<()> {
        let requests: Vec<(u32, bool)> = {
            let cache = self.cache.read().await;
            (from..to)
                .map(|nonce| {
                    let settled = matches!(
                        cache.slot(nonce),
                        Some(NonceSlot::Transactions(txs)) if txs.iter().all(|t| t.is_confirmed())
                    );
                    (nonce, settled)
                })
                .collect()
        };
        debug!(
            "History batch [{}, {}): {} nonces to fetch",
            from,
            to,
            requests.iter().filter(|(_, cached)| !cached).count()
        );

        let fetched = self.fetcher.fetch(&requests).await?;
        let mut cache = self.cache.write().await;
        for (nonce, records) in fetched {
            if records.is_empty() {
                cache.mark_empty(nonce);
            } else {
                cache.cache_overwrite(records);
            }
        }
        Ok(())
    }

    /// Up to `count` records, newest first, restricted to `token_id` when
    /// given and to nonces below `before` when given.
    ///
    /// A nonce is never split: when the `count`-th record shares its nonce
    /// with older ones, those come along too.
    pub async fn fetch_last(
        &self,
        count: usize,
        token_id: Option<u16>,
        before: Option<u32>,
    ) -> Result<Vec<ElusivTransaction>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let Some(latest) = self.latest_nonce().await? else {
            return Ok(Vec::new());
        };
        let end = latest.saturating_add(1);
        let mut to = before.map_or(end, |b| b.min(end));

        let wanted = |tx: &ElusivTransaction| token_id.is_none_or(|t| tx.token_id == t);

        // Newest first, all tokens
        let mut window: Vec<ElusivTransaction> = Vec::new();
        let mut matching = 0;
        while to > 0 && matching < count {
            let from = to.saturating_sub(self.batch_size);
            self.fill(from, to).await?;
            let batch = self.cache.read().await.read_range(None, from, to);
            if batch.is_empty() {
                debug!("Empty history batch [{}, {}), stopping", from, to);
                break;
            }
            matching += batch.iter().filter(|&tx| wanted(tx)).count();
            window.extend(batch.into_iter().rev());
            to = from;
        }

        self.settle_statuses(&mut window, latest).await?;

        let mut result: Vec<ElusivTransaction> = window.into_iter().filter(|tx| wanted(tx)).collect();
        if result.len() > count {
            let boundary = result[count - 1].nonce;
            result.retain(|tx| tx.nonce >= boundary);
        }
        Ok(result)
    }

    /// Confirm every record below the newest nonce of the window. Records
    /// at that nonce are final only if a later nonce exists or the tree
    /// already holds their commitment.
    async fn settle_statuses(&self, window: &mut [ElusivTransaction], latest: u32) -> Result<()> {
        let Some(newest_nonce) = window.first().map(|tx| tx.nonce) else {
            return Ok(());
        };
        for tx in window.iter_mut() {
            if tx.nonce < newest_nonce || newest_nonce < latest {
                tx.advance_status(TransactionStatus::Confirmed);
            } else if !tx.is_confirmed()
                && self
                    .tree
                    .has_commitment(tx.commitment_hash, tx.merkle_start_index as u64)
                    .await?
            {
                tx.advance_status(TransactionStatus::Confirmed);
            }
        }

        let mut cache = self.cache.write().await;
        for tx in window.iter() {
            if let Some(status) = tx.status {
                cache.advance_status(tx, status);
            }
        }
        Ok(())
    }

    /// Every record of `token_id`, oldest first
    pub async fn full_history(&self, token_id: u16) -> Result<Vec<ElusivTransaction>> {
        let mut history = self.fetch_last(usize::MAX, Some(token_id), None).await?;
        history.reverse();
        Ok(history)
    }

    /// Private balance of `token_id`.
    ///
    /// Tries the shortcut through the latest send's encrypted metadata first
    /// and replays the full history when the shortcut cannot be verified.
    ///
    /// The shortcut is accepted only if the commitment rebuilt from the
    /// decrypted balance hashes to the commitment recorded on chain. A
    /// Poseidon collision between a wrong balance and the recorded commitment
    /// would go unnoticed; this is assumed not to happen.
    pub async fn private_balance(&self, token_id: u16) -> Result<u64> {
        let history = self.full_history(token_id).await?;
        check_conflicts(&history)?;
        match self.fast_balance(token_id, &history) {
            Some(balance) => Ok(balance),
            None => replay_balance(&history),
        }
    }

    /// Latest send's self-reported balance plus every later top up
    fn fast_balance(&self, token_id: u16, history: &[ElusivTransaction]) -> Option<u64> {
        let (position, send) = history.iter().enumerate().rev().find(|(_, tx)| tx.is_send())?;
        let Some(ciphertext) = send.send.as_ref().and_then(|d| d.encrypted_metadata) else {
            debug!("Send at nonce {} carries no metadata", send.nonce);
            return None;
        };

        let metadata = match CommitmentMetadata::decrypt(
            &ciphertext,
            self.keys.root_viewing_key(),
            &send.commitment_hash,
        ) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Metadata of nonce {} does not decrypt: {}", send.nonce, e);
                return None;
            }
        };

        let nullifier = match self.keys.nullifier(send.nonce) {
            Ok(nullifier) => nullifier,
            Err(e) => {
                warn!("No nullifier for nonce {}: {}", send.nonce, e);
                return None;
            }
        };
        let rebuilt = IncompleteCommitment::new(
            nullifier,
            metadata.balance(),
            token_id,
            metadata.assoc_comm_index(),
        );
        if metadata.token_id() != token_id || rebuilt.hash() != send.commitment_hash {
            warn!(
                "Metadata of nonce {} does not match its commitment, replaying history",
                send.nonce
            );
            return None;
        }

        history[position + 1..]
            .iter()
            .filter(|tx| tx.is_topup())
            .try_fold(metadata.balance(), |acc, tx| acc.checked_add(tx.amount))
    }
}

/// Two records of one kind at one nonce with different commitments cannot
/// both be canonical.
fn check_conflicts(history: &[ElusivTransaction]) -> Result<()> {
    let mut seen: HashMap<(u32, TransactionKind), &ElusivTransaction> = HashMap::new();
    for tx in history {
        if let Some(previous) = seen.insert((tx.nonce, tx.kind), tx) {
            if previous.commitment_hash != tx.commitment_hash {
                return Err(ElusivError::ConflictingRecords { nonce: tx.nonce });
            }
        }
    }
    Ok(())
}

/// Sum of every top up minus every send and its fee
fn replay_balance(history: &[ElusivTransaction]) -> Result<u64> {
    let total: i128 = history.iter().map(ElusivTransaction::balance_delta).sum();
    u64::try_from(total).map_err(|_| {
        ElusivError::InvalidAccess(format!("history replays to balance {total}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::scenario::Scenario;
    use elusiv_privacy::CommitmentHash;
    use solana_sdk::pubkey::Pubkey;

    /// Top up 100, send 30 with fee 5, top up 10
    fn three_step() -> Scenario {
        let mut s = Scenario::new();
        s.topup(0, 100, 0);
        s.send(1, 30, 5, 0);
        s.topup(2, 10, 0);
        s
    }

    #[tokio::test]
    async fn test_latest_nonce() {
        let mut s = Scenario::new();
        assert_eq!(s.history(3).latest_nonce().await.unwrap(), None);
        for nonce in 0..11 {
            s.topup(nonce, 1, 0);
        }
        assert_eq!(s.history(3).latest_nonce().await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_fetch_last_newest_first() {
        let s = three_step();
        let history = s.history(2);
        let txs = history.fetch_last(10, None, None).await.unwrap();
        assert_eq!(txs.iter().map(|t| t.nonce).collect::<Vec<_>>(), vec![2, 1, 0]);
        assert!(txs.iter().all(|t| t.is_confirmed()));

        let before = history.fetch_last(1, None, Some(2)).await.unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].nonce, 1);
        assert!(before[0].is_send());
    }

    #[tokio::test]
    async fn test_token_filter() {
        let mut s = Scenario::new();
        s.topup(0, 100, 0);
        s.topup(1, 7, 1);
        s.topup(2, 5, 0);
        let txs = s.history(10).fetch_last(5, Some(1), None).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].amount, 7);
    }

    #[tokio::test]
    async fn test_newest_checked_against_tree() {
        let mut s = Scenario::new();
        s.topup(0, 100, 0);
        let ix = s.topup_instruction(1, 50, 0);
        s.chain.submit(vec![ix.to_instruction(s.program_id).unwrap()]);

        let history = s.history(10);
        let txs = history.fetch_last(2, None, None).await.unwrap();
        assert_eq!(txs[0].status, Some(TransactionStatus::Processed));
        assert!(txs[1].is_confirmed());

        s.tree.insert(ix.commitment_hash());
        let txs = history.fetch_last(2, None, None).await.unwrap();
        assert!(txs[0].is_confirmed());
    }

    #[tokio::test]
    async fn test_same_nonce_records_checked_individually() {
        let mut s = Scenario::new();
        s.topup(0, 100, 0);
        let send = s.prepare_send(1, 30, 5, 0);
        s.land_init(&send);
        s.topup(1, 20, 0);

        let txs = s.history(10).fetch_last(3, None, None).await.unwrap();
        assert_eq!(txs.iter().map(|t| t.nonce).collect::<Vec<_>>(), vec![1, 1, 0]);
        assert!(txs[0].is_topup() && txs[0].is_confirmed());
        assert!(txs[1].is_send());
        assert_eq!(txs[1].status, Some(TransactionStatus::Pending));
        assert!(txs[2].is_confirmed());
    }

    #[tokio::test]
    async fn test_nonce_is_never_split() {
        let mut s = Scenario::new();
        s.topup(0, 100, 0);
        s.topup(1, 20, 0);
        s.send(1, 10, 1, 0);
        s.topup(2, 5, 0);

        let txs = s.history(1).fetch_last(2, None, None).await.unwrap();
        assert_eq!(txs.iter().map(|t| t.nonce).collect::<Vec<_>>(), vec![2, 1, 1]);
        assert!(txs[1].is_send());
        assert!(txs[2].is_topup());
    }

    #[tokio::test]
    async fn test_cached_batches_are_not_refetched() {
        let s = three_step();
        let history = s.history(10);
        history.fetch_last(3, None, None).await.unwrap();
        let queries = s.chain.signature_queries();
        history.fetch_last(3, None, None).await.unwrap();
        // latest-nonce probes only; every nonce is already confirmed
        let probes = s.chain.signature_queries() - queries;
        assert!(probes <= 3, "{probes} signature queries on a warm cache");
    }

    #[tokio::test]
    async fn test_balance_fast_and_slow_agree() {
        let s = three_step();
        let history = s.history(10);

        let txs = history.full_history(0).await.unwrap();
        assert_eq!(replay_balance(&txs).unwrap(), 75);
        assert_eq!(history.fast_balance(0, &txs), Some(75));
        assert_eq!(history.private_balance(0).await.unwrap(), 75);
    }

    #[tokio::test]
    async fn test_fast_path_falls_back_on_mismatch() {
        let s = three_step();
        let history = s.history(10);
        let mut txs = history.full_history(0).await.unwrap();

        // Metadata bound to the recorded commitment but claiming another balance
        let send = &mut txs[1];
        let forged = CommitmentMetadata::new(send.nonce, 0, 0, 1_000)
            .unwrap()
            .encrypt(s.keys.root_viewing_key(), &send.commitment_hash)
            .unwrap();
        send.send.as_mut().unwrap().encrypted_metadata = Some(forged);

        assert_eq!(history.fast_balance(0, &txs), None);
        assert_eq!(replay_balance(&txs).unwrap(), 75);
    }

    #[tokio::test]
    async fn test_balance_without_sends() {
        let mut s = Scenario::new();
        s.topup(0, 40, 0);
        s.topup(1, 2, 0);
        assert_eq!(s.history(10).private_balance(0).await.unwrap(), 42);
        assert_eq!(s.history(10).private_balance(1).await.unwrap(), 0);
    }

    #[test]
    fn test_conflicting_records() {
        let record = |hash: u8| ElusivTransaction {
            kind: TransactionKind::TopUp,
            nonce: 4,
            token_id: 0,
            identifier: Pubkey::default(),
            amount: 1,
            fee: 0,
            commitment_hash: CommitmentHash([hash; 32]),
            merkle_start_index: 0,
            warden: Pubkey::default(),
            status: None,
            signature: None,
            block_time: None,
            send: None,
        };
        assert!(check_conflicts(&[record(1), record(1)]).is_ok());
        assert_eq!(
            check_conflicts(&[record(1), record(2)]),
            Err(ElusivError::ConflictingRecords { nonce: 4 })
        );
    }

    #[test]
    fn test_negative_replay_is_an_error() {
        let mut send = ElusivTransaction {
            kind: TransactionKind::Send,
            nonce: 0,
            token_id: 0,
            identifier: Pubkey::default(),
            amount: 10,
            fee: 1,
            commitment_hash: CommitmentHash([0; 32]),
            merkle_start_index: 0,
            warden: Pubkey::default(),
            status: None,
            signature: None,
            block_time: None,
            send: None,
        };
        assert!(matches!(
            replay_balance(std::slice::from_ref(&send)),
            Err(ElusivError::InvalidAccess(_))
        ));
        send.kind = TransactionKind::TopUp;
        assert_eq!(replay_balance(&[send]).unwrap(), 10);
    }
}
