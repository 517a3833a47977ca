//! Identifier Fetcher
//!
//! Every nonce derives a public identifier key that signs or is referenced by
//! each transaction of that nonce. Fetching a nonce means listing the
//! signatures of its identifier and classifying the program instructions
//! found in the bodies.
//!
//! ```text
//! nonces ──▶ identifiers ──▶ signatures (concurrent, per nonce)
//!                                 │
//!                  flat list + [start,end) range per nonce
//!                                 │
//!                                 ▼
//!                      one batched body request
//!                                 │
//!                                 ▼
//!          classify + pair init/finalize legs per nonce
//! ```

use elusiv_privacy::SeedKeys;
use futures::future::try_join_all;
use log::debug;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::ops::Range;
use std::sync::Arc;

use crate::chain::{ChainReader, ChainTransaction};
use crate::error::{ElusivError, Result};
use crate::instruction::{
    ElusivInstruction, FinalizeVerificationInstruction, InitVerificationInstruction,
    ParsedInstruction, StoreInstruction,
};
use crate::transaction::{ElusivTransaction, SendDetails, TransactionKind, TransactionStatus};

pub struct IdentifierFetcher {
    chain: Arc<dyn ChainReader>,
    program_id: Pubkey,
    keys: Arc<SeedKeys>,
}

/// One of our instructions and the transaction carrying it
struct Leg<'a> {
    tx: &'a ChainTransaction,
    ix: ParsedInstruction,
}

impl IdentifierFetcher {
    pub fn new(chain: Arc<dyn ChainReader>, program_id: Pubkey, keys: Arc<SeedKeys>) -> Self {
        Self {
            chain,
            program_id,
            keys,
        }
    }

    pub fn identifier(&self, nonce: u32) -> Result<Pubkey> {
        Ok(Pubkey::new_from_array(self.keys.identifier(nonce)?))
    }

    /// Successful signatures referencing the identifier of `nonce`, newest first
    async fn signatures(&self, nonce: u32) -> Result<Vec<Signature>> {
        let infos = self
            .chain
            .get_signatures_for_address(&self.identifier(nonce)?, None)
            .await?;
        Ok(infos
            .into_iter()
            .filter(|info| !info.failed)
            .map(|info| info.signature)
            .collect())
    }

    /// Whether anything successful ever referenced the identifier of `nonce`
    pub async fn has_activity(&self, nonce: u32) -> Result<bool> {
        Ok(!self.signatures(nonce).await?.is_empty())
    }

    /// Records of every nonce not marked as cached, in input order.
    ///
    /// Each nonce maps to its records in chronological order; an empty list
    /// means the nonce was fetched and holds nothing.
    pub async fn fetch(&self, nonces: &[(u32, bool)]) -> Result<Vec<(u32, Vec<ElusivTransaction>)>> {
        let targets: Vec<u32> = nonces
            .iter()
            .filter(|(_, cached)| !cached)
            .map(|(nonce, _)| *nonce)
            .collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let per_nonce = try_join_all(targets.iter().map(|nonce| self.signatures(*nonce))).await?;

        let mut flat: Vec<Signature> = Vec::new();
        let mut ranges: Vec<Range<usize>> = Vec::with_capacity(per_nonce.len());
        for signatures in per_nonce {
            let start = flat.len();
            flat.extend(signatures);
            ranges.push(start..flat.len());
        }
        debug!(
            "Fetching {} transactions for {} nonces",
            flat.len(),
            targets.len()
        );

        let bodies = if flat.is_empty() {
            Vec::new()
        } else {
            self.chain.get_transactions(&flat).await?
        };
        if bodies.len() != flat.len() {
            return Err(ElusivError::InvalidSize(format!(
                "requested {} transactions, received {}",
                flat.len(),
                bodies.len()
            )));
        }

        targets
            .into_iter()
            .zip(ranges)
            .map(|(nonce, range)| {
                let txs = bodies[range.clone()]
                    .iter()
                    .zip(&flat[range])
                    .map(|(body, signature)| {
                        body.as_ref().ok_or_else(|| {
                            ElusivError::CouldNotFetchData(format!("transaction {signature}"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((nonce, self.classify(nonce, &txs)?))
            })
            .collect()
    }

    /// Turn the transactions of one nonce (newest first) into records
    /// (oldest first).
    ///
    /// A finalize leg is paired with the next older init leg that names the
    /// same verification account. Concurrent sends interleave, so "the next
    /// init" alone is not enough.
    fn classify(&self, nonce: u32, txs: &[&ChainTransaction]) -> Result<Vec<ElusivTransaction>> {
        let identifier = self.identifier(nonce)?;
        let legs: Vec<Leg> = txs
            .iter()
            .filter(|tx| !tx.failed)
            .flat_map(|tx| {
                tx.instructions.iter().filter_map(move |ix| {
                    ParsedInstruction::parse(ix, &self.program_id).map(|ix| Leg { tx: *tx, ix })
                })
            })
            .filter(|leg| leg_identifier(&leg.ix) == identifier)
            .collect();

        let mut paired = vec![false; legs.len()];
        let mut records = Vec::new();

        for (i, leg) in legs.iter().enumerate() {
            match &leg.ix {
                ParsedInstruction::Store(store) => {
                    records.push(topup_record(nonce, leg.tx, store));
                }
                ParsedInstruction::FinalizeVerification(finalize) => {
                    let matching = legs.iter().enumerate().skip(i + 1).find(|(j, older)| {
                        !paired[*j]
                            && matches!(&older.ix, ParsedInstruction::InitVerification(init)
                                if init.verification_account == finalize.verification_account)
                    });
                    let Some((j, Leg { tx: init_tx, ix: ParsedInstruction::InitVerification(init) })) =
                        matching
                    else {
                        return Err(ElusivError::MissingInitLeg {
                            signature: leg.tx.signature,
                        });
                    };
                    paired[j] = true;
                    records.push(send_record(nonce, init_tx, init, Some((leg.tx, finalize))));
                }
                ParsedInstruction::InitVerification(init) => {
                    if !paired[i] {
                        records.push(send_record(nonce, leg.tx, init, None));
                    }
                }
            }
        }

        records.reverse();
        Ok(records)
    }
}

fn leg_identifier(ix: &ParsedInstruction) -> Pubkey {
    match ix {
        ParsedInstruction::Store(store) => store.identifier,
        ParsedInstruction::InitVerification(init) => init.identifier,
        ParsedInstruction::FinalizeVerification(finalize) => finalize.identifier,
    }
}

fn topup_record(nonce: u32, tx: &ChainTransaction, store: &StoreInstruction) -> ElusivTransaction {
    ElusivTransaction {
        kind: TransactionKind::TopUp,
        nonce,
        token_id: store.token_id(),
        identifier: store.identifier,
        amount: store.amount(),
        fee: store.fee(),
        commitment_hash: store.commitment_hash(),
        merkle_start_index: store.assoc_comm_index(),
        warden: store.warden,
        status: Some(TransactionStatus::Processed),
        signature: Some(tx.signature),
        block_time: tx.block_time,
        send: None,
    }
}

/// A send from its init leg, completed when the finalize leg is known
fn send_record(
    nonce: u32,
    init_tx: &ChainTransaction,
    init: &InitVerificationInstruction,
    finalize: Option<(&ChainTransaction, &FinalizeVerificationInstruction)>,
) -> ElusivTransaction {
    let (status, latest_tx) = match finalize {
        Some((tx, _)) => (TransactionStatus::Processed, tx),
        None => (TransactionStatus::Pending, init_tx),
    };
    ElusivTransaction {
        kind: TransactionKind::Send,
        nonce,
        token_id: init.token_id(),
        identifier: init.identifier,
        amount: init.amount(),
        fee: init.fee(),
        commitment_hash: init.next_commitment_hash(),
        merkle_start_index: init.assoc_comm_index(),
        warden: init.warden,
        status: Some(status),
        signature: Some(latest_tx.signature),
        block_time: latest_tx.block_time,
        send: Some(SendDetails {
            recipient: finalize.map_or_else(|| init.recipient(), |(_, f)| f.recipient),
            is_merge: init.is_merge(),
            verification_account: init.verification_account,
            encrypted_metadata: init.encrypted_metadata(),
            init_signature: init_tx.signature,
            finalize_signature: finalize.map(|(tx, _)| tx.signature),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::scenario::Scenario;

    #[tokio::test]
    async fn test_topups_and_send() {
        let mut s = Scenario::new();
        s.topup(0, 100, 0);
        let commitment = s.send(1, 30, 5, 0);
        let fetched = s.fetcher().fetch(&[(0, false), (1, false), (2, false)]).await.unwrap();

        assert_eq!(fetched.len(), 3);
        let (_, topups) = &fetched[0];
        assert_eq!(topups.len(), 1);
        assert!(topups[0].is_topup());
        assert_eq!(topups[0].amount, 100);
        assert_eq!(topups[0].fee, 125_000);

        let (_, sends) = &fetched[1];
        assert_eq!(sends.len(), 1);
        let send = &sends[0];
        assert!(send.is_send());
        assert_eq!((send.amount, send.fee), (30, 5));
        assert_eq!(send.commitment_hash, commitment);
        assert_eq!(send.status, Some(TransactionStatus::Processed));
        assert!(send.send.as_ref().unwrap().finalize_signature.is_some());

        assert_eq!(fetched[2], (2, Vec::new()));
    }

    #[tokio::test]
    async fn test_cached_nonces_are_skipped() {
        let mut s = Scenario::new();
        s.topup(0, 100, 0);
        s.topup(1, 50, 0);
        let fetched = s.fetcher().fetch(&[(0, true), (1, false)]).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].0, 1);
        assert_eq!(s.chain.signature_queries(), 1);
    }

    #[tokio::test]
    async fn test_interleaved_sends_pair_by_verification_account() {
        let mut s = Scenario::new();
        s.topup(0, 1_000, 0);
        let a = s.prepare_send(1, 100, 1, 0);
        let b = s.prepare_send(1, 200, 2, 0);

        // init A, init B, finalize B, finalize A
        s.land_init(&a);
        s.land_init(&b);
        let fin_b = s.land_finalize(&b);
        let fin_a = s.land_finalize(&a);

        let fetched = s.fetcher().fetch(&[(1, false)]).await.unwrap();
        let records = &fetched[0].1;
        assert_eq!(records.len(), 2);
        for (send, amount, fee, finalize) in [(&a, 100, 1, fin_a), (&b, 200, 2, fin_b)] {
            let record = records
                .iter()
                .find(|r| {
                    r.send.as_ref().unwrap().verification_account == send.init.verification_account
                })
                .unwrap();
            assert_eq!(record.amount, amount);
            assert_eq!(record.fee, fee);
            assert_eq!(record.commitment_hash, send.commitment);
            assert_eq!(record.signature, Some(finalize));
            assert_eq!(record.status, Some(TransactionStatus::Processed));
        }
    }

    #[tokio::test]
    async fn test_unfinalized_init_is_pending() {
        let mut s = Scenario::new();
        s.topup(0, 1_000, 0);
        let send = s.prepare_send(1, 100, 1, 0);
        let init_signature = s.land_init(&send);

        let fetched = s.fetcher().fetch(&[(1, false)]).await.unwrap();
        let record = &fetched[0].1[0];
        assert_eq!(record.status, Some(TransactionStatus::Pending));
        assert_eq!(record.signature, Some(init_signature));
        assert_eq!(record.send.as_ref().unwrap().finalize_signature, None);
    }

    #[tokio::test]
    async fn test_finalize_without_init_fails() {
        let mut s = Scenario::new();
        s.topup(0, 1_000, 0);
        let send = s.prepare_send(1, 100, 1, 0);
        let signature = s.land_finalize(&send);

        let err = s.fetcher().fetch(&[(1, false)]).await.unwrap_err();
        assert_eq!(err, ElusivError::MissingInitLeg { signature });
    }

    #[tokio::test]
    async fn test_failed_transactions_are_ignored() {
        let mut s = Scenario::new();
        let ix = s.topup_instruction(0, 100, 0);
        s.chain
            .submit_failed(vec![ix.to_instruction(s.program_id).unwrap()]);
        let fetcher = s.fetcher();
        assert!(!fetcher.has_activity(0).await.unwrap());

        s.topup(0, 100, 0);
        assert!(fetcher.has_activity(0).await.unwrap());
        let fetched = fetcher.fetch(&[(0, false)]).await.unwrap();
        assert_eq!(fetched[0].1.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_body_fails() {
        let mut s = Scenario::new();
        let signature = s.topup(0, 100, 0);
        s.chain.drop_body(signature);
        let err = s.fetcher().fetch(&[(0, false)]).await.unwrap_err();
        assert!(matches!(err, ElusivError::CouldNotFetchData(_)));
    }
}
