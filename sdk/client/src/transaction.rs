//! Transaction Records
//!
//! One [`ElusivTransaction`] per logical operation of one nonce, rebuilt
//! from the chain.

use elusiv_privacy::{CommitmentHash, ENCRYPTED_METADATA_SIZE, IncompleteCommitment, SeedKeys};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    TopUp,
    Send,
}

/// Only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Processed,
    Confirmed,
}

/// Send-only fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendDetails {
    pub recipient: Pubkey,
    pub is_merge: bool,
    pub verification_account: Pubkey,
    pub encrypted_metadata: Option<[u8; ENCRYPTED_METADATA_SIZE]>,
    pub init_signature: Signature,
    /// `None` while the send is still in flight
    pub finalize_signature: Option<Signature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElusivTransaction {
    pub kind: TransactionKind,
    pub nonce: u32,
    pub token_id: u16,
    pub identifier: Pubkey,
    pub amount: u64,
    pub fee: u64,
    pub commitment_hash: CommitmentHash,
    /// Lower bound of the leaf index of `commitment_hash`
    pub merkle_start_index: u32,
    pub warden: Pubkey,
    pub status: Option<TransactionStatus>,
    pub signature: Option<Signature>,
    pub block_time: Option<i64>,
    pub send: Option<SendDetails>,
}

impl ElusivTransaction {
    pub fn is_topup(&self) -> bool {
        self.kind == TransactionKind::TopUp
    }

    pub fn is_send(&self) -> bool {
        self.kind == TransactionKind::Send
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == Some(TransactionStatus::Confirmed)
    }

    /// Move the status forward; an older status is ignored
    pub fn advance_status(&mut self, status: TransactionStatus) {
        if self.status.is_none_or(|current| current < status) {
            self.status = Some(status);
        }
    }

    /// Same logical record (retried signatures collapse onto one)
    pub fn same_record(&self, other: &ElusivTransaction) -> bool {
        self.nonce == other.nonce
            && self.kind == other.kind
            && self.commitment_hash == other.commitment_hash
    }

    /// Signed change of the private balance
    pub fn balance_delta(&self) -> i128 {
        match self.kind {
            TransactionKind::TopUp => self.amount as i128,
            TransactionKind::Send => -(self.amount as i128 + self.fee as i128),
        }
    }
}

/// Commitment created by a top up of `amount` at `nonce`
pub fn topup_commitment(
    keys: &SeedKeys,
    nonce: u32,
    amount: u64,
    token_id: u16,
    recent_commitment_index: u32,
) -> Result<IncompleteCommitment> {
    Ok(IncompleteCommitment::new(
        keys.nullifier(nonce)?,
        amount,
        token_id,
        recent_commitment_index,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: Option<TransactionStatus>) -> ElusivTransaction {
        ElusivTransaction {
            kind: TransactionKind::TopUp,
            nonce: 0,
            token_id: 0,
            identifier: Pubkey::new_unique(),
            amount: 10,
            fee: 1,
            commitment_hash: CommitmentHash([1; 32]),
            merkle_start_index: 0,
            warden: Pubkey::new_unique(),
            status,
            signature: None,
            block_time: None,
            send: None,
        }
    }

    #[test]
    fn test_status_never_regresses() {
        let mut tx = record(None);
        tx.advance_status(TransactionStatus::Processed);
        tx.advance_status(TransactionStatus::Pending);
        assert_eq!(tx.status, Some(TransactionStatus::Processed));
        tx.advance_status(TransactionStatus::Confirmed);
        tx.advance_status(TransactionStatus::Processed);
        assert!(tx.is_confirmed());
    }

    #[test]
    fn test_balance_delta() {
        let mut tx = record(None);
        assert_eq!(tx.balance_delta(), 10);
        tx.kind = TransactionKind::Send;
        assert_eq!(tx.balance_delta(), -11);
    }
}
