//! Program Instructions
//!
//! Borsh payloads behind a one-byte tag. Top ups and send inits exist in two
//! layouts (current and legacy program version) under the same tag:
//!
//! ```text
//! tag 0  StoreBaseCommitment   accounts: [warden, identifier, storage]
//! tag 1  InitVerification      accounts: [warden, identifier, verification, storage]
//! tag 2  FinalizeVerification  accounts: [warden, identifier, verification, recipient]
//! ```
//!
//! Decoding tries the current layout first, then the legacy one. Borsh
//! rejects trailing bytes, so one payload never matches both. Parsers return
//! `None` for anything that is not theirs.

use borsh::{BorshDeserialize, BorshSerialize};
use elusiv_privacy::{CommitmentHash, ENCRYPTED_METADATA_SIZE};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

use crate::chain::ChainInstruction;
use crate::error::{ElusivError, Result};

pub const STORE_BASE_COMMITMENT_TAG: u8 = 0;
pub const INIT_VERIFICATION_TAG: u8 = 1;
pub const FINALIZE_VERIFICATION_TAG: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StoreBaseCommitment {
    pub commitment_hash: [u8; 32],
    pub amount: u64,
    pub fee: u64,
    pub token_id: u16,
    pub recent_commitment_index: u32,
    pub encrypted_metadata: Option<[u8; ENCRYPTED_METADATA_SIZE]>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StoreBaseCommitmentLegacy {
    pub commitment_hash: [u8; 32],
    pub amount: u64,
    pub token_id: u16,
    pub recent_commitment_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct InitVerification {
    pub amount: u64,
    pub fee: u64,
    pub token_id: u16,
    pub recipient: [u8; 32],
    pub is_merge: bool,
    pub recent_commitment_index: u32,
    pub next_commitment_hash: [u8; 32],
    pub encrypted_metadata: [u8; ENCRYPTED_METADATA_SIZE],
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct InitVerificationLegacy {
    pub amount: u64,
    pub fee: u64,
    pub token_id: u16,
    pub recipient: [u8; 32],
    pub is_merge: bool,
    pub recent_commitment_index: u32,
    pub next_commitment_hash: [u8; 32],
}

/// One logical payload in either wire layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Versioned<C, L> {
    Current(C),
    Legacy(L),
}

pub type StoreData = Versioned<StoreBaseCommitment, StoreBaseCommitmentLegacy>;
pub type InitData = Versioned<InitVerification, InitVerificationLegacy>;

impl<C: BorshDeserialize, L: BorshDeserialize> Versioned<C, L> {
    fn decode(tag: u8, data: &[u8]) -> Option<Self> {
        let (first, payload) = data.split_first()?;
        if *first != tag {
            return None;
        }
        if let Ok(current) = borsh::from_slice::<C>(payload) {
            return Some(Versioned::Current(current));
        }
        borsh::from_slice::<L>(payload).ok().map(Versioned::Legacy)
    }
}

impl<C: BorshSerialize, L: BorshSerialize> Versioned<C, L> {
    fn encode(&self, tag: u8) -> Result<Vec<u8>> {
        let mut data = vec![tag];
        match self {
            Versioned::Current(c) => c.serialize(&mut data),
            Versioned::Legacy(l) => l.serialize(&mut data),
        }
        .map_err(|e| ElusivError::InvalidSize(format!("instruction encoding failed: {e}")))?;
        Ok(data)
    }
}

/// Shared view over every value-moving instruction
pub trait ElusivInstruction {
    fn accounts(&self) -> Vec<Pubkey>;
    fn token_id(&self) -> u16;
    fn amount(&self) -> u64;
    fn assoc_comm_index(&self) -> u32;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInstruction {
    pub warden: Pubkey,
    pub identifier: Pubkey,
    pub storage: Pubkey,
    pub data: StoreData,
}

impl StoreInstruction {
    pub fn commitment_hash(&self) -> CommitmentHash {
        match &self.data {
            Versioned::Current(c) => CommitmentHash(c.commitment_hash),
            Versioned::Legacy(l) => CommitmentHash(l.commitment_hash),
        }
    }

    pub fn fee(&self) -> u64 {
        match &self.data {
            Versioned::Current(c) => c.fee,
            Versioned::Legacy(_) => 0,
        }
    }

    pub fn encrypted_metadata(&self) -> Option<[u8; ENCRYPTED_METADATA_SIZE]> {
        match &self.data {
            Versioned::Current(c) => c.encrypted_metadata,
            Versioned::Legacy(_) => None,
        }
    }

    pub fn to_instruction(&self, program_id: Pubkey) -> Result<Instruction> {
        Ok(Instruction::new_with_bytes(
            program_id,
            &self.data.encode(STORE_BASE_COMMITMENT_TAG)?,
            vec![
                AccountMeta::new(self.warden, true),
                AccountMeta::new_readonly(self.identifier, true),
                AccountMeta::new(self.storage, false),
            ],
        ))
    }
}

impl ElusivInstruction for StoreInstruction {
    fn accounts(&self) -> Vec<Pubkey> {
        vec![self.warden, self.identifier, self.storage]
    }

    fn token_id(&self) -> u16 {
        match &self.data {
            Versioned::Current(c) => c.token_id,
            Versioned::Legacy(l) => l.token_id,
        }
    }

    fn amount(&self) -> u64 {
        match &self.data {
            Versioned::Current(c) => c.amount,
            Versioned::Legacy(l) => l.amount,
        }
    }

    fn assoc_comm_index(&self) -> u32 {
        match &self.data {
            Versioned::Current(c) => c.recent_commitment_index,
            Versioned::Legacy(l) => l.recent_commitment_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitVerificationInstruction {
    pub warden: Pubkey,
    pub identifier: Pubkey,
    pub verification_account: Pubkey,
    pub storage: Pubkey,
    pub data: InitData,
}

impl InitVerificationInstruction {
    pub fn fee(&self) -> u64 {
        match &self.data {
            Versioned::Current(c) => c.fee,
            Versioned::Legacy(l) => l.fee,
        }
    }

    pub fn recipient(&self) -> Pubkey {
        match &self.data {
            Versioned::Current(c) => Pubkey::new_from_array(c.recipient),
            Versioned::Legacy(l) => Pubkey::new_from_array(l.recipient),
        }
    }

    pub fn is_merge(&self) -> bool {
        match &self.data {
            Versioned::Current(c) => c.is_merge,
            Versioned::Legacy(l) => l.is_merge,
        }
    }

    pub fn next_commitment_hash(&self) -> CommitmentHash {
        match &self.data {
            Versioned::Current(c) => CommitmentHash(c.next_commitment_hash),
            Versioned::Legacy(l) => CommitmentHash(l.next_commitment_hash),
        }
    }

    pub fn encrypted_metadata(&self) -> Option<[u8; ENCRYPTED_METADATA_SIZE]> {
        match &self.data {
            Versioned::Current(c) => Some(c.encrypted_metadata),
            Versioned::Legacy(_) => None,
        }
    }

    pub fn to_instruction(&self, program_id: Pubkey) -> Result<Instruction> {
        Ok(Instruction::new_with_bytes(
            program_id,
            &self.data.encode(INIT_VERIFICATION_TAG)?,
            vec![
                AccountMeta::new(self.warden, true),
                AccountMeta::new_readonly(self.identifier, true),
                AccountMeta::new(self.verification_account, false),
                AccountMeta::new_readonly(self.storage, false),
            ],
        ))
    }
}

impl ElusivInstruction for InitVerificationInstruction {
    fn accounts(&self) -> Vec<Pubkey> {
        vec![
            self.warden,
            self.identifier,
            self.verification_account,
            self.storage,
        ]
    }

    fn token_id(&self) -> u16 {
        match &self.data {
            Versioned::Current(c) => c.token_id,
            Versioned::Legacy(l) => l.token_id,
        }
    }

    fn amount(&self) -> u64 {
        match &self.data {
            Versioned::Current(c) => c.amount,
            Versioned::Legacy(l) => l.amount,
        }
    }

    fn assoc_comm_index(&self) -> u32 {
        match &self.data {
            Versioned::Current(c) => c.recent_commitment_index,
            Versioned::Legacy(l) => l.recent_commitment_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeVerificationInstruction {
    pub warden: Pubkey,
    pub identifier: Pubkey,
    pub verification_account: Pubkey,
    pub recipient: Pubkey,
}

impl FinalizeVerificationInstruction {
    pub fn to_instruction(&self, program_id: Pubkey) -> Instruction {
        Instruction::new_with_bytes(
            program_id,
            &[FINALIZE_VERIFICATION_TAG],
            vec![
                AccountMeta::new(self.warden, true),
                AccountMeta::new_readonly(self.identifier, false),
                AccountMeta::new(self.verification_account, false),
                AccountMeta::new(self.recipient, false),
            ],
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedInstruction {
    Store(StoreInstruction),
    InitVerification(InitVerificationInstruction),
    FinalizeVerification(FinalizeVerificationInstruction),
}

impl ParsedInstruction {
    pub fn parse(ix: &ChainInstruction, program_id: &Pubkey) -> Option<Self> {
        if &ix.program_id != program_id {
            return None;
        }
        match *ix.data.first()? {
            STORE_BASE_COMMITMENT_TAG => {
                let [warden, identifier, storage, ..] = ix.accounts[..] else {
                    return None;
                };
                Some(ParsedInstruction::Store(StoreInstruction {
                    warden,
                    identifier,
                    storage,
                    data: Versioned::decode(STORE_BASE_COMMITMENT_TAG, &ix.data)?,
                }))
            }
            INIT_VERIFICATION_TAG => {
                let [warden, identifier, verification_account, storage, ..] = ix.accounts[..]
                else {
                    return None;
                };
                Some(ParsedInstruction::InitVerification(
                    InitVerificationInstruction {
                        warden,
                        identifier,
                        verification_account,
                        storage,
                        data: Versioned::decode(INIT_VERIFICATION_TAG, &ix.data)?,
                    },
                ))
            }
            FINALIZE_VERIFICATION_TAG if ix.data.len() == 1 => {
                let [warden, identifier, verification_account, recipient, ..] = ix.accounts[..]
                else {
                    return None;
                };
                Some(ParsedInstruction::FinalizeVerification(
                    FinalizeVerificationInstruction {
                        warden,
                        identifier,
                        verification_account,
                        recipient,
                    },
                ))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_ix(ix: Instruction) -> ChainInstruction {
        ChainInstruction {
            program_id: ix.program_id,
            accounts: ix.accounts.iter().map(|m| m.pubkey).collect(),
            data: ix.data,
        }
    }

    fn store(data: StoreData) -> StoreInstruction {
        StoreInstruction {
            warden: Pubkey::new_unique(),
            identifier: Pubkey::new_unique(),
            storage: Pubkey::new_unique(),
            data,
        }
    }

    #[test]
    fn test_current_store_parses_as_current() {
        let program = Pubkey::new_unique();
        let ix = store(Versioned::Current(StoreBaseCommitment {
            commitment_hash: [3; 32],
            amount: 100,
            fee: 125_000,
            token_id: 0,
            recent_commitment_index: 7,
            encrypted_metadata: None,
        }));
        let parsed =
            ParsedInstruction::parse(&chain_ix(ix.to_instruction(program).unwrap()), &program)
                .unwrap();
        assert_eq!(parsed, ParsedInstruction::Store(ix));
    }

    #[test]
    fn test_legacy_store_falls_back() {
        let program = Pubkey::new_unique();
        let ix = store(Versioned::Legacy(StoreBaseCommitmentLegacy {
            commitment_hash: [3; 32],
            amount: 100,
            token_id: 1,
            recent_commitment_index: 7,
        }));
        let Some(ParsedInstruction::Store(parsed)) =
            ParsedInstruction::parse(&chain_ix(ix.to_instruction(program).unwrap()), &program)
        else {
            panic!("store instruction did not parse");
        };
        assert!(matches!(parsed.data, Versioned::Legacy(_)));
        assert_eq!(parsed.token_id(), 1);
        assert_eq!(parsed.amount(), 100);
        assert_eq!(parsed.assoc_comm_index(), 7);
        assert_eq!(parsed.fee(), 0);
    }

    #[test]
    fn test_init_versions() {
        let program = Pubkey::new_unique();
        let legacy = InitVerificationLegacy {
            amount: 30,
            fee: 5,
            token_id: 0,
            recipient: [9; 32],
            is_merge: false,
            recent_commitment_index: 4,
            next_commitment_hash: [8; 32],
        };
        let ix = InitVerificationInstruction {
            warden: Pubkey::new_unique(),
            identifier: Pubkey::new_unique(),
            verification_account: Pubkey::new_unique(),
            storage: Pubkey::new_unique(),
            data: Versioned::Legacy(legacy),
        };
        let Some(ParsedInstruction::InitVerification(parsed)) =
            ParsedInstruction::parse(&chain_ix(ix.to_instruction(program).unwrap()), &program)
        else {
            panic!("init instruction did not parse");
        };
        assert_eq!(parsed.encrypted_metadata(), None);
        assert_eq!(parsed.next_commitment_hash(), CommitmentHash([8; 32]));
        assert_eq!(parsed.accounts()[2], ix.verification_account);
    }

    #[test]
    fn test_foreign_or_malformed_is_not_ours() {
        let program = Pubkey::new_unique();
        let other = Pubkey::new_unique();
        let finalize = FinalizeVerificationInstruction {
            warden: Pubkey::new_unique(),
            identifier: Pubkey::new_unique(),
            verification_account: Pubkey::new_unique(),
            recipient: Pubkey::new_unique(),
        };
        let ix = chain_ix(finalize.to_instruction(program));
        assert!(ParsedInstruction::parse(&ix, &other).is_none());
        assert_eq!(
            ParsedInstruction::parse(&ix, &program),
            Some(ParsedInstruction::FinalizeVerification(finalize))
        );

        let garbage = ChainInstruction {
            program_id: program,
            accounts: ix.accounts.clone(),
            data: vec![STORE_BASE_COMMITMENT_TAG, 1, 2, 3],
        };
        assert!(ParsedInstruction::parse(&garbage, &program).is_none());

        let short = ChainInstruction {
            program_id: program,
            accounts: vec![program],
            data: vec![FINALIZE_VERIFICATION_TAG],
        };
        assert!(ParsedInstruction::parse(&short, &program).is_none());
    }
}
