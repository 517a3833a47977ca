//! Commitment Metadata
//!
//! Fixed-width sidecar stored (encrypted) next to every commitment:
//!
//! ```text
//! ┌──────────┬──────────────┬────────────────────┬───────────┐
//! │ nonce u32│ token_id u16 │ assoc_comm_idx u24 │ balance   │
//! │  4 B LE  │    2 B LE    │      3 B LE        │ u64 8 B LE│
//! └──────────┴──────────────┴────────────────────┴───────────┘
//!                                                   = 17 bytes
//! ```

use serde::{Deserialize, Serialize};

use crate::commitment::CommitmentHash;
use crate::encryption::{ENCRYPTED_METADATA_SIZE, decrypt_metadata, encrypt_metadata};
use crate::error::PrivacyError;
use crate::keys::RootViewingKey;
use crate::merkle::MT_HEIGHT;

/// Serialized size of [`CommitmentMetadata`]
pub const METADATA_SIZE: usize = 17;

/// Largest valid associated commitment index (last leaf of the tree)
pub const MAX_ASSOC_COMM_INDEX: u32 = (1 << MT_HEIGHT) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentMetadata {
    nonce: u32,
    token_id: u16,
    assoc_comm_index: u32,
    balance: u64,
}

impl CommitmentMetadata {
    pub fn new(
        nonce: u32,
        token_id: u16,
        assoc_comm_index: u32,
        balance: u64,
    ) -> Result<Self, PrivacyError> {
        if assoc_comm_index > MAX_ASSOC_COMM_INDEX {
            return Err(PrivacyError::FieldOutOfRange {
                field: "assoc_comm_index",
                value: assoc_comm_index as u64,
                max: MAX_ASSOC_COMM_INDEX as u64,
            });
        }
        Ok(Self {
            nonce,
            token_id,
            assoc_comm_index,
            balance,
        })
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn token_id(&self) -> u16 {
        self.token_id
    }

    pub fn assoc_comm_index(&self) -> u32 {
        self.assoc_comm_index
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn to_bytes(&self) -> [u8; METADATA_SIZE] {
        let mut bytes = [0u8; METADATA_SIZE];
        bytes[0..4].copy_from_slice(&self.nonce.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.token_id.to_le_bytes());
        bytes[6..9].copy_from_slice(&self.assoc_comm_index.to_le_bytes()[..3]);
        bytes[9..17].copy_from_slice(&self.balance.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PrivacyError> {
        if bytes.len() != METADATA_SIZE {
            return Err(PrivacyError::InvalidLength {
                expected: METADATA_SIZE,
                actual: bytes.len(),
            });
        }

        let mut nonce = [0u8; 4];
        nonce.copy_from_slice(&bytes[0..4]);
        let mut token_id = [0u8; 2];
        token_id.copy_from_slice(&bytes[4..6]);
        let mut assoc = [0u8; 4];
        assoc[..3].copy_from_slice(&bytes[6..9]);
        let mut balance = [0u8; 8];
        balance.copy_from_slice(&bytes[9..17]);

        Self::new(
            u32::from_le_bytes(nonce),
            u16::from_le_bytes(token_id),
            u32::from_le_bytes(assoc),
            u64::from_le_bytes(balance),
        )
    }

    pub fn encrypt(
        &self,
        rvk: &RootViewingKey,
        commitment: &CommitmentHash,
    ) -> Result<[u8; ENCRYPTED_METADATA_SIZE], PrivacyError> {
        encrypt_metadata(self, rvk, commitment)
    }

    pub fn decrypt(
        ciphertext: &[u8],
        rvk: &RootViewingKey,
        commitment: &CommitmentHash,
    ) -> Result<Self, PrivacyError> {
        decrypt_metadata(ciphertext, rvk, commitment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let m = CommitmentMetadata::new(0x0403_0201, 0x0605, 0x0009_0807, 0x11).unwrap();
        let bytes = m.to_bytes();
        assert_eq!(&bytes[..9], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(bytes[9], 0x11);
        assert!(bytes[10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_assoc_index_out_of_range() {
        let err = CommitmentMetadata::new(0, 0, MAX_ASSOC_COMM_INDEX + 1, 0).unwrap_err();
        assert!(err.to_string().contains("assoc_comm_index"));
    }

    #[test]
    fn test_wrong_length() {
        assert_eq!(
            CommitmentMetadata::from_bytes(&[0u8; 16]).unwrap_err(),
            PrivacyError::InvalidLength {
                expected: 17,
                actual: 16
            }
        );
    }
}
