//! Commitments
//!
//! ```text
//! Commitment = Poseidon(nullifier, balance, token_id, assoc_comm_index)
//! ```
//!
//! An [`IncompleteCommitment`] exists as soon as a top up or send is built.
//! Once the tree contains it, combining it with a fetched opening yields an
//! [`ActivatedCommitment`]; the incomplete value is never modified.

use ark_bn254::Fr;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::field::{fr_from_bytes, fr_to_bytes};
use crate::merkle::{MerklePath, poseidon};

/// A commitment hash (canonical little-endian field bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitmentHash(pub [u8; 32]);

impl CommitmentHash {
    pub fn from_field(f: &Fr) -> Self {
        Self(fr_to_bytes(f))
    }

    pub fn to_field(&self) -> Fr {
        fr_from_bytes(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for CommitmentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Full hash as hex, in storage byte order
impl fmt::Display for CommitmentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for CommitmentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitmentHash(")?;
        for b in self.0.iter().rev().take(6) {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

/// A commitment that is not (yet) known to be in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteCommitment {
    pub nullifier: Fr,
    pub balance: u64,
    pub token_id: u16,
    pub assoc_comm_index: u32,
    hash: CommitmentHash,
}

impl IncompleteCommitment {
    pub fn new(nullifier: Fr, balance: u64, token_id: u16, assoc_comm_index: u32) -> Self {
        let hash = CommitmentHash::from_field(&poseidon(&[
            nullifier,
            Fr::from(balance),
            Fr::from(token_id as u64),
            Fr::from(assoc_comm_index as u64),
        ]));
        Self {
            nullifier,
            balance,
            token_id,
            assoc_comm_index,
            hash,
        }
    }

    pub fn hash(&self) -> CommitmentHash {
        self.hash
    }

    /// Nullifier hash published when this commitment is spent
    pub fn nullifier_hash(&self) -> CommitmentHash {
        CommitmentHash::from_field(&poseidon(&[self.nullifier]))
    }

    /// Attach a tree position. Produces a new value.
    pub fn activate(&self, opening: MerklePath, root: [u8; 32]) -> ActivatedCommitment {
        ActivatedCommitment {
            commitment: self.clone(),
            leaf_index: opening.position,
            opening,
            root,
        }
    }
}

/// A commitment together with its proven position in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivatedCommitment {
    commitment: IncompleteCommitment,
    opening: MerklePath,
    root: [u8; 32],
    leaf_index: u64,
}

impl ActivatedCommitment {
    pub fn commitment(&self) -> &IncompleteCommitment {
        &self.commitment
    }

    /// Sibling hashes bottom-to-top
    pub fn opening(&self) -> &MerklePath {
        &self.opening
    }

    pub fn root(&self) -> &[u8; 32] {
        &self.root
    }

    pub fn leaf_index(&self) -> u64 {
        self.leaf_index
    }

    /// Check the opening against the stored root
    pub fn verify(&self) -> bool {
        self.opening
            .verify(self.commitment.hash().as_bytes(), &self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::MerkleTree;

    #[test]
    fn test_commitment_deterministic() {
        let a = IncompleteCommitment::new(Fr::from(5u64), 100, 0, 3);
        let b = IncompleteCommitment::new(Fr::from(5u64), 100, 0, 3);
        assert_eq!(a.hash(), b.hash(), "same inputs should produce same commitment");
    }

    #[test]
    fn test_commitment_binding() {
        let a = IncompleteCommitment::new(Fr::from(5u64), 100, 0, 3);
        let b = IncompleteCommitment::new(Fr::from(5u64), 101, 0, 3);
        let c = IncompleteCommitment::new(Fr::from(5u64), 100, 1, 3);
        assert_ne!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_activation_keeps_incomplete() {
        let incomplete = IncompleteCommitment::new(Fr::from(9u64), 50, 0, 0);
        let before = incomplete.clone();

        let mut tree = MerkleTree::new(3);
        tree.insert(*incomplete.hash().as_bytes());
        let activated = incomplete.activate(tree.path(0).unwrap(), tree.root());

        assert_eq!(incomplete, before);
        assert_eq!(activated.commitment(), &incomplete);
        assert_eq!(activated.leaf_index(), 0);
        assert!(activated.verify());
    }

    #[test]
    fn test_hash_display_is_full_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let shown = CommitmentHash(bytes).to_string();
        assert_eq!(shown.len(), 64);
        assert!(shown.starts_with("ab00"));
        assert!(shown.ends_with("0001"));
    }
}
