//! Elusiv Privacy SDK
//!
//! Client-side cryptographic material for the Elusiv shielded pool. Everything
//! is derived from a single seed so that a wallet can rebuild its private state
//! from public, encrypted on-chain data alone.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Seed                                  │
//! │         │                   │                      │            │
//! │         ▼                   ▼                      ▼            │
//! │  ┌──────────────┐  ┌─────────────────┐  ┌────────────────────┐  │
//! │  │ Nullifier(n) │  │ Identifier(n)   │  │ Root viewing key   │  │
//! │  │ (per nonce)  │  │ (public lookup) │  │ (decrypts history) │  │
//! │  └──────────────┘  └─────────────────┘  └────────────────────┘  │
//! │         │                                          │            │
//! │         ▼                                          ▼            │
//! │  ┌─────────────────────────────┐      ┌─────────────────────┐   │
//! │  │ Commitment = Poseidon(      │─────▶│ CommitmentMetadata  │   │
//! │  │  nullifier, balance,        │ bind │ ChaCha20-Poly1305   │   │
//! │  │  token, assoc_index)        │      │ (17 bytes + tag)    │   │
//! │  └─────────────────────────────┘      └─────────────────────┘   │
//! │         │                                                       │
//! │         ▼                                                       │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │ Merkle opening (height-20 Poseidon tree) → activated    │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod commitment;
pub mod encryption;
pub mod error;
pub mod field;
pub mod keys;
pub mod merkle;
pub mod metadata;

pub use commitment::{ActivatedCommitment, CommitmentHash, IncompleteCommitment};
pub use encryption::{decrypt_metadata, encrypt_metadata, ENCRYPTED_METADATA_SIZE};
pub use error::PrivacyError;
pub use field::{from_montgomery_le, is_zero_slot, to_montgomery_le};
pub use keys::{RootViewingKey, SeedKeys, derive};
pub use merkle::{MerkleHasher, MerklePath, MerkleTree, MT_HEIGHT};
pub use metadata::{CommitmentMetadata, METADATA_SIZE};
