//! Metadata Encryption
//!
//! Encrypts [`CommitmentMetadata`] for the holder of the root viewing key,
//! bound to the commitment it describes.
//!
//! ```text
//! Flow:
//! 1. key   = HKDF-SHA256(ikm = root_viewing_key, salt = commitment_hash,
//!                        info = "elusiv-commitment-metadata")
//! 2. nonce = commitment_hash[0..12]
//! 3. out   = ChaCha20-Poly1305(key, nonce, metadata)   (17 + 16 bytes)
//! ```
//!
//! A ciphertext copied next to another commitment decrypts under a different
//! key and nonce, so it is rejected instead of being misread.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::commitment::CommitmentHash;
use crate::error::PrivacyError;
use crate::keys::RootViewingKey;
use crate::metadata::{CommitmentMetadata, METADATA_SIZE};

/// Size of encrypted metadata on-chain (plaintext + Poly1305 tag)
pub const ENCRYPTED_METADATA_SIZE: usize = METADATA_SIZE + 16;

const METADATA_KEY_INFO: &[u8] = b"elusiv-commitment-metadata";

fn derive_metadata_key(
    rvk: &RootViewingKey,
    commitment: &CommitmentHash,
) -> Result<[u8; 32], PrivacyError> {
    let hk = Hkdf::<Sha256>::new(Some(commitment.as_bytes()), rvk.as_bytes());
    let mut key = [0u8; 32];
    hk.expand(METADATA_KEY_INFO, &mut key)
        .map_err(|_| PrivacyError::InvalidKeyMaterial)?;
    Ok(key)
}

fn cipher_and_nonce(
    rvk: &RootViewingKey,
    commitment: &CommitmentHash,
) -> Result<(ChaCha20Poly1305, [u8; 12]), PrivacyError> {
    let key = derive_metadata_key(rvk, commitment)?;
    let cipher =
        ChaCha20Poly1305::new_from_slice(&key).map_err(|_| PrivacyError::InvalidKeyMaterial)?;
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&commitment.as_bytes()[..12]);
    Ok((cipher, nonce))
}

/// Encrypt metadata for `commitment`
pub fn encrypt_metadata(
    metadata: &CommitmentMetadata,
    rvk: &RootViewingKey,
    commitment: &CommitmentHash,
) -> Result<[u8; ENCRYPTED_METADATA_SIZE], PrivacyError> {
    let (cipher, nonce) = cipher_and_nonce(rvk, commitment)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), metadata.to_bytes().as_slice())
        .map_err(|_| PrivacyError::EncryptionFailed)?;

    ciphertext
        .as_slice()
        .try_into()
        .map_err(|_| PrivacyError::InvalidLength {
            expected: ENCRYPTED_METADATA_SIZE,
            actual: ciphertext.len(),
        })
}

/// Decrypt metadata stored next to `commitment`
pub fn decrypt_metadata(
    ciphertext: &[u8],
    rvk: &RootViewingKey,
    commitment: &CommitmentHash,
) -> Result<CommitmentMetadata, PrivacyError> {
    if ciphertext.len() != ENCRYPTED_METADATA_SIZE {
        return Err(PrivacyError::InvalidLength {
            expected: ENCRYPTED_METADATA_SIZE,
            actual: ciphertext.len(),
        });
    }

    let (cipher, nonce) = cipher_and_nonce(rvk, commitment)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| PrivacyError::DecryptionFailed)?;

    CommitmentMetadata::from_bytes(&plaintext)
}
