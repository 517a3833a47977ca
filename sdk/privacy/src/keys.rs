//! Seed Key Derivation
//!
//! ```text
//! root_viewing_key = HKDF(seed, salt = 0,     "elusiv-root-viewing-key")
//! nullifier(n)     = HKDF(seed, salt = n,     "elusiv-nullifier")     mod p
//! identifier(n)    = Ed25519(HKDF(seed, salt = n, "elusiv-identifier")).public
//! ```
//!
//! Distinct `info` strings keep the derivations domain separated even when the
//! seed and salt are identical.

use ark_bn254::Fr;
use ark_ff::PrimeField;
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use sha2::Sha256;
use std::fmt;

use crate::error::PrivacyError;

const ROOT_VIEWING_KEY_INFO: &str = "elusiv-root-viewing-key";
const NULLIFIER_INFO: &str = "elusiv-nullifier";
const IDENTIFIER_INFO: &str = "elusiv-identifier";

/// Minimum seed length accepted by [`SeedKeys::new`]
pub const MIN_SEED_LEN: usize = 32;

/// HKDF-SHA256 with a `u32` salt encoded little-endian
pub fn derive(ikm: &[u8], salt: u32, info: &str, out: &mut [u8]) -> Result<(), PrivacyError> {
    let hk = Hkdf::<Sha256>::new(Some(&salt.to_le_bytes()), ikm);
    hk.expand(info.as_bytes(), out)
        .map_err(|_| PrivacyError::InvalidKeyMaterial)
}

fn derive_array<const N: usize>(ikm: &[u8], salt: u32, info: &str) -> Result<[u8; N], PrivacyError> {
    let mut out = [0u8; N];
    derive(ikm, salt, info, &mut out)?;
    Ok(out)
}

/// Decrypts (but cannot spend) a user's history
#[derive(Clone, PartialEq, Eq)]
pub struct RootViewingKey([u8; 32]);

impl RootViewingKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for RootViewingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RootViewingKey(..)")
    }
}

/// All key material of one user, derived from a single seed.
/// NEVER log or serialize this struct.
pub struct SeedKeys {
    seed: Vec<u8>,
    root_viewing_key: RootViewingKey,
}

impl SeedKeys {
    pub fn new(seed: &[u8]) -> Result<Self, PrivacyError> {
        if seed.len() < MIN_SEED_LEN {
            return Err(PrivacyError::InvalidLength {
                expected: MIN_SEED_LEN,
                actual: seed.len(),
            });
        }
        let root_viewing_key =
            RootViewingKey(derive_array::<32>(seed, 0, ROOT_VIEWING_KEY_INFO)?);
        Ok(Self {
            seed: seed.to_vec(),
            root_viewing_key,
        })
    }

    pub fn root_viewing_key(&self) -> &RootViewingKey {
        &self.root_viewing_key
    }

    /// Nullifier of the commitment created at `nonce`.
    /// 64 bytes are reduced so the result is close to uniform in the field.
    pub fn nullifier(&self, nonce: u32) -> Result<Fr, PrivacyError> {
        let wide = derive_array::<64>(&self.seed, nonce, NULLIFIER_INFO)?;
        Ok(Fr::from_le_bytes_mod_order(&wide))
    }

    /// Signing key behind the identifier of `nonce`
    pub fn identifier_signing_key(&self, nonce: u32) -> Result<SigningKey, PrivacyError> {
        let secret = derive_array::<32>(&self.seed, nonce, IDENTIFIER_INFO)?;
        Ok(SigningKey::from_bytes(&secret))
    }

    /// Public identifier key used to look up the transactions of `nonce`
    pub fn identifier(&self, nonce: u32) -> Result<[u8; 32], PrivacyError> {
        Ok(self.identifier_signing_key(nonce)?.verifying_key().to_bytes())
    }
}

impl fmt::Debug for SeedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SeedKeys(..)")
    }
}
