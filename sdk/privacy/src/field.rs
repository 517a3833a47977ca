//! Field Representations
//!
//! The on-chain program stores tree nodes as raw Montgomery limbs
//! (`a·R mod p`, little-endian). Proof inputs need the canonical value.
//! An all-zero stored slot means "uninitialized", not the field element zero.

use ark_bn254::Fr;
use ark_ff::{BigInt, BigInteger, PrimeField};

/// Interpret 32 little-endian bytes as a Montgomery-form BN254 scalar
pub fn from_montgomery_le(bytes: &[u8; 32]) -> Fr {
    let mut limbs = [0u64; 4];
    for (i, limb) in limbs.iter_mut().enumerate() {
        let mut chunk = [0u8; 8];
        chunk.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
        *limb = u64::from_le_bytes(chunk);
    }
    Fr::new_unchecked(BigInt::new(limbs))
}

/// Raw Montgomery limbs of `f`, as the program would store them
pub fn to_montgomery_le(f: &Fr) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, limb) in f.0.0.iter().enumerate() {
        out[i * 8..(i + 1) * 8].copy_from_slice(&limb.to_le_bytes());
    }
    out
}

/// Canonical little-endian bytes of a field element
pub fn fr_to_bytes(f: &Fr) -> [u8; 32] {
    let bytes = f.into_bigint().to_bytes_le();
    let mut arr = [0u8; 32];
    arr[..bytes.len()].copy_from_slice(&bytes);
    arr
}

/// Field element from canonical little-endian bytes (reduced mod p)
pub fn fr_from_bytes(bytes: &[u8; 32]) -> Fr {
    Fr::from_le_bytes_mod_order(bytes)
}

/// True for a storage slot that was never written
pub fn is_zero_slot(bytes: &[u8; 32]) -> bool {
    bytes.iter().all(|b| *b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_montgomery_roundtrip() {
        for v in [1u64, 2, 1938, u64::MAX] {
            let f = Fr::from(v);
            let raw = to_montgomery_le(&f);
            assert_eq!(from_montgomery_le(&raw), f);
        }
    }

    #[test]
    fn test_montgomery_differs_from_canonical() {
        let f = Fr::from(7u64);
        assert_ne!(to_montgomery_le(&f), fr_to_bytes(&f));
        assert_eq!(fr_to_bytes(&f)[0], 7);
    }

    #[test]
    fn test_zero_slot() {
        assert!(is_zero_slot(&[0u8; 32]));
        assert!(!is_zero_slot(&to_montgomery_le(&Fr::from(1u64))));
    }
}
