use thiserror::Error;

/// Errors raised while deriving keys, encoding metadata or decrypting it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrivacyError {
    #[error("{field} out of range: {value} (max {max})")]
    FieldOutOfRange {
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("metadata encryption failed")]
    EncryptionFailed,

    #[error("metadata decryption failed")]
    DecryptionFailed,

    #[error("invalid key material")]
    InvalidKeyMaterial,
}
