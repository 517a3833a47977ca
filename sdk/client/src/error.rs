use elusiv_privacy::{CommitmentHash, PrivacyError};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use thiserror::Error;

/// Errors surfaced by the client.
///
/// `Clone` so one failed chunk fetch can be handed to every waiter of the
/// shared future.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElusivError {
    #[error("index out of bounds: level {level}, index {index}")]
    IndexOutOfBounds { level: u32, index: u64 },

    #[error("could not fetch data: {0}")]
    CouldNotFetchData(String),

    #[error("could not find account {0}")]
    CouldNotFindAccount(Pubkey),

    #[error("could not find commitment {0:?}")]
    CouldNotFindCommitment(CommitmentHash),

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("invalid access: {0}")]
    InvalidAccess(String),

    #[error("too large size: {0}")]
    TooLargeSize(String),

    #[error("timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("relay error {code}: {message}{}", fmt_note(.note))]
    Relay {
        code: i64,
        program_error: Option<u32>,
        message: String,
        note: Option<String>,
    },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("cannot build a new transaction while nonce {nonce} is unconfirmed")]
    UnconfirmedTransaction { nonce: u32 },

    #[error("finalize {signature} has no matching init leg")]
    MissingInitLeg { signature: Signature },

    #[error("conflicting records at nonce {nonce}")]
    ConflictingRecords { nonce: u32 },

    #[error("no price available for token {token_id}")]
    MissingPrice { token_id: u16 },

    #[error(transparent)]
    Privacy(#[from] PrivacyError),
}

impl From<solana_client::client_error::ClientError> for ElusivError {
    fn from(e: solana_client::client_error::ClientError) -> Self {
        ElusivError::Rpc(e.to_string())
    }
}

impl From<reqwest::Error> for ElusivError {
    fn from(e: reqwest::Error) -> Self {
        ElusivError::Http(e.to_string())
    }
}

fn fmt_note(note: &Option<String>) -> String {
    note.as_deref().map(|n| format!(" ({n})")).unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, ElusivError>;
