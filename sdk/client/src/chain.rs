//! Chain Reader
//!
//! The three reads the client needs from the chain, behind a trait so that
//! history and tree code can run against an in-memory chain in tests.
//!
//! [`RpcChainReader`] implements it over the nonblocking Solana RPC client
//! at `finalized` commitment.

use async_trait::async_trait;
use futures::future::try_join_all;
use log::debug;
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_request::RpcRequest;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status_client_types::{
    EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding,
};
use std::str::FromStr;

use crate::error::{ElusivError, Result};

/// Page size of `getSignaturesForAddress`
const SIGNATURE_PAGE_LIMIT: usize = 1000;

/// One entry of a signature listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature: Signature,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub failed: bool,
}

/// Instruction with account indices already resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<Pubkey>,
    pub data: Vec<u8>,
}

/// A finalized transaction body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub signature: Signature,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub failed: bool,
    pub instructions: Vec<ChainInstruction>,
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Raw account data, `None` if the account does not exist
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>>;

    /// All signatures referencing `address`, newest first, starting below
    /// `before` when given
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
    ) -> Result<Vec<SignatureInfo>>;

    /// Transaction bodies in the order of `signatures`
    async fn get_transactions(&self, signatures: &[Signature]) -> Result<Vec<Option<ChainTransaction>>>;
}

/// [`ChainReader`] over JSON RPC
pub struct RpcChainReader {
    rpc: RpcClient,
    commitment: CommitmentConfig,
}

impl RpcChainReader {
    pub fn new(rpc_url: String) -> Self {
        Self::with_commitment(rpc_url, CommitmentConfig::finalized())
    }

    pub fn with_commitment(rpc_url: String, commitment: CommitmentConfig) -> Self {
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url, commitment),
            commitment,
        }
    }

    async fn get_transaction(&self, signature: Signature) -> Result<Option<ChainTransaction>> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };

        // `getTransaction` answers null for an unknown signature; only that is `None`
        let confirmed: Option<EncodedConfirmedTransactionWithStatusMeta> = self
            .rpc
            .send(
                RpcRequest::GetTransaction,
                json!([signature.to_string(), config]),
            )
            .await?;
        let Some(confirmed) = confirmed else {
            debug!("Transaction {} not found", signature);
            return Ok(None);
        };

        let failed = confirmed
            .transaction
            .meta
            .as_ref()
            .map(|m| m.err.is_some())
            .unwrap_or(false);

        let Some(versioned) = confirmed.transaction.transaction.decode() else {
            return Err(ElusivError::CouldNotFetchData(format!(
                "undecodable transaction {signature}"
            )));
        };

        let keys = versioned.message.static_account_keys();
        // Instructions touching lookup-table accounts are not ours and are skipped
        let instructions = versioned
            .message
            .instructions()
            .iter()
            .filter_map(|ix| {
                let program_id = *keys.get(ix.program_id_index as usize)?;
                let accounts = ix
                    .accounts
                    .iter()
                    .map(|i| keys.get(*i as usize).copied())
                    .collect::<Option<Vec<_>>>()?;
                Some(ChainInstruction {
                    program_id,
                    accounts,
                    data: ix.data.clone(),
                })
            })
            .collect();

        Ok(Some(ChainTransaction {
            signature,
            slot: confirmed.slot,
            block_time: confirmed.block_time,
            failed,
            instructions,
        }))
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        let response = self
            .rpc
            .get_account_with_commitment(address, self.commitment)
            .await?;
        Ok(response.value.map(|account| account.data))
    }

    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
    ) -> Result<Vec<SignatureInfo>> {
        let mut out = Vec::new();
        let mut cursor = before;

        loop {
            let config = GetConfirmedSignaturesForAddress2Config {
                before: cursor,
                until: None,
                limit: Some(SIGNATURE_PAGE_LIMIT),
                commitment: Some(self.commitment),
            };
            let page = self
                .rpc
                .get_signatures_for_address_with_config(address, config)
                .await?;
            let page_len = page.len();

            for entry in page {
                let signature = Signature::from_str(&entry.signature)
                    .map_err(|e| ElusivError::Rpc(format!("bad signature: {e}")))?;
                out.push(SignatureInfo {
                    signature,
                    slot: entry.slot,
                    block_time: entry.block_time,
                    failed: entry.err.is_some(),
                });
            }

            if page_len < SIGNATURE_PAGE_LIMIT {
                break;
            }
            cursor = out.last().map(|s| s.signature);
        }

        Ok(out)
    }

    async fn get_transactions(&self, signatures: &[Signature]) -> Result<Vec<Option<ChainTransaction>>> {
        try_join_all(signatures.iter().map(|s| self.get_transaction(*s))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Nothing listens on port 1
    const UNREACHABLE_RPC: &str = "http://127.0.0.1:1";

    #[tokio::test]
    async fn test_transport_failure_is_not_absence() {
        let reader = RpcChainReader::new(UNREACHABLE_RPC.to_string());
        let err = reader
            .get_transactions(&[Signature::default()])
            .await
            .unwrap_err();
        assert!(matches!(err, ElusivError::Rpc(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_account_read_failure_propagates() {
        let reader = RpcChainReader::new(UNREACHABLE_RPC.to_string());
        let err = reader
            .get_account_data(&Pubkey::new_unique())
            .await
            .unwrap_err();
        assert!(matches!(err, ElusivError::Rpc(_)), "{err:?}");
    }
}
