//! Tree Chunks
//!
//! One storage account holds a contiguous slice of the pre-order node array:
//!
//! ```text
//! ┌────────────┬──────────┬──────────┬─────┬──────────────────────┐
//! │ is_in_use  │ value 0  │ value 1  │ ... │ value (per_acc - 1)  │
//! │    1 B     │  32 B    │  32 B    │     │        32 B          │
//! └────────────┴──────────┴──────────┴─────┴──────────────────────┘
//! ```
//!
//! Values are Montgomery limbs; an all-zero value was never written.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::debug;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chain::ChainReader;
use crate::error::{ElusivError, Result};

const VALUE_SIZE: usize = 32;
const HEADER_SIZE: usize = 1;

/// Parsed contents of one tree storage account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeChunk {
    data: Vec<u8>,
    values: u64,
}

impl TreeChunk {
    pub fn parse(data: Vec<u8>, values_per_account: u64) -> Result<Self> {
        let expected = HEADER_SIZE + values_per_account as usize * VALUE_SIZE;
        if data.len() < expected {
            return Err(ElusivError::InvalidSize(format!(
                "tree chunk has {} bytes, expected {expected}",
                data.len()
            )));
        }
        if data[0] != 1 {
            return Err(ElusivError::InvalidAccess(
                "tree chunk is not in use".to_string(),
            ));
        }
        Ok(Self {
            data,
            values: values_per_account,
        })
    }

    /// Raw (Montgomery) value at `offset`
    pub fn value(&self, offset: u64) -> Result<[u8; 32]> {
        if offset >= self.values {
            return Err(ElusivError::InvalidAccess(format!(
                "offset {offset} outside chunk of {} values",
                self.values
            )));
        }
        let start = HEADER_SIZE + offset as usize * VALUE_SIZE;
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.data[start..start + VALUE_SIZE]);
        Ok(out)
    }

    /// Serialize values as the program lays them out
    pub fn encode(values: &[[u8; 32]], values_per_account: u64) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE + values_per_account as usize * VALUE_SIZE];
        data[0] = 1;
        for (i, v) in values.iter().take(values_per_account as usize).enumerate() {
            let start = HEADER_SIZE + i * VALUE_SIZE;
            data[start..start + VALUE_SIZE].copy_from_slice(v);
        }
        data
    }
}

type ChunkFuture = Shared<BoxFuture<'static, Result<Arc<TreeChunk>>>>;

/// Fetches tree chunks, coalescing concurrent requests for one account.
///
/// Completed fetches stay cached for the lifetime of the reader. A failed
/// fetch is evicted so that the next request goes back to the chain.
pub struct ChunkReader {
    chain: Arc<dyn ChainReader>,
    values_per_account: u64,
    inflight: Mutex<HashMap<Pubkey, ChunkFuture>>,
}

impl ChunkReader {
    pub fn new(chain: Arc<dyn ChainReader>, values_per_account: u64) -> Self {
        Self {
            chain,
            values_per_account,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_tree_chunk(&self, address: &Pubkey) -> Result<Arc<TreeChunk>> {
        let fetch = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(*address)
                .or_insert_with(|| {
                    let chain = self.chain.clone();
                    let address = *address;
                    let values = self.values_per_account;
                    async move {
                        debug!("Fetching tree chunk {}", address);
                        let data = chain
                            .get_account_data(&address)
                            .await?
                            .ok_or(ElusivError::CouldNotFindAccount(address))?;
                        TreeChunk::parse(data, values).map(Arc::new)
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };

        let result = fetch.await;
        if result.is_err() {
            self.inflight.lock().await.remove(address);
        }
        result
    }

    /// Number of distinct chunks requested so far
    pub async fn cached_count(&self) -> usize {
        self.inflight.lock().await.len()
    }
}
