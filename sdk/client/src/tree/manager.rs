//! Tree Manager
//!
//! Protocol-level questions about the commitment tree. Every call opens a
//! fresh [`StorageReader`], so a root and the openings returned with it come
//! from the same snapshot.

use elusiv_privacy::field::fr_to_bytes;
use elusiv_privacy::{CommitmentHash, MerklePath};
use log::{debug, warn};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

use crate::chain::ChainReader;
use crate::error::{ElusivError, Result};
use crate::tree::indices::TreeGeometry;
use crate::tree::storage::{ScanOutcome, StorageReader};

/// Position of a commitment and everything a proof needs to open it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentInfo {
    /// Leaf index
    pub index: u64,
    pub opening: MerklePath,
    pub root: [u8; 32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

/// States of [`TreeManager::await_commitment_insertion`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling { attempt: u32 },
    Found,
    TimedOut { attempts: u32 },
}

impl PollState {
    /// Transition after one lookup, `elapsed` measured from the first one
    pub fn advance(self, found: bool, elapsed: Duration, config: &PollConfig) -> PollState {
        match self {
            PollState::Polling { attempt } => {
                if found {
                    PollState::Found
                } else if elapsed + config.interval > config.timeout {
                    PollState::TimedOut {
                        attempts: attempt + 1,
                    }
                } else {
                    PollState::Polling {
                        attempt: attempt + 1,
                    }
                }
            }
            done => done,
        }
    }
}

pub struct TreeManager {
    chain: Arc<dyn ChainReader>,
    storage_address: Pubkey,
    geometry: TreeGeometry,
}

impl TreeManager {
    pub fn new(chain: Arc<dyn ChainReader>, storage_address: Pubkey, geometry: TreeGeometry) -> Self {
        Self {
            chain,
            storage_address,
            geometry,
        }
    }

    pub fn geometry(&self) -> &TreeGeometry {
        &self.geometry
    }

    pub async fn reader(&self) -> Result<StorageReader> {
        StorageReader::load(self.chain.clone(), &self.storage_address, self.geometry).await
    }

    /// Next free leaf index (the lower bound for anything inserted from now on)
    pub async fn next_leaf_index(&self) -> Result<u64> {
        Ok(self.reader().await?.next_leaf_index())
    }

    /// Whether `hash` sits at or after leaf `lower_bound`.
    ///
    /// Only the scan's "not there" outcomes become `false`; read failures
    /// propagate.
    pub async fn has_commitment(&self, hash: CommitmentHash, lower_bound: u64) -> Result<bool> {
        let reader = self.reader().await?;
        let start = self.geometry.local_to_global(self.geometry.leaf(lower_bound)?)?;
        match reader.scan(&[(hash, start)]).await? {
            ScanOutcome::Found(found) => Ok(found.contains_key(&hash)),
            ScanOutcome::Exhausted { .. } | ScanOutcome::NotFound { .. } => Ok(false),
        }
    }

    /// Index, opening and root for each `(hash, leaf lower bound)`, in order
    pub async fn get_commitments_info(
        &self,
        commitments: &[(CommitmentHash, u64)],
    ) -> Result<Vec<CommitmentInfo>> {
        if commitments.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.reader().await?;

        let requests = commitments
            .iter()
            .map(|(hash, bound)| {
                let global = self.geometry.local_to_global(self.geometry.leaf(*bound)?)?;
                Ok((*hash, global))
            })
            .collect::<Result<Vec<_>>>()?;
        let found = reader.find_commitment_indices(&requests).await?;

        let leaves = commitments
            .iter()
            .map(|(hash, _)| {
                let global = found
                    .get(hash)
                    .ok_or(ElusivError::CouldNotFindCommitment(*hash))?;
                let local = self.geometry.global_to_local(*global)?;
                if local.level != self.geometry.height() {
                    return Err(ElusivError::InvalidAccess(format!(
                        "{hash:?} found outside the leaf level"
                    )));
                }
                Ok(local.index)
            })
            .collect::<Result<Vec<_>>>()?;

        let (root, openings) = tokio::try_join!(reader.get_root(), reader.get_openings(&leaves))?;
        let root = fr_to_bytes(&root);

        let infos: Vec<CommitmentInfo> = leaves
            .into_iter()
            .zip(openings)
            .map(|(index, opening)| CommitmentInfo {
                index,
                opening,
                root,
            })
            .collect();

        if infos.len() != commitments.len() {
            return Err(ElusivError::InvalidSize(format!(
                "requested {} commitments, assembled {}",
                commitments.len(),
                infos.len()
            )));
        }
        Ok(infos)
    }

    /// Poll until `hash` appears at or after `lower_bound`
    pub async fn await_commitment_insertion(
        &self,
        hash: CommitmentHash,
        lower_bound: u64,
        config: PollConfig,
    ) -> Result<()> {
        let started = Instant::now();
        let mut state = PollState::Polling { attempt: 0 };

        loop {
            match state {
                PollState::Polling { attempt } => {
                    if attempt > 0 {
                        sleep(config.interval).await;
                    }
                    let found = self.has_commitment(hash, lower_bound).await?;
                    debug!("Poll {} for {:?}: found={}", attempt, hash, found);
                    state = state.advance(found, started.elapsed(), &config);
                }
                PollState::Found => return Ok(()),
                PollState::TimedOut { attempts } => {
                    warn!("{:?} not inserted after {} polls", hash, attempts);
                    return Err(ElusivError::Timeout { attempts });
                }
            }
        }
    }
}
