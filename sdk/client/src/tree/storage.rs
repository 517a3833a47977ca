//! Storage Reader
//!
//! Reads the commitment tree out of its storage accounts.
//!
//! ```text
//! StorageAccount
//! ┌──────────────────────────────┬─────────────────────────┐
//! │ pubkeys[account_count]       │ next_commitment_ptr u32 │
//! │ (1 B in-use flag + 32 B key) │          LE             │
//! └──────────────────────────────┴─────────────────────────┘
//!          │
//!          ├──▶ chunk 0 ─┐
//!          ├──▶ chunk 1  │ pre-order node array, see [`TreeChunk`]
//!          └──▶ ...     ─┘
//! ```
//!
//! All values leave this module as canonical field elements; unwritten
//! slots are replaced by the empty-subtree hash of their level.

use ark_bn254::Fr;
use elusiv_privacy::field::fr_to_bytes;
use elusiv_privacy::{
    CommitmentHash, MerkleHasher, MerklePath, from_montgomery_le, is_zero_slot, to_montgomery_le,
};
use futures::future::try_join_all;
use log::debug;
use solana_sdk::pubkey::Pubkey;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::chain::ChainReader;
use crate::error::{ElusivError, Result};
use crate::tree::chunk::{ChunkReader, TreeChunk};
use crate::tree::indices::{AccIndex, GlobalIndex, LocalIndex, TreeGeometry};

const PUBKEY_ENTRY_SIZE: usize = 33;

/// Parsed storage account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAccount {
    pubkeys: Vec<Option<Pubkey>>,
    next_commitment_ptr: u32,
}

impl StorageAccount {
    pub fn new(pubkeys: Vec<Option<Pubkey>>, next_commitment_ptr: u32) -> Self {
        Self {
            pubkeys,
            next_commitment_ptr,
        }
    }

    pub fn parse(data: &[u8], account_count: u32) -> Result<Self> {
        let keys_len = account_count as usize * PUBKEY_ENTRY_SIZE;
        if data.len() < keys_len + 4 {
            return Err(ElusivError::InvalidSize(format!(
                "storage account has {} bytes, expected {}",
                data.len(),
                keys_len + 4
            )));
        }

        let pubkeys = data[..keys_len]
            .chunks_exact(PUBKEY_ENTRY_SIZE)
            .map(|entry| {
                let mut key = [0u8; 32];
                key.copy_from_slice(&entry[1..]);
                (entry[0] == 1).then(|| Pubkey::new_from_array(key))
            })
            .collect();

        let mut ptr = [0u8; 4];
        ptr.copy_from_slice(&data[keys_len..keys_len + 4]);

        Ok(Self {
            pubkeys,
            next_commitment_ptr: u32::from_le_bytes(ptr),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.pubkeys.len() * PUBKEY_ENTRY_SIZE + 4);
        for key in &self.pubkeys {
            match key {
                Some(k) => {
                    data.push(1);
                    data.extend_from_slice(k.as_ref());
                }
                None => data.extend_from_slice(&[0u8; PUBKEY_ENTRY_SIZE]),
            }
        }
        data.extend_from_slice(&self.next_commitment_ptr.to_le_bytes());
        data
    }

    /// Next free leaf slot
    pub fn next_commitment_ptr(&self) -> u32 {
        self.next_commitment_ptr
    }

    pub fn chunk_address(&self, account: u32) -> Result<Pubkey> {
        self.pubkeys
            .get(account as usize)
            .copied()
            .flatten()
            .ok_or_else(|| {
                ElusivError::InvalidAccess(format!("tree account {account} is not initialized"))
            })
    }
}

/// Result of scanning the tree for a set of commitments
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScanOutcome {
    Found(HashMap<CommitmentHash, GlobalIndex>),
    /// Hit an unwritten slot before `hash` showed up
    Exhausted { hash: CommitmentHash, at: GlobalIndex },
    /// Reached the last leaf without seeing `hash`
    NotFound { hash: CommitmentHash },
}

struct ScanTarget {
    hash: CommitmentHash,
    raw: [u8; 32],
    lower_bound: u64,
}

/// Reads one consistent view of the tree.
///
/// Chunks are cached for the lifetime of the reader, so every value read
/// through one reader comes from the same fetch.
pub struct StorageReader {
    geometry: TreeGeometry,
    storage: StorageAccount,
    chunks: ChunkReader,
    hasher: MerkleHasher,
}

impl StorageReader {
    pub async fn load(
        chain: Arc<dyn ChainReader>,
        storage_address: &Pubkey,
        geometry: TreeGeometry,
    ) -> Result<Self> {
        let data = chain
            .get_account_data(storage_address)
            .await?
            .ok_or(ElusivError::CouldNotFindAccount(*storage_address))?;
        let storage = StorageAccount::parse(&data, geometry.account_count())?;
        debug!(
            "Loaded storage account {} (next commitment {})",
            storage_address,
            storage.next_commitment_ptr()
        );
        Ok(Self {
            geometry,
            storage,
            chunks: ChunkReader::new(chain, geometry.values_per_account()),
            hasher: MerkleHasher::new(),
        })
    }

    pub fn geometry(&self) -> &TreeGeometry {
        &self.geometry
    }

    /// Index of the most recently inserted leaf, `None` for an empty tree
    pub fn get_latest_leaf_index(&self) -> Option<u64> {
        (self.storage.next_commitment_ptr() as u64).checked_sub(1)
    }

    pub fn next_leaf_index(&self) -> u64 {
        self.storage.next_commitment_ptr() as u64
    }

    pub async fn get_root(&self) -> Result<Fr> {
        let root = LocalIndex { level: 0, index: 0 };
        self.read_value(root).await
    }

    async fn chunk(&self, account: u32) -> Result<Arc<TreeChunk>> {
        let address = self.storage.chunk_address(account)?;
        self.chunks.get_tree_chunk(&address).await
    }

    fn resolve(&self, level: u32, raw: &[u8; 32]) -> Fr {
        if is_zero_slot(raw) {
            self.hasher.empty_root_fr(self.geometry.height() - level)
        } else {
            from_montgomery_le(raw)
        }
    }

    async fn read_value(&self, local: LocalIndex) -> Result<Fr> {
        let acc = self.geometry.local_to_acc(local)?;
        let raw = self.chunk(acc.account).await?.value(acc.offset)?;
        Ok(self.resolve(local.level, &raw))
    }

    /// Values at `indices`, deduplicated, one fetch per distinct chunk
    pub async fn get_commitments_at_indices(
        &self,
        indices: &[LocalIndex],
    ) -> Result<BTreeMap<LocalIndex, Fr>> {
        let mut by_account: BTreeMap<u32, Vec<(LocalIndex, AccIndex)>> = BTreeMap::new();
        let unique: BTreeSet<LocalIndex> = indices.iter().copied().collect();
        for local in unique {
            let acc = self.geometry.local_to_acc(local)?;
            by_account.entry(acc.account).or_default().push((local, acc));
        }

        let groups = try_join_all(by_account.into_iter().map(|(account, entries)| async move {
            let chunk = self.chunk(account).await?;
            entries
                .into_iter()
                .map(|(local, acc)| {
                    let raw = chunk.value(acc.offset)?;
                    Ok((local, self.resolve(local.level, &raw)))
                })
                .collect::<Result<Vec<_>>>()
        }))
        .await?;

        Ok(groups.into_iter().flatten().collect())
    }

    /// Openings (siblings bottom-to-top, canonical bytes) for leaves
    pub async fn get_openings(&self, leaves: &[u64]) -> Result<Vec<MerklePath>> {
        let mut per_leaf = Vec::with_capacity(leaves.len());
        let mut needed = BTreeSet::new();
        for leaf in leaves {
            let siblings = self.geometry.opening_indices(self.geometry.leaf(*leaf)?)?;
            needed.extend(siblings.iter().copied());
            per_leaf.push((*leaf, siblings));
        }

        let needed: Vec<LocalIndex> = needed.into_iter().collect();
        let values = self.get_commitments_at_indices(&needed).await?;

        per_leaf
            .into_iter()
            .map(|(position, siblings)| {
                let siblings = siblings
                    .iter()
                    .map(|idx| {
                        values.get(idx).map(fr_to_bytes).ok_or_else(|| {
                            ElusivError::InvalidSize(format!("missing sibling {idx:?}"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(MerklePath { siblings, position })
            })
            .collect()
    }

    /// Global indices of commitments, each searched from its lower bound
    pub async fn find_commitment_indices(
        &self,
        commitments: &[(CommitmentHash, GlobalIndex)],
    ) -> Result<HashMap<CommitmentHash, GlobalIndex>> {
        match self.scan(commitments).await? {
            ScanOutcome::Found(found) => Ok(found),
            ScanOutcome::Exhausted { hash, at } => Err(ElusivError::CouldNotFetchData(format!(
                "unwritten slot {} reached before {hash:?}",
                at.0
            ))),
            ScanOutcome::NotFound { hash } => Err(ElusivError::CouldNotFindCommitment(hash)),
        }
    }

    pub(crate) async fn scan(
        &self,
        commitments: &[(CommitmentHash, GlobalIndex)],
    ) -> Result<ScanOutcome> {
        let mut groups: BTreeMap<u32, Vec<ScanTarget>> = BTreeMap::new();
        for (hash, lower_bound) in commitments {
            let acc = self.geometry.global_to_acc(*lower_bound)?;
            groups.entry(acc.account).or_default().push(ScanTarget {
                hash: *hash,
                raw: to_montgomery_le(&hash.to_field()),
                lower_bound: lower_bound.0,
            });
        }

        let outcomes = try_join_all(groups.into_values().map(|g| self.scan_group(g))).await?;

        let mut found = HashMap::new();
        for outcome in outcomes {
            match outcome {
                ScanOutcome::Found(group) => found.extend(group),
                missing => return Ok(missing),
            }
        }
        Ok(ScanOutcome::Found(found))
    }

    async fn scan_group(&self, mut targets: Vec<ScanTarget>) -> Result<ScanOutcome> {
        targets.sort_by_key(|t| t.lower_bound);
        let end = self.geometry.node_count();
        let mut found = HashMap::new();
        let Some(first) = targets.first() else {
            return Ok(ScanOutcome::Found(found));
        };
        let mut position = first.lower_bound;

        while let Some(next) = targets.first() {
            // skip ahead: nothing unfound can sit before the smallest bound
            position = position.max(next.lower_bound);
            if position >= end {
                return Ok(ScanOutcome::NotFound { hash: next.hash });
            }

            let acc = self.geometry.global_to_acc(GlobalIndex(position))?;
            let raw = self.chunk(acc.account).await?.value(acc.offset)?;
            if is_zero_slot(&raw) {
                return Ok(ScanOutcome::Exhausted {
                    hash: next.hash,
                    at: GlobalIndex(position),
                });
            }

            if let Some(i) = targets
                .iter()
                .position(|t| t.lower_bound <= position && t.raw == raw)
            {
                let hit = targets.remove(i);
                debug!("Found {:?} at global index {}", hit.hash, position);
                found.insert(hit.hash, GlobalIndex(position));
                // identical hashes requested twice resolve to the same slot
                targets.retain(|t| {
                    if t.hash == hit.hash {
                        found.insert(t.hash, GlobalIndex(position));
                        false
                    } else {
                        true
                    }
                });
                continue;
            }
            position += 1;
        }

        Ok(ScanOutcome::Found(found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock_chain::{MockChain, MockTree};

    fn leaf(v: u64) -> CommitmentHash {
        CommitmentHash(fr_to_bytes(&Fr::from(v)))
    }

    async fn reader_with(count: u64) -> (Arc<MockChain>, MockTree, StorageReader) {
        let chain = Arc::new(MockChain::new());
        let geometry = TreeGeometry::new(4, 8, 4).unwrap();
        let mut tree = MockTree::new(chain.clone(), geometry);
        for i in 0..count {
            tree.insert(leaf(i + 1));
        }
        let reader = StorageReader::load(chain.clone(), &tree.storage_address(), geometry)
            .await
            .unwrap();
        (chain, tree, reader)
    }

    fn first_leaf(reader: &StorageReader) -> GlobalIndex {
        let g = reader.geometry();
        g.local_to_global(g.leaf(0).unwrap()).unwrap()
    }

    #[test]
    fn test_storage_account_layout() {
        let a = Pubkey::new_unique();
        let storage = StorageAccount::new(vec![Some(a), None], 1938);
        let bytes = storage.encode();
        assert_eq!(bytes.len(), 2 * 33 + 4);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..33], a.as_ref());
        let parsed = StorageAccount::parse(&bytes, 2).unwrap();
        assert_eq!(parsed, storage);
        assert!(parsed.chunk_address(1).is_err());
    }

    #[tokio::test]
    async fn test_root_matches_reference() {
        let (_, tree, reader) = reader_with(6).await;
        assert_eq!(fr_to_bytes(&reader.get_root().await.unwrap()), tree.root());
        assert_eq!(reader.get_latest_leaf_index(), Some(5));
    }

    #[tokio::test]
    async fn test_empty_tree_root_is_default() {
        let (_, tree, reader) = reader_with(0).await;
        assert_eq!(fr_to_bytes(&reader.get_root().await.unwrap()), tree.root());
        assert_eq!(reader.get_latest_leaf_index(), None);
    }

    #[tokio::test]
    async fn test_find_with_skip_ahead() {
        let (_, _, reader) = reader_with(10).await;
        let base = first_leaf(&reader).0;

        let found = reader
            .find_commitment_indices(&[
                (leaf(3), GlobalIndex(base)),
                (leaf(9), GlobalIndex(base + 6)),
            ])
            .await
            .unwrap();
        assert_eq!(found[&leaf(3)], GlobalIndex(base + 2));
        assert_eq!(found[&leaf(9)], GlobalIndex(base + 8));
    }

    #[tokio::test]
    async fn test_unwritten_slot_stops_scan() {
        let (_, _, reader) = reader_with(3).await;
        let base = first_leaf(&reader).0;
        let err = reader
            .find_commitment_indices(&[(leaf(42), GlobalIndex(base))])
            .await
            .unwrap_err();
        assert!(matches!(err, ElusivError::CouldNotFetchData(_)));
    }

    #[tokio::test]
    async fn test_lower_bound_past_commitment() {
        let (_, _, reader) = reader_with(5).await;
        let base = first_leaf(&reader).0;
        // leaf(2) sits at base + 1, a bound of base + 2 can never reach it
        let outcome = reader.scan(&[(leaf(2), GlobalIndex(base + 2))]).await.unwrap();
        assert!(matches!(outcome, ScanOutcome::Exhausted { .. }));
    }

    #[tokio::test]
    async fn test_openings_share_chunk_fetches() {
        let (chain, tree, reader) = reader_with(8).await;
        let openings = reader.get_openings(&[2, 3, 5]).await.unwrap();
        for (opening, v) in openings.iter().zip([3u64, 4, 6]) {
            assert!(opening.verify(leaf(v).as_bytes(), &tree.root()));
        }
        for address in tree.chunk_addresses() {
            assert!(chain.account_reads(&address) <= 1);
        }
    }
}
