//! Merkle Tree for Commitments
//!
//! Poseidon (BN254) binary tree. The deployed program uses height 20; the
//! reference [`MerkleTree`] takes the height as a parameter so that tests can
//! build small trees.
//!
//! ```text
//!                    Root
//!                   /    \
//!                 H01    H23
//!                /  \   /   \
//!               H0  H1 H2   H3
//!               |   |   |    |
//!              C0  C1  C2   C3  (Commitments)
//! ```

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::{
    CryptographicSponge,
    poseidon::{PoseidonConfig, PoseidonSponge, find_poseidon_ark_and_mds},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::field::{fr_from_bytes, fr_to_bytes};

/// Height of the deployed commitment tree (2^20 commitments)
pub const MT_HEIGHT: u32 = 20;

/// Largest height for which empty-subtree hashes are precomputed
pub const MAX_TREE_HEIGHT: u32 = 32;

static POSEIDON: LazyLock<PoseidonConfig<Fr>> = LazyLock::new(|| {
    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(254, 2, 8, 57, 0);
    PoseidonConfig::new(8, 57, 5, mds, ark, 2, 1)
});

static EMPTY_ROOTS: LazyLock<Vec<Fr>> = LazyLock::new(|| {
    let mut roots = vec![poseidon(&[Fr::from(0u64)])];
    for _ in 0..MAX_TREE_HEIGHT {
        let prev = roots[roots.len() - 1];
        roots.push(poseidon(&[prev, prev]));
    }
    roots
});

/// Poseidon sponge over the BN254 scalar field
pub fn poseidon(inputs: &[Fr]) -> Fr {
    let config: &PoseidonConfig<Fr> = &POSEIDON;
    let mut sponge = PoseidonSponge::<Fr>::new(config);
    for input in inputs {
        sponge.absorb(input);
    }
    sponge.squeeze_field_elements::<Fr>(1)[0]
}

/// An authentication path proving inclusion of a leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    /// Sibling hashes from leaf to root (canonical bytes)
    pub siblings: Vec<[u8; 32]>,
    /// The leaf position
    pub position: u64,
}

impl MerklePath {
    /// Recompute the root for `leaf` along this path
    pub fn compute_root(&self, leaf: &[u8; 32]) -> [u8; 32] {
        let hasher = MerkleHasher::new();
        let mut current = *leaf;
        let mut index = self.position;

        for sibling in &self.siblings {
            current = if index & 1 == 1 {
                hasher.hash_pair(sibling, &current)
            } else {
                hasher.hash_pair(&current, sibling)
            };
            index >>= 1;
        }

        current
    }

    /// Verify that this path proves inclusion of `leaf` in `root`
    pub fn verify(&self, leaf: &[u8; 32], root: &[u8; 32]) -> bool {
        &self.compute_root(leaf) == root
    }

    /// Get the authentication path as field elements (for ZK circuits)
    pub fn to_field_elements(&self) -> Vec<Fr> {
        self.siblings.iter().map(fr_from_bytes).collect()
    }
}

/// Poseidon-based Merkle hash function
#[derive(Clone, Copy, Default)]
pub struct MerkleHasher;

impl MerkleHasher {
    pub fn new() -> Self {
        Self
    }

    /// Hash two children to get parent
    pub fn hash_pair(&self, left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
        fr_to_bytes(&self.hash_pair_fr(&fr_from_bytes(left), &fr_from_bytes(right)))
    }

    pub fn hash_pair_fr(&self, left: &Fr, right: &Fr) -> Fr {
        poseidon(&[*left, *right])
    }

    /// Root of an empty subtree of the given depth (0 = empty leaf)
    pub fn empty_root(&self, depth: u32) -> [u8; 32] {
        fr_to_bytes(&self.empty_root_fr(depth))
    }

    pub fn empty_root_fr(&self, depth: u32) -> Fr {
        EMPTY_ROOTS[depth.min(MAX_TREE_HEIGHT) as usize]
    }
}

/// Sparse Merkle tree of fixed height
///
/// Uses lazy evaluation - only stores non-empty nodes. Depth 0 is the leaf
/// layer, depth `height` is the root.
pub struct MerkleTree {
    height: u32,
    /// Non-empty nodes: (depth, index) -> hash
    nodes: HashMap<(u32, u64), [u8; 32]>,
    /// Next available leaf position
    next_index: u64,
    hasher: MerkleHasher,
    root: [u8; 32],
}

impl MerkleTree {
    /// Create a new empty tree
    pub fn new(height: u32) -> Self {
        let height = height.min(MAX_TREE_HEIGHT);
        let hasher = MerkleHasher::new();
        Self {
            height,
            nodes: HashMap::new(),
            next_index: 0,
            root: hasher.empty_root(height),
            hasher,
        }
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    pub fn next_position(&self) -> u64 {
        self.next_index
    }

    /// Insert a leaf and return its position
    pub fn insert(&mut self, leaf: [u8; 32]) -> u64 {
        let position = self.next_index;
        self.nodes.insert((0, position), leaf);

        let mut current_index = position;
        let mut current_hash = leaf;

        for depth in 0..self.height {
            let sibling = self.node_or_empty(depth, current_index ^ 1);
            current_hash = if current_index & 1 == 1 {
                self.hasher.hash_pair(&sibling, &current_hash)
            } else {
                self.hasher.hash_pair(&current_hash, &sibling)
            };
            current_index >>= 1;
            self.nodes.insert((depth + 1, current_index), current_hash);
        }

        self.root = current_hash;
        self.next_index += 1;
        position
    }

    /// Stored node, `None` if the subtree below it is still empty
    pub fn node(&self, depth: u32, index: u64) -> Option<[u8; 32]> {
        self.nodes.get(&(depth, index)).copied()
    }

    /// All non-empty nodes as `((depth, index), hash)`
    pub fn nodes(&self) -> impl Iterator<Item = (&(u32, u64), &[u8; 32])> {
        self.nodes.iter()
    }

    fn node_or_empty(&self, depth: u32, index: u64) -> [u8; 32] {
        self.node(depth, index)
            .unwrap_or_else(|| self.hasher.empty_root(depth))
    }

    /// Get Merkle path for a position
    pub fn path(&self, position: u64) -> Option<MerklePath> {
        if position >= self.next_index {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.height as usize);
        let mut current_index = position;
        for depth in 0..self.height {
            siblings.push(self.node_or_empty(depth, current_index ^ 1));
            current_index >>= 1;
        }

        Some(MerklePath { siblings, position })
    }

    /// Leaf at `position`
    pub fn get(&self, position: u64) -> Option<[u8; 32]> {
        self.node(0, position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(v: u64) -> [u8; 32] {
        fr_to_bytes(&Fr::from(v))
    }

    #[test]
    fn test_empty_tree() {
        let tree = MerkleTree::new(4);
        assert_eq!(tree.next_position(), 0);
        assert_eq!(tree.root(), MerkleHasher::new().empty_root(4));
    }

    #[test]
    fn test_insert_and_path() {
        let mut tree = MerkleTree::new(4);
        assert_eq!(tree.insert(leaf(1)), 0);
        assert_eq!(tree.insert(leaf(2)), 1);

        let path1 = tree.path(0).unwrap();
        assert!(path1.verify(&leaf(1), &tree.root()));
        let path2 = tree.path(1).unwrap();
        assert!(path2.verify(&leaf(2), &tree.root()));
        assert!(tree.path(2).is_none());
    }

    #[test]
    fn test_path_invalid_leaf() {
        let mut tree = MerkleTree::new(4);
        tree.insert(leaf(1));
        let path = tree.path(0).unwrap();
        assert!(!path.verify(&leaf(99), &tree.root()));
    }

    #[test]
    fn test_root_changes() {
        let mut tree = MerkleTree::new(3);
        let root0 = tree.root();
        tree.insert(leaf(1));
        let root1 = tree.root();
        assert_ne!(root0, root1, "root should change after insert");
        tree.insert(leaf(2));
        assert_ne!(root1, tree.root(), "root should change after each insert");
    }

    #[test]
    fn test_empty_roots_chain() {
        let hasher = MerkleHasher::new();
        let e0 = hasher.empty_root(0);
        assert_eq!(hasher.hash_pair(&e0, &e0), hasher.empty_root(1));
    }
}
