//! Tree Coordinates
//!
//! Three ways to address a node of the commitment tree:
//!
//! ```text
//! LocalIndex { level, index }      level 0 = root, level H = leaves
//! GlobalIndex(g)                   pre-order: g = 2^level - 1 + index
//! AccIndex { account, offset }     g = account * values_per_account + offset
//!
//!   level 0            0
//!   level 1        1       2
//!   level 2      3   4   5   6
//! ```
//!
//! The node array is sharded over `account_count` storage accounts of
//! `values_per_account` slots each.

use crate::error::{ElusivError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalIndex {
    pub level: u32,
    pub index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalIndex(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccIndex {
    pub account: u32,
    pub offset: u64,
}

/// Shape of the on-chain tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeGeometry {
    height: u32,
    values_per_account: u64,
    account_count: u32,
}

impl TreeGeometry {
    /// The deployed program: height 20, 2^21 - 1 nodes over 8 accounts
    pub const DEPLOYED: TreeGeometry = TreeGeometry {
        height: 20,
        values_per_account: 1 << 18,
        account_count: 8,
    };

    pub fn new(height: u32, values_per_account: u64, account_count: u32) -> Result<Self> {
        if height >= 63 || values_per_account == 0 {
            return Err(ElusivError::InvalidSize(format!(
                "unsupported tree shape: height {height}, {values_per_account} values per account"
            )));
        }
        let geometry = Self {
            height,
            values_per_account,
            account_count,
        };
        let capacity = values_per_account.saturating_mul(account_count as u64);
        if capacity < geometry.node_count() {
            return Err(ElusivError::InvalidSize(format!(
                "{account_count} accounts of {values_per_account} values cannot hold {} nodes",
                geometry.node_count()
            )));
        }
        Ok(geometry)
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values_per_account(&self) -> u64 {
        self.values_per_account
    }

    pub fn account_count(&self) -> u32 {
        self.account_count
    }

    pub fn leaf_count(&self) -> u64 {
        1 << self.height
    }

    /// Total nodes of the tree, all levels
    pub fn node_count(&self) -> u64 {
        (1 << (self.height + 1)) - 1
    }

    pub fn leaf(&self, index: u64) -> Result<LocalIndex> {
        let local = LocalIndex {
            level: self.height,
            index,
        };
        self.check_local(local)?;
        Ok(local)
    }

    fn check_local(&self, local: LocalIndex) -> Result<()> {
        if local.level > self.height || local.index >= (1u64 << local.level) {
            return Err(ElusivError::IndexOutOfBounds {
                level: local.level,
                index: local.index,
            });
        }
        Ok(())
    }

    pub fn local_to_global(&self, local: LocalIndex) -> Result<GlobalIndex> {
        self.check_local(local)?;
        Ok(GlobalIndex((1u64 << local.level) - 1 + local.index))
    }

    pub fn global_to_local(&self, global: GlobalIndex) -> Result<LocalIndex> {
        if global.0 >= self.node_count() {
            return Err(ElusivError::IndexOutOfBounds {
                level: self.height + 1,
                index: global.0,
            });
        }
        let level = 63 - (global.0 + 1).leading_zeros();
        Ok(LocalIndex {
            level,
            index: global.0 - ((1u64 << level) - 1),
        })
    }

    pub fn global_to_acc(&self, global: GlobalIndex) -> Result<AccIndex> {
        let account = global.0 / self.values_per_account;
        if account >= self.account_count as u64 || global.0 >= self.node_count() {
            return Err(ElusivError::IndexOutOfBounds {
                level: self.height + 1,
                index: global.0,
            });
        }
        Ok(AccIndex {
            account: account as u32,
            offset: global.0 % self.values_per_account,
        })
    }

    pub fn acc_to_global(&self, acc: AccIndex) -> Result<GlobalIndex> {
        let global = acc.account as u64 * self.values_per_account + acc.offset;
        if acc.account >= self.account_count
            || acc.offset >= self.values_per_account
            || global >= self.node_count()
        {
            return Err(ElusivError::IndexOutOfBounds {
                level: self.height + 1,
                index: global,
            });
        }
        Ok(GlobalIndex(global))
    }

    pub fn local_to_acc(&self, local: LocalIndex) -> Result<AccIndex> {
        self.global_to_acc(self.local_to_global(local)?)
    }

    /// Sibling positions from `leaf` up to (excluding) the root
    pub fn opening_indices(&self, leaf: LocalIndex) -> Result<Vec<LocalIndex>> {
        self.check_local(leaf)?;
        let mut out = Vec::with_capacity(leaf.level as usize);
        let mut index = leaf.index;
        for level in (1..=leaf.level).rev() {
            out.push(LocalIndex {
                level,
                index: index ^ 1,
            });
            index >>= 1;
        }
        Ok(out)
    }
}

impl Default for TreeGeometry {
    fn default() -> Self {
        Self::DEPLOYED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> TreeGeometry {
        TreeGeometry::new(4, 8, 4).unwrap()
    }

    #[test]
    fn test_local_global_roundtrip() {
        let g = TreeGeometry::DEPLOYED;
        for level in 0..=g.height() {
            let width = 1u64 << level;
            for index in [0, width / 2, width - 1] {
                let local = LocalIndex { level, index };
                let global = g.local_to_global(local).unwrap();
                assert_eq!(g.global_to_local(global).unwrap(), local);
            }
        }
    }

    #[test]
    fn test_small_tree_exhaustive_roundtrip() {
        let g = small();
        for global in 0..g.node_count() {
            let global = GlobalIndex(global);
            let local = g.global_to_local(global).unwrap();
            assert_eq!(g.local_to_global(local).unwrap(), global);
            let acc = g.global_to_acc(global).unwrap();
            assert_eq!(g.acc_to_global(acc).unwrap(), global);
        }
    }

    #[test]
    fn test_bounds() {
        let g = TreeGeometry::DEPLOYED;
        assert!(matches!(
            g.local_to_global(LocalIndex { level: 21, index: 0 }),
            Err(ElusivError::IndexOutOfBounds { level: 21, .. })
        ));
        assert!(matches!(
            g.local_to_global(LocalIndex { level: 0, index: 1 }),
            Err(ElusivError::IndexOutOfBounds { .. })
        ));
        assert!(g.global_to_local(GlobalIndex(g.node_count())).is_err());
    }

    #[test]
    fn test_deployed_layout() {
        let g = TreeGeometry::DEPLOYED;
        assert_eq!(g.node_count(), 2_097_151);
        let first_leaf = g.local_to_global(g.leaf(0).unwrap()).unwrap();
        assert_eq!(first_leaf, GlobalIndex((1 << 20) - 1));
        assert_eq!(
            g.global_to_acc(first_leaf).unwrap(),
            AccIndex {
                account: 3,
                offset: (1 << 20) - 1 - 3 * (1 << 18)
            }
        );
        let last = GlobalIndex(g.node_count() - 1);
        assert_eq!(g.global_to_acc(last).unwrap().account, 7);
    }

    #[test]
    fn test_account_overflow() {
        // 3 accounts of 8 cannot hold the 31 nodes of a height-4 tree
        assert!(TreeGeometry::new(4, 8, 3).is_err());
        let g = small();
        assert!(g.acc_to_global(AccIndex { account: 4, offset: 0 }).is_err());
        assert!(g.acc_to_global(AccIndex { account: 0, offset: 8 }).is_err());
    }

    #[test]
    fn test_opening_indices() {
        let g = small();
        let siblings = g.opening_indices(g.leaf(5).unwrap()).unwrap();
        assert_eq!(
            siblings,
            vec![
                LocalIndex { level: 4, index: 4 },
                LocalIndex { level: 3, index: 3 },
                LocalIndex { level: 2, index: 0 },
                LocalIndex { level: 1, index: 1 },
            ]
        );
    }
}
