//! Accumulator queue
//!
//! Off-chain twin of the on-chain accumulator contract. Leaves are
//! enqueued into fixed-size subtrees of depth `sub_depth`; completed
//! subtree roots are later merged into a "small subroot tree" (SRT) and
//! finally hashed up to whatever main-tree depth a caller asks for.
//!
//! # Model
//!
//! ```text
//!   enqueue ──▶ leaf queue (levels 0..=sub_depth) ──▶ sub_roots[i]
//!                                                        │
//!   merge_sub_roots(n) ──▶ sub-root queue (levels 0..=h) ─┘──▶ small SRT root
//!                                                        │
//!   merge(depth) ──────────── hash up with zeros ────────┘──▶ main root
//! ```
//!
//! Every step matches the contract so roots agree bit for bit, including
//! the contract's treatment of `fill()` on an empty subtree.

use std::collections::BTreeMap;

use ark_ff::Zero;
use tracing::debug;

use crate::error::{CryptoError, Result};
use crate::field::Fr;
use crate::tree::{compute_zeros, hash_node, IncrementalMerkleTree};

/// Deepest main tree a queue can be merged into.
pub const MAX_DEPTH: usize = 32;

/// Per-level buffer of at most `arity` pending nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
struct LevelQueue {
    levels: Vec<Vec<Fr>>,
    indices: Vec<usize>,
}

impl LevelQueue {
    fn new(num_levels: usize, arity: usize) -> Self {
        Self {
            levels: vec![vec![Fr::zero(); arity]; num_levels],
            indices: vec![0; num_levels],
        }
    }

    fn clear(&mut self) {
        for level in self.levels.iter_mut() {
            level.iter_mut().for_each(|v| *v = Fr::zero());
        }
        self.indices.iter_mut().for_each(|i| *i = 0);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccQueue {
    sub_depth: usize,
    arity: usize,
    zeros: Vec<Fr>,
    leaf_queue: LevelQueue,
    num_leaves: usize,
    sub_roots: Vec<Fr>,

    // merge progress, discarded by any mutation
    sub_root_queue: LevelQueue,
    next_sub_root_index: usize,
    sub_trees_merged: bool,
    small_srt_root: Fr,
    main_roots: BTreeMap<usize, Fr>,
}

fn pow(base: usize, exp: usize) -> u128 {
    (base as u128).saturating_pow(exp as u32)
}

impl AccQueue {
    /// Arity 2 hashes with `hash_left_right`, arity 5 with `hash5`.
    pub fn new(sub_depth: usize, arity: usize, zero_value: Fr) -> Result<Self> {
        if !(2..=5).contains(&arity) {
            return Err(CryptoError::UnsupportedArity(arity));
        }
        if sub_depth > MAX_DEPTH {
            return Err(CryptoError::AccQueue("sub depth exceeds MAX_DEPTH"));
        }
        Ok(Self {
            sub_depth,
            arity,
            zeros: compute_zeros(zero_value, arity, MAX_DEPTH)?,
            leaf_queue: LevelQueue::new(sub_depth + 1, arity),
            num_leaves: 0,
            sub_roots: Vec::new(),
            sub_root_queue: LevelQueue::new(1, arity),
            next_sub_root_index: 0,
            sub_trees_merged: false,
            small_srt_root: Fr::zero(),
            main_roots: BTreeMap::new(),
        })
    }

    pub fn sub_depth(&self) -> usize {
        self.sub_depth
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    pub fn zeros(&self) -> &[Fr] {
        &self.zeros
    }

    /// Index the next completed subtree will take.
    pub fn current_subtree_index(&self) -> usize {
        self.sub_roots.len()
    }

    pub fn sub_roots(&self) -> &[Fr] {
        &self.sub_roots
    }

    pub fn sub_trees_merged(&self) -> bool {
        self.sub_trees_merged
    }

    fn subtree_capacity(&self) -> usize {
        usize::try_from(pow(self.arity, self.sub_depth)).unwrap_or(usize::MAX)
    }

    fn discard_merge_progress(&mut self) {
        self.sub_trees_merged = false;
        self.small_srt_root = Fr::zero();
        self.main_roots.clear();
        self.next_sub_root_index = 0;
        self.sub_root_queue.clear();
    }

    /// Add a leaf and return its index.
    pub fn enqueue(&mut self, leaf: Fr) -> Result<usize> {
        if (self.num_leaves as u128) >= pow(self.arity, MAX_DEPTH) {
            return Err(CryptoError::AccQueue("queue is full"));
        }
        self.enqueue_at(leaf, 0)?;

        let index = self.num_leaves;
        self.num_leaves += 1;
        self.discard_merge_progress();

        if self.num_leaves % self.subtree_capacity() == 0 {
            let sub_root = self.leaf_queue.levels[self.sub_depth][0];
            self.sub_roots.push(sub_root);
            self.leaf_queue.levels[self.sub_depth][0] = Fr::zero();
        }
        Ok(index)
    }

    fn enqueue_at(&mut self, mut leaf: Fr, mut level: usize) -> Result<()> {
        while level <= self.sub_depth {
            let n = self.leaf_queue.indices[level];
            if n != self.arity - 1 {
                self.leaf_queue.levels[level][n] = leaf;
                if level != self.sub_depth {
                    self.leaf_queue.indices[level] += 1;
                }
                return Ok(());
            }

            let mut inputs = self.leaf_queue.levels[level][..self.arity - 1].to_vec();
            inputs.push(leaf);
            leaf = hash_node(&inputs)?;
            self.leaf_queue.indices[level] = 0;
            level += 1;
        }
        Ok(())
    }

    /// Close the current subtree, padding it with zeros. With no pending
    /// leaves this appends an all-zero subtree, as the contract does.
    pub fn fill(&mut self) -> Result<()> {
        if self.num_leaves % self.subtree_capacity() == 0 {
            self.sub_roots.push(self.zeros[self.sub_depth]);
        } else {
            self.fill_levels()?;
            self.sub_roots.push(self.leaf_queue.levels[self.sub_depth][0]);
            self.leaf_queue.clear();
        }
        self.num_leaves = self.sub_roots.len() * self.subtree_capacity();
        self.discard_merge_progress();
        Ok(())
    }

    fn fill_levels(&mut self) -> Result<()> {
        for level in 0..self.sub_depth {
            let n = self.leaf_queue.indices[level];
            if n == 0 {
                continue;
            }
            let z = self.zeros[level];
            let inputs: Vec<Fr> = (0..self.arity)
                .map(|i| {
                    if i < n {
                        self.leaf_queue.levels[level][i]
                    } else {
                        z
                    }
                })
                .collect();
            let hashed = hash_node(&inputs)?;
            self.enqueue_at(hashed, level + 1)?;
            self.leaf_queue.indices[level] = 0;
        }
        Ok(())
    }

    /// Append a precomputed subtree root. Leaves of a pending partial
    /// subtree stay pending and end up after it.
    pub fn insert_sub_tree(&mut self, sub_root: Fr) {
        self.sub_roots.push(sub_root);
        self.num_leaves += self.subtree_capacity();
        self.discard_merge_progress();
    }

    pub fn get_sub_root(&self, index: usize) -> Result<Fr> {
        self.sub_roots
            .get(index)
            .copied()
            .ok_or(CryptoError::IndexOutOfBounds {
                index,
                limit: self.sub_roots.len(),
            })
    }

    /// Smallest `h >= 1` with `arity^h >= #subtrees`.
    pub fn calc_min_height(&self) -> usize {
        let mut depth = 1;
        while pow(self.arity, depth) < self.sub_roots.len() as u128 {
            depth += 1;
        }
        depth
    }

    /// Smallest `d >= sub_depth` with `arity^d >= num_leaves`.
    pub fn srt_depth(&self) -> usize {
        let mut depth = self.sub_depth;
        while pow(self.arity, depth) < self.num_leaves as u128 {
            depth += 1;
        }
        depth
    }

    /// Merge finalized subroots into the SRT, queueing at most `num_ops`
    /// of them per call (0 = no limit). Calls after completion are no-ops.
    pub fn merge_sub_roots(&mut self, num_ops: usize) -> Result<()> {
        if self.sub_trees_merged {
            return Ok(());
        }
        if self.num_leaves == 0 {
            return Err(CryptoError::AccQueue("nothing to merge"));
        }
        if self.num_leaves % self.subtree_capacity() != 0 {
            self.fill()?;
        }

        if self.sub_roots.len() == 1 {
            self.small_srt_root = self.sub_roots[0];
            self.sub_trees_merged = true;
            return Ok(());
        }

        let depth = self.calc_min_height();
        if self.sub_root_queue.levels.len() < depth + 1 {
            self.sub_root_queue = LevelQueue::new(depth + 1, self.arity);
        }

        let mut ops = 0;
        while self.next_sub_root_index < self.sub_roots.len() {
            if num_ops != 0 && ops == num_ops {
                debug!(
                    queued = self.next_sub_root_index,
                    total = self.sub_roots.len(),
                    "subroot merge paused"
                );
                return Ok(());
            }
            let leaf = self.sub_roots[self.next_sub_root_index];
            self.queue_sub_root(leaf, depth)?;
            self.next_sub_root_index += 1;
            ops += 1;
        }

        let padding = pow(self.arity, depth).saturating_sub(self.sub_roots.len() as u128);
        let z = self.zeros[self.sub_depth];
        for _ in 0..padding {
            self.queue_sub_root(z, depth)?;
        }

        self.small_srt_root = self.sub_root_queue.levels[depth][0];
        self.sub_trees_merged = true;
        Ok(())
    }

    fn queue_sub_root(&mut self, mut leaf: Fr, max_depth: usize) -> Result<()> {
        let mut level = 0;
        while level <= max_depth {
            let n = self.sub_root_queue.indices[level];
            if n != self.arity - 1 {
                self.sub_root_queue.levels[level][n] = leaf;
                self.sub_root_queue.indices[level] += 1;
                return Ok(());
            }
            let mut inputs = self.sub_root_queue.levels[level][..self.arity - 1].to_vec();
            inputs.push(leaf);
            leaf = hash_node(&inputs)?;
            self.sub_root_queue.indices[level] = 0;
            level += 1;
        }
        Ok(())
    }

    pub fn get_small_srt_root(&self) -> Result<Fr> {
        if !self.sub_trees_merged {
            return Err(CryptoError::AccQueue("subtrees must be merged first"));
        }
        Ok(self.small_srt_root)
    }

    fn check_main_depth(&self, depth: usize) -> Result<usize> {
        if depth == 0 {
            return Err(CryptoError::AccQueue("depth must be more than 0"));
        }
        if depth > MAX_DEPTH {
            return Err(CryptoError::AccQueue("depth must be at most MAX_DEPTH"));
        }
        let srt_depth = self.srt_depth();
        if depth < srt_depth {
            return Err(CryptoError::AccQueue("depth must be at least the SRT depth"));
        }
        Ok(srt_depth)
    }

    /// Hash the SRT root up to a main root of `depth`.
    pub fn merge(&mut self, depth: usize) -> Result<Fr> {
        if depth == 0 {
            return Err(CryptoError::AccQueue("depth must be more than 0"));
        }
        if !self.sub_trees_merged {
            return Err(CryptoError::AccQueue("subtrees must be merged before merge"));
        }
        let srt_depth = self.check_main_depth(depth)?;

        let mut root = self.small_srt_root;
        for i in srt_depth..depth {
            let mut inputs = vec![self.zeros[i]; self.arity];
            inputs[0] = root;
            root = hash_node(&inputs)?;
        }
        self.main_roots.insert(depth, root);
        Ok(root)
    }

    /// Single-pass reference for [`merge`](Self::merge): insert every
    /// subroot into one tree of depth `depth - sub_depth`.
    pub fn merge_direct(&mut self, depth: usize) -> Result<Fr> {
        if depth == 0 {
            return Err(CryptoError::AccQueue("depth must be more than 0"));
        }
        if self.num_leaves == 0 {
            return Err(CryptoError::AccQueue("nothing to merge"));
        }
        if self.num_leaves % self.subtree_capacity() != 0 {
            self.fill()?;
        }
        self.check_main_depth(depth)?;

        let tree = IncrementalMerkleTree::with_leaves(
            depth - self.sub_depth,
            self.zeros[self.sub_depth],
            self.arity,
            &self.sub_roots,
        )?;
        let root = tree.root();
        self.main_roots.insert(depth, root);
        Ok(root)
    }

    pub fn has_root(&self, depth: usize) -> bool {
        self.main_roots.contains_key(&depth)
    }

    pub fn get_root(&self, depth: usize) -> Result<Fr> {
        self.main_roots
            .get(&depth)
            .copied()
            .ok_or(CryptoError::AccQueue("no main root at this depth"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::NOTHING_UP_MY_SLEEVE;

    fn leaf(i: u64) -> Fr {
        Fr::from(i + 1000)
    }

    #[test]
    fn test_enqueue_returns_indices() {
        let mut q = AccQueue::new(2, 5, Fr::zero()).unwrap();
        for i in 0..30 {
            assert_eq!(q.enqueue(leaf(i)).unwrap(), i as usize);
        }
        assert_eq!(q.current_subtree_index(), 1);
        assert_eq!(q.num_leaves(), 30);
    }

    #[test]
    fn test_subroot_matches_tree() {
        for (arity, sub_depth) in [(2usize, 2usize), (5, 1), (5, 2)] {
            let mut q = AccQueue::new(sub_depth, arity, NOTHING_UP_MY_SLEEVE).unwrap();
            let cap = arity.pow(sub_depth as u32);
            let leaves: Vec<Fr> = (0..cap as u64).map(leaf).collect();
            for l in &leaves {
                q.enqueue(*l).unwrap();
            }
            let tree =
                IncrementalMerkleTree::with_leaves(sub_depth, NOTHING_UP_MY_SLEEVE, arity, &leaves)
                    .unwrap();
            assert_eq!(q.get_sub_root(0).unwrap(), tree.root());
        }
    }

    #[test]
    fn test_fill_partial_subtree() {
        let mut q = AccQueue::new(2, 5, Fr::from(3u64)).unwrap();
        let leaves: Vec<Fr> = (0..7).map(leaf).collect();
        for l in &leaves {
            q.enqueue(*l).unwrap();
        }
        q.fill().unwrap();
        assert_eq!(q.num_leaves(), 25);
        let tree = IncrementalMerkleTree::with_leaves(2, Fr::from(3u64), 5, &leaves).unwrap();
        assert_eq!(q.get_sub_root(0).unwrap(), tree.root());
    }

    #[test]
    fn test_fill_empty_appends_zero_subtree() {
        let mut q = AccQueue::new(1, 2, Fr::zero()).unwrap();
        q.fill().unwrap();
        assert_eq!(q.get_sub_root(0).unwrap(), q.zeros()[1]);
        assert_eq!(q.num_leaves(), 2);
        assert!(q.get_sub_root(1).is_err());
    }

    #[test]
    fn test_merge_errors() {
        let mut q = AccQueue::new(2, 5, Fr::zero()).unwrap();
        assert_eq!(
            q.merge_sub_roots(0),
            Err(CryptoError::AccQueue("nothing to merge"))
        );
        assert!(q.merge(3).is_err());
        q.enqueue(leaf(0)).unwrap();
        assert!(q.merge(3).is_err());
        assert!(q.get_small_srt_root().is_err());
        q.merge_sub_roots(0).unwrap();
        assert!(q.merge(0).is_err());
        assert!(q.merge(1).is_err());
        assert!(q.merge(MAX_DEPTH + 1).is_err());
        assert!(q.merge(2).is_ok());
    }

    #[test]
    fn test_single_subtree_is_srt() {
        let mut q = AccQueue::new(2, 5, Fr::zero()).unwrap();
        q.enqueue(leaf(0)).unwrap();
        q.merge_sub_roots(0).unwrap();
        assert_eq!(q.get_small_srt_root().unwrap(), q.get_sub_root(0).unwrap());
        assert_eq!(q.merge(2).unwrap(), q.get_sub_root(0).unwrap());
    }

    #[test]
    fn test_stepwise_merge_matches_one_shot() {
        let mut a = AccQueue::new(1, 5, Fr::zero()).unwrap();
        for i in 0..37 {
            a.enqueue(leaf(i)).unwrap();
        }
        let mut b = a.clone();

        a.merge_sub_roots(0).unwrap();
        for _ in 0..20 {
            b.merge_sub_roots(2).unwrap();
        }
        assert!(b.sub_trees_merged());
        assert_eq!(
            a.get_small_srt_root().unwrap(),
            b.get_small_srt_root().unwrap()
        );
        assert_eq!(a.merge(4).unwrap(), b.merge(4).unwrap());
    }

    #[test]
    fn test_merge_idempotent() {
        let mut q = AccQueue::new(2, 5, Fr::zero()).unwrap();
        for i in 0..60 {
            q.enqueue(leaf(i)).unwrap();
        }
        q.merge_sub_roots(0).unwrap();
        let first = q.merge(5).unwrap();
        q.merge_sub_roots(0).unwrap();
        let second = q.merge(5).unwrap();
        assert_eq!(first, second);
        assert_eq!(q.get_root(5).unwrap(), first);
    }

    #[test]
    fn test_enqueue_discards_merge() {
        let mut q = AccQueue::new(1, 2, Fr::zero()).unwrap();
        q.enqueue(leaf(0)).unwrap();
        q.merge_sub_roots(0).unwrap();
        q.merge(3).unwrap();
        assert!(q.has_root(3));
        q.enqueue(leaf(1)).unwrap();
        assert!(!q.has_root(3));
        assert!(!q.sub_trees_merged());
    }

    #[test]
    fn test_merge_direct_matches_merge() {
        let mut q = AccQueue::new(2, 2, Fr::zero()).unwrap();
        for i in 0..9 {
            q.enqueue(leaf(i)).unwrap();
        }
        let mut direct = q.clone();
        q.merge_sub_roots(0).unwrap();
        assert_eq!(q.merge(6).unwrap(), direct.merge_direct(6).unwrap());
    }

    #[test]
    fn test_copy_is_independent() {
        let mut q = AccQueue::new(1, 5, Fr::zero()).unwrap();
        q.enqueue(leaf(0)).unwrap();
        let snapshot = q.clone();
        q.enqueue(leaf(1)).unwrap();
        assert_eq!(snapshot.num_leaves(), 1);
        assert_ne!(snapshot, q);
    }
}
