//! fixed-arity incremental merkle tree
//!
//! nodes are kept per level as a dense prefix; anything past the prefix is
//! that level's zero. a depth-10 quinary tree has ~10M leaf slots, so only
//! what has been written is stored.

use ark_ff::Zero;

use crate::error::{CryptoError, Result};
use crate::field::Fr;
use crate::poseidon::{hash_children, hash_left_right};

/// Inclusion proof for a leaf, or for a subtree root when produced by
/// [`IncrementalMerkleTree::gen_merkle_subroot_path`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    /// siblings per level, `arity - 1` each
    pub path_elements: Vec<Vec<Fr>>,
    /// position of the running node within its group, per level
    pub path_indices: Vec<usize>,
    pub depth: usize,
    pub root: Fr,
    pub leaf: Fr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncrementalMerkleTree {
    depth: usize,
    arity: usize,
    zero_value: Fr,
    zeros: Vec<Fr>,
    nodes: Vec<Vec<Fr>>,
    next_index: usize,
}

/// hash one node's children with the contract's choice of function
pub fn hash_node(children: &[Fr]) -> Result<Fr> {
    match children {
        [l, r] => Ok(hash_left_right(*l, *r)),
        _ => hash_children(children),
    }
}

/// `zeros[0] = zero_value`, `zeros[i] = H(zeros[i-1]; arity)`
pub fn compute_zeros(zero_value: Fr, arity: usize, depth: usize) -> Result<Vec<Fr>> {
    let mut zeros = Vec::with_capacity(depth + 1);
    zeros.push(zero_value);
    for i in 1..=depth {
        zeros.push(hash_node(&vec![zeros[i - 1]; arity])?);
    }
    Ok(zeros)
}

impl IncrementalMerkleTree {
    pub fn new(depth: usize, zero_value: Fr, arity: usize) -> Result<Self> {
        if !(2..=5).contains(&arity) {
            return Err(CryptoError::UnsupportedArity(arity));
        }
        let zeros = compute_zeros(zero_value, arity, depth)?;
        Ok(Self {
            depth,
            arity,
            zero_value,
            zeros,
            nodes: vec![Vec::new(); depth + 1],
            next_index: 0,
        })
    }

    /// Tree holding `leaves` in order, built bottom-up.
    pub fn with_leaves(depth: usize, zero_value: Fr, arity: usize, leaves: &[Fr]) -> Result<Self> {
        let mut tree = Self::new(depth, zero_value, arity)?;
        tree.insert_many(leaves)?;
        Ok(tree)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn zero_value(&self) -> Fr {
        self.zero_value
    }

    pub fn zeros(&self) -> &[Fr] {
        &self.zeros
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// `arity^depth`, saturating for absurd depths
    pub fn capacity(&self) -> usize {
        (self.arity as u128)
            .checked_pow(self.depth as u32)
            .map_or(usize::MAX, |c| usize::try_from(c).unwrap_or(usize::MAX))
    }

    pub fn root(&self) -> Fr {
        self.node(self.depth, 0)
    }

    fn node(&self, level: usize, index: usize) -> Fr {
        self.nodes[level]
            .get(index)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    fn set_node(&mut self, level: usize, index: usize, value: Fr) {
        let row = &mut self.nodes[level];
        if index >= row.len() {
            row.resize(index + 1, self.zeros[level]);
        }
        row[index] = value;
    }

    fn group(&self, level: usize, parent: usize) -> Vec<Fr> {
        let start = parent * self.arity;
        (start..start + self.arity)
            .map(|i| self.node(level, i))
            .collect()
    }

    fn refresh_path(&mut self, mut index: usize) -> Result<()> {
        for level in 0..self.depth {
            let parent = index / self.arity;
            let value = hash_node(&self.group(level, parent))?;
            self.set_node(level + 1, parent, value);
            index = parent;
        }
        Ok(())
    }

    /// Leaf at `index`, zero if never written.
    pub fn get_node(&self, index: usize) -> Result<Fr> {
        if index >= self.capacity() {
            return Err(CryptoError::IndexOutOfBounds {
                index,
                limit: self.capacity(),
            });
        }
        Ok(self.node(0, index))
    }

    pub fn insert(&mut self, leaf: Fr) -> Result<usize> {
        let index = self.next_index;
        if index >= self.capacity() {
            return Err(CryptoError::TreeFull(self.capacity()));
        }
        self.set_node(0, index, leaf);
        self.refresh_path(index)?;
        self.next_index += 1;
        Ok(index)
    }

    /// Append many leaves, recomputing each touched parent once.
    pub fn insert_many(&mut self, leaves: &[Fr]) -> Result<()> {
        if leaves.is_empty() {
            return Ok(());
        }
        let first = self.next_index;
        let end = first + leaves.len();
        if end > self.capacity() {
            return Err(CryptoError::TreeFull(self.capacity()));
        }
        for (i, leaf) in leaves.iter().enumerate() {
            self.set_node(0, first + i, *leaf);
        }

        let (mut lo, mut hi) = (first, end - 1);
        for level in 0..self.depth {
            let (plo, phi) = (lo / self.arity, hi / self.arity);
            for parent in plo..=phi {
                let value = hash_node(&self.group(level, parent))?;
                self.set_node(level + 1, parent, value);
            }
            lo = plo;
            hi = phi;
        }
        self.next_index = end;
        Ok(())
    }

    /// Overwrite an existing leaf.
    pub fn update(&mut self, index: usize, leaf: Fr) -> Result<()> {
        if index >= self.next_index {
            return Err(CryptoError::IndexOutOfBounds {
                index,
                limit: self.next_index,
            });
        }
        self.set_node(0, index, leaf);
        self.refresh_path(index)
    }

    pub fn gen_merkle_path(&self, index: usize) -> Result<MerkleProof> {
        let leaf = self.get_node(index)?;
        Ok(self.path_from(0, index, leaf))
    }

    fn path_from(&self, from_level: usize, mut index: usize, leaf: Fr) -> MerkleProof {
        let mut path_elements = Vec::with_capacity(self.depth - from_level);
        let mut path_indices = Vec::with_capacity(self.depth - from_level);
        for level in from_level..self.depth {
            let position = index % self.arity;
            let parent = index / self.arity;
            let siblings = self
                .group(level, parent)
                .into_iter()
                .enumerate()
                .filter(|(i, _)| *i != position)
                .map(|(_, v)| v)
                .collect();
            path_elements.push(siblings);
            path_indices.push(position);
            index = parent;
        }
        MerkleProof {
            path_elements,
            path_indices,
            depth: self.depth - from_level,
            root: self.root(),
            leaf,
        }
    }

    /// Proof that the aligned range `[start, end)` hashes to a subroot of
    /// this tree. Positions past `next_index` count as zero leaves.
    pub fn gen_merkle_subroot_path(&self, start: usize, end: usize) -> Result<MerkleProof> {
        if end <= start {
            return Err(CryptoError::InvalidSubrootRange(format!("{start}..{end}")));
        }
        let size = end - start;
        let mut sub_depth = 0;
        let mut span = 1usize;
        while span < size {
            span = span.saturating_mul(self.arity);
            sub_depth += 1;
        }
        if span != size {
            return Err(CryptoError::InvalidSubrootRange(format!(
                "size {size} is not a power of {}",
                self.arity
            )));
        }
        if start % size != 0 {
            return Err(CryptoError::InvalidSubrootRange(format!(
                "start {start} is not a multiple of {size}"
            )));
        }
        if sub_depth > self.depth || end > self.capacity() {
            return Err(CryptoError::IndexOutOfBounds {
                index: end,
                limit: self.capacity(),
            });
        }
        let position = start / size;
        let subroot = self.node(sub_depth, position);
        Ok(self.path_from(sub_depth, position, subroot))
    }

    /// Recompute the root from a proof and compare.
    pub fn verify_merkle_path(proof: &MerkleProof) -> bool {
        if proof.path_elements.len() != proof.path_indices.len() {
            return false;
        }
        let mut current = proof.leaf;
        for (siblings, &position) in proof.path_elements.iter().zip(&proof.path_indices) {
            if position > siblings.len() {
                return false;
            }
            let mut level = siblings.clone();
            level.insert(position, current);
            current = match hash_node(&level) {
                Ok(h) => h,
                Err(_) => return false,
            };
        }
        current == proof.root
    }
}

/// Root of an arity-5 tree with zero leaf 0 over `leaves`.
pub fn vote_option_root(leaves: &[Fr], depth: usize) -> Result<Fr> {
    Ok(IncrementalMerkleTree::with_leaves(depth, Fr::zero(), 5, leaves)?.root())
}

/// `hash_left_right(root(leaves), salt)`
pub fn gen_tree_commitment(leaves: &[Fr], salt: Fr, depth: usize) -> Result<Fr> {
    Ok(hash_left_right(vote_option_root(leaves, depth)?, salt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poseidon::hash5;

    fn leaves(n: u64) -> Vec<Fr> {
        (1..=n).map(Fr::from).collect()
    }

    #[test]
    fn test_empty_root_is_zero_chain() {
        let tree = IncrementalMerkleTree::new(3, Fr::zero(), 5).unwrap();
        let z1 = hash5(&[Fr::zero(); 5]).unwrap();
        assert_eq!(tree.zeros()[1], z1);
        assert_eq!(tree.root(), tree.zeros()[3]);
        assert_eq!(tree.capacity(), 125);
    }

    #[test]
    fn test_small_root_by_hand() {
        let mut tree = IncrementalMerkleTree::new(1, Fr::zero(), 5).unwrap();
        tree.insert(Fr::from(1u64)).unwrap();
        tree.insert(Fr::from(2u64)).unwrap();
        let expected =
            hash5(&[Fr::from(1u64), Fr::from(2u64), Fr::zero(), Fr::zero(), Fr::zero()]).unwrap();
        assert_eq!(tree.root(), expected);

        let mut binary = IncrementalMerkleTree::new(1, Fr::zero(), 2).unwrap();
        binary.insert(Fr::from(1u64)).unwrap();
        binary.insert(Fr::from(2u64)).unwrap();
        assert_eq!(binary.root(), hash_left_right(Fr::from(1u64), Fr::from(2u64)));
    }

    #[test]
    fn test_insert_many_matches_insert() {
        let mut a = IncrementalMerkleTree::new(3, Fr::from(7u64), 5).unwrap();
        for l in leaves(31) {
            a.insert(l).unwrap();
        }
        let mut b = IncrementalMerkleTree::new(3, Fr::from(7u64), 5).unwrap();
        b.insert_many(&leaves(12)).unwrap();
        b.insert_many(&leaves(31)[12..]).unwrap();
        assert_eq!(a.root(), b.root());
        assert_eq!(a.next_index(), b.next_index());
    }

    #[test]
    fn test_capacity_enforced() {
        let mut tree = IncrementalMerkleTree::new(1, Fr::zero(), 2).unwrap();
        tree.insert(Fr::from(1u64)).unwrap();
        tree.insert(Fr::from(2u64)).unwrap();
        assert_eq!(tree.insert(Fr::from(3u64)), Err(CryptoError::TreeFull(2)));
    }

    #[test]
    fn test_update_and_paths() {
        let mut tree = IncrementalMerkleTree::new(3, Fr::zero(), 5).unwrap();
        tree.insert_many(&leaves(17)).unwrap();
        tree.update(6, Fr::from(99u64)).unwrap();
        assert!(tree.update(17, Fr::from(1u64)).is_err());

        for i in [0usize, 6, 16, 40] {
            let proof = tree.gen_merkle_path(i).unwrap();
            assert_eq!(proof.path_elements.len(), 3);
            assert!(proof.path_elements.iter().all(|s| s.len() == 4));
            assert!(IncrementalMerkleTree::verify_merkle_path(&proof));
        }
        let mut forged = tree.gen_merkle_path(6).unwrap();
        forged.leaf = Fr::from(100u64);
        assert!(!IncrementalMerkleTree::verify_merkle_path(&forged));
    }

    #[test]
    fn test_subroot_path() {
        let mut tree = IncrementalMerkleTree::new(3, Fr::from(3u64), 5).unwrap();
        tree.insert_many(&leaves(7)).unwrap();

        let proof = tree.gen_merkle_subroot_path(5, 10).unwrap();
        assert_eq!(proof.path_elements.len(), 2);
        let mut padded = leaves(7)[5..].to_vec();
        padded.extend([Fr::from(3u64); 3]);
        assert_eq!(proof.leaf, hash5(&padded).unwrap());
        assert!(IncrementalMerkleTree::verify_merkle_path(&proof));

        // past next_index is fine as long as it is aligned
        let tail = tree.gen_merkle_subroot_path(25, 50).unwrap();
        assert_eq!(tail.leaf, tree.zeros()[2]);
        assert!(IncrementalMerkleTree::verify_merkle_path(&tail));

        assert!(tree.gen_merkle_subroot_path(5, 9).is_err());
        assert!(tree.gen_merkle_subroot_path(3, 8).is_err());
        assert!(tree.gen_merkle_subroot_path(125, 130).is_err());
    }

    #[test]
    fn test_tree_commitment() {
        let values = vec![Fr::from(4u64), Fr::from(0u64), Fr::from(9u64)];
        let c1 = gen_tree_commitment(&values, Fr::from(5u64), 2).unwrap();
        let c2 = gen_tree_commitment(&values, Fr::from(5u64), 2).unwrap();
        assert_eq!(c1, c2);
        assert_ne!(c1, gen_tree_commitment(&values, Fr::from(6u64), 2).unwrap());
    }
}
