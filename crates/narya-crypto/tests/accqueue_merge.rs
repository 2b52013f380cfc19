//! accumulator queue roots against a plain merkle tree over the same leaves

use ark_ff::Zero;
use narya_crypto::accqueue::MAX_DEPTH;
use narya_crypto::{AccQueue, CryptoError, Fr, IncrementalMerkleTree, NOTHING_UP_MY_SLEEVE};
use proptest::prelude::*;

fn leaves(n: u64) -> Vec<Fr> {
    (0..n).map(|i| Fr::from(i * 7 + 3)).collect()
}

fn queue_with(sub_depth: usize, arity: usize, zero: Fr, leaves: &[Fr]) -> AccQueue {
    let mut q = AccQueue::new(sub_depth, arity, zero).unwrap();
    for l in leaves {
        q.enqueue(*l).unwrap();
    }
    q
}

#[test]
fn test_twenty_six_subtrees_quinary() {
    // one more subtree than fits in a single srt level
    let leaves = leaves(26 * 25);
    let mut q = queue_with(2, 5, NOTHING_UP_MY_SLEEVE, &leaves);
    assert_eq!(q.current_subtree_index(), 26);
    assert_eq!(q.calc_min_height(), 3);

    q.merge_sub_roots(0).unwrap();
    let root = q.merge(6).unwrap();

    let tree = IncrementalMerkleTree::with_leaves(6, NOTHING_UP_MY_SLEEVE, 5, &leaves).unwrap();
    assert_eq!(root, tree.root());

    let mut direct = queue_with(2, 5, NOTHING_UP_MY_SLEEVE, &leaves);
    assert_eq!(direct.merge_direct(6).unwrap(), root);
}

#[test]
fn test_partial_last_subtree_binary() {
    let leaves = leaves(11);
    let mut q = queue_with(2, 2, Fr::zero(), &leaves);
    q.merge_sub_roots(0).unwrap();
    let tree = IncrementalMerkleTree::with_leaves(5, Fr::zero(), 2, &leaves).unwrap();
    assert_eq!(q.merge(5).unwrap(), tree.root());
}

#[test]
fn test_merge_several_depths() {
    let leaves = leaves(30);
    let mut q = queue_with(1, 5, NOTHING_UP_MY_SLEEVE, &leaves);
    q.merge_sub_roots(3).unwrap();
    while !q.sub_trees_merged() {
        q.merge_sub_roots(3).unwrap();
    }
    for depth in q.srt_depth()..5 {
        let tree =
            IncrementalMerkleTree::with_leaves(depth, NOTHING_UP_MY_SLEEVE, 5, &leaves).unwrap();
        assert_eq!(q.merge(depth).unwrap(), tree.root());
        assert!(q.has_root(depth));
    }
}

#[test]
fn test_merge_below_srt_depth_fails() {
    let mut q = queue_with(1, 2, Fr::zero(), &leaves(9));
    q.merge_sub_roots(0).unwrap();
    assert_eq!(q.srt_depth(), 4);
    assert!(matches!(q.merge(3), Err(CryptoError::AccQueue(_))));
    assert!(q.merge(4).is_ok());
    assert!(q.merge(MAX_DEPTH).is_ok());
}

#[test]
fn test_insert_sub_tree_before_pending_leaves() {
    let mut q = AccQueue::new(2, 2, Fr::zero()).unwrap();
    let first = leaves(3);
    for l in &first {
        q.enqueue(*l).unwrap();
    }
    let inserted = Fr::from(999u64);
    q.insert_sub_tree(inserted);
    assert_eq!(q.num_leaves(), 7);

    let last = Fr::from(4242u64);
    q.enqueue(last).unwrap();
    assert_eq!(q.num_leaves(), 8);

    let mut completed = first.clone();
    completed.push(last);
    let tree = IncrementalMerkleTree::with_leaves(2, Fr::zero(), 2, &completed).unwrap();
    assert_eq!(q.get_sub_root(0).unwrap(), inserted);
    assert_eq!(q.get_sub_root(1).unwrap(), tree.root());
}

#[test]
fn test_merge_direct_fills_pending_subtree() {
    let leaves = leaves(4);
    let mut q = queue_with(1, 5, Fr::zero(), &leaves);
    let root = q.merge_direct(3).unwrap();
    assert_eq!(q.current_subtree_index(), 1);
    assert_eq!(q.get_root(3).unwrap(), root);
    let tree = IncrementalMerkleTree::with_leaves(3, Fr::zero(), 5, &leaves).unwrap();
    assert_eq!(root, tree.root());
}

fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8);
    ProptestConfig {
        cases,
        ..ProptestConfig::default()
    }
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn prop_merge_matches_merge_direct(
        n in 1u64..40,
        binary in any::<bool>(),
        extra in 0usize..3,
        batch in 0usize..4,
    ) {
        let (arity, sub_depth) = if binary { (2, 2) } else { (5, 1) };
        let leaves = leaves(n);
        let mut stepwise = queue_with(sub_depth, arity, NOTHING_UP_MY_SLEEVE, &leaves);
        let mut direct = stepwise.clone();

        while !stepwise.sub_trees_merged() {
            stepwise.merge_sub_roots(batch).unwrap();
        }
        let depth = stepwise.srt_depth() + extra;
        prop_assert_eq!(stepwise.merge(depth).unwrap(), direct.merge_direct(depth).unwrap());
    }
}
