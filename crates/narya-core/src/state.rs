//! signup registry and poll factory
//!
//! signups are append-only. every leaf goes into the direct state tree the
//! polls snapshot and into the accumulator queue the contract merges; the
//! two always agree on the root.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::info;

use narya_crypto::accqueue::AccQueue;
use narya_crypto::field::Fr;
use narya_crypto::tree::IncrementalMerkleTree;
use narya_domain::{Ballot, Keypair, PubKey, StateLeaf};

use crate::circuit_inputs::CircuitInputs;
use crate::config::{MaxValues, PollConfig, TreeDepths, STATE_TREE_ARITY, STATE_TREE_SUBDEPTH};
use crate::error::{PollError, Result};
use crate::lock::{ProcessingLock, SignupSnapshot};
use crate::poll::{Poll, PollJson};

#[derive(Clone, Debug, PartialEq)]
pub struct GlobalState {
    state_tree_depth: usize,
    num_sign_ups: usize,
    state_leaves: Vec<StateLeaf>,
    state_tree: IncrementalMerkleTree,
    state_aq: AccQueue,
    /// `None` marks a null poll, which only takes up an id
    polls: Vec<Option<Poll>>,
    lock: ProcessingLock,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStateJson {
    pub state_tree_depth: usize,
    pub polls: Vec<Option<PollJson>>,
    pub state_leaves: Vec<StateLeaf>,
    pub poll_being_processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_poll_being_processed: Option<u64>,
    pub num_sign_ups: usize,
}

impl GlobalState {
    /// Registry holding only the blank leaf at index 0.
    pub fn new(state_tree_depth: usize) -> Result<Self> {
        let blank = StateLeaf::blank();
        let zero = blank.hash();
        let mut state_tree = IncrementalMerkleTree::new(state_tree_depth, zero, STATE_TREE_ARITY)?;
        let mut state_aq = AccQueue::new(STATE_TREE_SUBDEPTH, STATE_TREE_ARITY, zero)?;
        state_tree.insert(zero)?;
        state_aq.enqueue(zero)?;
        Ok(Self {
            state_tree_depth,
            num_sign_ups: 0,
            state_leaves: vec![blank],
            state_tree,
            state_aq,
            polls: Vec::new(),
            lock: ProcessingLock::new(),
        })
    }

    /// Register a voter and return its state index, starting at 1.
    pub fn sign_up(&mut self, pub_key: PubKey, voice_credit_balance: Fr, timestamp: Fr) -> Result<usize> {
        let leaf = StateLeaf::new(pub_key, voice_credit_balance, timestamp);
        let hash = leaf.hash();
        let index = self.state_tree.insert(hash)?;
        self.state_aq.enqueue(hash)?;
        self.state_leaves.push(leaf);
        self.num_sign_ups += 1;
        info!("signup {}: {} voice credits", index, voice_credit_balance);
        Ok(index)
    }

    /// Deploy a poll bound to the current signups and return its id.
    pub fn deploy_poll(
        &mut self,
        duration: u64,
        poll_end_timestamp: u64,
        max_values: MaxValues,
        tree_depths: TreeDepths,
        message_batch_size: usize,
        coordinator: Keypair,
    ) -> Result<u64> {
        let poll_id = self.polls.len() as u64;
        let config = PollConfig::new(
            duration,
            poll_end_timestamp,
            max_values,
            tree_depths,
            message_batch_size,
            self.state_tree_depth,
        );
        let poll = Poll::new(poll_id, config, coordinator, self.num_sign_ups)?;
        self.polls.push(Some(poll));
        info!(
            "deployed poll {} ({} signups, ends at {})",
            poll_id, self.num_sign_ups, poll_end_timestamp
        );
        Ok(poll_id)
    }

    /// Reserve the next poll id without a poll behind it.
    pub fn deploy_null_poll(&mut self) -> u64 {
        self.polls.push(None);
        self.polls.len() as u64 - 1
    }

    pub fn poll(&self, poll_id: u64) -> Result<&Poll> {
        usize::try_from(poll_id)
            .ok()
            .and_then(|i| self.polls.get(i))
            .and_then(Option::as_ref)
            .ok_or(PollError::UnknownPoll(poll_id))
    }

    pub fn poll_mut(&mut self, poll_id: u64) -> Result<&mut Poll> {
        usize::try_from(poll_id)
            .ok()
            .and_then(|i| self.polls.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(PollError::UnknownPoll(poll_id))
    }

    /// The poll together with a view of the signups and the lock.
    pub fn poll_with_context(&mut self, poll_id: u64) -> Result<(&mut Poll, SignupSnapshot<'_>)> {
        let Self {
            num_sign_ups,
            state_leaves,
            state_tree,
            polls,
            lock,
            ..
        } = self;
        let poll = usize::try_from(poll_id)
            .ok()
            .and_then(|i| polls.get_mut(i))
            .and_then(Option::as_mut)
            .ok_or(PollError::UnknownPoll(poll_id))?;
        let ctx = SignupSnapshot::new(state_leaves, state_tree, *num_sign_ups, lock);
        Ok((poll, ctx))
    }

    pub fn process_messages<R: RngCore + CryptoRng>(
        &mut self,
        poll_id: u64,
        rng: &mut R,
    ) -> Result<CircuitInputs> {
        let (poll, mut ctx) = self.poll_with_context(poll_id)?;
        poll.process_messages(&mut ctx, rng)
    }

    pub fn process_all_messages<R: RngCore + CryptoRng>(
        &mut self,
        poll_id: u64,
        rng: &mut R,
    ) -> Result<(Vec<StateLeaf>, Vec<Ballot>)> {
        let (poll, mut ctx) = self.poll_with_context(poll_id)?;
        poll.process_all_messages(&mut ctx, rng)
    }

    /// Merge the signup queue the way the contract does at poll end.
    pub fn merge_state_aq(&mut self, depth: usize) -> Result<Fr> {
        self.state_aq.merge_sub_roots(0)?;
        Ok(self.state_aq.merge(depth)?)
    }

    pub fn state_tree_depth(&self) -> usize {
        self.state_tree_depth
    }

    pub fn num_sign_ups(&self) -> usize {
        self.num_sign_ups
    }

    pub fn state_leaves(&self) -> &[StateLeaf] {
        &self.state_leaves
    }

    pub fn state_tree(&self) -> &IncrementalMerkleTree {
        &self.state_tree
    }

    pub fn state_aq(&self) -> &AccQueue {
        &self.state_aq
    }

    /// deployed polls, null polls included
    pub fn num_polls(&self) -> usize {
        self.polls.len()
    }

    pub fn lock(&self) -> &ProcessingLock {
        &self.lock
    }

    /// poll currently holding the processing lock
    pub fn poll_being_processed(&self) -> Option<u64> {
        self.lock.holder()
    }

    pub fn to_json(&self) -> GlobalStateJson {
        GlobalStateJson {
            state_tree_depth: self.state_tree_depth,
            polls: self
                .polls
                .iter()
                .map(|p| p.as_ref().map(Poll::to_json))
                .collect(),
            state_leaves: self.state_leaves.clone(),
            poll_being_processed: self.lock.is_held(),
            current_poll_being_processed: self.lock.holder(),
            num_sign_ups: self.num_sign_ups,
        }
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_json())?)
    }

    /// Rebuild the registry and every poll. All polls share one
    /// coordinator.
    pub fn from_json(json: GlobalStateJson, coordinator: &Keypair) -> Result<Self> {
        let mut leaves = json.state_leaves.into_iter();
        if leaves.next() != Some(StateLeaf::blank()) {
            return Err(PollError::InvalidExport(
                "state leaf 0 is not the blank leaf".into(),
            ));
        }
        let mut state = Self::new(json.state_tree_depth)?;
        for leaf in leaves {
            let hash = leaf.hash();
            state.state_tree.insert(hash)?;
            state.state_aq.enqueue(hash)?;
            state.state_leaves.push(leaf);
        }
        state.num_sign_ups = state.state_leaves.len() - 1;
        if json.num_sign_ups != state.num_sign_ups {
            return Err(PollError::InvalidExport(format!(
                "{} signups for {} state leaves",
                json.num_sign_ups,
                state.state_leaves.len()
            )));
        }

        for (i, poll) in json.polls.into_iter().enumerate() {
            let poll = match poll {
                Some(p) => {
                    if p.poll_id != i as u64 {
                        return Err(PollError::InvalidExport(format!(
                            "poll {} exported at position {}",
                            p.poll_id, i
                        )));
                    }
                    Some(Poll::from_json(p, coordinator.clone())?)
                }
                None => None,
            };
            state.polls.push(poll);
        }

        match (json.poll_being_processed, json.current_poll_being_processed) {
            (true, Some(poll_id)) => {
                state.poll(poll_id)?;
                state.lock.acquire(poll_id)?;
            }
            (false, _) => {}
            (true, None) => {
                return Err(PollError::InvalidExport(
                    "processing flag set without a poll id".into(),
                ))
            }
        }
        Ok(state)
    }

    pub fn from_json_str(s: &str, coordinator: &Keypair) -> Result<Self> {
        Self::from_json(serde_json::from_str(s)?, coordinator)
    }
}
