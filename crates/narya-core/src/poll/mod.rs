//! per-poll state machine
//!
//! a poll accepts messages until its first batch is processed, then moves
//! through three independent batch loops:
//!
//! ```text
//! publish / topup ─▶ process_messages (reverse batches) ─┬─▶ tally_votes
//!                                                        └─▶ subsidy_per_batch
//! ```
//!
//! every batch returns the [`CircuitInputs`] the matching circuit proves
//! and advances the poll's counters. the signup registry is copied in once,
//! on the first processed batch, through a [`SignupSnapshot`].

mod json;
mod process;
mod subsidy;
mod tally;

use std::collections::BTreeMap;

use ark_ff::Zero;
use rand::{CryptoRng, RngCore};
use tracing::warn;

use narya_crypto::accqueue::AccQueue;
use narya_crypto::field::{fr_to_dec_string, Fr, NOTHING_UP_MY_SLEEVE};
use narya_crypto::poseidon::hash3;
use narya_crypto::tree::IncrementalMerkleTree;
use narya_domain::{
    Ballot, Command, Keypair, Message, MessageType, PCommand, PrivKey, PubKey, StateLeaf,
    TCommand, PAD_KEY,
};

use crate::config::{PollConfig, MESSAGE_TREE_ARITY, STATE_TREE_ARITY};
use crate::error::{PollError, Result};
use crate::lock::SignupSnapshot;

pub use json::PollJson;
pub use process::{AcceptedCommand, CommandOutcome, Rejection};
pub use subsidy::subsidy_coefficient;

#[derive(Clone, Debug, PartialEq)]
pub struct Poll {
    poll_id: u64,
    config: PollConfig,
    coordinator: Keypair,
    num_sign_ups: usize,

    messages: Vec<Message>,
    enc_pub_keys: Vec<PubKey>,
    commands: Vec<Command>,
    message_tree: IncrementalMerkleTree,
    message_aq: AccQueue,

    state_copied: bool,
    state_leaves: Vec<StateLeaf>,
    state_tree: IncrementalMerkleTree,
    ballots: Vec<Ballot>,
    ballot_tree: IncrementalMerkleTree,

    // message processing
    num_batches_processed: usize,
    current_message_batch_index: Option<usize>,
    sb_salts: BTreeMap<usize, Fr>,

    // tally, salts keyed by batch start index
    results: Vec<Fr>,
    per_vo_spent: Vec<Fr>,
    total_spent: Fr,
    num_batches_tallied: usize,
    result_root_salts: BTreeMap<usize, Fr>,
    per_vo_spent_salts: BTreeMap<usize, Fr>,
    spent_subtotal_salts: BTreeMap<usize, Fr>,

    // subsidy, salts keyed "row-col"
    subsidy: Vec<Fr>,
    subsidy_salts: BTreeMap<String, Fr>,
    rbi: usize,
    cbi: usize,
}

impl Poll {
    pub fn new(
        poll_id: u64,
        config: PollConfig,
        coordinator: Keypair,
        num_sign_ups: usize,
    ) -> Result<Self> {
        config.validate()?;
        let depths = config.tree_depths;
        let max_vote_options = config.max_values.max_vote_options;

        let message_tree = IncrementalMerkleTree::new(
            depths.message_tree_depth,
            NOTHING_UP_MY_SLEEVE,
            MESSAGE_TREE_ARITY,
        )?;
        let message_aq = AccQueue::new(
            depths.message_tree_sub_depth,
            MESSAGE_TREE_ARITY,
            NOTHING_UP_MY_SLEEVE,
        )?;

        let blank_ballot = Ballot::gen_blank_ballot(max_vote_options, depths.vote_option_tree_depth)?;
        let state_tree = IncrementalMerkleTree::new(
            config.state_tree_depth,
            StateLeaf::blank().hash(),
            STATE_TREE_ARITY,
        )?;
        let ballot_tree = IncrementalMerkleTree::new(
            config.state_tree_depth,
            blank_ballot.hash()?,
            STATE_TREE_ARITY,
        )?;

        Ok(Self {
            poll_id,
            config,
            coordinator,
            num_sign_ups,
            messages: Vec::new(),
            enc_pub_keys: Vec::new(),
            commands: Vec::new(),
            message_tree,
            message_aq,
            state_copied: false,
            state_leaves: vec![StateLeaf::blank()],
            state_tree,
            ballots: vec![blank_ballot],
            ballot_tree,
            num_batches_processed: 0,
            current_message_batch_index: None,
            sb_salts: BTreeMap::new(),
            results: vec![Fr::zero(); max_vote_options],
            per_vo_spent: vec![Fr::zero(); max_vote_options],
            total_spent: Fr::zero(),
            num_batches_tallied: 0,
            result_root_salts: BTreeMap::new(),
            per_vo_spent_salts: BTreeMap::new(),
            spent_subtotal_salts: BTreeMap::new(),
            subsidy: vec![Fr::zero(); max_vote_options],
            subsidy_salts: BTreeMap::new(),
            rbi: 0,
            cbi: 0,
        })
    }

    fn processing_started(&self) -> bool {
        self.num_batches_processed > 0 || self.current_message_batch_index.is_some()
    }

    fn check_accepting(&self) -> Result<()> {
        if self.processing_started() {
            return Err(PollError::ProcessingStarted);
        }
        let max = self.config.max_values.max_messages;
        if self.messages.len() >= max {
            return Err(PollError::TooManyMessages { max });
        }
        Ok(())
    }

    /// append the message leaf to both message structures
    fn insert_message_leaf(&mut self, message: &Message, enc_pub_key: &PubKey) -> Result<()> {
        let leaf = message.hash(enc_pub_key)?;
        self.message_tree.insert(leaf)?;
        self.message_aq.enqueue(leaf)?;
        Ok(())
    }

    /// Publish an encrypted vote or key-change message.
    ///
    /// The command is decrypted eagerly for bookkeeping only. A message the
    /// coordinator cannot decrypt is still accepted and fails later, during
    /// processing.
    pub fn publish_message(&mut self, message: Message, enc_pub_key: PubKey) -> Result<usize> {
        if message.message_type() != Some(MessageType::Vote) {
            return Err(PollError::InvalidMessageType {
                expected: "1",
                got: fr_to_dec_string(message.msg_type()),
            });
        }
        self.check_accepting()?;
        self.insert_message_leaf(&message, &enc_pub_key)?;

        let shared_key = Keypair::gen_ecdh_shared_key(&self.coordinator.priv_key, &enc_pub_key);
        let command = match PCommand::decrypt(&message, &shared_key) {
            Ok((command, _)) => command,
            Err(e) => {
                warn!(
                    "poll {}: message {} does not decrypt: {}",
                    self.poll_id,
                    self.messages.len(),
                    e
                );
                PCommand::placeholder()
            }
        };

        self.messages.push(message);
        self.enc_pub_keys.push(enc_pub_key);
        self.commands.push(Command::Vote(command));
        Ok(self.messages.len() - 1)
    }

    /// Publish a plaintext top-up message. It takes a message tree slot
    /// like any other, with the pad key standing in for an encryption key.
    pub fn topup_message(&mut self, message: Message) -> Result<usize> {
        if message.message_type() != Some(MessageType::Topup) {
            return Err(PollError::InvalidMessageType {
                expected: "2",
                got: fr_to_dec_string(message.msg_type()),
            });
        }
        self.check_accepting()?;
        let pad_key = PubKey::new(PAD_KEY);
        self.insert_message_leaf(&message, &pad_key)?;

        let command = TCommand::from_message(&message, self.poll_id);
        self.messages.push(message);
        self.enc_pub_keys.push(pad_key);
        self.commands.push(Command::Topup(command));
        Ok(self.messages.len() - 1)
    }

    /// An empty poll still needs one batch to commit its state.
    pub fn has_unprocessed_messages(&self) -> bool {
        let batch_size = self.config.batch_sizes.message_batch_size;
        let len = self.messages.len();
        let total_batches = if len <= batch_size {
            1
        } else {
            len.div_ceil(batch_size)
        };
        self.num_batches_processed < total_batches
    }

    pub fn has_untallied_ballots(&self) -> bool {
        self.num_batches_tallied * self.config.batch_sizes.tally_batch_size < self.ballots.len()
    }

    pub fn has_unfinished_subsidy_calculation(&self) -> bool {
        let batch_size = self.config.batch_sizes.subsidy_batch_size;
        self.rbi * batch_size < self.ballots.len() && self.cbi * batch_size < self.ballots.len()
    }

    /// true once the snapshot is taken and every message batch is done
    pub fn processing_complete(&self) -> bool {
        self.state_copied && !self.has_unprocessed_messages()
    }

    /// Copy the signup registry in and give every leaf an empty ballot.
    pub fn copy_state_from(&mut self, ctx: &SignupSnapshot<'_>) -> Result<()> {
        if ctx.state_leaves.len() != ctx.state_tree.next_index() {
            return Err(PollError::InvalidSnapshot(format!(
                "{} leaves but the state tree holds {}",
                ctx.state_leaves.len(),
                ctx.state_tree.next_index()
            )));
        }
        self.state_leaves = ctx.state_leaves.to_vec();
        self.state_tree = ctx.state_tree.clone();

        let empty = Ballot::new(
            self.config.max_values.max_vote_options,
            self.config.tree_depths.vote_option_tree_depth,
        )?;
        let empty_hash = empty.hash()?;
        self.ballot_tree = IncrementalMerkleTree::with_leaves(
            self.config.state_tree_depth,
            empty_hash,
            STATE_TREE_ARITY,
            &vec![empty_hash; self.state_leaves.len()],
        )?;
        self.ballots = vec![empty; self.state_leaves.len()];
        self.num_sign_ups = ctx.num_sign_ups;
        self.state_copied = true;
        Ok(())
    }

    /// Run every remaining message batch and return the resulting leaves
    /// and ballots.
    pub fn process_all_messages<R: RngCore + CryptoRng>(
        &mut self,
        ctx: &mut SignupSnapshot<'_>,
        rng: &mut R,
    ) -> Result<(Vec<StateLeaf>, Vec<Ballot>)> {
        if !self.state_copied {
            self.copy_state_from(ctx)?;
        }
        while self.has_unprocessed_messages() {
            self.process_messages(ctx, rng)?;
        }
        Ok((self.state_leaves.clone(), self.ballots.clone()))
    }

    /// Merge the message queue the way the contract does before proving.
    pub fn merge_message_aq(&mut self, depth: usize) -> Result<Fr> {
        self.message_aq.merge_sub_roots(0)?;
        Ok(self.message_aq.merge(depth)?)
    }

    pub fn set_coordinator_keypair(&mut self, serialized_priv_key: &str) -> Result<()> {
        self.coordinator = Keypair::new(PrivKey::deserialize(serialized_priv_key)?);
        Ok(())
    }

    /// salt of the current state/ballot commitment
    pub fn current_sb_salt(&self) -> Result<Fr> {
        let index = self
            .current_message_batch_index
            .ok_or(PollError::ProcessingIncomplete)?;
        self.sb_salts
            .get(&index)
            .copied()
            .ok_or_else(|| PollError::MissingSalt(format!("state/ballot commitment at {index}")))
    }

    /// `hash3(stateRoot, ballotRoot, sbSalt)`
    pub fn sb_commitment(&self) -> Result<Fr> {
        Ok(hash3([
            self.state_tree.root(),
            self.ballot_tree.root(),
            self.current_sb_salt()?,
        ]))
    }

    pub fn poll_id(&self) -> u64 {
        self.poll_id
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn coordinator_pub_key(&self) -> &PubKey {
        &self.coordinator.pub_key
    }

    pub fn num_sign_ups(&self) -> usize {
        self.num_sign_ups
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn enc_pub_keys(&self) -> &[PubKey] {
        &self.enc_pub_keys
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn message_tree(&self) -> &IncrementalMerkleTree {
        &self.message_tree
    }

    pub fn message_aq(&self) -> &AccQueue {
        &self.message_aq
    }

    pub fn state_copied(&self) -> bool {
        self.state_copied
    }

    pub fn state_leaves(&self) -> &[StateLeaf] {
        &self.state_leaves
    }

    pub fn state_tree(&self) -> &IncrementalMerkleTree {
        &self.state_tree
    }

    pub fn ballots(&self) -> &[Ballot] {
        &self.ballots
    }

    pub fn ballot_tree(&self) -> &IncrementalMerkleTree {
        &self.ballot_tree
    }

    pub fn num_batches_processed(&self) -> usize {
        self.num_batches_processed
    }

    pub fn current_message_batch_index(&self) -> Option<usize> {
        self.current_message_batch_index
    }

    pub fn num_batches_tallied(&self) -> usize {
        self.num_batches_tallied
    }

    /// tally per vote option
    pub fn results(&self) -> &[Fr] {
        &self.results
    }

    pub fn per_vo_spent_voice_credits(&self) -> &[Fr] {
        &self.per_vo_spent
    }

    pub fn total_spent_voice_credits(&self) -> Fr {
        self.total_spent
    }

    pub fn subsidy(&self) -> &[Fr] {
        &self.subsidy
    }

    /// (row, column) of the next subsidy batch
    pub fn subsidy_batch_indices(&self) -> (usize, usize) {
        (self.rbi, self.cbi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MaxValues, TreeDepths};
    use crate::lock::ProcessingLock;
    use narya_crypto::field::gen_random_salt;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn config(max_messages: usize) -> PollConfig {
        PollConfig::new(
            60,
            1_700_000_000,
            MaxValues {
                max_messages,
                max_vote_options: 25,
            },
            TreeDepths {
                int_state_tree_depth: 1,
                message_tree_depth: 2,
                message_tree_sub_depth: 1,
                vote_option_tree_depth: 2,
            },
            5,
            10,
        )
    }

    fn poll(rng: &mut ChaCha20Rng, max_messages: usize) -> Poll {
        Poll::new(0, config(max_messages), Keypair::random(rng), 0).unwrap()
    }

    fn vote(rng: &mut ChaCha20Rng, poll: &Poll) -> (Message, PubKey) {
        let user = Keypair::random(rng);
        let ephemeral = Keypair::random(rng);
        let command = PCommand::with_random_salt(rng, 1, user.pub_key, 0, 1, 1, 0).unwrap();
        let sig = command.sign(&user.priv_key);
        let shared = Keypair::gen_ecdh_shared_key(&ephemeral.priv_key, poll.coordinator_pub_key());
        (command.encrypt(&sig, &shared).unwrap(), ephemeral.pub_key)
    }

    #[test]
    fn test_publish_keeps_tree_and_queue_in_step() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let mut p = poll(&mut rng, 25);
        for i in 0..7 {
            let (m, k) = vote(&mut rng, &p);
            assert_eq!(p.publish_message(m, k).unwrap(), i);
        }
        assert_eq!(p.message_tree().next_index(), 7);
        assert_eq!(p.message_aq().num_leaves(), 7);
        assert!(matches!(p.commands()[0], Command::Vote(_)));

        let root = p.merge_message_aq(2).unwrap();
        assert_eq!(root, p.message_tree().root());
    }

    #[test]
    fn test_undecryptable_message_gets_placeholder() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let mut p = poll(&mut rng, 25);
        let garbage: [Fr; 10] = core::array::from_fn(|_| gen_random_salt(&mut rng));
        let k = Keypair::random(&mut rng).pub_key;
        p.publish_message(Message::new(MessageType::Vote.as_fr(), garbage), k)
            .unwrap();
        assert_eq!(p.commands()[0], Command::Vote(PCommand::placeholder()));
    }

    #[test]
    fn test_message_type_checked() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let mut p = poll(&mut rng, 25);
        let topup = TCommand::new(Fr::from(1u64), Fr::from(5u64), Fr::zero()).to_message();
        assert!(matches!(
            p.publish_message(topup.clone(), PubKey::new(PAD_KEY)),
            Err(PollError::InvalidMessageType { expected: "1", .. })
        ));
        assert_eq!(p.topup_message(topup).unwrap(), 0);
        assert_eq!(p.enc_pub_keys()[0], PubKey::new(PAD_KEY));
        assert!(matches!(
            p.topup_message(Message::blank()),
            Err(PollError::InvalidMessageType { expected: "2", .. })
        ));
    }

    #[test]
    fn test_message_limit() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let mut p = poll(&mut rng, 2);
        for _ in 0..2 {
            let (m, k) = vote(&mut rng, &p);
            p.publish_message(m, k).unwrap();
        }
        let (m, k) = vote(&mut rng, &p);
        assert!(matches!(
            p.publish_message(m, k),
            Err(PollError::TooManyMessages { max: 2 })
        ));
    }

    #[test]
    fn test_unprocessed_batch_count() {
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let mut p = poll(&mut rng, 25);
        assert!(p.has_unprocessed_messages());
        for _ in 0..6 {
            let (m, k) = vote(&mut rng, &p);
            p.publish_message(m, k).unwrap();
        }
        p.num_batches_processed = 1;
        assert!(p.has_unprocessed_messages());
        p.num_batches_processed = 2;
        assert!(!p.has_unprocessed_messages());
    }

    #[test]
    fn test_copy_state_gives_empty_ballots() {
        let mut rng = ChaCha20Rng::seed_from_u64(6);
        let mut p = poll(&mut rng, 25);

        let leaves = vec![StateLeaf::blank(), StateLeaf::random(&mut rng)];
        let hashes: Vec<Fr> = leaves.iter().map(StateLeaf::hash).collect();
        let tree =
            IncrementalMerkleTree::with_leaves(10, StateLeaf::blank().hash(), 5, &hashes).unwrap();
        let mut lock = ProcessingLock::new();

        let ctx = SignupSnapshot::new(&leaves, &tree, 1, &mut lock);
        p.copy_state_from(&ctx).unwrap();
        assert!(p.state_copied());
        assert_eq!(p.ballots().len(), 2);
        assert_eq!(p.ballot_tree().next_index(), 2);
        assert_eq!(p.state_tree().root(), tree.root());
        assert_eq!(p.num_sign_ups(), 1);

        let short = &leaves[..1];
        let ctx = SignupSnapshot::new(short, &tree, 1, &mut lock);
        assert!(matches!(
            p.copy_state_from(&ctx),
            Err(PollError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_set_coordinator_keypair() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let mut p = poll(&mut rng, 25);
        let next = Keypair::random(&mut rng);
        p.set_coordinator_keypair(&next.priv_key.serialize()).unwrap();
        assert_eq!(p.coordinator_pub_key(), &next.pub_key);
        assert!(p.set_coordinator_keypair("macisk.zz").is_err());
    }
}
