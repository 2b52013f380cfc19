//! message batch processing
//!
//! batches are consumed from the last one published back to the first, and
//! slots inside a batch from the highest index down. the order is part of
//! what the process circuit proves, so it is fixed.

use ark_ff::{One, Zero};
use num_bigint::{BigInt, Sign};
use rand::{CryptoRng, RngCore};
use tracing::{debug, trace};

use narya_crypto::field::{fr_to_biguint, fr_to_dec_string, fr_to_u64, gen_random_salt, Fr};
use narya_crypto::poseidon::{hash3, sha256_hash};
use narya_crypto::tree::IncrementalMerkleTree;
use narya_domain::ballot::VOTE_OPTION_TREE_ARITY;
use narya_domain::{Ballot, Keypair, Message, MessageType, PCommand, PubKey, StateLeaf, PAD_KEY};

use super::Poll;
use crate::circuit_inputs::CircuitInputs;
use crate::error::{PollError, Result};
use crate::lock::SignupSnapshot;
use crate::packing::pack_process_message_small_vals;

/// Why a vote command was turned into a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rejection {
    /// not encrypted to the coordinator, or tampered with
    DecryptionFailed,
    /// state index 0 or past the last ballot
    InvalidStateIndex,
    /// state index not yet in the snapshot's state tree
    StateLeafNotSignedUp,
    InvalidSignature,
    /// nonce is not the ballot nonce plus one
    InvalidNonce,
    InsufficientVoiceCredits,
    InvalidVoteOption,
    /// batch slot past the last published message
    EmptySlot,
}

/// A command that passed every check, with the pre-update witness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptedCommand {
    pub state_index: usize,
    pub command: PCommand,
    pub original_state_leaf: StateLeaf,
    pub original_state_leaf_path: Vec<Vec<Fr>>,
    pub new_state_leaf: StateLeaf,
    pub original_ballot: Ballot,
    pub original_ballot_path: Vec<Vec<Fr>>,
    pub new_ballot: Ballot,
    pub original_vote_weight: Fr,
    pub original_vote_weights_path: Vec<Vec<Fr>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Accepted(Box<AcceptedCommand>),
    Rejected(Rejection),
}

/// pre-update values of one batch slot, accepted or not
#[derive(Clone)]
struct SlotWitness {
    state_leaf: StateLeaf,
    state_leaf_path: Vec<Vec<Fr>>,
    ballot: Ballot,
    ballot_path: Vec<Vec<Fr>>,
    vote_weight: Fr,
    vote_weights_path: Vec<Vec<Fr>>,
}

/// path to `index` in the ballot's vote option tree
fn vote_weights_path(ballot: &Ballot, index: usize) -> Result<Vec<Vec<Fr>>> {
    let tree = IncrementalMerkleTree::with_leaves(
        ballot.vote_option_tree_depth,
        Fr::zero(),
        VOTE_OPTION_TREE_ARITY,
        &ballot.votes,
    )?;
    Ok(tree.gen_merkle_path(index)?.path_elements)
}

/// `slots` values starting at `start`, repeating the last when short
fn padded_slice<T: Clone>(items: &[T], start: usize, slots: usize, fallback: T) -> Vec<T> {
    (start..start + slots)
        .map(|i| {
            items
                .get(i)
                .or_else(|| items.last())
                .cloned()
                .unwrap_or_else(|| fallback.clone())
        })
        .collect()
}

impl Poll {
    /// Decrypt and validate the vote command at `index` against the
    /// current state. Nothing is mutated.
    pub fn process_message(&self, index: usize) -> Result<CommandOutcome> {
        let Some(message) = self.messages.get(index) else {
            return Ok(CommandOutcome::Rejected(Rejection::EmptySlot));
        };
        if message.message_type() != Some(MessageType::Vote) {
            return Err(PollError::InvalidMessageType {
                expected: "1",
                got: fr_to_dec_string(message.msg_type()),
            });
        }
        let enc_pub_key = &self.enc_pub_keys[index];
        let shared_key = Keypair::gen_ecdh_shared_key(&self.coordinator.priv_key, enc_pub_key);
        let (command, signature) = match PCommand::decrypt(message, &shared_key) {
            Ok(decrypted) => decrypted,
            Err(_) => return Ok(CommandOutcome::Rejected(Rejection::DecryptionFailed)),
        };
        let reject = |r| Ok(CommandOutcome::Rejected(r));

        let state_index = usize::try_from(command.state_index).unwrap_or(usize::MAX);
        if state_index < 1 || state_index >= self.ballots.len() {
            return reject(Rejection::InvalidStateIndex);
        }
        if state_index >= self.state_tree.next_index() {
            return reject(Rejection::StateLeafNotSignedUp);
        }

        let state_leaf = &self.state_leaves[state_index];
        let ballot = &self.ballots[state_index];

        if !command.verify_signature(&signature, &state_leaf.pub_key) {
            return reject(Rejection::InvalidSignature);
        }
        if Fr::from(command.nonce) != ballot.nonce + Fr::one() {
            return reject(Rejection::InvalidNonce);
        }

        let vote_option = usize::try_from(command.vote_option_index).unwrap_or(usize::MAX);
        if vote_option >= self.config.max_values.max_vote_options || vote_option >= ballot.votes.len()
        {
            return reject(Rejection::InvalidVoteOption);
        }

        // balance + prev^2 - new^2, over the integers
        let prev = BigInt::from(fr_to_biguint(&ballot.votes[vote_option]));
        let weight = BigInt::from(command.new_vote_weight);
        let left = BigInt::from(fr_to_biguint(&state_leaf.voice_credit_balance)) + &prev * &prev
            - &weight * &weight;
        let (sign, credits_left) = left.into_parts();
        if sign == Sign::Minus {
            return reject(Rejection::InsufficientVoiceCredits);
        }

        let new_state_leaf = StateLeaf::new(
            command.new_pub_key,
            Fr::from(credits_left),
            state_leaf.timestamp,
        );
        let mut new_ballot = ballot.clone();
        new_ballot.nonce += Fr::one();
        new_ballot.votes[vote_option] = Fr::from(command.new_vote_weight);

        Ok(CommandOutcome::Accepted(Box::new(AcceptedCommand {
            state_index,
            original_state_leaf: state_leaf.clone(),
            original_state_leaf_path: self.state_tree.gen_merkle_path(state_index)?.path_elements,
            new_state_leaf,
            original_ballot: ballot.clone(),
            original_ballot_path: self.ballot_tree.gen_merkle_path(state_index)?.path_elements,
            new_ballot,
            original_vote_weight: ballot.votes[vote_option],
            original_vote_weights_path: vote_weights_path(ballot, vote_option)?,
            command,
        })))
    }

    /// witness for a no-op: blank leaf and ballot at index 0
    fn blank_slot_witness(&self) -> Result<SlotWitness> {
        let ballot = self.ballots[0].clone();
        Ok(SlotWitness {
            state_leaf: self.state_leaves[0].clone(),
            state_leaf_path: self.state_tree.gen_merkle_path(0)?.path_elements,
            ballot_path: self.ballot_tree.gen_merkle_path(0)?.path_elements,
            vote_weight: ballot.votes.first().copied().unwrap_or_default(),
            vote_weights_path: vote_weights_path(&ballot, 0)?,
            ballot,
        })
    }

    fn apply_accepted(&mut self, accepted: AcceptedCommand) -> Result<SlotWitness> {
        let index = accepted.state_index;
        self.state_tree.update(index, accepted.new_state_leaf.hash())?;
        self.state_leaves[index] = accepted.new_state_leaf;
        self.ballot_tree.update(index, accepted.new_ballot.hash()?)?;
        self.ballots[index] = accepted.new_ballot;

        Ok(SlotWitness {
            state_leaf: accepted.original_state_leaf,
            state_leaf_path: accepted.original_state_leaf_path,
            ballot: accepted.original_ballot,
            ballot_path: accepted.original_ballot_path,
            vote_weight: accepted.original_vote_weight,
            vote_weights_path: accepted.original_vote_weights_path,
        })
    }

    /// Credit a top-up. Unknown indices credit nothing to the blank leaf.
    fn apply_topup(&mut self, message: &Message) -> Result<SlotWitness> {
        let data = message.data();
        let (index, amount) = match fr_to_u64(&data[0]).and_then(|i| usize::try_from(i).ok()) {
            Some(i) if i < self.ballots.len() => (i, data[1]),
            _ => (0, Fr::zero()),
        };

        let state_leaf = self.state_leaves[index].clone();
        let state_leaf_path = self.state_tree.gen_merkle_path(index)?.path_elements;

        let mut credited = state_leaf.clone();
        credited.voice_credit_balance += amount;
        self.state_tree.update(index, credited.hash())?;
        self.state_leaves[index] = credited;

        let ballot = self.ballots[index].clone();
        Ok(SlotWitness {
            state_leaf,
            state_leaf_path,
            ballot_path: self.ballot_tree.gen_merkle_path(index)?.path_elements,
            vote_weight: ballot.votes.first().copied().unwrap_or_default(),
            vote_weights_path: vote_weights_path(&ballot, 0)?,
            ballot,
        })
    }

    /// `blank` caches the no-op witness for the batch. a top-up may credit
    /// the blank leaf, so it clears the cache.
    fn process_slot(&mut self, index: usize, blank: &mut Option<SlotWitness>) -> Result<SlotWitness> {
        let message_type = match self.messages.get(index) {
            Some(message) => message.message_type(),
            None => Some(MessageType::Vote),
        };
        match message_type {
            Some(MessageType::Vote) => match self.process_message(index)? {
                CommandOutcome::Accepted(accepted) => self.apply_accepted(*accepted),
                CommandOutcome::Rejected(reason) => {
                    trace!("poll {}: message {} rejected: {:?}", self.poll_id, index, reason);
                    if let Some(witness) = blank {
                        return Ok(witness.clone());
                    }
                    let witness = self.blank_slot_witness()?;
                    *blank = Some(witness.clone());
                    Ok(witness)
                }
            },
            Some(MessageType::Topup) => {
                let message = self.messages[index].clone();
                *blank = None;
                self.apply_topup(&message)
            }
            None => Err(PollError::InvalidMessageType {
                expected: "1 or 2",
                got: fr_to_dec_string(self.messages[index].msg_type()),
            }),
        }
    }

    fn process_packed_vals(&self, batch_start: usize, batch_end: usize) -> Fr {
        pack_process_message_small_vals(
            self.config.max_values.max_vote_options as u64,
            self.num_sign_ups as u64,
            batch_start as u64,
            batch_end as u64,
        )
    }

    /// the inputs that only depend on state before the batch runs
    fn gen_process_messages_circuit_inputs_partial(&self, index: usize) -> Result<CircuitInputs> {
        let batch_size = self.config.batch_sizes.message_batch_size;
        let batch_end = (index + batch_size).min(self.messages.len());

        let msgs = padded_slice(&self.messages, index, batch_size, Message::blank());
        let enc_pub_keys = padded_slice(&self.enc_pub_keys, index, batch_size, PubKey::new(PAD_KEY));

        // slots past the last message read as zero leaves
        let subroot_path = self
            .message_tree
            .gen_merkle_subroot_path(index, index + batch_size)?;

        let current_sb_salt = self.current_sb_salt()?;

        let mut inputs = CircuitInputs::new();
        inputs.scalar("pollEndTimestamp", Fr::from(self.config.poll_end_timestamp));
        inputs.scalar("packedVals", self.process_packed_vals(index, batch_end));
        inputs.scalar("msgRoot", self.message_tree.root());
        inputs.matrix("msgs", msgs.iter().map(Message::as_circuit_inputs).collect());
        inputs.matrix("msgSubrootPathElements", subroot_path.path_elements);
        inputs.scalar("coordPrivKey", self.coordinator.priv_key.as_circuit_inputs());
        inputs.vector("coordPubKey", self.coordinator.pub_key.as_circuit_inputs().to_vec());
        inputs.matrix(
            "encPubKeys",
            enc_pub_keys
                .iter()
                .map(|k| k.as_circuit_inputs().to_vec())
                .collect(),
        );
        inputs.scalar("currentStateRoot", self.state_tree.root());
        inputs.scalar("currentBallotRoot", self.ballot_tree.root());
        inputs.scalar("currentSbCommitment", self.sb_commitment()?);
        inputs.scalar("currentSbSalt", current_sb_salt);
        Ok(inputs)
    }

    /// Process the next batch of messages and return its circuit inputs.
    ///
    /// The first call takes the processing lock and copies the signup
    /// snapshot. The lock is released after the last batch.
    pub fn process_messages<R: RngCore + CryptoRng>(
        &mut self,
        ctx: &mut SignupSnapshot<'_>,
        rng: &mut R,
    ) -> Result<CircuitInputs> {
        if !self.has_unprocessed_messages() {
            return Err(PollError::NoUnprocessedMessages);
        }
        ctx.lock.acquire(self.poll_id)?;
        if !self.state_copied {
            self.copy_state_from(ctx)?;
        }

        let batch_size = self.config.batch_sizes.message_batch_size;
        let start = match self.current_message_batch_index {
            Some(index) => index,
            None => {
                // last batch first, whether or not it is full
                let len = self.messages.len();
                let r = len % batch_size;
                let index = match (len, r) {
                    (0, _) => 0,
                    (_, 0) => len - batch_size,
                    _ => len - r,
                };
                self.sb_salts.insert(index, Fr::zero());
                self.current_message_batch_index = Some(index);
                index
            }
        };

        let mut inputs = self.gen_process_messages_circuit_inputs_partial(start)?;
        let packed_vals =
            self.process_packed_vals(start, (start + batch_size).min(self.messages.len()));
        let msg_root = self.message_tree.root();
        let current_sb_commitment = self.sb_commitment()?;

        let mut witnesses = Vec::with_capacity(batch_size);
        let mut blank = None;
        for slot in (start..start + batch_size).rev() {
            witnesses.push(self.process_slot(slot, &mut blank)?);
        }
        witnesses.reverse();

        inputs.matrix(
            "currentStateLeaves",
            witnesses
                .iter()
                .map(|w| w.state_leaf.as_circuit_inputs().to_vec())
                .collect(),
        );
        inputs.matrix(
            "currentBallots",
            witnesses
                .iter()
                .map(|w| w.ballot.as_circuit_inputs().map(|b| b.to_vec()))
                .collect::<std::result::Result<_, _>>()?,
        );
        inputs.vector(
            "currentVoteWeights",
            witnesses.iter().map(|w| w.vote_weight).collect(),
        );
        let mut state_paths = Vec::with_capacity(batch_size);
        let mut ballot_paths = Vec::with_capacity(batch_size);
        let mut vote_paths = Vec::with_capacity(batch_size);
        for w in witnesses {
            state_paths.push(w.state_leaf_path);
            ballot_paths.push(w.ballot_path);
            vote_paths.push(w.vote_weights_path);
        }
        inputs.tensor("currentStateLeavesPathElements", state_paths);
        inputs.tensor("currentBallotsPathElements", ballot_paths);
        inputs.tensor("currentVoteWeightsPathElements", vote_paths);

        self.num_batches_processed += 1;
        let next = start.saturating_sub(batch_size);
        self.current_message_batch_index = Some(next);

        let new_sb_salt = gen_random_salt(rng);
        self.sb_salts.insert(next, new_sb_salt);
        let new_sb_commitment = hash3([self.state_tree.root(), self.ballot_tree.root(), new_sb_salt]);

        inputs.scalar("newSbSalt", new_sb_salt);
        inputs.scalar("newSbCommitment", new_sb_commitment);
        inputs.scalar(
            "inputHash",
            sha256_hash(&[
                packed_vals,
                self.coordinator.pub_key.hash(),
                msg_root,
                current_sb_commitment,
                new_sb_commitment,
                Fr::from(self.config.poll_end_timestamp),
            ]),
        );

        debug!(
            "poll {}: processed batch {} (messages {}..{}), state root {}, ballot root {}",
            self.poll_id,
            self.num_batches_processed,
            start,
            start + batch_size,
            self.state_tree.root(),
            self.ballot_tree.root()
        );

        if self.num_batches_processed * batch_size >= self.messages.len() {
            ctx.lock.release(self.poll_id);
        }
        Ok(inputs)
    }
}
