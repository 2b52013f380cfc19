//! ballot tallying
//!
//! ballots are tallied forward in batches. each batch commits to three
//! running totals, each salted and chained to the previous batch:
//!
//! ```text
//! results   = hashLeftRight(root(Σ votes per option), salt)
//! spent     = hashLeftRight(Σ votes², salt)
//! perVO     = hashLeftRight(root(Σ votes² per option), salt)
//! tally     = hash3(results, spent, perVO)
//! ```

use std::collections::BTreeMap;

use ark_ff::Zero;
use rand::{CryptoRng, RngCore};
use tracing::debug;

use narya_crypto::field::{gen_random_salt, Fr};
use narya_crypto::poseidon::{hash3, hash_left_right, sha256_hash};
use narya_crypto::tree::gen_tree_commitment;
use narya_domain::Ballot;

use super::Poll;
use crate::circuit_inputs::CircuitInputs;
use crate::error::{PollError, Result};
use crate::packing::pack_tally_votes_small_vals;

/// salt stored for the batch before `batch_start`, zero for the first
fn previous_salt(
    salts: &BTreeMap<usize, Fr>,
    batch_start: usize,
    batch_size: usize,
    name: &str,
) -> Result<Fr> {
    match batch_start.checked_sub(batch_size) {
        None => Ok(Fr::zero()),
        Some(key) => salts
            .get(&key)
            .copied()
            .ok_or_else(|| PollError::MissingSalt(format!("{name} at {key}"))),
    }
}

impl Poll {
    fn counted_ballots(&self, num_ballots: usize) -> &[Ballot] {
        &self.ballots[..num_ballots.min(self.ballots.len())]
    }

    fn results_commitment(&self, salt: Fr) -> Result<Fr> {
        Ok(gen_tree_commitment(
            &self.results,
            salt,
            self.config.tree_depths.vote_option_tree_depth,
        )?)
    }

    /// Σ v² over the first `num_ballots` ballots
    fn spent_subtotal_commitment(&self, salt: Fr, num_ballots: usize) -> Fr {
        let max_vote_options = self.config.max_values.max_vote_options;
        let subtotal = self
            .counted_ballots(num_ballots)
            .iter()
            .flat_map(|b| b.votes.iter().take(max_vote_options))
            .fold(Fr::zero(), |acc, v| acc + *v * *v);
        hash_left_right(subtotal, salt)
    }

    /// per option Σ v² over the first `num_ballots` ballots
    fn per_vo_spent_commitment(&self, salt: Fr, num_ballots: usize) -> Result<Fr> {
        let mut leaves = vec![Fr::zero(); self.config.max_values.max_vote_options];
        for ballot in self.counted_ballots(num_ballots) {
            for (leaf, v) in leaves.iter_mut().zip(&ballot.votes) {
                *leaf += *v * *v;
            }
        }
        Ok(gen_tree_commitment(
            &leaves,
            salt,
            self.config.tree_depths.vote_option_tree_depth,
        )?)
    }

    /// Tally the next batch of ballots and return the tally circuit inputs.
    pub fn tally_votes<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<CircuitInputs> {
        if !self.processing_complete() {
            return Err(PollError::ProcessingIncomplete);
        }
        if !self.has_untallied_ballots() {
            return Err(PollError::NoUntalliedBallots);
        }

        let batch_size = self.config.batch_sizes.tally_batch_size;
        let max_vote_options = self.config.max_values.max_vote_options;
        let batch_start = self.num_batches_tallied * batch_size;

        let current_results_salt =
            previous_salt(&self.result_root_salts, batch_start, batch_size, "results salt")?;
        let current_per_vo_salt =
            previous_salt(&self.per_vo_spent_salts, batch_start, batch_size, "per option salt")?;
        let current_spent_salt = previous_salt(
            &self.spent_subtotal_salts,
            batch_start,
            batch_size,
            "spent subtotal salt",
        )?;

        let current_tally_commitment = if batch_start == 0 {
            Fr::zero()
        } else {
            hash3([
                self.results_commitment(current_results_salt)?,
                self.spent_subtotal_commitment(current_spent_salt, batch_start),
                self.per_vo_spent_commitment(current_per_vo_salt, batch_start)?,
            ])
        };

        let current_results = self.results.clone();
        let current_per_vo_spent = self.per_vo_spent.clone();
        let current_spent_subtotal = self.total_spent;

        let batch_end = (batch_start + batch_size).min(self.ballots.len());
        let mut ballots = self.ballots[batch_start..batch_end].to_vec();
        for ballot in &ballots {
            for (j, v) in ballot.votes.iter().take(max_vote_options).enumerate() {
                self.results[j] += *v;
                self.per_vo_spent[j] += *v * *v;
                self.total_spent += *v * *v;
            }
        }
        let empty = Ballot::new(
            max_vote_options,
            self.config.tree_depths.vote_option_tree_depth,
        )?;
        ballots.resize(batch_size, empty);

        let new_results_salt = gen_random_salt(rng);
        let new_per_vo_salt = gen_random_salt(rng);
        let new_spent_salt = gen_random_salt(rng);
        self.result_root_salts.insert(batch_start, new_results_salt);
        self.per_vo_spent_salts.insert(batch_start, new_per_vo_salt);
        self.spent_subtotal_salts.insert(batch_start, new_spent_salt);

        let counted = batch_start + batch_size;
        let new_tally_commitment = hash3([
            self.results_commitment(new_results_salt)?,
            self.spent_subtotal_commitment(new_spent_salt, counted),
            self.per_vo_spent_commitment(new_per_vo_salt, counted)?,
        ]);

        let sb_salt = self.current_sb_salt()?;
        let sb_commitment = self.sb_commitment()?;
        let packed_vals =
            pack_tally_votes_small_vals(batch_start as u64, batch_size as u64, self.num_sign_ups as u64);
        let input_hash = sha256_hash(&[
            packed_vals,
            sb_commitment,
            current_tally_commitment,
            new_tally_commitment,
        ]);
        let subroot_path = self
            .ballot_tree
            .gen_merkle_subroot_path(batch_start, batch_start + batch_size)?;

        let mut inputs = CircuitInputs::new();
        inputs.scalar("stateRoot", self.state_tree.root());
        inputs.scalar("ballotRoot", self.ballot_tree.root());
        inputs.scalar("sbSalt", sb_salt);
        inputs.scalar("sbCommitment", sb_commitment);
        inputs.scalar("currentTallyCommitment", current_tally_commitment);
        inputs.scalar("newTallyCommitment", new_tally_commitment);
        inputs.scalar("packedVals", packed_vals);
        inputs.scalar("inputHash", input_hash);
        inputs.matrix(
            "ballots",
            ballots
                .iter()
                .map(|b| b.as_circuit_inputs().map(|c| c.to_vec()))
                .collect::<std::result::Result<_, _>>()?,
        );
        inputs.matrix("ballotPathElements", subroot_path.path_elements);
        inputs.matrix("votes", ballots.into_iter().map(|b| b.votes).collect());
        inputs.vector("currentResults", current_results);
        inputs.scalar("currentResultsRootSalt", current_results_salt);
        inputs.scalar("currentSpentVoiceCreditSubtotal", current_spent_subtotal);
        inputs.scalar("currentSpentVoiceCreditSubtotalSalt", current_spent_salt);
        inputs.vector("currentPerVOSpentVoiceCredits", current_per_vo_spent);
        inputs.scalar("currentPerVOSpentVoiceCreditsRootSalt", current_per_vo_salt);
        inputs.scalar("newResultsRootSalt", new_results_salt);
        inputs.scalar("newPerVOSpentVoiceCreditsRootSalt", new_per_vo_salt);
        inputs.scalar("newSpentVoiceCreditSubtotalSalt", new_spent_salt);

        self.num_batches_tallied += 1;
        debug!(
            "poll {}: tallied batch {} (ballots {}..{}), tally commitment {}",
            self.poll_id, self.num_batches_tallied, batch_start, batch_end, new_tally_commitment
        );
        Ok(inputs)
    }
}
