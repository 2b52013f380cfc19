//! pairwise subsidy
//!
//! every pair of ballots (i, j) with i < j contributes `2·k·v_i·v_j` per
//! option, with `k = MM·10^WW / (MM + v_i·v_j)` in integer arithmetic. the
//! ballot matrix is walked in batch-sized blocks along the upper triangle:
//! `(0,0) (0,1) .. (0,n-1) (1,1) .. (n-1,n-1)`.

use ark_ff::Zero;
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use tracing::debug;

use narya_crypto::field::{fr_to_biguint, gen_random_salt, Fr};
use narya_crypto::poseidon::sha256_hash;
use narya_crypto::tree::gen_tree_commitment;
use narya_domain::Ballot;

use super::Poll;
use crate::circuit_inputs::CircuitInputs;
use crate::config::{SUBSIDY_MM, SUBSIDY_WW};
use crate::error::{PollError, Result};
use crate::packing::pack_subsidy_small_vals;

fn salt_key(row: usize, col: usize) -> String {
    format!("{row}-{col}")
}

/// `MM·10^WW / (MM + row·col)`
pub fn subsidy_coefficient(row: &Ballot, col: &Ballot, max_vote_options: usize) -> Fr {
    let dot: BigUint = row
        .votes
        .iter()
        .zip(&col.votes)
        .take(max_vote_options)
        .map(|(a, b)| fr_to_biguint(a) * fr_to_biguint(b))
        .sum();
    let scale = BigUint::from(SUBSIDY_MM) * BigUint::from(10u32).pow(SUBSIDY_WW);
    Fr::from(scale / (BigUint::from(SUBSIDY_MM) + dot))
}

impl Poll {
    /// salt key of the batch computed just before the current one
    fn previous_subsidy_key(&self) -> Result<String> {
        let batch_size = self.config.batch_sizes.subsidy_batch_size;
        let num_batches = self.ballots.len().div_ceil(batch_size);
        let (row, col) = if self.cbi > self.rbi {
            (self.rbi, self.cbi - 1)
        } else {
            let row = self
                .rbi
                .checked_sub(1)
                .ok_or_else(|| PollError::MissingSalt(salt_key(self.rbi, self.cbi)))?;
            (row, num_batches.saturating_sub(1))
        };
        Ok(salt_key(row, col))
    }

    fn advance_subsidy_indices(&mut self) {
        let batch_size = self.config.batch_sizes.subsidy_batch_size;
        if self.cbi * batch_size + batch_size < self.ballots.len() {
            self.cbi += 1;
        } else {
            self.rbi += 1;
            self.cbi = self.rbi;
        }
    }

    /// ballots of one batch, padded with empty ballots
    fn subsidy_batch(&self, start: usize, empty: &Ballot) -> Vec<Ballot> {
        let batch_size = self.config.batch_sizes.subsidy_batch_size;
        (start..start + batch_size)
            .map(|i| self.ballots.get(i).unwrap_or(empty).clone())
            .collect()
    }

    /// Add the block's contribution to the running subsidy and return the
    /// row and column ballots.
    fn subsidy_calculation(&mut self, row_start: usize, col_start: usize) -> Result<(Vec<Ballot>, Vec<Ballot>)> {
        let max_vote_options = self.config.max_values.max_vote_options;
        let empty = Ballot::new(
            max_vote_options,
            self.config.tree_depths.vote_option_tree_depth,
        )?;
        let rows = self.subsidy_batch(row_start, &empty);
        let cols = self.subsidy_batch(col_start, &empty);
        let two = Fr::from(2u64);

        for (i, row) in rows.iter().enumerate() {
            for (j, col) in cols.iter().enumerate() {
                // diagonal blocks count each pair once
                if row_start == col_start && i >= j {
                    continue;
                }
                let k = subsidy_coefficient(row, col, max_vote_options);
                for (p, s) in self.subsidy.iter_mut().enumerate() {
                    let (Some(vi), Some(vj)) = (row.votes.get(p), col.votes.get(p)) else {
                        continue;
                    };
                    *s += two * k * vi * vj;
                }
            }
        }
        Ok((rows, cols))
    }

    /// Compute the next block of the pairwise subsidy and return its
    /// circuit inputs.
    pub fn subsidy_per_batch<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<CircuitInputs> {
        if !self.processing_complete() {
            return Err(PollError::ProcessingIncomplete);
        }
        if !self.has_unfinished_subsidy_calculation() {
            return Err(PollError::NoSubsidyBatches);
        }
        let batch_size = self.config.batch_sizes.subsidy_batch_size;
        let vote_option_tree_depth = self.config.tree_depths.vote_option_tree_depth;

        let state_root = self.state_tree.root();
        let ballot_root = self.ballot_tree.root();
        let sb_salt = self.current_sb_salt()?;
        let sb_commitment = self.sb_commitment()?;

        let current_subsidy = self.subsidy.clone();
        let (current_subsidy_salt, current_subsidy_commitment) = if self.rbi == 0 && self.cbi == 0 {
            (Fr::zero(), Fr::zero())
        } else {
            let key = self.previous_subsidy_key()?;
            let salt = self
                .subsidy_salts
                .get(&key)
                .copied()
                .ok_or(PollError::MissingSalt(key))?;
            (
                salt,
                gen_tree_commitment(&self.subsidy, salt, vote_option_tree_depth)?,
            )
        };

        let row_start = self.rbi * batch_size;
        let col_start = self.cbi * batch_size;
        let (ballots1, ballots2) = self.subsidy_calculation(row_start, col_start)?;

        let row_path = self
            .ballot_tree
            .gen_merkle_subroot_path(row_start, row_start + batch_size)?;
        let col_path = self
            .ballot_tree
            .gen_merkle_subroot_path(col_start, col_start + batch_size)?;

        let new_subsidy_salt = gen_random_salt(rng);
        self.subsidy_salts
            .insert(salt_key(self.rbi, self.cbi), new_subsidy_salt);
        let new_subsidy_commitment =
            gen_tree_commitment(&self.subsidy, new_subsidy_salt, vote_option_tree_depth)?;

        let packed_vals =
            pack_subsidy_small_vals(self.rbi as u64, self.cbi as u64, self.num_sign_ups as u64);
        let input_hash = sha256_hash(&[
            packed_vals,
            sb_commitment,
            current_subsidy_commitment,
            new_subsidy_commitment,
        ]);

        let as_inputs = |ballots: &[Ballot]| -> Result<Vec<Vec<Fr>>> {
            ballots
                .iter()
                .map(|b| b.as_circuit_inputs().map(|c| c.to_vec()))
                .collect::<std::result::Result<_, _>>()
                .map_err(PollError::from)
        };

        let mut inputs = CircuitInputs::new();
        inputs.scalar("stateRoot", state_root);
        inputs.scalar("ballotRoot", ballot_root);
        inputs.scalar("sbSalt", sb_salt);
        inputs.scalar("currentSubsidySalt", current_subsidy_salt);
        inputs.scalar("newSubsidySalt", new_subsidy_salt);
        inputs.scalar("sbCommitment", sb_commitment);
        inputs.scalar("currentSubsidyCommitment", current_subsidy_commitment);
        inputs.scalar("newSubsidyCommitment", new_subsidy_commitment);
        inputs.vector("currentSubsidy", current_subsidy);
        inputs.scalar("packedVals", packed_vals);
        inputs.scalar("inputHash", input_hash);
        inputs.matrix("ballots1", as_inputs(&ballots1)?);
        inputs.matrix("ballots2", as_inputs(&ballots2)?);
        inputs.matrix("votes1", ballots1.into_iter().map(|b| b.votes).collect());
        inputs.matrix("votes2", ballots2.into_iter().map(|b| b.votes).collect());
        inputs.matrix("ballotPathElements1", row_path.path_elements);
        inputs.matrix("ballotPathElements2", col_path.path_elements);

        debug!(
            "poll {}: subsidy block ({}, {}), commitment {}",
            self.poll_id, self.rbi, self.cbi, new_subsidy_commitment
        );
        self.advance_subsidy_indices();
        Ok(inputs)
    }
}
