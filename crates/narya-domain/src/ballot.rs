//! per-voter ballots: a nonce plus one vote weight per option

use ark_ff::Zero;
use serde::{Deserialize, Serialize};

use narya_crypto::field::{serde_fr, serde_fr_vec, Fr};
use narya_crypto::poseidon::hash_left_right;
use narya_crypto::tree::vote_option_root;

use crate::error::{DomainError, Result};

/// Arity of the vote option tree.
pub const VOTE_OPTION_TREE_ARITY: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
    #[serde(with = "serde_fr_vec")]
    pub votes: Vec<Fr>,
    #[serde(with = "serde_fr")]
    pub nonce: Fr,
    pub vote_option_tree_depth: usize,
}

impl Ballot {
    /// Empty ballot; the vote option tree must fit `max_vote_options`.
    pub fn new(max_vote_options: usize, vote_option_tree_depth: usize) -> Result<Self> {
        let capacity = (VOTE_OPTION_TREE_ARITY as u128)
            .checked_pow(vote_option_tree_depth as u32)
            .unwrap_or(u128::MAX);
        if capacity < max_vote_options as u128 {
            return Err(DomainError::VoteOptionTreeTooSmall {
                depth: vote_option_tree_depth,
                max_vote_options,
            });
        }
        Ok(Self {
            votes: vec![Fr::zero(); max_vote_options],
            nonce: Fr::zero(),
            vote_option_tree_depth,
        })
    }

    pub fn gen_blank_ballot(max_vote_options: usize, vote_option_tree_depth: usize) -> Result<Self> {
        Self::new(max_vote_options, vote_option_tree_depth)
    }

    /// root of the arity-5 tree over the votes, zero leaves past the end
    pub fn vote_option_root(&self) -> Result<Fr> {
        let used = self
            .votes
            .iter()
            .rposition(|v| !v.is_zero())
            .map_or(0, |i| i + 1);
        Ok(vote_option_root(&self.votes[..used], self.vote_option_tree_depth)?)
    }

    pub fn hash(&self) -> Result<Fr> {
        Ok(hash_left_right(self.nonce, self.vote_option_root()?))
    }

    pub fn as_circuit_inputs(&self) -> Result<[Fr; 2]> {
        Ok([self.nonce, self.vote_option_root()?])
    }
}
