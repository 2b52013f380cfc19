//! small-value packing shared with the contracts and verifying key lookup
//!
//! ```text
//! process: maxVoteOptions | numSignUps<<50 | batchStart<<100 | batchEnd<<150
//! tally:   batchStart/batchSize | numSignUps<<50
//! subsidy: col | row<<50 | numSignUps<<100
//! ```

use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;

use narya_crypto::field::Fr;

use crate::error::{PollError, Result};

const SLOT_BITS: u32 = 50;

fn pack(slots: &[u64]) -> Fr {
    let mut packed = BigUint::from(0u8);
    for (i, v) in slots.iter().enumerate() {
        packed |= BigUint::from(*v) << (SLOT_BITS * i as u32);
    }
    Fr::from(packed)
}

fn unpack<const N: usize>(packed: &Fr) -> Result<[u64; N]> {
    let bits = packed.into_bigint().to_bits_le();
    let width = N * SLOT_BITS as usize;
    if bits.iter().skip(width).any(|b| *b) {
        return Err(PollError::PackedOverflow(width));
    }
    let mut out = [0u64; N];
    for (i, slot) in out.iter_mut().enumerate() {
        for b in (0..SLOT_BITS as usize).rev() {
            *slot <<= 1;
            if bits[i * SLOT_BITS as usize + b] {
                *slot |= 1;
            }
        }
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessMessageSmallVals {
    pub max_vote_options: u64,
    pub num_users: u64,
    pub batch_start_index: u64,
    pub batch_end_index: u64,
}

pub fn pack_process_message_small_vals(
    max_vote_options: u64,
    num_users: u64,
    batch_start_index: u64,
    batch_end_index: u64,
) -> Fr {
    pack(&[max_vote_options, num_users, batch_start_index, batch_end_index])
}

pub fn unpack_process_message_small_vals(packed: &Fr) -> Result<ProcessMessageSmallVals> {
    let [max_vote_options, num_users, batch_start_index, batch_end_index] = unpack::<4>(packed)?;
    Ok(ProcessMessageSmallVals {
        max_vote_options,
        num_users,
        batch_start_index,
        batch_end_index,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TallyVotesSmallVals {
    /// batch number, i.e. batch start index over batch size
    pub batch_index: u64,
    pub num_sign_ups: u64,
}

pub fn pack_tally_votes_small_vals(batch_start_index: u64, batch_size: u64, num_sign_ups: u64) -> Fr {
    pack(&[batch_start_index / batch_size.max(1), num_sign_ups])
}

pub fn unpack_tally_votes_small_vals(packed: &Fr) -> Result<TallyVotesSmallVals> {
    let [batch_index, num_sign_ups] = unpack::<2>(packed)?;
    Ok(TallyVotesSmallVals {
        batch_index,
        num_sign_ups,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubsidySmallVals {
    pub row: u64,
    pub col: u64,
    pub num_sign_ups: u64,
}

pub fn pack_subsidy_small_vals(row: u64, col: u64, num_sign_ups: u64) -> Fr {
    pack(&[col, row, num_sign_ups])
}

pub fn unpack_subsidy_small_vals(packed: &Fr) -> Result<SubsidySmallVals> {
    let [col, row, num_sign_ups] = unpack::<3>(packed)?;
    Ok(SubsidySmallVals {
        row,
        col,
        num_sign_ups,
    })
}

/// key under which the contract registers a process verifying key
pub fn gen_process_vk_sig(
    state_tree_depth: u64,
    message_tree_depth: u64,
    vote_option_tree_depth: u64,
    batch_size: u64,
) -> BigUint {
    (BigUint::from(batch_size) << 192u32)
        + (BigUint::from(state_tree_depth) << 128u32)
        + (BigUint::from(message_tree_depth) << 64u32)
        + BigUint::from(vote_option_tree_depth)
}

pub fn gen_tally_vk_sig(
    state_tree_depth: u64,
    int_state_tree_depth: u64,
    vote_option_tree_depth: u64,
) -> BigUint {
    (BigUint::from(state_tree_depth) << 128u32)
        + (BigUint::from(int_state_tree_depth) << 64u32)
        + BigUint::from(vote_option_tree_depth)
}

/// same layout as the tally key, registered separately on chain
pub fn gen_subsidy_vk_sig(
    state_tree_depth: u64,
    int_state_tree_depth: u64,
    vote_option_tree_depth: u64,
) -> BigUint {
    gen_tally_vk_sig(state_tree_depth, int_state_tree_depth, vote_option_tree_depth)
}
