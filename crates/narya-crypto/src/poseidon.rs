//! circom-compatible poseidon and the fixed-arity hashes built on it
//!
//! round constants and mds matrices come from light-poseidon's bn254 x^5
//! tables, which are the ones circomlib ships. the permutation is kept
//! local so the encryption scheme can read the whole state, not just the
//! first word.

use std::sync::OnceLock;

use ark_ff::{Field, Zero};
use light_poseidon::parameters::bn254_x5::get_poseidon_parameters;
use light_poseidon::PoseidonParameters;
use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, Result};
use crate::field::{fr_to_be_bytes, snark_field_size, Fr};

/// smallest and largest supported state width
const MIN_WIDTH: usize = 2;
const MAX_WIDTH: usize = 6;

/// Parameters for every width in `MIN_WIDTH..=MAX_WIDTH`.
///
/// light-poseidon's bn254_x5 table covers widths 2..=13, so loading this
/// range cannot fail.
fn table() -> &'static [PoseidonParameters<Fr>] {
    static TABLE: OnceLock<Vec<PoseidonParameters<Fr>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (MIN_WIDTH..=MAX_WIDTH)
            .map(|t| {
                get_poseidon_parameters::<Fr>(t as u8).expect("bn254_x5 ships widths 2..=13")
            })
            .collect()
    })
}

fn parameters(width: usize) -> Result<&'static PoseidonParameters<Fr>> {
    if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) {
        return Err(CryptoError::UnsupportedArity(width.saturating_sub(1)));
    }
    Ok(&table()[width - MIN_WIDTH])
}

/// Full poseidon permutation over a state of width 2..=6.
pub fn poseidon_perm(state: &[Fr]) -> Result<Vec<Fr>> {
    Ok(permute(parameters(state.len())?, state))
}

fn permute(params: &PoseidonParameters<Fr>, state: &[Fr]) -> Vec<Fr> {
    let width = params.width;
    let half_full = params.full_rounds / 2;
    let rounds = params.full_rounds + params.partial_rounds;

    let mut state = state.to_vec();
    let mut next = vec![Fr::zero(); width];
    for round in 0..rounds {
        for (i, s) in state.iter_mut().enumerate() {
            *s += params.ark[round * width + i];
        }

        let full = round < half_full || round >= half_full + params.partial_rounds;
        if full {
            for s in state.iter_mut() {
                *s = s.pow([params.alpha]);
            }
        } else {
            state[0] = state[0].pow([params.alpha]);
        }

        for (i, out) in next.iter_mut().enumerate() {
            *out = state
                .iter()
                .zip(params.mds[i].iter())
                .map(|(s, m)| *s * m)
                .sum();
        }
        std::mem::swap(&mut state, &mut next);
    }
    state
}

/// Poseidon hash of 1..=5 inputs, `perm([0, inputs..])[0]`.
pub fn poseidon(inputs: &[Fr]) -> Result<Fr> {
    if inputs.is_empty() || inputs.len() > MAX_WIDTH - 1 {
        return Err(CryptoError::UnsupportedArity(inputs.len()));
    }
    let mut state = Vec::with_capacity(inputs.len() + 1);
    state.push(Fr::zero());
    state.extend_from_slice(inputs);
    Ok(poseidon_perm(&state)?[0])
}

/// Poseidon over a compile-time arity. `N` is checked against the table
/// at build time, so there is no error path.
pub(crate) fn fixed<const N: usize>(inputs: [Fr; N]) -> Fr {
    const { assert!(N >= 1 && N < MAX_WIDTH) };
    let mut state = [Fr::zero(); MAX_WIDTH];
    state[1..=N].copy_from_slice(&inputs);
    permute(&table()[N + 1 - MIN_WIDTH], &state[..=N])[0]
}

pub fn hash_left_right(left: Fr, right: Fr) -> Fr {
    fixed([left, right])
}

pub fn hash2(inputs: [Fr; 2]) -> Fr {
    fixed(inputs)
}

pub fn hash3(inputs: [Fr; 3]) -> Fr {
    fixed(inputs)
}

pub fn hash4(inputs: [Fr; 4]) -> Fr {
    fixed(inputs)
}

/// width-6 hash, shorter input is zero padded
pub fn hash5(inputs: &[Fr]) -> Result<Fr> {
    if inputs.len() > 5 {
        return Err(CryptoError::TooManyInputs {
            got: inputs.len(),
            max: 5,
        });
    }
    let mut padded = [Fr::zero(); 5];
    padded[..inputs.len()].copy_from_slice(inputs);
    Ok(fixed(padded))
}

/// Hash up to 13 elements with a two-layer width-6 construction.
///
/// `hash5([e0, hash5(e1..6), hash5(e6..11), e11, e12])` after zero padding.
pub fn hash13(inputs: &[Fr]) -> Result<Fr> {
    if inputs.len() > 13 {
        return Err(CryptoError::TooManyInputs {
            got: inputs.len(),
            max: 13,
        });
    }
    let mut e = [Fr::zero(); 13];
    e[..inputs.len()].copy_from_slice(inputs);
    let left = fixed([e[1], e[2], e[3], e[4], e[5]]);
    let right = fixed([e[6], e[7], e[8], e[9], e[10]]);
    Ok(fixed([e[0], left, right, e[11], e[12]]))
}

/// Hash of the children of one tree node. arity 2 and 5 are what the
/// contracts use; 3 and 4 fall out of the same table.
pub fn hash_children(children: &[Fr]) -> Result<Fr> {
    match children.len() {
        2..=5 => poseidon(children),
        n => Err(CryptoError::UnsupportedArity(n)),
    }
}

/// SHA-256 over 32-byte big-endian words, reduced into the field.
pub fn sha256_hash(values: &[Fr]) -> Fr {
    let mut hasher = Sha256::new();
    for v in values {
        hasher.update(fr_to_be_bytes(v));
    }
    let digest = hasher.finalize();
    Fr::from(BigUint::from_bytes_be(&digest) % snark_field_size())
}
