//! poseidon duplex-sponge encryption keyed by an ecdh point

use ark_ff::Zero;
use num_bigint::BigUint;

use crate::babyjub::Point;
use crate::error::{CryptoError, Result};
use crate::field::{fr_to_biguint, Fr};
use crate::poseidon::poseidon_perm;

fn initial_state(key: &Point, nonce: &Fr, length: usize) -> Result<Vec<Fr>> {
    let two128 = BigUint::from(1u8) << 128u32;
    if fr_to_biguint(nonce) >= two128 {
        return Err(CryptoError::InvalidNonce);
    }
    let domain = *nonce + Fr::from(length as u64) * Fr::from(two128);
    Ok(vec![Fr::zero(), key.x, key.y, domain])
}

/// Encrypt `plaintext`; the ciphertext is the padded length plus one.
pub fn poseidon_encrypt(plaintext: &[Fr], key: &Point, nonce: &Fr) -> Result<Vec<Fr>> {
    let mut state = initial_state(key, nonce, plaintext.len())?;

    let mut message = plaintext.to_vec();
    while message.len() % 3 != 0 {
        message.push(Fr::zero());
    }

    let mut ciphertext = Vec::with_capacity(message.len() + 1);
    for chunk in message.chunks(3) {
        state = poseidon_perm(&state)?;
        for (j, m) in chunk.iter().enumerate() {
            state[j + 1] += m;
            ciphertext.push(state[j + 1]);
        }
    }

    state = poseidon_perm(&state)?;
    ciphertext.push(state[1]);
    Ok(ciphertext)
}

/// Decrypt `length` elements and authenticate the ciphertext.
pub fn poseidon_decrypt(
    ciphertext: &[Fr],
    key: &Point,
    nonce: &Fr,
    length: usize,
) -> Result<Vec<Fr>> {
    let padded = length.div_ceil(3) * 3;
    if ciphertext.len() != padded + 1 {
        return Err(CryptoError::DecryptionFailed("ciphertext length mismatch"));
    }
    let mut state = initial_state(key, nonce, length)?;

    let mut message = Vec::with_capacity(padded);
    for chunk in ciphertext[..padded].chunks(3) {
        state = poseidon_perm(&state)?;
        for (j, c) in chunk.iter().enumerate() {
            message.push(*c - state[j + 1]);
            state[j + 1] = *c;
        }
    }

    if length > 3 {
        let padding = padded - length;
        if message[length..].iter().take(padding).any(|m| !m.is_zero()) {
            return Err(CryptoError::DecryptionFailed("non-zero padding"));
        }
    }

    state = poseidon_perm(&state)?;
    if ciphertext[padded] != state[1] {
        return Err(CryptoError::DecryptionFailed("authentication tag mismatch"));
    }

    message.truncate(length);
    Ok(message)
}
