#![allow(dead_code)]

use secrecy::SecretBox;

use transcipher::traits::SymmetricKey;
use transcipher::xof::FieldXof;

/// Derive a key of `len` elements deterministically from the XOF, so
/// tests are reproducible without storing key material.
pub fn xof_key(nonce: u64, counter: u64, len: usize, modulus: u64) -> SymmetricKey {
    let mut xof = FieldXof::shake128(nonce, counter, modulus);
    SecretBox::new(Box::new(xof.vector(len, true)))
}

/// Uniform pseudo-random plaintext, deterministic per seed.
pub fn xof_plaintext(seed: u64, len: usize, modulus: u64) -> Vec<u64> {
    let mut xof = FieldXof::shake128(seed, u64::MAX, modulus);
    xof.vector(len, true)
}
