//! PASTA stream cipher.
//!
//! The state is a pair of blocks seeded from the two halves of the key.
//! Each round applies an affine layer (a matrix-vector product with a
//! companion-like matrix drawn from the XOF, a round-constant addition,
//! and a 2x2 mix of the halves) followed by a Feistel S-box (cube in the
//! last round). One trailing affine layer closes the schedule, and the
//! first half of the state is the keystream block.

use secrecy::ExposeSecret;
use sha3::Shake128Reader;

use crate::cipher::{self, DEFAULT_NONCE};
use crate::math::{add_mod, mul_mod};
use crate::traits::{Error, KeyStreamCipher, Result, SymmetricKey};
use crate::xof::FieldXof;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PastaParams {
    pub key_size: usize,
    pub block_size: usize,
    pub rounds: usize,
    pub modulus: u64,
}

/// PASTA-3, 17-bit modulus.
pub const PASTA_3_16: PastaParams = PastaParams {
    key_size: 256,
    block_size: 128,
    rounds: 3,
    modulus: 65_537,
};

/// PASTA-3, 33-bit modulus.
pub const PASTA_3_32: PastaParams = PastaParams {
    key_size: 256,
    block_size: 128,
    rounds: 3,
    modulus: 8_088_322_049,
};

/// PASTA-3, 60-bit modulus.
pub const PASTA_3_60: PastaParams = PastaParams {
    key_size: 256,
    block_size: 128,
    rounds: 3,
    modulus: 1_096_486_890_805_657_601,
};

/// PASTA-4, 17-bit modulus.
pub const PASTA_4_16: PastaParams = PastaParams {
    key_size: 64,
    block_size: 32,
    rounds: 4,
    modulus: 65_537,
};

/// PASTA-4, 33-bit modulus.
pub const PASTA_4_32: PastaParams = PastaParams {
    key_size: 64,
    block_size: 32,
    rounds: 4,
    modulus: 8_088_322_049,
};

/// PASTA-4, 60-bit modulus.
pub const PASTA_4_60: PastaParams = PastaParams {
    key_size: 64,
    block_size: 32,
    rounds: 4,
    modulus: 1_096_486_890_805_657_601,
};

/// Generate a fresh uniform PASTA key for the parameter set.
#[must_use]
pub fn generate_key(params: PastaParams) -> SymmetricKey {
    cipher::random_key(params.key_size, params.modulus)
}

#[derive(Debug)]
pub struct Pasta {
    params: PastaParams,
    key: SymmetricKey,
    nonce: u64,
}

impl Pasta {
    /// Create a PASTA instance with the default nonce.
    ///
    /// # Errors
    ///
    /// Errors if the key length does not match the parameter set.
    pub fn new(key: SymmetricKey, params: PastaParams) -> Result<Self> {
        Self::with_nonce(key, params, DEFAULT_NONCE)
    }

    /// Create a PASTA instance with an explicit nonce.
    ///
    /// The nonce is public, but must be unique per message; the block
    /// counter only distinguishes blocks within one message.
    ///
    /// # Errors
    ///
    /// Errors if the key length does not match the parameter set.
    pub fn with_nonce(key: SymmetricKey, params: PastaParams, nonce: u64) -> Result<Self> {
        if key.expose_secret().len() != params.key_size {
            return Err(Error::Key {
                expected: params.key_size,
                got: key.expose_secret().len(),
            });
        }
        Ok(Self { params, key, nonce })
    }

    #[must_use]
    pub fn params(&self) -> PastaParams {
        self.params
    }

    #[must_use]
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// One affine layer: matrix multiply both halves, add round constants,
    /// mix. Draw order (matrix 1, matrix 2, constant 1, constant 2) is
    /// load-bearing: the homomorphic evaluator regenerates the same
    /// sequence from the same seed.
    fn linear_layer(
        state1: &mut Vec<u64>,
        state2: &mut Vec<u64>,
        xof: &mut FieldXof<Shake128Reader>,
        p: u64,
    ) {
        matmul(state1, xof, p);
        matmul(state2, xof, p);
        add_rc(state1, xof, p);
        add_rc(state2, xof, p);
        mix(state1, state2, p);
    }
}

impl KeyStreamCipher for Pasta {
    fn block_size(&self) -> usize {
        self.params.block_size
    }

    fn modulus(&self) -> u64 {
        self.params.modulus
    }

    fn key_stream(&self, counter: u64) -> Vec<u64> {
        let p = self.params.modulus;
        let block_size = self.params.block_size;
        let mut xof = FieldXof::shake128(self.nonce, counter, p);

        let key = self.key.expose_secret();
        let mut state1 = key[..block_size].to_vec();
        let mut state2 = key[block_size..].to_vec();

        for r in 0..self.params.rounds {
            Self::linear_layer(&mut state1, &mut state2, &mut xof, p);
            if r == self.params.rounds - 1 {
                cube_sbox(&mut state1, p);
                cube_sbox(&mut state2, p);
            } else {
                feistel_sbox(&mut state1, p);
                feistel_sbox(&mut state2, p);
            }
        }
        Self::linear_layer(&mut state1, &mut state2, &mut xof, p);

        state1
    }
}

/// Multiply the state by an XOF-drawn companion matrix.
///
/// Only the first row is random (and kept zero-free so the matrix is
/// invertible by construction); every further row follows from the
/// recurrence in [`next_row`]. Rows are generated on the fly, so only two
/// of them are ever held.
pub(crate) fn matmul(state: &mut Vec<u64>, xof: &mut FieldXof<Shake128Reader>, p: u64) {
    let size = state.len();
    let first_row = xof.vector(size, false);

    let mut new_state = vec![0u64; size];
    let mut row = first_row.clone();
    for (i, out) in new_state.iter_mut().enumerate() {
        for (value, state_value) in row.iter().zip(state.iter()) {
            *out = add_mod(*out, mul_mod(*value, *state_value, p), p);
        }
        if i != size - 1 {
            row = next_row(&row, &first_row, p);
        }
    }

    *state = new_state;
}

/// Materialize the full round matrix for the same XOF draw as [`matmul`].
///
/// The homomorphic evaluator needs whole diagonals, not a streamed
/// product; both paths consume exactly one `size`-element draw.
pub(crate) fn round_matrix(
    xof: &mut FieldXof<Shake128Reader>,
    size: usize,
    p: u64,
) -> Vec<Vec<u64>> {
    let mut matrix = Vec::with_capacity(size);
    matrix.push(xof.vector(size, false));
    for j in 1..size {
        let row = next_row(&matrix[j - 1], &matrix[0], p);
        matrix.push(row);
    }
    matrix
}

/// Row recurrence of the companion-like round matrix:
/// `row[k] = first[k]·prev[last] + prev[k-1]` (no carry term at `k = 0`).
fn next_row(previous: &[u64], first: &[u64], p: u64) -> Vec<u64> {
    let size = first.len();
    let pivot = previous[size - 1];

    (0..size)
        .map(|k| {
            let mut value = mul_mod(first[k], pivot, p);
            if k > 0 {
                value = add_mod(value, previous[k - 1], p);
            }
            value
        })
        .collect()
}

fn add_rc(state: &mut [u64], xof: &mut FieldXof<Shake128Reader>, p: u64) {
    for value in state.iter_mut() {
        *value = add_mod(*value, xof.field_element(true), p);
    }
}

/// The 2×2 mix `[s1, s2] <- [2·s1 + s2, s1 + 2·s2]`, computed through the
/// shared sum so both halves see the pre-mix values.
fn mix(state1: &mut [u64], state2: &mut [u64], p: u64) {
    for (s1, s2) in state1.iter_mut().zip(state2.iter_mut()) {
        let sum = add_mod(*s1, *s2, p);
        *s1 = add_mod(*s1, sum, p);
        *s2 = add_mod(*s2, sum, p);
    }
}

/// `x -> x + x_prev^2`, skipping the first element.
pub(crate) fn feistel_sbox(state: &mut [u64], p: u64) {
    // Walk backwards so each square reads the pre-S-box predecessor.
    for i in (1..state.len()).rev() {
        let square = mul_mod(state[i - 1], state[i - 1], p);
        state[i] = add_mod(state[i], square, p);
    }
}

/// `x -> x^3`, element-wise.
pub(crate) fn cube_sbox(state: &mut [u64], p: u64) {
    for value in state.iter_mut() {
        let square = mul_mod(*value, *value, p);
        *value = mul_mod(square, *value, p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use secrecy::SecretBox;

    const P: u64 = 65_537;

    fn xof_key(params: PastaParams) -> SymmetricKey {
        let mut xof = FieldXof::shake128(42, 42, params.modulus);
        SecretBox::new(Box::new(xof.vector(params.key_size, true)))
    }

    #[test]
    fn feistel_sbox_squares_predecessors() {
        let mut state = vec![3, 4, 5];
        feistel_sbox(&mut state, P);

        assert_eq!(state, vec![3, 4 + 9, 5 + 16]);
    }

    #[test]
    fn cube_sbox_cubes_elements() {
        let mut state = vec![2, 3, 65_536];
        cube_sbox(&mut state, P);

        // 65536 = -1 mod 65537, so its cube is -1 again.
        assert_eq!(state, vec![8, 27, 65_536]);
    }

    #[test]
    fn mix_matches_two_by_two_matrix() {
        let mut state1 = vec![1, 65_000, 12_345];
        let mut state2 = vec![2, 65_001, 54_321];
        let (copy1, copy2) = (state1.clone(), state2.clone());

        mix(&mut state1, &mut state2, P);

        for i in 0..3 {
            let expected1 = (2 * copy1[i] + copy2[i]) % P;
            let expected2 = (copy1[i] + 2 * copy2[i]) % P;
            assert_eq!(state1[i], expected1);
            assert_eq!(state2[i], expected2);
        }
    }

    #[test]
    fn round_matrix_satisfies_companion_recurrence() {
        let mut xof = FieldXof::shake128(7, 0, P);
        let matrix = round_matrix(&mut xof, 8, P);

        let first = &matrix[0];
        assert!(first.iter().all(|&v| v != 0 && v < P));
        for j in 1..8 {
            let pivot = matrix[j - 1][7];
            for k in 0..8 {
                let mut expected = mul_mod(first[k], pivot, P);
                if k > 0 {
                    expected = add_mod(expected, matrix[j - 1][k - 1], P);
                }
                assert_eq!(matrix[j][k], expected);
            }
        }
    }

    #[test]
    fn streamed_matmul_matches_dense_product() {
        // Same seed on both sides: the streamed multiply and the
        // materialized matrix must consume the XOF identically and agree
        // on the product. This is the symmetric/homomorphic common ground.
        let mut state: Vec<u64> = (1..=16).collect();
        let expected_state = state.clone();

        let mut xof_a = FieldXof::shake128(11, 3, P);
        matmul(&mut state, &mut xof_a, P);

        let mut xof_b = FieldXof::shake128(11, 3, P);
        let matrix = round_matrix(&mut xof_b, 16, P);
        let dense: Vec<u64> = matrix
            .iter()
            .map(|row| {
                row.iter()
                    .zip(expected_state.iter())
                    .fold(0, |acc, (&m, &v)| add_mod(acc, mul_mod(m, v, P), P))
            })
            .collect();

        assert_eq!(state, dense);
        // Both consumed the same amount of stream.
        assert_eq!(xof_a.field_element(true), xof_b.field_element(true));
    }

    #[test]
    fn cipher_and_evaluator_draws_stay_in_lockstep() {
        // One full affine layer consumed both ways: streamed multiply
        // plus element-wise constants on the cipher side, materialized
        // matrices plus constant vectors on the evaluator side. Both
        // streams must end at the same position with the same values.
        let mut cipher_xof = FieldXof::shake128(8, 8, P);
        let mut evaluator_xof = FieldXof::shake128(8, 8, P);

        let mut state1: Vec<u64> = (1..=16).collect();
        let mut state2: Vec<u64> = (17..=32).collect();
        matmul(&mut state1, &mut cipher_xof, P);
        matmul(&mut state2, &mut cipher_xof, P);
        let constants1_start = state1.clone();
        add_rc(&mut state1, &mut cipher_xof, P);
        let constants2_start = state2.clone();
        add_rc(&mut state2, &mut cipher_xof, P);

        let mat1 = round_matrix(&mut evaluator_xof, 16, P);
        let mat2 = round_matrix(&mut evaluator_xof, 16, P);
        let constants1 = evaluator_xof.vector(16, true);
        let constants2 = evaluator_xof.vector(16, true);

        // Same matrices, same constants, same stream position.
        for i in 0..16 {
            assert_eq!(state1[i], add_mod(constants1_start[i], constants1[i], P));
            assert_eq!(state2[i], add_mod(constants2_start[i], constants2[i], P));
        }
        assert_eq!(mat1.len(), 16);
        assert_ne!(mat1[0], mat2[0]);
        assert_eq!(
            cipher_xof.field_element(true),
            evaluator_xof.field_element(true)
        );
    }

    #[test]
    fn key_stream_is_deterministic() {
        let cipher_a = Pasta::new(xof_key(PASTA_4_16), PASTA_4_16).unwrap();
        let cipher_b = Pasta::new(xof_key(PASTA_4_16), PASTA_4_16).unwrap();

        assert_eq!(cipher_a.key_stream(5), cipher_b.key_stream(5));
        assert_eq!(cipher_a.key_stream(5), cipher_a.key_stream(5));
        assert_ne!(cipher_a.key_stream(5), cipher_a.key_stream(6));
    }

    #[test]
    fn key_stream_has_block_size_elements() {
        let cipher = Pasta::new(xof_key(PASTA_3_16), PASTA_3_16).unwrap();

        let key_stream = cipher.key_stream(0);
        assert_eq!(key_stream.len(), 128);
        assert!(key_stream.iter().all(|&v| v < P));
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let key = SecretBox::new(Box::new(vec![1u64; 17]));

        let err = Pasta::new(key, PASTA_3_16).unwrap_err();
        assert_eq!(
            err,
            Error::Key {
                expected: 256,
                got: 17
            }
        );
    }
}
