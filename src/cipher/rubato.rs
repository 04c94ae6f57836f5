//! Rubato stream cipher.
//!
//! A single square state (4×4, 6×6 or 8×8, row-major) starts from the
//! fixed vector `1..=B`. Round keys are the key masked by XOF-drawn
//! scalars. After the final affine layer a small discrete-Gaussian noise
//! is folded into the leading elements, and the last four state elements
//! are discarded to absorb it, so the logical block size is `B - 4`.
//! Without noise (`sigma = 0`, test builds only) the cipher loses its
//! security claims.

use rand::rngs::OsRng;
use secrecy::ExposeSecret;
use sha3::Shake256Reader;

use crate::cipher::{self, DEFAULT_NONCE, pasta};
use crate::math::{GaussianSampler, add_mod, mul_mod};
use crate::traits::{Error, KeyStreamCipher, Result, SymmetricKey};
use crate::xof::FieldXof;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RubatoParams {
    /// Internal state size; the keystream exposes `block_size - 4`.
    pub block_size: usize,
    pub modulus: u64,
    pub rounds: usize,
    /// Standard deviation of the masking noise.
    pub sigma: f64,
}

/// Rubato-5 128S: 4×4 state, 12 output elements.
pub const RUBATO_5_128S: RubatoParams = RubatoParams {
    block_size: 16,
    modulus: 0x3EE_0001,
    rounds: 5,
    sigma: 4.188_893_944_215_043,
};

/// Rubato-3 128M: 6×6 state, 32 output elements.
pub const RUBATO_3_128M: RubatoParams = RubatoParams {
    block_size: 36,
    modulus: 0x1FC_0001,
    rounds: 3,
    sigma: 1.635_663_349_645_874,
};

/// Rubato-2 128L: 8×8 state, 60 output elements.
pub const RUBATO_2_128L: RubatoParams = RubatoParams {
    block_size: 64,
    modulus: 0x1FC_0001,
    rounds: 2,
    sigma: 1.635_663_349_645_874,
};

/// Per-row circulant coefficients of the MixColumns/MixRows matrices.
pub(crate) const CIRCULANT_4X4: [u64; 4] = [2, 3, 1, 1];
const CIRCULANT_6X6: [u64; 6] = [4, 2, 4, 3, 1, 1];
const CIRCULANT_8X8: [u64; 8] = [5, 3, 4, 3, 6, 2, 1, 1];

/// Generate a fresh uniform Rubato key for the parameter set.
#[must_use]
pub fn generate_key(params: RubatoParams) -> SymmetricKey {
    cipher::random_key(params.block_size, params.modulus)
}

#[derive(Debug)]
pub struct Rubato {
    params: RubatoParams,
    key: SymmetricKey,
    nonce_base: u64,
    noise: Option<GaussianSampler>,
}

impl Rubato {
    /// Create a Rubato instance with the default nonce base.
    ///
    /// # Errors
    ///
    /// Errors if the key length does not match the parameter set, or if
    /// the block size is not one of the supported grids.
    pub fn new(key: SymmetricKey, params: RubatoParams) -> Result<Self> {
        Self::with_nonce_base(key, params, DEFAULT_NONCE)
    }

    /// Create a Rubato instance with an explicit per-message nonce base;
    /// block `b` uses nonce `nonce_base + b`.
    ///
    /// # Errors
    ///
    /// Errors if the key length does not match the parameter set, or if
    /// the block size is not one of the supported grids.
    pub fn with_nonce_base(
        key: SymmetricKey,
        params: RubatoParams,
        nonce_base: u64,
    ) -> Result<Self> {
        circulant(params.block_size)?;
        if key.expose_secret().len() != params.block_size {
            return Err(Error::Key {
                expected: params.block_size,
                got: key.expose_secret().len(),
            });
        }
        let noise = (params.sigma > 0.0).then(|| GaussianSampler::new(params.sigma));
        Ok(Self {
            params,
            key,
            nonce_base,
            noise,
        })
    }

    #[must_use]
    pub fn params(&self) -> RubatoParams {
        self.params
    }

    /// Round keys for the whole schedule: `rc[r][i] = z_r_i * K[i] mod p`
    /// with scalars `z` drawn from the XOF in round order.
    fn round_keys(&self, xof: &mut FieldXof<Shake256Reader>) -> Vec<Vec<u64>> {
        let p = self.params.modulus;
        let key = self.key.expose_secret();

        (0..=self.params.rounds)
            .map(|_| key.iter().map(|&k| mul_mod(xof.sample_zq(), k, p)).collect())
            .collect()
    }
}

impl KeyStreamCipher for Rubato {
    fn block_size(&self) -> usize {
        self.params.block_size - 4
    }

    fn modulus(&self) -> u64 {
        self.params.modulus
    }

    fn key_stream(&self, counter: u64) -> Vec<u64> {
        let p = self.params.modulus;
        let block_size = self.params.block_size;
        let coefficients = circulant(block_size).expect("validated at construction");

        let nonce = self.nonce_base + counter;
        let mut xof = FieldXof::shake256(nonce, counter + 1, p);
        let round_keys = self.round_keys(&mut xof);

        let mut state: Vec<u64> = (1..=block_size as u64).collect();

        add_round_key(&mut state, &round_keys[0], p);
        for round_key in &round_keys[1..self.params.rounds] {
            linear_layer(&mut state, coefficients, p);
            pasta::feistel_sbox(&mut state, p);
            add_round_key(&mut state, round_key, p);
        }

        linear_layer(&mut state, coefficients, p);
        pasta::feistel_sbox(&mut state, p);
        linear_layer(&mut state, coefficients, p);

        if let Some(noise) = &self.noise {
            for value in &mut state[..block_size - 4] {
                *value = noise.add_noise(*value, p, &mut OsRng);
            }
        }

        add_round_key(&mut state, &round_keys[self.params.rounds], p);

        state.truncate(block_size - 4);
        state
    }
}

fn circulant(block_size: usize) -> Result<&'static [u64]> {
    match block_size {
        16 => Ok(&CIRCULANT_4X4),
        36 => Ok(&CIRCULANT_6X6),
        64 => Ok(&CIRCULANT_8X8),
        _ => Err(Error::ParameterMismatch(format!(
            "unsupported block size {block_size}, expected 16, 36 or 64"
        ))),
    }
}

pub(crate) fn add_round_key(state: &mut [u64], round_key: &[u64], p: u64) {
    for (value, &rk) in state.iter_mut().zip(round_key.iter()) {
        *value = add_mod(*value, rk, p);
    }
}

/// MixColumns followed by MixRows with the shape's circulant.
pub(crate) fn linear_layer(state: &mut [u64], coefficients: &[u64], p: u64) {
    let n = coefficients.len();
    let mut buf = vec![0u64; state.len()];

    // MixColumns: circulant down each column.
    for row in 0..n {
        for col in 0..n {
            let mut acc = 0u64;
            for (k, &c) in coefficients.iter().enumerate() {
                acc += c * state[((row + k) % n) * n + col];
            }
            buf[row * n + col] = acc % p;
        }
    }

    // MixRows: same circulant along each row.
    for row in 0..n {
        for col in 0..n {
            let mut acc = 0u64;
            for (k, &c) in coefficients.iter().enumerate() {
                acc += c * buf[row * n + (col + k) % n];
            }
            state[row * n + col] = acc % p;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use secrecy::SecretBox;

    fn xof_key(params: RubatoParams) -> SymmetricKey {
        let mut xof = FieldXof::shake256(77, 0, params.modulus);
        SecretBox::new(Box::new(xof.vector(params.block_size, true)))
    }

    fn without_noise(params: RubatoParams) -> RubatoParams {
        RubatoParams {
            sigma: 0.0,
            ..params
        }
    }

    #[test]
    fn linear_layer_matches_reference_4x4() {
        let p = 0x3EE_0001;
        let mut state: Vec<u64> = (1..=16).collect();
        let original = state.clone();

        linear_layer(&mut state, &CIRCULANT_4X4, p);

        // Reference: dense circulant matrices applied columns-then-rows.
        let mut columns = vec![0u64; 16];
        for row in 0..4 {
            for col in 0..4 {
                let mut acc = 0;
                for k in 0..4 {
                    acc += CIRCULANT_4X4[k] * original[((row + k) % 4) * 4 + col];
                }
                columns[row * 4 + col] = acc % p;
            }
        }
        let mut expected = vec![0u64; 16];
        for row in 0..4 {
            for col in 0..4 {
                let mut acc = 0;
                for k in 0..4 {
                    acc += CIRCULANT_4X4[k] * columns[row * 4 + (col + k) % 4];
                }
                expected[row * 4 + col] = acc % p;
            }
        }

        assert_eq!(state, expected);
    }

    #[test]
    fn key_stream_drops_last_four_elements() {
        for params in [RUBATO_5_128S, RUBATO_3_128M, RUBATO_2_128L] {
            let cipher = Rubato::new(xof_key(params), without_noise(params)).unwrap();
            assert_eq!(cipher.key_stream(0).len(), params.block_size - 4);
        }
    }

    #[test]
    fn key_stream_is_deterministic_without_noise() {
        let params = without_noise(RUBATO_5_128S);
        let cipher_a = Rubato::new(xof_key(params), params).unwrap();
        let cipher_b = Rubato::new(xof_key(params), params).unwrap();

        assert_eq!(cipher_a.key_stream(3), cipher_b.key_stream(3));
        assert_ne!(cipher_a.key_stream(3), cipher_a.key_stream(4));
    }

    #[test]
    fn noise_perturbs_keystream_within_bound() {
        let params = RUBATO_5_128S;
        let noisy = Rubato::new(xof_key(params), params).unwrap();
        let exact = Rubato::new(xof_key(params), without_noise(params)).unwrap();

        let p = params.modulus;
        let bound = (6.0 * params.sigma).ceil() as u64;
        let noisy_stream = noisy.key_stream(0);
        let exact_stream = exact.key_stream(0);

        for (&a, &b) in noisy_stream.iter().zip(exact_stream.iter()) {
            let diff = u64::min(crate::math::sub_mod(a, b, p), crate::math::sub_mod(b, a, p));
            assert!(diff <= bound, "noise {diff} exceeds bound {bound}");
        }
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let key = SecretBox::new(Box::new(vec![1u64; 3]));

        let err = Rubato::new(key, RUBATO_5_128S).unwrap_err();
        assert_eq!(
            err,
            Error::Key {
                expected: 16,
                got: 3
            }
        );
    }
}
