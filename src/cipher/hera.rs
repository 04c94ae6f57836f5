//! HERA stream cipher.
//!
//! Same structural family as Rubato (a 4x4 state mixed by circulant
//! MixColumns/MixRows and keyed through XOF-masked round keys), but with
//! the cube S-box and no masking noise. HERA spends one nonce per block
//! (`nonce_base + block index`) instead of a separate counter.

use secrecy::ExposeSecret;
use sha3::Shake128Reader;

use crate::cipher::rubato::{CIRCULANT_4X4, add_round_key, linear_layer};
use crate::cipher::{self, DEFAULT_NONCE, pasta};
use crate::math::mul_mod;
use crate::traits::{Error, KeyStreamCipher, Result, SymmetricKey};
use crate::xof::FieldXof;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeraParams {
    pub block_size: usize,
    pub modulus: u64,
    pub rounds: usize,
}

/// HERA-4, 28-bit modulus.
pub const HERA_4_28: HeraParams = HeraParams {
    block_size: 16,
    modulus: 268_042_241,
    rounds: 4,
};

/// HERA-4, 25-bit modulus.
pub const HERA_4_25: HeraParams = HeraParams {
    block_size: 16,
    modulus: 33_292_289,
    rounds: 4,
};

/// HERA-5, 28-bit modulus (128-bit security).
pub const HERA_5_28: HeraParams = HeraParams {
    block_size: 16,
    modulus: 268_042_241,
    rounds: 5,
};

/// HERA-5, 25-bit modulus.
pub const HERA_5_25: HeraParams = HeraParams {
    block_size: 16,
    modulus: 33_292_289,
    rounds: 5,
};

/// Generate a fresh uniform HERA key for the parameter set.
#[must_use]
pub fn generate_key(params: HeraParams) -> SymmetricKey {
    cipher::random_key(params.block_size, params.modulus)
}

#[derive(Debug)]
pub struct Hera {
    params: HeraParams,
    key: SymmetricKey,
    nonce_base: u64,
}

impl Hera {
    /// Create a HERA instance with the default nonce base.
    ///
    /// # Errors
    ///
    /// Errors if the key length does not match the parameter set.
    pub fn new(key: SymmetricKey, params: HeraParams) -> Result<Self> {
        Self::with_nonce_base(key, params, DEFAULT_NONCE)
    }

    /// Create a HERA instance with an explicit per-message nonce base;
    /// block `b` uses nonce `nonce_base + b`.
    ///
    /// # Errors
    ///
    /// Errors if the key length does not match the parameter set.
    pub fn with_nonce_base(key: SymmetricKey, params: HeraParams, nonce_base: u64) -> Result<Self> {
        if key.expose_secret().len() != params.block_size {
            return Err(Error::Key {
                expected: params.block_size,
                got: key.expose_secret().len(),
            });
        }
        Ok(Self {
            params,
            key,
            nonce_base,
        })
    }

    #[must_use]
    pub fn params(&self) -> HeraParams {
        self.params
    }
}

impl KeyStreamCipher for Hera {
    fn block_size(&self) -> usize {
        self.params.block_size
    }

    fn modulus(&self) -> u64 {
        self.params.modulus
    }

    fn key_stream(&self, counter: u64) -> Vec<u64> {
        let p = self.params.modulus;
        let block_size = self.params.block_size;
        let key = self.key.expose_secret();

        let mut xof = FieldXof::shake128_nonce_only(self.nonce_base + counter, p);

        // Only the initial and final key additions exist in the schedule;
        // draw exactly those two, in that order.
        let round_key = |xof: &mut FieldXof<Shake128Reader>| -> Vec<u64> {
            key.iter().map(|&k| mul_mod(xof.sample_zq(), k, p)).collect()
        };
        let initial_key = round_key(&mut xof);
        let final_key = round_key(&mut xof);

        let mut state: Vec<u64> = (1..=block_size as u64).collect();

        add_round_key(&mut state, &initial_key, p);
        for _ in 1..self.params.rounds {
            linear_layer(&mut state, &CIRCULANT_4X4, p);
            pasta::cube_sbox(&mut state, p);
        }

        linear_layer(&mut state, &CIRCULANT_4X4, p);
        pasta::cube_sbox(&mut state, p);
        linear_layer(&mut state, &CIRCULANT_4X4, p);
        add_round_key(&mut state, &final_key, p);

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use secrecy::SecretBox;

    fn xof_key(params: HeraParams) -> SymmetricKey {
        let mut xof = FieldXof::shake128(55, 0, params.modulus);
        SecretBox::new(Box::new(xof.vector(params.block_size, true)))
    }

    #[test]
    fn key_stream_is_deterministic() {
        let cipher_a = Hera::new(xof_key(HERA_4_28), HERA_4_28).unwrap();
        let cipher_b = Hera::new(xof_key(HERA_4_28), HERA_4_28).unwrap();

        assert_eq!(cipher_a.key_stream(5), cipher_b.key_stream(5));
        assert_eq!(cipher_a.key_stream(5), cipher_a.key_stream(5));
    }

    #[test]
    fn consecutive_blocks_use_distinct_nonces() {
        let cipher = Hera::new(xof_key(HERA_5_28), HERA_5_28).unwrap();

        assert_ne!(cipher.key_stream(0), cipher.key_stream(1));
    }

    #[test]
    fn nonce_base_shift_aligns_block_streams() {
        // Block b under base n equals block b-1 under base n+1: the nonce
        // is all that seeds the XOF.
        let shifted = Hera::with_nonce_base(xof_key(HERA_4_25), HERA_4_25, DEFAULT_NONCE + 1);
        let cipher = Hera::new(xof_key(HERA_4_25), HERA_4_25).unwrap();

        assert_eq!(cipher.key_stream(1), shifted.unwrap().key_stream(0));
    }

    #[test]
    fn key_stream_spans_the_whole_state() {
        let cipher = Hera::new(xof_key(HERA_4_28), HERA_4_28).unwrap();

        let key_stream = cipher.key_stream(7);
        assert_eq!(key_stream.len(), 16);
        assert!(key_stream.iter().all(|&v| v < HERA_4_28.modulus));
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let key = SecretBox::new(Box::new(vec![1u64; 15]));

        let err = Hera::new(key, HERA_4_28).unwrap_err();
        assert_eq!(
            err,
            Error::Key {
                expected: 16,
                got: 15
            }
        );
    }
}
