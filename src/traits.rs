use std::fmt;

use rayon::prelude::*;
use secrecy::SecretBox;

use crate::math;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    ParameterMismatch(String),
    Key { expected: usize, got: usize },
    ShortCiphertext { expected: usize, got: usize },
    Fhe(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterMismatch(reason) => {
                write!(f, "Symmetric and homomorphic parameters disagree: {reason}")
            }
            Self::Key { expected, got } => write!(
                f,
                "The key does not match the parameter set ({expected} elements expected, got {got})."
            ),
            Self::ShortCiphertext { expected, got } => write!(
                f,
                "The ciphertext is shorter than one block ({expected} elements expected, got {got})."
            ),
            Self::Fhe(reason) => write!(f, "FHE backend failure: {reason}"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Symmetric key material; zeroized on drop.
///
/// Keys are vectors of field elements in `[0, p)`, not raw bytes; the
/// parameter set of the owning cipher fixes their length.
pub type SymmetricKey = SecretBox<Vec<u64>>;

/// Common capability of the FHE-friendly stream ciphers.
///
/// A cipher instance is parameterized at construction from an immutable
/// parameter set and a key. Every block of keystream is derived from the
/// instance nonce and a per-block counter alone, so blocks can be computed
/// independently and in any order.
pub trait KeyStreamCipher: Sync {
    /// Number of plaintext elements covered by one keystream block.
    fn block_size(&self) -> usize;

    /// The plaintext modulus `p`.
    fn modulus(&self) -> u64;

    /// Generate one keystream block for the given block counter.
    ///
    /// Repeated calls with the same counter return identical output
    /// (Rubato being the exception when its noise is enabled).
    fn key_stream(&self, counter: u64) -> Vec<u64>;

    /// Encrypt a vector of field elements.
    ///
    /// Messages shorter than one block are zero-padded, so the ciphertext
    /// is at least one block long.
    #[must_use]
    fn encrypt(&self, plaintext: &[u64]) -> Vec<u64> {
        let block_size = self.block_size();
        let modulus = self.modulus();

        let mut ciphertext = plaintext.to_vec();
        if ciphertext.len() < block_size {
            ciphertext.resize(block_size, 0);
        }
        let num_blocks = ciphertext.len().div_ceil(block_size);

        // Blocks are independent; hand each one its own XOF.
        let key_streams: Vec<Vec<u64>> = (0..num_blocks as u64)
            .into_par_iter()
            .map(|b| self.key_stream(b))
            .collect();

        for (b, key_stream) in key_streams.iter().enumerate() {
            let start = b * block_size;
            let end = usize::min(start + block_size, ciphertext.len());
            for i in start..end {
                ciphertext[i] = math::add_mod(ciphertext[i], key_stream[i - start], modulus);
            }
        }

        ciphertext
    }

    /// Decrypt a vector of field elements.
    ///
    /// # Errors
    ///
    /// Errors if the ciphertext is shorter than one block.
    fn decrypt(&self, ciphertext: &[u64]) -> Result<Vec<u64>> {
        let block_size = self.block_size();
        let modulus = self.modulus();

        if ciphertext.len() < block_size {
            return Err(Error::ShortCiphertext {
                expected: block_size,
                got: ciphertext.len(),
            });
        }

        let num_blocks = ciphertext.len().div_ceil(block_size);
        let key_streams: Vec<Vec<u64>> = (0..num_blocks as u64)
            .into_par_iter()
            .map(|b| self.key_stream(b))
            .collect();

        let mut plaintext = ciphertext.to_vec();
        for (b, key_stream) in key_streams.iter().enumerate() {
            let start = b * block_size;
            let end = usize::min(start + block_size, plaintext.len());
            for i in start..end {
                plaintext[i] = math::sub_mod(plaintext[i], key_stream[i - start], modulus);
            }
        }

        Ok(plaintext)
    }
}
