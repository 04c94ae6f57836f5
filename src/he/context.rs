//! BGV-style homomorphic backend.
//!
//! Thin wrapper around the `fhe` crate's BFV implementation, which
//! provides exactly the contract the transcipher needs: SIMD-batched
//! integer arithmetic modulo the plaintext modulus, ciphertext and
//! plaintext multiplication with relinearization, cyclic rotations within
//! each slot half ("columns"), and the half-swapping row rotation.
//!
//! Rotation amounts are canonicalized to *leftward* column steps in
//! `[1, N/2)`; a rightward rotation by `r` is a leftward rotation by
//! `N/2 - r`. Galois keys exist only for the steps enabled through
//! [`BgvContext::generate_rotation_keys`]; using any other step is a
//! configuration error and surfaces as [`Error::Fhe`].

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use fhe::bfv::{
    BfvParameters, BfvParametersBuilder, Ciphertext, Encoding, EvaluationKey,
    EvaluationKeyBuilder, Plaintext, RelinearizationKey, SecretKey,
};
use fhe_traits::{FheDecoder, FheDecrypter, FheEncoder, FheEncrypter};
use rand_core::{OsRng, TryRngCore};

use crate::traits::{Error, Result};

/// Parameters of the BGV-style scheme.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BgvParams {
    /// Ring degree `N`; also the slot count.
    pub degree: usize,
    /// Plaintext modulus; must equal the symmetric cipher's prime.
    pub plain_modulus: u64,
    /// Bit sizes of the ciphertext modulus chain.
    pub moduli_sizes: Vec<usize>,
}

impl BgvParams {
    /// Parameters sized for PASTA-3 over the 17-bit prime: `N = 2^14`
    /// with a 20-prime chain, enough headroom for three Feistel rounds,
    /// one cube round and four affine layers.
    #[must_use]
    pub fn pasta3_16() -> Self {
        let mut moduli_sizes = vec![47];
        moduli_sizes.resize(20, 34);
        Self {
            degree: 1 << 14,
            plain_modulus: 65_537,
            moduli_sizes,
        }
    }

    /// Parameters sized for PASTA-4 over the 17-bit prime. The smaller
    /// block fits in `N = 2^13` and the extra round still fits the chain.
    #[must_use]
    pub fn pasta4_16() -> Self {
        let mut moduli_sizes = vec![47];
        moduli_sizes.resize(20, 34);
        Self {
            degree: 1 << 13,
            plain_modulus: 65_537,
            moduli_sizes,
        }
    }
}

/// The set of Galois automorphisms a computation needs: leftward column
/// rotation steps, plus the row swap.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GaloisElements {
    pub rotations: BTreeSet<usize>,
    pub row_swap: bool,
}

impl GaloisElements {
    /// Record a signed rotation (positive left, negative right),
    /// canonicalized to a left step; rotations by zero are dropped.
    pub fn insert_signed(&mut self, steps: i64, half: usize) {
        let step = steps.rem_euclid(half as i64) as usize;
        if step != 0 {
            self.rotations.insert(step);
        }
    }
}

impl fmt::Display for GaloisElements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row_swap={}, rotations={:?}", self.row_swap, self.rotations)
    }
}

/// Owns the FHE key material and exposes the evaluation surface.
#[derive(Debug)]
pub struct BgvContext {
    params: Arc<BfvParameters>,
    secret_key: SecretKey,
    relin_key: RelinearizationKey,
    eval_key: Option<EvaluationKey>,
}

impl BgvContext {
    /// Build the scheme and generate secret + relinearization keys.
    ///
    /// Galois keys are *not* generated here: their exact set depends on
    /// the circuit, and must be selected first (see
    /// [`generate_rotation_keys`](Self::generate_rotation_keys)).
    ///
    /// # Errors
    ///
    /// Errors if the backend rejects the parameters.
    pub fn new(params: &BgvParams) -> Result<Self> {
        let bfv_params = BfvParametersBuilder::new()
            .set_degree(params.degree)
            .set_plaintext_modulus(params.plain_modulus)
            .set_moduli_sizes(&params.moduli_sizes)
            .build_arc()
            .map_err(fhe_err)?;

        let secret_key = SecretKey::random(&bfv_params, &mut OsRng.unwrap_err());
        let relin_key =
            RelinearizationKey::new(&secret_key, &mut OsRng.unwrap_err()).map_err(fhe_err)?;

        Ok(Self {
            params: bfv_params,
            secret_key,
            relin_key,
            eval_key: None,
        })
    }

    /// Total slot count `N`.
    #[must_use]
    pub fn slots(&self) -> usize {
        self.params.degree()
    }

    /// Slots per half row, `N / 2`.
    #[must_use]
    pub fn half_slots(&self) -> usize {
        self.params.degree() / 2
    }

    #[must_use]
    pub fn plain_modulus(&self) -> u64 {
        self.params.plaintext()
    }

    #[must_use]
    pub fn has_rotation_keys(&self) -> bool {
        self.eval_key.is_some()
    }

    /// Generate Galois keys for exactly the given automorphism set.
    ///
    /// # Errors
    ///
    /// Errors if the backend rejects a step or key generation fails.
    pub fn generate_rotation_keys(&mut self, elements: &GaloisElements) -> Result<()> {
        let mut builder = EvaluationKeyBuilder::new(&self.secret_key).map_err(fhe_err)?;
        if elements.row_swap {
            builder.enable_row_rotation().map_err(fhe_err)?;
        }
        for &step in &elements.rotations {
            builder.enable_column_rotation(step).map_err(fhe_err)?;
        }
        self.eval_key = Some(builder.build(&mut OsRng.unwrap_err()).map_err(fhe_err)?);
        Ok(())
    }

    /// Encode up to `N` values into the SIMD slots (zero-padded).
    ///
    /// # Errors
    ///
    /// Errors if a value exceeds the plaintext modulus or too many values
    /// are given.
    pub fn encode(&self, values: &[u64]) -> Result<Plaintext> {
        Plaintext::try_encode(values, Encoding::simd(), &self.params).map_err(fhe_err)
    }

    /// # Errors
    ///
    /// Errors if encryption fails in the backend.
    pub fn encrypt(&self, plaintext: &Plaintext) -> Result<Ciphertext> {
        self.secret_key
            .try_encrypt(plaintext, &mut OsRng.unwrap_err())
            .map_err(fhe_err)
    }

    /// Decrypt and decode all `N` slots.
    ///
    /// # Errors
    ///
    /// Errors if decryption or decoding fails in the backend.
    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Vec<u64>> {
        let plaintext = self.secret_key.try_decrypt(ciphertext).map_err(fhe_err)?;
        Vec::<u64>::try_decode(&plaintext, Encoding::simd()).map_err(fhe_err)
    }

    #[must_use]
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        a + b
    }

    #[must_use]
    pub fn add_plain(&self, a: &Ciphertext, b: &Plaintext) -> Ciphertext {
        a + b
    }

    #[must_use]
    pub fn mul_plain(&self, a: &Ciphertext, b: &Plaintext) -> Ciphertext {
        a * b
    }

    #[must_use]
    pub fn negate(&self, a: &Ciphertext) -> Ciphertext {
        -a
    }

    /// Multiply every slot by the same constant.
    ///
    /// # Errors
    ///
    /// Errors if the constant exceeds the plaintext modulus.
    pub fn mul_const(&self, a: &Ciphertext, constant: u64) -> Result<Ciphertext> {
        let plaintext = self.encode(&vec![constant; self.slots()])?;
        Ok(self.mul_plain(a, &plaintext))
    }

    /// Ciphertext product, relinearized back to two components.
    ///
    /// # Errors
    ///
    /// Errors if relinearization fails in the backend.
    pub fn mul_relin(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        let mut product = a * b;
        self.relin_key.relinearizes(&mut product).map_err(fhe_err)?;
        Ok(product)
    }

    /// Rotate every half-row left by `steps` slots (cyclic).
    ///
    /// # Errors
    ///
    /// Errors if no Galois key was generated for this step.
    pub fn rotate_left(&self, a: &Ciphertext, steps: usize) -> Result<Ciphertext> {
        self.eval_key()?
            .rotates_columns_by(a, steps)
            .map_err(fhe_err)
    }

    /// Swap the two halves.
    ///
    /// # Errors
    ///
    /// Errors if the row-swap Galois key was not generated.
    pub fn swap_rows(&self, a: &Ciphertext) -> Result<Ciphertext> {
        self.eval_key()?.rotates_rows(a).map_err(fhe_err)
    }

    fn eval_key(&self) -> Result<&EvaluationKey> {
        self.eval_key.as_ref().ok_or_else(|| {
            Error::Fhe("no Galois keys; call generate_rotation_keys first".to_string())
        })
    }
}

fn fhe_err(error: fhe::Error) -> Error {
    Error::Fhe(error.to_string())
}
