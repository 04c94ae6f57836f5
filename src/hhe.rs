//! HHE orchestrator.
//!
//! Wires parameter selection, FHE key generation, Galois-key sizing,
//! symmetric-key encryption and transciphering into one session object.
//! The client encrypts data with PASTA and ships the small symmetric
//! ciphertext; the server, holding only the homomorphic encryption of
//! the symmetric key, turns it into an FHE ciphertext of the message.

use fhe::bfv::Ciphertext;
use secrecy::ExposeSecret;

use crate::cipher::pasta::PastaParams;
use crate::he::context::{BgvContext, BgvParams, GaloisElements};
use crate::he::pasta::{MatMulStrategy, PastaEvaluator};
use crate::traits::{Error, Result, SymmetricKey};

/// One transciphering session: one FHE key bundle, one symmetric key.
#[derive(Debug)]
pub struct PastaSession {
    context: BgvContext,
    sym_params: PastaParams,
    strategy: MatMulStrategy,
    key_ciphertext: Option<Ciphertext>,
}

impl PastaSession {
    /// Validate parameter compatibility and generate the FHE secret and
    /// relinearization keys.
    ///
    /// # Errors
    ///
    /// Errors if the BGV plain modulus differs from PASTA's prime, the
    /// ring is too small for two half-states, or the BSGS factors do not
    /// multiply to the block size.
    pub fn new(
        sym_params: PastaParams,
        bgv_params: &BgvParams,
        strategy: MatMulStrategy,
    ) -> Result<Self> {
        let context = BgvContext::new(bgv_params)?;
        // Constructing a throwaway evaluator runs every compatibility
        // check; the session keeps only the validated pieces.
        PastaEvaluator::new(&context, sym_params, strategy)?;

        Ok(Self {
            context,
            sym_params,
            strategy,
            key_ciphertext: None,
        })
    }

    #[must_use]
    pub fn sym_params(&self) -> PastaParams {
        self.sym_params
    }

    /// The automorphism set a `msg_len`-element transcipher needs.
    #[must_use]
    pub fn galois_elements(&self, msg_len: usize) -> GaloisElements {
        let evaluator = PastaEvaluator::new(&self.context, self.sym_params, self.strategy)
            .expect("parameters validated at construction");
        evaluator.galois_elements(msg_len)
    }

    /// Size and generate the Galois key bundle for messages of up to
    /// `msg_len` elements. Must run before [`transcipher`](Self::transcipher).
    ///
    /// # Errors
    ///
    /// Errors if the backend rejects key generation.
    pub fn setup_rotations(&mut self, msg_len: usize) -> Result<()> {
        let elements = self.galois_elements(msg_len);
        self.context.generate_rotation_keys(&elements)
    }

    /// Accept the client's symmetric key and store its homomorphic
    /// encryption. Allowed exactly once per session.
    ///
    /// # Errors
    ///
    /// Errors if a key was already installed, or on a backend failure.
    pub fn encrypt_sym_key(&mut self, key: &SymmetricKey) -> Result<()> {
        if self.key_ciphertext.is_some() {
            return Err(Error::ParameterMismatch(
                "symmetric key already installed for this session".to_string(),
            ));
        }
        let evaluator = PastaEvaluator::new(&self.context, self.sym_params, self.strategy)?;
        self.key_ciphertext = Some(evaluator.encrypt_sym_key(key.expose_secret())?);
        Ok(())
    }

    /// Server side: transcipher a symmetric ciphertext into one FHE
    /// ciphertext per block.
    ///
    /// # Errors
    ///
    /// Errors if no symmetric key was installed, the ciphertext is
    /// shorter than one block, or a Galois key is missing.
    pub fn transcipher(&self, nonce: u64, sym_ciphertext: &[u64]) -> Result<Vec<Ciphertext>> {
        let key_ciphertext = self.key_ciphertext.as_ref().ok_or_else(|| {
            Error::Fhe("no encrypted symmetric key; call encrypt_sym_key first".to_string())
        })?;

        let mut evaluator = PastaEvaluator::new(&self.context, self.sym_params, self.strategy)?;
        evaluator.transcipher(nonce, sym_ciphertext, key_ciphertext)
    }

    /// Collapse per-block ciphertexts into a single one (see
    /// [`PastaEvaluator::flatten`]).
    ///
    /// # Errors
    ///
    /// Errors if the blocks do not fit one half or a Galois key is
    /// missing.
    pub fn flatten(&self, blocks: &[Ciphertext]) -> Result<Ciphertext> {
        let evaluator = PastaEvaluator::new(&self.context, self.sym_params, self.strategy)?;
        evaluator.flatten(blocks)
    }

    /// Zero out slots carrying transciphering residue (the negated
    /// second half-state) with a 0/1 mask.
    ///
    /// # Errors
    ///
    /// Errors if the mask does not encode.
    pub fn mask(&self, ciphertext: &Ciphertext, mask: &[u64]) -> Result<Ciphertext> {
        let evaluator = PastaEvaluator::new(&self.context, self.sym_params, self.strategy)?;
        evaluator.mask(ciphertext, mask)
    }

    /// Client side: decrypt the first `len` slots of a transciphered
    /// ciphertext.
    ///
    /// # Errors
    ///
    /// Errors if decryption fails in the backend.
    pub fn decrypt(&self, ciphertext: &Ciphertext, len: usize) -> Result<Vec<u64>> {
        let mut slots = self.context.decrypt(ciphertext)?;
        slots.truncate(len);
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cipher::pasta;

    fn tiny_bgv() -> BgvParams {
        BgvParams {
            degree: 1 << 11,
            plain_modulus: 65_537,
            moduli_sizes: vec![50, 50, 50],
        }
    }

    #[test]
    fn mismatched_plain_modulus_is_rejected() {
        let bgv = BgvParams {
            plain_modulus: 40_961,
            ..tiny_bgv()
        };

        let err = PastaSession::new(pasta::PASTA_4_16, &bgv, MatMulStrategy::Diagonal).unwrap_err();
        assert!(matches!(err, Error::ParameterMismatch(_)));
    }

    #[test]
    fn bad_bsgs_factors_are_rejected() {
        let err = PastaSession::new(
            pasta::PASTA_4_16,
            &tiny_bgv(),
            MatMulStrategy::BabyStepGiantStep { n1: 8, n2: 3 },
        )
        .unwrap_err();
        assert!(matches!(err, Error::ParameterMismatch(_)));
    }

    #[test]
    fn too_few_slots_are_rejected() {
        let bgv = BgvParams {
            degree: 1 << 7,
            ..tiny_bgv()
        };

        let err = PastaSession::new(pasta::PASTA_3_16, &bgv, MatMulStrategy::Diagonal).unwrap_err();
        assert!(matches!(err, Error::ParameterMismatch(_)));
    }

    #[test]
    fn sym_key_is_installed_exactly_once() {
        let mut session =
            PastaSession::new(pasta::PASTA_4_16, &tiny_bgv(), MatMulStrategy::Diagonal).unwrap();
        let key = pasta::generate_key(pasta::PASTA_4_16);

        session.encrypt_sym_key(&key).unwrap();
        assert!(session.encrypt_sym_key(&key).is_err());
    }

    #[test]
    fn transcipher_without_key_is_an_error() {
        let session =
            PastaSession::new(pasta::PASTA_4_16, &tiny_bgv(), MatMulStrategy::Diagonal).unwrap();

        let err = session.transcipher(1, &vec![0; 32]).unwrap_err();
        assert!(matches!(err, Error::Fhe(_)));
    }

    #[test]
    fn galois_elements_cover_bsgs_and_flatten() {
        let session = PastaSession::new(
            pasta::PASTA_4_16,
            &tiny_bgv(),
            MatMulStrategy::BabyStepGiantStep { n1: 8, n2: 4 },
        )
        .unwrap();

        let half = 1 << 10;
        let elements = session.galois_elements(3 * 32);

        assert!(elements.row_swap);
        assert!(elements.rotations.contains(&(half - 1))); // right by one
        assert!(elements.rotations.contains(&32)); // doubling
        for k in 1..4usize {
            assert!(elements.rotations.contains(&(half - k * 8))); // giant steps
        }
        for b in 1..3usize {
            assert!(elements.rotations.contains(&(half - b * 32))); // flatten
        }
    }
}
