//! SHAKE-backed deterministic field-element streams.
//!
//! Round matrices, round constants, and round keys are all drawn from a
//! SHAKE instance seeded with `(nonce ‖ counter)`. The symmetric ciphers
//! and the homomorphic evaluator share this module, and both consume the
//! stream in the same fixed order; that is what keeps the client and the
//! server in lock-step.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::{Shake128, Shake128Reader, Shake256, Shake256Reader};

use crate::math;

/// A stream of uniform `Z_p` elements squeezed out of a SHAKE sponge.
pub struct FieldXof<R> {
    reader: R,
    modulus: u64,
    mask: u64,
}

impl FieldXof<Shake128Reader> {
    /// SHAKE-128 seeded with big-endian `nonce` then `counter` (PASTA).
    #[must_use]
    pub fn shake128(nonce: u64, counter: u64, modulus: u64) -> Self {
        let mut sponge = Shake128::default();
        sponge.update(&nonce.to_be_bytes());
        sponge.update(&counter.to_be_bytes());
        Self::new(sponge.finalize_xof(), modulus)
    }

    /// SHAKE-128 seeded with a big-endian nonce alone (HERA derives one
    /// nonce per block instead of using a counter).
    #[must_use]
    pub fn shake128_nonce_only(nonce: u64, modulus: u64) -> Self {
        let mut sponge = Shake128::default();
        sponge.update(&nonce.to_be_bytes());
        Self::new(sponge.finalize_xof(), modulus)
    }
}

impl FieldXof<Shake256Reader> {
    /// SHAKE-256 seeded with big-endian `nonce` then `counter` (Rubato).
    #[must_use]
    pub fn shake256(nonce: u64, counter: u64, modulus: u64) -> Self {
        let mut sponge = Shake256::default();
        sponge.update(&nonce.to_be_bytes());
        sponge.update(&counter.to_be_bytes());
        Self::new(sponge.finalize_xof(), modulus)
    }
}

impl<R: XofReader> FieldXof<R> {
    fn new(reader: R, modulus: u64) -> Self {
        let mask = if math::bit_len(modulus) == 64 {
            u64::MAX
        } else {
            (1u64 << math::bit_len(modulus)) - 1
        };
        Self {
            reader,
            modulus,
            mask,
        }
    }

    #[must_use]
    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    /// Squeeze one field element.
    ///
    /// Eight bytes are squeezed into a big-endian `u64`, masked down to the
    /// modulus bit length, and rejected on `>= p` (or on zero when
    /// `allow_zero` is false). No reseeding between elements.
    pub fn field_element(&mut self, allow_zero: bool) -> u64 {
        let mut bytes = [0u8; 8];
        loop {
            self.reader.read(&mut bytes);
            let element = u64::from_be_bytes(bytes) & self.mask;

            if !allow_zero && element == 0 {
                continue;
            }
            if element < self.modulus {
                return element;
            }
        }
    }

    /// Squeeze a vector of `len` field elements.
    pub fn vector(&mut self, len: usize, allow_zero: bool) -> Vec<u64> {
        (0..len).map(|_| self.field_element(allow_zero)).collect()
    }

    /// Draw through the byte-level rejection sampler instead of the
    /// element extractor (Rubato's round keys are specified this way).
    pub fn sample_zq(&mut self) -> u64 {
        let reader = &mut self.reader;
        math::sample_zq(|buf| reader.read(buf), self.modulus)
    }
}
