//! Homomorphic PASTA evaluator.
//!
//! Reproduces the PASTA round function on a ciphertext that encrypts the
//! symmetric key, turning a symmetric ciphertext into an FHE ciphertext
//! of the same message. The two PASTA half-states ride in the two slot
//! halves of a single ciphertext: the key ciphertext carries `K[..B]` in
//! slots `[0, B)` and `K[B..2B]` in `[N/2, N/2 + B)`, and every round
//! operates on both halves at once.
//!
//! Matrices and round constants are re-drawn from the very same XOF
//! stream the symmetric cipher consumes (`cipher::pasta::round_matrix`),
//! in the same order (matrix 1, matrix 2, constants low then high), so
//! the server reconstructs the keystream circuit without any secret.
//!
//! Outside the two `B`-slot windows every slot stays zero: the matrix
//! diagonals, the round constants and the Feistel mask are all zero
//! there, and mix/cube preserve zeros. The final subtraction therefore
//! yields the message in slots `[0, B)` and only the negated second
//! half-state as residue in the high window.

use fhe::bfv::Ciphertext;

use crate::cipher::pasta::{self, PastaParams};
use crate::he::context::{BgvContext, GaloisElements};
use crate::traits::{Error, Result};
use crate::xof::FieldXof;

/// How the homomorphic matrix–vector product is realized.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatMulStrategy {
    /// One rotation per matrix row: `O(B)` rotations, no extra keys.
    Diagonal,
    /// Baby-step/giant-step split `B = n1 * n2`: `O(n1 + n2)` rotations.
    BabyStepGiantStep { n1: usize, n2: usize },
}

/// One evaluator per task: it owns the in-flight state ciphertext and is
/// not thread-safe across blocks of the same call.
pub struct PastaEvaluator<'a> {
    context: &'a BgvContext,
    params: PastaParams,
    strategy: MatMulStrategy,
    state: Option<Ciphertext>,
}

impl<'a> PastaEvaluator<'a> {
    /// # Errors
    ///
    /// Errors if the symmetric and homomorphic parameters are
    /// incompatible: mismatched moduli, too few slots, or baby/giant
    /// factors that do not multiply to the block size.
    pub fn new(
        context: &'a BgvContext,
        params: PastaParams,
        strategy: MatMulStrategy,
    ) -> Result<Self> {
        if context.plain_modulus() != params.modulus {
            return Err(Error::ParameterMismatch(format!(
                "plain modulus {} != symmetric modulus {}",
                context.plain_modulus(),
                params.modulus
            )));
        }
        if context.slots() < 2 * params.block_size {
            return Err(Error::ParameterMismatch(format!(
                "{} slots cannot hold two {}-element half-states",
                context.slots(),
                params.block_size
            )));
        }
        if let MatMulStrategy::BabyStepGiantStep { n1, n2 } = strategy {
            if n1 * n2 != params.block_size {
                return Err(Error::ParameterMismatch(format!(
                    "baby/giant factors {n1} * {n2} != block size {}",
                    params.block_size
                )));
            }
        }
        Ok(Self {
            context,
            params,
            strategy,
            state: None,
        })
    }

    /// Encrypt the symmetric key with its two halves packed into the two
    /// slot halves.
    ///
    /// # Errors
    ///
    /// Errors if the key length is wrong or the backend fails.
    pub fn encrypt_sym_key(&self, key: &[u64]) -> Result<Ciphertext> {
        let block_size = self.params.block_size;
        if key.len() != self.params.key_size {
            return Err(Error::Key {
                expected: self.params.key_size,
                got: key.len(),
            });
        }

        let half = self.context.half_slots();
        let mut slots = vec![0u64; half + block_size];
        slots[..block_size].copy_from_slice(&key[..block_size]);
        slots[half..].copy_from_slice(&key[block_size..]);

        self.context.encrypt(&self.context.encode(&slots)?)
    }

    /// The exact automorphism set a `transcipher` + `flatten` of a
    /// `msg_len`-element ciphertext performs. Generate Galois keys from
    /// this *before* transciphering.
    #[must_use]
    pub fn galois_elements(&self, msg_len: usize) -> GaloisElements {
        let half = self.context.half_slots();
        let block_size = self.params.block_size;

        let mut elements = GaloisElements {
            row_swap: true, // mix
            ..GaloisElements::default()
        };
        // Rightward single step: Feistel shift, and the per-diagonal walk.
        elements.insert_signed(-1, half);
        // Doubling the state into the top of each half before matmul.
        if 2 * block_size != self.context.slots() {
            elements.insert_signed(block_size as i64, half);
        }
        if let MatMulStrategy::BabyStepGiantStep { n1, n2 } = self.strategy {
            for k in 1..n2 {
                elements.insert_signed(-((k * n1) as i64), half);
            }
        }
        // Flatten shifts block b into slots [b*B, (b+1)*B).
        let num_blocks = msg_len.div_ceil(block_size);
        for b in 1..num_blocks {
            elements.insert_signed(-((b * block_size) as i64), half);
        }
        elements
    }

    /// Transcipher a symmetric ciphertext into one FHE ciphertext per
    /// block, each encrypting the corresponding message block in its
    /// first `B` slots.
    ///
    /// # Errors
    ///
    /// Errors if the symmetric ciphertext is shorter than one block, or
    /// if a required Galois key is missing (configuration error).
    pub fn transcipher(
        &mut self,
        nonce: u64,
        sym_ciphertext: &[u64],
        key_ciphertext: &Ciphertext,
    ) -> Result<Vec<Ciphertext>> {
        let block_size = self.params.block_size;
        if sym_ciphertext.len() < block_size {
            return Err(Error::ShortCiphertext {
                expected: block_size,
                got: sym_ciphertext.len(),
            });
        }

        let num_blocks = sym_ciphertext.len().div_ceil(block_size);
        let mut results = Vec::with_capacity(num_blocks);

        for block in 0..num_blocks {
            self.state = Some(key_ciphertext.clone());
            let mut xof = FieldXof::shake128(nonce, block as u64, self.params.modulus);

            for round in 1..=self.params.rounds {
                self.affine_layer(&mut xof)?;
                if round == self.params.rounds {
                    self.cube_sbox()?;
                } else {
                    self.feistel_sbox()?;
                }
            }
            self.affine_layer(&mut xof)?;

            // state = keystream; message = symmetric ciphertext - keystream.
            let start = block * block_size;
            let end = usize::min(start + block_size, sym_ciphertext.len());
            let block_plaintext = self.context.encode(&sym_ciphertext[start..end])?;

            let state = self.take_state();
            let negated = self.context.negate(&state);
            results.push(self.context.add_plain(&negated, &block_plaintext));
        }

        Ok(results)
    }

    /// Collapse per-block ciphertexts into one whose first
    /// `blocks * B` slots hold the whole message: block `b` is rotated
    /// right by `b * B` and accumulated.
    ///
    /// # Errors
    ///
    /// Errors if the blocks do not fit in one half, or on a missing
    /// Galois key.
    pub fn flatten(&self, blocks: &[Ciphertext]) -> Result<Ciphertext> {
        let block_size = self.params.block_size;
        let half = self.context.half_slots();
        if blocks.is_empty() {
            return Err(Error::ShortCiphertext {
                expected: 1,
                got: 0,
            });
        }
        if blocks.len() * block_size > half {
            return Err(Error::ParameterMismatch(format!(
                "{} blocks of {} elements exceed the {} slots of one half",
                blocks.len(),
                block_size,
                half
            )));
        }

        let mut flattened = blocks[0].clone();
        for (b, block) in blocks.iter().enumerate().skip(1) {
            let rotated = self.rotate_signed(block, -((b * block_size) as i64))?;
            flattened = self.context.add(&flattened, &rotated);
        }
        Ok(flattened)
    }

    /// Multiply by a 0/1 plaintext to zero out slots carrying residue.
    ///
    /// # Errors
    ///
    /// Errors if the mask does not encode.
    pub fn mask(&self, ciphertext: &Ciphertext, mask: &[u64]) -> Result<Ciphertext> {
        let plaintext = self.context.encode(mask)?;
        Ok(self.context.mul_plain(ciphertext, &plaintext))
    }

    /// Matrix multiply, round constants, mix, drawing everything from
    /// the XOF in the symmetric cipher's order.
    fn affine_layer(&mut self, xof: &mut FieldXof<sha3::Shake128Reader>) -> Result<()> {
        let block_size = self.params.block_size;
        let p = self.params.modulus;

        let mat1 = pasta::round_matrix(xof, block_size, p);
        let mat2 = pasta::round_matrix(xof, block_size, p);
        let constants = self.round_constants(xof);

        self.matmul(&mat1, &mat2)?;
        self.add_round_constants(&constants)?;
        self.mix()
    }

    /// The two round-constant vectors, placed in their slot windows.
    fn round_constants(&self, xof: &mut FieldXof<sha3::Shake128Reader>) -> Vec<u64> {
        let block_size = self.params.block_size;
        let half = self.context.half_slots();

        let mut constants = vec![0u64; half + block_size];
        for slot in &mut constants[..block_size] {
            *slot = xof.field_element(true);
        }
        for slot in &mut constants[half..] {
            *slot = xof.field_element(true);
        }
        constants
    }

    fn matmul(&mut self, mat1: &[Vec<u64>], mat2: &[Vec<u64>]) -> Result<()> {
        match self.strategy {
            MatMulStrategy::Diagonal => self.matmul_diagonal(mat1, mat2),
            MatMulStrategy::BabyStepGiantStep { n1, n2 } => self.matmul_bsgs(mat1, mat2, n1, n2),
        }
    }

    /// When the block does not fill a half, copy the state window to the
    /// top of each half so rightward rotations wrap correctly.
    fn double_state(&mut self) -> Result<()> {
        if 2 * self.params.block_size == self.context.slots() {
            return Ok(());
        }
        let state = self.take_state();
        let rotated = self
            .context
            .rotate_left(&state, self.params.block_size)?;
        self.state = Some(self.context.add(&state, &rotated));
        Ok(())
    }

    fn matmul_diagonal(&mut self, mat1: &[Vec<u64>], mat2: &[Vec<u64>]) -> Result<()> {
        let block_size = self.params.block_size;
        self.double_state()?;

        let mut rotated = self.take_state();
        let diagonal = self.encoded_diagonal(mat1, mat2, 0, 0)?;
        let mut sum = self.context.mul_plain(&rotated, &diagonal);

        for i in 1..block_size {
            rotated = self.rotate_signed(&rotated, -1)?;
            let diagonal = self.encoded_diagonal(mat1, mat2, i, 0)?;
            sum = self
                .context
                .add(&sum, &self.context.mul_plain(&rotated, &diagonal));
        }

        self.state = Some(sum);
        Ok(())
    }

    fn matmul_bsgs(
        &mut self,
        mat1: &[Vec<u64>],
        mat2: &[Vec<u64>],
        n1: usize,
        n2: usize,
    ) -> Result<()> {
        self.double_state()?;

        // Baby steps: the state rotated right by 0..n1.
        let mut rotations = Vec::with_capacity(n1);
        rotations.push(self.take_state());
        for j in 1..n1 {
            let next = self.rotate_signed(&rotations[j - 1], -1)?;
            rotations.push(next);
        }

        let mut outer: Option<Ciphertext> = None;
        for k in 0..n2 {
            let mut inner: Option<Ciphertext> = None;
            for (j, rotation) in rotations.iter().enumerate() {
                let diagonal = self.encoded_diagonal(mat1, mat2, k * n1 + j, k * n1)?;
                let term = self.context.mul_plain(rotation, &diagonal);
                inner = Some(match inner {
                    Some(sum) => self.context.add(&sum, &term),
                    None => term,
                });
            }
            let inner = inner.expect("n1 >= 1");

            outer = Some(match outer {
                None => inner,
                Some(sum) => {
                    let rotated = self.rotate_signed(&inner, -((k * n1) as i64))?;
                    self.context.add(&sum, &rotated)
                }
            });
        }

        self.state = Some(outer.expect("n2 >= 1"));
        Ok(())
    }

    /// The `i`-th matrix diagonal, pre-rotated left by `pre_rotation`
    /// within each half (the giant-step alignment; zero for the plain
    /// diagonal method).
    fn encoded_diagonal(
        &self,
        mat1: &[Vec<u64>],
        mat2: &[Vec<u64>],
        i: usize,
        pre_rotation: usize,
    ) -> Result<fhe::bfv::Plaintext> {
        let block_size = self.params.block_size;
        let half = self.context.half_slots();

        let mut low = vec![0u64; half];
        let mut high = vec![0u64; half];
        for j in 0..block_size {
            let column = (j + block_size - i) % block_size;
            low[j] = mat1[j][column];
            high[j] = mat2[j][column];
        }
        if pre_rotation != 0 {
            low.rotate_left(pre_rotation);
            high.rotate_left(pre_rotation);
        }

        low.extend_from_slice(&high);
        self.context.encode(&low)
    }

    fn add_round_constants(&mut self, constants: &[u64]) -> Result<()> {
        let plaintext = self.context.encode(constants)?;
        let state = self.take_state();
        self.state = Some(self.context.add_plain(&state, &plaintext));
        Ok(())
    }

    /// `[s1, s2] <- [2 s1 + s2, s1 + 2 s2]`: add the half-swapped state,
    /// then the original once more.
    fn mix(&mut self) -> Result<()> {
        let state = self.take_state();
        let swapped = self.context.swap_rows(&state)?;
        let sum = self.context.add(&state, &swapped);
        self.state = Some(self.context.add(&state, &sum));
        Ok(())
    }

    /// `s[i] <- s[i] + s[i-1]^2` on both windows: shift right by one,
    /// mask off the window heads and the inter-window residue, square,
    /// add.
    fn feistel_sbox(&mut self) -> Result<()> {
        let block_size = self.params.block_size;
        let half = self.context.half_slots();

        let state = self.take_state();
        let shifted = self.rotate_signed(&state, -1)?;

        let mut mask = vec![0u64; half + block_size];
        for slot in &mut mask[1..block_size] {
            *slot = 1;
        }
        for slot in &mut mask[half + 1..] {
            *slot = 1;
        }
        let mask = self.context.encode(&mask)?;

        let masked = self.context.mul_plain(&shifted, &mask);
        let squared = self.context.mul_relin(&masked, &masked)?;
        self.state = Some(self.context.add(&state, &squared));
        Ok(())
    }

    /// `s <- s^3` as two relinearized multiplications.
    fn cube_sbox(&mut self) -> Result<()> {
        let state = self.take_state();
        let squared = self.context.mul_relin(&state, &state)?;
        self.state = Some(self.context.mul_relin(&squared, &state)?);
        Ok(())
    }

    /// Signed rotation canonicalized to the backend's left steps.
    fn rotate_signed(&self, ciphertext: &Ciphertext, steps: i64) -> Result<Ciphertext> {
        let half = self.context.half_slots() as i64;
        let step = steps.rem_euclid(half) as usize;
        if step == 0 {
            return Ok(ciphertext.clone());
        }
        self.context.rotate_left(ciphertext, step)
    }

    fn take_state(&mut self) -> Ciphertext {
        self.state.take().expect("state ciphertext is in flight")
    }
}
