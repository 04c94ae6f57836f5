//! Hybrid homomorphic encryption.
//!
//! FHE-friendly symmetric stream ciphers (PASTA, HERA, Rubato) and a
//! homomorphic PASTA evaluator that turns symmetric ciphertexts into BGV
//! ciphertexts, so clients ship small ciphertexts and servers lift them
//! into FHE.

pub mod cipher;
pub mod he;
pub mod hhe;
pub mod math;
pub mod traits;
pub mod xof;

pub use cipher::{Hera, Pasta, Rubato};
pub use he::{BgvContext, BgvParams, GaloisElements, MatMulStrategy, PastaEvaluator};
pub use hhe::PastaSession;
pub use traits::*;
