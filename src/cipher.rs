pub mod hera;
pub mod pasta;
pub mod rubato;

pub use hera::Hera;
pub use pasta::Pasta;
pub use rubato::Rubato;

use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::SecretBox;

use crate::math;
use crate::traits::SymmetricKey;

/// Nonce used when the caller does not provide one.
pub const DEFAULT_NONCE: u64 = 123_456_789;

/// Sample `len` uniform elements of `Z_p` from the OS entropy source.
pub(crate) fn random_key(len: usize, modulus: u64) -> SymmetricKey {
    let key = (0..len)
        .map(|_| math::sample_zq(|buf| OsRng.fill_bytes(buf), modulus))
        .collect();
    SecretBox::new(Box::new(key))
}
