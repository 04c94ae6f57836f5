//! Arithmetic modulo a prime of up to 60 bits, and the samplers feeding it.

use rand_distr::{Distribution, Normal};

/// `(a + b) mod p`.
///
/// Sound for any `a, b < p` with `p` up to 63 bits.
#[inline]
#[must_use]
pub fn add_mod(a: u64, b: u64, p: u64) -> u64 {
    debug_assert!(a < p && b < p);
    let sum = a + b;
    if sum >= p { sum - p } else { sum }
}

/// `(a - b) mod p`, borrowing across the modulus.
#[inline]
#[must_use]
pub fn sub_mod(a: u64, b: u64, p: u64) -> u64 {
    debug_assert!(a < p && b < p);
    if b > a { a + p - b } else { a - b }
}

/// `(a * b) mod p`.
///
/// The product of two 60-bit operands does not fit in 64 bits; go through
/// a 128-bit intermediate.
#[inline]
#[must_use]
pub fn mul_mod(a: u64, b: u64, p: u64) -> u64 {
    (u128::from(a) * u128::from(b) % u128::from(p)) as u64
}

/// Number of bits needed to represent values in `[0, p)`, i.e. `ceil(log2 p)`.
#[inline]
#[must_use]
pub fn bit_len(p: u64) -> u32 {
    u64::BITS - (p - 1).leading_zeros()
}

/// Uniform rejection sampler over `[0, q)`.
///
/// Reads `ceil(bit_len(q) / 8)` bytes from the source, masks the top byte
/// down to exactly `bit_len(q)` bits, interprets the result little-endian,
/// and retries on `>= q`. Uniform as long as the byte source is; terminates
/// with probability 1 (each draw succeeds with probability > 1/2).
pub fn sample_zq<F>(mut read_bytes: F, q: u64) -> u64
where
    F: FnMut(&mut [u8]),
{
    let bit_len = bit_len(q);
    let byte_len = bit_len.div_ceil(8) as usize;
    let mut top_bits = bit_len % 8;
    if top_bits == 0 {
        top_bits = 8;
    }

    let mut bytes = [0u8; 8];
    loop {
        read_bytes(&mut bytes[..byte_len]);
        bytes[byte_len - 1] &= ((1u16 << top_bits) - 1) as u8;

        let mut res = 0u64;
        for (i, &byte) in bytes[..byte_len].iter().enumerate() {
            res |= u64::from(byte) << (8 * i);
        }

        if res < q {
            return res;
        }
    }
}

/// Discrete Gaussian with standard deviation `sigma`, truncated to
/// `[-6 sigma, 6 sigma]` by rejection.
#[derive(Debug)]
pub struct GaussianSampler {
    normal: Normal<f64>,
    bound: f64,
}

impl GaussianSampler {
    /// # Panics
    ///
    /// Panics if `sigma` is not finite and strictly positive.
    #[must_use]
    pub fn new(sigma: f64) -> Self {
        assert!(
            sigma.is_finite() && sigma > 0.0,
            "sigma must be a positive standard deviation"
        );
        Self {
            normal: Normal::new(0.0, sigma).expect("sigma is finite and positive"),
            bound: 6.0 * sigma,
        }
    }

    /// Draw one noise value, rounded to the nearest integer.
    pub fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        loop {
            let x = self.normal.sample(rng);
            if x.abs() <= self.bound {
                return x.round() as i64;
            }
        }
    }

    /// `(value + noise) mod p` for a signed noise of magnitude far below `p`.
    pub fn add_noise<R: rand::Rng + ?Sized>(&self, value: u64, p: u64, rng: &mut R) -> u64 {
        let noise = self.sample(rng);
        if noise >= 0 {
            add_mod(value, noise as u64 % p, p)
        } else {
            sub_mod(value, noise.unsigned_abs() % p, p)
        }
    }
}
