//! The random source is an external collaborator: the core
//! never owns the OS RNG, it only asks a `RandomSource` to fill bytes or
//! to hand back an independent sub-generator.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rand_core::OsRng;

pub trait RandomSource {
    /// Fill `buf` with random bytes.
    fn fill_bytes(&mut self, buf: &mut [u8]);

    /// Derive an independent sub-generator seeded with `k` random bytes.
    fn child(&mut self, seed_len: usize) -> StdRng {
        let mut seed = vec![0u8; seed_len];
        self.fill_bytes(&mut seed);
        let mut seed32 = [0u8; 32];
        let n = seed32.len().min(seed.len());
        seed32[..n].copy_from_slice(&seed[..n]);
        StdRng::from_seed(seed32)
    }
}

/// Default `RandomSource` over the OS CSPRNG, matching the use of
/// `OsRng`/`StdRng::from_os_rng()` in `jolokia`'s `cipher/chacha.rs` and
/// `cipher/hpke.rs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn fill_bytes(&mut self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}
