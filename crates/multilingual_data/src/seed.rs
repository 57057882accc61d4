//! Scoped, reproducible randomness.
//!
//! Random augmentations (switchout, language-tag sampling) draw from a
//! thread-local generator, the same way worker transforms draw from a
//! per-thread RNG. [`numpy_seed`] temporarily reseeds that generator and puts
//! the previous state back when the returned guard is dropped, so an epoch can
//! be replayed exactly without disturbing randomness used elsewhere.
//!
//! [`SeedGuard`] offers the same contract over an explicitly passed
//! generator for callers that own their RNG.
//!
//! # Example
//! ```ignore
//! let _scope = numpy_seed(Some(seed), &[epoch as u64]);
//! let order = dataset.ordered_indices(Some(&mut ...));
//! // previous thread-local state is restored here
//! ```
//!
//! The thread-local generator is per thread, so concurrent workers never share
//! state. Entering scopes from several threads is therefore safe, but each
//! thread only sees its own scopes.

use crate::hash::stable_hash_u64s;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};

/// Modulus applied to hashed seeds when auxiliary seeds are supplied.
const SEED_MODULUS: u64 = 1_000_000;

/// Tags appended to the epoch so every consumer seeded from the same epoch
/// draws its own stream.
pub mod stream {
    /// Example order and random data filter of one pair.
    pub const INDEX_ORDER: u64 = 0;
    /// Order in which a pair's packed batches are served.
    pub const BATCH_ORDER: u64 = 1;
    /// Language-pair draws of the weighted policies.
    pub const PAIR_DRAW: u64 = 2;
    /// Random transforms of one training step (followed by the step number).
    pub const STEP: u64 = 3;
}

thread_local! {
    /// Thread-local generator used by random transforms.
    static GLOBAL_RNG: RefCell<StdRng> = RefCell::new(StdRng::from_os_rng());
}

/// Combines a seed with auxiliary seeds (epoch, step, shard...).
///
/// Without auxiliary seeds the seed is used verbatim; otherwise the tuple
/// `(seed, aux...)` is hashed with SHA-256 and reduced modulo 1,000,000, so
/// the value survives toolchain upgrades and restarts.
pub fn effective_seed(seed: u64, aux_seeds: &[u64]) -> u64 {
    if aux_seeds.is_empty() {
        return seed;
    }
    let mut values = Vec::with_capacity(aux_seeds.len() + 1);
    values.push(seed);
    values.extend_from_slice(aux_seeds);
    stable_hash_u64s(&values) % SEED_MODULUS
}

/// Runs `f` with mutable access to this thread's generator.
///
/// Do not enter or leave a seed scope from inside `f`.
pub fn with_global_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    GLOBAL_RNG.with(|rng| f(&mut rng.borrow_mut()))
}

/// Guard returned by [`numpy_seed`]; restores the previous thread-local state on drop.
#[must_use = "the seed scope ends as soon as the guard is dropped"]
pub struct SeedScope {
    saved: Option<StdRng>,
}

/// Reseeds the thread-local generator until the returned guard is dropped.
///
/// With `seed = None` this is a no-op. Scopes nest: each guard restores the
/// state that was current when it was created, including when the scope is
/// left by `?` or by a panic unwinding through it.
pub fn numpy_seed(seed: Option<u64>, aux_seeds: &[u64]) -> SeedScope {
    let saved = seed.map(|seed| {
        let seeded = StdRng::seed_from_u64(effective_seed(seed, aux_seeds));
        GLOBAL_RNG.with(|rng| std::mem::replace(&mut *rng.borrow_mut(), seeded))
    });
    SeedScope { saved }
}

impl Drop for SeedScope {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            // try_with: the thread-local may already be gone during thread teardown.
            let _ = GLOBAL_RNG.try_with(|rng| *rng.borrow_mut() = saved);
        }
    }
}

/// Seed scope over a caller-owned generator.
///
/// Dereferences to the generator; on drop the generator is returned to the
/// state it had before the guard was created.
#[must_use = "the seed scope ends as soon as the guard is dropped"]
pub struct SeedGuard<'a> {
    rng: &'a mut StdRng,
    saved: Option<StdRng>,
}

impl<'a> SeedGuard<'a> {
    pub fn enter(rng: &'a mut StdRng, seed: Option<u64>, aux_seeds: &[u64]) -> Self {
        let saved = seed.map(|seed| {
            std::mem::replace(rng, StdRng::seed_from_u64(effective_seed(seed, aux_seeds)))
        });
        Self { rng, saved }
    }
}

impl Deref for SeedGuard<'_> {
    type Target = StdRng;

    fn deref(&self) -> &StdRng {
        self.rng
    }
}

impl DerefMut for SeedGuard<'_> {
    fn deref_mut(&mut self) -> &mut StdRng {
        self.rng
    }
}

impl Drop for SeedGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.rng = saved;
        }
    }
}
