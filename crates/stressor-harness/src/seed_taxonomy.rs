//! Seed taxonomy for fork-level randomness.
//!
//! Derives distinct purpose-specific seeds from the run's root seed using
//! `H(root_seed || purpose_tag || scope_id)` where `H` is xxh3_64 and the scope
//! is `"<scenario>/fork-<index>"`. A fork running in a worker process derives
//! the same seeds as it would in-process.
//!
//! # Seed Categories
//!
//! - **order**: shuffles the order actor threads are spawned in.
//! - **jitter**: picks the per-actor spin delay after the start gate opens.
//!
//! Seeds only steer how the harness launches actors. The interleavings the
//! platform produces stay nondeterministic.

use xxhash_rust::xxh3::xxh3_64;

const TAG_ORDER: &[u8] = b"order";
const TAG_JITTER: &[u8] = b"jitter";

/// Default root seed when none is configured.
pub const DEFAULT_ROOT_SEED: u64 = 0x5713_E550_0000_0001;

/// Seeds derived for one fork of one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkSeeds {
    /// The root run seed.
    pub root: u64,
    /// Seed for the spawn-order shuffle.
    pub order: u64,
    /// Seed for start jitter.
    pub jitter: u64,
}

impl ForkSeeds {
    #[must_use]
    pub fn derive(root_seed: u64, scenario: &str, fork: u32) -> Self {
        let scope = fork_scope(scenario, fork);
        Self {
            root: root_seed,
            order: derive_seed(root_seed, TAG_ORDER, &scope),
            jitter: derive_seed(root_seed, TAG_JITTER, &scope),
        }
    }
}

fn fork_scope(scenario: &str, fork: u32) -> String {
    format!("{scenario}/fork-{fork}")
}

/// Derive a purpose-specific seed: `H(root_seed_bytes || purpose_tag || scope_id)`.
fn derive_seed(root_seed: u64, purpose_tag: &[u8], scope_id: &str) -> u64 {
    let mut buf = Vec::with_capacity(8 + purpose_tag.len() + scope_id.len());
    buf.extend_from_slice(&root_seed.to_le_bytes());
    buf.extend_from_slice(purpose_tag);
    buf.extend_from_slice(scope_id.as_bytes());
    xxh3_64(&buf)
}
