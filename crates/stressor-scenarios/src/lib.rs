//! Built-in scenario catalog.

pub mod bfs;
pub mod litmus;

use stressor_harness::ScenarioRegistry;

/// Registry holding every built-in scenario, in listing order.
#[must_use]
pub fn builtin_registry() -> ScenarioRegistry {
    ScenarioRegistry::new()
        .with(bfs::visit_cas_race())
        .with(bfs::buckets_publication_via_queue())
        .with(bfs::visited_bits_mark_race())
        .with(bfs::parallel_bfs_parity())
        .with(litmus::racy_counter())
        .with(litmus::locked_counter())
        .with(litmus::message_passing_relaxed())
        .with(litmus::store_buffering_relaxed())
}
