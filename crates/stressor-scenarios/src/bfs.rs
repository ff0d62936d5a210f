//! Races from the parallel BFS: claiming a vertex and publishing a level's
//! bucket to the next one.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crossbeam_deque::{Injector, Steal};
use stressor_graph::{BfsOptions, Graph, MIN_GRAIN, UNREACHED, VisitedBits};
use stressor_harness::ScenarioDef;
use stressor_types::{Expect, Outcome};

/// BFS level the racing actors are expanding.
const LEVEL: i32 = 0;
/// Vertex both actors try to claim.
const TARGET: usize = 1;

/// Distance slots of a two-vertex graph: the start at 0, `TARGET` unreached.
pub struct DistSlots {
    dist: [AtomicI32; 2],
}

impl DistSlots {
    fn new() -> Self {
        Self {
            dist: [AtomicI32::new(0), AtomicI32::new(UNREACHED)],
        }
    }

    /// Check-then-CAS visit used by the BFS expansion step.
    fn try_visit(&self) -> i64 {
        let slot = &self.dist[TARGET];
        let won = slot.load(Ordering::SeqCst) == UNREACHED
            && slot
                .compare_exchange(UNREACHED, LEVEL + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
        i64::from(won)
    }
}

pub fn visit_cas_race() -> ScenarioDef<DistSlots> {
    ScenarioDef::new("visit_cas_race", DistSlots::new)
        .describe("two expanders race to set the distance of the same unreached vertex")
        .actor(DistSlots::try_visit)
        .actor(DistSlots::try_visit)
        .expect([1, 0], Expect::Acceptable, "first actor claimed it")
        .expect([0, 1], Expect::Acceptable, "second actor claimed it")
        .expect([1, 1], Expect::Forbidden, "both claims went through")
        .expect([0, 0], Expect::Forbidden, "nobody claimed the vertex")
}

pub fn visited_bits_mark_race() -> ScenarioDef<VisitedBits> {
    const VERTEX: usize = 37;
    ScenarioDef::new("visited_bits_mark_race", || VisitedBits::new(64))
        .describe("two threads mark the same vertex in the packed visited set")
        .actor(|bits| i64::from(bits.mark(VERTEX)))
        .actor(|bits| i64::from(bits.mark(VERTEX)))
        .expect([1, 0], Expect::Acceptable, "first actor won the mark")
        .expect([0, 1], Expect::Acceptable, "second actor won the mark")
        .otherwise(Expect::Forbidden, "zero or two winners")
}

/// A level's bucket handed to the next level through a concurrent queue.
pub struct BucketHandoff {
    bucket_ready: AtomicBool,
    queue: Injector<u32>,
}

impl BucketHandoff {
    fn new() -> Self {
        Self {
            bucket_ready: AtomicBool::new(false),
            queue: Injector::new(),
        }
    }

    fn publish(&self) -> i64 {
        // The queue push is the only ordering between this store and the reader.
        self.bucket_ready.store(true, Ordering::Relaxed);
        self.queue.push(1);
        0
    }

    fn consume(&self) -> i64 {
        loop {
            match self.queue.steal() {
                Steal::Success(_) => {
                    return i64::from(self.bucket_ready.load(Ordering::Relaxed));
                }
                Steal::Empty => return -1,
                Steal::Retry => {}
            }
        }
    }
}

pub fn buckets_publication_via_queue() -> ScenarioDef<BucketHandoff> {
    ScenarioDef::new("buckets_publication_via_queue", BucketHandoff::new)
        .describe("bucket written before its marker is queued must be visible to the consumer")
        .actor(BucketHandoff::publish)
        .actor(BucketHandoff::consume)
        .extract(2, |_, results| Outcome::from(results[1]))
        .expect(1, Expect::Acceptable, "marker and bucket both visible")
        .expect(-1, Expect::Acceptable, "marker not received yet")
        .expect(0, Expect::Forbidden, "marker seen, bucket missing")
}

/// Input for the parity scenario. Every trial works on its own copy.
#[derive(Clone)]
pub struct BfsFixture {
    graph: Graph,
    expected: Vec<i32>,
    options: BfsOptions,
}

impl BfsFixture {
    #[must_use]
    pub fn new(graph: Graph, options: BfsOptions) -> Self {
        let expected = graph.bfs(0);
        Self {
            graph,
            expected,
            options,
        }
    }

    fn matches_serial(&self) -> i64 {
        i64::from(self.graph.parallel_bfs(0, &self.options) == self.expected)
    }
}

pub fn parallel_bfs_parity() -> ScenarioDef<BfsFixture> {
    // 4096 vertices at the minimum grain gives multi-slice levels.
    let template = BfsFixture::new(
        Graph::random_connected(4_096, 12_288, 0x00BF_5EED),
        BfsOptions::new(4, MIN_GRAIN),
    );
    ScenarioDef::new("parallel_bfs_parity", move || template.clone())
        .describe("parallel BFS distances equal serial BFS distances")
        .actor(BfsFixture::matches_serial)
        .expect(1, Expect::Acceptable, "distances match")
        .expect(0, Expect::Forbidden, "parallel BFS diverged from serial")
}
