use std::num::NonZeroUsize;
use std::thread;

use crate::{Graph, UNREACHED, VisitedBits};

/// Upper bound on worker threads per level.
pub const MAX_THREADS: usize = 128;
/// Default frontier slice handled by one worker.
pub const DEFAULT_GRAIN: usize = 1024;
/// Smallest grain accepted; smaller slices cost more in spawning than they save.
pub const MIN_GRAIN: usize = 256;

/// Tuning knobs for [`Graph::parallel_bfs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BfsOptions {
    threads: usize,
    grain: usize,
}

impl BfsOptions {
    /// Clamp `threads` to `1..=MAX_THREADS` and `grain` to at least
    /// [`MIN_GRAIN`].
    #[must_use]
    pub fn new(threads: usize, grain: usize) -> Self {
        Self {
            threads: threads.clamp(1, MAX_THREADS),
            grain: grain.max(MIN_GRAIN),
        }
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    #[must_use]
    pub fn grain(&self) -> usize {
        self.grain
    }
}

impl Default for BfsOptions {
    fn default() -> Self {
        let cores = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        Self::new(cores.min(32), DEFAULT_GRAIN)
    }
}

impl Graph {
    /// Level-synchronous parallel BFS.
    ///
    /// Each level splits the frontier into `min(threads, ceil(len / grain))`
    /// slices. A single-slice level runs on the calling thread; otherwise
    /// every slice runs on its own scoped thread and fills a private bucket.
    /// Buckets are concatenated into the next frontier once all slices are
    /// joined. Produces the same distances as [`Graph::bfs`].
    #[must_use]
    pub fn parallel_bfs(&self, start: usize, options: &BfsOptions) -> Vec<i32> {
        let n = self.vertex_count();
        let mut dist = vec![UNREACHED; n];
        if start >= n {
            return dist;
        }

        let visited = VisitedBits::new(n);
        visited.mark(start);
        dist[start] = 0;

        let mut frontier = vec![start as u32];
        let mut level = 0;
        loop {
            let tasks = options
                .threads
                .min(frontier.len().div_ceil(options.grain))
                .max(1);

            let next = if tasks == 1 {
                self.expand_slice(&frontier, &visited)
            } else {
                let chunk = frontier.len().div_ceil(tasks);
                let visited = &visited;
                thread::scope(|scope| {
                    let handles: Vec<_> = frontier
                        .chunks(chunk)
                        .map(|slice| scope.spawn(move || self.expand_slice(slice, visited)))
                        .collect();
                    let mut next = Vec::new();
                    for handle in handles {
                        let bucket = handle
                            .join()
                            .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
                        next.extend(bucket);
                    }
                    next
                })
            };

            if next.is_empty() {
                break;
            }
            level += 1;
            for &v in &next {
                dist[v as usize] = level;
            }
            frontier = next;
        }
        dist
    }

    fn expand_slice(&self, slice: &[u32], visited: &VisitedBits) -> Vec<u32> {
        let mut bucket = Vec::with_capacity(slice.len().saturating_mul(2).max(16));
        for &u in slice {
            for &v in self.neighbors(u as usize) {
                if visited.mark(v as usize) {
                    bucket.push(v);
                }
            }
        }
        bucket
    }
}
