//! Undirected adjacency-list graph with serial and parallel breadth-first
//! search.
//!
//! This is the subject the built-in stress scenarios exercise: the parallel
//! BFS claims vertices through [`VisitedBits::mark`], a compare-and-swap loop
//! over packed 32-bit words, and publishes each level's discoveries through
//! per-thread buckets.

mod bfs;
mod visited;

pub use bfs::{BfsOptions, DEFAULT_GRAIN, MAX_THREADS, MIN_GRAIN};
pub use visited::VisitedBits;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Distance marker for vertices BFS never reached.
pub const UNREACHED: i32 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    adj: Vec<Vec<u32>>,
    edges: usize,
}

impl Graph {
    #[must_use]
    pub fn new(vertices: usize) -> Self {
        Self {
            adj: vec![Vec::new(); vertices],
            edges: 0,
        }
    }

    /// Random connected graph: a chain over a shuffled vertex order plus
    /// `extra_edges` uniformly random edges (self-loops and parallel edges
    /// allowed, as in the benchmark inputs).
    #[must_use]
    pub fn random_connected(vertices: usize, extra_edges: usize, seed: u64) -> Self {
        let mut graph = Self::new(vertices);
        if vertices == 0 {
            return graph;
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..vertices).collect();
        order.shuffle(&mut rng);
        for pair in order.windows(2) {
            graph.add_edge(pair[0], pair[1]);
        }
        for _ in 0..extra_edges {
            let u = rng.gen_range(0..vertices);
            let v = rng.gen_range(0..vertices);
            graph.add_edge(u, v);
        }
        graph
    }

    /// Add an undirected edge. Out-of-range endpoints are ignored.
    pub fn add_edge(&mut self, u: usize, v: usize) {
        let n = self.adj.len();
        if u >= n || v >= n {
            return;
        }
        self.adj[u].push(v as u32);
        self.adj[v].push(u as u32);
        self.edges += 1;
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.adj.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges
    }

    #[must_use]
    pub fn neighbors(&self, vertex: usize) -> &[u32] {
        self.adj.get(vertex).map_or(&[], Vec::as_slice)
    }

    /// Serial BFS. Returns per-vertex distance from `start`, [`UNREACHED`]
    /// where no path exists. An out-of-range start reaches nothing.
    #[must_use]
    pub fn bfs(&self, start: usize) -> Vec<i32> {
        let n = self.adj.len();
        let mut dist = vec![UNREACHED; n];
        if start >= n {
            return dist;
        }
        let mut queue = std::collections::VecDeque::with_capacity(n.min(1024));
        dist[start] = 0;
        queue.push_back(start);
        while let Some(u) = queue.pop_front() {
            let next = dist[u] + 1;
            for &v in &self.adj[u] {
                let v = v as usize;
                if dist[v] == UNREACHED {
                    dist[v] = next;
                    queue.push_back(v);
                }
            }
        }
        dist
    }
}
