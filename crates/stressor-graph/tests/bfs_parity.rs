use proptest::prelude::*;
use stressor_graph::{BfsOptions, Graph, MIN_GRAIN, UNREACHED};

fn arbitrary_graph() -> impl Strategy<Value = Graph> {
    (1_usize..600, 0_usize..1500, any::<u64>())
        .prop_map(|(vertices, extra, seed)| Graph::random_connected(vertices, extra, seed))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn parallel_bfs_matches_serial(
        graph in arbitrary_graph(),
        threads in 1_usize..9,
        start_pick in any::<usize>()
    ) {
        let start = start_pick % graph.vertex_count();
        let opts = BfsOptions::new(threads, MIN_GRAIN);
        prop_assert_eq!(graph.parallel_bfs(start, &opts), graph.bfs(start));
    }

    #[test]
    fn bfs_distances_respect_edges(graph in arbitrary_graph()) {
        let dist = graph.bfs(0);
        for u in 0..graph.vertex_count() {
            for &v in graph.neighbors(u) {
                let (du, dv) = (dist[u], dist[v as usize]);
                prop_assert!(du != UNREACHED && dv != UNREACHED);
                let gap = (du - dv).abs();
                prop_assert!(gap <= 1, "edge {}-{} spans {} levels", u, v, gap);
            }
        }
    }
}

#[test]
fn disconnected_components_agree() {
    let mut graph = Graph::new(3000);
    for v in 1..1500 {
        graph.add_edge(0, v);
    }
    for v in 1501..3000 {
        graph.add_edge(1500, v);
    }
    let opts = BfsOptions::new(4, MIN_GRAIN);
    let parallel = graph.parallel_bfs(0, &opts);
    assert_eq!(parallel, graph.bfs(0), "case=disconnected_parity");
    assert_eq!(parallel[1500], UNREACHED, "case=other_component_unreached");
}
