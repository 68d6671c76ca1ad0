//! CP-006: Plan compilation: topological order of a resolved graph.
//!
//! Kahn's algorithm. The ready set is ordered by declaration index, so among
//! nodes whose dependencies are all placed, the earliest declared goes first.
//! The same graph always compiles to the same plan.

use super::error::GraphError;
use super::resolver::ResolvedGraph;
use super::types::Plan;
use std::collections::BTreeSet;

/// Compile a resolved graph into a provisioning plan.
/// Fails with `CyclicDependency` naming one full cycle; never returns a partial plan.
pub fn compile(graph: &ResolvedGraph) -> Result<Plan, GraphError> {
    let ids: Vec<&String> = graph.ids().collect();
    let n = ids.len();

    // Dependencies and dependents by declaration index.
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, id) in ids.iter().enumerate() {
        for dep in graph.dependencies(id) {
            let j = graph
                .index_of(dep)
                .ok_or_else(|| GraphError::UnknownReference {
                    logical_id: (*id).clone(),
                    path: "depends_on".to_string(),
                    target: dep.clone(),
                })?;
            deps[i].push(j);
            dependents[j].push(i);
        }
    }

    let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order: Vec<usize> = Vec::with_capacity(n);

    while let Some(current) = ready.pop_first() {
        order.push(current);
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() != n {
        let cycle = find_cycle(&deps, &in_degree)
            .into_iter()
            .map(|i| ids[i].clone())
            .collect::<Vec<_>>();
        tracing::debug!(?cycle, "plan rejected");
        return Err(GraphError::CyclicDependency { cycle });
    }

    // Wave = longest dependency chain below the node.
    let mut level = vec![0usize; n];
    for &i in &order {
        let depth = deps[i].iter().map(|&j| level[j] + 1).max().unwrap_or(0);
        level[i] = depth;
    }
    let wave_count = level.iter().copied().max().map_or(0, |m| m + 1);
    let mut waves: Vec<Vec<String>> = vec![Vec::new(); wave_count];
    for &i in &order {
        waves[level[i]].push(ids[i].clone());
    }

    let order: Vec<String> = order.into_iter().map(|i| ids[i].clone()).collect();
    tracing::debug!(resources = order.len(), waves = waves.len(), "plan compiled");

    Ok(Plan { order, waves })
}

/// Find one cycle among the nodes Kahn's algorithm could not place.
///
/// Every unplaced node still has an unplaced dependency, so following the
/// earliest-declared unplaced dependency from any unplaced node must revisit
/// a node. The cycle is reported in dependency direction.
fn find_cycle(deps: &[Vec<usize>], in_degree: &[usize]) -> Vec<usize> {
    let stuck = |i: usize| in_degree[i] > 0;
    let Some(start) = (0..deps.len()).find(|&i| stuck(i)) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut seen_at: Vec<Option<usize>> = vec![None; deps.len()];
    let mut current = start;
    loop {
        if let Some(pos) = seen_at[current] {
            return path[pos..].to_vec();
        }
        seen_at[current] = Some(path.len());
        path.push(current);
        match deps[current].iter().copied().filter(|&j| stuck(j)).min() {
            Some(next) => current = next,
            None => return path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::GraphBuilder;
    use crate::core::resolver::resolve;
    use crate::core::types::{Properties, ResourceKind, Value};
    use proptest::prelude::*;

    /// Buckets carry no required properties, handy for shape-only graphs.
    fn graph_of(nodes: &[(&str, &[&str])]) -> ResolvedGraph {
        let mut b = GraphBuilder::new();
        for (id, deps) in nodes {
            b.declare(ResourceKind::Bucket, id, Properties::new(), deps.iter().copied())
                .unwrap();
        }
        resolve(b.build()).unwrap()
    }

    fn assert_topological(graph: &ResolvedGraph, plan: &Plan) {
        assert_eq!(plan.len(), graph.len());
        for id in graph.ids() {
            let pos = plan.position(id).unwrap();
            for dep in graph.dependencies(id) {
                assert!(plan.position(dep).unwrap() < pos, "{dep} must precede {id}");
            }
        }
    }

    #[test]
    fn test_cp006_linear() {
        let g = graph_of(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let plan = compile(&g).unwrap();
        assert_eq!(plan.order, vec!["a", "b", "c"]);
        assert_eq!(plan.waves.len(), 3);
    }

    #[test]
    fn test_cp006_declaration_order_tie_break() {
        // Not alphabetical: declaration order wins.
        let g = graph_of(&[("zeta", &[]), ("alpha", &[]), ("mid", &[])]);
        let plan = compile(&g).unwrap();
        assert_eq!(plan.order, vec!["zeta", "alpha", "mid"]);
        assert_eq!(plan.waves, vec![vec!["zeta", "alpha", "mid"]]);
    }

    #[test]
    fn test_cp006_dependency_declared_later() {
        let g = graph_of(&[("app", &["db"]), ("db", &[])]);
        assert_eq!(compile(&g).unwrap().order, vec!["db", "app"]);
    }

    #[test]
    fn test_cp006_network_scenario() {
        let mut b = GraphBuilder::new();
        b.declare(
            ResourceKind::Vpc,
            "vpc",
            Properties::from([("cidr_block".to_string(), Value::from("10.0.0.0/16"))]),
            Vec::<String>::new(),
        )
        .unwrap();
        b.declare(
            ResourceKind::Subnet,
            "subnet",
            Properties::from([
                ("vpc_id".to_string(), Value::reference("vpc", "id")),
                ("cidr_block".to_string(), Value::from("10.0.1.0/24")),
            ]),
            ["vpc"],
        )
        .unwrap();
        b.declare(
            ResourceKind::InternetGateway,
            "igw",
            Properties::from([("vpc_id".to_string(), Value::reference("vpc", "id"))]),
            ["vpc"],
        )
        .unwrap();
        b.declare(
            ResourceKind::RouteTable,
            "route_table",
            Properties::from([("vpc_id".to_string(), Value::reference("vpc", "id"))]),
            ["vpc", "igw"],
        )
        .unwrap();
        let g = resolve(b.build()).unwrap();
        let plan = compile(&g).unwrap();

        assert_eq!(plan.order[0], "vpc");
        assert_eq!(plan.order[3], "route_table");
        assert!(plan.order[1..3].contains(&"subnet".to_string()));
        assert!(plan.order[1..3].contains(&"igw".to_string()));
        assert_topological(&g, &plan);
        assert_eq!(
            plan.waves,
            vec![vec!["vpc"], vec!["subnet", "igw"], vec!["route_table"]]
        );
    }

    #[test]
    fn test_cp006_diamond() {
        let g = graph_of(&[
            ("top", &[]),
            ("left", &["top"]),
            ("right", &["top"]),
            ("bottom", &["left", "right"]),
        ]);
        let plan = compile(&g).unwrap();
        assert_eq!(plan.order, vec!["top", "left", "right", "bottom"]);
    }

    #[test]
    fn test_cp006_two_node_cycle() {
        let g = graph_of(&[("a", &["b"]), ("b", &["a"])]);
        let err = compile(&g).unwrap_err();
        match err {
            GraphError::CyclicDependency { cycle } => {
                assert_eq!(cycle.len(), 2);
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cp006_cycle_excludes_downstream_nodes() {
        // c depends on the cycle but is not part of it.
        let g = graph_of(&[
            ("root", &[]),
            ("c", &["b"]),
            ("a", &["root", "b"]),
            ("b", &["a"]),
        ]);
        let err = compile(&g).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                cycle: vec!["b".to_string(), "a".to_string()]
            }
        );
        assert_eq!(err.to_string(), "dependency cycle detected: b -> a -> b");
    }

    #[test]
    fn test_cp006_three_node_cycle() {
        let g = graph_of(&[("x", &["z"]), ("y", &["x"]), ("z", &["y"])]);
        match compile(&g).unwrap_err() {
            GraphError::CyclicDependency { cycle } => {
                assert_eq!(cycle, vec!["x", "z", "y"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cp006_self_dependency() {
        let g = graph_of(&[("solo", &["solo"])]);
        assert_eq!(
            compile(&g).unwrap_err(),
            GraphError::CyclicDependency {
                cycle: vec!["solo".to_string()]
            }
        );
    }

    #[test]
    fn test_cp006_empty_graph() {
        let g = graph_of(&[]);
        let plan = compile(&g).unwrap();
        assert!(plan.is_empty());
        assert!(plan.waves.is_empty());
    }

    #[test]
    fn test_cp006_deterministic() {
        let g = graph_of(&[
            ("e", &[]),
            ("d", &["e"]),
            ("c", &[]),
            ("b", &["c", "e"]),
            ("a", &["d", "b"]),
        ]);
        let p1 = compile(&g).unwrap();
        let p2 = compile(&g).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(p1.fingerprint(), p2.fingerprint());
    }

    /// Random DAG: node i may only depend on nodes with a smaller index,
    /// then the declaration order is shuffled by reversing chunks.
    fn arb_dag() -> impl Strategy<Value = (Vec<Vec<usize>>, bool)> {
        (1usize..24)
            .prop_flat_map(|n| {
                let deps = (0..n)
                    .map(|i| proptest::collection::vec(0..i.max(1), 0..=i.min(4)))
                    .collect::<Vec<_>>();
                (deps, any::<bool>())
            })
            .prop_map(|(deps, reverse)| {
                let deps: Vec<Vec<usize>> = deps
                    .into_iter()
                    .enumerate()
                    .map(|(i, ds)| ds.into_iter().filter(|&d| d < i).collect::<Vec<usize>>())
                    .collect();
                (deps, reverse)
            })
    }

    fn build_dag(deps: &[Vec<usize>], reverse: bool) -> ResolvedGraph {
        let mut b = GraphBuilder::new();
        let mut indices: Vec<usize> = (0..deps.len()).collect();
        if reverse {
            indices.reverse();
        }
        for i in indices {
            b.declare(
                ResourceKind::Bucket,
                &format!("n{i}"),
                Properties::new(),
                deps[i].iter().map(|d| format!("n{d}")),
            )
            .unwrap();
        }
        resolve(b.build()).unwrap()
    }

    proptest! {
        #[test]
        fn prop_cp006_every_dependency_precedes((deps, reverse) in arb_dag()) {
            let g = build_dag(&deps, reverse);
            let plan = compile(&g).unwrap();
            let mut sorted = plan.order.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), g.len());
            for id in g.ids() {
                let pos = plan.position(id).unwrap();
                for dep in g.dependencies(id) {
                    prop_assert!(plan.position(dep).unwrap() < pos);
                }
            }
            let waves: usize = plan.waves.iter().map(Vec::len).sum();
            prop_assert_eq!(waves, plan.len());
        }

        #[test]
        fn prop_cp006_compile_is_deterministic((deps, reverse) in arb_dag()) {
            let g = build_dag(&deps, reverse);
            prop_assert_eq!(compile(&g).unwrap(), compile(&g.clone()).unwrap());
        }
    }
}
