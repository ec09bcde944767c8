//! Given a set of endpoints, a bandwidth function over them, and a topology, produce a
//! tree connecting the endpoints and a delegated request per inferior network the tree
//! touches.

use crate::bandwidth::{BandwidthError, BandwidthFunction};
use crate::error::ErrorKind;
use crate::goalset::{GoalSet, GoalSetError};
use crate::stability::{StabilityDetector, StabilityProfile};
use crate::topology::{GlobalTerminal, InferiorId, LocalTerminalId, Topology};
use crate::trunk::TrunkError;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use thiserror::Error;

/// Errors raised while planning a tree.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Fewer than two endpoints were given.
    #[error("a tree needs at least two endpoints, got {0}")]
    TooFewEndpoints(usize),
    /// One of the requested endpoints has no node in the topology.
    #[error("endpoint {0:?} has no node in the topology")]
    MissingEndpoint(GlobalTerminal),
    /// No tree connects all endpoints once capacity-exceeding edges are pruned.
    #[error("no tree connects all endpoints; endpoint {unreachable:?} is unreachable from {from:?}")]
    NoTreeFound {
        /// The endpoint planning started reconciling from.
        from: GlobalTerminal,
        /// The endpoint that could not be reached.
        unreachable: GlobalTerminal,
    },
    /// A bandwidth-function operation failed while reducing or tabulating.
    #[error("bandwidth error: {0}")]
    Bandwidth(#[from] BandwidthError),
    /// A goal-set operation failed while computing delegated groups.
    #[error("goal set error: {0}")]
    GoalSet(#[from] GoalSetError),
    /// Label allocation failed on a trunk crossed by the tree.
    #[error("trunk error: {0}")]
    Trunk(#[from] TrunkError),
}

impl PlannerError {
    /// Map this error into its coarse, caller-facing kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlannerError::TooFewEndpoints(_) => ErrorKind::InvalidArgument,
            PlannerError::MissingEndpoint(_) => ErrorKind::NotFound,
            PlannerError::NoTreeFound { .. } => ErrorKind::CapacityExhausted,
            PlannerError::Bandwidth(e) => e.kind(),
            PlannerError::GoalSet(e) => e.kind(),
            PlannerError::Trunk(e) => e.kind(),
        }
    }
}

/// A reduced, tabulated bandwidth function to hand to one inferior network, together
/// with the ordered list of that inferior's terminals the tree uses (`terminals[i]`
/// backs reduced index `i`).
#[derive(Debug, Clone)]
pub struct DelegatedRequest {
    /// The inferior network this request is delegated to.
    pub inferior: InferiorId,
    /// Terminals of that inferior appearing in the tree, in reduction order.
    pub terminals: Vec<LocalTerminalId>,
    /// The reduced, tabulated bandwidth function for this inferior.
    pub function: BandwidthFunction,
}

/// One label pair allocated from a trunk crossed by the tree.
#[derive(Debug, Clone)]
pub struct TrunkLabelAssignment {
    /// One endpoint of the trunk edge in the tree.
    pub a: GlobalTerminal,
    /// The other endpoint.
    pub b: GlobalTerminal,
    /// Label allocated on the `a` side.
    pub start_label: u32,
    /// Label allocated on the `b` side.
    pub end_label: u32,
}

/// The result of a successful planning run.
#[derive(Debug, Clone)]
pub struct PlanResult {
    /// One delegated request per inferior network the tree touches.
    pub delegated: Vec<DelegatedRequest>,
    /// Label assignments for every trunk edge the tree crosses.
    pub labels: Vec<TrunkLabelAssignment>,
}

/// Plans a tree connecting a set of endpoints over a [`Topology`], delegating a
/// reduced bandwidth function to each inferior network the tree touches.
pub struct TreePlanner;

impl TreePlanner {
    /// Plan a tree for `endpoints` under bandwidth function `bandwidth` (whose degree
    /// must equal `endpoints.len()`) over `topology`. `tabulation_threshold` is passed
    /// through to [`BandwidthFunction::tabulate`]. `stability_profiles`/`decay`
    /// configure the detector used to decide when iterative pruning has converged.
    pub fn plan(
        topology: &Topology,
        endpoints: &[GlobalTerminal],
        bandwidth: &BandwidthFunction,
        tabulation_threshold: usize,
        stability_profiles: Vec<StabilityProfile>,
        decay: f64,
    ) -> Result<PlanResult, PlannerError> {
        if endpoints.len() < 2 {
            return Err(PlannerError::TooFewEndpoints(endpoints.len()));
        }
        let endpoint_nodes: Vec<NodeIndex> = endpoints
            .iter()
            .map(|t| topology.node_for(*t).ok_or(PlannerError::MissingEndpoint(*t)))
            .collect::<Result<_, _>>()?;

        let removed = prune(topology, endpoints, &endpoint_nodes, bandwidth, stability_profiles, decay)?;

        let shortest = endpoint_nodes
            .iter()
            .map(|&n| dijkstra_with_predecessors(topology, n, &removed))
            .collect::<Vec<_>>();

        let tree = build_tree(topology, &endpoint_nodes, &shortest)?;

        let delegated = delegate(topology, endpoints, &tree, bandwidth, tabulation_threshold)?;
        let labels = assign_labels(topology, &tree)?;

        Ok(PlanResult { delegated, labels })
    }
}

/// A Dijkstra run from one source: distance and predecessor edge per reached node.
struct ShortestPaths {
    dist: HashMap<NodeIndex, f64>,
    pred: HashMap<NodeIndex, (NodeIndex, EdgeIndex)>,
}

#[derive(PartialEq)]
struct HeapItem(f64, NodeIndex);

impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.partial_cmp(&self.0).unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn dijkstra_with_predecessors(
    topology: &Topology,
    source: NodeIndex,
    removed: &HashSet<EdgeIndex>,
) -> ShortestPaths {
    let mut dist = HashMap::new();
    let mut pred = HashMap::new();
    let mut heap = BinaryHeap::new();
    dist.insert(source, 0.0);
    heap.push(HeapItem(0.0, source));
    while let Some(HeapItem(d, node)) = heap.pop() {
        if d > *dist.get(&node).unwrap_or(&f64::INFINITY) {
            continue;
        }
        for edge in topology.graph().edges(node) {
            if removed.contains(&edge.id()) {
                continue;
            }
            let next = if edge.source() == node { edge.target() } else { edge.source() };
            let nd = d + edge.weight().cost;
            if nd < *dist.get(&next).unwrap_or(&f64::INFINITY) {
                dist.insert(next, nd);
                pred.insert(next, (node, edge.id()));
                heap.push(HeapItem(nd, next));
            }
        }
    }
    ShortestPaths { dist, pred }
}

/// Partitions `endpoints` (by node) into those reachable from `endpoint_nodes[0]`
/// within `reachable_from_source` versus the rest, used only to build a useful error
/// when no tree exists.
fn prune(
    topology: &Topology,
    endpoints: &[GlobalTerminal],
    endpoint_nodes: &[NodeIndex],
    bandwidth: &BandwidthFunction,
    profiles: Vec<StabilityProfile>,
    decay: f64,
) -> Result<HashSet<EdgeIndex>, PlannerError> {
    let mut removed: HashSet<EdgeIndex> = HashSet::new();
    let mut detector = StabilityDetector::new(profiles, decay);
    let max_passes = topology.graph().edge_count() + 1;
    for _ in 0..max_passes {
        let mut removed_this_pass = 0usize;
        let mut residual_slack_sum = 0.0f64;
        let trunk_edges: Vec<EdgeIndex> = topology
            .graph()
            .edge_indices()
            .filter(|e| !removed.contains(e))
            .filter(|e| topology.graph()[*e].trunk.is_some())
            .collect();
        for edge_idx in trunk_edges {
            let edge = &topology.graph()[edge_idx];
            let trunk = match &edge.trunk {
                Some(t) => t.clone(),
                None => continue,
            };
            let (ep, ep_complement) = match cut_endpoints(topology, endpoint_nodes, edge_idx, &removed) {
                Some(parts) => parts,
                None => continue,
            };
            if ep.is_empty() || ep_complement.is_empty() {
                continue;
            }
            let s = GoalSet::from_indices(endpoints.len(), ep)?;
            let (forward, reverse) = bandwidth.get_pair(&s)?;
            if forward.min() > trunk.upstream_capacity() || reverse.min() > trunk.downstream_capacity() {
                removed.insert(edge_idx);
                removed_this_pass += 1;
            } else {
                let upstream_slack = trunk.upstream_capacity() - forward.min();
                let downstream_slack = trunk.downstream_capacity() - reverse.min();
                residual_slack_sum += upstream_slack.min(downstream_slack);
            }
        }
        // Sample the sum of residual slack across surviving trunk edges: a pruned
        // graph that keeps removing the same marginal edges pass after pass never
        // settles this sum, while a converged one holds it steady within the
        // detector's envelope.
        detector.sample(residual_slack_sum);
        if removed_this_pass == 0 || detector.is_stable() {
            break;
        }
    }
    Ok(removed)
}

/// If removing `edge` from the graph (minus `removed`) splits the endpoints into two
/// non-empty groups, return their indices into `endpoint_nodes` (one side, and the
/// other). Returns `None` if removing the edge doesn't cut any endpoints apart.
fn cut_endpoints(
    topology: &Topology,
    endpoint_nodes: &[NodeIndex],
    edge: EdgeIndex,
    removed: &HashSet<EdgeIndex>,
) -> Option<(Vec<usize>, Vec<usize>)> {
    let mut skip = removed.clone();
    skip.insert(edge);
    let first = endpoint_nodes[0];
    let reachable = reachable_set(topology, first, &skip);
    let mut side = Vec::new();
    let mut other = Vec::new();
    for (i, &n) in endpoint_nodes.iter().enumerate() {
        if reachable.contains(&n) {
            side.push(i);
        } else {
            other.push(i);
        }
    }
    if other.is_empty() {
        None
    } else {
        Some((side, other))
    }
}

fn reachable_set(topology: &Topology, from: NodeIndex, removed: &HashSet<EdgeIndex>) -> HashSet<NodeIndex> {
    let mut seen = HashSet::new();
    let mut stack = vec![from];
    seen.insert(from);
    while let Some(node) = stack.pop() {
        for edge in topology.graph().edges(node) {
            if removed.contains(&edge.id()) {
                continue;
            }
            let next = if edge.source() == node { edge.target() } else { edge.source() };
            if seen.insert(next) {
                stack.push(next);
            }
        }
    }
    seen
}

/// A minimal spanning tree over the global terminal graph, expressed as the set of
/// edges (by the pair of original topology nodes they connect) and the nodes touched.
struct Tree {
    nodes: HashSet<NodeIndex>,
    edges: Vec<(NodeIndex, NodeIndex)>,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        UnionFind { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            false
        } else {
            self.parent[ra] = rb;
            true
        }
    }
}

fn build_tree(
    topology: &Topology,
    endpoint_nodes: &[NodeIndex],
    shortest: &[ShortestPaths],
) -> Result<Tree, PlannerError> {
    let k = endpoint_nodes.len();
    // Metric-closure MST: a well-known 2-approximation for the Steiner tree problem.
    let mut candidate_edges = Vec::new();
    for i in 0..k {
        for j in (i + 1)..k {
            match shortest[i].dist.get(&endpoint_nodes[j]) {
                Some(&d) => candidate_edges.push((d, i, j)),
                None => {
                    return Err(PlannerError::NoTreeFound {
                        from: topology.terminal_of(endpoint_nodes[i]),
                        unreachable: topology.terminal_of(endpoint_nodes[j]),
                    })
                }
            }
        }
    }
    candidate_edges.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| endpoint_nodes[a.1].index().cmp(&endpoint_nodes[b.1].index()))
            .then_with(|| endpoint_nodes[a.2].index().cmp(&endpoint_nodes[b.2].index()))
    });

    let mut uf = UnionFind::new(k);
    let mut tree_edges: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
    let mut tree_nodes: HashSet<NodeIndex> = HashSet::new();
    for (_, i, j) in candidate_edges {
        if uf.union(i, j) {
            // Walk the predecessor chain from j back to i, collecting actual edges.
            let mut cur = endpoint_nodes[j];
            tree_nodes.insert(cur);
            while cur != endpoint_nodes[i] {
                let (prev, _edge_idx) = shortest[i].pred[&cur];
                let key = if cur.index() < prev.index() { (cur, prev) } else { (prev, cur) };
                tree_edges.insert(key);
                tree_nodes.insert(prev);
                cur = prev;
            }
        }
    }

    // The union of shortest paths may contain redundant edges forming cycles where
    // paths share sub-trees; re-extract a genuine spanning tree by BFS over that
    // subgraph so delegated-group computation sees a tree, not a general graph.
    let adjacency: HashMap<NodeIndex, Vec<NodeIndex>> = {
        let mut m: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for &(a, b) in &tree_edges {
            m.entry(a).or_default().push(b);
            m.entry(b).or_default().push(a);
        }
        m
    };
    let root = endpoint_nodes[0];
    let mut visited = HashSet::new();
    let mut spanning_edges = Vec::new();
    let mut stack = vec![root];
    visited.insert(root);
    while let Some(node) = stack.pop() {
        if let Some(neighbors) = adjacency.get(&node) {
            for &next in neighbors {
                if visited.insert(next) {
                    spanning_edges.push((node, next));
                    stack.push(next);
                }
            }
        }
    }

    Ok(Tree { nodes: visited, edges: spanning_edges })
}

fn delegate(
    topology: &Topology,
    endpoints: &[GlobalTerminal],
    tree: &Tree,
    bandwidth: &BandwidthFunction,
    tabulation_threshold: usize,
) -> Result<Vec<DelegatedRequest>, PlannerError> {
    let adjacency: HashMap<NodeIndex, Vec<NodeIndex>> = {
        let mut m: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for &(a, b) in &tree.edges {
            m.entry(a).or_default().push(b);
            m.entry(b).or_default().push(a);
        }
        m
    };

    let mut by_inferior: HashMap<InferiorId, Vec<NodeIndex>> = HashMap::new();
    for &node in &tree.nodes {
        let terminal = topology.terminal_of(node);
        by_inferior.entry(terminal.inferior).or_default().push(node);
    }

    let mut delegated = Vec::new();
    for (inferior, mut nodes) in by_inferior {
        nodes.sort_by_key(|n| topology.terminal_of(*n).local);
        let mut groups = Vec::with_capacity(nodes.len());
        let mut terminals = Vec::with_capacity(nodes.len());
        for &this_node in &nodes {
            let others: HashSet<NodeIndex> =
                nodes.iter().copied().filter(|&n| n != this_node).collect();
            let component = component_excluding(&adjacency, this_node, &others);
            let mut members = Vec::new();
            for (i, ep) in endpoints.iter().enumerate() {
                if let Some(n) = topology.node_for(*ep) {
                    if component.contains(&n) {
                        members.push(i);
                    }
                }
            }
            groups.push(GoalSet::from_indices(endpoints.len(), members)?);
            terminals.push(topology.terminal_of(this_node).local);
        }
        let function = bandwidth.reduce(groups)?.tabulate(tabulation_threshold)?;
        delegated.push(DelegatedRequest { inferior, terminals, function });
    }
    delegated.sort_by_key(|d| d.inferior);
    Ok(delegated)
}

/// The connected component containing `start` in the tree, once every node in
/// `excluded` (and the edges touching them) is removed.
fn component_excluding(
    adjacency: &HashMap<NodeIndex, Vec<NodeIndex>>,
    start: NodeIndex,
    excluded: &HashSet<NodeIndex>,
) -> HashSet<NodeIndex> {
    let mut seen = HashSet::new();
    let mut stack = vec![start];
    seen.insert(start);
    while let Some(node) = stack.pop() {
        if let Some(neighbors) = adjacency.get(&node) {
            for &next in neighbors {
                if excluded.contains(&next) {
                    continue;
                }
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }
    }
    seen
}

fn assign_labels(topology: &Topology, tree: &Tree) -> Result<Vec<TrunkLabelAssignment>, PlannerError> {
    let mut assignments = Vec::new();
    // Track each trunk alongside its allocated start label so a later failure can
    // release everything acquired so far, keeping label assignment all-or-nothing.
    let mut allocated: Vec<(crate::trunk::Trunk, u32)> = Vec::new();
    for &(u, v) in &tree.edges {
        let (_, trunk) = match topology.min_edge(u, v) {
            Some((cost, Some(trunk))) => (cost, trunk),
            _ => continue,
        };
        match trunk.allocate_label() {
            Ok((start_label, end_label)) => {
                allocated.push((trunk.clone(), start_label));
                assignments.push(TrunkLabelAssignment {
                    a: topology.terminal_of(u),
                    b: topology.terminal_of(v),
                    start_label,
                    end_label,
                });
            }
            Err(e) => {
                for (trunk, start_label) in &allocated {
                    trunk.release_label(*start_label);
                }
                return Err(e.into());
            }
        }
    }
    Ok(assignments)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bandwidth::{BandwidthFunction, Flat};
    use crate::bandwidth::range::BandwidthRange;
    use crate::topology::{InferiorEdges, TrunkEdge};
    use crate::trunk::Trunk;

    fn setup_three_inferiors() -> (Topology, Vec<GlobalTerminal>) {
        // N1 terminals {0,1}, N2 terminal {0}, N3 terminal {0}; trunks N1.1<->N2.0 and
        // N1.1<->N3.0, each provisioned with 10 units each way.
        let n1 = InferiorEdges { inferior: 1, edges: vec![(0, 1, 1.0)] };
        let t_a = Trunk::new();
        t_a.provide(10.0, 10.0);
        t_a.define_label_range(0, 1, 0).unwrap();
        let t_b = Trunk::new();
        t_b.provide(10.0, 10.0);
        t_b.define_label_range(0, 1, 0).unwrap();
        let trunks = vec![
            TrunkEdge { a: GlobalTerminal::new(1, 1), b: GlobalTerminal::new(2, 0), trunk: t_a },
            TrunkEdge { a: GlobalTerminal::new(1, 1), b: GlobalTerminal::new(3, 0), trunk: t_b },
        ];
        let topo = Topology::build(&[n1], &trunks);
        let endpoints = vec![
            GlobalTerminal::new(1, 0),
            GlobalTerminal::new(1, 1),
            GlobalTerminal::new(2, 0),
            GlobalTerminal::new(3, 0),
        ];
        (topo, endpoints)
    }

    #[test]
    fn plans_tree_across_both_trunks_with_degree_two_delegates() {
        let (topo, endpoints) = setup_three_inferiors();
        let f = BandwidthFunction::Flat(Flat::new(4, BandwidthRange::new(1.0, Some(2.0))));
        let result = TreePlanner::plan(&topo, &endpoints, &f, 1000, vec![StabilityProfile::new(0.5, 1)], 0.5)
            .unwrap();
        assert_eq!(result.labels.len(), 2);
        let n1 = result.delegated.iter().find(|d| d.inferior == 1).unwrap();
        assert_eq!(n1.function.degree(), 2);
    }

    #[test]
    fn too_few_endpoints_is_rejected() {
        let (topo, _) = setup_three_inferiors();
        let f = BandwidthFunction::Flat(Flat::new(1, BandwidthRange::zero()));
        let err = TreePlanner::plan(&topo, &[GlobalTerminal::new(1, 0)], &f, 10, vec![], 0.5).unwrap_err();
        assert!(matches!(err, PlannerError::TooFewEndpoints(1)));
    }

    #[test]
    fn overloaded_trunk_is_pruned_and_tree_fails() {
        let n1 = InferiorEdges { inferior: 1, edges: vec![] };
        let skinny = Trunk::new();
        skinny.provide(0.5, 0.5);
        let trunks = vec![TrunkEdge { a: GlobalTerminal::new(1, 0), b: GlobalTerminal::new(2, 0), trunk: skinny }];
        let topo = Topology::build(&[n1], &trunks);
        let endpoints = vec![GlobalTerminal::new(1, 0), GlobalTerminal::new(2, 0)];
        let f = BandwidthFunction::Flat(Flat::new(2, BandwidthRange::new(5.0, Some(5.0))));
        let err = TreePlanner::plan(&topo, &endpoints, &f, 10, vec![StabilityProfile::new(0.5, 1)], 0.5)
            .unwrap_err();
        assert!(matches!(err, PlannerError::NoTreeFound { .. }));
    }
}
