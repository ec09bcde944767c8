//! The weighted edge graph the planner searches: inferior networks' internally
//! advertised connectivity, joined by the aggregator's commissioned trunks.

use crate::trunk::Trunk;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;

/// Identifies one inferior network within the aggregator.
pub type InferiorId = u32;

/// A terminal local to one inferior network's own numbering.
pub type LocalTerminalId = u32;

/// A terminal identified globally: which inferior it belongs to, and its id within
/// that inferior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalTerminal {
    /// The inferior network this terminal belongs to.
    pub inferior: InferiorId,
    /// The terminal's id within that inferior.
    pub local: LocalTerminalId,
}

impl GlobalTerminal {
    /// Build a global terminal reference.
    pub fn new(inferior: InferiorId, local: LocalTerminalId) -> Self {
        GlobalTerminal { inferior, local }
    }
}

/// The internal connectivity an inferior network advertises to the aggregator: a list
/// of `(terminal, terminal, cost)` edges between its own terminals.
#[derive(Debug, Clone, Default)]
pub struct InferiorEdges {
    /// The inferior this advertisement describes.
    pub inferior: InferiorId,
    /// Edges between this inferior's own terminals.
    pub edges: Vec<(LocalTerminalId, LocalTerminalId, f64)>,
}

/// One trunk contributing an edge to the topology: its two global endpoints and the
/// trunk handle itself (so the planner can read its commissioned state and delay, and
/// later allocate labels on it).
#[derive(Debug, Clone)]
pub struct TrunkEdge {
    /// One endpoint of the trunk.
    pub a: GlobalTerminal,
    /// The other endpoint of the trunk.
    pub b: GlobalTerminal,
    /// The trunk itself.
    pub trunk: Trunk,
}

/// A weighted edge graph over global terminals, rebuilt under the aggregator's lock
/// and then read from an immutable snapshot.
#[derive(Debug, Clone)]
pub struct Topology {
    graph: UnGraph<GlobalTerminal, TopologyEdge>,
    index: HashMap<GlobalTerminal, NodeIndex>,
}

/// An edge's weight and, if it came from a trunk, a handle back to it.
#[derive(Debug, Clone)]
pub struct TopologyEdge {
    /// The scalar cost the planner minimises over.
    pub cost: f64,
    /// Present if this edge came from a trunk, rather than an inferior's internal
    /// advertisement.
    pub trunk: Option<Trunk>,
}

impl Topology {
    /// Build a topology from every inferior's advertised internal edges and the
    /// aggregator's trunks. Non-commissioned trunks are omitted.
    pub fn build(inferior_edges: &[InferiorEdges], trunks: &[TrunkEdge]) -> Self {
        let mut graph = UnGraph::new_undirected();
        let mut index: HashMap<GlobalTerminal, NodeIndex> = HashMap::new();

        let mut node_for = |graph: &mut UnGraph<GlobalTerminal, TopologyEdge>,
                             index: &mut HashMap<GlobalTerminal, NodeIndex>,
                             t: GlobalTerminal| {
            *index.entry(t).or_insert_with(|| graph.add_node(t))
        };

        for adv in inferior_edges {
            for &(a, b, cost) in &adv.edges {
                let ga = GlobalTerminal::new(adv.inferior, a);
                let gb = GlobalTerminal::new(adv.inferior, b);
                let na = node_for(&mut graph, &mut index, ga);
                let nb = node_for(&mut graph, &mut index, gb);
                graph.add_edge(na, nb, TopologyEdge { cost, trunk: None });
            }
        }

        for te in trunks {
            if !te.trunk.is_commissioned() {
                continue;
            }
            let na = node_for(&mut graph, &mut index, te.a);
            let nb = node_for(&mut graph, &mut index, te.b);
            graph.add_edge(na, nb, TopologyEdge { cost: te.trunk.delay(), trunk: Some(te.trunk.clone()) });
        }

        Topology { graph, index }
    }

    /// The node for a global terminal, if it appears in the graph.
    pub fn node_for(&self, terminal: GlobalTerminal) -> Option<NodeIndex> {
        self.index.get(&terminal).copied()
    }

    /// The global terminal a node represents.
    pub fn terminal_of(&self, node: NodeIndex) -> GlobalTerminal {
        self.graph[node]
    }

    /// The underlying petgraph graph, for algorithms that need direct access.
    pub fn graph(&self) -> &UnGraph<GlobalTerminal, TopologyEdge> {
        &self.graph
    }

    /// The minimum-cost edge between two nodes, if any edge connects them (multiple
    /// parallel edges, e.g. several trunks between the same pair of terminals, are
    /// allowed; the cheapest is preferred).
    pub fn min_edge(&self, u: NodeIndex, v: NodeIndex) -> Option<(f64, Option<Trunk>)> {
        self.graph
            .edges_connecting(u, v)
            .map(|e| (e.weight().cost, e.weight().trunk.clone()))
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn duplicate_trunk_edges_prefer_minimum_cost() {
        let a = GlobalTerminal::new(0, 0);
        let b = GlobalTerminal::new(1, 0);
        let cheap = Trunk::new();
        cheap.set_delay(1.0);
        let expensive = Trunk::new();
        expensive.set_delay(10.0);
        let trunks = vec![
            TrunkEdge { a, b, trunk: expensive },
            TrunkEdge { a, b, trunk: cheap },
        ];
        let topo = Topology::build(&[], &trunks);
        let na = topo.node_for(a).unwrap();
        let nb = topo.node_for(b).unwrap();
        let (cost, _) = topo.min_edge(na, nb).unwrap();
        assert_eq!(cost, 1.0);
    }

    #[test]
    fn decommissioned_trunk_is_omitted() {
        let a = GlobalTerminal::new(0, 0);
        let b = GlobalTerminal::new(1, 0);
        let trunk = Trunk::new();
        trunk.decommission();
        let topo = Topology::build(&[], &[TrunkEdge { a, b, trunk }]);
        assert!(topo.node_for(a).is_none());
    }
}
