//! DERIVED-edge graph: lookups and acyclicity checks.
//!
//! # Invariants
//! - Adjacency is kept in ordered maps so cycle reports are deterministic.
//! - `checked` never returns a graph containing a cycle.

use crate::model::graph::{DerivedEdge, EntityId};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// The DERIVED edge set contains a cycle. `cycle` starts and ends on the
/// same entity, following derived -> base direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclicDerivationError {
    pub cycle: Vec<EntityId>,
}

impl Display for CyclicDerivationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "derivation cycle detected: {}", self.cycle.join(" -> "))
    }
}

impl Error for CyclicDerivationError {}

#[derive(Debug, Clone, Default)]
pub struct DerivationGraph {
    /// derived -> entities it is a view of
    bases_of: BTreeMap<EntityId, BTreeSet<EntityId>>,
    /// base -> entities derived from it
    derived_of: BTreeMap<EntityId, BTreeSet<EntityId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

impl DerivationGraph {
    /// Builds the graph without checking acyclicity.
    pub fn from_edges(edges: &[DerivedEdge]) -> Self {
        let mut graph = Self::default();
        for edge in edges {
            graph.insert(edge);
        }
        graph
    }

    /// Builds the graph and rejects it if any cycle exists.
    pub fn checked(edges: &[DerivedEdge]) -> Result<Self, CyclicDerivationError> {
        let graph = Self::from_edges(edges);
        match graph.find_cycle() {
            Some(cycle) => Err(CyclicDerivationError { cycle }),
            None => Ok(graph),
        }
    }

    pub fn insert(&mut self, edge: &DerivedEdge) {
        self.bases_of
            .entry(edge.derived_id.clone())
            .or_default()
            .insert(edge.base_id.clone());
        self.bases_of.entry(edge.base_id.clone()).or_default();
        self.derived_of
            .entry(edge.base_id.clone())
            .or_default()
            .insert(edge.derived_id.clone());
    }

    /// Entities `rn` with a DERIVED edge `rn -> base`.
    pub fn derived_views_of<'a>(
        &'a self,
        base: &str,
    ) -> impl Iterator<Item = &'a EntityId> + 'a {
        self.derived_of.get(base).into_iter().flatten()
    }

    /// Whether `to` is reachable from `from` following derived -> base edges.
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            for next in self.bases_of.get(current).into_iter().flatten() {
                if next == to {
                    return true;
                }
                if visited.insert(next.as_str()) {
                    queue.push_back(next.as_str());
                }
            }
        }
        false
    }

    /// Whether adding `edge` would make the graph cyclic.
    pub fn would_create_cycle(&self, edge: &DerivedEdge) -> bool {
        self.reaches(&edge.base_id, &edge.derived_id)
    }

    /// Returns one cycle if present, using an iterative depth-first search.
    pub fn find_cycle(&self) -> Option<Vec<EntityId>> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        for start in self.bases_of.keys() {
            if marks.contains_key(start.as_str()) {
                continue;
            }

            marks.insert(start.as_str(), Mark::OnPath);
            let mut path = vec![start];
            let mut stack = vec![self.successors(start)];

            while let Some(successors) = stack.last_mut() {
                match successors.next() {
                    Some(next) => match marks.get(next.as_str()) {
                        Some(Mark::OnPath) => {
                            let from = path.iter().position(|node| *node == next).unwrap_or(0);
                            let mut cycle = path[from..]
                                .iter()
                                .map(|node| (*node).clone())
                                .collect::<Vec<_>>();
                            cycle.push(next.clone());
                            return Some(cycle);
                        }
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(next.as_str(), Mark::OnPath);
                            path.push(next);
                            stack.push(self.successors(next));
                        }
                    },
                    None => {
                        stack.pop();
                        if let Some(finished) = path.pop() {
                            marks.insert(finished.as_str(), Mark::Done);
                        }
                    }
                }
            }
        }

        None
    }

    fn successors(&self, node: &str) -> std::collections::btree_set::Iter<'_, EntityId> {
        self.bases_of
            .get(node)
            .map(BTreeSet::iter)
            .unwrap_or_default()
    }
}
