use std::collections::{BTreeMap, HashMap};
use vulngraph_core::model::{Edge, EdgeKind, NodeId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// One adjacent node plus the date carried by the connecting edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub node: NodeId,
    pub since: Option<Timestamp>,
}

type Adjacency = HashMap<NodeId, BTreeMap<(EdgeKind, NodeId), Option<Timestamp>>>;

/// Typed adjacency index kept in both directions. Neighbors of one kind are
/// stored contiguously and come back ordered by handle.
#[derive(Default)]
pub struct TypedGraph {
    outgoing: Adjacency,
    incoming: Adjacency,
    counts: BTreeMap<EdgeKind, usize>,
}

impl TypedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the edge already existed.
    pub fn insert(&mut self, edge: &Edge) -> bool {
        let out = self.outgoing.entry(edge.source).or_default();
        if out.contains_key(&(edge.kind, edge.target)) {
            return false;
        }
        out.insert((edge.kind, edge.target), edge.since);
        self.incoming
            .entry(edge.target)
            .or_default()
            .insert((edge.kind, edge.source), edge.since);
        *self.counts.entry(edge.kind).or_insert(0) += 1;
        true
    }

    pub fn contains(&self, kind: EdgeKind, source: NodeId, target: NodeId) -> bool {
        self.outgoing
            .get(&source)
            .is_some_and(|edges| edges.contains_key(&(kind, target)))
    }

    pub fn edge(&self, kind: EdgeKind, source: NodeId, target: NodeId) -> Option<Edge> {
        let since = *self.outgoing.get(&source)?.get(&(kind, target))?;
        Some(Edge {
            kind,
            source,
            target,
            since,
        })
    }

    /// Lazily iterates neighbors over edges of `kind`.
    pub fn neighbors(
        &self,
        id: NodeId,
        kind: EdgeKind,
        direction: Direction,
    ) -> impl Iterator<Item = Neighbor> + '_ {
        let adjacency = match direction {
            Direction::Outgoing => &self.outgoing,
            Direction::Incoming => &self.incoming,
        };
        adjacency
            .get(&id)
            .into_iter()
            .flat_map(move |edges| edges.range((kind, NodeId(0))..=(kind, NodeId(u64::MAX))))
            .map(|(&(_, node), &since)| Neighbor { node, since })
    }

    pub fn edge_count(&self, kind: EdgeKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_edges(&self) -> usize {
        self.counts.values().sum()
    }
}
