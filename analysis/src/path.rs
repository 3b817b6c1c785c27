use crate::engine::Seeds;
use crate::error::AnalysisError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use storage::{Direction, GraphSnapshot};
use tokio_util::sync::CancellationToken;
use vulngraph_core::model::{from_timestamp, EdgeKind, NaturalKey, NodeId, NodeKind, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathStep {
    pub node: String,
    pub kind: NodeKind,
    /// Commit date of the REUSE edge that led here; `None` on the first step.
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PathOutcome {
    /// `steps` starts at a directly affected component and ends at the target.
    Found {
        vuln_id: String,
        hops: u32,
        steps: Vec<PathStep>,
    },
    NoPathFound {
        vuln_id: String,
        target: String,
    },
    /// The search stopped at the hop bound with unexplored edges left.
    DepthExceeded {
        vuln_id: String,
        target: String,
        max_hops: u32,
    },
}

impl PathOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PathOutcome::Found { .. } => "found",
            PathOutcome::NoPathFound { .. } => "no_path_found",
            PathOutcome::DepthExceeded { .. } => "depth_exceeded",
        }
    }

    pub fn steps(&self) -> Option<&[PathStep]> {
        match self {
            PathOutcome::Found { steps, .. } => Some(steps),
            _ => None,
        }
    }
}

/// Candidate route, ordered by edge dates from the vulnerable end (undated
/// edges last), then by the natural keys along the route.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Route {
    dates: Vec<(bool, Timestamp)>,
    keys: Vec<NaturalKey>,
    nodes: Vec<NodeId>,
    since: Vec<Option<Timestamp>>,
}

impl Route {
    fn start(node: NodeId, key: NaturalKey) -> Self {
        Self {
            dates: Vec::new(),
            keys: vec![key],
            nodes: vec![node],
            since: vec![None],
        }
    }

    fn extend(&self, node: NodeId, key: NaturalKey, since: Option<Timestamp>) -> Self {
        let mut next = self.clone();
        next.dates.push(since.map_or((true, 0), |date| (false, date)));
        next.keys.push(key);
        next.nodes.push(node);
        next.since.push(since);
        next
    }

    fn last(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }
}

/// Layered BFS. Within a layer every route has the same length, so keeping
/// the least route per node keeps the least route overall.
pub(crate) fn search(
    snapshot: &GraphSnapshot<'_>,
    vuln_key: &NaturalKey,
    vuln: NodeId,
    target: &NaturalKey,
    target_id: NodeId,
    max_hops: u32,
    cancel: &CancellationToken,
) -> Result<PathOutcome, AnalysisError> {
    let reaches_target = |id: NodeId| {
        id == target_id
            || (target.kind() == NodeKind::Software
                && snapshot
                    .node(id)
                    .and_then(|node| node.key.owner())
                    .as_ref()
                    == Some(target))
    };

    let seeds = Seeds::of(snapshot, vuln);
    let mut frontier: BTreeMap<NodeId, Route> = BTreeMap::new();
    for id in seeds.versions.into_iter().chain(seeds.software) {
        if let Some(node) = snapshot.node(id) {
            frontier
                .entry(id)
                .or_insert_with(|| Route::start(id, node.key.clone()));
        }
    }
    let mut visited: HashSet<NodeId> = frontier.keys().copied().collect();
    let mut hops = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        let best = frontier
            .values()
            .filter(|route| route.last().is_some_and(reaches_target))
            .min();
        if let Some(route) = best {
            return Ok(found(snapshot, vuln_key, hops, route));
        }

        let mut next: BTreeMap<NodeId, Route> = BTreeMap::new();
        for (current, route) in &frontier {
            for neighbor in snapshot.neighbors(*current, EdgeKind::Reuse, Direction::Incoming) {
                if visited.contains(&neighbor.node) {
                    continue;
                }
                let Some(node) = snapshot.node(neighbor.node) else {
                    continue;
                };
                let candidate = route.extend(neighbor.node, node.key.clone(), neighbor.since);
                match next.entry(neighbor.node) {
                    Entry::Vacant(slot) => {
                        slot.insert(candidate);
                    }
                    Entry::Occupied(mut slot) => {
                        if candidate < *slot.get() {
                            slot.insert(candidate);
                        }
                    }
                }
            }
        }

        if next.is_empty() {
            return Ok(PathOutcome::NoPathFound {
                vuln_id: vuln_key.to_string(),
                target: target.to_string(),
            });
        }
        if hops >= max_hops {
            return Ok(PathOutcome::DepthExceeded {
                vuln_id: vuln_key.to_string(),
                target: target.to_string(),
                max_hops,
            });
        }
        visited.extend(next.keys().copied());
        frontier = next;
        hops += 1;
    }
}

fn found(snapshot: &GraphSnapshot<'_>, vuln_key: &NaturalKey, hops: u32, route: &Route) -> PathOutcome {
    let steps = route
        .nodes
        .iter()
        .zip(&route.keys)
        .zip(&route.since)
        .map(|((id, key), &since)| PathStep {
            node: key.to_string(),
            kind: snapshot
                .node(*id)
                .map(|node| node.kind())
                .unwrap_or_else(|| key.kind()),
            since: since.and_then(from_timestamp),
        })
        .collect();
    PathOutcome::Found {
        vuln_id: vuln_key.to_string(),
        hops,
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_order_prefers_earlier_dates_then_keys() {
        let a = NaturalKey::version("a", "x", "1");
        let b = NaturalKey::version("b", "x", "1");
        let c = NaturalKey::version("c", "x", "1");
        let start = Route::start(NodeId(1), a);

        let early = start.extend(NodeId(3), c, Some(100));
        let late = start.extend(NodeId(2), b.clone(), Some(200));
        let undated = start.extend(NodeId(2), b.clone(), None);
        assert!(early < late);
        assert!(late < undated);

        let same_date_b = start.extend(NodeId(2), b, Some(100));
        assert!(same_date_b < early);
    }
}
