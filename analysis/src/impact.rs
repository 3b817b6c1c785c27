use crate::engine::Seeds;
use crate::error::AnalysisError;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use storage::{Direction, GraphSnapshot};
use tokio_util::sync::CancellationToken;
use vulngraph_core::model::{EdgeKind, NaturalKey, Node, NodeData, NodeId, NodeKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactEntry {
    pub software: String,
    pub author: String,
    pub version: Option<String>,
    /// Reuse hops from a directly affected component.
    pub hop: u32,
    /// Whether the whole chain is recorded at version granularity. Entries
    /// reached only through software-level relationships are `false`.
    pub path_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactReport {
    pub vuln_id: String,
    pub depth: u32,
    pub direct: Vec<ImpactEntry>,
    pub transitive: Vec<ImpactEntry>,
}

impl ImpactReport {
    pub fn entries(&self) -> impl Iterator<Item = &ImpactEntry> {
        self.direct.iter().chain(self.transitive.iter())
    }

    pub fn len(&self) -> usize {
        self.direct.len() + self.transitive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, software: &str, version: Option<&str>) -> Option<&ImpactEntry> {
        self.entries()
            .find(|entry| entry.software == software && entry.version.as_deref() == version)
    }
}

/// Breadth-first walk against REUSE edges (`A REUSE B` means a flaw in B
/// reaches A). Each node is reported once, at its minimum hop.
pub(crate) fn traverse(
    snapshot: &GraphSnapshot<'_>,
    vuln_key: &NaturalKey,
    vuln: NodeId,
    depth: u32,
    cancel: &CancellationToken,
) -> Result<ImpactReport, AnalysisError> {
    let seeds = Seeds::of(snapshot, vuln);
    let mut visited: HashMap<NodeId, (u32, bool)> = HashMap::new();
    let mut queue = VecDeque::new();

    let mut covered = HashSet::new();
    for version in &seeds.versions {
        visited.insert(*version, (0, true));
        queue.push_back(*version);
        covered.extend(
            snapshot
                .neighbors(*version, EdgeKind::HasVersion, Direction::Incoming)
                .map(|owner| owner.node),
        );
    }
    // Software with affected versions is already reported through them.
    let mut hidden = HashSet::new();
    for software in &seeds.software {
        if visited.insert(*software, (0, false)).is_none() {
            queue.push_back(*software);
            if covered.contains(software) {
                hidden.insert(*software);
            }
        }
    }

    while let Some(current) = queue.pop_front() {
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        let Some(&(hop, exact)) = visited.get(&current) else {
            continue;
        };
        if hop >= depth {
            continue;
        }
        for neighbor in snapshot.neighbors(current, EdgeKind::Reuse, Direction::Incoming) {
            let is_version = snapshot
                .node(neighbor.node)
                .is_some_and(|node| node.kind() == NodeKind::Version);
            let next_exact = exact && is_version;
            match visited.get_mut(&neighbor.node) {
                Some((seen_hop, seen_exact)) => {
                    if *seen_hop == hop + 1 && next_exact {
                        *seen_exact = true;
                    }
                }
                None => {
                    visited.insert(neighbor.node, (hop + 1, next_exact));
                    queue.push_back(neighbor.node);
                }
            }
        }
    }

    let mut direct = Vec::new();
    let mut transitive = Vec::new();
    for (id, (hop, exact)) in visited {
        if hidden.contains(&id) {
            continue;
        }
        let Some(entry) = snapshot
            .node(id)
            .and_then(|node| describe(snapshot, node, hop, exact))
        else {
            continue;
        };
        if hop == 0 {
            direct.push(entry);
        } else {
            transitive.push(entry);
        }
    }
    let order = |a: &ImpactEntry, b: &ImpactEntry| {
        (a.hop, &a.software, &a.author, &a.version).cmp(&(b.hop, &b.software, &b.author, &b.version))
    };
    direct.sort_by(order);
    transitive.sort_by(order);

    Ok(ImpactReport {
        vuln_id: vuln_key.to_string(),
        depth,
        direct,
        transitive,
    })
}

fn describe(snapshot: &GraphSnapshot<'_>, node: &Node, hop: u32, exact: bool) -> Option<ImpactEntry> {
    let (software, author, version) = match &node.data {
        NodeData::Software(data) => (data.name.clone(), data.author.clone(), None),
        NodeData::Version(data) => {
            let owner = node.key.owner()?;
            match snapshot.node_by_key(&owner).and_then(Node::as_software) {
                Some(software) => (
                    software.name.clone(),
                    software.author.clone(),
                    Some(data.version.clone()),
                ),
                None => match owner {
                    NaturalKey::Software(key) => (key.name, key.author, Some(data.version.clone())),
                    _ => return None,
                },
            }
        }
        _ => return None,
    };
    Some(ImpactEntry {
        software,
        author,
        version,
        hop,
        path_exists: exact,
    })
}
