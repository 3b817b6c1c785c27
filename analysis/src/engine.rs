use crate::error::AnalysisError;
use crate::impact::{self, ImpactReport};
use crate::path::{self, PathOutcome};
use std::sync::Arc;
use std::time::Instant;
use storage::{Direction, GraphSnapshot, GraphStore};
use tokio_util::sync::CancellationToken;
use tracing::info;
use vulngraph_core::config::AnalysisConfig;
use vulngraph_core::model::{EdgeKind, NaturalKey, NodeId, NodeKind};

/// Read-only traversals over the vulnerability graph. Each call works on one
/// store snapshot, so concurrent ingestion is never observed half-applied.
#[derive(Clone)]
pub struct AnalysisEngine {
    store: Arc<GraphStore>,
    config: AnalysisConfig,
}

impl AnalysisEngine {
    pub fn new(store: Arc<GraphStore>, config: AnalysisConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// `None` is rejected; bounds above `max_traversal_depth` are rejected.
    pub fn check_depth(&self, depth: Option<u32>) -> Result<u32, AnalysisError> {
        let depth = depth.ok_or(AnalysisError::DepthUnbounded)?;
        if depth > self.config.max_traversal_depth {
            return Err(AnalysisError::DepthTooLarge {
                requested: depth,
                max: self.config.max_traversal_depth,
            });
        }
        Ok(depth)
    }

    /// Components affected by `vuln_id`, directly and through at most `depth`
    /// reuse hops.
    pub async fn analyze_impact(
        &self,
        vuln_id: &str,
        depth: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<ImpactReport, AnalysisError> {
        let depth = self.check_depth(depth)?;
        let started = Instant::now();
        let snapshot = self.store.snapshot().await;
        let (vuln_key, vuln) = resolve_vulnerability(&snapshot, vuln_id)?;

        let report = impact::traverse(&snapshot, &vuln_key, vuln, depth, cancel)?;
        info!(
            vuln_id = %vuln_key,
            depth,
            direct = report.direct.len(),
            transitive = report.transitive.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "impact analysis"
        );
        Ok(report)
    }

    /// Shortest reuse chain from `vuln_id` to `target`, bounded by
    /// `max_path_hops`.
    pub async fn analyze_path(
        &self,
        vuln_id: &str,
        target: &NaturalKey,
        cancel: &CancellationToken,
    ) -> Result<PathOutcome, AnalysisError> {
        self.analyze_path_within(vuln_id, target, self.config.max_path_hops, cancel)
            .await
    }

    pub async fn analyze_path_within(
        &self,
        vuln_id: &str,
        target: &NaturalKey,
        max_hops: u32,
        cancel: &CancellationToken,
    ) -> Result<PathOutcome, AnalysisError> {
        if !matches!(target.kind(), NodeKind::Software | NodeKind::Version) {
            return Err(AnalysisError::InvalidTarget(target.to_string()));
        }
        let started = Instant::now();
        let snapshot = self.store.snapshot().await;
        let (vuln_key, vuln) = resolve_vulnerability(&snapshot, vuln_id)?;
        let target_id = snapshot
            .resolve(target)
            .ok_or_else(|| AnalysisError::NotFound(target.to_string()))?;

        let outcome = path::search(
            &snapshot, &vuln_key, vuln, target, target_id, max_hops, cancel,
        )?;
        info!(
            vuln_id = %vuln_key,
            target = %target,
            max_hops,
            outcome = outcome.label(),
            latency_ms = started.elapsed().as_millis() as u64,
            "propagation path analysis"
        );
        Ok(outcome)
    }
}

fn resolve_vulnerability(
    snapshot: &GraphSnapshot<'_>,
    vuln_id: &str,
) -> Result<(NaturalKey, NodeId), AnalysisError> {
    let key = NaturalKey::vulnerability(vuln_id);
    let id = snapshot
        .resolve(&key)
        .ok_or_else(|| AnalysisError::NotFound(key.to_string()))?;
    Ok((key, id))
}

/// Starting points of every traversal: directly affected versions, then
/// directly affected software, each ordered by handle.
pub(crate) struct Seeds {
    pub versions: Vec<NodeId>,
    pub software: Vec<NodeId>,
}

impl Seeds {
    pub(crate) fn of(snapshot: &GraphSnapshot<'_>, vuln: NodeId) -> Self {
        Self {
            versions: snapshot
                .neighbors(vuln, EdgeKind::AffectsVersion, Direction::Outgoing)
                .map(|n| n.node)
                .collect(),
            software: snapshot
                .neighbors(vuln, EdgeKind::Affects, Direction::Outgoing)
                .map(|n| n.node)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_check_depth_bounds() {
        let dir = tempdir().unwrap();
        let store = Arc::new(GraphStore::open(dir.path()).await.unwrap());
        let engine = AnalysisEngine::new(
            store,
            AnalysisConfig {
                max_traversal_depth: 3,
                ..AnalysisConfig::default()
            },
        );

        assert_eq!(engine.check_depth(Some(0)), Ok(0));
        assert_eq!(engine.check_depth(Some(3)), Ok(3));
        assert_eq!(engine.check_depth(None), Err(AnalysisError::DepthUnbounded));
        assert_eq!(
            engine.check_depth(Some(4)),
            Err(AnalysisError::DepthTooLarge {
                requested: 4,
                max: 3
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_vulnerability_is_not_found() {
        let dir = tempdir().unwrap();
        let store = Arc::new(GraphStore::open(dir.path()).await.unwrap());
        let engine = AnalysisEngine::new(store, AnalysisConfig::default());

        let err = engine
            .analyze_impact("CVE-2099-0001", Some(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, AnalysisError::NotFound("CVE-2099-0001".to_string()));
    }
}
