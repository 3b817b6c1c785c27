//! Synthetic advisory graphs for benchmarks.

use chrono::{Duration, TimeZone, Utc};
use vulngraph_core::record::{ComponentRef, NormalizedRecord, ReuseDescriptor};

pub const AUTHOR: &str = "bench";

/// Name of the `i`-th synthetic component.
pub fn component(i: usize) -> ComponentRef {
    ComponentRef::version(&format!("lib{i:05}"), AUTHOR, "1.0")
}

/// One advisory per `stride` components, each affecting a single version.
pub fn advisories(components: usize, stride: usize) -> Vec<NormalizedRecord> {
    (0..components)
        .step_by(stride.max(1))
        .map(|i| {
            let mut record = NormalizedRecord::new("nvd", format!("CVE-2024-{:05}", i + 1));
            record.description = format!("synthetic flaw in lib{i:05}");
            record.affected = vec![component(i)];
            record
        })
        .collect()
}

/// Layered reuse lattice: every component in layer `l + 1` reuses `fan_in`
/// components of layer `l`. Commit dates increase with the layer.
pub fn reuse_lattice(width: usize, layers: usize, fan_in: usize) -> Vec<ReuseDescriptor> {
    let base = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).single();
    let mut edges = Vec::new();
    for layer in 1..layers {
        for col in 0..width {
            let from = component(layer * width + col);
            for k in 0..fan_in.min(width) {
                let to = component((layer - 1) * width + (col + k) % width);
                edges.push(ReuseDescriptor {
                    from: from.clone(),
                    to,
                    commit_date: base
                        .map(|b| b + Duration::days((layer * 30 + k) as i64)),
                });
            }
        }
    }
    edges
}

/// A single chain `c[n-1] -> ... -> c[0]` closed back into `c[0]`, so
/// traversals have to handle a cycle of length `n`.
pub fn reuse_ring(n: usize) -> Vec<ReuseDescriptor> {
    (0..n)
        .map(|i| ReuseDescriptor {
            from: component((i + 1) % n),
            to: component(i),
            commit_date: None,
        })
        .collect()
}

pub fn percentile_ns(samples: &[u128], p: f64) -> u128 {
    if samples.is_empty() {
        return 0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let rank = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[rank]
}

pub fn fmt_ns(ns: u128) -> String {
    if ns >= 1_000_000 {
        format!("{:.3} ms", ns as f64 / 1_000_000.0)
    } else if ns >= 1_000 {
        format!("{:.3} us", ns as f64 / 1_000.0)
    } else {
        format!("{ns} ns")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lattice_shape() {
        let edges = reuse_lattice(4, 3, 2);
        assert_eq!(edges.len(), 4 * 2 * 2);
        assert!(edges.iter().all(|e| e.from != e.to));
        assert!(edges.iter().all(|e| e.commit_date.is_some()));
    }

    #[test]
    fn test_ring_closes() {
        let ring = reuse_ring(3);
        assert_eq!(ring.len(), 3);
        assert_eq!(ring[2].from, component(0));
    }

    #[test]
    fn test_advisory_stride() {
        let records = advisories(10, 4);
        let ids: Vec<&str> = records.iter().map(|r| r.vuln_id.as_str()).collect();
        assert_eq!(ids, vec!["CVE-2024-00001", "CVE-2024-00005", "CVE-2024-00009"]);
    }

    #[test]
    fn test_percentile() {
        assert_eq!(percentile_ns(&[5, 1, 3], 0.5), 3);
        assert_eq!(percentile_ns(&[], 0.9), 0);
        assert_eq!(fmt_ns(1_500), "1.500 us");
    }
}
