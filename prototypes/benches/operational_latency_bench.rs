//! Impact queries racing against re-ingestion of the advisories they read.
//! Sized through `VULNGRAPH_BENCH_*` variables.

use std::sync::Arc;
use std::time::{Duration, Instant};

use analysis::AnalysisEngine;
use ingestion::GraphLoader;
use prototypes::{advisories, component, fmt_ns, percentile_ns, reuse_lattice};
use storage::GraphStore;
use tokio_util::sync::CancellationToken;
use vulngraph_core::config::AnalysisConfig;
use vulngraph_core::record::NormalizedRecord;

const STRIDE: usize = 5;

struct Workload {
    width: usize,
    layers: usize,
    workers: usize,
    ops_per_worker: usize,
    write_every: usize,
}

impl Workload {
    fn from_env() -> Self {
        let knob = |suffix: &str, default: usize| {
            std::env::var(format!("VULNGRAPH_BENCH_{suffix}"))
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(default)
        };
        Self {
            width: knob("WIDTH", 200),
            layers: knob("LAYERS", 8),
            workers: knob("WORKERS", 8),
            ops_per_worker: knob("OPS_PER_WORKER", 120),
            write_every: knob("WRITE_EVERY", 10).max(1),
        }
    }
}

#[derive(Default)]
struct Samples {
    impact: Vec<u128>,
    load: Vec<u128>,
}

impl Samples {
    fn absorb(&mut self, other: Samples) {
        self.impact.extend(other.impact);
        self.load.extend(other.load);
    }

    fn ops(&self) -> usize {
        self.impact.len() + self.load.len()
    }
}

fn vuln_id(slot: usize) -> String {
    format!("CVE-2024-{:05}", slot * STRIDE + 1)
}

fn report_percentiles(label: &str, samples: &[u128]) {
    let [p50, p95, p99] = [0.50, 0.95, 0.99].map(|p| fmt_ns(percentile_ns(samples, p)));
    println!("{label:<8} n={:<6} p50={p50} p95={p95} p99={p99}", samples.len());
}

async fn run_worker(
    worker: usize,
    workload: Arc<Workload>,
    advisory_count: usize,
    loader: GraphLoader,
    engine: AnalysisEngine,
) -> Samples {
    let cancel = CancellationToken::new();
    let mut samples = Samples::default();
    for op in 0..workload.ops_per_worker {
        let slot = (worker * workload.ops_per_worker + op) % advisory_count;
        let started = Instant::now();
        if op % workload.write_every == 0 {
            let mut record = NormalizedRecord::new("nvd", vuln_id(slot));
            record.description = format!("refreshed by worker {worker} op {op}");
            record.affected = vec![component(slot * STRIDE)];
            loader.load_record(record).await.unwrap();
            samples.load.push(started.elapsed().as_nanos());
        } else {
            engine
                .analyze_impact(&vuln_id(slot), Some(3), &cancel)
                .await
                .unwrap();
            samples.impact.push(started.elapsed().as_nanos());
        }
    }
    samples
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let workload = Arc::new(Workload::from_env());

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(GraphStore::open(dir.path()).await.unwrap());
    let loader = GraphLoader::new(store.clone());
    let seeded = advisories(workload.width, STRIDE);
    let advisory_count = seeded.len();
    loader.load_all(seeded).await.unwrap();
    for edge in reuse_lattice(workload.width, workload.layers, 2) {
        loader.link_reuse(&edge).await.unwrap();
    }
    let engine = AnalysisEngine::new(store.clone(), AnalysisConfig::default());

    let started = Instant::now();
    let tasks: Vec<_> = (0..workload.workers)
        .map(|worker| {
            tokio::spawn(run_worker(
                worker,
                workload.clone(),
                advisory_count,
                loader.clone(),
                engine.clone(),
            ))
        })
        .collect();

    let mut samples = Samples::default();
    for task in tasks {
        samples.absorb(task.await.unwrap());
    }
    let elapsed = started.elapsed().max(Duration::from_nanos(1));
    let stats = store.stats().await;

    println!("# impact reads under concurrent re-ingestion");
    println!(
        "graph    nodes={} edges={} advisories={advisory_count}",
        stats.total_nodes(),
        stats.total_edges()
    );
    println!(
        "workers  {} x {} ops, one load every {} ops",
        workload.workers, workload.ops_per_worker, workload.write_every
    );
    println!(
        "total    {} ops in {:.3}s ({:.1} ops/s)",
        samples.ops(),
        elapsed.as_secs_f64(),
        samples.ops() as f64 / elapsed.as_secs_f64()
    );
    report_percentiles("impact", &samples.impact);
    report_percentiles("load", &samples.load);
}
