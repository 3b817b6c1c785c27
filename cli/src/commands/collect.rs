//! `vulngraph collect`

use std::io::Write;

use anyhow::Context;
use chrono::Utc;
use tracing::info;
use vulngraph_sdk::{CancellationToken, CollectReport, CollectRequest, SourceStatus, Vulngraph};

use crate::cli::CollectArgs;
use crate::output::{OutputWriter, Render};

pub async fn execute(
    args: CollectArgs,
    vulngraph: &Vulngraph,
    writer: &OutputWriter,
    cancel: &CancellationToken,
) -> anyhow::Result<i32> {
    let (start, end) = args.window(Utc::now());
    let request = CollectRequest {
        sources: (!args.sources.is_empty()).then_some(args.sources),
        start,
        end,
    };
    info!(start = %request.start, end = %request.end, "collect requested");

    let report = vulngraph
        .collect(request, cancel)
        .await
        .context("collection run aborted")?;
    writer.render(&report)?;
    Ok(report.status.exit_code())
}

impl Render for CollectReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "window   {}", self.window)?;
        writeln!(w, "status   {:?}", self.status)?;
        for outcome in &self.sources {
            let status = match &outcome.status {
                SourceStatus::Succeeded => "ok".to_string(),
                SourceStatus::Failed { code, reason } => format!("failed {code}: {reason}"),
                SourceStatus::Cancelled => "cancelled".to_string(),
            };
            writeln!(
                w,
                "  {:<8} {:>6} records {:>7} ms  {}",
                outcome.source, outcome.records, outcome.elapsed_ms, status
            )?;
        }
        writeln!(
            w,
            "fetched {} merged {} inserted {} updated {} unchanged {} skipped {}",
            self.fetched,
            self.merged,
            self.load.inserted,
            self.load.updated,
            self.load.unchanged,
            self.load.skipped.len()
        )?;
        for skipped in &self.load.skipped {
            writeln!(w, "  skipped {} {}: {}", skipped.vuln_id, skipped.code, skipped.reason)?;
        }
        Ok(())
    }
}
