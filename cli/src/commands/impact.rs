//! `vulngraph impact`

use std::io::Write;

use vulngraph_sdk::{CancellationToken, ImpactEntry, ImpactReport, Vulngraph};

use crate::cli::ImpactArgs;
use crate::output::{OutputWriter, Render};

pub async fn execute(
    args: ImpactArgs,
    vulngraph: &Vulngraph,
    writer: &OutputWriter,
    cancel: &CancellationToken,
) -> anyhow::Result<i32> {
    let depth = args
        .depth
        .unwrap_or(vulngraph.config().analysis.default_depth);
    let report = vulngraph
        .analyze_impact(&args.vuln_id, Some(depth), cancel)
        .await?;
    writer.render(&report)?;
    Ok(0)
}

fn write_entry(w: &mut dyn Write, entry: &ImpactEntry) -> std::io::Result<()> {
    let component = if entry.author.is_empty() {
        entry.software.clone()
    } else {
        format!("{}/{}", entry.author, entry.software)
    };
    writeln!(
        w,
        "  hop {:<2} {}@{}{}",
        entry.hop,
        component,
        entry.version.as_deref().unwrap_or("*"),
        if entry.path_exists { "" } else { "  (software level)" }
    )
}

impl Render for ImpactReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "{} depth {}", self.vuln_id, self.depth)?;
        writeln!(w, "direct ({})", self.direct.len())?;
        for entry in &self.direct {
            write_entry(w, entry)?;
        }
        writeln!(w, "transitive ({})", self.transitive.len())?;
        for entry in &self.transitive {
            write_entry(w, entry)?;
        }
        Ok(())
    }
}
