//! `vulngraph stats`

use std::io::Write;

use vulngraph_sdk::{StoreStats, Vulngraph};

use crate::output::{OutputWriter, Render};

pub async fn execute(vulngraph: &Vulngraph, writer: &OutputWriter) -> anyhow::Result<i32> {
    let stats = vulngraph.stats().await;
    writer.render(&stats)?;
    Ok(0)
}

impl Render for StoreStats {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "nodes {}", self.total_nodes())?;
        for (kind, count) in &self.nodes {
            writeln!(w, "  {kind:?} {count}")?;
        }
        writeln!(w, "edges {}", self.total_edges())?;
        for (kind, count) in &self.edges {
            writeln!(w, "  {kind:?} {count}")?;
        }
        Ok(())
    }
}
