//! `vulngraph path`

use std::io::Write;

use vulngraph_sdk::{parse_target, CancellationToken, PathOutcome, Vulngraph};

use crate::cli::PathArgs;
use crate::output::{OutputWriter, Render};

/// `no_path_found` and `depth_exceeded` are answers, not failures; both exit 0.
pub async fn execute(
    args: PathArgs,
    vulngraph: &Vulngraph,
    writer: &OutputWriter,
    cancel: &CancellationToken,
) -> anyhow::Result<i32> {
    let target = parse_target(&args.target)?;
    let outcome = vulngraph
        .analyze_path(&args.vuln_id, &target, args.max_hops, cancel)
        .await?;
    writer.render(&outcome)?;
    Ok(0)
}

impl Render for PathOutcome {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        match self {
            PathOutcome::Found {
                vuln_id,
                hops,
                steps,
            } => {
                writeln!(w, "{vuln_id}: found in {hops} hop(s)")?;
                for step in steps {
                    match step.since {
                        Some(since) => {
                            writeln!(w, "  <- {} (since {})", step.node, since.format("%Y-%m-%d"))?
                        }
                        None => writeln!(w, "  {}", step.node)?,
                    }
                }
                Ok(())
            }
            PathOutcome::NoPathFound { vuln_id, target } => {
                writeln!(w, "{vuln_id}: no path to {target}")
            }
            PathOutcome::DepthExceeded {
                vuln_id,
                target,
                max_hops,
            } => writeln!(
                w,
                "{vuln_id}: {target} not reached within {max_hops} hop(s); raise --max-hops"
            ),
        }
    }
}
