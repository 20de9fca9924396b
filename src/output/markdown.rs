//! Markdown run summary
//!
//! Written next to the run's CSV file at shutdown.

use crate::output::summary::RunSummary;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the markdown summary of a run to `output_path`
pub fn generate_markdown_summary(summary: &RunSummary, output_path: &Path) -> std::io::Result<()> {
    let markdown = format_markdown_summary(summary);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run summary as markdown
pub fn format_markdown_summary(summary: &RunSummary) -> String {
    let mut md = String::new();

    md.push_str(&format!("# fare-harvest run {}\n\n", summary.run_id));

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Status**: {}\n", summary.status.to_db_string()));
    md.push_str(&format!("- **Started**: {}\n", summary.started_at.to_rfc3339()));
    md.push_str(&format!("- **Finished**: {}\n", summary.finished_at.to_rfc3339()));
    md.push_str(&format!(
        "- **Duration**: {} seconds\n",
        summary.duration_seconds()
    ));
    md.push_str(&format!("- **Config Hash**: {}\n", summary.config_hash));
    md.push_str(&format!(
        "- **Output**: {}\n\n",
        summary.output_path.display()
    ));

    // Target breakdown
    md.push_str("## Targets\n\n");
    md.push_str("| Status | Count |\n");
    md.push_str("|--------|-------|\n");
    md.push_str(&format!("| Done | {} |\n", summary.counts.done));
    md.push_str(&format!("| Failed | {} |\n", summary.counts.failed));
    md.push_str(&format!("| Pending | {} |\n\n", summary.counts.pending));

    md.push_str(&format!(
        "- **Completion**: {:.2}%\n",
        summary.completion_rate()
    ));
    md.push_str(&format!("- **Records written**: {}\n", summary.counts.records));
    md.push_str(&format!("- **Retries**: {}\n", summary.retries));
    md.push_str(&format!(
        "- **Zero-yield targets**: {}\n\n",
        summary.zero_yield
    ));

    if !summary.dead_letters.is_empty() {
        md.push_str("## Dead Letters\n\n");
        md.push_str("| Route | Date | Attempts | Reason |\n");
        md.push_str("|-------|------|----------|--------|\n");
        for letter in &summary.dead_letters {
            md.push_str(&format!(
                "| {} -> {} | {} | {} | {} |\n",
                letter.origin, letter.destination, letter.target_date, letter.attempts, letter.reason
            ));
        }
        md.push('\n');
    }

    md
}
