//! Post-run processing: transcript export.

use crate::model::{InfoEvent, RunReport};
use anyhow::{Context, Result};
use std::path::Path;

/// Write the final transcript to `path`, creating parent directories.
pub fn export_transcript(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create export directory {}", parent.display()))?;
    }
    std::fs::write(path, &report.transcript)
        .with_context(|| format!("write transcript to {}", path.display()))?;
    Ok(())
}

/// Run the post-run steps for a finished report. Failures become messages;
/// they never fail the run.
pub fn process_run_completion(export: Option<&Path>, report: &RunReport) -> Vec<InfoEvent> {
    let mut messages = Vec::new();
    if let Some(path) = export {
        match export_transcript(path, report) {
            Ok(()) => messages.push(InfoEvent::Exported {
                path: path.to_path_buf(),
            }),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "export failed");
                messages.push(InfoEvent::Message(format!("Export failed: {e:#}")));
            }
        }
    }
    messages
}
