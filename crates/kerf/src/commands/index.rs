use std::path::Path;

use libkerf_core::index::CodeIndex;
use libkerf_core::KerfError;

use super::config_for;
use crate::cli::Cli;
use crate::output::{output_success, print_human};

pub fn run(cli: &Cli, root: &Path, full: bool, stats_only: bool) -> Result<(), KerfError> {
    let config = config_for(root)?;
    let index = CodeIndex::open(root, &config.index)?;

    if !stats_only {
        let summary = if full || index.needs_rescan() {
            index.scan()?
        } else {
            index.refresh()?
        };
        print_human(
            cli,
            &format!(
                "indexed {} files ({} unchanged, {} removed, {} parse failures), generation {}",
                summary.indexed, summary.unchanged, summary.removed, summary.parse_failures, summary.generation
            ),
        );
        index.flush()?;
    }

    let stats = index.stats()?;
    if cli.json || stats_only {
        output_success(cli, &stats);
    }
    Ok(())
}
