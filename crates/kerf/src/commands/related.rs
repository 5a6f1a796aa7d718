use std::path::Path;

use libkerf_core::KerfError;

use super::open_index;
use crate::cli::Cli;
use crate::output::output_success;

pub fn run(cli: &Cli, root: &Path, path: &str, limit: usize) -> Result<(), KerfError> {
    let index = open_index(root)?;
    if index.get_file(path)?.is_none() {
        return Err(KerfError::file_not_found(path));
    }
    let related = index.related_files(path, limit)?;
    output_success(
        cli,
        serde_json::json!({
            "path": path,
            "related": related,
        }),
    );
    Ok(())
}
