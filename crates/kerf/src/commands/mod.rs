pub mod collect;
pub mod index;
pub mod memory;
pub mod related;
pub mod search;

use std::path::Path;

use libkerf_core::config::{load_config, state_dir, KerfConfig};
use libkerf_core::index::CodeIndex;
use libkerf_core::KerfError;

/// `<root>/.kerf/config.toml`, or defaults
pub fn config_for(root: &Path) -> Result<KerfConfig, KerfError> {
    Ok(load_config(&state_dir(root))?.unwrap_or_default())
}

/// Open the index, scanning if it has never been built
pub fn open_index(root: &Path) -> Result<CodeIndex, KerfError> {
    let config = config_for(root)?;
    let index = CodeIndex::open(root, &config.index)?;
    if index.needs_rescan() {
        index.scan()?;
    }
    Ok(index)
}
