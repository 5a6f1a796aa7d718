use std::path::Path;

use comfy_table::Table;
use libkerf_core::index::SearchKind;
use libkerf_core::KerfError;

use super::open_index;
use crate::cli::Cli;
use crate::output::output_success;

pub fn run(cli: &Cli, root: &Path, query: &str, kind: &str, limit: usize) -> Result<(), KerfError> {
    let kind = SearchKind::from_name(kind)
        .ok_or_else(|| KerfError::Validation(format!("unknown search kind '{}'", kind)))?;
    let index = open_index(root)?;
    let hits = index.search(query, kind, limit)?;

    if cli.json {
        output_success(
            cli,
            serde_json::json!({
                "query": query,
                "count": hits.len(),
                "hits": hits,
            }),
        );
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["path", "symbol", "kind", "line", "score"]);
    for hit in &hits {
        table.add_row(vec![
            hit.path.clone(),
            hit.name.clone().unwrap_or_default(),
            hit.kind.clone(),
            hit.line.map(|l| l.to_string()).unwrap_or_default(),
            format!("{:.3}", hit.score),
        ]);
    }
    println!("{table}");
    Ok(())
}
