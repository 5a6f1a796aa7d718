use std::path::Path;
use std::time::Duration;

use libkerf_core::types::ContextRequest;
use libkerf_core::KerfError;
use libkerf_engine::ContextManager;
use serde::Serialize;

use crate::cli::Cli;
use crate::output::output_success;

pub struct CollectArgs {
    pub task: String,
    pub role: String,
    pub phase: String,
    pub budget: i64,
    pub agent: Option<String>,
    pub deadline_ms: Option<u64>,
    pub render: bool,
}

#[derive(Serialize)]
struct EntrySummary<'a> {
    path: &'a str,
    content_type: &'a str,
    level: &'a str,
    tokens: usize,
    relevance: f64,
}

pub async fn run(cli: &Cli, root: &Path, args: CollectArgs) -> Result<(), KerfError> {
    let manager = ContextManager::open(root)?;
    let mut request = ContextRequest::new(args.task, args.role, args.phase, args.budget, manager.root());
    if let Some(agent) = args.agent {
        request = request.with_agent_id(agent);
    }

    let result = manager
        .collect_context(request, args.deadline_ms.map(Duration::from_millis))
        .await;
    manager.close().await?;
    let bundle = result?;

    if args.render && !cli.json {
        if !cli.quiet {
            print!("{}", bundle.render());
        }
        return Ok(());
    }
    if args.render {
        output_success(cli, bundle.as_ref());
        return Ok(());
    }

    let entries: Vec<EntrySummary> = bundle
        .entries
        .iter()
        .map(|e| EntrySummary {
            path: &e.path,
            content_type: e.content_type.as_str(),
            level: e.level.as_str(),
            tokens: e.tokens,
            relevance: e.relevance,
        })
        .collect();
    output_success(
        cli,
        serde_json::json!({
            "fingerprint": bundle.fingerprint,
            "generation": bundle.generation,
            "token_budget": bundle.token_budget,
            "total_tokens": bundle.total_tokens,
            "truncated": bundle.truncated,
            "entries": entries,
        }),
    );
    Ok(())
}
