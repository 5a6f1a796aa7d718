mod cli;
mod commands;
mod output;

use std::path::PathBuf;

use clap::Parser;
use cli::{Cli, Command};
use libkerf_core::KerfError;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run_command(&cli).await {
        output::output_error(&cli, &e);
        std::process::exit(e.exit_code());
    }
}

async fn run_command(cli: &Cli) -> Result<(), KerfError> {
    let root = project_root(cli)?;
    debug!(root = %root.display(), "project root");
    match &cli.command {
        Command::Index { full, stats } => commands::index::run(cli, &root, *full, *stats),
        Command::Search { query, kind, limit } => commands::search::run(cli, &root, query, kind, *limit),
        Command::Related { path, limit } => commands::related::run(cli, &root, path, *limit),
        Command::Collect {
            task,
            role,
            phase,
            budget,
            agent,
            deadline_ms,
            render,
        } => {
            let args = commands::collect::CollectArgs {
                task: task.clone(),
                role: role.clone(),
                phase: phase.clone(),
                budget: *budget,
                agent: agent.clone(),
                deadline_ms: *deadline_ms,
                render: *render,
            };
            commands::collect::run(cli, &root, args).await
        }
        Command::Memory { cmd } => commands::memory::run(cli, &root, cmd.clone()),
    }
}

fn project_root(cli: &Cli) -> Result<PathBuf, KerfError> {
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    if !root.is_dir() {
        return Err(KerfError::Validation(format!("not a directory: {}", root.display())));
    }
    Ok(root)
}
