use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kerf", about = "Prepare token-budgeted context bundles for coding agents", version)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress human-readable output
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scan or refresh the code index
    Index {
        /// Re-index every file, not only changed ones
        #[arg(long)]
        full: bool,

        /// Show index statistics without scanning
        #[arg(long)]
        stats: bool,
    },

    /// Search indexed symbols and content
    Search {
        query: String,

        /// function, class, import, content or combined
        #[arg(long, default_value = "combined")]
        kind: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Files related to a file through imports, references and shared terms
    Related {
        path: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Prepare a context bundle for a task
    Collect {
        /// Task description
        task: String,

        #[arg(long, default_value = "developer")]
        role: String,

        #[arg(long, default_value = "implementation")]
        phase: String,

        #[arg(long, default_value_t = 8000)]
        budget: i64,

        /// Agent identity for memory (defaults to the role)
        #[arg(long)]
        agent: Option<String>,

        /// Give up after this many milliseconds and return a partial bundle
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Print the bundle as prompt text instead of entry metadata
        #[arg(long)]
        render: bool,
    },

    /// Agent memory commands
    Memory {
        #[command(subcommand)]
        cmd: MemoryCommand,
    },
}

#[derive(Subcommand, Clone)]
pub enum MemoryCommand {
    /// Agents with stored memory records
    List,

    /// Summary of an agent's decisions, learnings and open follow-ups
    Show {
        agent: String,

        #[arg(long, default_value_t = 10)]
        records: usize,
    },

    /// Append a record to an agent's memory
    Record {
        agent: String,

        /// Task the record belongs to
        #[arg(long, default_value = "")]
        task: String,

        #[arg(long)]
        decision: Vec<String>,

        #[arg(long)]
        learning: Vec<String>,

        #[arg(long)]
        follow_up: Vec<String>,

        /// Follow-up this record closes
        #[arg(long)]
        resolves: Vec<String>,

        #[arg(long)]
        file: Vec<String>,
    },

    /// Keep only an agent's newest records
    Prune {
        agent: String,

        #[arg(long, default_value_t = 1000)]
        keep: usize,
    },
}
