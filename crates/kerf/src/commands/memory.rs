use std::path::Path;

use libkerf_core::config::memory_dir;
use libkerf_core::memory::AgentMemory;
use libkerf_core::types::MemoryRecord;
use libkerf_core::KerfError;

use super::config_for;
use crate::cli::{Cli, MemoryCommand};
use crate::output::{output_success, print_human};

pub fn run(cli: &Cli, root: &Path, cmd: MemoryCommand) -> Result<(), KerfError> {
    let config = config_for(root)?;
    let memory = AgentMemory::open(&memory_dir(root), config.memory)?;
    match cmd {
        MemoryCommand::List => {
            let agents = memory.agents()?;
            output_success(cli, serde_json::json!({ "agents": agents }));
        }
        MemoryCommand::Show { agent, records } => {
            let summary = memory.summary(&agent, records)?;
            if cli.json {
                output_success(
                    cli,
                    serde_json::json!({
                        "agent": agent,
                        "summary": summary,
                        "pending_follow_ups": memory.pending_follow_ups(&agent)?,
                        "patterns": memory.patterns_for(&agent)?,
                    }),
                );
            } else {
                print_human(cli, summary.as_deref().unwrap_or("no memory recorded"));
            }
        }
        MemoryCommand::Record {
            agent,
            task,
            decision,
            learning,
            follow_up,
            resolves,
            file,
        } => {
            let mut record = MemoryRecord::new(agent.as_str(), String::new())
                .with_summary(task)
                .with_linked_files(file);
            for d in decision {
                record = record.decision(d);
            }
            for l in learning {
                record = record.learning(l);
            }
            for f in follow_up {
                record = record.follow_up(f);
            }
            for r in resolves {
                record = record.resolves(r);
            }
            memory.record(&record)?;
            output_success(cli, serde_json::json!({ "agent": agent, "record_id": record.record_id }));
        }
        MemoryCommand::Prune { agent, keep } => {
            let dropped = memory.prune(&agent, keep)?;
            output_success(cli, serde_json::json!({ "agent": agent, "dropped": dropped, "kept": keep }));
        }
    }
    Ok(())
}
