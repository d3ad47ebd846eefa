// Sequential run over all compiled tasks

use std::time::Instant;

use tracing::{error, info};

use super::Engine;
use crate::compiler::CompiledTask;
use crate::output::errors::DeployError;
use crate::output::terminal::RunRecap;

/// Execute tasks one server at a time
///
/// The first error stops the run; servers after the failing one are never
/// contacted. Each task is dropped once its server is done.
pub async fn run_tasks(tasks: Vec<CompiledTask>, engine: &Engine<'_>) -> Result<RunRecap, DeployError> {
    let started = Instant::now();
    let total = tasks.len();
    let mut recap = RunRecap::new();

    for (i, task) in tasks.into_iter().enumerate() {
        engine
            .output()
            .print_server_header(&engine.target_for(&task), i + 1, total);

        match engine.execute(&task).await {
            Ok(report) => {
                info!(host = %report.host, executed = report.executed, "server done");
                recap.record(report);
            }
            Err(e) => {
                error!(host = %task.host, kind = e.kind(), remaining = total - i - 1, "run halted");
                return Err(e);
            }
        }
    }

    recap.total_duration = started.elapsed();
    Ok(recap)
}

/// Keep only tasks whose host is listed in `limit` (comma-separated)
pub fn limit_tasks(tasks: Vec<CompiledTask>, limit: Option<&str>) -> Vec<CompiledTask> {
    let Some(limit) = limit else {
        return tasks;
    };

    let hosts: Vec<&str> = limit
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .collect();

    tasks
        .into_iter()
        .filter(|t| hosts.contains(&t.host.as_str()))
        .collect()
}
