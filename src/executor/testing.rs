// Scripted in-memory sessions for executor tests

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CommandResult, Connection, Connector, FileTransfer, ProgressFn, Target};
use crate::output::errors::DeployError;

type Log = Arc<Mutex<Vec<String>>>;

/// Canned command results; anything unscripted succeeds with empty output
#[derive(Debug, Clone, Default)]
struct Script {
    responses: HashMap<String, CommandResult>,
    refused_hosts: HashSet<String>,
}

impl Script {
    fn result_for(&self, cmd: &str) -> CommandResult {
        self.responses.get(cmd).cloned().unwrap_or_default()
    }
}

pub(crate) struct FakeConnection {
    host: String,
    script: Script,
    log: Log,
}

impl FakeConnection {
    pub fn new(host: &str) -> Self {
        FakeConnection {
            host: host.to_string(),
            script: Script::default(),
            log: Log::default(),
        }
    }

    pub fn respond(mut self, cmd: &str, stdout: &str) -> Self {
        self.script.responses.insert(
            cmd.to_string(),
            CommandResult {
                stdout: stdout.to_string(),
                ..Default::default()
            },
        );
        self
    }

    pub fn fail(mut self, cmd: &str, exit_code: i32) -> Self {
        self.script.responses.insert(
            cmd.to_string(),
            CommandResult {
                stderr: "scripted failure".to_string(),
                exit_code,
                ..Default::default()
            },
        );
        self
    }

    /// Commands executed on this connection, in order
    pub fn commands(&self) -> Vec<String> {
        let prefix = format!("exec {} ", self.host);
        self.log
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn exec(&self, cmd: &str) -> Result<CommandResult, DeployError> {
        self.log
            .lock()
            .push(format!("exec {} {}", self.host, cmd));
        Ok(self.script.result_for(cmd))
    }

    async fn close(&self) {
        self.log.lock().push(format!("close {}", self.host));
    }

    fn host_name(&self) -> &str {
        &self.host
    }
}

struct FakeTransfer {
    host: String,
    log: Log,
}

#[async_trait]
impl FileTransfer for FakeTransfer {
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        progress: &mut ProgressFn<'_>,
    ) -> Result<(), DeployError> {
        let total = std::fs::metadata(local_path)
            .map_err(|e| DeployError::filesystem(e.to_string(), local_path))?
            .len();
        progress(total / 2, total);
        progress(total, total);

        let name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.log
            .lock()
            .push(format!("upload {} {} -> {}", self.host, name, remote_path));
        Ok(())
    }

    async fn close(&self) {
        self.log
            .lock()
            .push(format!("transfer-close {}", self.host));
    }
}

/// Connector handing out scripted sessions that share one event log
#[derive(Default)]
pub(crate) struct FakeConnector {
    script: Script,
    log: Log,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, cmd: &str, stdout: &str) -> Self {
        self.script.responses.insert(
            cmd.to_string(),
            CommandResult {
                stdout: stdout.to_string(),
                ..Default::default()
            },
        );
        self
    }

    pub fn fail(mut self, cmd: &str, exit_code: i32) -> Self {
        self.script.responses.insert(
            cmd.to_string(),
            CommandResult {
                exit_code,
                ..Default::default()
            },
        );
        self
    }

    /// Make every connection attempt to `host` fail authentication
    pub fn refuse(mut self, host: &str) -> Self {
        self.script.refused_hosts.insert(host.to_string());
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn check_refused(&self, target: &Target) -> Result<(), DeployError> {
        if self.script.refused_hosts.contains(&target.host) {
            return Err(DeployError::Connection {
                host: target.host.clone(),
                message: "Authentication failed".to_string(),
                suggestion: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Connection>, DeployError> {
        self.log
            .lock()
            .push(format!("connect {}", target.host));
        self.check_refused(target)?;

        Ok(Box::new(FakeConnection {
            host: target.host.clone(),
            script: self.script.clone(),
            log: self.log.clone(),
        }))
    }

    async fn connect_transfer(
        &self,
        target: &Target,
    ) -> Result<Box<dyn FileTransfer>, DeployError> {
        self.log
            .lock()
            .push(format!("transfer {}", target.host));
        self.check_refused(target)?;

        Ok(Box::new(FakeTransfer {
            host: target.host.clone(),
            log: self.log.clone(),
        }))
    }
}
