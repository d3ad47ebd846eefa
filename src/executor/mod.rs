// Executor module - runs compiled tasks against remote sessions

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::compiler::CompiledTask;
use crate::output::errors::DeployError;

pub mod backup;
pub mod engine;
pub mod local;
pub mod operation;
pub mod runner;
pub mod ssh;
#[cfg(test)]
pub(crate) mod testing;

pub use engine::{select_upload_files, Engine};
pub use local::{LocalConnection, LocalConnector};
pub use operation::Operation;
pub use runner::{limit_tasks, run_tasks};
pub use ssh::{SshConnection, SshConnector, SshTransfer};

/// Progress callback for uploads: (bytes sent, total bytes)
pub type ProgressFn<'a> = dyn FnMut(u64, u64) + Send + 'a;

/// Command session to one host
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a command and return the result
    async fn exec(&self, cmd: &str) -> Result<CommandResult, DeployError>;

    /// Release the session
    async fn close(&self);

    /// Get the host name for this connection
    fn host_name(&self) -> &str;
}

/// File-transfer session to one host, used for a single upload
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Stream a local file to `remote_path`, reporting progress as bytes go out
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        progress: &mut ProgressFn<'_>,
    ) -> Result<(), DeployError>;

    async fn close(&self);
}

/// Opens command and transfer sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Connection>, DeployError>;

    async fn connect_transfer(&self, target: &Target)
        -> Result<Box<dyn FileTransfer>, DeployError>;
}

/// Where and as whom to connect
#[derive(Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Target {
    pub fn from_task(task: &CompiledTask) -> Self {
        Target {
            host: task.host.clone(),
            port: task.port,
            username: task.username.clone(),
            password: task.password.clone(),
        }
    }

    /// Use `password` when the descriptor left the password empty
    pub fn with_fallback_password(mut self, password: Option<&str>) -> Self {
        if self.password.is_empty() {
            if let Some(password) = password {
                self.password = password.to_string();
            }
        }
        self
    }

    /// user@host:port
    pub fn ssh_target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    /// Check if this target should use a local connection
    pub fn is_local(&self) -> bool {
        LocalConnection::should_use_local(&self.host)
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.ssh_target())
    }
}

/// Result of executing a command
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Engine settings shared across all servers of a run
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TCP connect and session timeout handed to the SSH layer
    pub connect_timeout: Duration,
    /// Password for servers whose descriptor password is empty
    pub fallback_password: Option<String>,
    /// Date used for backup stamps; today when unset
    pub date: Option<NaiveDate>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            connect_timeout: Duration::from_secs(30),
            fallback_password: None,
            date: None,
        }
    }
}

/// Routes localhost targets to the local connector and everything else to SSH
pub struct DefaultConnector {
    ssh: SshConnector,
    local: LocalConnector,
}

impl DefaultConnector {
    pub fn new(config: &EngineConfig) -> Self {
        DefaultConnector {
            ssh: SshConnector::new().with_connect_timeout(config.connect_timeout),
            local: LocalConnector,
        }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Connection>, DeployError> {
        if target.is_local() {
            self.local.connect(target).await
        } else {
            self.ssh.connect(target).await
        }
    }

    async fn connect_transfer(
        &self,
        target: &Target,
    ) -> Result<Box<dyn FileTransfer>, DeployError> {
        if target.is_local() {
            self.local.connect_transfer(target).await
        } else {
            self.ssh.connect_transfer(target).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(password: &str) -> CompiledTask {
        CompiledTask {
            host: "db1".to_string(),
            port: 2022,
            username: "ops".to_string(),
            password: password.to_string(),
            commands: vec![],
        }
    }

    #[test]
    fn test_fallback_password_only_fills_empty() {
        let target = Target::from_task(&task("")).with_fallback_password(Some("prompted"));
        assert_eq!(target.password, "prompted");

        let target = Target::from_task(&task("given")).with_fallback_password(Some("prompted"));
        assert_eq!(target.password, "given");
    }

    #[test]
    fn test_target_debug_hides_password() {
        let target = Target::from_task(&task("s3cret"));
        let debug = format!("{:?}", target);
        assert_eq!(debug, "ops@db1:2022");
    }
}
