// Local command execution and file copies for localhost targets

use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::{CommandResult, Connection, Connector, FileTransfer, ProgressFn, Target};
use crate::output::errors::DeployError;

const COPY_CHUNK: usize = 32 * 1024;

/// Local connection for executing commands on localhost
pub struct LocalConnection {
    host_name: String,
}

impl LocalConnection {
    /// Create a new local connection
    pub fn new(host_name: impl Into<String>) -> Self {
        LocalConnection {
            host_name: host_name.into(),
        }
    }

    /// Check if a host should use local connection
    pub fn should_use_local(host_name: &str) -> bool {
        host_name == "localhost" || host_name == "127.0.0.1" || host_name == "::1"
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn exec(&self, cmd: &str) -> Result<CommandResult, DeployError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .map_err(|e| DeployError::remote(&self.host_name, cmd, format!("Failed to execute local command: {}", e)))?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn close(&self) {}

    fn host_name(&self) -> &str {
        &self.host_name
    }
}

/// "Uploads" to localhost are plain file copies
pub struct LocalTransfer {
    host_name: String,
}

#[async_trait]
impl FileTransfer for LocalTransfer {
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        progress: &mut ProgressFn<'_>,
    ) -> Result<(), DeployError> {
        let mut source = tokio::fs::File::open(local_path).await.map_err(|e| {
            DeployError::filesystem(format!("Failed to open local file: {}", e), local_path)
        })?;
        let total = source
            .metadata()
            .await
            .map_err(|e| DeployError::filesystem(format!("Failed to stat local file: {}", e), local_path))?
            .len();

        let copy_error = |e: std::io::Error| {
            DeployError::remote(
                &self.host_name,
                format!("cp {} {}", local_path.display(), remote_path),
                format!("Failed to write destination: {}", e),
            )
        };
        let mut dest = tokio::fs::File::create(remote_path).await.map_err(copy_error)?;

        let mut buf = vec![0u8; COPY_CHUNK];
        let mut sent = 0u64;
        progress(sent, total);

        loop {
            let n = source.read(&mut buf).await.map_err(|e| {
                DeployError::filesystem(format!("Failed to read local file: {}", e), local_path)
            })?;
            if n == 0 {
                break;
            }

            dest.write_all(&buf[..n]).await.map_err(copy_error)?;
            sent += n as u64;
            progress(sent, total);
        }

        dest.flush().await.map_err(copy_error)?;
        Ok(())
    }

    async fn close(&self) {}
}

/// Connector for localhost targets
pub struct LocalConnector;

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Connection>, DeployError> {
        Ok(Box::new(LocalConnection::new(target.host.clone())))
    }

    async fn connect_transfer(
        &self,
        target: &Target,
    ) -> Result<Box<dyn FileTransfer>, DeployError> {
        Ok(Box::new(LocalTransfer {
            host_name: target.host.clone(),
        }))
    }
}
