// SSH command and SFTP transfer sessions

use async_trait::async_trait;
use std::fs::File;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::{KeyboardInteractivePrompt, Session};
use tracing::debug;

use super::{CommandResult, Connection, Connector, FileTransfer, ProgressFn, Target};
use crate::output::errors::DeployError;

const UPLOAD_CHUNK: usize = 32 * 1024;

/// Opens authenticated ssh2 sessions
pub struct SshConnector {
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new() -> Self {
        SshConnector {
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// TCP connect, handshake, authenticate
    fn open_session(&self, target: &Target) -> Result<Session, DeployError> {
        let address = (target.host.as_str(), target.port)
            .to_socket_addrs()
            .map_err(|e| DeployError::Connection {
                host: target.host.clone(),
                message: format!("Cannot resolve address: {}", e),
                suggestion: Some("Check the host name in the descriptor".to_string()),
            })?
            .next()
            .ok_or_else(|| DeployError::Connection {
                host: target.host.clone(),
                message: "Host name resolved to no address".to_string(),
                suggestion: None,
            })?;

        let tcp = TcpStream::connect_timeout(&address, self.connect_timeout).map_err(|e| {
            DeployError::Connection {
                host: target.host.clone(),
                message: format!("Connection failed: {}", e),
                suggestion: ssh_connection_suggestion(&e),
            }
        })?;

        let mut session = Session::new().map_err(|e| DeployError::Connection {
            host: target.host.clone(),
            message: format!("Failed to create SSH session: {}", e),
            suggestion: None,
        })?;

        session.set_tcp_stream(tcp);
        session.set_timeout(self.connect_timeout.as_millis() as u32);

        session.handshake().map_err(|e| DeployError::Connection {
            host: target.host.clone(),
            message: format!("SSH handshake failed: {}", e),
            suggestion: Some("Check SSH service is running on the target".to_string()),
        })?;

        // Commands may legitimately run longer than the connect timeout
        session.set_timeout(0);

        if !authenticate(&session, target) {
            return Err(DeployError::Connection {
                host: target.host.clone(),
                message: format!("Authentication failed for user '{}'", target.username),
                suggestion: Some(
                    "Check the password in the descriptor, or use --ask-pass".to_string(),
                ),
            });
        }

        debug!(server = ?target, "ssh session established");
        Ok(session)
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Password first, keyboard-interactive as fallback, agent when no password was supplied
fn authenticate(session: &Session, target: &Target) -> bool {
    let user = target.username.as_str();

    if !target.password.is_empty() {
        if session.userauth_password(user, &target.password).is_ok() {
            return true;
        }

        // Used by some PAM configurations
        let mut prompter = PasswordPrompter(target.password.clone());
        return session
            .userauth_keyboard_interactive(user, &mut prompter)
            .is_ok();
    }

    if let Ok(mut agent) = session.agent() {
        if agent.connect().is_ok() {
            agent.list_identities().ok();
            for identity in agent.identities().unwrap_or_default() {
                if agent.userauth(user, &identity).is_ok() {
                    return true;
                }
            }
        }
    }

    false
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Connection>, DeployError> {
        let session = self.open_session(target)?;
        Ok(Box::new(SshConnection {
            session,
            host_name: target.host.clone(),
        }))
    }

    async fn connect_transfer(
        &self,
        target: &Target,
    ) -> Result<Box<dyn FileTransfer>, DeployError> {
        let session = self.open_session(target)?;
        Ok(Box::new(SshTransfer {
            session,
            host_name: target.host.clone(),
        }))
    }
}

/// Command session to one server
pub struct SshConnection {
    session: Session,
    host_name: String,
}

impl SshConnection {
    fn exec_blocking(&self, command: &str) -> Result<CommandResult, DeployError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|e| DeployError::remote(&self.host_name, command, format!("Failed to open channel: {}", e)))?;

        channel
            .exec(command)
            .map_err(|e| DeployError::remote(&self.host_name, command, format!("Failed to execute command: {}", e)))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        channel.read_to_string(&mut stdout).map_err(|e| {
            DeployError::remote(&self.host_name, command, format!("Failed to read output: {}", e))
        })?;
        channel.stderr().read_to_string(&mut stderr).ok();

        channel.wait_close().ok();
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(CommandResult {
            stdout,
            stderr,
            exit_code,
        })
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn exec(&self, cmd: &str) -> Result<CommandResult, DeployError> {
        self.exec_blocking(cmd)
    }

    async fn close(&self) {
        self.session.disconnect(None, "done", None).ok();
    }

    fn host_name(&self) -> &str {
        &self.host_name
    }
}

/// SFTP session used for exactly one upload
pub struct SshTransfer {
    session: Session,
    host_name: String,
}

impl SshTransfer {
    fn upload_blocking(
        &self,
        local_path: &Path,
        remote_path: &str,
        progress: &mut ProgressFn<'_>,
    ) -> Result<(), DeployError> {
        let mut local = File::open(local_path).map_err(|e| {
            DeployError::filesystem(format!("Failed to open local file: {}", e), local_path)
        })?;
        let total = local
            .metadata()
            .map_err(|e| DeployError::filesystem(format!("Failed to stat local file: {}", e), local_path))?
            .len();

        let sftp = self.session.sftp().map_err(|e| self.transfer_error(remote_path, "Failed to open SFTP", e))?;

        let mut remote = sftp
            .create(Path::new(remote_path))
            .map_err(|e| self.transfer_error(remote_path, "Failed to create remote file", e))?;

        let mut buf = vec![0u8; UPLOAD_CHUNK];
        let mut sent = 0u64;
        progress(sent, total);

        loop {
            let n = local.read(&mut buf).map_err(|e| {
                DeployError::filesystem(format!("Failed to read local file: {}", e), local_path)
            })?;
            if n == 0 {
                break;
            }

            remote
                .write_all(&buf[..n])
                .map_err(|e| self.transfer_error(remote_path, "Failed to write remote file", e))?;
            sent += n as u64;
            progress(sent, total);
        }

        Ok(())
    }

    fn transfer_error(&self, remote_path: &str, what: &str, e: impl std::fmt::Display) -> DeployError {
        DeployError::remote(
            &self.host_name,
            format!("sftp put {}", remote_path),
            format!("{}: {}", what, e),
        )
    }
}

#[async_trait]
impl FileTransfer for SshTransfer {
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        progress: &mut ProgressFn<'_>,
    ) -> Result<(), DeployError> {
        self.upload_blocking(local_path, remote_path, progress)
    }

    async fn close(&self) {
        self.session.disconnect(None, "done", None).ok();
    }
}

fn ssh_connection_suggestion(e: &std::io::Error) -> Option<String> {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Some("Ensure SSH service is running on the target host".to_string())
        }
        std::io::ErrorKind::TimedOut => {
            Some("Check network connectivity and firewall rules, or raise --timeout".to_string())
        }
        std::io::ErrorKind::PermissionDenied => {
            Some("Check SSH key permissions and authentication".to_string())
        }
        _ => None,
    }
}

/// Helper for keyboard-interactive authentication
struct PasswordPrompter(String);

impl KeyboardInteractivePrompt for PasswordPrompter {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.0.clone()).collect()
    }
}
