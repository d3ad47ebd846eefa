// Human-readable error messages for shipwright

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;

use crate::compiler::CompileError;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // https://no-color.org/
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    // Errors are written to stderr
    std::io::stderr().is_terminal()
}

/// All error kinds surfaced by a deployment run
#[derive(Debug)]
pub enum DeployError {
    /// Bad variable reference or placeholder in the descriptor
    Compile(CompileError),

    /// Descriptor could not be deserialized
    Descriptor {
        message: String,
        suggestion: Option<String>,
    },

    /// Local I/O errors unrelated to upload sources
    Io {
        message: String,
        path: Option<PathBuf>,
    },

    /// Handshake or authentication failure for a command or transfer session
    Connection {
        host: String,
        message: String,
        suggestion: Option<String>,
    },

    /// A dispatched operation failed on the remote side
    Remote(Box<RemoteError>),

    /// Local upload source missing or unreadable
    Filesystem {
        message: String,
        path: PathBuf,
    },

    /// Console interaction and other process-level failures
    Runtime {
        message: String,
        suggestion: Option<String>,
    },
}

#[derive(Debug)]
pub struct RemoteError {
    pub host: String,
    pub command: String,
    pub message: String,
    pub exit_code: Option<i32>,
    pub stderr: Option<String>,
}

impl DeployError {
    pub fn remote(host: impl Into<String>, command: impl Into<String>, message: impl Into<String>) -> Self {
        DeployError::Remote(Box::new(RemoteError {
            host: host.into(),
            command: command.into(),
            message: message.into(),
            exit_code: None,
            stderr: None,
        }))
    }

    /// Build a remote error from a command that exited non-zero
    pub fn remote_exit(host: &str, command: &str, exit_code: i32, stderr: &str) -> Self {
        DeployError::Remote(Box::new(RemoteError {
            host: host.to_string(),
            command: command.to_string(),
            message: format!("Command exited with code {}", exit_code),
            exit_code: Some(exit_code),
            stderr: Some(stderr.to_string()),
        }))
    }

    pub fn filesystem(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        DeployError::Filesystem {
            message: message.into(),
            path: path.into(),
        }
    }

    /// Short category label, used in the run summary
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Compile(_) => "compile",
            DeployError::Descriptor { .. } => "descriptor",
            DeployError::Io { .. } => "io",
            DeployError::Connection { .. } => "connection",
            DeployError::Remote(_) => "remote",
            DeployError::Filesystem { .. } => "filesystem",
            DeployError::Runtime { .. } => "runtime",
        }
    }
}

impl From<CompileError> for DeployError {
    fn from(err: CompileError) -> Self {
        DeployError::Compile(err)
    }
}

impl std::error::Error for DeployError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeployError::Compile(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !should_use_colors() {
            colored::control::set_override(false);
        }

        match self {
            DeployError::Compile(err) => {
                writeln!(f, "{}: {}", "COMPILE ERROR".red().bold(), err)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), err.host())?;
                writeln!(f, "  {} #{}", "Package:".dimmed(), err.package())?;
                writeln!(f)?;
                writeln!(
                    f,
                    "{}: {}",
                    "Hint".yellow().bold(),
                    "Fix the descriptor; no server has been contacted"
                )?;
                Ok(())
            }

            DeployError::Descriptor {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "DESCRIPTOR ERROR".red().bold(), message)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }

            DeployError::Io { message, path } => {
                writeln!(f, "{}: {}", "I/O ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                }
                Ok(())
            }

            DeployError::Connection {
                host,
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "CONNECTION ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), host)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }

            DeployError::Remote(err) => {
                writeln!(f, "{}: {}", "REMOTE ERROR".red().bold(), err.message)?;
                writeln!(f, "  {} {}", "Host:".dimmed(), err.host)?;
                writeln!(f, "  {} {}", "Command:".dimmed(), err.command)?;

                if let Some(ref stderr) = err.stderr {
                    if !stderr.is_empty() {
                        writeln!(f)?;
                        writeln!(f, "  {}:", "stderr".dimmed())?;
                        for line in stderr.lines().take(10) {
                            writeln!(f, "    {}", line)?;
                        }
                    }
                }

                Ok(())
            }

            DeployError::Filesystem { message, path } => {
                writeln!(f, "{}: {}", "FILESYSTEM ERROR".red().bold(), message)?;
                writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                Ok(())
            }

            DeployError::Runtime {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "RUNTIME ERROR".red().bold(), message)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_display() {
        let err = DeployError::from(CompileError::GlobalOutOfRange {
            host: "10.0.0.5".to_string(),
            package: 2,
            index: 7,
            len: 3,
        });

        let output = format!("{}", err);
        let clean_output = console::strip_ansi_codes(&output);

        assert!(clean_output.contains("GLOBAL7"));
        assert!(clean_output.contains("10.0.0.5"));
        assert!(clean_output.contains("#2"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_remote_exit_display_includes_stderr() {
        let err = DeployError::remote_exit("web1", "systemctl restart app", 5, "unit not found\n");
        let output = format!("{}", err);
        let clean_output = console::strip_ansi_codes(&output);

        assert!(clean_output.contains("exited with code 5"));
        assert!(clean_output.contains("systemctl restart app"));
        assert!(clean_output.contains("unit not found"));
        assert_eq!(err.kind(), "remote");
    }
}
