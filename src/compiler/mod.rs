// Task compiler - turns a descriptor into per-server command sequences
//
// Compilation is pure: it never touches the network or the filesystem, so
// every configuration mistake is reported before a session is opened.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;

use crate::parser::{Descriptor, Package, Server};

/// Prefix marking a variable entry as a reference into `globals`
pub const GLOBAL_SENTINEL: &str = "GLOBAL";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{(\d+)\}").expect("valid regex"));

/// Configuration mistakes detected while compiling
///
/// `package` is the zero-based position of the package in the server's
/// declaration, independent of its `order`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Malformed global reference '{entry}': expected GLOBAL<index>")]
    MalformedGlobal {
        host: String,
        package: usize,
        entry: String,
    },

    #[error("Global reference GLOBAL{index} is out of range ({len} globals defined)")]
    GlobalOutOfRange {
        host: String,
        package: usize,
        index: usize,
        len: usize,
    },

    #[error("Placeholder {placeholder} in '{command}' has no variable ({len} defined)")]
    PlaceholderOutOfRange {
        host: String,
        package: usize,
        command: String,
        placeholder: String,
        len: usize,
    },
}

impl CompileError {
    pub fn host(&self) -> &str {
        match self {
            CompileError::MalformedGlobal { host, .. }
            | CompileError::GlobalOutOfRange { host, .. }
            | CompileError::PlaceholderOutOfRange { host, .. } => host,
        }
    }

    pub fn package(&self) -> usize {
        match self {
            CompileError::MalformedGlobal { package, .. }
            | CompileError::GlobalOutOfRange { package, .. }
            | CompileError::PlaceholderOutOfRange { package, .. } => *package,
        }
    }
}

/// Fully interpolated command sequence for one server
#[derive(Clone, PartialEq, Eq)]
pub struct CompiledTask {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub commands: Vec<String>,
}

impl fmt::Debug for CompiledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTask")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("commands", &self.commands)
            .finish()
    }
}

/// Compile every server of the descriptor
///
/// Servers without an enabled package produce no task. The first error
/// aborts the whole compilation.
pub fn compile(descriptor: &Descriptor) -> Result<Vec<CompiledTask>, CompileError> {
    let mut tasks = Vec::new();

    for server in &descriptor.servers {
        if let Some(task) = compile_server(server, &descriptor.globals)? {
            tasks.push(task);
        }
    }

    Ok(tasks)
}

fn compile_server(server: &Server, globals: &[String]) -> Result<Option<CompiledTask>, CompileError> {
    let mut packages: Vec<(usize, &Package)> = server
        .packages
        .iter()
        .enumerate()
        .filter(|(_, p)| p.enable)
        .collect();

    if packages.is_empty() {
        return Ok(None);
    }

    // Stable: equal orders keep declaration order
    packages.sort_by_key(|(_, p)| p.order);

    let mut commands = Vec::new();
    for (position, package) in packages {
        let variables = resolve_variables(&server.host, position, &package.variables, globals)?;

        for template in &package.commands {
            commands.push(interpolate(&server.host, position, template, &variables)?);
        }
    }

    Ok(Some(CompiledTask {
        host: server.host.clone(),
        port: server.port,
        username: server.username.clone(),
        password: server.password.clone(),
        commands,
    }))
}

/// Replace `GLOBAL<n>` entries with `globals[n]`; other entries pass through
fn resolve_variables(
    host: &str,
    package: usize,
    variables: &[String],
    globals: &[String],
) -> Result<Vec<String>, CompileError> {
    variables
        .iter()
        .map(|entry| {
            let Some(suffix) = entry.strip_prefix(GLOBAL_SENTINEL) else {
                return Ok(entry.clone());
            };

            if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CompileError::MalformedGlobal {
                    host: host.to_string(),
                    package,
                    entry: entry.clone(),
                });
            }

            // All digits; only overflow can fail here, which is out of range anyway
            let index = suffix.parse::<usize>().unwrap_or(usize::MAX);

            globals
                .get(index)
                .cloned()
                .ok_or_else(|| CompileError::GlobalOutOfRange {
                    host: host.to_string(),
                    package,
                    index,
                    len: globals.len(),
                })
        })
        .collect()
}

/// Substitute `{N}` placeholders in a single pass
fn interpolate(
    host: &str,
    package: usize,
    template: &str,
    variables: &[String],
) -> Result<String, CompileError> {
    let mut output = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).expect("group 0 always matches");
        output.push_str(&template[last..whole.start()]);
        output.push_str(lookup(host, package, template, &caps, variables)?);
        last = whole.end();
    }

    output.push_str(&template[last..]);
    Ok(output)
}

fn lookup<'v>(
    host: &str,
    package: usize,
    template: &str,
    caps: &Captures<'_>,
    variables: &'v [String],
) -> Result<&'v str, CompileError> {
    caps[1]
        .parse::<usize>()
        .ok()
        .and_then(|i| variables.get(i))
        .map(String::as_str)
        .ok_or_else(|| CompileError::PlaceholderOutOfRange {
            host: host.to_string(),
            package,
            command: template.to_string(),
            placeholder: caps[0].to_string(),
            len: variables.len(),
        })
}
