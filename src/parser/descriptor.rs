// Deployment descriptor types and loading

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::output::errors::DeployError;

/// Parsed deployment descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Shared values referenced from packages as `GLOBAL<index>`
    #[serde(default)]
    pub globals: Vec<String>,
    #[serde(default)]
    pub servers: Vec<Server>,
}

/// A target server and the packages to apply to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub packages: Vec<Package>,
}

/// A group of command templates sharing one variable array
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub variables: Vec<String>,
}

fn default_port() -> u16 {
    22
}

// Descriptors written for the original tool carry `"variables": null`
fn nullable_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Server {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Server {
            host: host.into(),
            port: default_port(),
            username: username.into(),
            password: String::new(),
            packages: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_package(mut self, package: Package) -> Self {
        self.packages.push(package);
        self
    }
}

impl Package {
    /// Create an enabled package with the given order
    pub fn new(order: i64) -> Self {
        Package {
            enable: true,
            order,
            ..Default::default()
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enable = false;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variables.push(variable.into());
        self
    }
}

/// Load a descriptor, picking the format from the file extension
pub fn load_descriptor_file(path: &Path) -> Result<Descriptor, DeployError> {
    let content = std::fs::read_to_string(path).map_err(|e| DeployError::Io {
        message: format!("Failed to read descriptor: {}", e),
        path: Some(path.to_path_buf()),
    })?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    if is_yaml {
        parse_descriptor_yaml(&content)
    } else {
        parse_descriptor_json(&content)
    }
}

/// Parse a JSON descriptor
pub fn parse_descriptor_json(content: &str) -> Result<Descriptor, DeployError> {
    serde_json::from_str(content).map_err(|e| DeployError::Descriptor {
        message: format!("Invalid descriptor JSON: {}", e),
        suggestion: Some(
            "Expected top-level \"globals\" and \"servers\" keys".to_string(),
        ),
    })
}

/// Parse a YAML descriptor
pub fn parse_descriptor_yaml(content: &str) -> Result<Descriptor, DeployError> {
    serde_yaml::from_str(content).map_err(|e| DeployError::Descriptor {
        message: format!("Invalid descriptor YAML: {}", e),
        suggestion: Some("Expected top-level 'globals' and 'servers' keys".to_string()),
    })
}
