use crate::core::builder::{ConnectionBuilder, ConnectionError};
use crate::core::client::Client;
use crate::core::dsn::ServerSpec;
use crate::core::options::OptionMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub connections: HashMap<String, ConnectionConfig>,
}

/// One named memcached connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// A DSN, or a list of DSNs, `[host, port]` pairs and `{host, port, weight}` maps
    #[serde(default)]
    pub servers: ServerSpec,
    #[serde(default)]
    pub options: OptionMap,
}

impl ConnectionConfig {
    /// Build the client handle described by this entry
    pub fn connect(&self) -> Result<Arc<Client>, ConnectionError> {
        self.connect_with(&ConnectionBuilder::new())
    }

    pub fn connect_with(&self, builder: &ConnectionBuilder<'_>) -> Result<Arc<Client>, ConnectionError> {
        builder.build(self.servers.clone(), &self.options)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_string())
            } else {
                ConfigError::IoError(e.to_string())
            }
        })?;

        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string (useful for testing)
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        // Validate the configuration
        config.validate()?;

        Ok(config)
    }

    /// Check every connection's servers and options without creating handles
    pub fn validate(&self) -> Result<(), ConfigError> {
        let builder = ConnectionBuilder::new();
        for (name, connection) in &self.connections {
            builder
                .plan(&connection.servers, &connection.options)
                .map_err(|e| {
                    ConfigError::ValidationError(format!("Connection '{}': {}", name, e))
                })?;
        }
        Ok(())
    }

    pub fn connection(&self, name: &str) -> Result<&ConnectionConfig, ConfigError> {
        self.connections
            .get(name)
            .ok_or_else(|| ConfigError::UnknownConnection(name.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),
}
