use crate::core::client::{Client, Credentials, Registry};
use crate::core::dsn::{parse_dsn, DsnError, Server, ServerEntry, ServerSpec};
use crate::core::library::{ClientLibrary, MIN_CLIENT_VERSION};
use crate::core::options::{
    resolve_all, ClientOption, OptionError, OptionMap, OptionValue, Serializer, Setting, Symbol,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options applied to every new handle before the caller's own
fn default_settings() -> Vec<(ClientOption, Setting)> {
    vec![
        (ClientOption::Compression, Setting::Bool(true)),
        (ClientOption::Serializer, Setting::Serializer(Serializer::Php)),
        (ClientOption::BinaryProtocol, Setting::Bool(true)),
        (ClientOption::NoBlock, Setting::Bool(true)),
        (ClientOption::TcpNodelay, Setting::Bool(true)),
        (ClientOption::LibketamaCompatible, Setting::Bool(true)),
    ]
}

/// Everything needed to configure a handle, validated but not yet applied
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionPlan {
    pub persistent_id: Option<String>,
    pub servers: Vec<Server>,
    pub settings: Vec<(ClientOption, Setting)>,
    pub credentials: Option<Credentials>,
}

/// Builds configured [`Client`] handles from server specs and option maps
#[derive(Debug, Clone, Copy)]
pub struct ConnectionBuilder<'a> {
    registry: &'a Registry,
    library: ClientLibrary,
}

impl Default for ConnectionBuilder<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionBuilder<'static> {
    /// Builder using the bundled client and the process-wide registry
    pub fn new() -> Self {
        Self {
            registry: Registry::global(),
            library: ClientLibrary::current(),
        }
    }
}

impl<'a> ConnectionBuilder<'a> {
    pub fn with_registry<'b>(self, registry: &'b Registry) -> ConnectionBuilder<'b> {
        ConnectionBuilder {
            registry,
            library: self.library,
        }
    }

    pub fn with_library(mut self, library: ClientLibrary) -> Self {
        self.library = library;
        self
    }

    /// Validate the server spec and options without touching any handle
    pub fn plan(
        &self,
        servers: &ServerSpec,
        options: &OptionMap,
    ) -> Result<ConnectionPlan, ConnectionError> {
        if !self.library.is_supported() {
            return Err(ConnectionError::EnvironmentUnavailable(format!(
                "memcached client >= {} required, found {}",
                MIN_CLIENT_VERSION, self.library.version
            )));
        }

        let mut merged = options.clone();
        let mut username = reserved_string(options, "username")?;
        let mut password = reserved_string(options, "password")?;
        let mut server_list = Vec::new();

        for entry in servers.entries() {
            match entry {
                ServerEntry::Dsn(dsn) => {
                    let parsed = parse_dsn(dsn)?;
                    if parsed.username.is_some() || parsed.password.is_some() {
                        username = parsed.username;
                        password = parsed.password;
                    }
                    // Query parameters win over explicitly passed options
                    for (key, value) in parsed.options {
                        merged.retain(|existing, _| !existing.eq_ignore_ascii_case(&key));
                        merged.insert(key, value);
                    }
                    server_list.extend(parsed.servers);
                }
                ServerEntry::Pair(host, port) => server_list.push(endpoint(host, *port, 0)),
                ServerEntry::Address { host, port, weight } => {
                    server_list.push(endpoint(host, *port, *weight))
                }
            }
        }

        let persistent_id = reserved_string(&merged, "persistent_id")?.filter(|id| !id.is_empty());

        let mut settings = default_settings();
        for (option, setting) in resolve_all(&merged)? {
            debug!("Option {} => {}", option, setting);
            settings.retain(|(existing, _)| *existing != option);
            settings.push((option, setting));
        }

        let serializer = settings
            .iter()
            .find(|(option, _)| *option == ClientOption::Serializer)
            .map(|(_, setting)| setting);
        if let Some(Setting::Serializer(serializer)) = serializer {
            if !serializer.is_allowed() {
                return Err(ConnectionError::UnsupportedChoice {
                    option: Serializer::OPTION,
                    allowed: Serializer::ALLOWED.iter().map(|s| s.symbol()).collect(),
                });
            }
        }

        let credentials = match (username, password) {
            (None, None) => None,
            (username, password) => Some(Credentials::new(
                username.unwrap_or_default(),
                password.unwrap_or_default(),
            )),
        };
        let credentials = match credentials {
            Some(_) if !self.library.sasl => {
                warn!("Missing SASL support: ignoring credentials for memcached connection");
                None
            }
            other => other,
        };

        Ok(ConnectionPlan {
            persistent_id,
            servers: server_list,
            settings,
            credentials,
        })
    }

    /// Create (or reuse, for a persistent id) a configured client handle
    pub fn build(
        &self,
        servers: impl Into<ServerSpec>,
        options: &OptionMap,
    ) -> Result<Arc<Client>, ConnectionError> {
        let plan = self.plan(&servers.into(), options)?;

        let client = match &plan.persistent_id {
            Some(id) => {
                let (client, reused) = self.registry.get_or_create(id);
                if reused {
                    info!("Reusing persistent memcached handle '{}'", id);
                }
                client
            }
            None => Arc::new(Client::new(None)),
        };

        let server_count = plan.servers.len();
        if client.configure(plan.settings, plan.servers, plan.credentials) {
            debug!("Registered {} memcached server(s)", server_count);
        } else {
            debug!("Server list unchanged, keeping existing entries");
        }

        Ok(client)
    }
}

/// Create a connection with the bundled client and the process-wide registry
pub fn create_connection(
    servers: impl Into<ServerSpec>,
    options: &OptionMap,
) -> Result<Arc<Client>, ConnectionError> {
    ConnectionBuilder::new().build(servers, options)
}

fn endpoint(host: &str, port: u16, weight: u32) -> Server {
    if host.starts_with('/') {
        Server::unix(host).with_weight(weight)
    } else {
        Server::tcp(host, port).with_weight(weight)
    }
}

fn reserved_string(options: &OptionMap, key: &'static str) -> Result<Option<String>, ConnectionError> {
    let value = options
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .map(|(_, value)| value);
    match value {
        None => Ok(None),
        Some(OptionValue::Str(s)) => Ok(Some(s.clone())),
        Some(OptionValue::Int(i)) => Ok(Some(i.to_string())),
        Some(other) => Err(ConnectionError::Configuration(OptionError::InvalidValue {
            option: key,
            expected: "a string",
            value: other.to_string(),
        })),
    }
}

fn quote_choices(allowed: &[&str]) -> String {
    allowed
        .iter()
        .map(|choice| format!("\"{}\"", choice))
        .collect::<Vec<_>>()
        .join(" or ")
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid configuration: {0}")]
    Configuration(#[from] OptionError),
    #[error("{option} option must be {}", quote_choices(.allowed))]
    UnsupportedChoice {
        option: &'static str,
        allowed: Vec<&'static str>,
    },
    #[error("Environment unavailable: {0}")]
    EnvironmentUnavailable(String),
    #[error("{0}")]
    Parse(#[from] DsnError),
}
