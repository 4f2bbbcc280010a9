use crate::core::dsn::Server;
use crate::core::options::{ClientOption, Setting};
use crate::core::protocols::{handshake_for, ProtocolError};
use crate::core::transport::{self, SocketSettings, TransportError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// SASL credentials forwarded to every server of a handle
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Default)]
struct ClientState {
    options: BTreeMap<ClientOption, Setting>,
    servers: Vec<Server>,
    credentials: Option<Credentials>,
}

/// Configured memcached client handle.
///
/// Handles are shared (`Arc<Client>`); persistent ones live in a [`Registry`]
/// and are handed out again to every builder call using the same id.
#[derive(Debug)]
pub struct Client {
    persistent_id: Option<String>,
    state: RwLock<ClientState>,
}

impl Client {
    pub fn new(persistent_id: Option<String>) -> Self {
        Self {
            persistent_id,
            state: RwLock::new(ClientState::default()),
        }
    }

    pub fn persistent_id(&self) -> Option<&str> {
        self.persistent_id.as_deref()
    }

    fn read(&self) -> RwLockReadGuard<'_, ClientState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ClientState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A handle with no servers registered yet
    pub fn is_pristine(&self) -> bool {
        self.read().servers.is_empty()
    }

    /// Current value of `option`, falling back to the library default
    pub fn option(&self, option: ClientOption) -> Setting {
        self.read()
            .options
            .get(&option)
            .cloned()
            .unwrap_or_else(|| option.library_default())
    }

    /// Options explicitly set on this handle
    pub fn options(&self) -> BTreeMap<ClientOption, Setting> {
        self.read().options.clone()
    }

    pub fn set_option(&self, option: ClientOption, setting: Setting) {
        self.write().options.insert(option, setting);
    }

    pub fn server_list(&self) -> Vec<Server> {
        self.read().servers.clone()
    }

    pub fn add_servers(&self, servers: impl IntoIterator<Item = Server>) {
        self.write().servers.extend(servers);
    }

    pub fn reset_server_list(&self) {
        self.write().servers.clear();
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.read().credentials.clone()
    }

    /// Apply options, credentials and servers in one step.
    ///
    /// A handle that already has servers keeps them when the requested list
    /// names the same endpoints in the same order; otherwise the list is
    /// replaced. Returns whether the server list changed.
    pub(crate) fn configure(
        &self,
        settings: Vec<(ClientOption, Setting)>,
        servers: Vec<Server>,
        credentials: Option<Credentials>,
    ) -> bool {
        let mut state = self.write();
        state.options.extend(settings);
        if credentials.is_some() {
            state.credentials = credentials;
        }

        let unchanged = state.servers.len() == servers.len()
            && state
                .servers
                .iter()
                .zip(&servers)
                .all(|(old, new)| old.same_endpoint(new));
        if unchanged && !state.servers.is_empty() {
            return false;
        }

        state.servers = servers;
        true
    }

    /// Connect to every server, authenticate if credentials are set, and ask
    /// for its version. Nothing touches the network before this is called.
    pub async fn probe(&self) -> Vec<ProbeOutcome> {
        let (servers, options, credentials) = {
            let state = self.read();
            (state.servers.clone(), state.options.clone(), state.credentials.clone())
        };
        let settings = SocketSettings::from_options(&options);
        let binary = options
            .get(&ClientOption::BinaryProtocol)
            .and_then(Setting::as_bool)
            .unwrap_or(false);
        let handshake = handshake_for(binary);

        let mut outcomes = Vec::with_capacity(servers.len());
        for server in servers {
            let result = async {
                let mut stream = transport::connect(&server, &settings).await?;
                let exchange = async {
                    if let Some(credentials) = &credentials {
                        handshake.authenticate(&mut stream, credentials).await?;
                    }
                    Ok::<_, ProtocolError>(handshake.version(&mut stream).await?)
                };
                match tokio::time::timeout(settings.io_timeout, exchange).await {
                    Ok(version) => Ok::<_, ProbeError>(version?),
                    Err(_) => Err(TransportError::Timeout(format!(
                        "No answer from {} within {}ms",
                        server,
                        settings.io_timeout.as_millis()
                    ))
                    .into()),
                }
            }
            .await;

            match &result {
                Ok(version) => tracing::debug!("Server {} is up (version {})", server, version),
                Err(e) => tracing::warn!("Server {} failed probe: {}", server, e),
            }
            outcomes.push(ProbeOutcome { server, result });
        }
        outcomes
    }
}

/// Result of probing a single server
#[derive(Debug)]
pub struct ProbeOutcome {
    pub server: Server,
    pub result: Result<String, ProbeError>,
}

impl ProbeOutcome {
    pub fn is_up(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Process-wide store of persistent handles, keyed by persistent id
#[derive(Debug, Default)]
pub struct Registry {
    handles: Mutex<HashMap<String, Arc<Client>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by the whole process
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Client>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Existing handle for `id`, or a fresh one registered under it.
    /// The boolean is true when the handle was reused.
    pub fn get_or_create(&self, id: &str) -> (Arc<Client>, bool) {
        let mut handles = self.handles();
        if let Some(client) = handles.get(id) {
            return (Arc::clone(client), true);
        }
        let client = Arc::new(Client::new(Some(id.to_string())));
        handles.insert(id.to_string(), Arc::clone(&client));
        (client, false)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Client>> {
        self.handles().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Client>> {
        self.handles().remove(id)
    }

    pub fn len(&self) -> usize {
        self.handles().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }
}
