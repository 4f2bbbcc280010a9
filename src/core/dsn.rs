use crate::core::options::{OptionMap, OptionValue};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Port used when a host-based DSN does not name one
pub const DEFAULT_PORT: u16 = 11211;

const SCHEME: &str = "memcached:";

/// A single entry of the normalized server list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Server {
    /// Hostname, IP address or absolute Unix socket path
    pub host: String,
    /// Always 0 for Unix sockets
    pub port: u16,
    pub weight: u32,
}

impl Server {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: 0,
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            host: path.into(),
            port: 0,
            weight: 0,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn is_unix_socket(&self) -> bool {
        self.host.starts_with('/')
    }

    /// Identity used when comparing server lists (weight is ignored)
    pub fn same_endpoint(&self, other: &Server) -> bool {
        self.host == other.host && self.port == other.port
    }

    /// `host:port` form usable with `TcpStream::connect`
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unix_socket() {
            write!(f, "{}", self.host)?;
        } else {
            write!(f, "{}", self.address())?;
        }
        if self.weight > 0 {
            write!(f, " (weight {})", self.weight)?;
        }
        Ok(())
    }
}

/// One element of a server specification
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ServerEntry {
    /// `memcached://...` connection string
    Dsn(String),
    /// `[host, port]` pair
    Pair(String, u16),
    Address {
        host: String,
        port: u16,
        #[serde(default)]
        weight: u32,
    },
}

impl From<&str> for ServerEntry {
    fn from(dsn: &str) -> Self {
        ServerEntry::Dsn(dsn.to_string())
    }
}

impl From<String> for ServerEntry {
    fn from(dsn: String) -> Self {
        ServerEntry::Dsn(dsn)
    }
}

impl From<(&str, u16)> for ServerEntry {
    fn from((host, port): (&str, u16)) -> Self {
        ServerEntry::Pair(host.to_string(), port)
    }
}

impl From<(String, u16)> for ServerEntry {
    fn from((host, port): (String, u16)) -> Self {
        ServerEntry::Pair(host, port)
    }
}

/// Where to connect: a single DSN, or a list of DSNs and explicit addresses
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ServerSpec {
    List(Vec<ServerEntry>),
    Single(ServerEntry),
}

impl Default for ServerSpec {
    fn default() -> Self {
        ServerSpec::List(Vec::new())
    }
}

impl ServerSpec {
    pub fn entries(&self) -> &[ServerEntry] {
        match self {
            ServerSpec::List(entries) => entries,
            ServerSpec::Single(entry) => std::slice::from_ref(entry),
        }
    }
}

impl From<&str> for ServerSpec {
    fn from(dsn: &str) -> Self {
        ServerSpec::Single(dsn.into())
    }
}

impl From<String> for ServerSpec {
    fn from(dsn: String) -> Self {
        ServerSpec::Single(dsn.into())
    }
}

impl<T: Into<ServerEntry>> From<Vec<T>> for ServerSpec {
    fn from(entries: Vec<T>) -> Self {
        ServerSpec::List(entries.into_iter().map(Into::into).collect())
    }
}

/// Everything a DSN carries besides its servers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDsn {
    pub servers: Vec<Server>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Query parameters other than `host[...]` and `weight`
    pub options: OptionMap,
}

/// Parse a `memcached:` connection string.
///
/// Accepted forms:
/// - `memcached://[user:pass@]host[:port][/weight][?query]`
/// - `memcached://[user:pass@]/abs/socket/path[/weight][?query]`
/// - `memcached:?host[h1:p1]=w1&host[/sock:]=w2`
pub fn parse_dsn(dsn: &str) -> Result<ParsedDsn, DsnError> {
    let rest = dsn
        .strip_prefix(SCHEME)
        .ok_or_else(|| DsnError::InvalidScheme(dsn.to_string()))?;

    let (authority_form, rest) = match rest.strip_prefix("//") {
        Some(stripped) => (true, stripped),
        None => (false, rest),
    };

    let mut parsed = ParsedDsn::default();

    let (rest, query) = match rest.split_once('?') {
        Some((rest, query)) => (rest, Some(query)),
        None => (rest, None),
    };

    let body = match rest.split_once('@') {
        Some((userinfo, remainder)) => {
            if !userinfo.is_empty() {
                let (user, pass) = match userinfo.split_once(':') {
                    Some((user, pass)) => (user, Some(pass)),
                    None => (userinfo, None),
                };
                parsed.username = Some(decode(user));
                parsed.password = pass.map(decode);
            }
            remainder
        }
        None => rest,
    };

    let (host, path) = if body.starts_with('/') || body.is_empty() {
        (None, body)
    } else if authority_form {
        match body.find('/') {
            Some(slash) => (Some(&body[..slash]), &body[slash..]),
            None => (Some(body), ""),
        }
    } else {
        return Err(DsnError::Invalid(dsn.to_string()));
    };

    let (path, path_weight) = split_weight(path);

    let mut query_weight = None;
    let mut extra_hosts = Vec::new();
    if let Some(query) = query {
        for (key, value) in query_pairs(query) {
            if let Some(spec) = key.strip_prefix("host[").and_then(|k| k.strip_suffix(']')) {
                extra_hosts.push(parse_query_host(spec, &value));
            } else if key == "host" {
                return Err(DsnError::InvalidHostParameter(dsn.to_string()));
            } else if key.eq_ignore_ascii_case("weight") {
                query_weight = Some(parse_weight(&value));
            } else {
                // Kept as strings; option translation coerces per option kind
                parsed.options.insert(key, OptionValue::Str(value));
            }
        }
    }

    let primary = match host {
        Some(authority) => {
            let (host, port) = split_host_port(authority, dsn)?;
            Some(Server::tcp(host, port.unwrap_or(DEFAULT_PORT)))
        }
        None if !path.is_empty() => Some(Server::unix(path)),
        None => None,
    };

    match primary {
        Some(server) => {
            let weight = path_weight.or(query_weight).unwrap_or(0);
            parsed.servers.push(server.with_weight(weight));
        }
        None if extra_hosts.is_empty() => return Err(DsnError::MissingHost(dsn.to_string())),
        None => {}
    }
    parsed.servers.extend(extra_hosts);

    Ok(parsed)
}

/// Strip a trailing `/<digits>` segment, returning it as the weight
fn split_weight(path: &str) -> (&str, Option<u32>) {
    if let Some(slash) = path.rfind('/') {
        let digits = &path[slash + 1..];
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return (&path[..slash], Some(parse_weight(digits)));
        }
    }
    (path, None)
}

fn split_host_port<'a>(authority: &'a str, dsn: &str) -> Result<(&'a str, Option<u16>), DsnError> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| DsnError::Invalid(dsn.to_string()))?;
        match after.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if after.is_empty() => (host, None),
            None => return Err(DsnError::Invalid(dsn.to_string())),
        }
    } else {
        // IPv6 literals must be bracketed
        if authority.matches(':').count() > 1 {
            return Err(DsnError::Invalid(dsn.to_string()));
        }
        match authority.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(DsnError::MissingHost(dsn.to_string()));
    }

    let port = port
        .map(|p| {
            p.parse::<u16>()
                .map_err(|_| DsnError::InvalidPort(p.to_string()))
        })
        .transpose()?;

    Ok((host, port))
}

/// `host[spec]=weight` entries; a bare `spec` gets the default port, `spec:` gets port 0
fn parse_query_host(spec: &str, weight: &str) -> Server {
    let (host, port) = match spec.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().unwrap_or(0)),
        None => (spec, DEFAULT_PORT),
    };
    Server {
        host: host.to_string(),
        port,
        weight: parse_weight(weight),
    }
}

fn parse_weight(value: &str) -> u32 {
    value.trim().parse::<u32>().unwrap_or(0)
}

fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().to_string()
}

/// Split a query string into percent-decoded key/value pairs
fn query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key, value),
            None => (pair, ""),
        })
        .map(|(key, value)| (decode(key), decode(&value.replace('+', " "))))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DsnError {
    #[error("Invalid Memcached DSN: \"{0}\" does not start with \"memcached:\"")]
    InvalidScheme(String),
    #[error("Invalid Memcached DSN: \"{0}\"")]
    Invalid(String),
    #[error("Invalid Memcached DSN: \"{0}\" has no host or socket path")]
    MissingHost(String),
    #[error("Invalid Memcached DSN: \"{0}\", query parameter \"host\" must be an array")]
    InvalidHostParameter(String),
    #[error("Invalid port: {0}")]
    InvalidPort(String),
}
