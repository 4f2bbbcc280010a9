use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Caller supplied options, keyed by symbolic option name
pub type OptionMap = BTreeMap<String, OptionValue>;

/// Keys consumed by the connection builder itself; never translated
pub const RESERVED_KEYS: &[&str] = &["persistent_id", "username", "password", "weight"];

/// Raw option value as written by the caller (or decoded from a DSN query)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        OptionValue::Int(i64::from(value))
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

/// Static name table shared by every symbolic enum below
pub trait Symbol: Copy + Sized + 'static {
    /// Option the symbol belongs to, used in error messages
    const OPTION: &'static str;
    const SYMBOLS: &'static [(&'static str, Self)];

    fn from_symbol(value: &str) -> Option<Self> {
        Self::SYMBOLS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(value))
            .map(|(_, symbol)| *symbol)
    }

    fn symbol(self) -> &'static str
    where
        Self: PartialEq,
    {
        Self::SYMBOLS
            .iter()
            .find(|(_, symbol)| *symbol == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    fn accepted() -> String {
        Self::SYMBOLS
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Key hashing algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hash {
    Default,
    Md5,
    Crc,
    Fnv1_64,
    Fnv1a64,
    Fnv1_32,
    Fnv1a32,
    Hsieh,
    Murmur,
}

impl Symbol for Hash {
    const OPTION: &'static str = "hash";
    const SYMBOLS: &'static [(&'static str, Self)] = &[
        ("default", Hash::Default),
        ("md5", Hash::Md5),
        ("crc", Hash::Crc),
        ("fnv1_64", Hash::Fnv1_64),
        ("fnv1a_64", Hash::Fnv1a64),
        ("fnv1_32", Hash::Fnv1_32),
        ("fnv1a_32", Hash::Fnv1a32),
        ("hsieh", Hash::Hsieh),
        ("murmur", Hash::Murmur),
    ];
}

/// Value serializer understood by the client library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serializer {
    Php,
    Igbinary,
    Json,
    JsonArray,
    Msgpack,
}

impl Serializer {
    /// Serializers the connection builder lets through
    pub const ALLOWED: &'static [Serializer] = &[Serializer::Php, Serializer::Igbinary];

    pub fn is_allowed(self) -> bool {
        Self::ALLOWED.contains(&self)
    }
}

impl Symbol for Serializer {
    const OPTION: &'static str = "serializer";
    const SYMBOLS: &'static [(&'static str, Self)] = &[
        ("php", Serializer::Php),
        ("igbinary", Serializer::Igbinary),
        ("json", Serializer::Json),
        ("json_array", Serializer::JsonArray),
        ("msgpack", Serializer::Msgpack),
    ];
}

/// Key distribution strategy across the server list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    Modula,
    Consistent,
    VirtualBucket,
}

impl Symbol for Distribution {
    const OPTION: &'static str = "distribution";
    const SYMBOLS: &'static [(&'static str, Self)] = &[
        ("modula", Distribution::Modula),
        ("consistent", Distribution::Consistent),
        ("virtual_bucket", Distribution::VirtualBucket),
    ];
}

/// Shape of the value an option accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Int,
    Str,
    Hash,
    Serializer,
    Distribution,
}

/// Options known to the client library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClientOption {
    Compression,
    Serializer,
    PrefixKey,
    Hash,
    Distribution,
    LibketamaCompatible,
    LibketamaHash,
    BufferWrites,
    BinaryProtocol,
    NoBlock,
    TcpNodelay,
    TcpKeepalive,
    SocketSendSize,
    SocketRecvSize,
    ConnectTimeout,
    RetryTimeout,
    DeadTimeout,
    SendTimeout,
    RecvTimeout,
    PollTimeout,
    CacheLookups,
    ServerFailureLimit,
    AutoEjectHosts,
    HashWithPrefixKey,
    NoReply,
    SortHosts,
    VerifyKey,
    UseUdp,
    NumberOfReplicas,
    RandomizeReplicaRead,
    RemoveFailedServers,
}

const OPTION_NAMES: &[(&str, ClientOption)] = &[
    ("compression", ClientOption::Compression),
    ("serializer", ClientOption::Serializer),
    ("prefix_key", ClientOption::PrefixKey),
    ("hash", ClientOption::Hash),
    ("distribution", ClientOption::Distribution),
    ("libketama_compatible", ClientOption::LibketamaCompatible),
    ("libketama_hash", ClientOption::LibketamaHash),
    ("buffer_writes", ClientOption::BufferWrites),
    ("binary_protocol", ClientOption::BinaryProtocol),
    ("no_block", ClientOption::NoBlock),
    ("tcp_nodelay", ClientOption::TcpNodelay),
    ("tcp_keepalive", ClientOption::TcpKeepalive),
    ("socket_send_size", ClientOption::SocketSendSize),
    ("socket_recv_size", ClientOption::SocketRecvSize),
    ("connect_timeout", ClientOption::ConnectTimeout),
    ("retry_timeout", ClientOption::RetryTimeout),
    ("dead_timeout", ClientOption::DeadTimeout),
    ("send_timeout", ClientOption::SendTimeout),
    ("recv_timeout", ClientOption::RecvTimeout),
    ("poll_timeout", ClientOption::PollTimeout),
    ("cache_lookups", ClientOption::CacheLookups),
    ("server_failure_limit", ClientOption::ServerFailureLimit),
    ("auto_eject_hosts", ClientOption::AutoEjectHosts),
    ("hash_with_prefix_key", ClientOption::HashWithPrefixKey),
    ("noreply", ClientOption::NoReply),
    ("sort_hosts", ClientOption::SortHosts),
    ("verify_key", ClientOption::VerifyKey),
    ("use_udp", ClientOption::UseUdp),
    ("number_of_replicas", ClientOption::NumberOfReplicas),
    ("randomize_replica_read", ClientOption::RandomizeReplicaRead),
    ("remove_failed_servers", ClientOption::RemoveFailedServers),
];

impl ClientOption {
    /// Case-insensitive lookup of an option by its symbolic name
    pub fn from_name(name: &str) -> Option<Self> {
        OPTION_NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, option)| *option)
    }

    pub fn name(self) -> &'static str {
        OPTION_NAMES
            .iter()
            .find(|(_, option)| *option == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }

    pub fn all() -> impl Iterator<Item = ClientOption> {
        OPTION_NAMES.iter().map(|(_, option)| *option)
    }

    pub fn kind(self) -> OptionKind {
        use ClientOption::*;
        match self {
            Serializer => OptionKind::Serializer,
            Hash => OptionKind::Hash,
            Distribution => OptionKind::Distribution,
            PrefixKey => OptionKind::Str,
            LibketamaHash | SocketSendSize | SocketRecvSize | ConnectTimeout | RetryTimeout
            | DeadTimeout | SendTimeout | RecvTimeout | PollTimeout | ServerFailureLimit
            | NumberOfReplicas => OptionKind::Int,
            Compression | LibketamaCompatible | BufferWrites | BinaryProtocol | NoBlock
            | TcpNodelay | TcpKeepalive | CacheLookups | AutoEjectHosts | HashWithPrefixKey
            | NoReply | SortHosts | VerifyKey | UseUdp | RandomizeReplicaRead
            | RemoveFailedServers => OptionKind::Bool,
        }
    }

    /// Value the client library reports before anything is set
    pub fn library_default(self) -> Setting {
        use ClientOption::*;
        match self {
            Compression => Setting::Bool(true),
            Serializer => Setting::Serializer(self::Serializer::Php),
            Hash => Setting::Hash(self::Hash::Default),
            Distribution => Setting::Distribution(self::Distribution::Modula),
            PrefixKey => Setting::Str(String::new()),
            ConnectTimeout => Setting::Int(1000),
            RetryTimeout => Setting::Int(2),
            PollTimeout => Setting::Int(1000),
            ServerFailureLimit => Setting::Int(5),
            _ => match self.kind() {
                OptionKind::Int => Setting::Int(0),
                _ => Setting::Bool(false),
            },
        }
    }
}

impl fmt::Display for ClientOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Option value after translation into the library's representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting {
    Bool(bool),
    Int(i64),
    Str(String),
    Hash(Hash),
    Serializer(Serializer),
    Distribution(Distribution),
}

impl Setting {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Setting::Bool(b) => Some(*b),
            Setting::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Integer view; booleans read back as 0/1 like the library does
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Setting::Int(i) => Some(*i),
            Setting::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Setting::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Bool(b) => write!(f, "{}", b),
            Setting::Int(i) => write!(f, "{}", i),
            Setting::Str(s) => write!(f, "{:?}", s),
            Setting::Hash(h) => f.write_str(h.symbol()),
            Setting::Serializer(s) => f.write_str(s.symbol()),
            Setting::Distribution(d) => f.write_str(d.symbol()),
        }
    }
}

/// Translate a single `name => value` pair into a library option
pub fn resolve(name: &str, value: &OptionValue) -> Result<(ClientOption, Setting), OptionError> {
    let option =
        ClientOption::from_name(name).ok_or_else(|| OptionError::UnknownOption(name.to_string()))?;

    let setting = match option.kind() {
        OptionKind::Bool => Setting::Bool(coerce_bool(option, value)?),
        OptionKind::Int => Setting::Int(coerce_int(option, value)?),
        OptionKind::Str => match value {
            OptionValue::Str(s) => Setting::Str(s.clone()),
            other => return Err(invalid_value(option, "a string", other)),
        },
        OptionKind::Hash => Setting::Hash(resolve_symbol(option, value)?),
        OptionKind::Serializer => Setting::Serializer(resolve_symbol(option, value)?),
        OptionKind::Distribution => Setting::Distribution(resolve_symbol(option, value)?),
    };

    Ok((option, setting))
}

/// Translate every non-reserved entry, failing on the first bad one.
/// Two keys naming the same option (e.g. `Hash` and `hash`) are an error.
pub fn resolve_all(options: &OptionMap) -> Result<Vec<(ClientOption, Setting)>, OptionError> {
    let mut resolved: Vec<(ClientOption, Setting)> = Vec::new();
    for (name, value) in options.iter().filter(|(name, _)| !is_reserved(name)) {
        let (option, setting) = resolve(name, value)?;
        if resolved.iter().any(|(existing, _)| *existing == option) {
            return Err(OptionError::DuplicateOption(option.name()));
        }
        resolved.push((option, setting));
    }
    Ok(resolved)
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_KEYS.iter().any(|key| key.eq_ignore_ascii_case(name))
}

fn resolve_symbol<T: Symbol>(option: ClientOption, value: &OptionValue) -> Result<T, OptionError> {
    let OptionValue::Str(symbol) = value else {
        return Err(invalid_value(option, "a symbolic name", value));
    };
    T::from_symbol(symbol).ok_or_else(|| OptionError::UnknownSymbol {
        option: T::OPTION,
        value: symbol.clone(),
        accepted: T::accepted(),
    })
}

fn coerce_bool(option: ClientOption, value: &OptionValue) -> Result<bool, OptionError> {
    match value {
        OptionValue::Bool(b) => Ok(*b),
        OptionValue::Int(i) => Ok(*i != 0),
        OptionValue::Str(s) => match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Ok(true),
            "0" | "false" | "off" | "no" | "" => Ok(false),
            _ => Err(invalid_value(option, "a boolean", value)),
        },
    }
}

fn coerce_int(option: ClientOption, value: &OptionValue) -> Result<i64, OptionError> {
    match value {
        OptionValue::Int(i) => Ok(*i),
        OptionValue::Bool(b) => Ok(i64::from(*b)),
        OptionValue::Str(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| invalid_value(option, "an integer", value)),
    }
}

fn invalid_value(option: ClientOption, expected: &'static str, value: &OptionValue) -> OptionError {
    OptionError::InvalidValue {
        option: option.name(),
        expected,
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionError {
    #[error("Unknown option \"{0}\"")]
    UnknownOption(String),
    #[error("Unknown {option} \"{value}\", expected one of: {accepted}")]
    UnknownSymbol {
        option: &'static str,
        value: String,
        accepted: String,
    },
    #[error("Option \"{0}\" is given more than once")]
    DuplicateOption(&'static str),
    #[error("Option \"{option}\" expects {expected}, got \"{value}\"")]
    InvalidValue {
        option: &'static str,
        expected: &'static str,
        value: String,
    },
}
