pub mod builder;
pub mod client;
pub mod dsn;
pub mod library;
pub mod options;
pub mod protocols;
pub mod transport;

// Re-export core types
pub use builder::{create_connection, ConnectionBuilder, ConnectionError, ConnectionPlan};
pub use client::{Client, Credentials, ProbeError, ProbeOutcome, Registry};
pub use dsn::{parse_dsn, DsnError, Server, ServerEntry, ServerSpec, DEFAULT_PORT};
pub use library::{is_supported, ClientLibrary, Version};
pub use options::{
    ClientOption, Distribution, Hash, OptionError, OptionMap, OptionValue, Serializer, Setting,
};
pub use protocols::{Handshake, ProtocolError};
