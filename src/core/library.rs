use std::fmt;

/// Version of the bundled memcached client
pub const CLIENT_VERSION: Version = Version::new(3, 2, 0);

/// Oldest client version the connection builder works with
pub const MIN_CLIENT_VERSION: Version = Version::new(2, 2, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Capabilities of the client library a connection is built against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientLibrary {
    pub version: Version,
    /// Whether credentials can be forwarded to the server
    pub sasl: bool,
}

impl ClientLibrary {
    /// The client compiled into this crate
    pub fn current() -> Self {
        Self {
            version: CLIENT_VERSION,
            sasl: cfg!(feature = "sasl"),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.version >= MIN_CLIENT_VERSION
    }
}

impl Default for ClientLibrary {
    fn default() -> Self {
        Self::current()
    }
}

/// Whether the bundled client can be used to create connections
pub fn is_supported() -> bool {
    ClientLibrary::current().is_supported()
}
