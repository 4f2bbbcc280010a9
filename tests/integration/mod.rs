//! Integration test helpers and scenarios
//!
//! - helpers: mock memcached server speaking the text and binary handshakes
//! - scenarios: probe tests running configured clients against the mock

pub mod scenarios;

pub use helpers::mock_memcached::{MockMemcached, MockMemcachedBuilder, ResponseMode, MOCK_VERSION};
