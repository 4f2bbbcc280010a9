//! Test scenarios for integration testing
//!
//! - probe: lazy connection probing against mock servers

pub mod probe;
