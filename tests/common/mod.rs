//! Common test utilities for status-sentinel integration tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod modules;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use modules::*;
