//! Library module for freshtab-server
//!
//! This library module exists to share the test server harness with the integration tests of
//! `freshtab-server` and `freshtab-cli`.

#[cfg(feature = "test")]
pub mod test_server;
