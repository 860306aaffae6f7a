//! Test server utilities for freshtab-server.

use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;
use std::process::{Child, Command};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

/// Address the test server listens on.
pub static BIND_ADDR: &str = "127.0.0.1:8717";

/// A freshtab-server process running on [BIND_ADDR] for the duration of a test.
///
/// The server is configured without an Unsplash API key and an API base URL that refuses
/// connections, so it never reaches the real Unsplash API.
pub struct FreshtabTestServer {
    _config_file: NamedTempFile,
    process: Child,
    client: Client,
    base_url: Url,
}

impl FreshtabTestServer {
    /// Create and start a new freshtab-server test instance.
    ///
    /// `binary` is the path to the server executable, e.g. `env!("CARGO_BIN_EXE_freshtab-server")`.
    pub fn new(binary: impl AsRef<Path>, env: &BTreeMap<String, String>) -> Self {
        let config_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        fs::write(
            config_file.path(),
            "\
                storage = { type = 'InMemory' }\n\
                [unsplash]\n\
                api_base_url = 'http://127.0.0.1:9/'\n\
                [retry]\n\
                max_attempts = 1\n\
        ",
        )
        .unwrap();

        let mut command = Command::new(binary.as_ref());
        command.env("FRESHTAB_BIND_ADDRS", BIND_ADDR);
        command.env("FRESHTAB_SERVER_CONFIG_FILE", config_file.path());
        command.env_remove("FRESHTAB_UNSPLASH__API_KEY");
        for (key, value) in env {
            command.env(key, value);
        }
        let process = command.spawn().expect("failed to start freshtab-server");
        Self {
            _config_file: config_file,
            process,
            client: Client::builder().use_rustls_tls().build().unwrap(),
            base_url: Url::parse(&format!("http://{BIND_ADDR}"))
                .expect("bind address did not form a valid URL"),
        }
    }
}

impl Drop for FreshtabTestServer {
    fn drop(&mut self) {
        if let Err(e) = self.process.kill() {
            eprintln!("Failed to kill freshtab-server: {}", e);
        }
        let _ = self.process.wait();
    }
}

impl FreshtabTestServer {
    /// Get the base URL of the test server.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Create a GET request to the specified path.
    pub fn get(&self, path: &str) -> RequestBuilder {
        let url = self.base_url.join(path).expect("Invalid path");
        self.client.get(url)
    }

    /// Create a PUT request to the specified path.
    pub fn put(&self, path: &str) -> RequestBuilder {
        let url = self.base_url.join(path).expect("Invalid path");
        self.client.put(url)
    }

    /// Create a POST request to the specified path.
    pub fn post(&self, path: &str) -> RequestBuilder {
        let url = self.base_url.join(path).expect("Invalid path");
        self.client.post(url)
    }

    /// Check if the server is ready by querying the health endpoint.
    pub fn is_ready(&self) -> bool {
        self.get("/api/health")
            .send()
            .is_ok_and(|r| r.error_for_status().is_ok())
    }

    /// Wait until the server is ready or timeout after 5 seconds.
    pub fn wait_until_ready(self) -> Result<Self, WaitTimeout> {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if self.is_ready() {
                return Ok(self);
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        Err(WaitTimeout)
    }
}

/// Error indicating that a wait operation has timed out.
#[derive(Debug)]
pub struct WaitTimeout;

impl Display for WaitTimeout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Wait timeout exceeded")
    }
}

impl std::error::Error for WaitTimeout {}
