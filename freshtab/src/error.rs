//! Error types shared by the storage layer and the stores built on top of it.

use std::fmt::{Display, Formatter};
use std::io;

pub type IoKeyResult<T> = Result<T, IoKeyError>;

/// An I/O error, annotated with the storage key it occurred on (if known).
#[derive(Debug)]
pub struct IoKeyError {
    error: io::Error,
    key: Option<String>,
}

impl Display for IoKeyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "I/O error on storage key {key}: {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for IoKeyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<IoKeyError> for io::Error {
    fn from(value: IoKeyError) -> Self {
        value.error
    }
}

impl IoKeyError {
    pub fn new(error: io::Error, key: impl Into<String>) -> Self {
        Self {
            error,
            key: Some(key.into()),
        }
    }

    pub fn new_no_key(error: io::Error) -> Self {
        Self { error, key: None }
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.error.kind()
    }

    pub fn io_error(&self) -> &io::Error {
        &self.error
    }

    pub fn into_io_error(self) -> io::Error {
        self.error
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

pub trait WithKey<T> {
    fn no_key(self) -> IoKeyResult<T>;
    fn with_key(self, key: impl Into<String>) -> IoKeyResult<T>;
}

impl<T> WithKey<T> for io::Result<T> {
    fn no_key(self) -> IoKeyResult<T> {
        self.map_err(IoKeyError::new_no_key)
    }

    fn with_key(self, key: impl Into<String>) -> IoKeyResult<T> {
        self.map_err(|e| IoKeyError::new(e, key))
    }
}

/// An error raised while persisting or reading back a value in a store.
#[derive(Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The underlying storage failed.
    Io(IoKeyError),
    /// The value could not be encoded or decoded.
    Codec(serde_json::Error),
    /// The blocking storage task did not complete.
    Task(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "invalid stored value: {err}"),
            Self::Task(reason) => write!(f, "storage task failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Codec(err) => Some(err),
            Self::Task(_) => None,
        }
    }
}

impl From<IoKeyError> for StoreError {
    fn from(value: IoKeyError) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Task(value.to_string())
    }
}

impl StoreError {
    /// Whether the error just means that nothing is stored under the key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == io::ErrorKind::NotFound)
    }
}
