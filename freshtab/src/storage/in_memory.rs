//! Implementation of the `Storage` trait for an in-memory storage.

use crate::error::{IoKeyResult, WithKey};
use crate::storage::Storage;
use crate::util::close::Close;
use std::collections::HashMap;
use std::io;
use std::io::{Cursor, ErrorKind, Write};
use std::sync::{Arc, RwLock};

type Values = Arc<RwLock<HashMap<String, Arc<[u8]>>>>;

/// In-memory storage implementation.
///
/// Mainly intended for tests and for servers that do not need the cached photo to survive a
/// restart. Clones share the same values.
///
/// # Examples
///
/// ```rust
/// use std::io::{Read, Write};
/// use freshtab::storage::Storage;
/// use freshtab::storage::in_memory::InMemoryStorage;
/// use freshtab::util::close::Close;
///
/// # fn main() -> std::io::Result<()> {
/// let storage = InMemoryStorage::new();
/// let mut writer = storage.put("/preferences.json")?;
/// writer.write_all(b"{}")?;
/// writer.close()?;
/// let mut buf = String::new();
/// storage.get("/preferences.json")?.read_to_string(&mut buf)?;
/// assert_eq!(buf, "{}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStorage {
    values: Values,
}

impl InMemoryStorage {
    /// Creates a new, empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_key(key: &str) -> IoKeyResult<()> {
    if !key.starts_with('/') || key.len() < 2 {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "Key must be absolute, i.e. start with a slash '/'",
        ))
        .with_key(key);
    }
    Ok(())
}

impl Storage for InMemoryStorage {
    type Reader = Cursor<Arc<[u8]>>;
    type Writer = InMemoryWriter;

    fn delete(&self, key: &str) -> IoKeyResult<()> {
        validate_key(key)?;
        match self.values.write().unwrap().remove(key) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(ErrorKind::NotFound, "No such value")).with_key(key),
        }
    }

    fn exists(&self, key: &str) -> IoKeyResult<bool> {
        validate_key(key)?;
        Ok(self.values.read().unwrap().contains_key(key))
    }

    fn get(&self, key: &str) -> IoKeyResult<Self::Reader> {
        validate_key(key)?;
        match self.values.read().unwrap().get(key) {
            Some(value) => Ok(Cursor::new(value.clone())),
            None => Err(io::Error::new(ErrorKind::NotFound, "No such value")).with_key(key),
        }
    }

    fn put(&self, key: &str) -> IoKeyResult<Self::Writer> {
        validate_key(key)?;
        Ok(InMemoryWriter {
            values: self.values.clone(),
            key: key.to_string(),
            buf: Some(Vec::new()),
        })
    }
}

/// Buffers a value and publishes it to the [InMemoryStorage] on close (or drop).
pub struct InMemoryWriter {
    values: Values,
    key: String,
    buf: Option<Vec<u8>>,
}

impl InMemoryWriter {
    fn publish(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.values
                .write()
                .unwrap()
                .insert(self.key.clone(), Arc::from(buf));
        }
    }
}

impl Write for InMemoryWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.buf.as_mut() {
            Some(buf) => buf.write(data),
            None => Err(io::Error::other("writer already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Close for InMemoryWriter {
    fn close(mut self) -> io::Result<()> {
        self.publish();
        Ok(())
    }
}

impl Drop for InMemoryWriter {
    fn drop(&mut self) {
        self.publish();
    }
}
