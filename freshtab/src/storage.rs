//! A storage is the durable key-value area the photo cache lives in, for example a directory in
//! the local filesystem.
//!
//! This module defines the `Storage` trait and provides implementations of it in its submodules.

pub mod filesystem;
pub mod in_memory;

use crate::error::IoKeyResult;
use crate::util::close::Close;
use std::io::{Read, Write};

/// A place where values are stored under string keys.
///
/// Keys use `/` as separator and must be absolute, i.e. start with `/` (this could, however, map
/// to a path relative to some base directory within the filesystem).
///
/// For reading and writing values, a [Storage::Reader] and [Storage::Writer] are returned,
/// respectively. A written value must become available atomically, thus the `Writer` must
/// implement [Close] to finalize the write operation. Until then, readers keep seeing the
/// previous value (or none).
///
/// Implementations must tolerate being used from several threads and from several processes
/// sharing the same underlying location; the last finalized write wins.
pub trait Storage: Send + Sync {
    /// The type of reader returned by this storage.
    type Reader: Read;

    /// The type of writer returned by this storage.
    type Writer: Write + Close;

    /// Deletes the value stored under the given key.
    fn delete(&self, key: &str) -> IoKeyResult<()>;

    /// Checks whether a value is stored under the given key.
    fn exists(&self, key: &str) -> IoKeyResult<bool>;

    /// Returns a reader for the value stored under the given key.
    fn get(&self, key: &str) -> IoKeyResult<Self::Reader>;

    /// Returns a writer replacing the value stored under the given key.
    ///
    /// The writer must be finalized by calling [Close::close] to make the value available.
    fn put(&self, key: &str) -> IoKeyResult<Self::Writer>;
}
