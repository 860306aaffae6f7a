//! Provides the [Close] trait for writers whose result only becomes visible once finalized.

use std::io;

/// A trait for types that need to be finalized.
///
/// Storage writers implement this trait: the written value only becomes visible to readers once
/// [Close::close] has returned successfully. Using [Close::close] instead of just dropping the
/// writer allows to retrieve potential errors and handle them.
///
/// Implementors should also finalize on [Drop] so that a forgotten `close` does not silently
/// discard the written data.
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
/// let mut writer = storage.put("/greeting.txt")?;
/// writer.write_all(b"Hello")?;
/// assert!(!storage.exists("/greeting.txt")?);
/// writer.close()?;
/// assert!(storage.exists("/greeting.txt")?);
/// # Ok(())
/// # }
/// ```
pub trait Close {
    fn close(self) -> io::Result<()>;
}
