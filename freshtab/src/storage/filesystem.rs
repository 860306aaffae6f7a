//! Implementation of the `Storage` trait for storage in the local filesystem.

mod staged_file;

pub use crate::storage::filesystem::staged_file::clean_leftover_tmp_files;
use crate::error::{IoKeyResult, WithKey};
use crate::storage::Storage;
use crate::storage::filesystem::staged_file::StagedFile;
use rand::rngs::ThreadRng;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Component, PathBuf};
use std::{fs, io};

/// Storage implementation using a directory in the local filesystem.
///
/// Each key maps to a file below the root directory. Values are written to a temporary file
/// next to the target first and renamed into place when the writer is closed, so readers never
/// observe partially written values. Multiple instances (also in different processes) with the
/// same root directory may be used in parallel.
///
/// # Examples
///
/// ```rust
/// use std::io::{Read, Write};
/// use freshtab::storage::Storage;
/// use freshtab::storage::filesystem::FilesystemStorage;
/// use freshtab::util::close::Close;
///
/// # fn main() -> std::io::Result<()> {
/// # let dir = tempfile::tempdir()?;
/// let storage = FilesystemStorage::new(dir.path().to_path_buf());
/// let mut writer = storage.put("/cached-photo.json")?;
/// writer.write_all(b"{}")?;
/// writer.close()?;
/// let mut buf = String::new();
/// storage.get("/cached-photo.json")?.read_to_string(&mut buf)?;
/// assert_eq!(buf, "{}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// Creates a new filesystem storage with the given root directory.
    ///
    /// All keys will be nested in the given root directory. The root directory itself is not
    /// created.
    pub fn new(root: PathBuf) -> Self {
        FilesystemStorage { root }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Cleans up leftover temporary files in the storage.
    ///
    /// Usually temporary files are renamed into place or removed when their writer is closed or
    /// dropped. If the process is killed hard, they might be left behind.
    pub fn clean_leftover_tmp_files(&self) -> io::Result<()> {
        clean_leftover_tmp_files(&self.root)
    }

    fn canonical_path(&self, key: &str) -> io::Result<PathBuf> {
        let Some(relative) = key.strip_prefix('/') else {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "Key must be absolute, i.e. start with a slash '/'",
            ));
        };
        let relative = PathBuf::from(relative);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "Key must not contain parent directory or empty components",
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl Storage for FilesystemStorage {
    type Reader = File;
    type Writer = StagedFile<PathBuf>;

    fn delete(&self, key: &str) -> IoKeyResult<()> {
        fs::remove_file(self.canonical_path(key).with_key(key)?).with_key(key)
    }

    fn exists(&self, key: &str) -> IoKeyResult<bool> {
        Ok(self.canonical_path(key).with_key(key)?.is_file())
    }

    fn get(&self, key: &str) -> IoKeyResult<Self::Reader> {
        File::open(self.canonical_path(key).with_key(key)?).with_key(key)
    }

    fn put(&self, key: &str) -> IoKeyResult<Self::Writer> {
        let canonical_path = self.canonical_path(key).with_key(key)?;
        if self.root.exists()
            && let Some(parent_dir) = canonical_path.parent()
        {
            fs::create_dir_all(parent_dir).with_key(key)?;
        }
        StagedFile::new(canonical_path, &mut ThreadRng::default()).with_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{read_value_to_string, write_value};
    use crate::test_storage;
    use tempfile::{TempDir, tempdir};

    struct FilesystemStorageTestFixture {
        storage: FilesystemStorage,
        _tempdir: TempDir,
    }

    impl FilesystemStorageTestFixture {
        fn new() -> Self {
            let tempdir = tempdir().unwrap();
            Self {
                storage: FilesystemStorage::new(tempdir.path().to_path_buf()),
                _tempdir: tempdir,
            }
        }
    }

    impl Storage for FilesystemStorageTestFixture {
        type Reader = <FilesystemStorage as Storage>::Reader;
        type Writer = <FilesystemStorage as Storage>::Writer;

        fn delete(&self, key: &str) -> IoKeyResult<()> {
            self.storage.delete(key)
        }

        fn exists(&self, key: &str) -> IoKeyResult<bool> {
            self.storage.exists(key)
        }

        fn get(&self, key: &str) -> IoKeyResult<Self::Reader> {
            self.storage.get(key)
        }

        fn put(&self, key: &str) -> IoKeyResult<Self::Writer> {
            self.storage.put(key)
        }
    }

    test_storage!(filesystem_tests, FilesystemStorageTestFixture::new());

    #[test]
    fn test_does_not_create_non_existent_root() {
        let tempdir = tempdir().unwrap();
        let storage_path = tempdir.path().join("non-existent");
        let storage = FilesystemStorage::new(storage_path.clone());
        assert_eq!(
            write_value(&storage, "/cached-photo.json", "{}")
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        assert!(!storage_path.exists());
    }

    #[test]
    fn test_disallows_keys_escaping_root() {
        let tempdir = tempdir().unwrap();
        let storage_root = tempdir.path().join("storage-root");
        fs::create_dir(&storage_root).unwrap();
        let storage = FilesystemStorage::new(storage_root.clone());
        assert!(write_value(&storage, "/../escaped.json", "{}").is_err());
        assert!(!tempdir.path().join("escaped.json").exists());
    }

    #[test]
    fn test_creates_intermediate_directories() {
        let tempdir = tempdir().unwrap();
        let storage = FilesystemStorage::new(tempdir.path().to_path_buf());
        write_value(&storage, "/images/abc-high", "bytes").unwrap();
        assert!(tempdir.path().join("images").is_dir());
        assert_eq!(
            read_value_to_string(&storage, "/images/abc-high").unwrap(),
            "bytes"
        );
    }
}
