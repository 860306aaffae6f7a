use crate::config::StorageConfig;
use freshtab::error::IoKeyResult;
use freshtab::storage::Storage;
use freshtab::storage::filesystem::FilesystemStorage;
use freshtab::storage::in_memory::InMemoryStorage;
use freshtab::util::close::Close;
use std::io;
use std::io::{Read, Write};

type FilesystemReader = <FilesystemStorage as Storage>::Reader;
type FilesystemWriter = <FilesystemStorage as Storage>::Writer;
type InMemoryReader = <InMemoryStorage as Storage>::Reader;
type InMemoryWriter = <InMemoryStorage as Storage>::Writer;

/// The storage backend selected by the configuration.
#[derive(Clone, Debug)]
pub enum StorageHandle {
    InMemory(InMemoryStorage),
    Filesystem(FilesystemStorage),
}

impl From<&StorageConfig> for StorageHandle {
    fn from(storage_config: &StorageConfig) -> Self {
        match storage_config {
            StorageConfig::InMemory => StorageHandle::InMemory(InMemoryStorage::new()),
            StorageConfig::Filesystem { path } => {
                StorageHandle::Filesystem(FilesystemStorage::new(path.into()))
            }
        }
    }
}

impl StorageHandle {
    /// Removes temporary files left behind by interrupted writes.
    pub fn clean_leftover_tmp_files(&self) -> io::Result<()> {
        match self {
            StorageHandle::InMemory(_) => Ok(()),
            StorageHandle::Filesystem(storage) => storage.clean_leftover_tmp_files(),
        }
    }
}

pub enum StorageReader {
    InMemory(InMemoryReader),
    Filesystem(FilesystemReader),
}

impl Read for StorageReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StorageReader::InMemory(reader) => reader.read(buf),
            StorageReader::Filesystem(reader) => reader.read(buf),
        }
    }
}

pub enum StorageWriter {
    InMemory(InMemoryWriter),
    Filesystem(FilesystemWriter),
}

impl Write for StorageWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            StorageWriter::InMemory(writer) => writer.write(buf),
            StorageWriter::Filesystem(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            StorageWriter::InMemory(writer) => writer.flush(),
            StorageWriter::Filesystem(writer) => writer.flush(),
        }
    }
}

impl Close for StorageWriter {
    fn close(self) -> io::Result<()> {
        match self {
            StorageWriter::InMemory(writer) => writer.close(),
            StorageWriter::Filesystem(writer) => writer.close(),
        }
    }
}

impl Storage for StorageHandle {
    type Reader = StorageReader;
    type Writer = StorageWriter;

    fn delete(&self, key: &str) -> IoKeyResult<()> {
        match self {
            StorageHandle::InMemory(storage) => storage.delete(key),
            StorageHandle::Filesystem(storage) => storage.delete(key),
        }
    }

    fn exists(&self, key: &str) -> IoKeyResult<bool> {
        match self {
            StorageHandle::InMemory(storage) => storage.exists(key),
            StorageHandle::Filesystem(storage) => storage.exists(key),
        }
    }

    fn get(&self, key: &str) -> IoKeyResult<Self::Reader> {
        match self {
            StorageHandle::InMemory(storage) => storage.get(key).map(StorageReader::InMemory),
            StorageHandle::Filesystem(storage) => storage.get(key).map(StorageReader::Filesystem),
        }
    }

    fn put(&self, key: &str) -> IoKeyResult<Self::Writer> {
        match self {
            StorageHandle::InMemory(storage) => storage.put(key).map(StorageWriter::InMemory),
            StorageHandle::Filesystem(storage) => storage.put(key).map(StorageWriter::Filesystem),
        }
    }
}
