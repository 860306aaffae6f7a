use crate::util::close::Close;
use data_encoding::Encoding;
use data_encoding_macro::new_encoding;
use fs2::FileExt;
use rand::{CryptoRng, RngCore};
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::{fs, io};

const TMP_FILE_SUFFIX_ENCODING: Encoding = new_encoding! {
    symbols: "abcdefghijklmnopqrstuvwxyz012345",
    padding: None,
};
const TMP_FILE_SUFFIX_BYTES: usize = 4;
const TMP_FILE_SUFFIX_ENCODED_LEN: usize = 7;
const TMP_FILE_MARKER: &str = "tmp";

/// A file that is staged to be atomically moved to a target path.
///
/// The file is created with a temporary name in the same directory as the target path and kept
/// exclusively locked while being written. Once [Close::close] is called or the instance is
/// dropped, the file is renamed to the target path.
pub struct StagedFile<P: AsRef<Path>> {
    file: File,
    tmp_path: PathBuf,
    target_path: P,
    finalized: bool,
}

impl<P: AsRef<Path>> StagedFile<P> {
    pub fn new<R: CryptoRng + RngCore>(target_path: P, rng: &mut R) -> io::Result<Self> {
        let mut bytes = [0; TMP_FILE_SUFFIX_BYTES];
        rng.fill_bytes(&mut bytes);
        Self::new_with_suffix(target_path, &TMP_FILE_SUFFIX_ENCODING.encode(&bytes))
    }

    fn new_with_suffix(target_path: P, suffix: &str) -> io::Result<Self> {
        let filename = target_path
            .as_ref()
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "Invalid filename"))?;
        let tmp_path = target_path
            .as_ref()
            .with_file_name(format!("{filename}.{TMP_FILE_MARKER}.{suffix}"));
        for _ in 0..5 {
            let file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&tmp_path)?;
            file.lock_exclusive()?;
            if !tmp_path.exists() {
                // Removed by clean_leftover_tmp_files before we could lock it.
                continue;
            }
            return Ok(Self {
                file,
                tmp_path,
                target_path,
                finalized: false,
            });
        }
        Err(io::Error::other("Failed to create and lock temporary file"))
    }

    fn finalize(&mut self) -> io::Result<()> {
        self.finalized = true;
        self.file.sync_all()?;
        fs::rename(&self.tmp_path, self.target_path.as_ref())
    }
}

impl<P: AsRef<Path>> Write for StagedFile<P> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl<P: AsRef<Path>> Close for StagedFile<P> {
    fn close(mut self) -> io::Result<()> {
        self.finalize()
    }
}

impl<P: AsRef<Path>> Drop for StagedFile<P> {
    fn drop(&mut self) {
        if !self.finalized
            && let Err(err) = self.finalize()
        {
            tracing::error!(
                path = %self.target_path.as_ref().display(),
                "failed to move staged file into place: {err}"
            );
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Removes leftover temporary files of [StagedFile] in the given directory and its
/// subdirectories.
///
/// Files still locked by a live writer are kept.
pub fn clean_leftover_tmp_files<P: AsRef<Path>>(path: P) -> io::Result<()> {
    for entry in path.as_ref().read_dir()? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            clean_leftover_tmp_files(entry.path())?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let mut parts = file_name.rsplitn(3, '.');
        let suffix = parts.next();
        let marker = parts.next();
        if marker == Some(TMP_FILE_MARKER)
            && suffix.map(str::len) == Some(TMP_FILE_SUFFIX_ENCODED_LEN)
        {
            let unlocked = OpenOptions::new()
                .read(true)
                .open(entry.path())
                .and_then(|handle| handle.try_lock_exclusive())
                .is_ok();
            if unlocked {
                tracing::debug!(path = %entry.path().display(), "removing leftover temporary file");
                fs::remove_file(entry.path())?;
            }
        }
    }
    Ok(())
}
