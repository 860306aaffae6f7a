//! Typed, asynchronous access to the values the photo cache keeps in a [Storage].
//!
//! Storage operations are blocking I/O and are therefore moved to tokio's blocking thread pool.

use crate::error::{IoKeyResult, StoreError, WithKey};
use crate::record::CachedPhotoRecord;
use crate::settings::UserPreferences;
use crate::storage::Storage;
use crate::util::close::Close;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

pub const PHOTO_KEY: &str = "/cached-photo.json";
pub const PREFERENCES_KEY: &str = "/preferences.json";
pub const IMAGES_PREFIX: &str = "/images/";

fn read_value<S: Storage + ?Sized>(storage: &S, key: &str) -> IoKeyResult<Option<Vec<u8>>> {
    let mut reader = match storage.get(key) {
        Ok(reader) => reader,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).with_key(key)?;
    Ok(Some(buf))
}

fn write_value<S: Storage + ?Sized>(storage: &S, key: &str, value: &[u8]) -> IoKeyResult<()> {
    let mut writer = storage.put(key)?;
    writer.write_all(value).with_key(key)?;
    writer.close().with_key(key)
}

async fn blocking<S, T, F>(storage: &Arc<S>, f: F) -> Result<T, StoreError>
where
    S: Storage + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StoreError> + Send + 'static,
{
    let storage = Arc::clone(storage);
    tokio::task::spawn_blocking(move || f(&storage)).await?
}

/// The single slot holding the [CachedPhotoRecord].
pub struct PhotoStore<S> {
    storage: Arc<S>,
}

impl<S> Clone for PhotoStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: Storage + 'static> PhotoStore<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Reads back the persisted record.
    ///
    /// Returns `None` if nothing usable is stored: a missing or unreadable slot, malformed
    /// content, or a persisted failure.
    pub async fn load(&self) -> Option<CachedPhotoRecord> {
        let data = match blocking(&self.storage, |storage| Ok(read_value(storage, PHOTO_KEY)?))
            .await
        {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(err) => {
                tracing::error!("failed to read cached photo: {err}");
                return None;
            }
        };
        match CachedPhotoRecord::from_json(&data) {
            Ok(record) => {
                if let Some(record) = &record {
                    tracing::debug!(
                        is_used = record.is_used(),
                        cached_at = %record.cached_at(),
                        "loaded cached photo"
                    );
                }
                record
            }
            Err(err) => {
                tracing::warn!("ignoring malformed cached photo: {err}");
                None
            }
        }
    }

    /// Replaces the persisted record.
    pub async fn save(&self, record: &CachedPhotoRecord) -> Result<(), StoreError> {
        let data = record.to_json()?;
        blocking(&self.storage, move |storage| {
            Ok(write_value(storage, PHOTO_KEY, &data)?)
        })
        .await?;
        tracing::debug!(
            is_used = record.is_used(),
            cached_at = %record.cached_at(),
            "saved cached photo"
        );
        Ok(())
    }

    /// Deletes the persisted record. Returns whether there was one.
    pub async fn clear(&self) -> Result<bool, StoreError> {
        blocking(&self.storage, |storage| match storage.delete(PHOTO_KEY) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        })
        .await
    }
}

/// The slot holding the [UserPreferences].
pub struct PreferencesStore<S> {
    storage: Arc<S>,
}

impl<S> Clone for PreferencesStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: Storage + 'static> PreferencesStore<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    pub async fn load(&self) -> Result<Option<UserPreferences>, StoreError> {
        let data = blocking(&self.storage, |storage| {
            Ok(read_value(storage, PREFERENCES_KEY)?)
        })
        .await?;
        match data {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, preferences: &UserPreferences) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(preferences)?;
        blocking(&self.storage, move |storage| {
            Ok(write_value(storage, PREFERENCES_KEY, &data)?)
        })
        .await
    }
}

/// Which of the two cached images of a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    High,
    Low,
}

impl Resolution {
    fn suffix(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Low => "low",
        }
    }
}

/// Raw image bytes kept for embedded image delivery.
pub struct ImageBlobs<S> {
    storage: Arc<S>,
}

impl<S> Clone for ImageBlobs<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S: Storage + 'static> ImageBlobs<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Storage key for an image of the given photo.
    pub fn key(photo_id: &str, resolution: Resolution) -> String {
        let photo_id: String = photo_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{IMAGES_PREFIX}{photo_id}-{}", resolution.suffix())
    }

    pub async fn put(&self, key: String, data: bytes::Bytes) -> Result<(), StoreError> {
        blocking(&self.storage, move |storage| {
            Ok(write_value(storage, &key, &data)?)
        })
        .await
    }

    /// Reads an image, returning `None` if it is not stored.
    pub async fn get(&self, key: String) -> Result<Option<Vec<u8>>, StoreError> {
        blocking(&self.storage, move |storage| Ok(read_value(storage, &key)?)).await
    }

    /// Deletes the given images, ignoring those that are already gone.
    pub async fn delete_all(&self, keys: Vec<String>) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        blocking(&self.storage, move |storage| {
            for key in &keys {
                match storage.delete(key) {
                    Ok(()) => tracing::debug!(%key, "deleted cached image"),
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
            Ok(())
        })
        .await
    }
}
