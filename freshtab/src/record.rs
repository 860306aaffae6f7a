//! The single cached photo record and its persisted form.

use crate::photo::{ImageRef, Photo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of the photo cache slot.
///
/// A record either holds a fetched photo ready to be served or the message of the last failed
/// fetch. It is always replaced as a whole, never merged.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedPhotoRecord {
    Ready(CachedPhoto),
    Failed(FailedFetch),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedPhoto {
    pub photo: Photo,
    pub high_res: ImageRef,
    /// Absent if the low-resolution image could not be fetched.
    pub low_res: Option<ImageRef>,
    /// Whether the photo has been delivered to a caller.
    pub is_used: bool,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFetch {
    /// Human-readable message, shown to the caller as is.
    pub error: String,
    pub cached_at: DateTime<Utc>,
}

impl CachedPhotoRecord {
    pub fn failed(error: impl Into<String>, cached_at: DateTime<Utc>) -> Self {
        Self::Failed(FailedFetch {
            error: error.into(),
            cached_at,
        })
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        match self {
            Self::Ready(cached) => cached.cached_at,
            Self::Failed(failed) => failed.cached_at,
        }
    }

    pub fn photo(&self) -> Option<&Photo> {
        match self {
            Self::Ready(cached) => Some(&cached.photo),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Ready(_) => None,
            Self::Failed(failed) => Some(&failed.error),
        }
    }

    pub fn is_used(&self) -> bool {
        matches!(self, Self::Ready(cached) if cached.is_used)
    }

    /// Storage keys of embedded images referenced by this record.
    pub fn blob_keys(&self) -> Vec<&str> {
        let Self::Ready(cached) = self else {
            return Vec::new();
        };
        [Some(&cached.high_res), cached.low_res.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|image| match image {
                ImageRef::Embedded { blob, .. } => Some(blob.as_str()),
                ImageRef::Remote { .. } => None,
            })
            .collect()
    }

    /// Encodes the record in its persisted JSON form.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&PersistedRecord::from(self))
    }

    /// Decodes a persisted record.
    ///
    /// Only records holding a photo are restored; persisted failures decode to `None` so that
    /// a restart retries the fetch.
    pub fn from_json(data: &[u8]) -> serde_json::Result<Option<Self>> {
        let persisted: PersistedRecord = serde_json::from_slice(data)?;
        Ok(persisted.into_record())
    }
}

/// Flat on-disk layout of a record.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRecord {
    #[serde(default)]
    photo: Option<Photo>,
    #[serde(default)]
    high_res: Option<ImageRef>,
    #[serde(default)]
    low_res: Option<ImageRef>,
    #[serde(default)]
    is_used: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    cached_at: DateTime<Utc>,
    #[serde(default)]
    error: Option<String>,
}

impl From<&CachedPhotoRecord> for PersistedRecord {
    fn from(record: &CachedPhotoRecord) -> Self {
        match record {
            CachedPhotoRecord::Ready(cached) => Self {
                photo: Some(cached.photo.clone()),
                high_res: Some(cached.high_res.clone()),
                low_res: cached.low_res.clone(),
                is_used: cached.is_used,
                cached_at: cached.cached_at,
                error: None,
            },
            CachedPhotoRecord::Failed(failed) => Self {
                photo: None,
                high_res: None,
                low_res: None,
                is_used: false,
                cached_at: failed.cached_at,
                error: Some(failed.error.clone()),
            },
        }
    }
}

impl PersistedRecord {
    fn into_record(self) -> Option<CachedPhotoRecord> {
        let photo = self.photo?;
        let high_res = self.high_res?;
        Some(CachedPhotoRecord::Ready(CachedPhoto {
            photo,
            high_res,
            low_res: self.low_res,
            is_used: self.is_used,
            cached_at: self.cached_at,
        }))
    }
}
