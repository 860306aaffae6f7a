//! Decides whether the cached photo must be replaced.

use crate::record::CachedPhotoRecord;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Whether a new photo should be fetched.
///
/// An unused photo is always kept, no matter how old it is, so that every fetched photo is shown
/// at least once. A used photo is replaced once it is at least `cache_duration` old. Missing and
/// failed records always need a refresh, as does every forced refresh.
pub fn needs_refresh(
    record: Option<&CachedPhotoRecord>,
    cache_duration: Duration,
    force: bool,
    now: DateTime<Utc>,
) -> bool {
    if force {
        return true;
    }
    let cached = match record {
        None => {
            tracing::debug!("no cached photo, refresh needed");
            return true;
        }
        Some(CachedPhotoRecord::Failed(failed)) => {
            tracing::debug!(error = %failed.error, "last fetch failed, refresh needed");
            return true;
        }
        Some(CachedPhotoRecord::Ready(cached)) => cached,
    };
    if !cached.is_used {
        tracing::debug!("cached photo is unused, keeping it");
        return false;
    }
    let max_age = TimeDelta::from_std(cache_duration).unwrap_or(TimeDelta::MAX);
    let stale = now.signed_duration_since(cached.cached_at) >= max_age;
    if stale {
        tracing::debug!("cached photo is used and stale, refresh needed");
    } else {
        tracing::debug!("cached photo is used but still fresh, keeping it");
    }
    stale
}
