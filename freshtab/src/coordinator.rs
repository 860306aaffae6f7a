//! Keeps the cached photo up to date, making sure that only one fetch runs at a time.

use crate::error::StoreError;
use crate::freshness::needs_refresh;
use crate::photo::{ImageRef, Photo};
use crate::record::{CachedPhoto, CachedPhotoRecord};
use crate::retry::fetch_with_retry;
use crate::settings::{ImageDelivery, PhotoSettings, SettingsHandle};
use crate::storage::Storage;
use crate::store::{ImageBlobs, PhotoStore, Resolution};
use crate::unsplash::{ApiError, fetch_random_photo};
use crate::util::clock::{Clock, SystemClock};
use crate::util::http::{HttpClient, HttpRequest, HttpResponse, ReqwestClient};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, watch};
use url::Url;

/// What a call to [FetchCoordinator::refresh] did.
///
/// This is informational only: failures are recorded in the cached record, not returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Another refresh was running; nothing was done.
    AlreadyInFlight,
    /// The cached photo is still good.
    UpToDate,
    /// A new photo was fetched and cached.
    Fetched,
    /// The photo metadata could not be obtained; the record now holds this error message.
    Failed(String),
    /// The high-resolution image could not be fetched; the previous record was kept.
    PrimaryImageUnavailable,
}

/// Owns the in-memory cached record and replaces it with freshly fetched photos.
///
/// The coordinator is meant to be shared (e.g. in an [Arc]) by everything that reads or
/// refreshes the cached photo. All writes to the persisted record go through it.
pub struct FetchCoordinator<S, H = ReqwestClient, C = SystemClock> {
    client: H,
    clock: C,
    settings: SettingsHandle,
    photos: PhotoStore<S>,
    blobs: ImageBlobs<S>,
    record: RwLock<Option<CachedPhotoRecord>>,
    in_flight: watch::Sender<bool>,
}

/// Marks a refresh as running for as long as it is alive.
struct InFlightGuard<'a> {
    in_flight: &'a watch::Sender<bool>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.send_replace(false);
    }
}

impl<S> FetchCoordinator<S>
where
    S: Storage + 'static,
{
    pub fn with_defaults(storage: Arc<S>, client: ReqwestClient, settings: SettingsHandle) -> Self {
        Self::new(storage, client, settings, SystemClock)
    }
}

impl<S, H, C> FetchCoordinator<S, H, C>
where
    S: Storage + 'static,
    H: HttpClient,
    C: Clock,
{
    pub fn new(storage: Arc<S>, client: H, settings: SettingsHandle, clock: C) -> Self {
        let (in_flight, _) = watch::channel(false);
        Self {
            client,
            clock,
            settings,
            photos: PhotoStore::new(Arc::clone(&storage)),
            blobs: ImageBlobs::new(storage),
            record: RwLock::new(None),
            in_flight,
        }
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub fn blobs(&self) -> &ImageBlobs<S> {
        &self.blobs
    }

    /// Snapshot of the in-memory record.
    pub async fn current(&self) -> Option<CachedPhotoRecord> {
        self.record.read().await.clone()
    }

    /// Read access to the in-memory record.
    ///
    /// While the guard is held, the record cannot be replaced and the images it references stay
    /// in the store. Do not hold it across calls that modify the record, e.g. [Self::mark_used].
    pub async fn read_record(&self) -> RwLockReadGuard<'_, Option<CachedPhotoRecord>> {
        self.record.read().await
    }

    /// Like [Self::current], but reads the persisted record if nothing is held in memory yet.
    pub async fn current_or_load(&self) -> Option<CachedPhotoRecord> {
        if let Some(record) = self.current().await {
            return Some(record);
        }
        let loaded = self.photos.load().await;
        let mut slot = self.record.write().await;
        if slot.is_none() {
            *slot = loaded;
        }
        slot.clone()
    }

    /// Whether a refresh is currently running.
    pub fn is_refreshing(&self) -> bool {
        *self.in_flight.borrow()
    }

    /// Waits until no refresh is running.
    pub async fn wait_idle(&self) {
        let mut in_flight = self.in_flight.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = in_flight.wait_for(|busy| !*busy).await;
    }

    /// Marks the in-memory photo as delivered, if it is still the given photo.
    ///
    /// Returns whether the record changed. Use [Self::persist] to write the change to the store.
    pub async fn mark_used(&self, photo_id: &str) -> bool {
        let mut slot = self.record.write().await;
        match slot.as_mut() {
            Some(CachedPhotoRecord::Ready(cached))
                if cached.photo.id == photo_id && !cached.is_used =>
            {
                cached.is_used = true;
                tracing::debug!(photo_id, "cached photo marked as used");
                true
            }
            _ => false,
        }
    }

    /// Writes the in-memory record to the store.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let slot = self.record.read().await;
        match slot.as_ref() {
            Some(record) => self.photos.save(record).await,
            None => Ok(()),
        }
    }

    /// Fetches a new photo if needed (or if `force` is set).
    ///
    /// Returns immediately with [RefreshOutcome::AlreadyInFlight] if another refresh is running.
    /// Never fails: errors end up in the cached record or are logged.
    pub async fn refresh(&self, force: bool) -> RefreshOutcome {
        let Some(_guard) = self.try_begin() else {
            tracing::info!("a photo fetch is already in progress, not starting another one");
            return RefreshOutcome::AlreadyInFlight;
        };
        let settings = self.settings.get();
        if !force {
            let record = self.record.read().await;
            if !needs_refresh(
                record.as_ref(),
                settings.cache_duration,
                false,
                self.clock.now(),
            ) {
                return RefreshOutcome::UpToDate;
            }
        }
        self.fetch(&settings).await
    }

    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        let acquired = self.in_flight.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        acquired.then(|| InFlightGuard {
            in_flight: &self.in_flight,
        })
    }

    async fn fetch(&self, settings: &PhotoSettings) -> RefreshOutcome {
        let photo = match fetch_random_photo(&self.client, settings).await {
            Ok(photo) => photo,
            Err(err) => return self.record_failure(err).await,
        };

        let high_url = photo.high_res_url(&settings.image_format);
        let low_url = photo.low_res_url(&settings.image_format);
        let high_request = HttpRequest::get(high_url.clone());
        let low_request = HttpRequest::get(low_url.clone());
        let (high, low) = tokio::join!(
            fetch_with_retry(&self.client, &high_request, &settings.retry),
            fetch_with_retry(&self.client, &low_request, &settings.retry),
        );

        let high = match high {
            Ok(response) => response,
            Err(failure) => {
                tracing::error!(
                    photo_id = %photo.id,
                    "could not fetch the high-resolution image ({failure}), keeping the previous photo"
                );
                return RefreshOutcome::PrimaryImageUnavailable;
            }
        };
        let high_res = match self
            .image_ref(&photo, Resolution::High, high_url, high, settings)
            .await
        {
            Ok(image) => image,
            Err(err) => {
                tracing::error!(
                    photo_id = %photo.id,
                    "could not store the high-resolution image ({err}), keeping the previous photo"
                );
                return RefreshOutcome::PrimaryImageUnavailable;
            }
        };
        let low_res = match low {
            Ok(response) => match self
                .image_ref(&photo, Resolution::Low, low_url, response, settings)
                .await
            {
                Ok(image) => Some(image),
                Err(err) => {
                    tracing::warn!(photo_id = %photo.id, "could not store the low-resolution image: {err}");
                    None
                }
            },
            Err(failure) => {
                tracing::warn!(
                    photo_id = %photo.id,
                    "low-resolution image unavailable, caching the photo without it: {failure}"
                );
                None
            }
        };

        let photo_id = photo.id.clone();
        let record = CachedPhotoRecord::Ready(CachedPhoto {
            photo,
            high_res,
            low_res,
            is_used: false,
            cached_at: self.next_timestamp(self.clock.now()).await,
        });
        self.replace(record).await;
        tracing::info!(%photo_id, "new photo fetched and cached, marked as unused");
        RefreshOutcome::Fetched
    }

    async fn image_ref(
        &self,
        photo: &Photo,
        resolution: Resolution,
        url: Url,
        response: HttpResponse,
        settings: &PhotoSettings,
    ) -> Result<ImageRef, StoreError> {
        let mime_type = response
            .content_type
            .unwrap_or_else(|| settings.default_mime_type());
        match settings.image_delivery {
            ImageDelivery::Remote => Ok(ImageRef::Remote { url, mime_type }),
            ImageDelivery::Embedded => {
                let blob = ImageBlobs::<S>::key(&photo.id, resolution);
                self.blobs.put(blob.clone(), response.body).await?;
                Ok(ImageRef::Embedded { blob, mime_type })
            }
        }
    }

    async fn record_failure(&self, err: ApiError) -> RefreshOutcome {
        let message = err.to_string();
        match err {
            ApiError::MissingApiKey => tracing::error!("Unsplash API key not configured"),
            err => tracing::error!("photo pre-fetch failed: {err}"),
        }
        let cached_at = match self.record.read().await.as_ref() {
            Some(previous) => previous.cached_at(),
            None => self.clock.now(),
        };
        self.replace(CachedPhotoRecord::failed(message.clone(), cached_at))
            .await;
        RefreshOutcome::Failed(message)
    }

    /// Timestamp for a new record that never moves backwards in time.
    async fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.record.read().await.as_ref() {
            Some(previous) => previous.cached_at().max(now),
            None => now,
        }
    }

    async fn replace(&self, record: CachedPhotoRecord) {
        let mut slot = self.record.write().await;
        if let Err(err) = self.photos.save(&record).await {
            tracing::error!("failed to persist cached photo: {err}");
        }
        let stale_blobs: Vec<String> = slot
            .as_ref()
            .map(|previous| {
                let current = record.blob_keys();
                previous
                    .blob_keys()
                    .into_iter()
                    .filter(|key| !current.contains(key))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        *slot = Some(record);
        drop(slot);

        if let Err(err) = self.blobs.delete_all(stale_blobs).await {
            tracing::warn!("failed to delete images of the replaced photo: {err}");
        }
    }
}
