//! Serves the cached photo to callers and keeps the next one coming.

use crate::coordinator::{FetchCoordinator, RefreshOutcome};
use crate::error::StoreError;
use crate::photo::{ImageRef, Photo};
use crate::record::CachedPhotoRecord;
use crate::scheduler::RefreshScheduler;
use crate::settings::{PreferencesError, SettingsHandle, UserPreferences};
use crate::storage::Storage;
use crate::store::PreferencesStore;
use crate::util::clock::Clock;
use crate::util::http::HttpClient;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use url::Url;

pub const PHOTO_NOT_AVAILABLE: &str = "Photo data is not available.";
pub const IMAGE_NOT_CACHED: &str = "Image not found in cache, please reopen the tab.";

/// Answer to a photo request: either a photo or the reason there is none.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PhotoResponse {
    Photo {
        photo: Box<Photo>,
        high_res: ImagePayload,
        low_res: Option<ImagePayload>,
    },
    Error {
        error: String,
    },
}

impl PhotoResponse {
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }
}

/// An image as handed to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImagePayload {
    Remote { url: Url, mime_type: String },
    /// Base64-encoded image bytes.
    Embedded { data: String, mime_type: String },
}

#[derive(Debug)]
pub enum UpdatePreferencesError {
    Invalid(PreferencesError),
    Store(StoreError),
}

impl Display for UpdatePreferencesError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "failed to save preferences: {err}"),
        }
    }
}

impl std::error::Error for UpdatePreferencesError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<PreferencesError> for UpdatePreferencesError {
    fn from(value: PreferencesError) -> Self {
        Self::Invalid(value)
    }
}

impl From<StoreError> for UpdatePreferencesError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Entry point for callers wanting a photo.
///
/// Owns the [FetchCoordinator] and the [RefreshScheduler] and wires them together: serving a
/// photo marks it as used, pre-fetches the next one in the background and re-arms the scheduled
/// refresh.
pub struct RequestHandler<S, H, C> {
    coordinator: Arc<FetchCoordinator<S, H, C>>,
    scheduler: Arc<RefreshScheduler<S, H, C>>,
    preferences: PreferencesStore<S>,
    tasks: TaskTracker,
}

impl<S, H, C> RequestHandler<S, H, C>
where
    S: Storage + 'static,
    H: HttpClient + 'static,
    C: Clock + 'static,
{
    pub fn new(storage: Arc<S>, client: H, settings: SettingsHandle, clock: C) -> Self {
        let coordinator = Arc::new(FetchCoordinator::new(
            Arc::clone(&storage),
            client,
            settings,
            clock,
        ));
        Self {
            scheduler: Arc::new(RefreshScheduler::new(Arc::clone(&coordinator))),
            coordinator,
            preferences: PreferencesStore::new(storage),
            tasks: TaskTracker::new(),
        }
    }

    pub fn coordinator(&self) -> &Arc<FetchCoordinator<S, H, C>> {
        &self.coordinator
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler<S, H, C>> {
        &self.scheduler
    }

    /// Returns the cached photo, fetching one first if nothing usable is cached.
    ///
    /// Never fails; problems are reported in [PhotoResponse::Error].
    pub async fn get_photo(&self) -> PhotoResponse {
        let record = self.coordinator.current_or_load().await;
        if record.as_ref().is_none_or(|record| record.photo().is_none()) {
            tracing::info!("no usable cached photo, fetching one now");
            if self.coordinator.refresh(true).await == RefreshOutcome::AlreadyInFlight {
                self.coordinator.wait_idle().await;
            }
        }

        // Images are read under the record lock so a concurrent refresh cannot delete them.
        let record = self.coordinator.read_record().await;
        let cached = match record.as_ref() {
            None => return PhotoResponse::error(PHOTO_NOT_AVAILABLE),
            Some(CachedPhotoRecord::Failed(failed)) => {
                return PhotoResponse::error(failed.error.clone());
            }
            Some(CachedPhotoRecord::Ready(cached)) => cached.clone(),
        };
        let high_res = self.payload(&cached.high_res).await;
        let low_res = match &cached.low_res {
            Some(image) => self.payload(image).await,
            None => None,
        };
        drop(record);

        let Some(high_res) = high_res else {
            tracing::error!(
                photo_id = %cached.photo.id,
                "high-resolution image not found in cache, re-fetching"
            );
            self.refresh_in_background(true);
            return PhotoResponse::error(IMAGE_NOT_CACHED);
        };

        self.coordinator.mark_used(&cached.photo.id).await;
        self.spawn_after_delivery();

        PhotoResponse::Photo {
            photo: Box::new(cached.photo),
            high_res,
            low_res,
        }
    }

    async fn payload(&self, image: &ImageRef) -> Option<ImagePayload> {
        match image {
            ImageRef::Remote { url, mime_type } => Some(ImagePayload::Remote {
                url: url.clone(),
                mime_type: mime_type.clone(),
            }),
            ImageRef::Embedded { blob, mime_type } => {
                match self.coordinator.blobs().get(blob.clone()).await {
                    Ok(Some(data)) => Some(ImagePayload::Embedded {
                        data: BASE64.encode(data),
                        mime_type: mime_type.clone(),
                    }),
                    Ok(None) => None,
                    Err(err) => {
                        tracing::error!(%blob, "failed to read cached image: {err}");
                        None
                    }
                }
            }
        }
    }

    fn spawn_after_delivery(&self) {
        let coordinator = Arc::clone(&self.coordinator);
        let scheduler = Arc::clone(&self.scheduler);
        self.tasks.spawn(async move {
            if let Err(err) = coordinator.persist().await {
                tracing::error!("failed to persist usage of the served photo: {err}");
            }
            tracing::info!("served photo marked as used, pre-fetching the next one");
            let outcome = coordinator.refresh(false).await;
            tracing::debug!(?outcome, "pre-fetch after delivery finished");
            scheduler.rearm();
        });
    }

    /// Starts a refresh without waiting for it.
    pub fn refresh_in_background(&self, force: bool) {
        let coordinator = Arc::clone(&self.coordinator);
        self.tasks.spawn(async move {
            let outcome = coordinator.refresh(force).await;
            tracing::debug!(?outcome, force, "background refresh finished");
        });
    }

    /// Waits for all background work spawned so far to finish.
    pub async fn wait_for_background_tasks(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Stops the scheduled refresh and waits for background work to finish.
    pub async fn shutdown(&self) {
        self.scheduler.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Preferences currently applied, if any were set.
    pub fn preferences(&self) -> Option<UserPreferences> {
        self.coordinator.settings().preferences()
    }

    /// Validates, saves and applies new preferences, then re-arms the scheduled refresh.
    pub async fn update_preferences(
        &self,
        preferences: UserPreferences,
    ) -> Result<UserPreferences, UpdatePreferencesError> {
        let preferences = preferences.validate()?;
        self.preferences.save(&preferences).await?;
        self.coordinator
            .settings()
            .apply_preferences(preferences.clone());
        tracing::info!(
            cache_duration_minutes = preferences.cache_duration_minutes,
            topics = preferences.topics.len(),
            "preferences updated"
        );
        self.scheduler.rearm();
        Ok(preferences)
    }

    async fn load_preferences(&self) {
        match self.preferences.load().await {
            Ok(Some(preferences)) => self.coordinator.settings().apply_preferences(preferences),
            Ok(None) => {}
            Err(err) => tracing::warn!("ignoring stored preferences: {err}"),
        }
    }

    /// Brings the cache up after a process (re)start.
    ///
    /// Restores preferences and the cached photo, arms the scheduled refresh and, if no usable
    /// photo is cached, starts fetching one in the background.
    pub async fn startup(&self) {
        self.load_preferences().await;
        let record = self.coordinator.current_or_load().await;
        self.scheduler.rearm();
        if record.as_ref().is_none_or(|record| record.photo().is_none()) {
            tracing::info!("no valid cached photo on startup, fetching a new one");
            self.refresh_in_background(true);
        }
    }

    /// Prepares a freshly installed cache: fetches a photo, then arms the scheduled refresh.
    pub async fn install(&self) -> RefreshOutcome {
        self.load_preferences().await;
        let outcome = self.coordinator.refresh(true).await;
        self.scheduler.rearm();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::photo::tests::photo_json;
    use crate::settings::{ImageDelivery, PhotoSettings};
    use crate::storage::in_memory::InMemoryStorage;
    use crate::store::{PREFERENCES_KEY, PhotoStore};
    use crate::test_util::clock::ControlledClock;
    use crate::test_util::http::{ScriptedHttpClient, image, json};
    use chrono::{TimeDelta, Utc};
    use serde_json::json;
    use std::time::Duration;

    const API_URL: &str =
        "https://api.unsplash.com/photos/random?query=nature&orientation=landscape";

    type TestHandler = RequestHandler<InMemoryStorage, ScriptedHttpClient, ControlledClock>;

    struct Fixture {
        handler: TestHandler,
        client: ScriptedHttpClient,
        clock: ControlledClock,
        storage: Arc<InMemoryStorage>,
    }

    fn settings() -> PhotoSettings {
        PhotoSettings {
            api_key: Some("key".to_string()),
            ..PhotoSettings::default()
        }
    }

    fn fixture_with(settings: PhotoSettings, client: ScriptedHttpClient) -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = ControlledClock::new(Utc::now());
        let handler = RequestHandler::new(
            Arc::clone(&storage),
            client.clone(),
            SettingsHandle::new(settings),
            clock.clone(),
        );
        Fixture {
            handler,
            client,
            clock,
            storage,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(settings(), ScriptedHttpClient::new())
    }

    fn high_url(id: &str) -> String {
        format!("https://images.unsplash.com/{id}?ixid=abc&q=85&fm=webp")
    }

    fn serve_photo(client: &ScriptedHttpClient, id: &str) {
        client.respond(API_URL, json(&photo_json(id)));
        client.respond(&high_url(id), image("image/webp", b"high"));
        client.respond(
            &format!("https://images.unsplash.com/{id}?ixid=abc&w=200&fm=webp"),
            image("image/jpeg", b"low"),
        );
    }

    fn served_id(response: &PhotoResponse) -> &str {
        match response {
            PhotoResponse::Photo { photo, .. } => &photo.id,
            PhotoResponse::Error { error } => panic!("expected a photo, got error: {error}"),
        }
    }

    #[tokio::test]
    async fn test_fetches_and_serves_photo_when_nothing_is_cached() {
        let f = fixture();
        serve_photo(&f.client, "lake");

        let response = f.handler.get_photo().await;

        let PhotoResponse::Photo {
            photo,
            high_res,
            low_res,
        } = response
        else {
            panic!("expected a photo");
        };
        assert_eq!(photo.id, "lake");
        assert_eq!(
            high_res,
            ImagePayload::Remote {
                url: Url::parse(&high_url("lake")).unwrap(),
                mime_type: "image/webp".to_string(),
            }
        );
        assert!(matches!(low_res, Some(ImagePayload::Remote { ref mime_type, .. }) if mime_type == "image/jpeg"));
    }

    #[tokio::test]
    async fn test_served_photo_is_marked_used_and_persisted() {
        let f = fixture();
        serve_photo(&f.client, "lake");

        f.handler.get_photo().await;
        assert!(f.handler.coordinator().current().await.unwrap().is_used());

        f.handler.wait_for_background_tasks().await;
        let persisted = PhotoStore::new(Arc::clone(&f.storage)).load().await.unwrap();
        assert!(persisted.is_used());
        assert!(f.handler.scheduler().is_scheduled());
        // The used photo is still fresh, so no new photo was requested.
        assert_eq!(f.client.request_count(API_URL), 1);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_reported_to_caller() {
        let f = fixture_with(PhotoSettings::default(), ScriptedHttpClient::new());
        assert_eq!(
            f.handler.get_photo().await,
            PhotoResponse::error("API Key not set. Please set it in the preferences.")
        );
        assert!(f.client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_used_stale_photo_is_served_and_next_one_prefetched() {
        let f = fixture();
        serve_photo(&f.client, "lake");
        assert_eq!(served_id(&f.handler.get_photo().await), "lake");
        f.handler.wait_for_background_tasks().await;

        f.clock.advance_by(TimeDelta::minutes(6));
        serve_photo(&f.client, "river");
        assert_eq!(served_id(&f.handler.get_photo().await), "lake");
        f.handler.wait_for_background_tasks().await;

        let record = f.handler.coordinator().current().await.unwrap();
        assert_eq!(record.photo().unwrap().id, "river");
        assert!(!record.is_used());
        assert_eq!(served_id(&f.handler.get_photo().await), "river");
    }

    #[tokio::test]
    async fn test_failed_record_triggers_forced_fetch() {
        let f = fixture();
        f.handler.coordinator().refresh(true).await;
        assert!(f.handler.coordinator().current().await.unwrap().error().is_some());

        serve_photo(&f.client, "lake");
        assert_eq!(served_id(&f.handler.get_photo().await), "lake");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_refresh_already_in_flight() {
        let client = ScriptedHttpClient::new().with_latency(Duration::from_secs(1));
        let f = fixture_with(settings(), client);
        serve_photo(&f.client, "lake");

        let coordinator = Arc::clone(f.handler.coordinator());
        let refresh = tokio::spawn(async move { coordinator.refresh(true).await });
        while !f.handler.coordinator().is_refreshing() {
            tokio::task::yield_now().await;
        }

        assert_eq!(served_id(&f.handler.get_photo().await), "lake");
        assert_eq!(refresh.await.unwrap(), RefreshOutcome::Fetched);
        assert_eq!(f.client.request_count(API_URL), 1);
    }

    #[tokio::test]
    async fn test_embedded_images_are_inlined() {
        let f = fixture_with(
            PhotoSettings {
                image_delivery: ImageDelivery::Embedded,
                ..settings()
            },
            ScriptedHttpClient::new(),
        );
        serve_photo(&f.client, "lake");

        let PhotoResponse::Photo {
            high_res, low_res, ..
        } = f.handler.get_photo().await
        else {
            panic!("expected a photo");
        };
        assert_eq!(
            high_res,
            ImagePayload::Embedded {
                data: BASE64.encode(b"high"),
                mime_type: "image/webp".to_string(),
            }
        );
        assert_eq!(
            low_res,
            Some(ImagePayload::Embedded {
                data: BASE64.encode(b"low"),
                mime_type: "image/jpeg".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_missing_embedded_image_triggers_refetch() {
        let f = fixture_with(
            PhotoSettings {
                image_delivery: ImageDelivery::Embedded,
                ..settings()
            },
            ScriptedHttpClient::new(),
        );
        serve_photo(&f.client, "lake");
        f.handler.coordinator().refresh(true).await;
        f.storage.delete("/images/lake-high").unwrap();

        serve_photo(&f.client, "river");
        assert_eq!(
            f.handler.get_photo().await,
            PhotoResponse::error(IMAGE_NOT_CACHED)
        );
        f.handler.wait_for_background_tasks().await;
        assert_eq!(served_id(&f.handler.get_photo().await), "river");
    }

    #[tokio::test]
    async fn test_refresh_keeps_images_while_record_is_read() {
        let f = fixture_with(
            PhotoSettings {
                image_delivery: ImageDelivery::Embedded,
                ..settings()
            },
            ScriptedHttpClient::new(),
        );
        serve_photo(&f.client, "lake");
        f.handler.coordinator().refresh(true).await;

        let record = f.handler.coordinator().read_record().await;
        serve_photo(&f.client, "river");
        let coordinator = Arc::clone(f.handler.coordinator());
        let refresh = tokio::spawn(async move { coordinator.refresh(true).await });
        while !f.storage.exists("/images/river-low").unwrap()
            || !f.storage.exists("/images/river-high").unwrap()
        {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(record.as_ref().unwrap().photo().unwrap().id, "lake");
        assert!(f.storage.exists("/images/lake-high").unwrap());
        assert!(f.storage.exists("/images/lake-low").unwrap());
        drop(record);

        assert_eq!(refresh.await.unwrap(), RefreshOutcome::Fetched);
        assert!(!f.storage.exists("/images/lake-high").unwrap());
        assert_eq!(served_id(&f.handler.get_photo().await), "river");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_photo_served_during_concurrent_refresh_has_its_images() {
        let f = fixture_with(
            PhotoSettings {
                image_delivery: ImageDelivery::Embedded,
                ..settings()
            },
            ScriptedHttpClient::new(),
        );
        for round in 0..20 {
            let id = format!("photo{round}");
            serve_photo(&f.client, &id);
            let (response, _) = tokio::join!(
                f.handler.get_photo(),
                f.handler.coordinator().refresh(true)
            );
            assert!(
                matches!(response, PhotoResponse::Photo { .. }),
                "round {round}: {response:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_update_preferences() {
        let f = fixture_with(PhotoSettings::default(), ScriptedHttpClient::new());

        let err = f
            .handler
            .update_preferences(UserPreferences::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpdatePreferencesError::Invalid(PreferencesError::MissingApiKey)
        ));
        assert!(!f.storage.exists(PREFERENCES_KEY).unwrap());

        let saved = f
            .handler
            .update_preferences(UserPreferences {
                api_key: "key".to_string(),
                cache_duration_minutes: 0,
                ..UserPreferences::default()
            })
            .await
            .unwrap();
        assert_eq!(saved.cache_duration_minutes, 5);
        assert!(f.storage.exists(PREFERENCES_KEY).unwrap());
        assert_eq!(f.handler.preferences(), Some(saved));
        assert!(f.handler.scheduler().is_scheduled());

        serve_photo(&f.client, "lake");
        f.client.respond(
            &format!("{API_URL}&topics=6sMVjTLSkeQ%2CFzo3zuOHN6w%2Cbo8jQKTaE0Y"),
            json(&photo_json("lake")),
        );
        assert_eq!(served_id(&f.handler.get_photo().await), "lake");
    }

    #[tokio::test(start_paused = true)]
    async fn test_updated_cache_duration_drives_scheduled_refresh() {
        let f = fixture_with(PhotoSettings::default(), ScriptedHttpClient::new());
        let topics_url = format!("{API_URL}&topics=6sMVjTLSkeQ%2CFzo3zuOHN6w%2Cbo8jQKTaE0Y");
        serve_photo(&f.client, "lake");
        f.client.respond(&topics_url, json(&photo_json("lake")));

        let err = f
            .handler
            .update_preferences(UserPreferences {
                api_key: "key".to_string(),
                cache_duration_minutes: u64::MAX,
                ..UserPreferences::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpdatePreferencesError::Invalid(PreferencesError::CacheDurationTooLong { .. })
        ));
        assert!(!f.storage.exists(PREFERENCES_KEY).unwrap());

        f.handler
            .update_preferences(UserPreferences {
                api_key: "key".to_string(),
                cache_duration_minutes: 30,
                ..UserPreferences::default()
            })
            .await
            .unwrap();
        assert_eq!(served_id(&f.handler.get_photo().await), "lake");
        f.handler.wait_for_background_tasks().await;
        assert_eq!(f.client.request_count(&topics_url), 1);

        // The served photo is stale from now on; only the alarm period decides when it is
        // replaced.
        f.clock.advance_by(TimeDelta::minutes(31));
        tokio::time::sleep(Duration::from_secs(29 * 60)).await;
        f.handler.coordinator().wait_idle().await;
        assert_eq!(f.client.request_count(&topics_url), 1);

        for _ in 0..120 {
            if f.client.request_count(&topics_url) > 1 {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        f.handler.coordinator().wait_idle().await;
        assert_eq!(f.client.request_count(&topics_url), 2);
        assert!(f.handler.scheduler().is_scheduled());
    }

    #[tokio::test]
    async fn test_startup_restores_state_without_fetching() {
        let f = fixture();
        serve_photo(&f.client, "lake");
        f.handler.coordinator().refresh(true).await;

        let restarted = RequestHandler::new(
            Arc::clone(&f.storage),
            f.client.clone(),
            SettingsHandle::new(settings()),
            f.clock.clone(),
        );
        restarted.startup().await;
        restarted.wait_for_background_tasks().await;

        assert!(restarted.scheduler().is_scheduled());
        assert_eq!(
            restarted.coordinator().current().await.unwrap().photo().unwrap().id,
            "lake"
        );
        assert_eq!(f.client.request_count(API_URL), 1);
    }

    #[tokio::test]
    async fn test_startup_fetches_when_nothing_is_cached() {
        let f = fixture();
        serve_photo(&f.client, "lake");

        f.handler.startup().await;
        f.handler.wait_for_background_tasks().await;

        assert_eq!(f.client.request_count(API_URL), 1);
        assert!(f.handler.coordinator().current().await.unwrap().photo().is_some());
    }

    #[tokio::test]
    async fn test_install_fetches_and_arms_scheduler() {
        let f = fixture();
        serve_photo(&f.client, "lake");
        assert_eq!(f.handler.install().await, RefreshOutcome::Fetched);
        assert!(f.handler.scheduler().is_scheduled());
        f.handler.shutdown().await;
        assert!(!f.handler.scheduler().is_scheduled());
    }

    #[test]
    fn test_response_json_layout() {
        let response = PhotoResponse::Photo {
            photo: Box::new(crate::photo::tests::photo("lake")),
            high_res: ImagePayload::Embedded {
                data: "aGlnaA==".to_string(),
                mime_type: "image/webp".to_string(),
            },
            low_res: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["photo"]["id"], json!("lake"));
        assert_eq!(
            value["high_res"],
            json!({"kind": "embedded", "data": "aGlnaA==", "mime_type": "image/webp"})
        );
        assert_eq!(value["low_res"], serde_json::Value::Null);

        assert_eq!(
            serde_json::to_value(PhotoResponse::error(PHOTO_NOT_AVAILABLE)).unwrap(),
            json!({"error": "Photo data is not available."})
        );
    }
}
