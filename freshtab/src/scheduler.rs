//! Periodic background refresh of the cached photo.

use crate::coordinator::FetchCoordinator;
use crate::storage::Storage;
use crate::util::alarms::Alarms;
use crate::util::clock::Clock;
use crate::util::http::HttpClient;
use std::sync::Arc;
use std::time::Duration;

pub const CACHE_REFRESH_ALARM: &str = "cache-refresh";

/// Runs a non-forced refresh of the coordinator on a recurring alarm.
///
/// The refresh itself decides whether a new photo is actually needed, so ticks are cheap when
/// the cached photo has not been used yet.
pub struct RefreshScheduler<S, H, C> {
    coordinator: Arc<FetchCoordinator<S, H, C>>,
    alarms: Alarms,
}

impl<S, H, C> RefreshScheduler<S, H, C>
where
    S: Storage + 'static,
    H: HttpClient + 'static,
    C: Clock + 'static,
{
    pub fn new(coordinator: Arc<FetchCoordinator<S, H, C>>) -> Self {
        Self {
            coordinator,
            alarms: Alarms::new(),
        }
    }

    /// (Re)installs the refresh alarm with the given period.
    pub fn schedule(&self, period: Duration) {
        self.alarms.clear(CACHE_REFRESH_ALARM);
        let coordinator = Arc::clone(&self.coordinator);
        self.alarms.create(CACHE_REFRESH_ALARM, period, move || {
            let coordinator = Arc::clone(&coordinator);
            async move {
                tracing::debug!("cache refresh alarm triggered");
                let outcome = coordinator.refresh(false).await;
                tracing::debug!(?outcome, "scheduled refresh finished");
            }
        });
        tracing::info!(?period, "scheduled cache refresh alarm");
    }

    /// (Re)installs the refresh alarm using the configured cache duration as period.
    pub fn rearm(&self) {
        self.schedule(self.coordinator.settings().get().cache_duration);
    }

    pub fn is_scheduled(&self) -> bool {
        self.alarms.is_scheduled(CACHE_REFRESH_ALARM)
    }

    pub fn cancel(&self) {
        self.alarms.clear(CACHE_REFRESH_ALARM);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::RefreshOutcome;
    use crate::photo::tests::photo_json;
    use crate::settings::{PhotoSettings, SettingsHandle};
    use crate::storage::in_memory::InMemoryStorage;
    use crate::test_util::clock::ControlledClock;
    use crate::test_util::http::{ScriptedHttpClient, image, json};
    use chrono::{TimeDelta, Utc};

    const API_URL: &str =
        "https://api.unsplash.com/photos/random?query=nature&orientation=landscape";

    fn serve_photo(client: &ScriptedHttpClient, id: &str) {
        client.respond(API_URL, json(&photo_json(id)));
        client.respond(
            &format!("https://images.unsplash.com/{id}?ixid=abc&q=85&fm=webp"),
            image("image/webp", b"high"),
        );
        client.respond(
            &format!("https://images.unsplash.com/{id}?ixid=abc&w=200&fm=webp"),
            image("image/webp", b"low"),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_refreshes_used_stale_photo() {
        let client = ScriptedHttpClient::new();
        let clock = ControlledClock::new(Utc::now());
        let coordinator = Arc::new(FetchCoordinator::new(
            Arc::new(InMemoryStorage::new()),
            client.clone(),
            SettingsHandle::new(PhotoSettings {
                api_key: Some("key".to_string()),
                ..PhotoSettings::default()
            }),
            clock.clone(),
        ));
        serve_photo(&client, "lake");
        assert_eq!(coordinator.refresh(true).await, RefreshOutcome::Fetched);

        let scheduler = RefreshScheduler::new(Arc::clone(&coordinator));
        scheduler.rearm();
        assert!(scheduler.is_scheduled());

        // Unused photo: the tick does not fetch.
        clock.advance_by(TimeDelta::minutes(5));
        tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
        assert_eq!(client.request_count(API_URL), 1);

        coordinator.mark_used("lake").await;
        serve_photo(&client, "river");
        clock.advance_by(TimeDelta::minutes(5));
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        coordinator.wait_idle().await;
        assert_eq!(client.request_count(API_URL), 2);
        let record = coordinator.current().await.unwrap();
        assert_eq!(record.photo().unwrap().id, "river");

        scheduler.cancel();
        assert!(!scheduler.is_scheduled());
    }
}
