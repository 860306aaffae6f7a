//! Settings controlling which photos are fetched and how long they are kept.
//!
//! [PhotoSettings] are assembled by the embedding application (from its configuration file or
//! command line). [UserPreferences] are the few values a user may change at runtime; they are
//! overlaid on top of the configured settings by a [SettingsHandle].

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(5 * 60);
pub const MIN_CACHE_DURATION: Duration = Duration::from_secs(60);
pub const MAX_CACHE_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_QUERY: &str = "nature";
pub const DEFAULT_API_BASE_URL: &str = "https://api.unsplash.com/";
pub const DEFAULT_IMAGE_FORMAT: &str = "webp";

/// Topics selected when a user saves preferences without choosing any
/// (Nature, Travel, Wallpapers).
pub const DEFAULT_TOPICS: [&str; 3] = ["6sMVjTLSkeQ", "Fzo3zuOHN6w", "bo8jQKTaE0Y"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Landscape,
    Portrait,
    Squarish,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "landscape",
            Self::Portrait => "portrait",
            Self::Squarish => "squarish",
        }
    }
}

impl Display for Orientation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "landscape" => Ok(Self::Landscape),
            "portrait" => Ok(Self::Portrait),
            "squarish" => Ok(Self::Squarish),
            _ => Err(format!(
                "unknown orientation '{s}', expected landscape, portrait or squarish"
            )),
        }
    }
}

/// How the bytes of cached images reach the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDelivery {
    /// Only image URLs are handed out; the caller loads them itself.
    #[default]
    Remote,
    /// Image bytes are kept in the storage and handed out inline.
    Embedded,
}

impl FromStr for ImageDelivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote" => Ok(Self::Remote),
            "embedded" => Ok(Self::Embedded),
            _ => Err(format!(
                "unknown image delivery '{s}', expected remote or embedded"
            )),
        }
    }
}

/// Everything the fetch coordinator needs to know to fetch a photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoSettings {
    /// Unsplash access key. Without it, fetching fails with a configuration error.
    pub api_key: Option<String>,
    pub query: String,
    pub orientation: Orientation,
    /// Topic IDs restricting the random photo. Empty means no restriction.
    pub topics: Vec<String>,
    /// How long a delivered photo may be reused before a new one is fetched.
    pub cache_duration: Duration,
    pub api_base_url: Url,
    /// Value of the `fm` hint appended to image URLs.
    pub image_format: String,
    pub image_delivery: ImageDelivery,
    pub retry: RetryPolicy,
}

impl Default for PhotoSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            query: DEFAULT_QUERY.to_string(),
            orientation: Orientation::default(),
            topics: Vec::new(),
            cache_duration: DEFAULT_CACHE_DURATION,
            api_base_url: Url::parse(DEFAULT_API_BASE_URL)
                .expect("default API base URL must be valid"),
            image_format: DEFAULT_IMAGE_FORMAT.to_string(),
            image_delivery: ImageDelivery::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PhotoSettings {
    /// Returns these settings with the given user preferences applied on top.
    pub fn with_preferences(&self, preferences: &UserPreferences) -> Self {
        let mut settings = self.clone();
        if !preferences.api_key.trim().is_empty() {
            settings.api_key = Some(preferences.api_key.trim().to_string());
        }
        settings.cache_duration = normalize_cache_duration(Duration::from_secs(
            preferences.cache_duration_minutes.saturating_mul(60),
        ));
        if !preferences.topics.is_empty() {
            settings.topics = preferences.topics.clone();
        }
        if let Some(query) = &preferences.query {
            settings.query = query.clone();
        }
        if let Some(orientation) = preferences.orientation {
            settings.orientation = orientation;
        }
        settings
    }

    /// MIME type assumed for images served without a `Content-Type`.
    pub fn default_mime_type(&self) -> String {
        format!("image/{}", self.image_format)
    }
}

/// Durations below [MIN_CACHE_DURATION] fall back to [DEFAULT_CACHE_DURATION], those above
/// [MAX_CACHE_DURATION] are capped.
pub fn normalize_cache_duration(duration: Duration) -> Duration {
    if duration < MIN_CACHE_DURATION {
        DEFAULT_CACHE_DURATION
    } else {
        duration.min(MAX_CACHE_DURATION)
    }
}

fn max_cache_duration_minutes() -> u64 {
    MAX_CACHE_DURATION.as_secs() / 60
}

/// Preferences a user may change at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_cache_duration_minutes")]
    pub cache_duration_minutes: u64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
}

fn default_cache_duration_minutes() -> u64 {
    DEFAULT_CACHE_DURATION.as_secs() / 60
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            cache_duration_minutes: default_cache_duration_minutes(),
            topics: DEFAULT_TOPICS.iter().map(|topic| topic.to_string()).collect(),
            query: None,
            orientation: None,
        }
    }
}

impl UserPreferences {
    /// Checks and normalizes the preferences before they are saved.
    ///
    /// The API key is required. An invalid cache duration falls back to the default, an empty
    /// topic selection to [DEFAULT_TOPICS].
    pub fn validate(mut self) -> Result<Self, PreferencesError> {
        self.api_key = self.api_key.trim().to_string();
        if self.api_key.is_empty() {
            return Err(PreferencesError::MissingApiKey);
        }
        if self.cache_duration_minutes < 1 {
            tracing::warn!(
                minutes = self.cache_duration_minutes,
                "invalid cache duration, defaulting to 5 minutes"
            );
            self.cache_duration_minutes = default_cache_duration_minutes();
        }
        if self.cache_duration_minutes > max_cache_duration_minutes() {
            return Err(PreferencesError::CacheDurationTooLong {
                max_minutes: max_cache_duration_minutes(),
            });
        }
        self.topics = self
            .topics
            .into_iter()
            .map(|topic| topic.trim().to_string())
            .filter(|topic| !topic.is_empty())
            .collect();
        if self.topics.is_empty() {
            self.topics = DEFAULT_TOPICS.iter().map(|topic| topic.to_string()).collect();
        }
        if let Some(query) = &self.query
            && query.trim().is_empty()
        {
            self.query = None;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PreferencesError {
    MissingApiKey,
    CacheDurationTooLong { max_minutes: u64 },
}

impl Display for PreferencesError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingApiKey => write!(f, "Unsplash API Key is required!"),
            Self::CacheDurationTooLong { max_minutes } => {
                write!(f, "Cache duration must not exceed {max_minutes} minutes.")
            }
        }
    }
}

impl std::error::Error for PreferencesError {}

/// Shared, updatable view of the effective settings.
///
/// Clones share the same state. Applying new preferences always starts from the configured base
/// settings, so preferences never accumulate.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    state: Arc<RwLock<SettingsState>>,
}

#[derive(Debug)]
struct SettingsState {
    base: PhotoSettings,
    preferences: Option<UserPreferences>,
    effective: PhotoSettings,
}

impl SettingsHandle {
    pub fn new(mut base: PhotoSettings) -> Self {
        base.cache_duration = normalize_cache_duration(base.cache_duration);
        Self {
            state: Arc::new(RwLock::new(SettingsState {
                effective: base.clone(),
                base,
                preferences: None,
            })),
        }
    }

    /// A snapshot of the effective settings.
    pub fn get(&self) -> PhotoSettings {
        self.state.read().unwrap().effective.clone()
    }

    pub fn preferences(&self) -> Option<UserPreferences> {
        self.state.read().unwrap().preferences.clone()
    }

    pub fn apply_preferences(&self, preferences: UserPreferences) {
        let mut state = self.state.write().unwrap();
        state.effective = state.base.with_preferences(&preferences);
        state.preferences = Some(preferences);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preferences() -> UserPreferences {
        UserPreferences {
            api_key: " secret ".to_string(),
            cache_duration_minutes: 10,
            topics: vec!["6sMVjTLSkeQ".to_string()],
            query: Some("mountains".to_string()),
            orientation: Some(Orientation::Portrait),
        }
    }

    #[test]
    fn test_defaults() {
        let settings = PhotoSettings::default();
        assert_eq!(settings.api_key, None);
        assert_eq!(settings.query, "nature");
        assert_eq!(settings.orientation, Orientation::Landscape);
        assert_eq!(settings.cache_duration, Duration::from_secs(300));
        assert_eq!(settings.api_base_url.as_str(), "https://api.unsplash.com/");
        assert_eq!(settings.default_mime_type(), "image/webp");
        assert_eq!(settings.retry, RetryPolicy::default());
    }

    #[test]
    fn test_preferences_override_settings() {
        let settings = PhotoSettings::default().with_preferences(&preferences());
        assert_eq!(settings.api_key.as_deref(), Some("secret"));
        assert_eq!(settings.cache_duration, Duration::from_secs(600));
        assert_eq!(settings.topics, vec!["6sMVjTLSkeQ".to_string()]);
        assert_eq!(settings.query, "mountains");
        assert_eq!(settings.orientation, Orientation::Portrait);
    }

    #[test]
    fn test_empty_preferences_keep_configured_values() {
        let base = PhotoSettings {
            api_key: Some("configured".to_string()),
            topics: vec!["bo8jQKTaE0Y".to_string()],
            ..PhotoSettings::default()
        };
        let preferences = UserPreferences {
            api_key: String::new(),
            cache_duration_minutes: 0,
            topics: Vec::new(),
            query: None,
            orientation: None,
        };
        let settings = base.with_preferences(&preferences);
        assert_eq!(settings.api_key.as_deref(), Some("configured"));
        assert_eq!(settings.topics, vec!["bo8jQKTaE0Y".to_string()]);
        assert_eq!(settings.cache_duration, DEFAULT_CACHE_DURATION);
    }

    #[test]
    fn test_validation_requires_api_key() {
        let preferences = UserPreferences {
            api_key: "   ".to_string(),
            ..preferences()
        };
        assert_eq!(
            preferences.validate(),
            Err(PreferencesError::MissingApiKey)
        );
    }

    #[test]
    fn test_validation_normalizes_values() {
        let preferences = UserPreferences {
            cache_duration_minutes: 0,
            topics: vec![" ".to_string()],
            query: Some(String::new()),
            ..preferences()
        }
        .validate()
        .unwrap();
        assert_eq!(preferences.api_key, "secret");
        assert_eq!(preferences.cache_duration_minutes, 5);
        assert_eq!(preferences.topics.len(), DEFAULT_TOPICS.len());
        assert_eq!(preferences.query, None);
    }

    #[test]
    fn test_validation_rejects_overlong_cache_duration() {
        let week = UserPreferences {
            cache_duration_minutes: 7 * 24 * 60,
            ..preferences()
        };
        assert_eq!(week.validate().unwrap().cache_duration_minutes, 10_080);

        for minutes in [7 * 24 * 60 + 1, u64::MAX / 60, u64::MAX] {
            let preferences = UserPreferences {
                cache_duration_minutes: minutes,
                ..preferences()
            };
            assert_eq!(
                preferences.validate(),
                Err(PreferencesError::CacheDurationTooLong { max_minutes: 10_080 })
            );
        }
    }

    #[test]
    fn test_huge_cache_duration_is_capped_when_applied() {
        let handle = SettingsHandle::new(PhotoSettings::default());
        handle.apply_preferences(UserPreferences {
            cache_duration_minutes: u64::MAX,
            ..preferences()
        });
        assert_eq!(handle.get().cache_duration, MAX_CACHE_DURATION);
        assert_eq!(
            normalize_cache_duration(Duration::MAX),
            MAX_CACHE_DURATION
        );
    }

    #[test]
    fn test_preferences_deserialize_with_defaults() {
        let preferences: UserPreferences =
            serde_json::from_str(r#"{"api_key": "k", "orientation": "squarish"}"#).unwrap();
        assert_eq!(preferences.cache_duration_minutes, 5);
        assert!(preferences.topics.is_empty());
        assert_eq!(preferences.orientation, Some(Orientation::Squarish));
    }

    #[test]
    fn test_handle_applies_preferences_to_base() {
        let handle = SettingsHandle::new(PhotoSettings {
            cache_duration: Duration::from_secs(1),
            ..PhotoSettings::default()
        });
        assert_eq!(handle.get().cache_duration, DEFAULT_CACHE_DURATION);

        handle.apply_preferences(preferences());
        assert_eq!(handle.get().query, "mountains");

        handle.apply_preferences(UserPreferences {
            query: None,
            ..preferences()
        });
        assert_eq!(handle.get().query, "nature");
        assert_eq!(handle.preferences().unwrap().query, None);
    }

    #[test]
    fn test_handle_clones_share_state() {
        let handle = SettingsHandle::new(PhotoSettings::default());
        let clone = handle.clone();
        clone.apply_preferences(preferences());
        assert_eq!(handle.get().api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_parse_orientation() {
        assert_eq!("portrait".parse(), Ok(Orientation::Portrait));
        assert!("diagonal".parse::<Orientation>().is_err());
        assert_eq!("embedded".parse(), Ok(ImageDelivery::Embedded));
    }
}
