use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File, Map, Source};
use freshtab::retry::RetryPolicy;
use freshtab::settings::{ImageDelivery, Orientation, PhotoSettings};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use url::Url;

#[derive(Clone, Debug, serde::Deserialize, PartialEq, Eq)]
pub struct FreshtabServerConfig {
    pub bind_addrs: Vec<String>,
    pub enable_api_docs: bool,
    pub log_filter: String,

    pub storage: StorageConfig,
    pub unsplash: UnsplashConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
}

#[derive(Clone, Debug, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum StorageConfig {
    InMemory,
    Filesystem { path: String },
}

#[derive(Clone, Debug, serde::Deserialize, PartialEq, Eq)]
pub struct UnsplashConfig {
    pub api_key: String,
    pub api_base_url: String,
    pub query: String,
    pub orientation: Orientation,
    pub topics: Vec<String>,
    pub image_format: String,
    pub image_delivery: ImageDelivery,
    pub request_timeout: String,
}

#[derive(Clone, Debug, serde::Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    pub duration: String,
}

#[derive(Clone, Debug, serde::Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: String,
}

impl FreshtabServerConfig {
    pub fn load() -> Result<Self, LoadConfigError> {
        ConfigLoader::new().add_default_sources().load()
    }

    /// Photo settings described by this configuration.
    pub fn photo_settings(&self) -> Result<PhotoSettings, LoadConfigError> {
        let api_key = Some(self.unsplash.api_key.trim().to_string()).filter(|key| !key.is_empty());
        Ok(PhotoSettings {
            api_key,
            query: self.unsplash.query.clone(),
            orientation: self.unsplash.orientation,
            topics: self.unsplash.topics.clone(),
            cache_duration: parse_duration("cache.duration", &self.cache.duration)?,
            api_base_url: Url::parse(&self.unsplash.api_base_url).map_err(|err| {
                LoadConfigError::InvalidValue {
                    key: "unsplash.api_base_url",
                    message: err.to_string(),
                }
            })?,
            image_format: self.unsplash.image_format.clone(),
            image_delivery: self.unsplash.image_delivery,
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                base_delay: parse_duration("retry.base_delay", &self.retry.base_delay)?,
            },
        })
    }

    pub fn request_timeout(&self) -> Result<Duration, LoadConfigError> {
        parse_duration("unsplash.request_timeout", &self.unsplash.request_timeout)
    }
}

fn parse_duration(key: &'static str, value: &str) -> Result<Duration, LoadConfigError> {
    humantime::parse_duration(value).map_err(|err| LoadConfigError::InvalidValue {
        key,
        message: err.to_string(),
    })
}

#[derive(Debug)]
pub enum LoadConfigError {
    ConfigError(ConfigError),
    InvalidValue { key: &'static str, message: String },
}

impl Display for LoadConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadConfigError::ConfigError(err) => write!(f, "configuration error: {err}"),
            LoadConfigError::InvalidValue { key, message } => {
                write!(f, "configuration error: invalid value for {key}: {message}")
            }
        }
    }
}

impl From<ConfigError> for LoadConfigError {
    fn from(err: ConfigError) -> Self {
        LoadConfigError::ConfigError(err)
    }
}

impl std::error::Error for LoadConfigError {}

struct ConfigLoader(ConfigBuilder<DefaultState>);

impl ConfigLoader {
    pub fn new() -> Self {
        ConfigLoader(Config::builder())
    }

    pub fn add_default_sources(self) -> Self {
        self.add_file_source(
            File::with_name(
                &std::env::var("FRESHTAB_SERVER_CONFIG_FILE")
                    .map(Cow::Owned)
                    .unwrap_or(Cow::Borrowed("/etc/freshtab-server/config.toml")),
            )
            .required(false),
        )
        .add_environment_source(None)
    }

    pub fn add_file_source<T, F>(mut self, file: File<T, F>) -> Self
    where
        File<T, F>: Source + Send + Sync + 'static,
    {
        self.0 = self.0.add_source(file);
        self
    }

    pub fn add_environment_source(mut self, source: Option<Map<String, String>>) -> Self {
        self.0 = self.0.add_source(
            Environment::with_prefix("FRESHTAB")
                .separator("__")
                .prefix_separator("_")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("bind_addrs")
                .with_list_parse_key("unsplash.topics")
                .source(source),
        );
        self
    }

    pub fn load(self) -> Result<FreshtabServerConfig, LoadConfigError> {
        self.0
            .set_default("bind_addrs", vec!["0.0.0.0:8717".to_string()])?
            .set_default("enable_api_docs", true)?
            .set_default("log_filter", "info")?
            .set_default("storage.type", "InMemory")?
            .set_default("unsplash.api_key", "")?
            .set_default("unsplash.api_base_url", "https://api.unsplash.com/")?
            .set_default("unsplash.query", "nature")?
            .set_default("unsplash.orientation", "landscape")?
            .set_default("unsplash.topics", Vec::<String>::new())?
            .set_default("unsplash.image_format", "webp")?
            .set_default("unsplash.image_delivery", "remote")?
            .set_default("unsplash.request_timeout", "30s")?
            .set_default("cache.duration", "5min")?
            .set_default("retry.max_attempts", 10)?
            .set_default("retry.base_delay", "1s")?
            .build()?
            .try_deserialize()
            .map_err(LoadConfigError::from)
    }
}
