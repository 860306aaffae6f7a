use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use freshtab::coordinator::{FetchCoordinator, RefreshOutcome};
use freshtab::freshness::needs_refresh;
use freshtab::photo::ImageRef;
use freshtab::record::CachedPhotoRecord;
use freshtab::retry::RetryPolicy;
use freshtab::settings::{
    DEFAULT_API_BASE_URL, DEFAULT_IMAGE_FORMAT, DEFAULT_QUERY, ImageDelivery, Orientation,
    PhotoSettings, SettingsHandle,
};
use freshtab::storage::filesystem::FilesystemStorage;
use freshtab::store::{ImageBlobs, PhotoStore, PreferencesStore};
use freshtab::util::clock::SystemClock;
use freshtab::util::http::ReqwestClient;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use url::Url;

/// freshtab - a fresh stock photo for every new tab
///
/// Maintains a photo cache in a local directory: fetches a random photo from Unsplash ahead of
/// time so that it can be shown without waiting for the network.
///
/// The directory can be shared with a running freshtab-server, e.g. to pre-populate its cache or
/// inspect what it currently serves. Preferences saved by the server take precedence over the
/// options given here.
#[derive(Parser)]
#[command(version)]
struct CliOpts {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove leftovers of interrupted writes from the photo cache.
    Clean {
        #[command(flatten)]
        store_ref: StoreRef,

        /// Also delete the cached photo and its images.
        #[arg(long)]
        purge: bool,
    },

    /// Fetch a new photo into the cache if the cached one has been shown or is stale.
    Fetch {
        #[command(flatten)]
        store_ref: StoreRef,

        #[command(flatten)]
        fetch_opts: FetchOpts,

        /// Fetch a new photo even if the cached one is still fresh.
        #[arg(short, long)]
        force: bool,
    },

    /// Show the cached photo.
    ///
    /// Exits with status 2 if no photo is cached.
    Status {
        #[command(flatten)]
        store_ref: StoreRef,

        /// How long a photo may be reused, unless the stored preferences say otherwise.
        #[arg(long, default_value = "5m")]
        cache_duration: humantime::Duration,
    },
}

/// Reference to the directory holding the photo cache.
#[derive(Args)]
struct StoreRef {
    /// Path to the cache directory.
    #[arg(short, long)]
    store: String,
}

/// Options controlling which photo is fetched and how.
#[derive(Args)]
struct FetchOpts {
    /// Unsplash access key.
    #[arg(long, env = "FRESHTAB_UNSPLASH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Search terms the random photo should match.
    #[arg(long, default_value = DEFAULT_QUERY)]
    query: String,

    /// Orientation of the photo (landscape, portrait, or squarish).
    #[arg(long, default_value = "landscape")]
    orientation: Orientation,

    /// Unsplash topic IDs to pick the photo from.
    #[arg(long, value_delimiter = ',')]
    topics: Vec<String>,

    /// How long a photo may be reused before a new one is fetched.
    #[arg(long, default_value = "5m")]
    cache_duration: humantime::Duration,

    /// Whether to store image URLs (remote) or the image data itself (embedded).
    #[arg(long, default_value = "remote")]
    image_delivery: ImageDelivery,

    /// Image encoding requested from the image CDN.
    #[arg(long, default_value = DEFAULT_IMAGE_FORMAT)]
    image_format: String,

    /// Base URL of the Unsplash API.
    #[arg(long, default_value = DEFAULT_API_BASE_URL)]
    api_base_url: Url,

    /// Maximum number of attempts per image download.
    #[arg(long, default_value_t = RetryPolicy::default().max_attempts)]
    max_attempts: u32,

    /// Timeout of a single HTTP request.
    #[arg(long, default_value = "30s")]
    request_timeout: humantime::Duration,
}

impl StoreRef {
    fn to_storage(&self) -> Result<Arc<FilesystemStorage>, anyhow::Error> {
        let path = PathBuf::from(&self.store)
            .canonicalize()
            .and_then(|path| {
                if !path.is_dir() {
                    return Err(io::Error::new(
                        io::ErrorKind::NotADirectory,
                        "Not a directory",
                    ));
                }
                Ok(path)
            })
            .with_context(|| format!("Could not access photo cache: {}", &self.store))?;
        Ok(Arc::new(FilesystemStorage::new(path)))
    }
}

impl FetchOpts {
    fn to_settings(&self) -> PhotoSettings {
        PhotoSettings {
            api_key: self
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
            query: self.query.clone(),
            orientation: self.orientation,
            topics: self
                .topics
                .iter()
                .filter(|topic| !topic.is_empty())
                .cloned()
                .collect(),
            cache_duration: *self.cache_duration,
            api_base_url: self.api_base_url.clone(),
            image_format: self.image_format.clone(),
            image_delivery: self.image_delivery,
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                ..RetryPolicy::default()
            },
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // Only fails if a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<ExitCode, anyhow::Error> {
    let cli_opts = CliOpts::parse();
    init_logging();
    match cli_opts.command {
        Commands::Clean { store_ref, purge } => {
            let storage = store_ref.to_storage()?;
            storage
                .clean_leftover_tmp_files()
                .with_context(|| format!("Could not clean: {}", store_ref.store))?;
            if purge {
                purge_photo(storage).await?;
            }
        }
        Commands::Fetch {
            store_ref,
            fetch_opts,
            force,
        } => {
            let storage = store_ref.to_storage()?;
            let settings = SettingsHandle::new(fetch_opts.to_settings());
            if let Some(preferences) = PreferencesStore::new(Arc::clone(&storage))
                .load()
                .await
                .context("Could not read stored preferences")?
            {
                settings.apply_preferences(preferences);
            }
            let client = ReqwestClient::with_timeout(*fetch_opts.request_timeout)?;
            let coordinator = FetchCoordinator::new(storage, client, settings, SystemClock);
            coordinator.current_or_load().await;
            match coordinator.refresh(force).await {
                RefreshOutcome::Fetched => {
                    if let Some(record) = coordinator.current().await {
                        print_record(&record);
                    }
                }
                RefreshOutcome::UpToDate => println!("The cached photo is still fresh."),
                RefreshOutcome::AlreadyInFlight => println!("A fetch is already running."),
                RefreshOutcome::Failed(error) => {
                    eprintln!("{error}");
                    return Ok(ExitCode::FAILURE);
                }
                RefreshOutcome::PrimaryImageUnavailable => {
                    eprintln!("Could not download the photo's image, kept the cached photo.");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::Status {
            store_ref,
            cache_duration,
        } => {
            let storage = store_ref.to_storage()?;
            let settings = SettingsHandle::new(PhotoSettings {
                cache_duration: *cache_duration,
                ..PhotoSettings::default()
            });
            if let Some(preferences) = PreferencesStore::new(Arc::clone(&storage))
                .load()
                .await
                .context("Could not read stored preferences")?
            {
                settings.apply_preferences(preferences);
            }
            let Some(record) = PhotoStore::new(storage).load().await else {
                eprintln!("No photo cached.");
                return Ok(ExitCode::from(2));
            };
            print_record(&record);
            let stale = needs_refresh(
                Some(&record),
                settings.get().cache_duration,
                false,
                chrono::Utc::now(),
            );
            println!("Needs refresh: {}", yes_no(stale));
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn purge_photo(storage: Arc<FilesystemStorage>) -> Result<(), anyhow::Error> {
    let photos = PhotoStore::new(Arc::clone(&storage));
    let blob_keys = photos
        .load()
        .await
        .map(|record| {
            record
                .blob_keys()
                .into_iter()
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    ImageBlobs::new(storage)
        .delete_all(blob_keys)
        .await
        .context("Could not delete cached images")?;
    if photos.clear().await.context("Could not delete cached photo")? {
        println!("Deleted the cached photo.");
    }
    Ok(())
}

fn print_record(record: &CachedPhotoRecord) {
    let CachedPhotoRecord::Ready(cached) = record else {
        return;
    };
    println!("Photo: {}", cached.photo.id);
    if let Some(description) = cached
        .photo
        .description
        .as_ref()
        .or(cached.photo.alt_description.as_ref())
    {
        println!("Description: {description}");
    }
    println!("Photographer: {}", cached.photo.user.name);
    println!("Link: {}", cached.photo.links.html);
    match &cached.high_res {
        ImageRef::Remote { url, .. } => println!("Image: {url}"),
        ImageRef::Embedded { blob, mime_type } => println!("Image: {blob} ({mime_type})"),
    }
    println!("Cached at: {}", cached.cached_at.to_rfc3339());
    println!("Shown: {}", yes_no(cached.is_used));
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
