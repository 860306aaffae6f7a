//! `freshtab` keeps a fresh stock photo ready for every new tab.
//!
//! Photos come from the Unsplash API. Instead of fetching a photo when it is needed, `freshtab`
//! pre-fetches the next photo right after the current one was served, so that a photo is
//! available immediately when the next tab opens.
//!
//! The main concepts are:
//!
//! - **Storage**: A [storage] is a place where values are stored, for example the local
//!   filesystem. The cached photo record survives restarts this way.
//! - **Record**: The single [record::CachedPhotoRecord] holds the photo ready to be served (or
//!   the error of the last fetch).
//! - **Coordinator**: The [coordinator::FetchCoordinator] decides with the [freshness] policy
//!   whether a new photo is needed and makes sure only one fetch runs at a time.
//! - **Handler**: The [handler::RequestHandler] serves the cached photo, marks it as used and
//!   triggers the pre-fetch of the next one. It also owns the [scheduler] that refreshes the
//!   photo periodically.
//!
//! The [handler] module is the high-level interface to the `freshtab` library.

pub mod coordinator;
pub mod error;
pub mod freshness;
pub mod handler;
pub mod photo;
pub mod record;
pub mod retry;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod store;
pub mod unsplash;

pub mod util {
    //! Collects traits, functions, etc. that are not directly related to the main concepts of
    //! `freshtab`.

    pub mod alarms;
    pub mod clock;
    pub mod close;
    pub mod http;
}
pub mod test_util {
    //! Utilities for testing `freshtab` code.
    //!
    //! These are not intended to be used in production code.

    pub mod clock;
    pub mod http;
}
