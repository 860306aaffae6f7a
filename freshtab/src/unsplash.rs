//! Client for the Unsplash "random photo" endpoint.

use crate::photo::Photo;
use crate::settings::PhotoSettings;
use crate::util::http::{HttpClient, HttpRequest, TransportError};
use std::fmt::{Display, Formatter};
use url::Url;

/// Reasons for not obtaining photo metadata.
///
/// The [Display] output is the message shown to the user.
#[derive(Debug)]
#[non_exhaustive]
pub enum ApiError {
    MissingApiKey,
    /// HTTP 401.
    InvalidApiKey,
    /// HTTP 403.
    RateLimitExceeded,
    /// Any other non-success status.
    Status(u16),
    Transport(TransportError),
    Decode(serde_json::Error),
    InvalidUrl(url::ParseError),
}

impl ApiError {
    /// Maps a non-success HTTP status to an error.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::InvalidApiKey,
            403 => Self::RateLimitExceeded,
            status => Self::Status(status),
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingApiKey => {
                write!(f, "API Key not set. Please set it in the preferences.")
            }
            Self::InvalidApiKey => write!(f, "Invalid Unsplash API Key."),
            Self::RateLimitExceeded => write!(f, "Unsplash API Rate Limit Exceeded."),
            Self::Status(status) => write!(f, "Failed to pre-fetch: {status}"),
            Self::Transport(err) => write!(f, "General error: {err}"),
            Self::Decode(err) => write!(f, "General error: invalid photo metadata: {err}"),
            Self::InvalidUrl(err) => write!(f, "General error: invalid API URL: {err}"),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            Self::Decode(err) => Some(err),
            Self::InvalidUrl(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value)
    }
}

impl From<url::ParseError> for ApiError {
    fn from(value: url::ParseError) -> Self {
        Self::InvalidUrl(value)
    }
}

/// URL of the random photo endpoint for the given settings.
pub fn random_photo_url(settings: &PhotoSettings) -> Result<Url, url::ParseError> {
    let mut base = settings.api_base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base.join("photos/random")?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("query", &settings.query)
            .append_pair("orientation", settings.orientation.as_str());
        if !settings.topics.is_empty() {
            query.append_pair("topics", &settings.topics.join(","));
        }
    }
    Ok(url)
}

/// Builds the authenticated request for a random photo.
pub fn random_photo_request(settings: &PhotoSettings) -> Result<HttpRequest, ApiError> {
    let api_key = settings
        .api_key
        .as_deref()
        .filter(|key| !key.is_empty())
        .ok_or(ApiError::MissingApiKey)?;
    Ok(HttpRequest::get(random_photo_url(settings)?)
        .header("Authorization", format!("Client-ID {api_key}"))
        .header("Accept-Version", "v1"))
}

/// Requests the metadata of a random photo.
///
/// This is a single attempt; failures are reported to the caller, which records them.
pub async fn fetch_random_photo<H: HttpClient + ?Sized>(
    client: &H,
    settings: &PhotoSettings,
) -> Result<Photo, ApiError> {
    let request = random_photo_request(settings)?;
    let response = client.get(request).await?;
    if !response.is_success() {
        tracing::error!(
            status = response.status,
            body = %response.text(),
            "Unsplash API error"
        );
        return Err(ApiError::from_status(response.status));
    }
    let photo: Photo = serde_json::from_slice(&response.body)?;
    tracing::debug!(photo_id = %photo.id, "received photo metadata");
    Ok(photo)
}
