//! The photo descriptor returned by the photo API and references to its image data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// Photo metadata as delivered by the Unsplash API.
///
/// Only the fields the cache and its callers rely on are typed; everything else is kept in
/// [Photo::extra] so the descriptor can be handed on without losing information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub urls: PhotoUrls,
    pub links: PhotoLinks,
    pub user: Photographer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exif: Option<Exif>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PhotoLocation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Image URLs at different resolutions, largest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoUrls {
    pub raw: Url,
    pub full: Url,
    pub regular: Url,
    pub small: Url,
    pub thumb: Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoLinks {
    /// The photo's page on Unsplash.
    pub html: Url,
    pub download: Url,
}

/// Attribution for the uploader of a photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photographer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub links: PhotographerLinks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<ProfileImage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotographerLinks {
    pub html: Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large: Option<Url>,
}

/// Camera settings, all optional since many uploads carry none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exif {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aperture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focal_length: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotoLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Photo {
    /// URL of the primary (high-resolution) image with the given format hint.
    pub fn high_res_url(&self, format: &str) -> Url {
        with_format_hint(&self.urls.full, format)
    }

    /// URL of the secondary (low-resolution) image with the given format hint.
    pub fn low_res_url(&self, format: &str) -> Url {
        with_format_hint(&self.urls.thumb, format)
    }
}

/// Appends the `fm` query parameter asking the image CDN for a specific encoding.
pub fn with_format_hint(url: &Url, format: &str) -> Url {
    let mut url = url.clone();
    if !format.is_empty() {
        url.query_pairs_mut().append_pair("fm", format);
    }
    url
}

/// Where the bytes of a cached image can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    /// The image is left to the caller to load from its URL (and its HTTP cache).
    Remote { url: Url, mime_type: String },
    /// The image bytes are kept in the storage under the `blob` key.
    Embedded { blob: String, mime_type: String },
}

impl ImageRef {
    pub fn mime_type(&self) -> &str {
        match self {
            Self::Remote { mime_type, .. } | Self::Embedded { mime_type, .. } => mime_type,
        }
    }
}
