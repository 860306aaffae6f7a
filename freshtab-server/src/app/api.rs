use async_trait::async_trait;
use freshtab::handler::{PhotoResponse, RequestHandler, UpdatePreferencesError};
use freshtab::settings::UserPreferences;
use freshtab::storage::Storage;
use freshtab::util::clock::Clock;
use freshtab::util::http::HttpClient;
use poem_openapi::param::Query;
use poem_openapi::payload::{Json, PlainText};
use poem_openapi::{ApiResponse, OpenApi, OpenApiService};
use serde_json::{Value, json};
use std::sync::Arc;

/// What the API needs from the photo cache.
#[async_trait]
pub trait PhotoService: Send + Sync {
    async fn get_photo(&self) -> PhotoResponse;
    fn refresh_in_background(&self, force: bool);
    fn preferences(&self) -> Option<UserPreferences>;
    async fn update_preferences(
        &self,
        preferences: UserPreferences,
    ) -> Result<UserPreferences, UpdatePreferencesError>;
}

#[async_trait]
impl<S, H, C> PhotoService for RequestHandler<S, H, C>
where
    S: Storage + 'static,
    H: HttpClient + 'static,
    C: Clock + 'static,
{
    async fn get_photo(&self) -> PhotoResponse {
        RequestHandler::get_photo(self).await
    }

    fn refresh_in_background(&self, force: bool) {
        RequestHandler::refresh_in_background(self, force)
    }

    fn preferences(&self) -> Option<UserPreferences> {
        RequestHandler::preferences(self)
    }

    async fn update_preferences(
        &self,
        preferences: UserPreferences,
    ) -> Result<UserPreferences, UpdatePreferencesError> {
        RequestHandler::update_preferences(self, preferences).await
    }
}

pub struct Api {
    service: Arc<dyn PhotoService>,
}

pub fn create_openapi_service(service: Arc<dyn PhotoService>) -> OpenApiService<Api, ()> {
    OpenApiService::new(Api { service }, "freshtab server API", "1.0")
}

#[derive(ApiResponse)]
pub enum RefreshResponse {
    /// The refresh was started in the background.
    #[oai(status = 202)]
    Accepted,
}

#[derive(ApiResponse)]
pub enum GetPreferencesResponse {
    #[oai(status = 200)]
    Ok(Json<Value>),
    /// No preferences have been saved yet.
    #[oai(status = 404)]
    NotSet,
}

#[derive(ApiResponse)]
pub enum PutPreferencesResponse {
    /// The preferences as saved, after normalization.
    #[oai(status = 200)]
    Ok(Json<Value>),
    #[oai(status = 400)]
    Invalid(PlainText<String>),
    #[oai(status = 500)]
    Failed(PlainText<String>),
}

fn to_json(value: impl serde::Serialize) -> Value {
    serde_json::to_value(value).unwrap_or_else(|err| json!({ "error": err.to_string() }))
}

#[OpenApi]
impl Api {
    /// Health check endpoint
    #[oai(path = "/health", method = "get")]
    async fn health(&self) -> PlainText<String> {
        PlainText("OK".to_string())
    }

    /// Get the cached photo
    ///
    /// Always answers with status 200. The body is either the photo with its images or an object
    /// with a single `error` field. Serving a photo triggers the pre-fetch of the next one.
    #[oai(path = "/photo", method = "get", operation_id = "getUnsplashPhoto")]
    async fn get_photo(&self) -> Json<Value> {
        Json(to_json(self.service.get_photo().await))
    }

    /// Trigger a background refresh of the cached photo
    ///
    /// Without `force`, a new photo is only fetched if the cached one was used and is stale.
    #[oai(path = "/refresh", method = "post")]
    async fn refresh(&self, force: Query<Option<bool>>) -> RefreshResponse {
        self.service.refresh_in_background(force.0.unwrap_or(false));
        RefreshResponse::Accepted
    }

    /// Get the user preferences
    #[oai(path = "/preferences", method = "get")]
    async fn get_preferences(&self) -> GetPreferencesResponse {
        match self.service.preferences() {
            Some(preferences) => GetPreferencesResponse::Ok(Json(to_json(preferences))),
            None => GetPreferencesResponse::NotSet,
        }
    }

    /// Update the user preferences
    #[oai(path = "/preferences", method = "put")]
    async fn put_preferences(&self, body: Json<Value>) -> PutPreferencesResponse {
        let preferences: UserPreferences = match serde_json::from_value(body.0) {
            Ok(preferences) => preferences,
            Err(err) => return PutPreferencesResponse::Invalid(PlainText(err.to_string())),
        };
        match self.service.update_preferences(preferences).await {
            Ok(saved) => PutPreferencesResponse::Ok(Json(to_json(saved))),
            Err(UpdatePreferencesError::Invalid(err)) => {
                PutPreferencesResponse::Invalid(PlainText(err.to_string()))
            }
            Err(err) => {
                tracing::error!("{err}");
                PutPreferencesResponse::Failed(PlainText(err.to_string()))
            }
        }
    }
}
