use poem::Route;
use std::sync::Arc;

pub mod api;

pub use api::PhotoService;

pub fn create_route(service: Arc<dyn PhotoService>, enable_api_docs: bool) -> Route {
    let api_service = api::create_openapi_service(service).server("/api");
    let route = Route::new();
    let route = if enable_api_docs {
        route.nest("/docs", api_service.swagger_ui())
    } else {
        route
    };
    route.nest("/api", api_service)
}
