mod error;
mod rest;
mod types;

pub use error::{ApiError, ApiResult};
pub use rest::RestApi;
pub use types::*;

use crate::coordinator::MeshCoordinator;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the REST API with permissive CORS for browser clients
pub fn create_api_server(coordinator: MeshCoordinator) -> Router {
    let rest_api = RestApi::new(coordinator);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(rest_api.router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
