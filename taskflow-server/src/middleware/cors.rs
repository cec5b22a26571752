use tower_http::cors::{Any, CorsLayer};

/// Permissive CORS for the JSON API; the surface carries no credentials.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any)
}
