//! Route table and middleware stack

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use rexpet_studio::service::MAX_UPLOAD_BYTES;

use crate::handlers::{
    create_checkout, credits, generation_status, get_profile, health_check, list_generations,
    list_styles, request_generation, stripe_webhook, update_profile, upload_original,
};
use crate::state::AppState;

/// Build the application router over shared state
pub fn build_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & catalog
        .route("/health", get(health_check))
        .route("/api/styles", get(list_styles))

        // Credits & payments
        .route("/api/credits", get(credits))
        .route("/api/checkout", post(create_checkout))
        .route("/webhook/stripe", post(stripe_webhook))

        // Portraits
        .route(
            "/api/originals",
            // Headroom over the image cap so oversize uploads get a JSON 400
            post(upload_original).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024)),
        )
        .route(
            "/api/generations",
            get(list_generations).post(request_generation),
        )
        .route("/api/generations/status", post(generation_status))

        // Account
        .route("/api/profile", get(get_profile).put(update_profile))

        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
