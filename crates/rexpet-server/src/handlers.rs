//! HTTP Handlers

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, header},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rexpet_core::{CoreError, GeneratorInfo, GenerationView, SourceImage, Style};
use rexpet_payments::{PaymentError, WebhookOutcome};
use rexpet_studio::{
    CreditSummary, GenerationHistory, GenerationRequest, GenerationTicket, Profile, ProfileUpdate,
    active_styles,
};

use crate::auth::{AuthUser, ClientIp};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub generator: GeneratorInfo,
    pub generator_reachable: bool,
    pub payments_configured: bool,
    pub storage: String,
    pub queue_depth: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub package_id: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub file_name: Option<String>,
}

/// Zero-based paging for list endpoints
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: usize,
    pub page_size: Option<usize>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let generator_reachable = state.generator.health_check().await.unwrap_or(false);
    let queue_depth = state.queue.depth().await.ok();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        generator: state.generator.info(),
        generator_reachable,
        payments_configured: state.checkout.is_some(),
        storage: state.storage.name().to_string(),
        queue_depth,
    })
}

/// Open a hosted checkout session for a credit package
pub async fn create_checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<CheckoutResponse>> {
    let checkout = state.checkout.as_ref().ok_or(AppError::PaymentsDisabled)?;

    let redirect = checkout
        .start(user.user_id, &payload.package_id, &state.config.public_origin)
        .await?;

    Ok(Json(CheckoutResponse {
        url: redirect.url,
        session_id: redirect.session_id,
    }))
}

/// Stripe webhook endpoint
///
/// Every outcome of a verified delivery is acknowledged with 200 so Stripe
/// stops retrying; only store failures surface as 5xx.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Json<WebhookAck>> {
    let handler = state.webhooks.as_ref().ok_or(AppError::PaymentsDisabled)?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    match handler.handle(&body, signature).await {
        Ok(outcome) => {
            if let WebhookOutcome::Ignored { event_type } = &outcome {
                tracing::debug!(event_type = %event_type, "Webhook event ignored");
            }
            Ok(Json(WebhookAck { received: true }))
        }
        Err(
            e @ (PaymentError::WebhookSignature(_)
            | PaymentError::WebhookParse(_)
            | PaymentError::MissingMetadata(_)),
        ) => {
            tracing::warn!(error = %e, "Webhook rejected");
            Err(AppError::BadRequest(e.user_message()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Reserve a credit and queue a portrait
pub async fn request_generation(
    State(state): State<AppState>,
    user: AuthUser,
    ClientIp(ip): ClientIp,
    Json(payload): Json<GenerationRequest>,
) -> AppResult<Json<GenerationTicket>> {
    let ticket = state
        .generations
        .request_generation(user.user_id, payload, ip)
        .await?;

    Ok(Json(ticket))
}

pub async fn generation_status(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<StatusRequest>,
) -> AppResult<Json<GenerationView>> {
    let view = state.generations.status(user.user_id, payload.id).await?;
    Ok(Json(view))
}

/// Raw-body upload of an original pet photo
pub async fn upload_original(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<SourceImage>> {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .ok_or_else(|| CoreError::InvalidArgument("Missing content-type".into()))?;

    let file_name = query
        .file_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "upload".into());

    let image = state
        .generations
        .upload_original(user.user_id, &file_name, &mime_type, &body)
        .await?;

    Ok(Json(image))
}

/// Active styles, catalog order
pub async fn list_styles(State(state): State<AppState>) -> AppResult<Json<Vec<Style>>> {
    Ok(Json(active_styles(&state.store).await?))
}

pub async fn credits(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<CreditSummary>> {
    let summary = state
        .generations
        .credits(user.user_id, query.page, query.page_size)
        .await?;

    Ok(Json(summary))
}

/// Gallery: the caller's portraits, newest first
pub async fn list_generations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<GenerationHistory>> {
    let history = state
        .generations
        .history(user.user_id, query.page, query.page_size)
        .await?;

    Ok(Json(history))
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<Profile>> {
    Ok(Json(state.profiles.profile(user.user_id).await?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ProfileUpdate>,
) -> AppResult<Json<Profile>> {
    Ok(Json(state.profiles.update(user.user_id, payload).await?))
}
