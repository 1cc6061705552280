//! RexPet HTTP Server
//!
//! Axum surface over the credit ledger, checkout, webhook and portrait
//! generation services. The binary in `main.rs` wires backends and background
//! workers; this library exposes the router for embedding and tests.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use auth::{AuthUser, Claims, ClientIp, issue_token, validate_token};
pub use config::{ConfigError, ServerConfig};
pub use error::{AppError, AppResult, ErrorResponse};
pub use router::build_router;
pub use state::AppState;
