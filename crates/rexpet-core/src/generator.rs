//! Image Generator Strategy
//!
//! Common interface for external image-generation backends (Gemini, a local
//! mock, ...). The worker only ever talks to this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Input for one generation call
#[derive(Clone, Debug)]
pub struct GenerationInput {
    /// Source image bytes
    pub image: Vec<u8>,

    /// MIME type of the source image
    pub mime_type: String,

    /// Fully rendered prompt
    pub prompt: String,
}

/// Image returned by a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Backend metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratorInfo {
    pub name: String,
    pub model: String,
}

/// Strategy trait for image-generation providers
///
/// Implementations must return `CoreError::Upstream` when the provider fails
/// or answers without an image part. They must not retry.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Transform the input image according to the prompt
    async fn generate(&self, input: &GenerationInput) -> Result<GeneratedImage>;

    /// Check whether the provider is reachable and configured
    async fn health_check(&self) -> Result<bool>;

    fn info(&self) -> GeneratorInfo;
}
