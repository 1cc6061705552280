//! # rexpet-runtime
//!
//! Image generation providers for RexPet.
//!
//! ## Providers
//!
//! - **Gemini**: `generateContent` with an inline source image
//! - **Mock**: offline echo generator, used when no API key is configured
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rexpet_runtime::{GeminiConfig, GeminiGenerator, MockGenerator};
//!
//! let generator: Arc<dyn ImageGenerator> = match GeminiConfig::from_env() {
//!     Some(config) => Arc::new(GeminiGenerator::from_config(config)?),
//!     None => Arc::new(MockGenerator::echo()),
//! };
//! ```

pub mod gemini;
pub mod mock;

pub use gemini::{GeminiConfig, GeminiGenerator};
pub use mock::{MockBehavior, MockGenerator};

// Re-export core types for convenience
pub use rexpet_core::{CoreError, GeneratedImage, GenerationInput, ImageGenerator, Result};
