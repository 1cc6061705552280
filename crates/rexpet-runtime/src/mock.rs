//! Mock Image Generator
//!
//! Offline `ImageGenerator` for local development and tests. Behaviour is
//! fixed at construction so the worker's success, failure and timeout paths
//! can be driven deterministically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rexpet_core::{
    CoreError, GeneratedImage, GenerationInput, GeneratorInfo, ImageGenerator, Result,
};

/// What the mock does on every call
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Return the source bytes as a PNG result
    Echo,

    /// Fail with `CoreError::Upstream`
    Fail(String),

    /// Answer without an image part
    NoImage,

    /// Sleep, then echo
    Delay(Duration),
}

pub struct MockGenerator {
    behavior: MockBehavior,
    calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn echo() -> Self {
        Self::new(MockBehavior::Echo)
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(MockBehavior::Fail(message.into()))
    }

    /// Number of `generate` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn echo_image(input: &GenerationInput) -> GeneratedImage {
        GeneratedImage {
            bytes: input.image.clone(),
            mime_type: "image/png".into(),
        }
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::echo()
    }
}

#[async_trait]
impl ImageGenerator for MockGenerator {
    async fn generate(&self, input: &GenerationInput) -> Result<GeneratedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.behavior {
            MockBehavior::Echo => Ok(Self::echo_image(input)),
            MockBehavior::Fail(message) => Err(CoreError::Upstream(message.clone())),
            MockBehavior::NoImage => Err(CoreError::Upstream("No image in response".into())),
            MockBehavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Self::echo_image(input))
            }
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn info(&self) -> GeneratorInfo {
        GeneratorInfo {
            name: "Mock".into(),
            model: "echo".into(),
        }
    }
}
