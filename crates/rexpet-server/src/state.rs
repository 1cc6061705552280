//! Application State

use std::sync::Arc;

use rexpet_core::{ImageGenerator, JobQueue, ObjectStorage, Store};
use rexpet_payments::{CheckoutService, WebhookHandler};
use rexpet_studio::{GenerationService, ProfileService};

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub storage: Arc<dyn ObjectStorage>,
    pub queue: Arc<dyn JobQueue>,
    pub generator: Arc<dyn ImageGenerator>,
    pub generations: Arc<GenerationService>,
    pub profiles: Arc<ProfileService>,

    /// `None` when Stripe is not configured
    pub checkout: Option<Arc<CheckoutService>>,
    pub webhooks: Option<Arc<WebhookHandler>>,

    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the request-side services over shared backends
    pub fn new(
        store: Arc<dyn Store>,
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn JobQueue>,
        generator: Arc<dyn ImageGenerator>,
        config: ServerConfig,
    ) -> Self {
        let generations = Arc::new(GenerationService::new(
            store.clone(),
            storage.clone(),
            queue.clone(),
        ));
        let profiles = Arc::new(ProfileService::new(store.clone()));

        Self {
            store,
            storage,
            queue,
            generator,
            generations,
            profiles,
            checkout: None,
            webhooks: None,
            config: Arc::new(config),
        }
    }

    /// Enable checkout and the payment webhook
    pub fn with_payments(mut self, checkout: CheckoutService, webhook_secret: &str) -> Self {
        self.checkout = Some(Arc::new(checkout));
        self.webhooks = Some(Arc::new(WebhookHandler::new(
            self.store.clone(),
            webhook_secret,
        )));
        self
    }
}
