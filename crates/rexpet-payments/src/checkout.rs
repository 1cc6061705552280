//! Stripe Checkout Integration
//!
//! Implements the "Stripe Checkout (Hosted)" approach: the user is redirected
//! to Stripe, and the credit grant travels in session metadata until the
//! webhook fires.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stripe::{
    CheckoutSession as StripeCheckoutSession, CheckoutSessionMode, Client,
    CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, Currency, RequestStrategy,
};
use uuid::Uuid;

use crate::error::{PaymentError, Result};
use crate::package::{Package, PackagePricing};

/// Parameters for one hosted payment session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    pub product_name: String,
    pub unit_amount: i64,
    pub success_url: String,
    pub cancel_url: String,

    /// The only channel through which the webhook learns what to grant
    pub metadata: HashMap<String, String>,

    pub idempotency_key: String,
}

/// A created hosted session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedSession {
    /// Stripe session ID
    pub id: String,

    /// URL to redirect user to
    pub url: String,
}

/// Payment provider strategy
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_session(&self, params: SessionParams) -> Result<HostedSession>;
}

/// Stripe client wrapper
pub struct StripeClient {
    client: Client,
    webhook_secret: String,
}

impl StripeClient {
    /// Create a new Stripe client
    pub fn new(secret_key: &str, webhook_secret: &str) -> Self {
        Self {
            client: Client::new(secret_key),
            webhook_secret: webhook_secret.to_string(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| PaymentError::Config("STRIPE_SECRET_KEY not set".into()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| PaymentError::Config("STRIPE_WEBHOOK_SECRET not set".into()))?;

        Ok(Self::new(&secret_key, &webhook_secret))
    }

    /// Get the webhook secret
    pub fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }
}

#[async_trait]
impl CheckoutProvider for StripeClient {
    async fn create_session(&self, params: SessionParams) -> Result<HostedSession> {
        let mut create = CreateCheckoutSession::new();
        create.success_url = Some(&params.success_url);
        create.cancel_url = Some(&params.cancel_url);
        create.mode = Some(CheckoutSessionMode::Payment);
        create.metadata = Some(params.metadata.clone());
        create.line_items = Some(vec![CreateCheckoutSessionLineItems {
            quantity: Some(1),
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: Currency::EUR,
                unit_amount: Some(params.unit_amount),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: params.product_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        let client = self
            .client
            .clone()
            .with_strategy(RequestStrategy::Idempotent(params.idempotency_key.clone()));

        let session = StripeCheckoutSession::create(&client, create)
            .await
            .map_err(|e| PaymentError::Stripe(e.to_string()))?;

        let url = session
            .url
            .ok_or_else(|| PaymentError::Stripe("No checkout URL returned".into()))?;

        Ok(HostedSession {
            id: session.id.to_string(),
            url,
        })
    }
}

/// Redirect returned to the caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRedirect {
    pub url: String,
    pub session_id: String,
    pub package: Package,
}

/// Checkout session initiator
pub struct CheckoutService {
    provider: Arc<dyn CheckoutProvider>,
}

impl CheckoutService {
    pub fn new(provider: Arc<dyn CheckoutProvider>) -> Self {
        Self { provider }
    }

    /// Validate the package, then open one hosted session for it.
    ///
    /// Nothing is persisted locally; credits are granted by the webhook.
    pub async fn start(
        &self,
        user_id: Uuid,
        package_id: &str,
        origin: &str,
    ) -> Result<CheckoutRedirect> {
        let package: Package = package_id.parse()?;
        let params = session_params(user_id, package, origin, chrono::Utc::now().timestamp_millis());

        let session = self.provider.create_session(params).await.map_err(|e| {
            tracing::error!(user_id = %user_id, package = %package, error = %e, "Checkout session failed");
            e
        })?;

        tracing::info!(
            user_id = %user_id,
            package = %package,
            session_id = %session.id,
            "Checkout session created"
        );

        Ok(CheckoutRedirect {
            url: session.url,
            session_id: session.id,
            package,
        })
    }
}

fn session_params(user_id: Uuid, package: Package, origin: &str, now_millis: i64) -> SessionParams {
    let PackagePricing {
        id, name, credits, cents,
    } = package.pricing();
    let origin = origin.trim_end_matches('/');

    let mut metadata = HashMap::new();
    metadata.insert("user_id".to_string(), user_id.to_string());
    metadata.insert("package_id".to_string(), id.to_string());
    metadata.insert("credits".to_string(), credits.to_string());

    SessionParams {
        product_name: name.to_string(),
        unit_amount: cents,
        success_url: format!("{origin}/dashboard?payment=success"),
        cancel_url: format!("{origin}/dashboard?payment=cancelled"),
        metadata,
        idempotency_key: format!("{user_id}-{id}-{now_millis}"),
    }
}
