//! # rexpet-payments
//!
//! Credit packages, checkout sessions and payment webhooks for RexPet.
//!
//! ## Purchase flow
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌─────────────┐
//! │  Dashboard  │────▶│  Stripe Hosted  │────▶│  Dashboard  │
//! │  (packages) │     │  Checkout Page  │     │  (success)  │
//! └─────────────┘     └─────────────────┘     └─────────────┘
//!                              │
//!                              ▼ checkout.session.completed
//!                     ┌─────────────────┐
//!                     │ WebhookHandler  │──▶ ledger: +credits (once)
//!                     └─────────────────┘
//! ```
//!
//! The checkout initiator persists nothing. The grant travels in session
//! metadata and is applied by the webhook, keyed on the session id so replays
//! are harmless.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rexpet_payments::{CheckoutService, StripeClient};
//!
//! let client = Arc::new(StripeClient::new("sk_test_xxx", "whsec_xxx"));
//! let checkout = CheckoutService::new(client);
//!
//! let redirect = checkout.start(user_id, "bundle", "https://rexpet.app").await?;
//! // Redirect user to: redirect.url
//! ```

mod checkout;
mod error;
mod package;
mod webhook;

pub use checkout::{
    CheckoutProvider, CheckoutRedirect, CheckoutService, HostedSession, SessionParams,
    StripeClient,
};
pub use error::{PaymentError, Result};
pub use package::{CURRENCY, Package, PackagePricing};
pub use webhook::{
    SIGNATURE_TOLERANCE_SECS, WebhookHandler, WebhookOutcome, signature_header, verify_signature,
};
