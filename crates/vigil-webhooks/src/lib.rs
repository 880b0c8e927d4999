//! vigil-webhooks: outbound webhook delivery.
//!
//! Turns service status transitions into signed HTTP `POST`s against every
//! matching subscription.
//!
//! # Architecture
//!
//! ```text
//! TransitionEvent (mpsc)
//!   → EventDispatcher       one ordered queue per service slug
//!     → DeliveryEngine::trigger_event
//!       → SubscriptionStore::list_active_subscriptions
//!       → deliver_webhook × N (concurrent)
//!         → retry(RetryPolicy, Sleeper)   sequential attempts, capped backoff
//!         → SubscriptionStore::record_delivery_{success,failure}
//! ```
//!
//! Each delivery body is signed with HMAC-SHA256 of the exact bytes sent;
//! receivers verify it with [`verify_signature`].

pub mod delivery;
pub mod dispatch;
pub mod error;
pub mod retry;
pub mod signature;
pub mod stats;

pub use delivery::{
    DeliveryConfig, DeliveryEngine, DeliveryOptions, DeliveryResult, PayloadService,
    WebhookPayload,
};
pub use dispatch::EventDispatcher;
pub use error::{DeliveryError, WebhookError};
pub use retry::{RetryOutcome, RetryPolicy, Sleeper, retry, tokio_sleeper};
pub use signature::{generate_signature, verify_signature};
pub use stats::{DeliveryStats, DeliveryStatsSnapshot};
