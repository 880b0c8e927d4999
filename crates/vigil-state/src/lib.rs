//! vigil-state: service and webhook subscription records for Vigil.
//!
//! The health poller and the webhook delivery engine never own storage
//! logic. They talk to storage through two narrow traits:
//!
//! - [`ServiceStore`]: read all services, look one up by slug, and write
//!   back `{status, last_health_check, updated_at}` for a single row.
//! - [`SubscriptionStore`]: read the active subscriptions of a service and
//!   record the outcome of a delivery sequence on a single row.
//!
//! [`StateStore`] implements both on top of [redb](https://docs.rs/redb),
//! with an in-memory backend for tests. Rows are JSON-serialized and
//! validated on write, so malformed URLs or empty secrets never reach the
//! poller or the delivery engine.

pub mod error;
pub mod store;
pub mod tables;
pub mod traits;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use traits::{ServiceStore, SubscriptionStore};
pub use types::*;
