//! redb table definitions for the Vigil state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Service records keyed by `{id}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Unique slug index: `{slug}` → `{service_id}`.
pub const SERVICE_SLUGS: TableDefinition<&str, &str> = TableDefinition::new("service_slugs");

/// Webhook subscriptions keyed by `{id}`.
pub const SUBSCRIPTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("subscriptions");
