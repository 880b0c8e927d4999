//! StateStore: redb-backed persistence for services and subscriptions.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. Every
//! row is validated before it is written; rows that fail to decode or
//! validate on the way out are skipped with a warning by the list
//! operations. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::traits::{ServiceStore, SubscriptionStore};
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(SERVICE_SLUGS).map_err(map_err!(Table))?;
        txn.open_table(SUBSCRIPTIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or update a service. Fails if the slug belongs to another service.
    pub fn put_service(&self, svc: &ServiceRecord) -> StateResult<()> {
        svc.validate()?;
        let value = serde_json::to_vec(svc).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut services = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            let mut slugs = txn.open_table(SERVICE_SLUGS).map_err(map_err!(Table))?;

            let owner = slugs
                .get(svc.slug.as_str())
                .map_err(map_err!(Read))?
                .map(|g| g.value().to_string());
            if let Some(owner) = owner {
                if owner != svc.id {
                    return Err(StateError::Invalid(format!(
                        "slug {} already belongs to service {owner}",
                        svc.slug
                    )));
                }
            }

            // Drop the old index entry if the slug is being renamed.
            let previous = services
                .get(svc.id.as_str())
                .map_err(map_err!(Read))?
                .map(|g| g.value().to_vec());
            if let Some(previous) = previous {
                let prev: ServiceRecord =
                    serde_json::from_slice(&previous).map_err(map_err!(Deserialize))?;
                if prev.slug != svc.slug {
                    slugs.remove(prev.slug.as_str()).map_err(map_err!(Write))?;
                }
            }

            services
                .insert(svc.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            slugs
                .insert(svc.slug.as_str(), svc.id.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %svc.id, slug = %svc.slug, "service stored");
        Ok(())
    }

    /// Get a service by id.
    pub fn get_service(&self, id: &str) -> StateResult<Option<ServiceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let svc: ServiceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(svc))
            }
            None => Ok(None),
        }
    }

    /// Delete a service by id. Returns true if it existed.
    pub fn delete_service(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut services = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            let mut slugs = txn.open_table(SERVICE_SLUGS).map_err(map_err!(Table))?;
            let removed = services
                .remove(id)
                .map_err(map_err!(Write))?
                .map(|g| g.value().to_vec());
            existed = removed.is_some();
            if let Some(bytes) = removed {
                match serde_json::from_slice::<ServiceRecord>(&bytes) {
                    Ok(svc) => {
                        slugs.remove(svc.slug.as_str()).map_err(map_err!(Write))?;
                    }
                    Err(e) => {
                        // Undecodable row: find its index entries by owner instead.
                        warn!(%id, error = %e, "deleting malformed service row");
                        let stale: Vec<String> = slugs
                            .iter()
                            .map_err(map_err!(Read))?
                            .filter_map(Result::ok)
                            .filter(|(_, owner)| owner.value() == id)
                            .map(|(slug, _)| slug.value().to_string())
                            .collect();
                        for slug in stale {
                            slugs.remove(slug.as_str()).map_err(map_err!(Write))?;
                        }
                    }
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed, "service deleted");
        Ok(existed)
    }

    // ── Subscriptions ──────────────────────────────────────────────

    /// Insert or update a webhook subscription.
    pub fn put_subscription(&self, sub: &WebhookSubscription) -> StateResult<()> {
        sub.validate()?;
        let value = serde_json::to_vec(sub).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SUBSCRIPTIONS).map_err(map_err!(Table))?;
            table
                .insert(sub.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %sub.id, service_id = %sub.service_id, "subscription stored");
        Ok(())
    }

    /// Get a subscription by id.
    pub fn get_subscription(&self, id: &str) -> StateResult<Option<WebhookSubscription>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SUBSCRIPTIONS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let sub: WebhookSubscription =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(sub))
            }
            None => Ok(None),
        }
    }

    /// All subscriptions for a service, active or not.
    pub fn list_subscriptions_for_service(
        &self,
        service_id: &str,
    ) -> StateResult<Vec<WebhookSubscription>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SUBSCRIPTIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let sub = match decode_valid::<WebhookSubscription>(value.value(), |s| s.validate()) {
                Ok(sub) => sub,
                Err(e) => {
                    warn!(id = %key.value(), error = %e, "skipping malformed subscription row");
                    continue;
                }
            };
            if sub.service_id == service_id {
                results.push(sub);
            }
        }
        Ok(results)
    }

    /// Delete a subscription by id. Returns true if it existed.
    pub fn delete_subscription(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(SUBSCRIPTIONS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%id, existed, "subscription deleted");
        Ok(existed)
    }

    /// Read, mutate, and write back one subscription inside a single write
    /// transaction. redb serializes write transactions, so concurrent
    /// callers never lose an update.
    fn update_subscription<F>(&self, id: &str, mutate: F) -> StateResult<WebhookSubscription>
    where
        F: FnOnce(&mut WebhookSubscription),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(SUBSCRIPTIONS).map_err(map_err!(Table))?;
            let current = table
                .get(id)
                .map_err(map_err!(Read))?
                .map(|g| g.value().to_vec());
            let Some(current) = current else {
                return Err(StateError::NotFound(format!("subscription {id}")));
            };
            let mut sub: WebhookSubscription =
                serde_json::from_slice(&current).map_err(map_err!(Deserialize))?;
            mutate(&mut sub);
            let value = serde_json::to_vec(&sub).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
            updated = sub;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }
}

impl ServiceStore for StateStore {
    fn list_services(&self) -> StateResult<Vec<ServiceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            match decode_valid::<ServiceRecord>(value.value(), |s| s.validate()) {
                Ok(svc) => results.push(svc),
                Err(e) => {
                    warn!(id = %key.value(), error = %e, "skipping malformed service row");
                }
            }
        }
        Ok(results)
    }

    fn get_service_by_slug(&self, slug: &str) -> StateResult<Option<ServiceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let slugs = txn.open_table(SERVICE_SLUGS).map_err(map_err!(Table))?;
        let id = match slugs.get(slug).map_err(map_err!(Read))? {
            Some(guard) => guard.value().to_string(),
            None => return Ok(None),
        };
        let services = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        match services.get(id.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let svc = decode_valid::<ServiceRecord>(guard.value(), |s| s.validate())?;
                Ok(Some(svc))
            }
            None => Ok(None),
        }
    }

    fn update_service_health(
        &self,
        id: &str,
        status: ServiceStatus,
        checked_at: DateTime<Utc>,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            let current = table
                .get(id)
                .map_err(map_err!(Read))?
                .map(|g| g.value().to_vec());
            let Some(current) = current else {
                return Err(StateError::NotFound(format!("service {id}")));
            };
            let mut svc: ServiceRecord =
                serde_json::from_slice(&current).map_err(map_err!(Deserialize))?;
            svc.status = status;
            svc.last_health_check = Some(checked_at);
            svc.updated_at = Some(Utc::now());
            let value = serde_json::to_vec(&svc).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl SubscriptionStore for StateStore {
    fn list_active_subscriptions(&self, service_id: &str) -> StateResult<Vec<WebhookSubscription>> {
        let mut subs = self.list_subscriptions_for_service(service_id)?;
        subs.retain(|s| s.is_active);
        Ok(subs)
    }

    fn record_delivery_success(&self, id: &str, at: DateTime<Utc>) -> StateResult<()> {
        self.update_subscription(id, |sub| {
            sub.last_delivery = Some(at);
            sub.last_delivery_status = Some(DeliveryStatus::Success);
            sub.failure_count = 0;
            sub.updated_at = Some(Utc::now());
        })?;
        Ok(())
    }

    fn record_delivery_failure(&self, id: &str, at: DateTime<Utc>) -> StateResult<u32> {
        let sub = self.update_subscription(id, |sub| {
            sub.last_delivery = Some(at);
            sub.last_delivery_status = Some(DeliveryStatus::Failed);
            sub.failure_count = sub.failure_count.saturating_add(1);
            sub.updated_at = Some(Utc::now());
        })?;
        Ok(sub.failure_count)
    }

    fn deactivate_subscription(&self, id: &str) -> StateResult<()> {
        self.update_subscription(id, |sub| {
            sub.is_active = false;
            sub.updated_at = Some(Utc::now());
        })?;
        Ok(())
    }
}

/// Decode a JSON row and run its boundary validation.
fn decode_valid<T>(bytes: &[u8], validate: impl FnOnce(&T) -> StateResult<()>) -> StateResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let value: T = serde_json::from_slice(bytes).map_err(map_err!(Deserialize))?;
    validate(&value)?;
    Ok(value)
}
