//! Registrar service
//!
//! The request-level state machine wrapping the store and the expiration
//! scheduler. Writes are gated on leadership; reads are always served.
//! Every mutation keeps the scheduler in step with the store: registering
//! and renewing arm (or re-arm) the record's expiration task, unregistering
//! removes it.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::coordinator::{Role, SharedPeerView};
use crate::models::{ServiceQuest, ServiceRecord, SystemRecord};
use crate::scheduler::Scheduler;
use crate::store::{ServiceStore, StoreError};

pub mod api;
pub mod server;

/// Result type for registrar operations
pub type RegistryResult<T> = Result<T, RegistryError>;

// ============================================================================
// Errors
// ============================================================================

/// Request-level failures surfaced to callers
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Write rejected because this instance is on standby
    #[error("this registrar is on standby")]
    NotLeader { leader: Option<String> },

    /// Target record id absent
    #[error("no service record with id {id}")]
    NotFound { id: i64 },

    /// Renewal preconditions mismatched; the caller should re-register
    #[error("registration {id} does not match the stored record; re-register with id 0")]
    Stale { id: i64 },

    /// Explicit id collides with a live record
    #[error("service record id {id} is already taken")]
    Conflict { id: i64 },

    /// Request cannot be parsed against the contracted shape
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Store or scheduler subsystem fault
    #[error("internal registry error: {0}")]
    Internal(String),
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id } => Self::NotFound { id },
            StoreError::Stale { id } => Self::Stale { id },
            StoreError::Conflict { id } => Self::Conflict { id },
            StoreError::Database(e) => Self::Internal(e.to_string()),
        }
    }
}

// ============================================================================
// Registrar
// ============================================================================

/// One instance of the service registry
pub struct Registrar {
    store: Arc<dyn ServiceStore>,
    scheduler: Scheduler,
    view: SharedPeerView,
}

impl Registrar {
    pub fn new(store: Arc<dyn ServiceStore>, scheduler: Scheduler, view: SharedPeerView) -> Self {
        Self {
            store,
            scheduler,
            view,
        }
    }

    /// Register a fresh record (`id == 0`): assign an identifier, stamp the
    /// timestamps, persist, and arm the expiration task
    pub async fn register(&self, mut record: ServiceRecord) -> RegistryResult<ServiceRecord> {
        self.require_lead().await?;
        record
            .validate()
            .map_err(RegistryError::MalformedPayload)?;
        if record.id != 0 {
            return Err(RegistryError::MalformedPayload(format!(
                "register requires id 0, got {}",
                record.id
            )));
        }

        let now = Utc::now();
        let end_of_validity = now + ChronoDuration::seconds(i64::from(record.reg_life));
        record.created = Some(now);
        record.updated = Some(now);
        record.end_of_validity = Some(end_of_validity);

        let id = self.store.insert(&record).await?;
        record.id = id;
        self.arm_expiration(id, end_of_validity);

        tracing::info!(
            id,
            service = %record.service_definition,
            system = %record.system_name,
            "service registered"
        );
        Ok(record)
    }

    /// Extend the validity of an existing record.
    ///
    /// The submitted `(id, service_definition, sub_path, created)` must match
    /// the stored registration; any mismatch, including a missing record,
    /// surfaces as [`RegistryError::Stale`] so the caller falls back to a
    /// fresh registration. The stored `reg_life` is authoritative.
    pub async fn renew(&self, record: ServiceRecord) -> RegistryResult<ServiceRecord> {
        self.require_lead().await?;
        record
            .validate()
            .map_err(RegistryError::MalformedPayload)?;
        if record.id <= 0 {
            return Err(RegistryError::MalformedPayload(format!(
                "renew requires a positive id, got {}",
                record.id
            )));
        }

        let id = record.id;
        let stored = match self.store.get(id).await {
            Ok(stored) => stored,
            Err(StoreError::NotFound { .. }) => return Err(RegistryError::Stale { id }),
            Err(err) => return Err(err.into()),
        };

        let created = match record.created {
            Some(created) if Some(created) == stored.created => created,
            _ => return Err(RegistryError::Stale { id }),
        };
        if record.service_definition != stored.service_definition
            || record.sub_path != stored.sub_path
        {
            return Err(RegistryError::Stale { id });
        }

        let now = Utc::now();
        let end_of_validity = now + ChronoDuration::seconds(i64::from(stored.reg_life));
        match self.store.renew(id, created, now, end_of_validity).await {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) | Err(StoreError::Stale { .. }) => {
                return Err(RegistryError::Stale { id });
            }
            Err(err) => return Err(err.into()),
        }

        // Supersedes the task armed by the previous register/renew
        self.arm_expiration(id, end_of_validity);

        let mut renewed = stored;
        renewed.updated = Some(now);
        renewed.end_of_validity = Some(end_of_validity);
        tracing::info!(id, service = %renewed.service_definition, "registration renewed");
        Ok(renewed)
    }

    /// Remove a record and its scheduler task; allowed in any role
    pub async fn unregister(&self, id: i64) -> RegistryResult<()> {
        self.store.delete(id).await?;
        if !self.scheduler.remove_task(id).await {
            tracing::debug!(id, "no expiration task to remove");
        }
        tracing::info!(id, "service unregistered");
        Ok(())
    }

    /// Unordered snapshot of every record
    pub async fn list(&self) -> RegistryResult<Vec<ServiceRecord>> {
        Ok(self.store.list().await?)
    }

    /// Attribute-filtered discovery
    pub async fn discover(&self, quest: &ServiceQuest) -> RegistryResult<Vec<ServiceRecord>> {
        Ok(self
            .store
            .find(&quest.service_definition, &quest.details)
            .await?)
    }

    /// Distinct provider systems with an http or https binding
    pub async fn systems(&self) -> RegistryResult<Vec<SystemRecord>> {
        Ok(self.store.unique_systems().await?)
    }

    /// Current leadership role
    pub async fn role(&self) -> Role {
        self.view.read().await.role()
    }

    async fn require_lead(&self) -> RegistryResult<()> {
        let view = self.view.read().await;
        if view.leading {
            Ok(())
        } else {
            Err(RegistryError::NotLeader {
                leader: view.leading_peer.clone(),
            })
        }
    }

    /// Arm the eviction task for a record.
    ///
    /// The callback holds the record id only, never the record: when it
    /// fires it consults the store, and a record that was renewed in the
    /// meantime (validity now in the future) is left alone. The stale fire
    /// simply drains.
    fn arm_expiration(&self, id: i64, deadline: chrono::DateTime<Utc>) {
        let store = self.store.clone();
        self.scheduler.add_task(deadline, id, move || async move {
            match store.get(id).await {
                Ok(record) if !record.is_expired(Utc::now()) => {
                    tracing::debug!(id, "expiration fired on renewed record; ignoring");
                }
                Ok(_) => match store.delete(id).await {
                    Ok(()) => tracing::info!(id, "expired service record evicted"),
                    Err(err) => tracing::warn!(id, "eviction failed: {err}"),
                },
                Err(StoreError::NotFound { .. }) => {
                    tracing::debug!(id, "record already removed before expiration");
                }
                Err(err) => {
                    tracing::warn!(id, "expiration check failed: {err}");
                }
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::new_peer_view;
    use crate::store::EphemeralStore;
    use std::collections::HashMap;
    use std::time::Duration;

    async fn leading_registrar() -> Registrar {
        let view = new_peer_view();
        {
            let mut v = view.write().await;
            v.leading = true;
            v.leading_since = Some(Utc::now());
        }
        Registrar::new(Arc::new(EphemeralStore::new()), Scheduler::spawn(), view)
    }

    fn request(reg_life: u32) -> ServiceRecord {
        ServiceRecord {
            id: 0,
            service_definition: "temperature".to_string(),
            system_name: "sensor_A".to_string(),
            sub_path: "t".to_string(),
            version: String::new(),
            certificate: String::new(),
            reg_life,
            created: None,
            updated: None,
            end_of_validity: None,
            subscribeable: false,
            acost: 0.0,
            cunit: String::new(),
            ip_addresses: vec!["10.0.0.5".to_string()],
            proto_port: HashMap::from([("http".to_string(), 8080)]),
            details: HashMap::from([("Location".to_string(), vec!["Kitchen".to_string()])]),
        }
    }

    #[tokio::test]
    async fn test_register_assigns_id_and_timestamps() {
        let registrar = leading_registrar().await;
        let registered = registrar.register(request(60)).await.unwrap();

        assert!(registered.id > 0);
        assert_eq!(registered.created, registered.updated);
        let created = registered.created.unwrap();
        assert_eq!(
            registered.end_of_validity.unwrap(),
            created + ChronoDuration::seconds(60)
        );
    }

    #[tokio::test]
    async fn test_register_rejects_nonzero_id() {
        let registrar = leading_registrar().await;
        let mut rec = request(60);
        rec.id = 4;
        let err = registrar.register(rec).await.unwrap_err();
        assert!(matches!(err, RegistryError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_writes_rejected_on_standby() {
        let view = new_peer_view();
        {
            let mut v = view.write().await;
            v.leading = false;
            v.leading_peer = Some("http://leader:8443".to_string());
        }
        let registrar =
            Registrar::new(Arc::new(EphemeralStore::new()), Scheduler::spawn(), view);

        let err = registrar.register(request(60)).await.unwrap_err();
        match err {
            RegistryError::NotLeader { leader } => {
                assert_eq!(leader.as_deref(), Some("http://leader:8443"));
            }
            other => panic!("expected NotLeader, got {other:?}"),
        }

        // Reads are still served
        assert!(registrar.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_renew_preserves_created_and_extends_validity() {
        let registrar = leading_registrar().await;
        let registered = registrar.register(request(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let renewed = registrar.renew(registered.clone()).await.unwrap();
        assert_eq!(renewed.id, registered.id);
        assert_eq!(renewed.created, registered.created);
        assert!(renewed.updated.unwrap() > registered.updated.unwrap());
        assert_eq!(
            renewed.end_of_validity.unwrap(),
            renewed.updated.unwrap() + ChronoDuration::seconds(60)
        );
    }

    #[tokio::test]
    async fn test_renew_with_wrong_created_is_stale() {
        let registrar = leading_registrar().await;
        let mut registered = registrar.register(request(60)).await.unwrap();

        registered.created = Some(registered.created.unwrap() + ChronoDuration::seconds(1));
        let err = registrar.renew(registered).await.unwrap_err();
        assert!(matches!(err, RegistryError::Stale { .. }));
    }

    #[tokio::test]
    async fn test_renew_after_unregister_is_stale() {
        let registrar = leading_registrar().await;
        let registered = registrar.register(request(60)).await.unwrap();

        registrar.unregister(registered.id).await.unwrap();

        let err = registrar.renew(registered).await.unwrap_err();
        assert!(matches!(err, RegistryError::Stale { .. }));
    }

    #[tokio::test]
    async fn test_unregister_removes_record_and_task() {
        let registrar = leading_registrar().await;
        let registered = registrar.register(request(60)).await.unwrap();
        let id = registered.id;

        registrar.unregister(id).await.unwrap();

        assert!(registrar.list().await.unwrap().is_empty());
        assert!(!registrar.scheduler.remove_task(id).await);

        let err = registrar.unregister(id).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_zero_reg_life_is_evicted_promptly() {
        let registrar = leading_registrar().await;
        let registered = registrar.register(request(0)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(registrar.list().await.unwrap().is_empty());
        assert!(!registrar.scheduler.remove_task(registered.id).await);
    }

    #[tokio::test]
    async fn test_stale_expiration_fire_spares_valid_record() {
        let registrar = leading_registrar().await;
        let registered = registrar.register(request(1)).await.unwrap();

        // Extend validity behind the scheduler's back so the original
        // deadline fires against a record that is still valid
        let now = Utc::now();
        registrar
            .store
            .renew(
                registered.id,
                registered.created.unwrap(),
                now,
                now + ChronoDuration::seconds(30),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1600)).await;

        let listed = registrar.list().await.unwrap();
        assert_eq!(listed.len(), 1, "stale fire evicted a valid record");
        assert_eq!(listed[0].id, registered.id);
    }

    #[tokio::test]
    async fn test_discover_matches_scenario_filters() {
        let registrar = leading_registrar().await;
        registrar.register(request(60)).await.unwrap();

        let kitchen = ServiceQuest {
            service_definition: "temperature".to_string(),
            details: HashMap::from([("Location".to_string(), vec!["Kitchen".to_string()])]),
        };
        assert_eq!(registrar.discover(&kitchen).await.unwrap().len(), 1);

        let garage = ServiceQuest {
            service_definition: "temperature".to_string(),
            details: HashMap::from([("Location".to_string(), vec!["Garage".to_string()])]),
        };
        assert!(registrar.discover(&garage).await.unwrap().is_empty());
    }
}
