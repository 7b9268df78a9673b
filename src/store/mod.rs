//! Record persistence with swappable backends
//!
//! The registrar talks to its store through the [`ServiceStore`] trait so the
//! backend can be chosen at instantiation:
//!
//! - [`EphemeralStore`] - process memory only, fastest, no I/O
//! - [`RelationalStore`] - normalized sqlite schema with join tables
//!
//! Both backends enforce the same contract: inserts and deletes are atomic
//! across the record and its sub-entities, renewals are guarded by the stored
//! `created` timestamp, and identifier assignment is opaque to callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{ServiceRecord, SystemRecord};

pub mod ephemeral;
pub mod relational;

pub use ephemeral::EphemeralStore;
pub use relational::RelationalStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Errors
// ============================================================================

/// Store-level failures surfaced to the registrar
#[derive(Debug, Error)]
pub enum StoreError {
    /// Target record id absent
    #[error("no service record with id {id}")]
    NotFound { id: i64 },

    /// Renewal precondition mismatched; the caller should re-register
    #[error("service record {id} does not match the stored registration")]
    Stale { id: i64 },

    /// Explicit id collides with a live record
    #[error("service record id {id} is already taken")]
    Conflict { id: i64 },

    /// Backend fault
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

// ============================================================================
// Store Contract
// ============================================================================

/// Backend-neutral persistence contract for service records.
///
/// Implementations serialize access internally (multi-reader single-writer
/// or a coarse lock of equivalent effect); callers never hold a lock across
/// operations.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Write a record and its sub-entities as one atomic unit.
    ///
    /// A record with `id == 0` is assigned a fresh identifier, returned to
    /// the caller. A record with an explicit positive id fails with
    /// [`StoreError::Conflict`] when the slot is taken.
    async fn insert(&self, record: &ServiceRecord) -> StoreResult<i64>;

    /// Update `updated` and `end_of_validity` iff the stored `created`
    /// equals `expected_created`.
    async fn renew(
        &self,
        id: i64,
        expected_created: DateTime<Utc>,
        updated: DateTime<Utc>,
        end_of_validity: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Remove the record and every sub-entity it exclusively owns
    async fn delete(&self, id: i64) -> StoreResult<()>;

    /// Fetch one record by id
    async fn get(&self, id: i64) -> StoreResult<ServiceRecord>;

    /// Unordered snapshot of every record
    async fn list(&self) -> StoreResult<Vec<ServiceRecord>>;

    /// Attribute-filtered discovery: definition equality, disjunction within
    /// a details key, conjunction across keys. A key with an empty value
    /// list imposes no constraint.
    async fn find(
        &self,
        service_definition: &str,
        required_details: &HashMap<String, Vec<String>>,
    ) -> StoreResult<Vec<ServiceRecord>>;

    /// One entry per distinct system name with an http or https binding,
    /// IP addresses aggregated, output sorted by system name
    async fn unique_systems(&self) -> StoreResult<Vec<SystemRecord>>;
}

/// Shared matching rule for the in-memory backend and for tests: does the
/// record satisfy the required details?
pub(crate) fn details_match(
    record: &ServiceRecord,
    required: &HashMap<String, Vec<String>>,
) -> bool {
    required.iter().all(|(key, wanted)| {
        wanted.is_empty()
            || record
                .details
                .get(key)
                .is_some_and(|have| wanted.iter().any(|w| have.contains(w)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceRecord;

    fn record_with_details(details: &[(&str, &[&str])]) -> ServiceRecord {
        ServiceRecord {
            id: 1,
            service_definition: "temperature".to_string(),
            system_name: "sensor_A".to_string(),
            sub_path: "t".to_string(),
            version: String::new(),
            certificate: String::new(),
            reg_life: 60,
            created: None,
            updated: None,
            end_of_validity: None,
            subscribeable: false,
            acost: 0.0,
            cunit: String::new(),
            ip_addresses: vec![],
            proto_port: HashMap::new(),
            details: details
                .iter()
                .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
                .collect(),
        }
    }

    #[test]
    fn test_details_match_empty_filter_matches_all() {
        let rec = record_with_details(&[("Location", &["Kitchen"])]);
        assert!(details_match(&rec, &HashMap::new()));
    }

    #[test]
    fn test_details_match_disjunction_within_key() {
        let rec = record_with_details(&[("Location", &["Kitchen"])]);
        let required = HashMap::from([(
            "Location".to_string(),
            vec!["Garage".to_string(), "Kitchen".to_string()],
        )]);
        assert!(details_match(&rec, &required));
    }

    #[test]
    fn test_details_match_conjunction_across_keys() {
        let rec = record_with_details(&[("Location", &["Kitchen"]), ("Unit", &["Celsius"])]);

        let both = HashMap::from([
            ("Location".to_string(), vec!["Kitchen".to_string()]),
            ("Unit".to_string(), vec!["Celsius".to_string()]),
        ]);
        assert!(details_match(&rec, &both));

        let one_missing = HashMap::from([
            ("Location".to_string(), vec!["Kitchen".to_string()]),
            ("Unit".to_string(), vec!["Fahrenheit".to_string()]),
        ]);
        assert!(!details_match(&rec, &one_missing));
    }

    #[test]
    fn test_details_match_empty_value_list_is_unconstrained() {
        let rec = record_with_details(&[("Location", &["Kitchen"])]);
        let required = HashMap::from([("Unit".to_string(), vec![])]);
        assert!(details_match(&rec, &required));
    }
}
