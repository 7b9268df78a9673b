//! In-memory store backend
//!
//! Records live in a single map behind a reader-writer lock; sub-entities
//! live inside the record value, so atomicity is free. Used when the
//! registrar is configured with the `ephemeral` backend, and throughout the
//! test suite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::models::{ServiceRecord, SystemRecord, SYSTEM_RECORD_VERSION};

use super::{details_match, ServiceStore, StoreError, StoreResult};

struct Inner {
    records: HashMap<i64, ServiceRecord>,
    next_id: i64,
}

/// Process-memory store; no I/O, coarse multi-reader single-writer lock
pub struct EphemeralStore {
    inner: RwLock<Inner>,
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Take the next free identifier, probing forward over occupied slots
    /// and wrapping back to 1 at the end of the range
    fn allocate_id(&mut self) -> i64 {
        loop {
            let candidate = self.next_id;
            self.next_id = if self.next_id == i64::MAX {
                1
            } else {
                self.next_id + 1
            };
            if !self.records.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

#[async_trait]
impl ServiceStore for EphemeralStore {
    async fn insert(&self, record: &ServiceRecord) -> StoreResult<i64> {
        let mut inner = self.inner.write().await;

        let id = if record.id > 0 {
            if inner.records.contains_key(&record.id) {
                return Err(StoreError::Conflict { id: record.id });
            }
            record.id
        } else {
            inner.allocate_id()
        };

        let mut stored = record.clone();
        stored.id = id;
        inner.records.insert(id, stored);
        Ok(id)
    }

    async fn renew(
        &self,
        id: i64,
        expected_created: DateTime<Utc>,
        updated: DateTime<Utc>,
        end_of_validity: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;

        if record.created != Some(expected_created) {
            return Err(StoreError::Stale { id });
        }

        record.updated = Some(updated);
        record.end_of_validity = Some(end_of_validity);
        Ok(())
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { id })
    }

    async fn get(&self, id: i64) -> StoreResult<ServiceRecord> {
        let inner = self.inner.read().await;
        inner
            .records
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    async fn list(&self) -> StoreResult<Vec<ServiceRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.records.values().cloned().collect())
    }

    async fn find(
        &self,
        service_definition: &str,
        required_details: &HashMap<String, Vec<String>>,
    ) -> StoreResult<Vec<ServiceRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .values()
            .filter(|r| r.service_definition == service_definition)
            .filter(|r| details_match(r, required_details))
            .cloned()
            .collect())
    }

    async fn unique_systems(&self) -> StoreResult<Vec<SystemRecord>> {
        let inner = self.inner.read().await;
        let mut systems: BTreeMap<String, SystemRecord> = BTreeMap::new();

        for record in inner.records.values() {
            // http wins over https when both are bound
            let port = record
                .proto_port
                .get("http")
                .or_else(|| record.proto_port.get("https"));
            let Some(&port) = port else {
                continue;
            };

            let entry = systems
                .entry(record.system_name.clone())
                .or_insert_with(|| SystemRecord {
                    system_name: record.system_name.clone(),
                    ip_addresses: Vec::new(),
                    port,
                    version: SYSTEM_RECORD_VERSION.to_string(),
                });
            for ip in &record.ip_addresses {
                if !entry.ip_addresses.contains(ip) {
                    entry.ip_addresses.push(ip.clone());
                }
            }
        }

        Ok(systems.into_values().collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
