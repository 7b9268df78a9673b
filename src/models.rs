//! Core data structures and wire contracts
//!
//! The record shapes in this module are the stable request/response contracts
//! consumed by the transport shell and by peer registrars. Timestamps travel
//! as RFC-3339 UTC strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Version tag carried by service record lists
pub const SERVICE_RECORD_LIST_VERSION: &str = "ServiceRecordList_v1";

/// Version tag carried by system records
pub const SYSTEM_RECORD_VERSION: &str = "SystemRecord_v1";

/// Version tag carried by system record lists
pub const SYSTEM_RECORD_LIST_VERSION: &str = "SystemRecordList_v1";

// ============================================================================
// Service Record
// ============================================================================

/// The directory entry for one provider-side service endpoint.
///
/// A record with `id == 0` has not been registered yet; registration assigns
/// the identifier and fills the three timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Record identifier; 0 reserved for "not yet registered"
    #[serde(default)]
    pub id: i64,

    /// Short service definition identifier (e.g. "temperature")
    pub service_definition: String,

    /// Provider system identifier
    pub system_name: String,

    /// URL-relative suffix under which the service is reachable
    pub sub_path: String,

    /// Opaque version tag
    #[serde(default)]
    pub version: String,

    /// Opaque credential handle (may be empty)
    #[serde(default)]
    pub certificate: String,

    /// Requested registration lifetime in seconds
    #[serde(default)]
    pub reg_life: u32,

    /// Registration instant; set once at register time
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    /// Last register/renew instant
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,

    /// Instant at which the record becomes eligible for eviction
    #[serde(default)]
    pub end_of_validity: Option<DateTime<Utc>>,

    /// Whether the service supports subscriptions
    #[serde(default)]
    pub subscribeable: bool,

    /// Cost scalar, opaque to the registry
    #[serde(default)]
    pub acost: f64,

    /// Cost unit tag, opaque to the registry
    #[serde(default)]
    pub cunit: String,

    /// IP addresses bound to the service, in registration order
    #[serde(default)]
    pub ip_addresses: Vec<String>,

    /// Protocol tag to port mapping (e.g. "http" -> 8080)
    #[serde(default)]
    pub proto_port: HashMap<String, u16>,

    /// Multi-valued service attributes used by discovery
    #[serde(default)]
    pub details: HashMap<String, Vec<String>>,
}

impl ServiceRecord {
    /// Check whether the record carries an assigned identifier
    pub fn is_registered(&self) -> bool {
        self.id > 0
    }

    /// Check whether the record has passed its end of validity
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.end_of_validity {
            Some(end) => end <= now,
            None => false,
        }
    }

    /// Validate the payload shape common to register and renew requests
    pub fn validate(&self) -> Result<(), String> {
        if self.id < 0 {
            return Err(format!("record id must not be negative, got {}", self.id));
        }
        if self.service_definition.is_empty() {
            return Err("service_definition must not be empty".to_string());
        }
        if self.system_name.is_empty() {
            return Err("system_name must not be empty".to_string());
        }
        for (proto, port) in &self.proto_port {
            if *port == 0 {
                return Err(format!("port for protocol '{proto}' must be in 1-65535"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Discovery Request
// ============================================================================

/// Attribute-filtered discovery request.
///
/// A record matches when its `service_definition` equals the requested one
/// and, for every key in `details`, at least one of the requested values
/// appears among the record's values for that key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceQuest {
    pub service_definition: String,

    #[serde(default)]
    pub details: HashMap<String, Vec<String>>,
}

// ============================================================================
// List Envelopes
// ============================================================================

/// Versioned list of service records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecordList {
    pub version: String,
    pub list: Vec<ServiceRecord>,
}

impl ServiceRecordList {
    pub fn new(list: Vec<ServiceRecord>) -> Self {
        Self {
            version: SERVICE_RECORD_LIST_VERSION.to_string(),
            list,
        }
    }
}

/// One distinct provider system, aggregated over its service records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRecord {
    pub system_name: String,
    pub ip_addresses: Vec<String>,
    pub port: u16,
    pub version: String,
}

/// Versioned list of distinct provider systems
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemRecordList {
    pub version: String,
    pub list: Vec<SystemRecord>,
}

impl SystemRecordList {
    pub fn new(list: Vec<SystemRecord>) -> Self {
        Self {
            version: SYSTEM_RECORD_LIST_VERSION.to_string(),
            list,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
