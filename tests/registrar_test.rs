//! Integration tests for the registrar service lifecycle
//!
//! These exercise the register/renew/discover/unregister/expire flows
//! end-to-end on the ephemeral backend, with compressed timings.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use registrar::coordinator::new_peer_view;
use registrar::registrar::{Registrar, RegistryError};
use registrar::scheduler::Scheduler;
use registrar::store::EphemeralStore;
use registrar::{ServiceQuest, ServiceRecord};

async fn leading_registrar() -> Registrar {
    let view = new_peer_view();
    {
        let mut v = view.write().await;
        v.leading = true;
        v.leading_since = Some(Utc::now());
    }
    Registrar::new(Arc::new(EphemeralStore::new()), Scheduler::spawn(), view)
}

fn temperature_request(reg_life: u32) -> ServiceRecord {
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

// ============================================================================
// Scenario: register and renew
// ============================================================================

#[tokio::test]
async fn register_then_renew_preserves_identity() {
    let registrar = leading_registrar().await;

    let registered = registrar.register(temperature_request(60)).await.unwrap();
    assert!(registered.id > 0);
    assert_eq!(registered.created, registered.updated);
    assert_eq!(
        registered.end_of_validity.unwrap(),
        registered.created.unwrap() + ChronoDuration::seconds(60)
    );

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let renewed = registrar.renew(registered.clone()).await.unwrap();
    assert_eq!(renewed.id, registered.id);
    assert_eq!(renewed.created, registered.created);
    assert!(renewed.updated.unwrap() > registered.updated.unwrap());
    assert_eq!(
        renewed.end_of_validity.unwrap(),
        renewed.updated.unwrap() + ChronoDuration::seconds(60)
    );

    // Renewal is visible to subsequent readers
    let listed = registrar.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].end_of_validity, renewed.end_of_validity);
}

// ============================================================================
// Scenario: attribute-filtered discovery
// ============================================================================

#[tokio::test]
async fn discovery_filters_on_details() {
    let registrar = leading_registrar().await;
    let registered = registrar.register(temperature_request(60)).await.unwrap();

    let kitchen = ServiceQuest {
        service_definition: "temperature".to_string(),
        details: HashMap::from([("Location".to_string(), vec!["Kitchen".to_string()])]),
    };
    let found = registrar.discover(&kitchen).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, registered.id);

    let garage = ServiceQuest {
        service_definition: "temperature".to_string(),
        details: HashMap::from([("Location".to_string(), vec!["Garage".to_string()])]),
    };
    assert!(registrar.discover(&garage).await.unwrap().is_empty());

    // No details at all matches every record with the definition
    let any = ServiceQuest {
        service_definition: "temperature".to_string(),
        details: HashMap::new(),
    };
    assert_eq!(registrar.discover(&any).await.unwrap().len(), 1);
}

// ============================================================================
// Scenario: eviction
// ============================================================================

#[tokio::test]
async fn short_lived_record_is_evicted() {
    let registrar = leading_registrar().await;
    let registered = registrar.register(temperature_request(2)).await.unwrap();

    // Still present before the deadline
    assert_eq!(registrar.list().await.unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(2600)).await;

    assert!(registrar.list().await.unwrap().is_empty());

    let quest = ServiceQuest {
        service_definition: "temperature".to_string(),
        details: HashMap::new(),
    };
    assert!(registrar.discover(&quest).await.unwrap().is_empty());

    // The scheduler holds no task for the evicted id
    let err = registrar.unregister(registered.id).await.unwrap_err();
    assert!(matches!(err, RegistryError::NotFound { .. }));
}

// ============================================================================
// Scenario: write rejection on standby
// ============================================================================

#[tokio::test]
async fn standby_rejects_writes_but_serves_reads() {
    let view = new_peer_view();
    {
        let mut v = view.write().await;
        v.leading = false;
        v.leading_peer = Some("http://10.0.0.9:8443".to_string());
    }
    let registrar = Registrar::new(Arc::new(EphemeralStore::new()), Scheduler::spawn(), view);

    match registrar.register(temperature_request(60)).await {
        Err(RegistryError::NotLeader { leader }) => {
            assert_eq!(leader.as_deref(), Some("http://10.0.0.9:8443"));
        }
        other => panic!("expected NotLeader, got {other:?}"),
    }

    let err = registrar.renew(temperature_request(60)).await.unwrap_err();
    assert!(matches!(err, RegistryError::NotLeader { .. }));

    assert!(registrar.list().await.unwrap().is_empty());
}

// ============================================================================
// Scenario: stale renewal falls back to register
// ============================================================================

#[tokio::test]
async fn stale_renewal_re_registers_with_fresh_id() {
    let registrar = leading_registrar().await;
    let registered = registrar.register(temperature_request(60)).await.unwrap();

    registrar.unregister(registered.id).await.unwrap();

    let err = registrar.renew(registered.clone()).await.unwrap_err();
    assert!(matches!(err, RegistryError::Stale { .. }));

    // The caller's fallback: same payload, id reset to 0
    let mut retry = registered;
    retry.id = 0;
    retry.created = None;
    retry.updated = None;
    retry.end_of_validity = None;

    let reregistered = registrar.register(retry).await.unwrap();
    assert!(reregistered.id > 0);
    assert_eq!(registrar.list().await.unwrap().len(), 1);
}

// ============================================================================
// Consecutive renewals
// ============================================================================

#[tokio::test]
async fn back_to_back_renewals_succeed_against_one_registration() {
    let registrar = leading_registrar().await;
    let registered = registrar.register(temperature_request(60)).await.unwrap();

    let first = registrar.renew(registered).await.unwrap();
    let second = registrar.renew(first).await.unwrap();

    // Both renewals succeeded against the same registration
    let listed = registrar.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].updated, second.updated);
}
