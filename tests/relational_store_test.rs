//! Integration tests for the relational store backend on real database files

use chrono::Utc;
use std::collections::HashMap;

use registrar::store::{RelationalStore, ServiceStore, StoreError};
use registrar::ServiceRecord;

fn record(definition: &str, system: &str, location: &str) -> ServiceRecord {
    let now = Utc::now();
    ServiceRecord {
        id: 0,
        service_definition: definition.to_string(),
        system_name: system.to_string(),
        sub_path: "t".to_string(),
        version: "1.0".to_string(),
        certificate: String::new(),
        reg_life: 60,
        created: Some(now),
        updated: Some(now),
        end_of_validity: Some(now + chrono::Duration::seconds(60)),
        subscribeable: false,
        acost: 0.0,
        cunit: String::new(),
        ip_addresses: vec!["10.0.0.5".to_string()],
        proto_port: HashMap::from([("http".to_string(), 8080)]),
        details: HashMap::from([("Location".to_string(), vec![location.to_string()])]),
    }
}

#[tokio::test]
async fn open_recreates_the_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("serviceRegistry.db");

    // Leave stale content behind and reopen: the registry starts empty
    {
        let store = RelationalStore::open(&path).unwrap();
        store.insert(&record("temperature", "sensor_A", "Kitchen"))
            .await
            .unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    let store = RelationalStore::open(&path).unwrap();
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn full_record_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = RelationalStore::open(dir.path().join("reg.db")).unwrap();

    let mut rec = record("temperature", "sensor_A", "Kitchen");
    rec.ip_addresses = vec!["10.0.0.5".to_string(), "fd00::5".to_string()];
    rec.proto_port = HashMap::from([
        ("http".to_string(), 8080),
        ("coap".to_string(), 5683),
    ]);
    rec.details.insert(
        "Unit".to_string(),
        vec!["Celsius".to_string(), "Kelvin".to_string()],
    );

    let id = store.insert(&rec).await.unwrap();
    let stored = store.get(id).await.unwrap();

    assert_eq!(stored.ip_addresses, rec.ip_addresses);
    assert_eq!(stored.proto_port, rec.proto_port);
    assert_eq!(stored.details, rec.details);
    assert_eq!(stored.created, rec.created);
    assert_eq!(stored.end_of_validity, rec.end_of_validity);
}

#[tokio::test]
async fn delete_cascades_and_spares_other_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = RelationalStore::open(dir.path().join("reg.db")).unwrap();

    let doomed = store
        .insert(&record("temperature", "sensor_A", "Kitchen"))
        .await
        .unwrap();
    let kept = store
        .insert(&record("humidity", "sensor_B", "Garage"))
        .await
        .unwrap();

    store.delete(doomed).await.unwrap();

    assert!(matches!(
        store.get(doomed).await.unwrap_err(),
        StoreError::NotFound { .. }
    ));

    let survivor = store.get(kept).await.unwrap();
    assert_eq!(survivor.ip_addresses, vec!["10.0.0.5"]);
    assert_eq!(survivor.proto_port["http"], 8080);
    assert_eq!(survivor.details["Location"], vec!["Garage"]);

    let remaining = store.list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, kept);
}

#[tokio::test]
async fn find_and_unique_systems_work_together() {
    let dir = tempfile::tempdir().unwrap();
    let store = RelationalStore::open(dir.path().join("reg.db")).unwrap();

    store
        .insert(&record("temperature", "sensor_A", "Kitchen"))
        .await
        .unwrap();
    store
        .insert(&record("temperature", "sensor_B", "Garage"))
        .await
        .unwrap();
    store
        .insert(&record("humidity", "sensor_A", "Kitchen"))
        .await
        .unwrap();

    let kitchen = HashMap::from([("Location".to_string(), vec!["Kitchen".to_string()])]);
    let found = store.find("temperature", &kitchen).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].system_name, "sensor_A");

    let systems = store.unique_systems().await.unwrap();
    assert_eq!(systems.len(), 2);
    assert_eq!(systems[0].system_name, "sensor_A");
    assert_eq!(systems[1].system_name, "sensor_B");
    assert_eq!(systems[0].ip_addresses, vec!["10.0.0.5"]);
}

#[tokio::test]
async fn renew_survives_reopen_of_connection_lock() {
    let dir = tempfile::tempdir().unwrap();
    let store = RelationalStore::open(dir.path().join("reg.db")).unwrap();

    let rec = record("temperature", "sensor_A", "Kitchen");
    let created = rec.created.unwrap();
    let id = store.insert(&rec).await.unwrap();

    // Several renewals in a row, each guarded by the same created stamp
    for i in 1..=3 {
        let updated = Utc::now();
        let end = updated + chrono::Duration::seconds(60 * i);
        store.renew(id, created, updated, end).await.unwrap();

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.created, Some(created));
        assert_eq!(stored.end_of_validity, Some(end));
    }
}
