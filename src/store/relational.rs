//! Relational store backend
//!
//! Normalized sqlite schema: the `Services` table plus one table per
//! sub-entity kind and three join tables binding them to their owning
//! record. Multi-statement operations run inside a transaction, and a coarse
//! async lock around the connection keeps transactions from interleaving.
//!
//! The database file is recreated at startup; v1 is non-persistent by
//! design.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::Mutex;

use crate::models::{ServiceRecord, SystemRecord, SYSTEM_RECORD_VERSION};

use super::{ServiceStore, StoreError, StoreResult};

const SCHEMA: &[&str] = &[
    "CREATE TABLE Services (
        Id INTEGER PRIMARY KEY,
        Definition TEXT NOT NULL,
        SystemName TEXT NOT NULL,
        Certificate TEXT,
        SubPath TEXT,
        Version TEXT,
        Created TIMESTAMP NOT NULL,
        Updated TIMESTAMP NOT NULL,
        RegLife INTEGER NOT NULL,
        EndOfValidity TIMESTAMP NOT NULL,
        SubscribeAble BOOLEAN,
        ACost REAL,
        CUnit TEXT
    )",
    "CREATE TABLE IPAddresses (
        Id INTEGER PRIMARY KEY,
        IPAddress TEXT NOT NULL
    )",
    "CREATE TABLE ProtoPorts (
        Id INTEGER PRIMARY KEY,
        Proto TEXT NOT NULL,
        Port INTEGER NOT NULL
    )",
    "CREATE TABLE Details (
        Id INTEGER PRIMARY KEY,
        DetailKey TEXT NOT NULL,
        DetailValue TEXT NOT NULL
    )",
    "CREATE TABLE ServicesXIP (
        ServiceId INTEGER,
        IPAddressId INTEGER,
        FOREIGN KEY(ServiceId) REFERENCES Services(Id),
        FOREIGN KEY(IPAddressId) REFERENCES IPAddresses(Id)
    )",
    "CREATE TABLE ServicesXPP (
        ServiceId INTEGER,
        ProtoPortId INTEGER,
        FOREIGN KEY(ServiceId) REFERENCES Services(Id),
        FOREIGN KEY(ProtoPortId) REFERENCES ProtoPorts(Id)
    )",
    "CREATE TABLE ServicesXDetails (
        ServiceId INTEGER,
        DetailId INTEGER,
        FOREIGN KEY(ServiceId) REFERENCES Services(Id),
        FOREIGN KEY(DetailId) REFERENCES Details(Id)
    )",
];

/// Sqlite-backed store with the seven-table normalized schema
pub struct RelationalStore {
    conn: Mutex<Connection>,
}

impl RelationalStore {
    /// Recreate the database file and its schema.
    ///
    /// Any existing file at `path` is removed first: the registry is
    /// rebuilt from live registrations after a restart.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            if let Err(err) = std::fs::remove_file(path) {
                tracing::warn!("could not remove stale database file: {err}");
            }
        }

        let conn = Connection::open(path)?;
        for statement in SCHEMA {
            conn.execute(statement, [])?;
        }
        tracing::info!(path = %path.display(), "service registry database ready");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database; used by tests
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        for statement in SCHEMA {
            conn.execute(statement, [])?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl ServiceStore for RelationalStore {
    async fn insert(&self, record: &ServiceRecord) -> StoreResult<i64> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let id = if record.id > 0 {
            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM Services WHERE Id = ?1)",
                [record.id],
                |row| row.get(0),
            )?;
            if taken {
                return Err(StoreError::Conflict { id: record.id });
            }
            tx.execute(
                "INSERT INTO Services (
                    Id, Definition, SystemName, Certificate, SubPath, Version,
                    Created, Updated, RegLife, EndOfValidity, SubscribeAble, ACost, CUnit
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    record.id,
                    record.service_definition,
                    record.system_name,
                    record.certificate,
                    record.sub_path,
                    record.version,
                    record.created,
                    record.updated,
                    record.reg_life,
                    record.end_of_validity,
                    record.subscribeable,
                    record.acost,
                    record.cunit,
                ],
            )?;
            record.id
        } else {
            tx.execute(
                "INSERT INTO Services (
                    Definition, SystemName, Certificate, SubPath, Version,
                    Created, Updated, RegLife, EndOfValidity, SubscribeAble, ACost, CUnit
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.service_definition,
                    record.system_name,
                    record.certificate,
                    record.sub_path,
                    record.version,
                    record.created,
                    record.updated,
                    record.reg_life,
                    record.end_of_validity,
                    record.subscribeable,
                    record.acost,
                    record.cunit,
                ],
            )?;
            tx.last_insert_rowid()
        };

        for ip in &record.ip_addresses {
            tx.execute("INSERT INTO IPAddresses (IPAddress) VALUES (?1)", [ip])?;
            let ip_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO ServicesXIP (ServiceId, IPAddressId) VALUES (?1, ?2)",
                params![id, ip_id],
            )?;
        }

        for (proto, port) in &record.proto_port {
            tx.execute(
                "INSERT INTO ProtoPorts (Proto, Port) VALUES (?1, ?2)",
                params![proto, port],
            )?;
            let pp_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO ServicesXPP (ServiceId, ProtoPortId) VALUES (?1, ?2)",
                params![id, pp_id],
            )?;
        }

        for (key, values) in &record.details {
            for value in values {
                tx.execute(
                    "INSERT INTO Details (DetailKey, DetailValue) VALUES (?1, ?2)",
                    params![key, value],
                )?;
                let detail_id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO ServicesXDetails (ServiceId, DetailId) VALUES (?1, ?2)",
                    params![id, detail_id],
                )?;
            }
        }

        tx.commit()?;
        Ok(id)
    }

    async fn renew(
        &self,
        id: i64,
        expected_created: DateTime<Utc>,
        updated: DateTime<Utc>,
        end_of_validity: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let created: Option<DateTime<Utc>> = tx
            .query_row("SELECT Created FROM Services WHERE Id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;

        match created {
            None => return Err(StoreError::NotFound { id }),
            Some(created) if created != expected_created => {
                return Err(StoreError::Stale { id });
            }
            Some(_) => {}
        }

        tx.execute(
            "UPDATE Services SET Updated = ?1, EndOfValidity = ?2 WHERE Id = ?3",
            params![updated, end_of_validity, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM Services WHERE Id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound { id });
        }

        // Join rows first, then orphaned sub-entities, then the record row
        tx.execute("DELETE FROM ServicesXIP WHERE ServiceId = ?1", [id])?;
        tx.execute("DELETE FROM ServicesXPP WHERE ServiceId = ?1", [id])?;
        tx.execute("DELETE FROM ServicesXDetails WHERE ServiceId = ?1", [id])?;
        tx.execute(
            "DELETE FROM IPAddresses WHERE Id NOT IN (SELECT IPAddressId FROM ServicesXIP)",
            [],
        )?;
        tx.execute(
            "DELETE FROM ProtoPorts WHERE Id NOT IN (SELECT ProtoPortId FROM ServicesXPP)",
            [],
        )?;
        tx.execute(
            "DELETE FROM Details WHERE Id NOT IN (SELECT DetailId FROM ServicesXDetails)",
            [],
        )?;
        tx.execute("DELETE FROM Services WHERE Id = ?1", [id])?;

        tx.commit()?;
        tracing::debug!(id, "service record and owned sub-entities deleted");
        Ok(())
    }

    async fn get(&self, id: i64) -> StoreResult<ServiceRecord> {
        let conn = self.conn.lock().await;
        read_record(&conn, id)?.ok_or(StoreError::NotFound { id })
    }

    async fn list(&self) -> StoreResult<Vec<ServiceRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT Id FROM Services")?;
        let ids: Vec<i64> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = read_record(&conn, id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn find(
        &self,
        service_definition: &str,
        required_details: &HashMap<String, Vec<String>>,
    ) -> StoreResult<Vec<ServiceRecord>> {
        let mut sql = String::from("SELECT Id FROM Services WHERE Definition = ?");
        let mut bindings: Vec<&str> = vec![service_definition];

        // One EXISTS clause per required key; the value list is a
        // disjunction, the clauses conjoin
        for (key, values) in required_details {
            if values.is_empty() {
                continue;
            }
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM ServicesXDetails sxd \
                 INNER JOIN Details d ON d.Id = sxd.DetailId \
                 WHERE sxd.ServiceId = Services.Id AND d.DetailKey = ? \
                 AND d.DetailValue IN (",
            );
            bindings.push(key.as_str());
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push('?');
                bindings.push(value.as_str());
            }
            sql.push_str("))");
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let ids: Vec<i64> = stmt
            .query_map(rusqlite::params_from_iter(bindings), |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = read_record(&conn, id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn unique_systems(&self) -> StoreResult<Vec<SystemRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT s.SystemName, ip.IPAddress, pp.Port
             FROM Services s
             INNER JOIN ServicesXIP sip ON s.Id = sip.ServiceId
             INNER JOIN IPAddresses ip ON sip.IPAddressId = ip.Id
             INNER JOIN ServicesXPP spp ON s.Id = spp.ServiceId
             INNER JOIN ProtoPorts pp ON spp.ProtoPortId = pp.Id
             WHERE pp.Proto IN ('http', 'https')
             ORDER BY pp.Proto, s.Id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u16>(2)?,
            ))
        })?;

        // 'http' sorts before 'https', so first-seen keeps the http port
        let mut systems: BTreeMap<String, SystemRecord> = BTreeMap::new();
        for row in rows {
            let (system_name, ip, port) = row?;
            let entry = systems
                .entry(system_name.clone())
                .or_insert_with(|| SystemRecord {
                    system_name,
                    ip_addresses: Vec::new(),
                    port,
                    version: SYSTEM_RECORD_VERSION.to_string(),
                });
            if !entry.ip_addresses.contains(&ip) {
                entry.ip_addresses.push(ip);
            }
        }

        Ok(systems.into_values().collect())
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

fn read_record(conn: &Connection, id: i64) -> Result<Option<ServiceRecord>, rusqlite::Error> {
    let record = conn
        .query_row(
            "SELECT Definition, SystemName, Certificate, SubPath, Version,
                    Created, Updated, RegLife, EndOfValidity, SubscribeAble, ACost, CUnit
             FROM Services WHERE Id = ?1",
            [id],
            |row| {
                Ok(ServiceRecord {
                    id,
                    service_definition: row.get(0)?,
                    system_name: row.get(1)?,
                    certificate: row.get(2)?,
                    sub_path: row.get(3)?,
                    version: row.get(4)?,
                    created: Some(row.get(5)?),
                    updated: Some(row.get(6)?),
                    reg_life: row.get(7)?,
                    end_of_validity: Some(row.get(8)?),
                    subscribeable: row.get(9)?,
                    acost: row.get(10)?,
                    cunit: row.get(11)?,
                    ip_addresses: Vec::new(),
                    proto_port: HashMap::new(),
                    details: HashMap::new(),
                })
            },
        )
        .optional()?;

    let Some(mut record) = record else {
        return Ok(None);
    };

    record.ip_addresses = read_ip_addresses(conn, id)?;
    record.proto_port = read_proto_ports(conn, id)?;
    record.details = read_details(conn, id)?;
    Ok(Some(record))
}

fn read_ip_addresses(conn: &Connection, id: i64) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT IPAddress FROM IPAddresses
         INNER JOIN ServicesXIP ON IPAddresses.Id = ServicesXIP.IPAddressId
         WHERE ServicesXIP.ServiceId = ?1
         ORDER BY IPAddresses.Id",
    )?;
    let result = stmt.query_map([id], |row| row.get(0))?.collect();
    result
}

fn read_proto_ports(conn: &Connection, id: i64) -> Result<HashMap<String, u16>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT Proto, Port FROM ProtoPorts
         INNER JOIN ServicesXPP ON ProtoPorts.Id = ServicesXPP.ProtoPortId
         WHERE ServicesXPP.ServiceId = ?1",
    )?;
    let result = stmt
        .query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect();
    result
}

fn read_details(
    conn: &Connection,
    id: i64,
) -> Result<HashMap<String, Vec<String>>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT DetailKey, DetailValue FROM Details
         INNER JOIN ServicesXDetails ON Details.Id = ServicesXDetails.DetailId
         WHERE ServicesXDetails.ServiceId = ?1
         ORDER BY Details.Id",
    )?;
    let rows = stmt.query_map([id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut details: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let (key, value) = row?;
        details.entry(key).or_default().push(value);
    }
    Ok(details)
}

// ============================================================================
// Tests
// ============================================================================
