//! SQLite-based microVM repository.
//!
//! Spec and status are stored as JSON columns next to the identity
//! columns. Each save bumps the row's version.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use kiln_id::{IdError, VmId};
use rusqlite::{params, Connection, OptionalExtension, Params};
use thiserror::Error;
use tracing::debug;

use crate::models::MicroVm;
use crate::ports::{GetOptions, MicroVmRepository};

/// Errors from state store operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid stored id: {0}")]
    Id(#[from] IdError),

    #[error("Invalid state: {0}")]
    Invalid(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// Row as stored, before decoding.
struct StoredRow {
    namespace: String,
    name: String,
    uid: String,
    version: i64,
    spec_json: String,
    status_json: String,
}

impl StoredRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            namespace: row.get(0)?,
            name: row.get(1)?,
            uid: row.get(2)?,
            version: row.get(3)?,
            spec_json: row.get(4)?,
            status_json: row.get(5)?,
        })
    }

    fn into_microvm(self) -> Result<MicroVm, StateStoreError> {
        let uid = (!self.uid.is_empty()).then_some(self.uid);
        let version = u64::try_from(self.version)
            .map_err(|_| StateStoreError::Invalid(format!("negative version {}", self.version)))?;

        Ok(MicroVm {
            id: VmId::new(self.name, self.namespace, uid)?,
            version,
            spec: serde_json::from_str(&self.spec_json)?,
            status: serde_json::from_str(&self.status_json)?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT namespace, name, uid, version, spec_json, status_json FROM microvms";

/// SQLite repository.
///
/// The connection is shared behind a mutex and every query runs on the
/// blocking pool.
#[derive(Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRepository").finish_non_exhaustive()
    }
}

impl SqliteRepository {
    /// Open or create a repository at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateStoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::with_connection(conn)
    }

    /// Open an in-memory repository (for testing).
    pub fn open_in_memory() -> Result<Self, StateStoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StateStoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StateStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StateStoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut conn)
        })
        .await
        .map_err(|e| StateStoreError::Task(e.to_string()))?
    }

    /// The lease recorded for a VM, if any.
    pub async fn lease(&self, id: &VmId) -> Result<Option<String>, StateStoreError> {
        let key = RowKey::from(id);
        self.with_conn(move |conn| {
            let lease: Option<Option<String>> = conn
                .query_row(
                    "SELECT lease FROM microvms WHERE namespace = ?1 AND name = ?2 AND uid = ?3",
                    params![key.namespace, key.name, key.uid],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(lease.flatten())
        })
        .await
    }
}

/// Primary key columns for a VM.
#[derive(Debug, Clone)]
struct RowKey {
    namespace: String,
    name: String,
    uid: String,
}

impl From<&VmId> for RowKey {
    fn from(id: &VmId) -> Self {
        Self {
            namespace: id.namespace().to_string(),
            name: id.name().to_string(),
            uid: id.uid().unwrap_or_default().to_string(),
        }
    }
}

fn init_schema(conn: &Connection) -> Result<(), StateStoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS microvms (
            namespace TEXT NOT NULL,
            name TEXT NOT NULL,
            uid TEXT NOT NULL DEFAULT '',
            version INTEGER NOT NULL DEFAULT 0,
            spec_json TEXT NOT NULL,
            status_json TEXT NOT NULL,
            lease TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, name, uid)
        );

        CREATE INDEX IF NOT EXISTS idx_microvms_uid ON microvms(uid);
        "#,
    )?;

    debug!("Repository schema initialized");
    Ok(())
}

fn load<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<MicroVm>, StateStoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, StoredRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(StoredRow::into_microvm).collect()
}

fn save_vm(conn: &mut Connection, vm: &MicroVm) -> Result<MicroVm, StateStoreError> {
    let key = RowKey::from(&vm.id);
    let tx = conn.transaction()?;

    let current: Option<i64> = tx
        .query_row(
            "SELECT version FROM microvms WHERE namespace = ?1 AND name = ?2 AND uid = ?3",
            params![key.namespace, key.name, key.uid],
            |row| row.get(0),
        )
        .optional()?;
    let version = current.unwrap_or(0) + 1;

    let mut stored = vm.clone();
    stored.version = u64::try_from(version)
        .map_err(|_| StateStoreError::Invalid(format!("negative version {version}")))?;

    tx.execute(
        r#"
        INSERT INTO microvms (namespace, name, uid, version, spec_json, status_json, lease, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(namespace, name, uid) DO UPDATE SET
            version = excluded.version,
            spec_json = excluded.spec_json,
            status_json = excluded.status_json,
            lease = COALESCE(microvms.lease, excluded.lease),
            updated_at = excluded.updated_at
        "#,
        params![
            key.namespace,
            key.name,
            key.uid,
            version,
            serde_json::to_string(&stored.spec)?,
            serde_json::to_string(&stored.status)?,
            stored.id.to_string(),
            Utc::now().timestamp_millis(),
        ],
    )?;
    tx.commit()?;

    Ok(stored)
}

#[async_trait]
impl MicroVmRepository for SqliteRepository {
    async fn save(&self, vm: &MicroVm) -> Result<MicroVm> {
        let vm = vm.clone();
        let saved = self.with_conn(move |conn| save_vm(conn, &vm)).await?;
        debug!(vmid = %saved.id, version = saved.version, "Saved microvm");
        Ok(saved)
    }

    async fn delete(&self, vm: &MicroVm) -> Result<()> {
        let key = RowKey::from(&vm.id);
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM microvms WHERE namespace = ?1 AND name = ?2 AND uid = ?3",
                params![key.namespace, key.name, key.uid],
            )?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn get(&self, options: GetOptions) -> Result<Option<MicroVm>> {
        let found = self
            .with_conn(move |conn| {
                let candidates = match (&options.uid, &options.namespace, &options.name) {
                    (Some(uid), _, _) => {
                        load(conn, &format!("{SELECT_COLUMNS} WHERE uid = ?1"), params![uid])?
                    }
                    (None, Some(namespace), Some(name)) => load(
                        conn,
                        &format!(
                            "{SELECT_COLUMNS} WHERE namespace = ?1 AND name = ?2 ORDER BY updated_at DESC"
                        ),
                        params![namespace, name],
                    )?,
                    _ => return Ok(None),
                };
                Ok(candidates.into_iter().find(|vm| options.matches(vm)))
            })
            .await?;
        Ok(found)
    }

    async fn get_all(&self, namespace: Option<&str>) -> Result<Vec<MicroVm>> {
        let namespace = namespace.map(str::to_string);
        let vms = self
            .with_conn(move |conn| match namespace {
                Some(ns) => load(
                    conn,
                    &format!("{SELECT_COLUMNS} WHERE namespace = ?1 ORDER BY name, uid"),
                    params![ns],
                ),
                None => load(
                    conn,
                    &format!("{SELECT_COLUMNS} ORDER BY namespace, name, uid"),
                    [],
                ),
            })
            .await?;
        Ok(vms)
    }

    async fn exists(&self, id: &VmId) -> Result<bool> {
        Ok(self.get(GetOptions::by_id(id)).await?.is_some())
    }

    async fn release_lease(&self, vm: &MicroVm) -> Result<()> {
        let key = RowKey::from(&vm.id);
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE microvms SET lease = NULL WHERE namespace = ?1 AND name = ?2 AND uid = ?3",
                params![key.namespace, key.name, key.uid],
            )?;
            Ok(())
        })
        .await?;
        Ok(())
    }
}
