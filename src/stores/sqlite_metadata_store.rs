use crate::errors::{BrokerError, BrokerResult};
use crate::models::{ApiStatus, AuthFlavor, Connection, EntryFilter, RegistryEntry};
use crate::stores::MetadataStore;
use crate::utils::fs_atomic::ensure_dir_for_file;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    name          TEXT PRIMARY KEY,
    host          TEXT NOT NULL,
    base_path     TEXT,
    auth_flavor   TEXT NOT NULL,
    secret_scope  TEXT,
    secret_key    TEXT,
    api_key_param TEXT,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS registry_entries (
    api_id              TEXT PRIMARY KEY,
    api_name            TEXT NOT NULL UNIQUE,
    description         TEXT,
    connection_name     TEXT NOT NULL,
    documentation_url   TEXT,
    available_endpoints TEXT NOT NULL DEFAULT '[]',
    example_calls       TEXT NOT NULL DEFAULT '[]',
    status              TEXT NOT NULL,
    validation_message  TEXT,
    created_at          TEXT NOT NULL,
    modified_date       TEXT NOT NULL,
    requested_by        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS registry_entries_connection ON registry_entries(connection_name);
"#;

const CONNECTION_COLUMNS: &str =
    "name, host, base_path, auth_flavor, secret_scope, secret_key, api_key_param, created_at";
const ENTRY_COLUMNS: &str = "api_id, api_name, description, connection_name, documentation_url, \
     available_endpoints, example_calls, status, validation_message, created_at, modified_date, requested_by";

/// SQLite-backed metadata store. All statements run on the blocking pool.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteMetadataStore {
    pub fn open(path: impl AsRef<Path>) -> BrokerResult<Self> {
        let path = path.as_ref();
        ensure_dir_for_file(path)
            .map_err(|err| BrokerError::store(format!("create parent of {}: {}", path.display(), err)))?;
        let conn = rusqlite::Connection::open(path).map_err(sql_error)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> BrokerResult<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(sql_error)?;
        Self::init(conn)
    }

    fn init(conn: rusqlite::Connection) -> BrokerResult<Self> {
        conn.execute_batch(SCHEMA).map_err(sql_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> BrokerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> BrokerResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|err| err.into_inner());
            f(&guard)
        })
        .await
        .map_err(|err| BrokerError::store(format!("sqlite worker failed: {}", err)))?
    }
}

fn sql_error(err: rusqlite::Error) -> BrokerError {
    BrokerError::store(err.to_string())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_time(raw: &str) -> BrokerResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| BrokerError::store(format!("bad timestamp '{}': {}", raw, err)))
}

struct ConnectionRow {
    name: String,
    host: String,
    base_path: Option<String>,
    auth_flavor: String,
    secret_scope: Option<String>,
    secret_key: Option<String>,
    api_key_param: Option<String>,
    created_at: String,
}

impl ConnectionRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            host: row.get(1)?,
            base_path: row.get(2)?,
            auth_flavor: row.get(3)?,
            secret_scope: row.get(4)?,
            secret_key: row.get(5)?,
            api_key_param: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_connection(self) -> BrokerResult<Connection> {
        let auth_flavor: AuthFlavor = self
            .auth_flavor
            .parse()
            .map_err(|_| BrokerError::store(format!("connection '{}' has unknown auth flavor", self.name)))?;
        let connection = Connection {
            name: self.name,
            host: self.host,
            base_path: self.base_path,
            auth_flavor,
            secret_scope: self.secret_scope,
            secret_key: self.secret_key,
            api_key_param: self.api_key_param,
            created_at: parse_time(&self.created_at)?,
        };
        connection.check_invariants()?;
        Ok(connection)
    }
}

struct EntryRow {
    api_id: String,
    api_name: String,
    description: Option<String>,
    connection_name: String,
    documentation_url: Option<String>,
    available_endpoints: String,
    example_calls: String,
    status: String,
    validation_message: Option<String>,
    created_at: String,
    modified_date: String,
    requested_by: String,
}

impl EntryRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            api_id: row.get(0)?,
            api_name: row.get(1)?,
            description: row.get(2)?,
            connection_name: row.get(3)?,
            documentation_url: row.get(4)?,
            available_endpoints: row.get(5)?,
            example_calls: row.get(6)?,
            status: row.get(7)?,
            validation_message: row.get(8)?,
            created_at: row.get(9)?,
            modified_date: row.get(10)?,
            requested_by: row.get(11)?,
        })
    }

    fn into_entry(self) -> BrokerResult<RegistryEntry> {
        let json_error = |err: serde_json::Error| BrokerError::store(err.to_string());
        Ok(RegistryEntry {
            available_endpoints: serde_json::from_str(&self.available_endpoints).map_err(json_error)?,
            example_calls: serde_json::from_str(&self.example_calls).map_err(json_error)?,
            status: self.status.parse::<ApiStatus>().map_err(|err| BrokerError::store(err.to_string()))?,
            created_at: parse_time(&self.created_at)?,
            modified_date: parse_time(&self.modified_date)?,
            api_id: self.api_id,
            api_name: self.api_name,
            description: self.description,
            connection_name: self.connection_name,
            documentation_url: self.documentation_url,
            validation_message: self.validation_message,
            requested_by: self.requested_by,
        })
    }
}

fn query_entries(
    conn: &rusqlite::Connection,
    clause: &str,
    args: &[&dyn rusqlite::ToSql],
) -> BrokerResult<Vec<RegistryEntry>> {
    let sql = format!("SELECT {} FROM registry_entries {}", ENTRY_COLUMNS, clause);
    let mut stmt = conn.prepare(&sql).map_err(sql_error)?;
    let rows = stmt
        .query_map(args, EntryRow::read)
        .map_err(sql_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(sql_error)?;
    rows.into_iter().map(EntryRow::into_entry).collect()
}

fn entry_params(entry: &RegistryEntry) -> BrokerResult<(String, String)> {
    let endpoints = serde_json::to_string(&entry.available_endpoints)
        .map_err(|err| BrokerError::store(err.to_string()))?;
    let examples = serde_json::to_string(&entry.example_calls)
        .map_err(|err| BrokerError::store(err.to_string()))?;
    Ok((endpoints, examples))
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert_connection(&self, connection: &Connection) -> BrokerResult<()> {
        let c = connection.clone();
        self.with_conn(move |conn| {
            let sql = format!(
                "INSERT INTO connections ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                CONNECTION_COLUMNS
            );
            conn.execute(
                &sql,
                params![
                    c.name,
                    c.host,
                    c.base_path,
                    c.auth_flavor.as_str(),
                    c.secret_scope,
                    c.secret_key,
                    c.api_key_param,
                    c.created_at.to_rfc3339(),
                ],
            )
            .map_err(|err| {
                if is_unique_violation(&err) {
                    BrokerError::duplicate("connection", &c.name)
                } else {
                    sql_error(err)
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn get_connection(&self, name: &str) -> BrokerResult<Option<Connection>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM connections WHERE name = ?1", CONNECTION_COLUMNS);
            let row = conn
                .query_row(&sql, params![name], ConnectionRow::read)
                .optional()
                .map_err(sql_error)?;
            row.map(ConnectionRow::into_connection).transpose()
        })
        .await
    }

    async fn delete_connection(&self, name: &str) -> BrokerResult<bool> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM connections WHERE name = ?1", params![name])
                .map_err(sql_error)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list_connections(&self) -> BrokerResult<Vec<Connection>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM connections ORDER BY name", CONNECTION_COLUMNS);
            let mut stmt = conn.prepare(&sql).map_err(sql_error)?;
            let rows = stmt
                .query_map([], ConnectionRow::read)
                .map_err(sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(sql_error)?;
            rows.into_iter().map(ConnectionRow::into_connection).collect()
        })
        .await
    }

    async fn insert_entry(&self, entry: &RegistryEntry) -> BrokerResult<()> {
        let e = entry.clone();
        let (endpoints, examples) = entry_params(&e)?;
        self.with_conn(move |conn| {
            let sql = format!(
                "INSERT INTO registry_entries ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                ENTRY_COLUMNS
            );
            conn.execute(
                &sql,
                params![
                    e.api_id,
                    e.api_name,
                    e.description,
                    e.connection_name,
                    e.documentation_url,
                    endpoints,
                    examples,
                    e.status.as_str(),
                    e.validation_message,
                    e.created_at.to_rfc3339(),
                    e.modified_date.to_rfc3339(),
                    e.requested_by,
                ],
            )
            .map_err(|err| {
                if is_unique_violation(&err) {
                    BrokerError::duplicate("api", &e.api_name)
                } else {
                    sql_error(err)
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn get_entry(&self, api_id: &str) -> BrokerResult<Option<RegistryEntry>> {
        let api_id = api_id.to_string();
        self.with_conn(move |conn| {
            Ok(query_entries(conn, "WHERE api_id = ?1", &[&api_id])?.into_iter().next())
        })
        .await
    }

    async fn find_entry_by_name(&self, api_name: &str) -> BrokerResult<Option<RegistryEntry>> {
        let api_name = api_name.to_string();
        self.with_conn(move |conn| {
            Ok(query_entries(conn, "WHERE api_name = ?1", &[&api_name])?.into_iter().next())
        })
        .await
    }

    async fn update_entry(&self, entry: &RegistryEntry) -> BrokerResult<()> {
        let e = entry.clone();
        let (endpoints, examples) = entry_params(&e)?;
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE registry_entries SET api_name = ?2, description = ?3, connection_name = ?4, \
                     documentation_url = ?5, available_endpoints = ?6, example_calls = ?7, status = ?8, \
                     validation_message = ?9, modified_date = ?10, requested_by = ?11 WHERE api_id = ?1",
                    params![
                        e.api_id,
                        e.api_name,
                        e.description,
                        e.connection_name,
                        e.documentation_url,
                        endpoints,
                        examples,
                        e.status.as_str(),
                        e.validation_message,
                        e.modified_date.to_rfc3339(),
                        e.requested_by,
                    ],
                )
                .map_err(sql_error)?;
            if changed == 0 {
                return Err(BrokerError::not_found("api", &e.api_id));
            }
            Ok(())
        })
        .await
    }

    async fn delete_entry(&self, api_id: &str) -> BrokerResult<bool> {
        let api_id = api_id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM registry_entries WHERE api_id = ?1", params![api_id])
                .map_err(sql_error)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list_entries(&self, filter: &EntryFilter) -> BrokerResult<Vec<RegistryEntry>> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let all = query_entries(conn, "ORDER BY modified_date DESC", &[])?;
            Ok(all.into_iter().filter(|entry| filter.matches(entry)).collect())
        })
        .await
    }
}
