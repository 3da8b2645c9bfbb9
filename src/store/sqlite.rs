//! SQLite-backed store.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::model::{
    AuditEntry, Certificate, InboundDefinition, OutboundDefinition, Protocol, RowId, SettingsBlob,
    TenantCredential, Traffic, TrafficRow, TrafficSubject,
};
use crate::store::{Store, StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS inbounds (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  tag             TEXT NOT NULL UNIQUE,
  protocol        TEXT NOT NULL,
  listen          TEXT NOT NULL DEFAULT '0.0.0.0',
  port            INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
  settings        TEXT NOT NULL DEFAULT '',
  stream_settings TEXT NOT NULL DEFAULT '',
  sniffing        TEXT NOT NULL DEFAULT '',
  enabled         INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS outbounds (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  tag             TEXT NOT NULL UNIQUE,
  protocol        TEXT NOT NULL,
  settings        TEXT NOT NULL DEFAULT '',
  stream_settings TEXT NOT NULL DEFAULT '',
  proxy_settings  TEXT NOT NULL DEFAULT '',
  mux             TEXT NOT NULL DEFAULT '',
  enabled         INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS clients (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  uuid            TEXT NOT NULL UNIQUE,
  label           TEXT NOT NULL DEFAULT '',
  enabled         INTEGER NOT NULL DEFAULT 1,
  quota_bytes     INTEGER NOT NULL DEFAULT 0,
  used_bytes      INTEGER NOT NULL DEFAULT 0,
  expires_at      INTEGER
);

-- The engine reports tenant counters under the label, so labels must not repeat.
CREATE UNIQUE INDEX IF NOT EXISTS idx_clients_label ON clients(label) WHERE label <> '';

CREATE TABLE IF NOT EXISTS inbound_clients (
  inbound_id      INTEGER NOT NULL REFERENCES inbounds(id) ON DELETE CASCADE,
  client_id       INTEGER NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
  PRIMARY KEY (inbound_id, client_id)
);

CREATE TABLE IF NOT EXISTS certificates (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  domain          TEXT NOT NULL UNIQUE,
  expires_at      INTEGER NOT NULL,
  auto_renew      INTEGER NOT NULL DEFAULT 1,
  status          TEXT NOT NULL DEFAULT 'pending',
  last_error      TEXT
);

CREATE TABLE IF NOT EXISTS traffic_stats (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  client_id       INTEGER NOT NULL DEFAULT 0,
  inbound_id      INTEGER NOT NULL DEFAULT 0,
  date            TEXT NOT NULL,
  upload          INTEGER NOT NULL DEFAULT 0,
  download        INTEGER NOT NULL DEFAULT 0,
  UNIQUE (client_id, inbound_id, date)
);

CREATE TABLE IF NOT EXISTS audit_logs (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  action          TEXT NOT NULL,
  resource        TEXT NOT NULL,
  detail          TEXT NOT NULL DEFAULT '',
  created_at      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_traffic_date ON traffic_stats(date);
CREATE INDEX IF NOT EXISTS idx_audit_created ON audit_logs(created_at);
CREATE INDEX IF NOT EXISTS idx_inbound_clients_client ON inbound_clients(client_id);
"#;

const DATE_FORMAT: &str = "%Y-%m-%d";

const TENANT_COLUMNS: &str = "c.id, c.uuid, c.label, c.enabled, c.quota_bytes, c.used_bytes, c.expires_at";

/// Store over a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::with_connection(conn)
    }

    /// A private in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --- write surface used by the admin layer ---

    /// Insert an inbound. Enabled inbounds must not share a port.
    pub fn add_inbound(&self, inbound: &InboundDefinition) -> StoreResult<RowId> {
        let conn = self.conn.lock();
        if inbound.enabled {
            let taken: i64 = conn.query_row(
                "SELECT COUNT(1) FROM inbounds WHERE port = ?1 AND enabled = 1",
                params![inbound.port],
                |r| r.get(0),
            )?;
            if taken > 0 {
                return Err(StoreError::Conflict(format!("port {} already in use", inbound.port)));
            }
        }
        conn.execute(
            "INSERT INTO inbounds(tag, protocol, listen, port, settings, stream_settings, sniffing, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                inbound.tag,
                inbound.protocol.as_str(),
                inbound.listen,
                inbound.port,
                inbound.settings.as_str(),
                inbound.stream_settings.as_str(),
                inbound.sniffing.as_str(),
                inbound.enabled,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn add_outbound(&self, outbound: &OutboundDefinition) -> StoreResult<RowId> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO outbounds(tag, protocol, settings, stream_settings, proxy_settings, mux, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                outbound.tag,
                outbound.protocol.as_str(),
                outbound.settings.as_str(),
                outbound.stream_settings.as_str(),
                outbound.proxy_settings.as_str(),
                outbound.mux.as_str(),
                outbound.enabled,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a tenant. Its stats key (label, else uuid) must not match any
    /// other tenant's.
    pub fn add_tenant(&self, tenant: &TenantCredential) -> StoreResult<RowId> {
        let conn = self.conn.lock();
        let key = tenant.stats_key();
        let taken: i64 = conn.query_row(
            "SELECT COUNT(1) FROM clients
             WHERE (label <> '' AND label = ?1) OR (label = '' AND uuid = ?1)",
            params![key],
            |r| r.get(0),
        )?;
        if taken > 0 {
            return Err(StoreError::Conflict(format!("tenant key '{}' already in use", key)));
        }
        conn.execute(
            "INSERT INTO clients(uuid, label, enabled, quota_bytes, used_bytes, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tenant.id.to_string(),
                tenant.label,
                tenant.enabled,
                to_sql_int(tenant.quota_bytes),
                to_sql_int(tenant.used_bytes),
                tenant.expires_at.map(|at| at.timestamp()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Attach a tenant to an inbound. Attaching twice is a no-op.
    pub fn attach(&self, inbound: RowId, tenant: RowId) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO inbound_clients(inbound_id, client_id) VALUES (?1, ?2)",
            params![inbound, tenant],
        )?;
        Ok(())
    }

    pub fn add_certificate(&self, cert: &Certificate) -> StoreResult<RowId> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO certificates(domain, expires_at, auto_renew, status, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![cert.domain, cert.expires_at.timestamp(), cert.auto_renew, cert.status, cert.last_error],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn certificate(&self, id: RowId) -> StoreResult<Certificate> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT id, domain, expires_at, auto_renew, status, last_error FROM certificates WHERE id = ?1",
                params![id],
                RawCertificate::from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("certificate {}", id)))?;
        raw.into_certificate()
    }

    pub fn add_audit_entry(&self, entry: &AuditEntry) -> StoreResult<RowId> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO audit_logs(action, resource, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![entry.action, entry.resource, entry.detail, entry.created_at.timestamp()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn tenant(&self, row_id: RowId) -> StoreResult<TenantCredential> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM clients c WHERE c.id = ?1", TENANT_COLUMNS);
        let raw = conn
            .query_row(&sql, params![row_id], RawTenant::from_row)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("tenant {}", row_id)))?;
        raw.into_tenant()
    }

    /// All rows for a subject, oldest date first.
    pub fn traffic_rows(&self, subject: TrafficSubject) -> StoreResult<Vec<TrafficRow>> {
        let (client_id, inbound_id) = subject_columns(subject);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date, upload, download FROM traffic_stats
             WHERE client_id = ?1 AND inbound_id = ?2 ORDER BY date ASC",
        )?;
        let raw = stmt
            .query_map(params![client_id, inbound_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(date, upload, download)| {
                Ok(TrafficRow {
                    subject,
                    date: parse_date(&date)?,
                    traffic: Traffic::new(from_sql_int(upload), from_sql_int(download)),
                })
            })
            .collect()
    }

    pub fn audit_entries(&self) -> StoreResult<Vec<AuditEntry>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, action, resource, detail, created_at FROM audit_logs ORDER BY id")?;
        let raw = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(id, action, resource, detail, created_at)| {
                Ok(AuditEntry {
                    id,
                    action,
                    resource,
                    detail,
                    created_at: parse_timestamp(created_at)?,
                })
            })
            .collect()
    }

    fn query_tenants<P: rusqlite::Params>(&self, sql: &str, args: P) -> StoreResult<Vec<TenantCredential>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(args, RawTenant::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawTenant::into_tenant).collect()
    }
}

impl Store for SqliteStore {
    fn enabled_inbounds(&self) -> StoreResult<Vec<InboundDefinition>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tag, protocol, listen, port, settings, stream_settings, sniffing, enabled
             FROM inbounds WHERE enabled = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(InboundDefinition {
                    id: r.get(0)?,
                    tag: r.get(1)?,
                    protocol: parse_protocol(r.get::<_, String>(2)?),
                    listen: r.get(3)?,
                    port: r.get(4)?,
                    settings: SettingsBlob::new(r.get::<_, String>(5)?),
                    stream_settings: SettingsBlob::new(r.get::<_, String>(6)?),
                    sniffing: SettingsBlob::new(r.get::<_, String>(7)?),
                    enabled: r.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn enabled_outbounds(&self) -> StoreResult<Vec<OutboundDefinition>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, tag, protocol, settings, stream_settings, proxy_settings, mux, enabled
             FROM outbounds WHERE enabled = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(OutboundDefinition {
                    id: r.get(0)?,
                    tag: r.get(1)?,
                    protocol: parse_protocol(r.get::<_, String>(2)?),
                    settings: SettingsBlob::new(r.get::<_, String>(3)?),
                    stream_settings: SettingsBlob::new(r.get::<_, String>(4)?),
                    proxy_settings: SettingsBlob::new(r.get::<_, String>(5)?),
                    mux: SettingsBlob::new(r.get::<_, String>(6)?),
                    enabled: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn enabled_members(&self, inbound: RowId) -> StoreResult<Vec<TenantCredential>> {
        let sql = format!(
            "SELECT {} FROM clients c
             JOIN inbound_clients ic ON ic.client_id = c.id
             WHERE ic.inbound_id = ?1 AND c.enabled = 1 ORDER BY c.id",
            TENANT_COLUMNS
        );
        self.query_tenants(&sql, params![inbound])
    }

    fn inbound_keys(&self) -> StoreResult<HashMap<String, RowId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT tag, id FROM inbounds")?;
        let keys = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(keys)
    }

    fn tenant_keys(&self) -> StoreResult<HashMap<String, RowId>> {
        let sql = format!("SELECT {} FROM clients c ORDER BY c.id", TENANT_COLUMNS);
        let tenants = self.query_tenants(&sql, [])?;
        Ok(tenants.into_iter().map(|t| (t.stats_key(), t.row_id)).collect())
    }

    fn record_tenant_traffic(&self, tenant: RowId, date: NaiveDate, traffic: Traffic) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE clients SET used_bytes = used_bytes + ?1 WHERE id = ?2",
            params![to_sql_int(traffic.total()), tenant],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("tenant {}", tenant)));
        }
        upsert_traffic(&tx, TrafficSubject::Tenant(tenant), date, traffic)?;
        tx.commit()?;
        Ok(())
    }

    fn record_traffic(&self, subject: TrafficSubject, date: NaiveDate, traffic: Traffic) -> StoreResult<()> {
        upsert_traffic(&self.conn.lock(), subject, date, traffic)
    }

    fn tenants_due_for_disable(&self, now: DateTime<Utc>) -> StoreResult<Vec<TenantCredential>> {
        let sql = format!("SELECT {} FROM clients c WHERE c.enabled = 1 ORDER BY c.id", TENANT_COLUMNS);
        let tenants = self.query_tenants(&sql, [])?;
        Ok(tenants.into_iter().filter(|t| t.should_disable(now)).collect())
    }

    fn disable_tenant(&self, tenant: RowId) -> StoreResult<()> {
        let updated = self
            .conn
            .lock()
            .execute("UPDATE clients SET enabled = 0 WHERE id = ?1", params![tenant])?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("tenant {}", tenant)));
        }
        Ok(())
    }

    fn expiring_certificates(&self, horizon: DateTime<Utc>) -> StoreResult<Vec<Certificate>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, domain, expires_at, auto_renew, status, last_error FROM certificates
             WHERE expires_at < ?1 AND status = 'active' ORDER BY id",
        )?;
        let raw = stmt
            .query_map(params![horizon.timestamp()], RawCertificate::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawCertificate::into_certificate).collect()
    }

    fn mark_certificate_renewed(&self, id: RowId, expires_at: DateTime<Utc>) -> StoreResult<()> {
        let updated = self.conn.lock().execute(
            "UPDATE certificates SET expires_at = ?1, status = 'active', last_error = NULL WHERE id = ?2",
            params![expires_at.timestamp(), id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("certificate {}", id)));
        }
        Ok(())
    }

    fn mark_certificate_failed(&self, id: RowId, error: &str) -> StoreResult<()> {
        let updated = self.conn.lock().execute(
            "UPDATE certificates SET status = 'error', last_error = ?1 WHERE id = ?2",
            params![error, id],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("certificate {}", id)));
        }
        Ok(())
    }

    fn prune_traffic(&self, before: NaiveDate) -> StoreResult<usize> {
        let removed = self.conn.lock().execute(
            "DELETE FROM traffic_stats WHERE date < ?1",
            params![before.format(DATE_FORMAT).to_string()],
        )?;
        Ok(removed)
    }

    fn prune_audit(&self, before: DateTime<Utc>) -> StoreResult<usize> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM audit_logs WHERE created_at < ?1", params![before.timestamp()])?;
        Ok(removed)
    }

    fn snapshot_to(&self, dest: &Path) -> StoreResult<()> {
        let dest = dest
            .to_str()
            .ok_or_else(|| StoreError::Conflict(format!("non UTF-8 snapshot path {:?}", dest)))?;
        self.conn.lock().execute("VACUUM INTO ?1", params![dest])?;
        Ok(())
    }
}

/// Tenant row before uuid/timestamp decoding.
struct RawTenant {
    row_id: i64,
    uuid: String,
    label: String,
    enabled: bool,
    quota_bytes: i64,
    used_bytes: i64,
    expires_at: Option<i64>,
}

impl RawTenant {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_id: r.get(0)?,
            uuid: r.get(1)?,
            label: r.get(2)?,
            enabled: r.get(3)?,
            quota_bytes: r.get(4)?,
            used_bytes: r.get(5)?,
            expires_at: r.get(6)?,
        })
    }

    fn into_tenant(self) -> StoreResult<TenantCredential> {
        let id = Uuid::parse_str(&self.uuid)
            .map_err(|e| StoreError::Corrupt(format!("tenant {} uuid '{}': {}", self.row_id, self.uuid, e)))?;
        Ok(TenantCredential {
            row_id: self.row_id,
            id,
            label: self.label,
            enabled: self.enabled,
            quota_bytes: from_sql_int(self.quota_bytes),
            used_bytes: from_sql_int(self.used_bytes),
            expires_at: self.expires_at.map(parse_timestamp).transpose()?,
        })
    }
}

struct RawCertificate {
    id: i64,
    domain: String,
    expires_at: i64,
    auto_renew: bool,
    status: String,
    last_error: Option<String>,
}

impl RawCertificate {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            domain: r.get(1)?,
            expires_at: r.get(2)?,
            auto_renew: r.get(3)?,
            status: r.get(4)?,
            last_error: r.get(5)?,
        })
    }

    fn into_certificate(self) -> StoreResult<Certificate> {
        Ok(Certificate {
            id: self.id,
            domain: self.domain,
            expires_at: parse_timestamp(self.expires_at)?,
            auto_renew: self.auto_renew,
            status: self.status,
            last_error: self.last_error,
        })
    }
}

/// Increment a subject's row for `date`, creating it if missing.
fn upsert_traffic(conn: &Connection, subject: TrafficSubject, date: NaiveDate, traffic: Traffic) -> StoreResult<()> {
    let (client_id, inbound_id) = subject_columns(subject);
    conn.execute(
        "INSERT INTO traffic_stats(client_id, inbound_id, date, upload, download)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(client_id, inbound_id, date) DO UPDATE SET
           upload = upload + excluded.upload,
           download = download + excluded.download",
        params![
            client_id,
            inbound_id,
            date.format(DATE_FORMAT).to_string(),
            to_sql_int(traffic.upload),
            to_sql_int(traffic.download),
        ],
    )?;
    Ok(())
}

fn parse_protocol(raw: String) -> Protocol {
    match raw.parse() {
        Ok(protocol) => protocol,
        Err(never) => match never {},
    }
}

fn subject_columns(subject: TrafficSubject) -> (RowId, RowId) {
    match subject {
        TrafficSubject::Tenant(id) => (id, 0),
        TrafficSubject::Inbound(id) => (0, id),
    }
}

fn parse_date(raw: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| StoreError::Corrupt(format!("date '{}': {}", raw, e)))
}

fn parse_timestamp(secs: i64) -> StoreResult<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {}", secs)))
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
