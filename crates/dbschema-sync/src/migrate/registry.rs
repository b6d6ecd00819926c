//! Grain registry kept in the system schema.
//!
//! One row per grain records the version, length and checksum of the
//! definition last applied, and a state driving the upgrade loop:
//!
//! ```text
//!   (no row) -> RECOVER -> UPGRADING -> READY
//!                              |
//!                              +------> ERROR
//! ```
//!
//! `LOCK` is set by operators to freeze a grain. A run refuses to start while
//! any grain is `UPGRADING` or `ERROR`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::adapter::Adapter;
use crate::core::schema::{Column, ColumnKind, DefaultValue, GrainChecksum, Table};
use crate::core::traits::Connection;
use crate::error::{MigrateError, Result};
use crate::migrate::version::{VersionOrdering, VersionString};

/// Registry table name inside the system schema.
pub const GRAINS_TABLE: &str = "grains";

/// Checksum placeholder of rows not yet applied.
const NO_CHECKSUM: &str = "00000000";

/// Lifecycle state of a grain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GrainState {
    Ready,
    Upgrading,
    Error,
    Recover,
    Lock,
}

impl GrainState {
    pub fn code(self) -> i64 {
        match self {
            GrainState::Ready => 0,
            GrainState::Upgrading => 1,
            GrainState::Error => 2,
            GrainState::Recover => 3,
            GrainState::Lock => 4,
        }
    }

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(GrainState::Ready),
            1 => Ok(GrainState::Upgrading),
            2 => Ok(GrainState::Error),
            3 => Ok(GrainState::Recover),
            4 => Ok(GrainState::Lock),
            other => Err(MigrateError::Registry(format!("Unknown grain state {}", other))),
        }
    }

    /// States a run may start from.
    pub fn is_startable(self) -> bool {
        matches!(self, GrainState::Ready | GrainState::Recover | GrainState::Lock)
    }
}

impl fmt::Display for GrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GrainState::Ready => "READY",
            GrainState::Upgrading => "UPGRADING",
            GrainState::Error => "ERROR",
            GrainState::Recover => "RECOVER",
            GrainState::Lock => "LOCK",
        };
        f.write_str(s)
    }
}

/// One registry row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrainRecord {
    pub id: String,
    pub version: String,
    pub length: i64,
    pub checksum: String,
    pub state: GrainState,
    pub message: String,
}

/// Registry operations for one system schema.
pub struct Registry<'a> {
    adapter: &'a Adapter,
    table: Table,
}

impl<'a> Registry<'a> {
    pub fn new(adapter: &'a Adapter, sys_schema: &str) -> Self {
        Self {
            adapter,
            table: grains_table(sys_schema),
        }
    }

    /// Definition of the registry table.
    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn sys_schema(&self) -> &str {
        &self.table.schema
    }

    pub async fn exists(&self, conn: &mut dyn Connection) -> Result<bool> {
        self.adapter
            .table_exists(conn, &self.table.schema, &self.table.name)
            .await
    }

    /// Create the system schema, system objects and registry table.
    ///
    /// Refuses to take over a database that already holds user tables unless
    /// `force` is set.
    pub async fn bootstrap(&self, conn: &mut dyn Connection, force: bool) -> Result<()> {
        let sys = self.sys_schema().to_string();
        let reader = self.adapter.reader();
        let user_tables = reader
            .user_tables_exist(conn, &sys)
            .await
            .map_err(|e| MigrateError::introspection(&sys, e))?;
        if user_tables {
            if !force {
                return Err(MigrateError::Registry(format!(
                    "No {}.{} table found in a non-empty database; set migration.force_initialize to take it over",
                    sys, GRAINS_TABLE
                )));
            }
            warn!("Initializing registry in a non-empty database");
        }

        let d = self.adapter.dialect();
        let mut batch = Vec::new();
        let schema_exists = reader
            .schema_exists(conn, &sys)
            .await
            .map_err(|e| MigrateError::introspection(&sys, e))?;
        if !schema_exists {
            batch.extend(d.create_schema(&sys));
        }
        batch.extend(d.create_sys_objects());
        batch.extend(d.create_table(&self.table));
        info!("Creating grain registry {}", self.table.qualified_name());
        self.adapter.apply(conn, &self.table.qualified_name(), &batch).await
    }

    /// Every registry row keyed by grain name.
    pub async fn load(&self, conn: &mut dyn Connection) -> Result<BTreeMap<String, GrainRecord>> {
        let d = self.adapter.dialect();
        let sql = format!(
            "select {}, {}, {}, {}, {}, {} from {}",
            d.quote("id"),
            d.quote("version"),
            d.quote("length"),
            d.quote("checksum"),
            d.quote("state"),
            d.quote("message"),
            d.table_string(&self.table.schema, &self.table.name)
        );
        let rows = conn
            .query(&sql, &[])
            .await
            .map_err(|e| MigrateError::introspection(self.table.qualified_name(), e))?;
        let mut out = BTreeMap::new();
        for row in &rows {
            let id = row.get_trimmed(0).unwrap_or_default();
            let state = GrainState::from_code(row.get_i64(4).unwrap_or(-1))?;
            out.insert(
                id.clone(),
                GrainRecord {
                    id,
                    version: row.get_trimmed(1).unwrap_or_default(),
                    length: row.get_i64(2).unwrap_or(0),
                    checksum: row.get_trimmed(3).unwrap_or_default(),
                    state,
                    message: row.get_string(5).unwrap_or_default(),
                },
            );
        }
        Ok(out)
    }

    /// Fail unless every row is in a startable state.
    pub fn check_startable(records: &BTreeMap<String, GrainRecord>) -> Result<()> {
        match records.values().find(|r| !r.state.is_startable()) {
            Some(r) => Err(MigrateError::Registry(format!(
                "Cannot proceed: grain {} is in {} state{}",
                r.id,
                r.state,
                if r.message.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", r.message)
                }
            ))),
            None => Ok(()),
        }
    }

    /// Insert a row for a grain seen for the first time.
    pub async fn insert(
        &self,
        conn: &mut dyn Connection,
        id: &str,
        version: &str,
        state: GrainState,
    ) -> Result<()> {
        let d = self.adapter.dialect();
        let sql = format!(
            "insert into {} ({}, {}, {}, {}, {}, {}, {}) values ({}, {}, 0, {}, {}, {}, {})",
            d.table_string(&self.table.schema, &self.table.name),
            d.quote("id"),
            d.quote("version"),
            d.quote("length"),
            d.quote("checksum"),
            d.quote("state"),
            d.quote("lastmodified"),
            d.quote("message"),
            text(d, id),
            text(d, version),
            text(d, NO_CHECKSUM),
            state.code(),
            d.literal(&DefaultValue::Now),
            text(d, "")
        );
        self.write(conn, id, &sql).await
    }

    /// Move a grain to `state` with `message`.
    pub async fn set_state(
        &self,
        conn: &mut dyn Connection,
        id: &str,
        state: GrainState,
        message: &str,
    ) -> Result<()> {
        let d = self.adapter.dialect();
        let sql = format!(
            "update {} set {} = {}, {} = {}, {} = {} where {} = {}",
            d.table_string(&self.table.schema, &self.table.name),
            d.quote("state"),
            state.code(),
            d.quote("lastmodified"),
            d.literal(&DefaultValue::Now),
            d.quote("message"),
            text(d, message),
            d.quote("id"),
            text(d, id)
        );
        self.write(conn, id, &sql).await
    }

    /// Record a successful upgrade.
    pub async fn mark_ready(
        &self,
        conn: &mut dyn Connection,
        id: &str,
        version: &str,
        checksum: &GrainChecksum,
    ) -> Result<()> {
        let d = self.adapter.dialect();
        let sql = format!(
            "update {} set {} = {}, {} = {}, {} = {}, {} = {}, {} = {}, {} = {} where {} = {}",
            d.table_string(&self.table.schema, &self.table.name),
            d.quote("state"),
            GrainState::Ready.code(),
            d.quote("version"),
            text(d, version),
            d.quote("length"),
            checksum.length,
            d.quote("checksum"),
            text(d, &checksum.checksum),
            d.quote("lastmodified"),
            d.literal(&DefaultValue::Now),
            d.quote("message"),
            text(d, ""),
            d.quote("id"),
            text(d, id)
        );
        self.write(conn, id, &sql).await
    }

    /// Record a failed upgrade as `"<version>/<length>/<checksum>: <error>"`.
    pub async fn mark_error(
        &self,
        conn: &mut dyn Connection,
        id: &str,
        version: &str,
        checksum: &GrainChecksum,
        error: &str,
    ) -> Result<()> {
        let message = format!(
            "{}/{}/{}: {}",
            version, checksum.length, checksum.checksum, error
        );
        self.set_state(conn, id, GrainState::Error, &message).await
    }

    async fn write(&self, conn: &mut dyn Connection, id: &str, sql: &str) -> Result<()> {
        let object = format!("{}.{}", self.table.qualified_name(), id);
        self.adapter.apply(conn, &object, &[sql.to_string()]).await
    }
}

fn text(d: &dyn crate::dialect::Dialect, value: &str) -> String {
    d.literal(&DefaultValue::Text(value.to_string()))
}

/// The registry table in `sys_schema`.
pub fn grains_table(sys_schema: &str) -> Table {
    let mut message = Column::new("message", ColumnKind::String);
    message.max = true;
    Table::new(sys_schema, GRAINS_TABLE)
        .with_column(Column::string("id", 30).not_null())
        .with_column(Column::string("version", 2000).not_null())
        .with_column(Column::new("length", ColumnKind::Integer).not_null())
        .with_column(Column::string("checksum", 8).not_null())
        .with_column(Column::new("state", ColumnKind::Integer).not_null())
        .with_column(
            Column::new("lastmodified", ColumnKind::DateTime)
                .not_null()
                .with_default(DefaultValue::Now),
        )
        .with_column(message)
        .with_pk(&["id"])
}

/// What to do with one desired grain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrainAction {
    /// Apply the grain's object phases.
    Upgrade,
    /// Leave the grain alone, with the reason.
    Skip(&'static str),
}

/// Decide whether the grain at `version`/`checksum` must be upgraded given its
/// registry row.
pub fn decide(
    id: &str,
    version: &VersionString,
    checksum: &GrainChecksum,
    record: Option<&GrainRecord>,
) -> Result<GrainAction> {
    let Some(record) = record else {
        return Ok(GrainAction::Upgrade);
    };
    match record.state {
        GrainState::Lock => return Ok(GrainAction::Skip("locked")),
        GrainState::Recover => return Ok(GrainAction::Upgrade),
        GrainState::Ready => {}
        GrainState::Upgrading | GrainState::Error => {
            return Err(MigrateError::Registry(format!(
                "Cannot proceed: grain {} is in {} state",
                id, record.state
            )))
        }
    }
    let stored = VersionString::parse(&record.version).map_err(|e| {
        MigrateError::Registry(format!("Grain {} has unreadable stored version: {}", id, e))
    })?;
    match version.compare(&stored) {
        VersionOrdering::Greater => Ok(GrainAction::Upgrade),
        VersionOrdering::Equals => {
            if record.length != checksum.length || record.checksum != checksum.checksum {
                Ok(GrainAction::Upgrade)
            } else {
                Ok(GrainAction::Skip("up to date"))
            }
        }
        ordering => Err(MigrateError::Registry(format!(
            "Grain {} version {} is {} compared to stored version {}",
            id, version, ordering, record.version
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DbType;

    fn record(state: GrainState) -> GrainRecord {
        GrainRecord {
            id: "shop".into(),
            version: "1.0".into(),
            length: 10,
            checksum: "ABCDEF01".into(),
            state,
            message: String::new(),
        }
    }

    #[test]
    fn test_state_codes() {
        for state in [
            GrainState::Ready,
            GrainState::Upgrading,
            GrainState::Error,
            GrainState::Recover,
            GrainState::Lock,
        ] {
            assert_eq!(GrainState::from_code(state.code()).unwrap(), state);
        }
        assert!(matches!(GrainState::from_code(9), Err(MigrateError::Registry(_))));
    }

    #[test]
    fn test_check_startable() {
        let mut records = BTreeMap::new();
        records.insert("shop".to_string(), record(GrainState::Lock));
        assert!(Registry::check_startable(&records).is_ok());
        let mut failed = record(GrainState::Error);
        failed.message = "boom".into();
        records.insert("crm".to_string(), GrainRecord { id: "crm".into(), ..failed });
        let err = Registry::check_startable(&records).unwrap_err();
        assert!(err.to_string().contains("crm is in ERROR state (boom)"));
    }

    #[test]
    fn test_decide_follows_versions_and_checksums() {
        let sum = GrainChecksum {
            length: 10,
            checksum: "ABCDEF01".into(),
        };
        let v = |s: &str| VersionString::parse(s).unwrap();
        let ready = record(GrainState::Ready);

        assert_eq!(decide("shop", &v("1.0"), &sum, None).unwrap(), GrainAction::Upgrade);
        assert_eq!(
            decide("shop", &v("1.0"), &sum, Some(&ready)).unwrap(),
            GrainAction::Skip("up to date")
        );
        assert_eq!(decide("shop", &v("1.1"), &sum, Some(&ready)).unwrap(), GrainAction::Upgrade);

        let changed = GrainChecksum {
            length: 11,
            ..sum.clone()
        };
        assert_eq!(
            decide("shop", &v("1.0"), &changed, Some(&ready)).unwrap(),
            GrainAction::Upgrade
        );
        assert!(matches!(
            decide("shop", &v("0.9"), &sum, Some(&ready)),
            Err(MigrateError::Registry(_))
        ));
        assert_eq!(
            decide("shop", &v("0.9"), &sum, Some(&record(GrainState::Lock))).unwrap(),
            GrainAction::Skip("locked")
        );
        assert_eq!(
            decide("shop", &v("0.9"), &sum, Some(&record(GrainState::Recover))).unwrap(),
            GrainAction::Upgrade
        );
    }

    #[test]
    fn test_grains_table_renders_per_dialect() {
        let table = grains_table("dbschema");
        let pg = Adapter::for_db_type(DbType::Postgres, "dbschema");
        let sql = pg.dialect().create_table(&table).join("\n");
        assert!(sql.starts_with("create table \"dbschema\".\"grains\""));
        let embedded = Adapter::for_db_type(DbType::Embedded, "dbschema");
        let sql = embedded.dialect().create_table(&table).join("\n");
        assert!(sql.contains("\"dbschema_grains\""));
    }
}
