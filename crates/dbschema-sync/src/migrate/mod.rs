//! Differ/applier: brings a live database in line with the authored score.
//!
//! A run walks the grains in dependency order. For each grain whose
//! registry row calls for an upgrade, the object phases compare the catalog
//! with the desired definitions and apply one committed batch per object:
//!
//! 1. create the schema namespace
//! 2. drop views and parameterized views (recreated at the end)
//! 3. drop orphaned tables, indices and foreign keys
//! 4. create or alter sequences
//! 5. create or alter tables in foreign-key order
//! 6. create indices and foreign keys
//! 7. create views and parameterized views
//! 8. refresh materialized views and their maintenance triggers
//!
//! The same phases run in dry-run mode for [`Migrator::plan`], recording each
//! decision instead of executing it.

pub mod plan;
pub mod registry;
pub mod version;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapter::Adapter;
use crate::config::MigrationConfig;
use crate::core::identifier::validate_identifier;
use crate::core::meta::{DbColumnInfo, DbFkInfo, DbIndexInfo, DbPkInfo, DbSequenceInfo};
use crate::core::schema::{Column, Grain, Score, Sequence, Table};
use crate::core::traits::Connection;
use crate::dialect::{mview, Dialect, TriggerEvent};
use crate::error::{MigrateError, Result};

pub use plan::{Decision, ObjectKind, Plan, PlannedObject};
pub use registry::{GrainAction, GrainRecord, GrainState, Registry};
pub use version::{VersionOrdering, VersionString};

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Grains upgraded by this run.
    pub grains_applied: Vec<String>,

    /// Grains left untouched (up to date or locked).
    pub grains_skipped: Vec<String>,

    /// Every decision taken, in execution order.
    pub plan: Plan,
}

impl MigrationReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Schema migration engine.
pub struct Migrator {
    adapter: Adapter,
    score: Score,
    options: MigrationConfig,
}

impl Migrator {
    /// Create a migrator after checking that every object of `score` can be
    /// rendered for the adapter's dialect.
    pub fn new(adapter: Adapter, score: Score, options: MigrationConfig) -> Result<Self> {
        validate_identifier(&options.system_schema)
            .map_err(|e| MigrateError::Config(format!("migration.system_schema: {}", e)))?;
        if score.grain(&options.system_schema).is_some() {
            return Err(MigrateError::Config(format!(
                "Grain {} collides with the system schema",
                options.system_schema
            )));
        }
        for grain in &score.grains {
            VersionString::parse(&grain.version)?;
        }
        plan::grain_order(&score)?;
        precheck(adapter.dialect(), &score)?;
        Ok(Self {
            adapter,
            score,
            options,
        })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    /// Apply the score to the database behind `conn`.
    pub async fn migrate(&self, conn: &mut dyn Connection) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        let registry = Registry::new(&self.adapter, &self.options.system_schema);
        if !registry.exists(conn).await? {
            registry
                .bootstrap(conn, self.options.force_initialize)
                .await?;
        }
        let records = registry.load(conn).await?;
        Registry::check_startable(&records)?;

        let mut session = Session::new(&self.adapter, &self.score, &self.options.system_schema, false);
        let mut applied = Vec::new();
        let mut skipped = Vec::new();

        for grain in plan::grain_order(&self.score)? {
            let version = VersionString::parse(&grain.version)?;
            let checksum = grain.checksum()?;
            let record = records.get(&grain.name);
            if let GrainAction::Skip(reason) = registry::decide(&grain.name, &version, &checksum, record)? {
                info!("Grain {}: {}", grain.name, reason);
                session.plan.record(&grain.name, ObjectKind::Grain, &grain.name, Decision::Noop);
                skipped.push(grain.name.clone());
                continue;
            }

            info!("Upgrading grain {} to version {}", grain.name, grain.version);
            if record.is_none() {
                registry
                    .insert(conn, &grain.name, &grain.version, GrainState::Recover)
                    .await?;
            }
            registry
                .set_state(conn, &grain.name, GrainState::Upgrading, "")
                .await?;
            session
                .plan
                .record(&grain.name, ObjectKind::Grain, &grain.name, grain_decision(grain, record));

            match session.update_grain(conn, grain).await {
                Ok(()) => {
                    registry
                        .mark_ready(conn, &grain.name, &grain.version, &checksum)
                        .await?;
                    info!("Grain {} is ready", grain.name);
                    applied.push(grain.name.clone());
                }
                Err(e) => {
                    error!("Grain {} failed: {}", grain.name, e);
                    if let Err(rb) = conn.rollback().await {
                        warn!("Rollback after failure of grain {} failed: {}", grain.name, rb);
                    }
                    if let Err(re) = registry
                        .mark_error(conn, &grain.name, &grain.version, &checksum, &e.to_string())
                        .await
                    {
                        error!("Could not record failure of grain {}: {}", grain.name, re);
                    }
                    return Err(e);
                }
            }
        }

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        info!(
            "Migration run {} complete: {} grain(s) applied, {} skipped in {:.2}s",
            run_id,
            applied.len(),
            skipped.len(),
            duration
        );
        Ok(MigrationReport {
            run_id,
            started_at,
            completed_at,
            duration_seconds: duration,
            grains_applied: applied,
            grains_skipped: skipped,
            plan: session.plan,
        })
    }

    /// Report what [`Migrator::migrate`] would do without changing anything.
    pub async fn plan(&self, conn: &mut dyn Connection) -> Result<Plan> {
        let registry = Registry::new(&self.adapter, &self.options.system_schema);
        let mut session = Session::new(&self.adapter, &self.score, &self.options.system_schema, true);

        let records = if registry.exists(conn).await? {
            let records = registry.load(conn).await?;
            Registry::check_startable(&records)?;
            records
        } else {
            session.plan.record(
                &self.options.system_schema,
                ObjectKind::Table,
                registry::GRAINS_TABLE,
                Decision::Create,
            );
            BTreeMap::new()
        };

        for grain in plan::grain_order(&self.score)? {
            let version = VersionString::parse(&grain.version)?;
            let checksum = grain.checksum()?;
            let record = records.get(&grain.name);
            match registry::decide(&grain.name, &version, &checksum, record)? {
                GrainAction::Skip(_) => {
                    session.plan.record(&grain.name, ObjectKind::Grain, &grain.name, Decision::Noop);
                }
                GrainAction::Upgrade => {
                    session.plan.record(
                        &grain.name,
                        ObjectKind::Grain,
                        &grain.name,
                        grain_decision(grain, record),
                    );
                    session.update_grain(conn, grain).await?;
                }
            }
        }
        Ok(session.plan)
    }
}

fn grain_decision(grain: &Grain, record: Option<&GrainRecord>) -> Decision {
    match record {
        None => Decision::Create,
        Some(r) if r.version != grain.version => {
            Decision::Alter(vec![format!("version {} -> {}", r.version, grain.version)])
        }
        Some(_) => Decision::Alter(vec!["definition".to_string()]),
    }
}

/// Render every view and trigger once so unsupported constructs fail before
/// any DDL runs.
fn precheck(d: &dyn Dialect, score: &Score) -> Result<()> {
    d.check_score(score)?;
    for grain in &score.grains {
        for view in &grain.views {
            d.create_view(view, source_table(grain, &view.from)?)?;
        }
        for pv in &grain.parameterized_views {
            d.create_parameterized_view(pv, source_table(grain, &pv.from)?)?;
        }
        for table in &grain.tables {
            let mvs = grain.materialized_views_of(&table.name);
            if !mvs.is_empty() {
                d.create_mv_triggers(table, &mvs)?;
            }
        }
    }
    Ok(())
}

fn source_table<'g>(grain: &'g Grain, name: &str) -> Result<&'g Table> {
    grain.table(name).ok_or_else(|| {
        MigrateError::Schema(format!("{}: unknown source table {}", grain.name, name))
    })
}

/// State of one run: the objects being compared and the decisions taken.
struct Session<'a> {
    adapter: &'a Adapter,
    score: &'a Score,
    sys_schema: &'a str,
    dry_run: bool,
    plan: Plan,
}

impl<'a> Session<'a> {
    fn new(adapter: &'a Adapter, score: &'a Score, sys_schema: &'a str, dry_run: bool) -> Self {
        Self {
            adapter,
            score,
            sys_schema,
            dry_run,
            plan: Plan::default(),
        }
    }

    fn dialect(&self) -> &'a dyn Dialect {
        self.adapter.dialect()
    }

    /// Record a decision and, unless dry-running, apply its batch.
    async fn step(
        &mut self,
        conn: &mut dyn Connection,
        grain: &str,
        kind: ObjectKind,
        name: &str,
        decision: Decision,
        batch: Vec<String>,
    ) -> Result<()> {
        if decision == Decision::Noop {
            debug!("{} {}.{} is up to date", kind, grain, name);
        } else {
            info!("{} {} {}.{}", decision, kind, grain, name);
            if !self.dry_run {
                self.adapter
                    .apply(conn, &format!("{}.{}", grain, name), &batch)
                    .await?;
            }
        }
        self.plan.record(grain, kind, name, decision);
        Ok(())
    }

    async fn update_grain(&mut self, conn: &mut dyn Connection, grain: &'a Grain) -> Result<()> {
        let d = self.dialect();
        let g = grain.name.as_str();

        if d.uses_schemas() {
            let exists = self
                .adapter
                .reader()
                .schema_exists(conn, g)
                .await
                .map_err(|e| MigrateError::introspection(g, e))?;
            let decision = if exists { Decision::Noop } else { Decision::Create };
            self.step(conn, g, ObjectKind::Schema, g, decision, d.create_schema(g))
                .await?;
        }

        self.drop_views(conn, grain).await?;
        let mut fks = self.adapter.introspect_foreign_keys(conn, g).await?;
        self.drop_orphaned_tables(conn, grain, &mut fks).await?;
        let kept_indices = self.drop_orphaned_indices(conn, grain).await?;
        self.drop_orphaned_fks(conn, grain, &mut fks).await?;
        self.update_sequences(conn, grain).await?;

        let mut modified = BTreeSet::new();
        for table in plan::table_order(grain) {
            if self.update_table(conn, table, &mut fks).await? {
                modified.insert(table.name.clone());
            }
        }

        self.update_indices(conn, grain, kept_indices).await?;
        self.update_fks(conn, grain, fks).await?;
        self.create_views(conn, grain).await?;
        let refreshed = self
            .update_materialized_views(conn, grain, &modified)
            .await?;
        self.update_mv_triggers(conn, grain, &modified, &refreshed)
            .await
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Whether a name listed under `grain` really belongs to a longer grain
    /// (or the system schema) sharing its prefix.
    fn belongs_elsewhere(&self, grain: &str, name: &str) -> bool {
        let d = self.dialect();
        if d.uses_schemas() {
            return false;
        }
        let stored = d.object_name(grain, name);
        self.score
            .grains
            .iter()
            .map(|g| g.name.as_str())
            .chain(std::iter::once(self.sys_schema))
            .any(|other| other.len() > grain.len() && stored.starts_with(&format!("{}_", other)))
    }

    /// Desired child table of a stored foreign key.
    fn owner_of(&self, schema: &str, fk: &DbFkInfo) -> Option<&'a Table> {
        let d = self.dialect();
        self.score
            .grain(schema)?
            .tables
            .iter()
            .find(|t| d.object_name(schema, &t.name) == fk.table_name)
    }

    /// Desired table a stored foreign key points at.
    fn referenced_table(&self, fk: &DbFkInfo) -> Option<&'a Table> {
        let d = self.dialect();
        self.score
            .grains
            .iter()
            .flat_map(|g| g.tables.iter())
            .find(|t| {
                let (grain, table) = d.reference_key(&t.schema, &t.name);
                grain == fk.ref_grain && table == fk.ref_table
            })
    }

    async fn expected_matches(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
        col: &Column,
    ) -> Result<Option<(DbColumnInfo, bool)>> {
        let d = self.dialect();
        let Some(actual) = self.adapter.introspect_column(conn, table, &col.name).await? else {
            return Ok(None);
        };
        let expected = d.canonical_default(table, col);
        let reflects = actual.reflects(col, expected.as_deref());
        Ok(Some((actual, reflects)))
    }

    // =========================================================================
    // Drop phases
    // =========================================================================

    async fn drop_views(&mut self, conn: &mut dyn Connection, grain: &'a Grain) -> Result<()> {
        let d = self.dialect();
        let g = grain.name.as_str();
        let reader = self.adapter.reader();
        let views = reader
            .view_list(conn, g)
            .await
            .map_err(|e| MigrateError::introspection(g, e))?;
        let views: Vec<String> = views
            .into_iter()
            .filter(|v| !self.belongs_elsewhere(g, v))
            .collect();
        for view in &views {
            self.step(conn, g, ObjectKind::View, view, Decision::Drop, d.drop_view(g, view))
                .await?;
        }
        let pvs = reader
            .parameterized_view_list(conn, g)
            .await
            .map_err(|e| MigrateError::introspection(g, e))?;
        let pvs: Vec<String> = pvs
            .into_iter()
            .filter(|v| !self.belongs_elsewhere(g, v))
            .collect();
        for pv in &pvs {
            let batch = d.drop_parameterized_view(g, pv);
            self.step(conn, g, ObjectKind::ParameterizedView, pv, Decision::Drop, batch)
                .await?;
        }
        Ok(())
    }

    async fn drop_orphaned_tables(
        &mut self,
        conn: &mut dyn Connection,
        grain: &'a Grain,
        fks: &mut Vec<DbFkInfo>,
    ) -> Result<()> {
        let d = self.dialect();
        let g = grain.name.as_str();
        let stored = self
            .adapter
            .reader()
            .table_list(conn, g)
            .await
            .map_err(|e| MigrateError::introspection(g, e))?;

        for name in stored {
            if grain.table(&name).is_some()
                || grain.materialized_view(&name).is_some()
                || self.belongs_elsewhere(g, &name)
            {
                continue;
            }
            let stored_name = d.object_name(g, &name);
            let (ref_grain, ref_table) = d.reference_key(g, &name);
            let referencing: Vec<DbFkInfo> = fks
                .iter()
                .filter(|fk| {
                    fk.ref_grain == ref_grain && fk.ref_table == ref_table && fk.table_name != stored_name
                })
                .cloned()
                .collect();
            for fk in &referencing {
                let owner = self.owner_of(g, fk);
                let batch = self
                    .adapter
                    .drop_foreign_key_batch(conn, g, fk, owner, None)
                    .await?;
                self.step(conn, g, ObjectKind::ForeignKey, &fk.name, Decision::Drop, batch)
                    .await?;
            }
            fks.retain(|fk| fk.table_name != stored_name && !referencing.contains(fk));

            warn!("Dropping table {}.{} absent from the schema", g, name);
            self.step(conn, g, ObjectKind::Table, &name, Decision::Drop, d.drop_table(g, &name))
                .await?;
        }
        Ok(())
    }

    /// Drop indices that are foreign, unknown or no longer match; indices on
    /// columns about to change go too. Returns the indices left in place.
    async fn drop_orphaned_indices(
        &mut self,
        conn: &mut dyn Connection,
        grain: &'a Grain,
    ) -> Result<BTreeMap<String, DbIndexInfo>> {
        let d = self.dialect();
        let g = grain.name.as_str();
        let desired: BTreeMap<String, (&'a Table, &'a crate::core::schema::Index)> = grain
            .tables
            .iter()
            .flat_map(|t| t.indices.iter().map(move |i| (t, i)))
            .map(|(t, i)| (d.index_name(g, i), (t, i)))
            .collect();

        let stored = self.adapter.introspect_indices(conn, g).await?;
        let mut kept = BTreeMap::new();
        for (key, info) in stored {
            let keep = match desired.get(&key) {
                Some((table, index)) if info.reflects(&d.object_name(g, &table.name), index) => {
                    !self.index_columns_change(conn, table, index).await?
                }
                _ => false,
            };
            if keep {
                kept.insert(key, info);
                continue;
            }
            if info.is_foreign() {
                warn!("Dropping foreign index {} on {}", info.raw_name(), info.table_name);
            }
            let batch = d.drop_index(g, &info);
            self.step(conn, g, ObjectKind::Index, info.raw_name(), Decision::Drop, batch)
                .await?;
        }
        Ok(kept)
    }

    async fn index_columns_change(
        &self,
        conn: &mut dyn Connection,
        table: &Table,
        index: &crate::core::schema::Index,
    ) -> Result<bool> {
        for name in &index.columns {
            let Some(col) = table.column(name) else {
                continue;
            };
            if let Some((_, false)) = self.expected_matches(conn, table, col).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn drop_orphaned_fks(
        &mut self,
        conn: &mut dyn Connection,
        grain: &'a Grain,
        fks: &mut Vec<DbFkInfo>,
    ) -> Result<()> {
        let d = self.dialect();
        let g = grain.name.as_str();
        let mut kept = Vec::new();
        for fk in std::mem::take(fks) {
            let owner = self.owner_of(g, &fk);
            let reflects = owner
                .and_then(|t| {
                    t.foreign_keys
                        .iter()
                        .find(|f| d.fk_name(f) == fk.name)
                        .map(|f| (t, f))
                })
                .map(|(t, f)| {
                    let ref_key = d.reference_key(&f.references.grain, &f.references.table);
                    fk.reflects(&d.object_name(g, &t.name), &ref_key, f)
                })
                .unwrap_or(false);
            if reflects {
                kept.push(fk);
                continue;
            }
            let batch = self
                .adapter
                .drop_foreign_key_batch(conn, g, &fk, owner, self.referenced_table(&fk))
                .await?;
            self.step(conn, g, ObjectKind::ForeignKey, &fk.name, Decision::Drop, batch)
                .await?;
        }
        *fks = kept;
        Ok(())
    }

    // =========================================================================
    // Sequences and tables
    // =========================================================================

    async fn update_sequences(&mut self, conn: &mut dyn Connection, grain: &'a Grain) -> Result<()> {
        let d = self.dialect();
        let g = grain.name.as_str();
        for seq in &grain.sequences {
            if !self.adapter.sequence_exists(conn, g, &seq.name).await? {
                self.step(conn, g, ObjectKind::Sequence, &seq.name, Decision::Create, d.create_sequence(seq))
                    .await?;
                continue;
            }
            match self.adapter.introspect_sequence(conn, g, &seq.name).await? {
                Some(info) if !info.reflects(seq) => {
                    let decision = Decision::Alter(sequence_changes(&info, seq));
                    self.step(conn, g, ObjectKind::Sequence, &seq.name, decision, d.alter_sequence(seq))
                        .await?;
                }
                _ => {
                    self.step(conn, g, ObjectKind::Sequence, &seq.name, Decision::Noop, Vec::new())
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Create or alter one table; returns whether anything changed.
    async fn update_table(
        &mut self,
        conn: &mut dyn Connection,
        table: &'a Table,
        fks: &mut Vec<DbFkInfo>,
    ) -> Result<bool> {
        let d = self.dialect();
        let g = table.schema.as_str();

        if !self.adapter.table_exists(conn, g, &table.name).await? {
            let batch = self.adapter.create_table_batch(conn, table).await?;
            self.step(conn, g, ObjectKind::Table, &table.name, Decision::Create, batch)
                .await?;
            return Ok(true);
        }

        let mut current = self.adapter.column_names(conn, table).await?;
        let pk = self.adapter.introspect_primary_key(conn, table).await?;
        let pk_name = d.pk_name(table);
        let mut key_dropped = pk.is_empty();
        if !key_dropped && !pk.reflects(table, &pk_name) {
            self.drop_primary_key(conn, table, &pk, fks, &current).await?;
            key_dropped = true;
        }

        let mut changed = Vec::new();
        for col in table.all_columns() {
            let object = format!("{}.{}", table.name, col.name);
            let existing = if current.contains(&col.name) {
                self.expected_matches(conn, table, &col).await?
            } else {
                None
            };
            match existing {
                Some((_, true)) => continue,
                Some((actual, false)) => {
                    if table.primary_key.contains(&col.name) && !key_dropped {
                        self.drop_primary_key(conn, table, &pk, fks, &current).await?;
                        key_dropped = true;
                    }
                    let expected = d.canonical_default(table, &col);
                    let decision = Decision::Alter(column_changes(&actual, &col, expected.as_deref()));
                    let batch = d
                        .update_column(table, &col, &actual, &current)
                        .map_err(|e| MigrateError::ddl(format!("{}.{}", g, object), e))?;
                    self.step(conn, g, ObjectKind::Column, &object, decision, batch)
                        .await?;
                }
                None => {
                    let batch = d.create_column(table, &col, &current);
                    self.step(conn, g, ObjectKind::Column, &object, Decision::Create, batch)
                        .await?;
                }
            }
            changed.push(col.name.clone());
            if self.dry_run {
                if !current.contains(&col.name) {
                    current.push(col.name.clone());
                }
            } else {
                current = self.adapter.column_names(conn, table).await?;
            }
        }

        let pk_missing = if self.dry_run {
            key_dropped
        } else {
            self.adapter.introspect_primary_key(conn, table).await?.is_empty()
        };
        if pk_missing {
            let batch = d.create_pk(table, &current);
            self.step(conn, g, ObjectKind::PrimaryKey, &pk_name, Decision::Create, batch)
                .await?;
        }

        if changed.is_empty() {
            self.step(conn, g, ObjectKind::Table, &table.name, Decision::Noop, Vec::new())
                .await?;
        } else {
            let existing = self.adapter.trigger_names(conn, table).await?;
            let seq_exists = self
                .adapter
                .sequence_exists(conn, g, &table.identity_sequence_name())
                .await?;
            let mut batch = d.drop_auto_increment(table, &existing, seq_exists);
            batch.extend(d.auto_increment(table, seq_exists));
            self.step(conn, g, ObjectKind::Table, &table.name, Decision::Alter(changed.clone()), batch)
                .await?;
        }

        self.update_versioning_trigger(conn, table).await?;
        Ok(!changed.is_empty() || pk_missing)
    }

    /// Drop a primary key after the foreign keys of the grain that reference it.
    async fn drop_primary_key(
        &mut self,
        conn: &mut dyn Connection,
        table: &'a Table,
        pk: &DbPkInfo,
        fks: &mut Vec<DbFkInfo>,
        current: &[String],
    ) -> Result<()> {
        let d = self.dialect();
        let g = table.schema.as_str();
        let (ref_grain, ref_table) = d.reference_key(g, &table.name);
        let referencing: Vec<DbFkInfo> = fks
            .iter()
            .filter(|fk| fk.ref_grain == ref_grain && fk.ref_table == ref_table)
            .cloned()
            .collect();
        for fk in &referencing {
            let owner = self.owner_of(g, fk);
            let batch = self
                .adapter
                .drop_foreign_key_batch(conn, g, fk, owner, Some(table))
                .await?;
            self.step(conn, g, ObjectKind::ForeignKey, &fk.name, Decision::Drop, batch)
                .await?;
        }
        fks.retain(|fk| !referencing.contains(fk));
        let batch = d.drop_pk(table, &pk.name, current);
        self.step(conn, g, ObjectKind::PrimaryKey, &pk.name, Decision::Drop, batch)
            .await
    }

    async fn update_versioning_trigger(&mut self, conn: &mut dyn Connection, table: &'a Table) -> Result<()> {
        let d = self.dialect();
        let g = table.schema.as_str();
        let name = d.versioning_trigger_name(table);
        let existing = self.adapter.trigger_names(conn, table).await?;
        let present = existing.contains(&name);
        match (table.versioned, present) {
            (true, false) => {
                let batch = d.create_versioning_trigger(table);
                self.step(conn, g, ObjectKind::Trigger, &name, Decision::Create, batch)
                    .await
            }
            (false, true) => {
                let batch = d.drop_versioning_trigger(table, &existing);
                self.step(conn, g, ObjectKind::Trigger, &name, Decision::Drop, batch)
                    .await
            }
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Create phases
    // =========================================================================

    async fn update_indices(
        &mut self,
        conn: &mut dyn Connection,
        grain: &'a Grain,
        kept: BTreeMap<String, DbIndexInfo>,
    ) -> Result<()> {
        let d = self.dialect();
        let g = grain.name.as_str();
        let present = if self.dry_run {
            kept
        } else {
            self.adapter.introspect_indices(conn, g).await?
        };
        for table in &grain.tables {
            let stored_table = d.object_name(g, &table.name);
            for index in &table.indices {
                let (decision, batch) = match present.get(&d.index_name(g, index)) {
                    Some(info) if info.reflects(&stored_table, index) => (Decision::Noop, Vec::new()),
                    Some(info) => {
                        let mut batch = d.drop_index(g, info);
                        batch.extend(d.create_index(table, index));
                        (Decision::Alter(vec!["columns".to_string()]), batch)
                    }
                    None => (Decision::Create, d.create_index(table, index)),
                };
                self.step(conn, g, ObjectKind::Index, &index.name, decision, batch)
                    .await?;
            }
        }
        Ok(())
    }

    async fn update_fks(
        &mut self,
        conn: &mut dyn Connection,
        grain: &'a Grain,
        remaining: Vec<DbFkInfo>,
    ) -> Result<()> {
        let d = self.dialect();
        let g = grain.name.as_str();
        let present = if self.dry_run {
            remaining
        } else {
            self.adapter.introspect_foreign_keys(conn, g).await?
        };
        for table in &grain.tables {
            let stored_table = d.object_name(g, &table.name);
            for fk in &table.foreign_keys {
                let name = d.fk_name(fk);
                let ref_table = self
                    .score
                    .table(&fk.references.grain, &fk.references.table)
                    .ok_or_else(|| {
                        MigrateError::Schema(format!(
                            "{}: foreign key {} references unknown table {}.{}",
                            table.qualified_name(),
                            fk.name,
                            fk.references.grain,
                            fk.references.table
                        ))
                    })?;
                let ref_key = d.reference_key(&fk.references.grain, &fk.references.table);
                let stored = present
                    .iter()
                    .find(|p| p.name == name && p.table_name == stored_table);
                let (decision, batch) = match stored {
                    Some(info) if info.reflects(&stored_table, &ref_key, fk) => (Decision::Noop, Vec::new()),
                    Some(info) => {
                        let mut batch = self
                            .adapter
                            .drop_foreign_key_batch(conn, g, info, Some(table), Some(ref_table))
                            .await?;
                        let current = self.adapter.column_names(conn, table).await?;
                        batch.extend(d.create_fk(table, fk, &ref_table.primary_key, &current));
                        (Decision::Alter(vec!["definition".to_string()]), batch)
                    }
                    None => {
                        let current = self.adapter.column_names(conn, table).await?;
                        (Decision::Create, d.create_fk(table, fk, &ref_table.primary_key, &current))
                    }
                };
                self.step(conn, g, ObjectKind::ForeignKey, &name, decision, batch)
                    .await?;
            }
        }
        Ok(())
    }

    async fn create_views(&mut self, conn: &mut dyn Connection, grain: &'a Grain) -> Result<()> {
        let d = self.dialect();
        let g = grain.name.as_str();
        for view in &grain.views {
            let base = source_table(grain, &view.from)?;
            let batch = d
                .create_view(view, base)
                .map_err(|e| MigrateError::ddl(format!("{}.{}", g, view.name), e))?;
            self.step(conn, g, ObjectKind::View, &view.name, Decision::Create, batch)
                .await?;
        }
        for pv in &grain.parameterized_views {
            let base = source_table(grain, &pv.from)?;
            let batch = d
                .create_parameterized_view(pv, base)
                .map_err(|e| MigrateError::ddl(format!("{}.{}", g, pv.name), e))?;
            self.step(conn, g, ObjectKind::ParameterizedView, &pv.name, Decision::Create, batch)
                .await?;
        }
        Ok(())
    }

    /// Rebuild materialized views whose definition or base table changed.
    /// Returns the base tables whose maintenance triggers were dropped.
    async fn update_materialized_views(
        &mut self,
        conn: &mut dyn Connection,
        grain: &'a Grain,
        modified: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>> {
        let d = self.dialect();
        let g = grain.name.as_str();
        let mut refreshed = BTreeSet::new();
        for mv in &grain.materialized_views {
            let base = source_table(grain, &mv.from)?;
            let exists = self.adapter.table_exists(conn, g, &mv.name).await?;
            if exists && !modified.contains(&base.name) {
                let trigger = d.mv_trigger_name(mv, TriggerEvent::Insert);
                let body = self
                    .adapter
                    .reader()
                    .trigger_body(conn, g, &base.name, &trigger)
                    .await
                    .map_err(|e| MigrateError::introspection(format!("{}.{}", g, trigger), e))?;
                let stored = body.as_deref().and_then(mview::extract_checksum);
                if stored.as_deref() == Some(mv.checksum()?.as_str()) {
                    self.step(conn, g, ObjectKind::MaterializedView, &mv.name, Decision::Noop, Vec::new())
                        .await?;
                    continue;
                }
            }

            let object = format!("{}.{}", g, mv.name);
            let existing = self.adapter.trigger_names(conn, base).await?;
            let mut batch = d.drop_mv_triggers(base, &existing);
            if exists {
                batch.extend(d.drop_table(g, &mv.name));
            }
            batch.extend(d.create_table(&mv.as_table(base)?));
            batch.extend(
                d.init_mv_data(mv, base)
                    .map_err(|e| MigrateError::ddl(&object, e))?,
            );
            let decision = if exists {
                Decision::Alter(vec!["definition".to_string()])
            } else {
                Decision::Create
            };
            self.step(conn, g, ObjectKind::MaterializedView, &mv.name, decision, batch)
                .await?;
            refreshed.insert(base.name.clone());
        }
        Ok(refreshed)
    }

    /// Recreate maintenance triggers where views were refreshed, base tables
    /// changed or the stored set of triggers differs from the expected one.
    async fn update_mv_triggers(
        &mut self,
        conn: &mut dyn Connection,
        grain: &'a Grain,
        modified: &BTreeSet<String>,
        refreshed: &BTreeSet<String>,
    ) -> Result<()> {
        let d = self.dialect();
        let g = grain.name.as_str();
        for table in &grain.tables {
            let mvs = grain.materialized_views_of(&table.name);
            let existing = self.adapter.trigger_names(conn, table).await?;
            let stored: BTreeSet<String> = existing
                .iter()
                .filter(|n| d.is_mv_trigger(table, n))
                .cloned()
                .collect();
            if mvs.is_empty() && stored.is_empty() {
                continue;
            }
            let expected: BTreeSet<String> = mvs
                .iter()
                .flat_map(|mv| TriggerEvent::ALL.iter().map(move |e| d.mv_trigger_name(mv, *e)))
                .collect();
            let name = format!("{}.mv_triggers", table.name);
            let up_to_date = stored == expected
                && !refreshed.contains(&table.name)
                && !modified.contains(&table.name);
            if up_to_date {
                self.step(conn, g, ObjectKind::Trigger, &name, Decision::Noop, Vec::new())
                    .await?;
                continue;
            }

            let mut batch = d.drop_mv_triggers(table, &existing);
            let decision = if mvs.is_empty() {
                Decision::Drop
            } else {
                batch.extend(d.create_mv_triggers(table, &mvs)?);
                if stored.is_empty() {
                    Decision::Create
                } else {
                    Decision::Alter(mvs.iter().map(|mv| mv.name.clone()).collect())
                }
            };
            self.step(conn, g, ObjectKind::Trigger, &name, decision, batch)
                .await?;
        }
        Ok(())
    }
}

/// Parts of a column that differ from the desired definition.
fn column_changes(actual: &DbColumnInfo, col: &Column, expected_default: Option<&str>) -> Vec<String> {
    let mut changes = Vec::new();
    let same_shape = actual.kind == col.kind
        && actual.max == col.max
        && (col.max || actual.length == col.length)
        && actual.precision == col.precision
        && actual.scale == col.scale;
    if !same_shape {
        changes.push("type".to_string());
    }
    if actual.nullable != col.nullable {
        changes.push("nullable".to_string());
    }
    if !crate::core::meta::defaults_match(col.kind, actual.default.as_deref(), expected_default) {
        changes.push("default".to_string());
    }
    if changes.is_empty() {
        changes.push("definition".to_string());
    }
    changes
}

fn sequence_changes(actual: &DbSequenceInfo, seq: &Sequence) -> Vec<String> {
    let mut changes = Vec::new();
    if actual.increment_by != seq.increment_by {
        changes.push("increment_by".to_string());
    }
    if actual.min_value != seq.min_value {
        changes.push("min_value".to_string());
    }
    if actual.max_value != seq.max_value {
        changes.push("max_value".to_string());
    }
    if actual.cycle != seq.cycle {
        changes.push("cycle".to_string());
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnKind;
    use crate::dialect::DbType;

    const SHOP: &str = r#"
grains:
  - name: shop
    version: "1.0"
    tables:
      - name: orders
        columns:
          - { name: id, kind: integer, nullable: false }
          - { name: title, kind: string, length: 50 }
        primary_key: [id]
"#;

    #[test]
    fn test_new_rejects_grain_named_like_system_schema() {
        let score = Score::from_yaml(&SHOP.replace("name: shop", "name: dbschema")).unwrap();
        let adapter = Adapter::for_db_type(DbType::Embedded, "dbschema");
        let err = Migrator::new(adapter, score, MigrationConfig::default()).err().unwrap();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[test]
    fn test_new_rejects_unsupported_objects_before_ddl() {
        let yaml = format!(
            "{}    parameterized_views:\n      - name: by_title\n        from: orders\n        params: [{{ name: t, kind: string }}]\n        columns: [{{ name: id }}]\n        where: [{{ column: title, op: eq, param: t }}]\n",
            SHOP
        );
        let score = Score::from_yaml(&yaml).unwrap();
        let embedded = Adapter::for_db_type(DbType::Embedded, "dbschema");
        assert!(Migrator::new(embedded, score.clone(), MigrationConfig::default()).is_err());
        let pg = Adapter::for_db_type(DbType::Postgres, "dbschema");
        assert!(Migrator::new(pg, score, MigrationConfig::default()).is_ok());
    }

    #[test]
    fn test_column_changes() {
        let mut actual = DbColumnInfo::new("title", ColumnKind::String);
        actual.length = 40;
        actual.nullable = true;
        let col = Column::string("title", 50).not_null();
        assert_eq!(column_changes(&actual, &col, None), vec!["type", "nullable"]);

        actual.length = 50;
        actual.nullable = false;
        actual.default = Some("'x'".into());
        assert_eq!(column_changes(&actual, &col, None), vec!["default"]);
    }

    #[test]
    fn test_grain_decision() {
        let grain = Grain::new("shop", "1.1");
        assert_eq!(grain_decision(&grain, None), Decision::Create);
        let record = GrainRecord {
            id: "shop".into(),
            version: "1.0".into(),
            length: 1,
            checksum: "00000000".into(),
            state: GrainState::Ready,
            message: String::new(),
        };
        assert_eq!(
            grain_decision(&grain, Some(&record)),
            Decision::Alter(vec!["version 1.0 -> 1.1".into()])
        );
    }
}
