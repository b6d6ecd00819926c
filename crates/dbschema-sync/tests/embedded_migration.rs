//! End-to-end migrations against an in-memory embedded database.

use dbschema_sync::core::value::SqlValue;
use dbschema_sync::dialect::FromClause;
use dbschema_sync::drivers::EmbeddedConnection;
use dbschema_sync::migrate::{Decision, GrainState, ObjectKind, Registry};
use dbschema_sync::{
    Adapter, Connection, DbType, Dialect, MigrateError, MigrationConfig, Migrator, Score,
};

const SHOP_V1: &str = r#"
grains:
  - name: shop
    version: "1.0"
    tables:
      - name: customers
        columns:
          - { name: id, kind: integer, nullable: false }
          - { name: name, kind: string, length: 40, nullable: false }
        primary_key: [id]
      - name: orders
        columns:
          - { name: id, kind: integer, nullable: false }
          - { name: customer_id, kind: integer }
          - { name: title, kind: string, length: 50 }
          - { name: qty, kind: integer, nullable: false, default: "0" }
        primary_key: [id]
        foreign_keys:
          - columns: [customer_id]
            references: { table: customers }
        indices:
          - { name: ix_orders_title, columns: [title] }
      - name: legacy
        columns:
          - { name: id, kind: integer, nullable: false }
        primary_key: [id]
"#;

const SHOP_V2: &str = r#"
grains:
  - name: shop
    version: "1.1"
    tables:
      - name: customers
        columns:
          - { name: id, kind: integer, nullable: false }
          - { name: name, kind: string, length: 40, nullable: false }
          - { name: email, kind: string, length: 80 }
        primary_key: [id]
      - name: orders
        columns:
          - { name: id, kind: integer, nullable: false }
          - { name: customer_id, kind: integer }
          - { name: title, kind: string, length: 50 }
          - { name: qty, kind: integer, nullable: false, default: "0" }
        primary_key: [id]
        foreign_keys:
          - columns: [customer_id]
            references: { table: customers }
        indices:
          - { name: ix_orders_title, columns: [title, qty] }
"#;

const SALES: &str = r#"
grains:
  - name: shop
    version: "1.0"
    tables:
      - name: sales
        columns:
          - { name: id, kind: integer, nullable: false }
          - { name: item, kind: string, length: 10, nullable: false }
          - { name: qty, kind: integer, nullable: false }
        primary_key: [id]
    materialized_views:
      - name: totals
        from: sales
        group_by: [item]
        aggregates:
          - { alias: total, function: sum, column: qty }
"#;

const VERSIONED: &str = r#"
grains:
  - name: shop
    version: "1.0"
    tables:
      - name: notes
        versioned: true
        columns:
          - { name: id, kind: integer, nullable: false }
          - { name: body, kind: string, length: 100 }
        primary_key: [id]
"#;

const WAREHOUSE: &str = r#"
grains:
  - name: warehouse_inventory_items
    version: "1.0"
    tables:
      - name: sales
        columns:
          - { name: id, kind: integer, nullable: false, identity: true }
          - { name: item, kind: string, length: 10, nullable: false }
          - { name: qty, kind: integer, nullable: false }
        primary_key: [id]
    materialized_views:
      - name: totals
        from: sales
        group_by: [item]
        aggregates:
          - { alias: total, function: sum, column: qty }
"#;

fn migrator(yaml: &str) -> Migrator {
    let score = Score::from_yaml(yaml).unwrap();
    let adapter = Adapter::for_db_type(DbType::Embedded, "dbschema");
    Migrator::new(adapter, score, MigrationConfig::default()).unwrap()
}

async fn open() -> EmbeddedConnection {
    EmbeddedConnection::open(":memory:").await.unwrap()
}

async fn exec(conn: &mut EmbeddedConnection, sql: &str) {
    conn.execute(sql).await.unwrap();
    conn.commit().await.unwrap();
}

async fn pairs(conn: &mut EmbeddedConnection, sql: &str) -> Vec<(String, i64)> {
    conn.query(sql, &[])
        .await
        .unwrap()
        .iter()
        .map(|r| (r.get_string(0).unwrap(), r.get_i64(1).unwrap()))
        .collect()
}

#[tokio::test]
async fn test_fresh_database_then_rerun_is_noop() {
    let mut conn = open().await;
    let m = migrator(SHOP_V1);

    let plan = m.plan(&mut conn).await.unwrap();
    assert!(plan
        .objects
        .iter()
        .any(|o| o.kind == ObjectKind::Table && o.name == "orders" && o.decision == Decision::Create));

    let report = m.migrate(&mut conn).await.unwrap();
    assert_eq!(report.grains_applied, vec!["shop".to_string()]);

    let plan = m.plan(&mut conn).await.unwrap();
    assert!(plan.is_noop(), "unexpected changes:\n{}", plan);

    let report = m.migrate(&mut conn).await.unwrap();
    assert!(report.grains_applied.is_empty());
    assert_eq!(report.grains_skipped, vec!["shop".to_string()]);

    let records = Registry::new(m.adapter(), "dbschema").load(&mut conn).await.unwrap();
    assert_eq!(records["shop"].state, GrainState::Ready);
    assert_eq!(records["shop"].version, "1.0");
}

#[tokio::test]
async fn test_version_bump_without_changes_touches_nothing() {
    let mut conn = open().await;
    migrator(SHOP_V1).migrate(&mut conn).await.unwrap();

    let bumped = migrator(&SHOP_V1.replace("\"1.0\"", "\"1.0.1\""));
    let plan = bumped.plan(&mut conn).await.unwrap();
    let changes: Vec<String> = plan.changes().map(|o| o.to_string()).collect();
    assert_eq!(changes.len(), 1, "unexpected changes: {:?}", changes);
    assert_eq!(plan.changes().next().map(|o| o.kind), Some(ObjectKind::Grain));
}

#[tokio::test]
async fn test_schema_evolution() {
    let mut conn = open().await;
    migrator(SHOP_V1).migrate(&mut conn).await.unwrap();
    exec(&mut conn, "insert into \"shop_customers\" (\"id\", \"name\") values (1, 'ann')").await;
    exec(
        &mut conn,
        "insert into \"shop_orders\" (\"id\", \"customer_id\", \"title\", \"qty\") values (10, 1, 'pens', 4)",
    )
    .await;

    let v2 = migrator(SHOP_V2);
    let report = v2.migrate(&mut conn).await.unwrap();
    let changed: Vec<(ObjectKind, String)> = report
        .plan
        .changes()
        .map(|o| (o.kind, o.name.clone()))
        .collect();
    assert!(changed.contains(&(ObjectKind::Table, "legacy".to_string())));
    assert!(changed.contains(&(ObjectKind::Column, "customers.email".to_string())));
    assert!(changed.contains(&(ObjectKind::Index, "ix_orders_title".to_string())));

    let adapter = v2.adapter();
    assert!(!adapter.table_exists(&mut conn, "shop", "legacy").await.unwrap());
    let customers = v2.score().table("shop", "customers").unwrap();
    let columns = adapter.column_names(&mut conn, customers).await.unwrap();
    assert!(columns.contains(&"email".to_string()));

    // Data survives the upgrade.
    let rows = pairs(&mut conn, "select \"title\", \"qty\" from \"shop_orders\"").await;
    assert_eq!(rows, vec![("pens".to_string(), 4)]);

    assert!(v2.plan(&mut conn).await.unwrap().is_noop());
}

#[tokio::test]
async fn test_downgrade_is_refused() {
    let mut conn = open().await;
    migrator(SHOP_V2).migrate(&mut conn).await.unwrap();
    let err = migrator(SHOP_V1).migrate(&mut conn).await.unwrap_err();
    assert!(matches!(err, MigrateError::Registry(_)), "{}", err);
}

async fn read_note(conn: &mut EmbeddedConnection) -> (String, i64) {
    let sql = "select \"body\", \"recversion\" from \"shop_notes\" where \"id\" = 1";
    pairs(conn, sql).await.remove(0)
}

#[tokio::test]
async fn test_stale_recversion_is_rejected() {
    let mut conn = open().await;
    migrator(VERSIONED).migrate(&mut conn).await.unwrap();
    exec(&mut conn, "insert into \"shop_notes\" (\"id\", \"body\") values (1, 'draft')").await;

    let (_, seen) = read_note(&mut conn).await;

    exec(
        &mut conn,
        &format!(
            "update \"shop_notes\" set \"body\" = 'first', \"recversion\" = {} where \"id\" = 1",
            seen
        ),
    )
    .await;
    assert_eq!(read_note(&mut conn).await, ("first".to_string(), seen + 1));

    // A writer still holding the old version loses.
    let stale = conn
        .execute(&format!(
            "update \"shop_notes\" set \"body\" = 'second', \"recversion\" = {} where \"id\" = 1",
            seen
        ))
        .await;
    assert!(stale.is_err());
    conn.rollback().await.unwrap();
    assert_eq!(read_note(&mut conn).await, ("first".to_string(), seen + 1));

    // Jumping ahead of the stored version is no better than lagging behind.
    let skipped = conn
        .execute(&format!(
            "update \"shop_notes\" set \"body\" = 'blind', \"recversion\" = {} where \"id\" = 1",
            seen + 2
        ))
        .await;
    assert!(skipped.is_err());
    conn.rollback().await.unwrap();
    assert_eq!(read_note(&mut conn).await, ("first".to_string(), seen + 1));
}

#[tokio::test]
async fn test_only_one_session_wins_with_same_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.db");
    let path = path.to_str().unwrap();

    let mut first = EmbeddedConnection::open(path).await.unwrap();
    migrator(VERSIONED).migrate(&mut first).await.unwrap();
    exec(&mut first, "insert into \"shop_notes\" (\"id\", \"body\") values (1, 'draft')").await;
    let mut second = EmbeddedConnection::open(path).await.unwrap();

    let (_, seen) = read_note(&mut first).await;
    assert_eq!(read_note(&mut second).await.1, seen);

    let update = |body: &str| {
        format!(
            "update \"shop_notes\" set \"body\" = '{}', \"recversion\" = {} where \"id\" = 1",
            body, seen
        )
    };
    let won = first.execute(&update("first")).await;
    first.commit().await.unwrap();
    let lost = second.execute(&update("second")).await;
    second.rollback().await.unwrap();

    assert!(won.is_ok());
    let err = lost.unwrap_err();
    assert!(err.to_string().contains("record version check failure"), "{}", err);
    assert_eq!(read_note(&mut second).await, ("first".to_string(), seen + 1));
}

#[tokio::test]
async fn test_materialized_view_follows_base_table() {
    let mut conn = open().await;
    let m = migrator(SALES);
    m.migrate(&mut conn).await.unwrap();

    exec(&mut conn, "insert into \"shop_sales\" (\"id\", \"item\", \"qty\") values (1, 'a', 3)").await;
    exec(&mut conn, "insert into \"shop_sales\" (\"id\", \"item\", \"qty\") values (2, 'b', 2)").await;
    let totals = "select \"item\", \"total\" from \"shop_totals\" order by \"item\"";
    assert_eq!(
        pairs(&mut conn, totals).await,
        vec![("a".to_string(), 3), ("b".to_string(), 2)]
    );

    exec(&mut conn, "delete from \"shop_sales\" where \"id\" = 2").await;
    exec(&mut conn, "update \"shop_sales\" set \"qty\" = 2 where \"id\" = 1").await;
    assert_eq!(pairs(&mut conn, totals).await, vec![("a".to_string(), 2)]);

    // Unchanged definition keeps the view and its triggers.
    let bumped = migrator(&SALES.replace("\"1.0\"", "\"1.1\""));
    let plan = bumped.plan(&mut conn).await.unwrap();
    assert!(plan
        .objects
        .iter()
        .any(|o| o.kind == ObjectKind::MaterializedView && o.decision == Decision::Noop));
    assert_eq!(plan.changes().count(), 1, "{}", plan);
}

#[tokio::test]
async fn test_long_grain_name_keeps_triggers_recognizable() {
    let mut conn = open().await;
    let m = migrator(WAREHOUSE);
    m.migrate(&mut conn).await.unwrap();

    let d = m.adapter().dialect();
    let grain = "warehouse_inventory_items";
    let insert = |item: &str, qty: i64| {
        format!(
            "insert into {} (\"item\", \"qty\") values ('{}', {})",
            d.table_string(grain, "sales"),
            item,
            qty
        )
    };
    exec(&mut conn, &insert("a", 3)).await;

    // Shortened trigger names are still seen as the current maintenance set.
    let bumped = migrator(&WAREHOUSE.replace("\"1.0\"", "\"1.1\""));
    let plan = bumped.plan(&mut conn).await.unwrap();
    assert_eq!(plan.changes().count(), 1, "{}", plan);
    bumped.migrate(&mut conn).await.unwrap();

    let counted = WAREHOUSE.replace("\"1.0\"", "\"2.0\"").replace(
        "- { alias: total, function: sum, column: qty }",
        "- { alias: total, function: sum, column: qty }\n          - { alias: lines, function: count }",
    );
    migrator(&counted).migrate(&mut conn).await.unwrap();
    exec(&mut conn, &insert("a", 4)).await;

    let totals = format!(
        "select \"item\", \"total\" from {}",
        d.table_string(grain, "totals")
    );
    assert_eq!(pairs(&mut conn, &totals).await, vec![("a".to_string(), 7)]);
    let ids = format!(
        "select \"item\", \"id\" from {} order by \"id\"",
        d.table_string(grain, "sales")
    );
    assert_eq!(
        pairs(&mut conn, &ids).await,
        vec![("a".to_string(), 1), ("a".to_string(), 2)]
    );
}

#[tokio::test]
async fn test_materialized_view_rebuilds_from_existing_rows() {
    let mut conn = open().await;
    migrator(SALES).migrate(&mut conn).await.unwrap();
    exec(&mut conn, "insert into \"shop_sales\" (\"id\", \"item\", \"qty\") values (1, 'a', 3)").await;
    exec(&mut conn, "insert into \"shop_sales\" (\"id\", \"item\", \"qty\") values (2, 'a', 4)").await;

    let changed = SALES
        .replace("\"1.0\"", "\"2.0\"")
        .replace("- { alias: total, function: sum, column: qty }", "- { alias: total, function: sum, column: qty }\n          - { alias: lines, function: count }");
    let m = migrator(&changed);
    let report = m.migrate(&mut conn).await.unwrap();
    assert!(report
        .plan
        .changes()
        .any(|o| o.kind == ObjectKind::MaterializedView && o.name == "totals"));

    let rows = pairs(&mut conn, "select \"item\", \"lines\" from \"shop_totals\"").await;
    assert_eq!(rows, vec![("a".to_string(), 2)]);
    let rows = pairs(&mut conn, "select \"item\", \"total\" from \"shop_totals\"").await;
    assert_eq!(rows, vec![("a".to_string(), 7)]);
}

#[tokio::test]
async fn test_paging_returns_requested_window() {
    let mut conn = open().await;
    let m = migrator(SALES);
    m.migrate(&mut conn).await.unwrap();
    for (id, item) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        exec(
            &mut conn,
            &format!(
                "insert into \"shop_sales\" (\"id\", \"item\", \"qty\") values ({}, '{}', 1)",
                id + 1,
                item
            ),
        )
        .await;
    }

    let adapter = m.adapter();
    let from = FromClause::table(adapter.dialect(), "shop", "sales");
    let fields = "\"item\", \"id\"";
    let page = adapter
        .build_limited_select(&from, "", "\"id\"", 1, 2, fields)
        .unwrap();
    let items: Vec<String> = pairs(&mut conn, &page).await.into_iter().map(|(i, _)| i).collect();
    assert_eq!(items, vec!["b", "c"]);

    let tail = adapter
        .build_limited_select(&from, "\"qty\" = 1", "\"id\"", 3, 0, fields)
        .unwrap();
    assert_eq!(pairs(&mut conn, &tail).await.len(), 2);

    let all = adapter.build_limited_select(&from, "", "", 0, 0, fields).unwrap();
    assert_eq!(pairs(&mut conn, &all).await.len(), 5);

    // Every window over the five rows matches slicing the full result;
    // a zero row count means no limit.
    let ordered: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
    let size = ordered.len() as u64;
    let edges = [0, 1, size - 1, size, size + 1];
    for offset in edges {
        for row_count in edges {
            let sql = adapter
                .build_limited_select(&from, "", "\"id\"", offset, row_count, fields)
                .unwrap();
            let got: Vec<String> = pairs(&mut conn, &sql).await.into_iter().map(|(i, _)| i).collect();
            let start = offset.min(size) as usize;
            let end = match row_count {
                0 => size,
                n => (offset + n).min(size),
            };
            let end = (end as usize).max(start);
            assert_eq!(got, ordered[start..end].to_vec(), "offset {} row count {}", offset, row_count);
        }
    }

    let nav = adapter
        .build_navigation_select(&from, "\"id\"", "\"id\" > 2", 1, fields)
        .unwrap();
    assert_eq!(pairs(&mut conn, &nav).await, vec![("c".to_string(), 3)]);

    let count = adapter.build_count(&from, "\"id\" <= 4");
    let rows = conn.query(&count, &[]).await.unwrap();
    assert_eq!(rows[0].get(0).and_then(SqlValue::as_i64), Some(4));
}

#[tokio::test]
async fn test_count_view_tracks_group_sizes() {
    let mut conn = open().await;
    let counted = SALES.replace(
        "- { alias: total, function: sum, column: qty }",
        "- { alias: n, function: count }",
    );
    migrator(&counted).migrate(&mut conn).await.unwrap();

    for (id, item) in ["a", "a", "a", "b", "b"].iter().enumerate() {
        exec(
            &mut conn,
            &format!(
                "insert into \"shop_sales\" (\"id\", \"item\", \"qty\") values ({}, '{}', 1)",
                id + 1,
                item
            ),
        )
        .await;
    }
    let sql = "select \"item\", \"n\" from \"shop_totals\" order by \"item\"";
    assert_eq!(
        pairs(&mut conn, sql).await,
        vec![("a".to_string(), 3), ("b".to_string(), 2)]
    );

    exec(&mut conn, "delete from \"shop_sales\" where \"id\" = 1").await;
    let rows = pairs(&mut conn, sql).await;
    assert_eq!(rows[0], ("a".to_string(), 2));

    let hidden = "select \"item\", \"surrogate_count\" from \"shop_totals\" order by \"item\"";
    assert_eq!(pairs(&mut conn, hidden).await, rows);
}

#[tokio::test]
async fn test_every_column_kind_round_trips() {
    let yaml = r#"
grains:
  - name: kinds
    version: "1.0"
    tables:
      - name: sample
        columns:
          - { name: id, kind: integer, nullable: false, identity: true }
          - { name: n, kind: integer, nullable: false, default: "0" }
          - { name: s, kind: string, length: 12, default: "'n/a'" }
          - { name: memo, kind: string, max: true }
          - { name: flag, kind: boolean, nullable: false, default: "false" }
          - { name: ratio, kind: floating }
          - { name: amount, kind: decimal, precision: 10, scale: 2, default: "1.50" }
          - { name: blob, kind: binary }
          - { name: created, kind: datetime, default: "GETDATE()" }
          - { name: seen, kind: zoned_datetime }
        primary_key: [id]
    sequences:
      - { name: ticket }
"#;
    let mut conn = open().await;
    let m = migrator(yaml);
    m.migrate(&mut conn).await.unwrap();

    let adapter = m.adapter();
    let table = m.score().table("kinds", "sample").unwrap();
    for col in table.all_columns() {
        let actual = adapter
            .introspect_column(&mut conn, table, &col.name)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("column {} missing", col.name));
        let expected = adapter.dialect().canonical_default(table, &col);
        assert!(
            actual.reflects(&col, expected.as_deref()),
            "{}: stored {:?}, expected default {:?}",
            col.name,
            actual,
            expected
        );
    }

    exec(&mut conn, "insert into \"kinds_sample\" (\"s\") values ('x')").await;
    exec(&mut conn, "insert into \"kinds_sample\" (\"s\") values ('y')").await;
    let ids = pairs(&mut conn, "select \"s\", \"id\" from \"kinds_sample\" order by \"id\"").await;
    assert_eq!(ids, vec![("x".to_string(), 1), ("y".to_string(), 2)]);

    let ticket = m.score().grain("kinds").unwrap().sequence("ticket").unwrap();
    assert_eq!(adapter.next_sequence_value(&mut conn, ticket).await.unwrap(), 1);
    assert_eq!(adapter.next_sequence_value(&mut conn, ticket).await.unwrap(), 2);
}
