use chrono::NaiveDate;
use serde_json::json;
use sql_gate::prelude::*;
use tempfile::tempdir;

async fn seeded_client() -> Result<SqlClient, SqlGateError> {
    let client = ClientOptions::builder()
        .name_transform(NameTransform::camel_snake())
        .debug_level(DebugLevel::Parameters)
        .span_attribute("db.system", "sqlite")
        .build()?;
    client
        .execute(&Statement::new(
            "CREATE TABLE people (
                id INTEGER PRIMARY KEY,
                full_name TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                joined_at TEXT,
                profile TEXT
            )",
        ))
        .await?;
    Ok(client)
}

fn person(id: i64, name: &str, active: bool) -> Vec<RowValues> {
    vec![
        id.into(),
        name.into(),
        active.into(),
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .into(),
        json!({"id": id, "tags": ["x"]}).into(),
    ]
}

fn people_insert(rows: Vec<Vec<RowValues>>) -> Statement {
    Statement::new("INSERT INTO ")
        .ident("people")
        .push_sql(" ")
        .insert(InsertRows::new(
            ["id", "fullName", "isActive", "joinedAt", "profile"],
            rows,
        ))
}

#[tokio::test(flavor = "current_thread")]
async fn bulk_insert_then_read_back() -> Result<(), SqlGateError> {
    let client = seeded_client().await?;
    let raw = client
        .execute_raw(&people_insert(vec![
            person(1, "Ada", true),
            person(2, "Brian", false),
            person(3, "Cleo", true),
        ]))
        .await?;
    assert_eq!(raw.rows_affected, 3);
    assert_eq!(raw.last_insert_rowid, Some(3));

    let rs = client
        .execute(
            &Statement::new("SELECT * FROM people WHERE ")
                .ident("isActive")
                .push_sql(" = ")
                .bind(true)
                .push_sql(" ORDER BY id"),
        )
        .await?;
    assert_eq!(rs.len(), 2);
    let first = &rs.results[0];
    assert_eq!(first.get("fullName").and_then(RowValues::as_text), Some("Ada"));
    assert_eq!(first.get("isActive").and_then(RowValues::as_bool), Some(&true));
    assert_eq!(
        first.get("joinedAt").and_then(RowValues::as_timestamp),
        NaiveDate::from_ymd_opt(2024, 1, 15).and_then(|d| d.and_hms_opt(9, 30, 0))
    );
    assert_eq!(
        first.get("profile").and_then(RowValues::as_json),
        Some(json!({"id": 1, "tags": ["x"]}))
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn bulk_update_touches_only_listed_keys() -> Result<(), SqlGateError> {
    let client = seeded_client().await?;
    client
        .execute(&people_insert(vec![
            person(1, "Ada", true),
            person(2, "Brian", true),
            person(3, "Cleo", true),
        ]))
        .await?;

    let update = BulkUpdate::new(
        "id",
        ["id", "fullName", "isActive"],
        vec![
            vec![1.into(), "Ada L.".into(), false.into()],
            vec![3.into(), "Cleo P.".into(), true.into()],
        ],
    );
    let raw = client
        .execute_raw(&Statement::new("UPDATE ").ident("people").push_sql(" SET ").update_many(update))
        .await?;
    assert_eq!(raw.rows_affected, 2);

    let rows = client
        .execute_values(&Statement::new(
            "SELECT id, full_name, is_active FROM people ORDER BY id",
        ))
        .await?;
    assert_eq!(
        rows,
        vec![
            vec![RowValues::Int(1), RowValues::Text("Ada L.".into()), RowValues::Int(0)],
            vec![RowValues::Int(2), RowValues::Text("Brian".into()), RowValues::Int(1)],
            vec![RowValues::Int(3), RowValues::Text("Cleo P.".into()), RowValues::Int(1)],
        ]
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn single_record_update_with_returning() -> Result<(), SqlGateError> {
    let client = seeded_client().await?;
    client.execute(&people_insert(vec![person(7, "Gus", true)])).await?;

    let rs = client
        .execute(
            &Statement::new("UPDATE people SET ").update(
                RecordUpdate::new([
                    ("fullName", RowValues::from("Gus G.")),
                    ("isActive", RowValues::from(false)),
                ])
                .returning("isActive"),
            ),
        )
        .await?;
    assert_eq!(rs.results[0].get("isActive"), Some(&RowValues::Int(0)));

    let rs = client
        .execute(
            &Statement::new("UPDATE people SET ")
                .update(RecordUpdate::new([("fullName", RowValues::from("Gustav"))]))
                .push_sql(" WHERE id = ")
                .bind(7)
                .push_sql(" RETURNING ")
                .ident("fullName"),
        )
        .await?;
    assert_eq!(rs.results[0].get("fullName").and_then(RowValues::as_text), Some("Gustav"));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn list_slot_expands_in_clause() -> Result<(), SqlGateError> {
    let client = seeded_client().await?;
    client
        .execute(&people_insert(vec![
            person(1, "Ada", true),
            person(2, "Brian", true),
            person(3, "Cleo", true),
        ]))
        .await?;
    let rs = client
        .execute(&Statement::new("SELECT id FROM people WHERE id IN ").list([1, 3]).push_sql(" ORDER BY id"))
        .await?;
    let ids: Vec<i64> = rs
        .iter()
        .filter_map(|row| row.get("id").and_then(RowValues::as_int).copied())
        .collect();
    assert_eq!(ids, vec![1, 3]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn execution_errors_name_the_statement() {
    let client = seeded_client().await.unwrap();
    let err = client
        .execute(&Statement::new("SELECT * FROM missing_table WHERE id = ").bind(1))
        .await
        .unwrap_err();
    assert!(err.is_execution());
    assert_eq!(err.statement(), Some("SELECT * FROM missing_table WHERE id = ?1"));
    match err {
        SqlGateError::SqlExecution { param_count, .. } => assert_eq!(param_count, 1),
        other => panic!("unexpected error: {other:?}"),
    }
    // the gate is released after a failed bare statement
    assert!(client.is_idle());
}

#[tokio::test(flavor = "current_thread")]
async fn on_disk_database_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("gate.db");

    let client = ClientOptions::builder().path(&path).wal(true).build()?;
    let mode = client.execute(&Statement::new("PRAGMA journal_mode")).await?;
    assert_eq!(
        mode.results[0].get_by_index(0).and_then(RowValues::as_text),
        Some("wal")
    );
    client
        .execute(&Statement::new("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)"))
        .await?;
    let tx = client.clone();
    client
        .with_transaction(|| async move {
            tx.execute(&Statement::new("INSERT INTO kv (k, v) VALUES (").bind("a").push_sql(", ").bind("1").push_sql(")"))
                .await?;
            Ok::<_, SqlGateError>(())
        })
        .await?;
    client.close().await?;

    let reopened = ClientOptions::builder().path(&path).build()?;
    let rs = reopened
        .execute(&Statement::new("SELECT v FROM kv WHERE k = ").bind("a"))
        .await?;
    assert_eq!(rs.results[0].get("v").and_then(RowValues::as_text), Some("1"));
    reopened.close().await?;
    Ok(())
}
