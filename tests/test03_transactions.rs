use sql_gate::prelude::*;
use sql_gate::test_utils::{RecordingEngine, StatementLog};

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Db(#[from] SqlGateError),
    #[error("business rule violated")]
    Rule,
}

async fn recording_client(options: ClientOptions) -> (SqlClient, StatementLog) {
    let (engine, log) = RecordingEngine::sqlite_memory().unwrap();
    let client = SqlClient::from_engine(Box::new(engine), options).unwrap();
    client
        .execute(&Statement::new(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL)",
        ))
        .await
        .unwrap();
    log.clear();
    (client, log)
}

fn insert(id: i64, label: &str) -> Statement {
    Statement::new("INSERT INTO items (id, label) VALUES (")
        .bind(id)
        .push_sql(", ")
        .bind(label)
        .push_sql(")")
}

async fn ids(client: &SqlClient) -> Vec<i64> {
    client
        .execute_values(&Statement::new("SELECT id FROM items ORDER BY id"))
        .await
        .unwrap()
        .into_iter()
        .filter_map(|row| row[0].as_int().copied())
        .collect()
}

#[tokio::test(flavor = "current_thread")]
async fn sequential_inserts_share_one_begin_and_commit() {
    let (client, log) = recording_client(ClientOptions::default()).await;
    let tx = client.clone();
    client
        .with_transaction(|| async move {
            tx.execute(&insert(1, "a")).await?;
            tx.execute(&insert(2, "b")).await?;
            Ok::<_, SqlGateError>(())
        })
        .await
        .unwrap();

    assert_eq!(log.control_statements(), vec!["BEGIN", "COMMIT"]);
    assert_eq!(log.entries().len(), 4);
    assert_eq!(ids(&client).await, vec![1, 2]);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_nested_transaction_leaves_outer_committable() {
    let (client, log) = recording_client(ClientOptions::default()).await;
    let tx = client.clone();
    client
        .with_transaction(|| async move {
            tx.execute(&insert(1, "outer")).await?;
            let inner = tx.clone();
            let nested = tx
                .with_transaction(|| async move {
                    inner.execute(&insert(2, "inner")).await?;
                    Err::<(), _>(AppError::Rule)
                })
                .await;
            assert!(matches!(nested, Err(AppError::Rule)));
            assert_eq!(tx.transaction_depth(), Some(0));
            Ok::<_, AppError>(())
        })
        .await
        .unwrap();

    assert_eq!(
        log.control_statements(),
        vec!["BEGIN", "SAVEPOINT sp_1", "ROLLBACK TO SAVEPOINT sp_1", "COMMIT"]
    );
    assert_eq!(ids(&client).await, vec![1]);
}

#[tokio::test(flavor = "current_thread")]
async fn outer_error_rolls_back_everything() {
    let (client, log) = recording_client(ClientOptions::default()).await;
    let tx = client.clone();
    let outcome = client
        .with_transaction(|| async move {
            tx.execute(&insert(1, "a")).await?;
            let inner = tx.clone();
            tx.with_transaction(|| async move {
                inner.execute(&insert(2, "b")).await?;
                Ok::<_, AppError>(())
            })
            .await?;
            Err::<(), _>(AppError::Rule)
        })
        .await;

    assert!(matches!(outcome, Err(AppError::Rule)));
    assert_eq!(
        log.control_statements(),
        vec!["BEGIN", "SAVEPOINT sp_1", "ROLLBACK"]
    );
    assert!(ids(&client).await.is_empty());
    assert!(client.is_idle());
}

#[tokio::test(flavor = "current_thread")]
async fn sql_errors_inside_the_body_roll_back() {
    let (client, log) = recording_client(ClientOptions::default()).await;
    let tx = client.clone();
    let outcome = client
        .with_transaction(|| async move {
            tx.execute(&insert(1, "a")).await?;
            tx.execute(&insert(1, "duplicate")).await?;
            Ok::<_, SqlGateError>(())
        })
        .await;

    let err = outcome.unwrap_err();
    assert!(err.is_execution());
    assert_eq!(log.control_statements(), vec!["BEGIN", "ROLLBACK"]);
    assert!(ids(&client).await.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn deep_nesting_tracks_depth_and_savepoint_names() {
    let (client, log) = recording_client(ClientOptions::default()).await;
    let c1 = client.clone();
    client
        .with_transaction(|| async move {
            assert_eq!(c1.transaction_depth(), Some(0));
            let c2 = c1.clone();
            c1.with_transaction(|| async move {
                assert_eq!(c2.transaction_depth(), Some(1));
                let c3 = c2.clone();
                c2.with_transaction(|| async move {
                    assert_eq!(c3.transaction_depth(), Some(2));
                    c3.execute(&insert(3, "deep")).await?;
                    Ok::<_, SqlGateError>(())
                })
                .await?;
                assert_eq!(c2.transaction_depth(), Some(1));
                Ok::<_, SqlGateError>(())
            })
            .await?;
            let c4 = c1.clone();
            c1.with_transaction(|| async move {
                c4.execute(&insert(4, "sibling")).await?;
                Ok::<_, SqlGateError>(())
            })
            .await
        })
        .await
        .unwrap();

    assert_eq!(
        log.control_statements(),
        vec!["BEGIN", "SAVEPOINT sp_1", "SAVEPOINT sp_2", "SAVEPOINT sp_3", "COMMIT"]
    );
    assert_eq!(ids(&client).await, vec![3, 4]);
    assert_eq!(client.transaction_depth(), None);
}

#[tokio::test(flavor = "current_thread")]
async fn savepoint_counter_restarts_per_transaction() {
    let (client, log) = recording_client(ClientOptions::default()).await;
    for round in 0..2 {
        let tx = client.clone();
        client
            .with_transaction(|| async move {
                let inner = tx.clone();
                tx.with_transaction(|| async move {
                    inner.execute(&insert(round, "x")).await?;
                    Ok::<_, SqlGateError>(())
                })
                .await
            })
            .await
            .unwrap();
    }
    assert_eq!(
        log.control_statements(),
        vec!["BEGIN", "SAVEPOINT sp_1", "COMMIT", "BEGIN", "SAVEPOINT sp_1", "COMMIT"]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn release_savepoints_option_issues_release() {
    let options = ClientOptions::builder().release_savepoints(true).finish();
    let (client, log) = recording_client(options).await;
    let tx = client.clone();
    client
        .with_transaction(|| async move {
            let inner = tx.clone();
            tx.with_transaction(|| async move {
                inner.execute(&insert(1, "a")).await?;
                Ok::<_, SqlGateError>(())
            })
            .await
        })
        .await
        .unwrap();
    assert_eq!(
        log.control_statements(),
        vec!["BEGIN", "SAVEPOINT sp_1", "RELEASE SAVEPOINT sp_1", "COMMIT"]
    );
    assert_eq!(ids(&client).await, vec![1]);
}

#[tokio::test(flavor = "current_thread")]
async fn helpers_join_the_ambient_transaction() {
    async fn record_audit(client: &SqlClient, id: i64) -> Result<(), SqlGateError> {
        client.execute(&insert(id, "audit")).await?;
        Ok(())
    }

    let (client, log) = recording_client(ClientOptions::default()).await;
    let tx = client.clone();
    client
        .with_transaction(|| async move {
            record_audit(&tx, 10).await?;
            record_audit(&tx.without_transforms(), 11).await
        })
        .await
        .unwrap();
    assert_eq!(log.control_statements(), vec!["BEGIN", "COMMIT"]);
    assert_eq!(ids(&client).await, vec![10, 11]);
}

#[tokio::test(flavor = "current_thread")]
async fn separate_clients_do_not_share_transactions() {
    let (client, _log) = recording_client(ClientOptions::default()).await;
    let (other, other_log) = recording_client(ClientOptions::default()).await;
    let tx = client.clone();
    client
        .with_transaction(|| async move {
            assert_eq!(other.transaction_depth(), None);
            other.execute(&insert(1, "elsewhere")).await?;
            tx.execute(&insert(2, "here")).await?;
            Ok::<_, SqlGateError>(())
        })
        .await
        .unwrap();
    assert!(other_log.control_statements().is_empty());
}
