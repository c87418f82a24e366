mod common;

use std::sync::Arc;

use sql_preload::prelude::*;

use common::{TestResult, User, new_user, setup};

const INSERT_USER: &str = "INSERT INTO `users` (`created_at`,`updated_at`,`deleted_at`,`name`,`age`,`birthday`,`company_id`,`manager_id`,`active`) VALUES (?,?,?,?,?,?,?,?,?)";
const FIRST_BY_NAME: &str = "SELECT * FROM `users` WHERE name = ? AND `users`.`deleted_at` IS NULL ORDER BY `users`.`id` LIMIT 1";

fn by_name(db: &Session, name: &str) -> Session {
    db.filter("name = ?", &[name.into()])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrapper_sees_every_statement_through_transactions() -> TestResult {
    let (pool, _) = setup("conn_pool_wrapper").await?;
    let recorder = RecordingConnPool::new(Arc::new(pool));
    let db = Session::open(Arc::new(recorder.clone()));

    let tx = db.begin().await?;
    let mut user = new_user("transaction");
    tx.save(&mut user).await?;
    assert!(user.id > 0);
    by_name(&tx, "transaction").first::<User>().await?;

    let mut user1 = new_user("transaction1-1");
    tx.save(&mut user1).await?;
    by_name(&tx, &user1.name).first::<User>().await?;

    assert!(tx.is_in_transaction());
    assert!(tx.conn().as_tx_committer().is_some());
    assert!(!db.is_in_transaction());

    tx.rollback().await?;

    let err = by_name(&db, "transaction")
        .first::<User>()
        .await
        .expect_err("rolled back");
    assert!(err.is_not_found(), "{err}");

    let tx_db = db.filter("fake_name = ?", &["fake_name".into()]);
    let tx2 = tx_db
        .session(SessionConfig {
            new_db: true,
            ..SessionConfig::default()
        })
        .begin()
        .await?;
    let mut user2 = new_user("transaction-2");
    tx2.save(&mut user2).await?;
    by_name(&tx2, "transaction-2").first::<User>().await?;
    tx2.commit().await?;

    let found: User = by_name(&db, "transaction-2").first().await?;
    assert_eq!(found.id, user2.id);

    let expected = vec![
        INSERT_USER,
        FIRST_BY_NAME,
        INSERT_USER,
        FIRST_BY_NAME,
        FIRST_BY_NAME,
        INSERT_USER,
        FIRST_BY_NAME,
        FIRST_BY_NAME,
    ];
    assert_eq!(recorder.statements(), expected);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn injected_failure_is_not_logged_and_can_be_cleared() -> TestResult {
    let (pool, _) = setup("conn_pool_faults").await?;
    let recorder = RecordingConnPool::new(Arc::new(pool)).fail_on(FIRST_BY_NAME, "boom");
    let db = Session::open(Arc::new(recorder.clone()));

    let mut user = new_user("faulty");
    db.create(&mut user).await?;

    let err = by_name(&db, "faulty")
        .first::<User>()
        .await
        .expect_err("faked failure");
    assert!(matches!(err, SqlPreloadError::ExecutionError(ref m) if m == "boom"));
    assert_eq!(recorder.statements(), vec![INSERT_USER]);

    recorder.clear_failures();
    let found: User = by_name(&db, "faulty").first().await?;
    assert_eq!(found.id, user.id);
    assert_eq!(recorder.log().len(), 2);

    recorder.log().clear();
    assert!(recorder.log().is_empty());
    Ok(())
}

#[tokio::test]
async fn wrapper_forwards_ping_and_prepare() -> TestResult {
    let (pool, _) = setup("conn_pool_ping").await?;
    let recorder = RecordingConnPool::new(Arc::new(pool));
    let db = Session::open(Arc::new(recorder.clone()));

    db.ping().await?;
    let prepared = db
        .conn()
        .prepare(db.context(), "SELECT id, name FROM users WHERE id = ?")
        .await?;
    assert_eq!(prepared.column_names, vec!["id", "name"]);
    assert_eq!(prepared.param_count, 1);
    assert!(recorder.log().contains("SELECT id, name FROM users"));
    Ok(())
}
