mod common;

use std::sync::Arc;

use sql_preload::prelude::*;

use common::{Config, TestResult, User, check_user, create_user, setup};

const ALL: [&str; 8] = [
    "account",
    "pets",
    "toys",
    "company",
    "manager",
    "team",
    "languages",
    "friends",
];

async fn seeded(prefix: &str) -> Result<(RecordingConnPool, Session, User), Box<dyn std::error::Error>> {
    let (pool, db) = setup(prefix).await?;
    let user = create_user(
        &db,
        prefix,
        Config {
            account: true,
            pets: 2,
            pet_toys: true,
            toys: 1,
            company: true,
            manager: true,
            team: 2,
            languages: 2,
            friends: 2,
        },
    )
    .await?;
    let recorder = RecordingConnPool::new(Arc::new(pool));
    let db = Session::open(Arc::new(recorder.clone()));
    Ok((recorder, db, user))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wildcard_matches_explicit_names() -> TestResult {
    let (recorder, db, user) = seeded("wildcard_explicit").await?;

    let wildcard = db.preload(ASSOCIATIONS).eq("id", user.id).fetch::<User>().await?;
    let wildcard_sql = recorder.statements();
    recorder.log().clear();

    let explicit = ALL
        .iter()
        .fold(db.eq("id", user.id), |s, name| s.preload(name))
        .fetch::<User>()
        .await?;
    let explicit_sql = recorder.statements();

    assert!(wildcard.preload_error.is_none());
    assert_eq!(wildcard.records, explicit.records);
    assert_eq!(wildcard_sql, explicit_sql);
    // root + one per association, two for each many-to-many
    assert_eq!(wildcard_sql.len(), 1 + ALL.len() + 2);

    let typed: User = wildcard.records[0].decode()?;
    let mut want = user.clone();
    for pet in &mut want.pets {
        pet.toy = None;
    }
    check_user(&typed, &want);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nested_wildcard_matches_explicit_paths() -> TestResult {
    let (recorder, db, user) = seeded("wildcard_nested").await?;

    let wildcard = db
        .preload(&format!("{ASSOCIATIONS}.{ASSOCIATIONS}"))
        .eq("id", user.id)
        .fetch::<User>()
        .await?;
    recorder.log().clear();

    let mut explicit = db.eq("id", user.id).preload(ASSOCIATIONS);
    explicit = explicit.preload("pets.toy");
    for name in ALL {
        explicit = explicit.preload(&format!("manager.{name}"));
        explicit = explicit.preload(&format!("team.{name}"));
        explicit = explicit.preload(&format!("friends.{name}"));
    }
    let explicit = explicit.fetch::<User>().await?;

    assert!(wildcard.preload_error.is_none());
    assert_eq!(wildcard.records, explicit.records);

    let typed: User = wildcard.records[0].decode()?;
    check_user(&typed, &user);
    let manager = typed.manager.as_deref().expect("manager loaded");
    assert!(
        manager.team.iter().any(|member| member.id == user.id),
        "manager.team is loaded through the nested wildcard"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shared_prefixes_load_once() -> TestResult {
    let (recorder, db, user) = seeded("wildcard_prefixes").await?;

    let got: User = db
        .preload("pets")
        .preload("pets.toy")
        .preload(" pets..toy ")
        .eq("id", user.id)
        .first()
        .await?;

    assert_eq!(got.pets.len(), 2);
    assert!(got.pets.iter().all(|p| p.toy.is_some()));
    let statements = recorder.statements();
    assert_eq!(statements.len(), 3, "{statements:#?}");
    assert_eq!(statements.iter().filter(|s| s.contains("FROM `pets`")).count(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn later_conditions_replace_earlier_ones() -> TestResult {
    let (_recorder, db, user) = seeded("wildcard_conditions").await?;

    let got: User = db
        .preload_with("pets", vec![PreloadCondition::eq("name", "no such pet")])
        .preload_with("pets", vec![PreloadCondition::eq("name", user.pets[0].name.as_str())])
        .eq("id", user.id)
        .first()
        .await?;
    assert_eq!(got.pets.len(), 1);
    assert_eq!(got.pets[0].id, user.pets[0].id);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn many_to_many_skips_target_query_without_links() -> TestResult {
    let (pool, db) = setup("wildcard_no_links").await?;
    let lonely = create_user(&db, "lonely", Config::default()).await?;
    let recorder = RecordingConnPool::new(Arc::new(pool));
    let db = Session::open(Arc::new(recorder.clone()));

    let got: User = db.preload("languages").eq("id", lonely.id).first().await?;
    assert!(got.languages.is_empty());
    assert!(recorder.log().contains("FROM `user_speaks`"));
    assert!(!recorder.log().contains("FROM `languages`"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn null_foreign_keys_issue_no_query() -> TestResult {
    let (pool, db) = setup("wildcard_null_keys").await?;
    let plain = create_user(&db, "plain", Config::default()).await?;
    let recorder = RecordingConnPool::new(Arc::new(pool));
    let db = Session::open(Arc::new(recorder.clone()));

    let got: User = db
        .preload("company")
        .preload("manager")
        .eq("id", plain.id)
        .first()
        .await?;
    assert!(got.company.is_none());
    assert!(got.manager.is_none());
    assert_eq!(recorder.log().len(), 1, "{:?}", recorder.statements());
    Ok(())
}
