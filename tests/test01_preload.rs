mod common;

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sql_preload::prelude::*;
use tokio::task::JoinSet;

use common::{Config, TestResult, User, check_pet, check_user, create_user, setup};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preload_with_associations() -> TestResult {
    let (_pool, db) = setup("preload_with_associations").await?;
    let user = create_user(
        &db,
        "preload_with_associations",
        Config {
            account: true,
            pets: 2,
            toys: 3,
            company: true,
            manager: true,
            team: 4,
            languages: 3,
            friends: 1,
            ..Config::default()
        },
    )
    .await?;

    let found: Vec<User> = db.preload(ASSOCIATIONS).eq("id", user.id).find().await?;
    assert_eq!(found.len(), 1);
    check_user(&found[0], &user);

    // loading into a value that already holds another user replaces it wholesale
    let mut other = create_user(
        &db,
        "preload_with_associations_new",
        Config {
            account: true,
            pets: 2,
            ..Config::default()
        },
    )
    .await?;
    db.preload(ASSOCIATIONS)
        .eq("id", user.id)
        .first_into(&mut other)
        .await?;
    check_user(&other, &user);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nested_preload() -> TestResult {
    let (_pool, db) = setup("nested_preload").await?;
    let user = create_user(
        &db,
        "nested_preload",
        Config {
            pets: 2,
            pet_toys: true,
            ..Config::default()
        },
    )
    .await?;

    let got: User = db.preload("pets.toy").eq("id", user.id).first().await?;
    check_user(&got, &user);

    let wildcard = format!("{ASSOCIATIONS}.{ASSOCIATIONS}");
    let got: User = db.preload(&wildcard).eq("id", user.id).first().await?;
    check_user(&got, &user);

    let mut many = Vec::new();
    db.preload("pets.toy")
        .eq("id", user.id)
        .find_into::<User>(&mut many)
        .await?;
    assert_eq!(many.len(), 1);
    check_user(&many[0], &user);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nested_preload_for_slice() -> TestResult {
    let (_pool, db) = setup("nested_preload_for_slice").await?;
    let mut users = Vec::new();
    for (name, pets) in [
        ("slice_nested_preload_1", 2),
        ("slice_nested_preload_2", 0),
        ("slice_nested_preload_3", 3),
    ] {
        let config = Config {
            pets,
            pet_toys: true,
            ..Config::default()
        };
        users.push(create_user(&db, name, config).await?);
    }
    let ids: Vec<RowValues> = users.iter().map(|u| u.id.into()).collect();

    let got: Vec<User> = db
        .preload("pets.toy")
        .is_in("id", ids)
        .order("id")
        .find()
        .await?;
    assert_eq!(got.len(), users.len());
    for (g, want) in got.iter().zip(&users) {
        check_user(g, want);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preload_with_conditions() -> TestResult {
    let (_pool, db) = setup("preload_with_conditions").await?;
    let mut users = Vec::new();
    for (name, account) in [
        ("slice_nested_preload_1", true),
        ("slice_nested_preload_2", false),
        ("slice_nested_preload_3", true),
    ] {
        let config = Config {
            account,
            ..Config::default()
        };
        users.push(create_user(&db, name, config).await?);
    }
    let ids: Vec<RowValues> = users.iter().map(|u| u.id.into()).collect();
    let number = users[0]
        .account
        .as_ref()
        .map(|a| a.number.clone())
        .expect("first user has an account");

    let mut got: Vec<User> = db
        .preload_with("account", vec![PreloadCondition::eq("number", number.as_str())])
        .is_in("id", ids.clone())
        .find()
        .await?;
    got.sort_by_key(|u| u.id);
    assert_eq!(got.len(), 3);
    check_user(&got[0], &users[0]);
    for user in &got[1..] {
        assert!(user.account.is_none(), "no account should match for {}", user.name);
    }

    let mut aliased: Vec<User> = db
        .preload_scope("account", |scope| scope.table_alias("a").select("a.*"))
        .is_in("id", ids)
        .find()
        .await?;
    aliased.sort_by_key(|u| u.id);
    for (g, want) in aliased.iter().zip(&users) {
        check_user(g, want);
    }

    let account = aliased[0].account.as_deref().expect("account loaded").clone();
    db.delete(&account).await?;

    let user: User = db.preload(ASSOCIATIONS).eq("id", aliased[0].id).take().await?;
    assert!(user.account.is_none(), "soft-deleted account must not load");

    let user: User = db
        .preload_scope(ASSOCIATIONS, PreloadScope::unscoped)
        .eq("id", aliased[0].id)
        .take()
        .await?;
    assert_eq!(user.account.map(|a| a.id), Some(account.id));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nested_preload_with_conditions() -> TestResult {
    let (_pool, db) = setup("nested_preload_with_conditions").await?;
    let mut users = Vec::new();
    for (name, pets) in [
        ("slice_nested_preload_1", 2),
        ("slice_nested_preload_2", 0),
        ("slice_nested_preload_3", 3),
    ] {
        let config = Config {
            pets,
            pet_toys: true,
            ..Config::default()
        };
        users.push(create_user(&db, name, config).await?);
    }
    let ids: Vec<RowValues> = users.iter().map(|u| u.id.into()).collect();

    let got: Vec<User> = db
        .preload_with(
            "pets.toy",
            vec![PreloadCondition::raw("name like ?", &["%preload_3".into()])],
        )
        .is_in("id", ids)
        .order("id")
        .find()
        .await?;

    for user in &got[0..2] {
        for pet in &user.pets {
            assert!(pet.toy.is_none(), "no toy expected for {}", pet.name);
        }
    }

    let mut pets = got[2].pets.clone();
    pets.sort_by_key(|p| p.id);
    assert_eq!(pets.len(), 3);
    for pet in &pets[0..2] {
        assert!(pet.toy.is_none(), "no toy expected for {}", pet.name);
    }
    check_pet(&pets[2], &users[2].pets[2]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preload_empty_data_serialises_empty_collections() -> TestResult {
    let (_pool, db) = setup("preload_empty_data").await?;
    let user = create_user(&db, "user_without_associations", Config::default()).await?;
    let empty = Regex::new(r#""team":\[\],"languages":\[\],"friends":\[\]"#)?;

    let query = db
        .preload("team")
        .preload("languages")
        .preload("friends")
        .eq("name", user.name.as_str());

    let first: User = query.first().await?;
    let json = serde_json::to_string(&first)?;
    assert!(empty.is_match(&json), "json: {json}");

    let all: Vec<User> = query.find().await?;
    let json = serde_json::to_string(&all)?;
    assert!(empty.is_match(&json), "json: {json}");

    let records = query.find_records::<User>().await?;
    let json = serde_json::to_string(&records)?;
    for slot in [r#""team":[]"#, r#""languages":[]"#, r#""friends":[]"#, r#""account":null"#] {
        assert!(json.contains(slot), "missing {slot} in {json}");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn preload_from_concurrent_tasks() -> TestResult {
    let (_pool, db) = setup("preload_concurrent").await?;
    let manager = create_user(
        &db,
        "concurrent_manager",
        Config {
            team: 2,
            ..Config::default()
        },
    )
    .await?;

    let base = db.eq("id", manager.id).session(SessionConfig::default());
    let mut set = JoinSet::new();
    for _ in 0..10 {
        let session = base.clone();
        set.spawn(async move { session.preload("team").find::<User>().await });
    }
    while let Some(joined) = set.join_next().await {
        let users = joined??;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].team.len(), 2);
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct UserWithSomething {
    something: String,
    #[serde(flatten)]
    user: User,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preload_into_different_shape() -> TestResult {
    let (_pool, db) = setup("preload_diff_model").await?;
    let user = create_user(
        &db,
        "preload_with_diff_model",
        Config {
            account: true,
            ..Config::default()
        },
    )
    .await?;
    let number = user.account.as_ref().map(|a| a.number.clone()).unwrap_or_default();

    let result: UserWithSomething = db
        .select("users.*, 'yo' as something")
        .preload_with("account", vec![PreloadCondition::eq("number", number.as_str())])
        .filter("name = ?", &[user.name.as_str().into()])
        .first_as::<User, _>()
        .await?;

    assert_eq!(result.something, "yo");
    check_user(&result.user, &user);
    Ok(())
}

#[tokio::test]
async fn unknown_association_fails_before_any_statement() -> TestResult {
    let (pool, _db) = setup("unknown_association").await?;
    let recorder = RecordingConnPool::new(Arc::new(pool));
    let db = Session::open(Arc::new(recorder.clone()));

    let err = db
        .preload("pets.nope")
        .find::<User>()
        .await
        .expect_err("unknown association");
    assert!(
        matches!(&err, SqlPreloadError::UnknownAssociation { model, name } if model == "Pet" && name == "nope"),
        "got {err:?}"
    );
    assert!(recorder.log().is_empty(), "{:?}", recorder.statements());
    Ok(())
}
