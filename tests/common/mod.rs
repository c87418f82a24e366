#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sql_preload::prelude::*;
use tempfile::tempdir;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    // Leak the tempdir so the file persists for the duration of the test binary.
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

pub const SCHEMA_DDL: &str = "
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    name TEXT,
    age INTEGER,
    birthday TEXT,
    company_id INTEGER,
    manager_id INTEGER,
    active INTEGER
);
CREATE TABLE accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    user_id INTEGER,
    number TEXT
);
CREATE TABLE pets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    user_id INTEGER,
    name TEXT
);
CREATE TABLE toys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    name TEXT,
    owner_id INTEGER,
    owner_type TEXT
);
CREATE TABLE companies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT
);
CREATE TABLE languages (
    code TEXT PRIMARY KEY,
    name TEXT
);
CREATE TABLE user_speaks (
    user_id INTEGER NOT NULL,
    language_code TEXT NOT NULL,
    PRIMARY KEY (user_id, language_code)
);
CREATE TABLE user_friends (
    user_id INTEGER NOT NULL,
    friend_id INTEGER NOT NULL,
    PRIMARY KEY (user_id, friend_id)
);
";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
    pub name: String,
    pub age: i64,
    pub birthday: Option<NaiveDateTime>,
    pub company_id: Option<i64>,
    pub manager_id: Option<i64>,
    pub active: bool,
    #[serde(default)]
    pub account: Option<Box<Account>>,
    #[serde(default)]
    pub pets: Vec<Pet>,
    #[serde(default)]
    pub toys: Vec<Toy>,
    #[serde(default)]
    pub company: Option<Box<Company>>,
    #[serde(default)]
    pub manager: Option<Box<User>>,
    #[serde(default)]
    pub team: Vec<User>,
    #[serde(default)]
    pub languages: Vec<Language>,
    #[serde(default)]
    pub friends: Vec<User>,
}

impl Model for User {
    fn schema() -> Schema {
        Schema::builder("User", "users")
            .timestamps()
            .soft_delete()
            .column("name", ColumnType::Text)
            .column("age", ColumnType::Integer)
            .column("birthday", ColumnType::Timestamp)
            .column("company_id", ColumnType::Integer)
            .column("manager_id", ColumnType::Integer)
            .column("active", ColumnType::Bool)
            .has_one::<Account>("account", "user_id")
            .has_many::<Pet>("pets", "user_id")
            .has_many_polymorphic::<Toy>("toys", "owner", "users")
            .belongs_to::<Company>("company", "company_id")
            .belongs_to::<User>("manager", "manager_id")
            .has_many::<User>("team", "manager_id")
            .many_to_many::<Language>(
                "languages",
                JoinTable::new("user_speaks", "user_id", "language_code"),
            )
            .many_to_many::<User>(
                "friends",
                JoinTable::new("user_friends", "user_id", "friend_id"),
            )
            .build()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
    pub user_id: Option<i64>,
    pub number: String,
}

impl Model for Account {
    fn schema() -> Schema {
        Schema::builder("Account", "accounts")
            .timestamps()
            .soft_delete()
            .column("user_id", ColumnType::Integer)
            .column("number", ColumnType::Text)
            .build()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pet {
    pub id: i64,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
    pub user_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub toy: Option<Box<Toy>>,
}

impl Model for Pet {
    fn schema() -> Schema {
        Schema::builder("Pet", "pets")
            .timestamps()
            .soft_delete()
            .column("user_id", ColumnType::Integer)
            .column("name", ColumnType::Text)
            .has_one_polymorphic::<Toy>("toy", "owner", "pets")
            .build()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Toy {
    pub id: i64,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
    pub name: String,
    pub owner_id: i64,
    pub owner_type: String,
}

impl Model for Toy {
    fn schema() -> Schema {
        Schema::builder("Toy", "toys")
            .timestamps()
            .soft_delete()
            .column("name", ColumnType::Text)
            .column("owner_id", ColumnType::Integer)
            .column("owner_type", ColumnType::Text)
            .build()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
}

impl Model for Company {
    fn schema() -> Schema {
        Schema::builder("Company", "companies")
            .column("name", ColumnType::Text)
            .build()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Language {
    pub code: String,
    pub name: String,
}

impl Model for Language {
    fn schema() -> Schema {
        Schema::builder("Language", "languages")
            .primary_key("code", ColumnType::Text)
            .column("name", ColumnType::Text)
            .build()
    }
}

/// What to create alongside a user.
#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    pub account: bool,
    pub pets: usize,
    pub pet_toys: bool,
    pub toys: usize,
    pub company: bool,
    pub manager: bool,
    pub team: usize,
    pub languages: usize,
    pub friends: usize,
}

/// Fresh database with the fixture schema; returns the pool and a root session.
pub async fn setup(prefix: &str) -> Result<(SqlitePool, Session), Box<dyn std::error::Error>> {
    let pool = SqlitePool::builder(unique_db_path(prefix)).build().await?;
    pool.execute_batch(SCHEMA_DDL).await?;
    let db = Session::open(Arc::new(pool.clone()));
    Ok((pool, db))
}

/// Unsaved user with the scalar fields filled in.
pub fn new_user(name: &str) -> User {
    User {
        name: name.to_owned(),
        age: 18,
        birthday: Some(Utc::now().naive_utc()),
        active: true,
        ..User::default()
    }
}

/// Insert a user plus the associations `config` asks for, returning the
/// graph a full preload is expected to produce.
pub async fn create_user(db: &Session, name: &str, config: Config) -> Result<User, SqlPreloadError> {
    let mut user = new_user(name);

    if config.company {
        let mut company = Company {
            name: format!("company-{name}"),
            ..Company::default()
        };
        db.create(&mut company).await?;
        user.company_id = Some(company.id);
        user.company = Some(Box::new(company));
    }
    if config.manager {
        let mut manager = new_user(&format!("{name}_manager"));
        db.create(&mut manager).await?;
        user.manager_id = Some(manager.id);
        user.manager = Some(Box::new(manager));
    }

    db.create(&mut user).await?;
    let id = user.id;

    if config.account {
        let mut account = Account {
            user_id: Some(id),
            number: format!("{name}_account"),
            ..Account::default()
        };
        db.create(&mut account).await?;
        user.account = Some(Box::new(account));
    }

    for i in 1..=config.pets {
        let mut pet = Pet {
            user_id: Some(id),
            name: format!("{name}_pet_{i}"),
            ..Pet::default()
        };
        db.create(&mut pet).await?;
        if config.pet_toys {
            let mut toy = Toy {
                name: format!("{name}_toy_nested_preload_{i}"),
                owner_id: pet.id,
                owner_type: "pets".to_owned(),
                ..Toy::default()
            };
            db.create(&mut toy).await?;
            pet.toy = Some(Box::new(toy));
        }
        user.pets.push(pet);
    }

    for i in 1..=config.toys {
        let mut toy = Toy {
            name: format!("{name}_toy_{i}"),
            owner_id: id,
            owner_type: "users".to_owned(),
            ..Toy::default()
        };
        db.create(&mut toy).await?;
        user.toys.push(toy);
    }

    for i in 1..=config.team {
        let mut member = new_user(&format!("{name}_team_{i}"));
        member.manager_id = Some(id);
        db.create(&mut member).await?;
        user.team.push(member);
    }

    for i in 1..=config.languages {
        let mut language = Language {
            code: format!("{name}_lang_{i}"),
            name: format!("{name}_language_{i}"),
        };
        db.create(&mut language).await?;
        db.exec(
            "INSERT INTO user_speaks (user_id, language_code) VALUES (?, ?)",
            &[id.into(), language.code.as_str().into()],
        )
        .await?;
        user.languages.push(language);
    }

    for i in 1..=config.friends {
        let mut friend = new_user(&format!("{name}_friend_{i}"));
        db.create(&mut friend).await?;
        db.exec(
            "INSERT INTO user_friends (user_id, friend_id) VALUES (?, ?)",
            &[id.into(), friend.id.into()],
        )
        .await?;
        user.friends.push(friend);
    }

    Ok(user)
}

fn ids(users: &[User]) -> Vec<(i64, String)> {
    let mut out: Vec<_> = users.iter().map(|u| (u.id, u.name.clone())).collect();
    out.sort();
    out
}

pub fn check_pet(got: &Pet, want: &Pet) {
    assert_eq!(got.id, want.id, "pet id");
    assert_eq!(got.name, want.name, "pet name");
    assert_eq!(got.user_id, want.user_id, "pet owner");
    assert_eq!(
        got.toy.as_ref().map(|t| (t.id, t.name.as_str())),
        want.toy.as_ref().map(|t| (t.id, t.name.as_str())),
        "toy of pet {}",
        want.name
    );
}

/// Compare scalar columns and every association slot by key and name.
pub fn check_user(got: &User, want: &User) {
    assert_eq!(got.id, want.id, "user id");
    assert_eq!(got.name, want.name, "user name");
    assert_eq!(got.age, want.age, "age of {}", want.name);
    assert_eq!(got.active, want.active, "active flag of {}", want.name);
    assert_eq!(got.company_id, want.company_id, "company id of {}", want.name);
    assert_eq!(got.manager_id, want.manager_id, "manager id of {}", want.name);

    assert_eq!(
        got.account.as_ref().map(|a| (a.id, a.number.as_str())),
        want.account.as_ref().map(|a| (a.id, a.number.as_str())),
        "account of {}",
        want.name
    );
    assert_eq!(
        got.company.as_ref().map(|c| (c.id, c.name.as_str())),
        want.company.as_ref().map(|c| (c.id, c.name.as_str())),
        "company of {}",
        want.name
    );
    assert_eq!(
        got.manager.as_ref().map(|m| (m.id, m.name.as_str())),
        want.manager.as_ref().map(|m| (m.id, m.name.as_str())),
        "manager of {}",
        want.name
    );

    let mut pets = got.pets.clone();
    pets.sort_by_key(|p| p.id);
    assert_eq!(pets.len(), want.pets.len(), "pet count of {}", want.name);
    for (g, w) in pets.iter().zip(&want.pets) {
        check_pet(g, w);
    }

    let mut toys: Vec<_> = got.toys.iter().map(|t| (t.id, t.name.clone())).collect();
    toys.sort();
    let want_toys: Vec<_> = want.toys.iter().map(|t| (t.id, t.name.clone())).collect();
    assert_eq!(toys, want_toys, "toys of {}", want.name);

    assert_eq!(ids(&got.team), ids(&want.team), "team of {}", want.name);
    assert_eq!(ids(&got.friends), ids(&want.friends), "friends of {}", want.name);

    let mut languages: Vec<_> = got.languages.iter().map(|l| l.code.clone()).collect();
    languages.sort();
    let want_languages: Vec<_> = want.languages.iter().map(|l| l.code.clone()).collect();
    assert_eq!(languages, want_languages, "languages of {}", want.name);
}
