//! The persistent user store and its single-writer register queue.
//!
//! Two tables: one row per established identity, and one password row per in-proxy account. All
//! writes funnel through a bounded queue consumed by a single writer task, so at any instant at
//! most one registration executes and concurrent registrations of the same uuid cannot both
//! succeed.

use crate::auth::is_offline_source;
use crate::config::DatabaseConfig;
use crate::error::Error;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

/// How many register requests may queue up before senders block.
pub const REGISTER_QUEUE_CAPACITY: usize = 16;

// No FOREIGN KEY on password_record.uuid: sqlite only accepts uniquely-indexed parent columns,
// and user_record.uuid stays non-unique so one uuid can later hold records from several sources.
// The single writer upholds the reference instead.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS user_record (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL,
    uuid            TEXT NOT NULL,
    registered_at   TEXT NOT NULL,
    source          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS user_record_uuid ON user_record (uuid);
CREATE INDEX IF NOT EXISTS user_record_name ON user_record (name);

CREATE TABLE IF NOT EXISTS password_record (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid        TEXT UNIQUE NOT NULL,
    password    TEXT NOT NULL
);
";

/// One established identity: where a uuid/name pair came from and when it registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub name: String,
    pub uuid: Uuid,
    pub registered_at: DateTime<Utc>,
    pub source: String,
}

impl UserRecord {
    /// A record that has not been inserted yet (the row id is assigned by the database).
    pub fn new(name: impl Into<String>, uuid: Uuid, source: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            uuid,
            registered_at: Utc::now(),
            source: source.into(),
        }
    }

    /// Whether this record belongs to an in-proxy account.
    pub fn is_offline(&self) -> bool {
        is_offline_source(&self.source)
    }
}

/// The hashed password bound to an in-proxy account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRecord {
    pub id: i64,
    pub uuid: Uuid,
    pub password_hash: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    uuid: String,
    registered_at: String,
    source: String,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = Error;

    fn try_from(row: UserRow) -> Result<Self, Error> {
        let uuid = Uuid::parse_str(&row.uuid)
            .map_err(|err| Error::InvalidRecord(format!("bad uuid {:?}: {err}", row.uuid)))?;
        let registered_at = DateTime::parse_from_rfc3339(&row.registered_at)
            .map_err(|err| {
                Error::InvalidRecord(format!("bad timestamp {:?}: {err}", row.registered_at))
            })?
            .with_timezone(&Utc);

        Ok(UserRecord {
            id: row.id,
            name: row.name,
            uuid,
            registered_at,
            source: row.source,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PasswordRow {
    id: i64,
    uuid: String,
    password: String,
}

impl TryFrom<PasswordRow> for PasswordRecord {
    type Error = Error;

    fn try_from(row: PasswordRow) -> Result<Self, Error> {
        let uuid = Uuid::parse_str(&row.uuid)
            .map_err(|err| Error::InvalidRecord(format!("bad uuid {:?}: {err}", row.uuid)))?;

        Ok(PasswordRecord {
            id: row.id,
            uuid,
            password_hash: row.password,
        })
    }
}

/// The SQLite-backed user store.
///
/// The pool is limited to a single connection: the store is small, reads are cheap, and a single
/// connection makes the in-memory database shared between all callers.
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    /// Connects to the configured database and creates the schema if it does not exist yet.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, Error> {
        if config.driver != "sqlite" {
            return Err(Error::Config(format!(
                "unsupported database driver {:?} (only \"sqlite\" is compiled in)",
                config.driver
            )));
        }

        // the single long-lived connection also keeps an in-memory database alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&config.dsn)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// All records for a uuid, ordered by registration time ascending.
    pub async fn find_by_uuid(&self, uuid: &Uuid) -> Result<Vec<UserRecord>, Error> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, name, uuid, registered_at, source FROM user_record \
             WHERE uuid = ?1 ORDER BY registered_at ASC",
        )
        .bind(uuid.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserRecord::try_from).collect()
    }

    /// All records holding the given name, in no particular order.
    pub async fn find_by_name(&self, name: &str) -> Result<Vec<UserRecord>, Error> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, name, uuid, registered_at, source FROM user_record WHERE name = ?1",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(UserRecord::try_from).collect()
    }

    /// The password record for a uuid, if one exists.
    pub async fn password_by_uuid(&self, uuid: &Uuid) -> Result<Option<PasswordRecord>, Error> {
        let row: Option<PasswordRow> =
            sqlx::query_as("SELECT id, uuid, password FROM password_record WHERE uuid = ?1")
                .bind(uuid.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(PasswordRecord::try_from).transpose()
    }

    /// Inserts the record (and its password, if any) unless the uuid is already registered.
    ///
    /// Runs in a single transaction so a concurrent writer can never observe the user without its
    /// password row.
    pub async fn try_register(
        &self,
        record: &UserRecord,
        password_hash: Option<&str>,
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_record WHERE uuid = ?1")
            .bind(record.uuid.to_string())
            .fetch_one(&mut *tx)
            .await?;
        if existing > 0 {
            return Err(Error::UserAlreadyRegistered);
        }

        sqlx::query(
            "INSERT INTO user_record (name, uuid, registered_at, source) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&record.name)
        .bind(record.uuid.to_string())
        .bind(record.registered_at.to_rfc3339())
        .bind(&record.source)
        .execute(&mut *tx)
        .await?;

        if let Some(hash) = password_hash {
            sqlx::query("INSERT INTO password_record (uuid, password) VALUES (?1, ?2)")
                .bind(record.uuid.to_string())
                .bind(hash)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

/// One in-flight registration: the record to insert and the channel that reports the outcome.
pub struct RegisterRequest {
    pub record: UserRecord,
    pub password_hash: Option<String>,
    pub ack: oneshot::Sender<Result<(), Error>>,
}

/// Spawns the single writer task and returns the queue feeding it.
///
/// Every request's ack fires exactly once: with the registration outcome while the writer runs,
/// or with [`Error::RegisterQueueClosed`] for requests drained after cancellation.
pub fn spawn_writer(
    store: std::sync::Arc<UserStore>,
    cancel: CancellationToken,
) -> mpsc::Sender<RegisterRequest> {
    let (tx, mut rx) = mpsc::channel::<RegisterRequest>(REGISTER_QUEUE_CAPACITY);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => {
                        let result = store
                            .try_register(&request.record, request.password_hash.as_deref())
                            .await;
                        if let Err(err) = &result {
                            debug!(
                                uuid = %request.record.uuid,
                                cause = err.to_string(),
                                "registration rejected"
                            );
                        }
                        if request.ack.send(result).is_err() {
                            error!("register ack receiver dropped before completion");
                        }
                    }
                    None => break,
                },
            }
        }

        // fail fast for everything still queued, so no callback is lost
        rx.close();
        while let Some(request) = rx.recv().await {
            let _ = request.ack.send(Err(Error::RegisterQueueClosed));
        }
        debug!("user store writer stopped");
    });

    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn memory_store() -> UserStore {
        UserStore::connect(&DatabaseConfig::default())
            .await
            .expect("connect store")
    }

    #[tokio::test]
    async fn register_and_find() {
        let store = memory_store().await;
        let record = UserRecord::new("alice", crate::auth::offline_uuid("alice"), "offline");

        store.try_register(&record, None).await.expect("register");

        let found = store.find_by_uuid(&record.uuid).await.expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "alice");
        assert_eq!(found[0].source, "offline");
        assert!(found[0].id > 0);

        let by_name = store.find_by_name("alice").await.expect("find by name");
        assert_eq!(by_name.len(), 1);
        assert!(store.find_by_name("bob").await.expect("miss").is_empty());
    }

    #[tokio::test]
    async fn duplicate_uuid_is_rejected_without_inserting() {
        let store = memory_store().await;
        let record = UserRecord::new("alice", crate::auth::offline_uuid("alice"), "offline");

        store.try_register(&record, None).await.expect("register");
        let second = store.try_register(&record, None).await;
        assert!(matches!(second, Err(Error::UserAlreadyRegistered)));

        let found = store.find_by_uuid(&record.uuid).await.expect("find");
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn password_is_stored_in_the_same_transaction() {
        let store = memory_store().await;
        let record = UserRecord::new("alice", crate::auth::offline_uuid("alice"), "offline");

        store
            .try_register(&record, Some("$argon2id$fake"))
            .await
            .expect("register");

        let password = store
            .password_by_uuid(&record.uuid)
            .await
            .expect("query")
            .expect("password row");
        assert_eq!(password.password_hash, "$argon2id$fake");
        assert_eq!(password.uuid, record.uuid);

        assert!(
            store
                .password_by_uuid(&crate::auth::offline_uuid("bob"))
                .await
                .expect("query")
                .is_none()
        );
    }

    #[tokio::test]
    async fn records_are_ordered_by_registration_time() {
        let store = memory_store().await;
        let uuid = crate::auth::offline_uuid("alice");

        // bypass try_register to seed two rows with distinct timestamps
        let mut early = UserRecord::new("alice", uuid, "mojang");
        early.registered_at = "2024-01-01T00:00:00Z".parse().expect("timestamp");
        let mut late = UserRecord::new("alice", uuid, "offline");
        late.registered_at = "2025-01-01T00:00:00Z".parse().expect("timestamp");

        for record in [&late, &early] {
            sqlx::query(
                "INSERT INTO user_record (name, uuid, registered_at, source) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&record.name)
            .bind(record.uuid.to_string())
            .bind(record.registered_at.to_rfc3339())
            .bind(&record.source)
            .execute(&store.pool)
            .await
            .expect("seed");
        }

        let found = store.find_by_uuid(&uuid).await.expect("find");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].source, "mojang");
        assert_eq!(found[1].source, "offline");
    }

    #[tokio::test]
    async fn concurrent_registrations_of_one_uuid_yield_exactly_one_row() {
        let store = Arc::new(memory_store().await);
        let cancel = CancellationToken::new();
        let queue = spawn_writer(Arc::clone(&store), cancel.child_token());

        let uuid = crate::auth::offline_uuid("alice");
        let mut acks = Vec::new();
        for i in 0..8 {
            let (ack, rx) = oneshot::channel();
            queue
                .send(RegisterRequest {
                    record: UserRecord::new(format!("alice{i}"), uuid, "offline"),
                    password_hash: None,
                    ack,
                })
                .await
                .expect("enqueue");
            acks.push(rx);
        }

        let mut successes = 0;
        let mut duplicates = 0;
        for rx in acks {
            match rx.await.expect("ack fired") {
                Ok(()) => successes += 1,
                Err(Error::UserAlreadyRegistered) => duplicates += 1,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(duplicates, 7);

        let found = store.find_by_uuid(&uuid).await.expect("find");
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_writer_fails_requests_fast() {
        let store = Arc::new(memory_store().await);
        let cancel = CancellationToken::new();
        let queue = spawn_writer(Arc::clone(&store), cancel.child_token());

        cancel.cancel();
        // wait for the writer to observe cancellation and close the queue
        queue.closed().await;

        let (ack, _rx) = oneshot::channel();
        let result = queue
            .send(RegisterRequest {
                record: UserRecord::new("late", crate::auth::offline_uuid("late"), "offline"),
                password_hash: None,
                ack,
            })
            .await;
        assert!(result.is_err());
    }
}
