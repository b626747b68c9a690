use std::{str::FromStr, sync::atomic::AtomicBool};

use chrono::Utc;
pub use sqlx::Error;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Executor, Row, Sqlite,
};
use teloxide::types::UserId;

use crate::types::{is_premium_at, AdminState, PremiumStatus};

type Pool = sqlx::Pool<Sqlite>;
const DB_PATH: &str = "sqlite:anon_chat.sqlite";
static WAS_CONSTRUCTED: AtomicBool = AtomicBool::new(false);

pub struct Database {
    pool: Pool,
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
impl Database {
    pub async fn new() -> Result<Self, Error> {
        assert!(
            !WAS_CONSTRUCTED.swap(true, std::sync::atomic::Ordering::SeqCst),
            "Second database was constructed. This is not allowed."
        );

        if !Sqlite::database_exists(DB_PATH).await.unwrap_or(false) {
            Sqlite::create_database(DB_PATH).await?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(32)
            .connect_with(
                SqliteConnectOptions::from_str(DB_PATH)
                    .unwrap()
                    .pragma("cache_size", "-32768")
                    .busy_timeout(std::time::Duration::from_secs(600)),
            )
            .await?;

        // Do some init. Create the tables...

        // USERS:
        // user_id (unique primary key, immutable once created)
        // username (best effort, refreshed on every contact)
        // premium_until (unix seconds; 0 for never granted,
        //                1_000_000_000_000 for forever)
        // last_reply_to (who this user is currently replying to)
        // admin_state (grant FSM token; only ever consulted for the admin)
        pool.execute(sqlx::query(
            "
                CREATE TABLE IF NOT EXISTS users (
                    user_id INTEGER PRIMARY KEY NOT NULL,
                    username TEXT NULL,
                    premium_until INTEGER NOT NULL DEFAULT 0,
                    last_reply_to INTEGER NULL,
                    admin_state TEXT NULL
                ) STRICT;",
        ))
        .await?;

        // REFS:
        // user_id (unique primary key) -> target_id
        // One pointer per referrer, last entry link visited wins.
        pool.execute(sqlx::query(
            "
                CREATE TABLE IF NOT EXISTS refs (
                    user_id INTEGER PRIMARY KEY NOT NULL,
                    target_id INTEGER NOT NULL
                ) STRICT;",
        ))
        .await?;

        // Will fail harmlessly if the index already exists.
        let _ = sqlx::query("CREATE INDEX users_username ON users(username COLLATE NOCASE);")
            .execute(&pool)
            .await;

        Ok(Database { pool })
    }

    /// Create the user's row at first contact and refresh their username.
    /// Returns `true` if the user is brand new.
    pub async fn see_user(&self, id: UserId, username: Option<&str>) -> Result<bool, Error> {
        let inserted = sqlx::query(
            "INSERT INTO users(user_id, username) VALUES (?, ?)
        ON CONFLICT DO NOTHING;",
        )
        .bind(id.0 as i64)
        .bind(username)
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            self.update_username(id, username).await?;
        }

        Ok(inserted)
    }

    /// Refresh the username without touching anything else.
    /// A no-op for users that never pressed /start.
    pub async fn update_username(&self, id: UserId, username: Option<&str>) -> Result<(), Error> {
        sqlx::query("UPDATE users SET username=? WHERE user_id=?;")
            .bind(username)
            .bind(id.0 as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn user_exists(&self, id: UserId) -> Result<bool, Error> {
        sqlx::query("SELECT 1 FROM users WHERE user_id=?;")
            .bind(id.0 as i64)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.is_some())
    }

    /// Case-insensitive username lookup. A leading `@` is tolerated.
    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<UserId>, Error> {
        let name = username.trim_start_matches('@');
        sqlx::query("SELECT user_id FROM users WHERE username=? COLLATE NOCASE;")
            .bind(name)
            .map(|row: SqliteRow| UserId(row.get::<i64, _>(0) as u64))
            .fetch_optional(&self.pool)
            .await
    }

    /// Point `user` at `target`, overwriting any previous referral.
    /// A self-referral is never stored; returns whether the pointer was set.
    pub async fn set_ref(&self, user: UserId, target: UserId) -> Result<bool, Error> {
        if user == target {
            return Ok(false);
        }
        sqlx::query("INSERT OR REPLACE INTO refs(user_id, target_id) VALUES (?, ?);")
            .bind(user.0 as i64)
            .bind(target.0 as i64)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }

    pub async fn get_ref(&self, user: UserId) -> Result<Option<UserId>, Error> {
        sqlx::query("SELECT target_id FROM refs WHERE user_id=?;")
            .bind(user.0 as i64)
            .map(|row: SqliteRow| UserId(row.get::<i64, _>(0) as u64))
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn set_last_reply_to(&self, user: UserId, target: UserId) -> Result<(), Error> {
        sqlx::query("UPDATE users SET last_reply_to=? WHERE user_id=?;")
            .bind(target.0 as i64)
            .bind(user.0 as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Idempotent. Clearing an already clear target is fine.
    pub async fn clear_last_reply_to(&self, user: UserId) -> Result<(), Error> {
        sqlx::query("UPDATE users SET last_reply_to=NULL WHERE user_id=?;")
            .bind(user.0 as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_last_reply_to(&self, user: UserId) -> Result<Option<UserId>, Error> {
        sqlx::query("SELECT last_reply_to FROM users WHERE user_id=?;")
            .bind(user.0 as i64)
            .map(|row: SqliteRow| row.get::<Option<i64>, _>(0).map(|id| UserId(id as u64)))
            .fetch_optional(&self.pool)
            .await
            .map(Option::flatten)
    }

    pub async fn set_admin_state(&self, user: UserId, state: AdminState) -> Result<(), Error> {
        sqlx::query("UPDATE users SET admin_state=? WHERE user_id=?;")
            .bind(state.to_db())
            .bind(user.0 as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The raw stored FSM token. Decoding it, including the corrupt
    /// token case, is the caller's business.
    pub async fn get_admin_state_token(&self, user: UserId) -> Result<Option<String>, Error> {
        sqlx::query("SELECT admin_state FROM users WHERE user_id=?;")
            .bind(user.0 as i64)
            .map(|row: SqliteRow| row.get::<Option<String>, _>(0))
            .fetch_optional(&self.pool)
            .await
            .map(Option::flatten)
    }

    /// Works even for users that never pressed /start, so direct
    /// admin grants by id are not lost.
    pub async fn set_premium_until(&self, user: UserId, until: i64) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO users(user_id, premium_until) VALUES (?, ?)
        ON CONFLICT DO
            UPDATE SET premium_until=?;",
        )
        .bind(user.0 as i64)
        .bind(until)
        .bind(until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_premium_until(&self, user: UserId) -> Result<i64, Error> {
        Ok(sqlx::query("SELECT premium_until FROM users WHERE user_id=?;")
            .bind(user.0 as i64)
            .map(|row: SqliteRow| row.get::<i64, _>(0))
            .fetch_optional(&self.pool)
            .await?
            .unwrap_or(0))
    }

    pub async fn is_premium(&self, user: UserId) -> Result<bool, Error> {
        let until = self.get_premium_until(user).await?;
        Ok(is_premium_at(until, Utc::now().timestamp()))
    }

    pub async fn premium_status(&self, user: UserId) -> Result<PremiumStatus, Error> {
        let until = self.get_premium_until(user).await?;
        Ok(PremiumStatus::from_until(until, Utc::now().timestamp()))
    }
}
