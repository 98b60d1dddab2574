use std::{path::Path, time::Duration};

use {
    async_trait::async_trait,
    serde::Serialize,
    sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    thiserror::Error,
    tracing::debug,
};

use hookgate_common::UserId;

/// A user row as the gateway sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub token: String,
    pub webhook: String,
    /// Linked identity; empty until the first pairing succeeds.
    pub jid: String,
    /// Pending pairing code as a `data:` URL; empty outside pairing.
    pub qrcode: String,
    pub connected: bool,
    /// Comma-separated subscription labels.
    pub events: String,
    pub os_name: String,
    pub platform_type: String,
}

/// Fields supplied when provisioning a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub name: String,
    pub token: String,
    pub webhook: String,
    pub events: String,
    pub os_name: String,
    pub platform_type: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user {0} not found")]
    NotFound(UserId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Point reads and updates of user rows, scoped by id.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<User, StoreError>;

    /// Users whose last persisted state was connected.
    async fn list_connected(&self) -> Result<Vec<User>, StoreError>;

    async fn set_qrcode(&self, id: UserId, qrcode: &str) -> Result<(), StoreError>;

    async fn set_connected(&self, id: UserId, connected: bool) -> Result<(), StoreError>;

    async fn set_jid(&self, id: UserId, jid: &str) -> Result<(), StoreError>;
}

// ── SQLite-backed store ─────────────────────────────────────────────────────

pub struct SqliteUserStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    token: String,
    webhook: String,
    jid: String,
    qrcode: String,
    connected: i64,
    events: String,
    osname: String,
    platformtype: String,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: UserId(r.id),
            name: r.name,
            token: r.token,
            webhook: r.webhook,
            jid: r.jid,
            qrcode: r.qrcode,
            connected: r.connected != 0,
            events: r.events,
            os_name: r.osname,
            platform_type: r.platformtype,
        }
    }
}

const USER_COLUMNS: &str =
    "id, name, token, webhook, jid, qrcode, connected, events, osname, platformtype";

/// Run an `ADD COLUMN`; a column that already exists is not an error.
async fn add_column(pool: &SqlitePool, ddl: &str) -> Result<(), StoreError> {
    match sqlx::query(ddl).execute(pool).await {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.message().contains("duplicate column name") => {
            debug!(ddl, "column already present");
            Ok(())
        },
        Err(e) => Err(e.into()),
    }
}

fn expect_one_row(id: UserId, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}

impl SqliteUserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database file and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(3000));
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::init(&pool).await?;
        debug!(path = %path.display(), "user database ready");
        Ok(Self::new(pool))
    }

    /// Create the `users` table if it doesn't exist.
    pub async fn init(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS users (
                id           INTEGER NOT NULL PRIMARY KEY,
                name         TEXT NOT NULL,
                token        TEXT NOT NULL UNIQUE,
                webhook      TEXT NOT NULL DEFAULT '',
                jid          TEXT NOT NULL DEFAULT '',
                qrcode       TEXT NOT NULL DEFAULT '',
                connected    INTEGER NOT NULL DEFAULT 0,
                events       TEXT NOT NULL DEFAULT 'All',
                osname       TEXT NOT NULL DEFAULT '',
                platformtype TEXT NOT NULL DEFAULT ''
            )"#,
        )
        .execute(pool)
        .await?;

        // Columns added after the first schema.
        add_column(pool, "ALTER TABLE users ADD COLUMN osname TEXT NOT NULL DEFAULT ''").await?;
        add_column(
            pool,
            "ALTER TABLE users ADD COLUMN platformtype TEXT NOT NULL DEFAULT ''",
        )
        .await?;

        Ok(())
    }

    /// Insert a user and return its id.
    pub async fn create_user(&self, user: &NewUser) -> Result<UserId, StoreError> {
        let result = sqlx::query(
            r#"INSERT INTO users (name, token, webhook, events, osname, platformtype)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&user.name)
        .bind(&user.token)
        .bind(&user.webhook)
        .bind(&user.events)
        .bind(&user.os_name)
        .bind(&user.platform_type)
        .execute(&self.pool)
        .await?;
        Ok(UserId(result.last_insert_rowid()))
    }

    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn get_user(&self, id: UserId) -> Result<User, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(Into::into)
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_connected(&self) -> Result<Vec<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE connected = 1 ORDER BY id ASC");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_qrcode(&self, id: UserId, qrcode: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET qrcode = ? WHERE id = ?")
            .bind(qrcode)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        expect_one_row(id, result.rows_affected())
    }

    async fn set_connected(&self, id: UserId, connected: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET connected = ? WHERE id = ?")
            .bind(i64::from(connected))
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        expect_one_row(id, result.rows_affected())
    }

    async fn set_jid(&self, id: UserId, jid: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET jid = ? WHERE id = ?")
            .bind(jid)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        expect_one_row(id, result.rows_affected())
    }
}
