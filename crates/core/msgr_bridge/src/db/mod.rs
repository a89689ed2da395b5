//! Typed SQLite store with a versioned, monotonic upgrade chain.

mod backfill_queue;
mod message;
mod portal;
mod puppet;
mod reaction;
mod user;
mod user_portal;

pub use backfill_queue::Backfill;
pub use backfill_queue::BackfillType;
pub use message::Message;
pub use portal::Portal;
pub use portal::ThreadType;
pub use puppet::Puppet;
pub use reaction::Reaction;
pub use user::User;
pub use user_portal::UserPortal;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Schema upgrades, applied in order inside a transaction each.
/// Every entry bumps the version by one; entry N produces schema version N+1.
const UPGRADES: &[(&str, &str)] = &[
    (
        "initial revision",
        r#"
        CREATE TABLE "user" (
            mxid        TEXT PRIMARY KEY,
            fbid        BIGINT,
            state       TEXT,
            notice_room TEXT,
            seq_id      BIGINT
        );
        CREATE TABLE portal (
            fbid        BIGINT,
            fb_receiver BIGINT,
            fb_type     TEXT NOT NULL,
            mxid        TEXT UNIQUE,
            name        TEXT,
            photo_id    TEXT,
            avatar_url  TEXT,
            encrypted   BOOLEAN NOT NULL DEFAULT false,
            PRIMARY KEY (fbid, fb_receiver)
        );
        CREATE TABLE puppet (
            fbid          BIGINT PRIMARY KEY,
            name          TEXT,
            photo_id      TEXT,
            photo_mxc     TEXT,
            name_set      BOOLEAN NOT NULL DEFAULT false,
            avatar_set    BOOLEAN NOT NULL DEFAULT false,
            is_registered BOOLEAN NOT NULL DEFAULT false,
            custom_mxid   TEXT,
            access_token  TEXT
        );
        CREATE TABLE message (
            mxid        TEXT NOT NULL,
            mx_room     TEXT NOT NULL,
            fbid        TEXT,
            "index"     SMALLINT NOT NULL DEFAULT 0,
            fb_chat     BIGINT NOT NULL,
            fb_receiver BIGINT NOT NULL,
            fb_sender   BIGINT NOT NULL,
            timestamp   BIGINT NOT NULL,
            UNIQUE (mxid, mx_room)
        );
        CREATE UNIQUE INDEX message_fbid_idx ON message (fbid, fb_receiver, "index");
        CREATE TABLE reaction (
            mxid        TEXT NOT NULL,
            mx_room     TEXT NOT NULL,
            fb_msgid    TEXT NOT NULL,
            fb_receiver BIGINT NOT NULL,
            fb_sender   BIGINT NOT NULL,
            reaction    TEXT NOT NULL,
            PRIMARY KEY (fb_msgid, fb_receiver, fb_sender)
        );
        CREATE TABLE user_portal (
            "user"          BIGINT NOT NULL,
            portal          BIGINT NOT NULL,
            portal_receiver BIGINT NOT NULL,
            PRIMARY KEY ("user", portal, portal_receiver)
        );
        "#,
    ),
    (
        "store message offline threading ids",
        r#"
        ALTER TABLE message ADD COLUMN fb_txn_id BIGINT;
        CREATE UNIQUE INDEX message_txn_idx
            ON message (fb_txn_id, fb_sender, fb_receiver, "index");
        "#,
    ),
    (
        "track whether portal metadata is set",
        r#"
        ALTER TABLE portal ADD COLUMN name_set BOOLEAN NOT NULL DEFAULT false;
        ALTER TABLE portal ADD COLUMN avatar_set BOOLEAN NOT NULL DEFAULT false;
        ALTER TABLE portal ADD COLUMN relay_user_id TEXT;
        "#,
    ),
    (
        "add backfill queue",
        r#"
        CREATE TABLE backfill_queue (
            queue_id           INTEGER PRIMARY KEY AUTOINCREMENT,
            user_mxid          TEXT NOT NULL,
            type               INTEGER NOT NULL,
            priority           INTEGER NOT NULL,
            portal_fbid        BIGINT NOT NULL,
            portal_fb_receiver BIGINT NOT NULL,
            num_pages          INTEGER NOT NULL,
            page_delay         INTEGER NOT NULL DEFAULT 0,
            post_batch_delay   INTEGER NOT NULL DEFAULT 0,
            max_total_pages    INTEGER NOT NULL DEFAULT -1,
            dispatch_time      BIGINT,
            completed_at       BIGINT
        );
        "#,
    ),
    (
        "store realtime resume state and double puppet targets",
        r#"
        ALTER TABLE "user" ADD COLUMN connect_token_hash BLOB;
        ALTER TABLE puppet ADD COLUMN next_batch TEXT;
        ALTER TABLE puppet ADD COLUMN base_url TEXT;
        "#,
    ),
    (
        "zero the receiver of non-DM portals",
        r#"
        UPDATE portal SET fb_receiver=0 WHERE fb_type<>'USER';
        "#,
    ),
];

impl Database {
    pub async fn connect(uri: &str) -> Result<Database, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(uri)
            .await?;
        let db = Database { pool };
        db.upgrade().await?;
        Ok(db)
    }

    /// A private in-memory store, for tests.
    pub async fn in_memory() -> Result<Database, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Database { pool };
        db.upgrade().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn upgrade(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;
        let (current,): (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM version")
            .fetch_one(&self.pool)
            .await?;
        let current = current.unwrap_or(0);
        for (index, (description, sql)) in UPGRADES.iter().enumerate() {
            let target = index as i64 + 1;
            if target <= current {
                continue;
            }
            info!("Upgrading database to v{target}: {description}");
            let mut tx = self.pool.begin().await?;
            for statement in split_statements(sql) {
                sqlx::query(&statement).execute(&mut *tx).await?;
            }
            sqlx::query("DELETE FROM version").execute(&mut *tx).await?;
            sqlx::query("INSERT INTO version (version) VALUES (?)")
                .bind(target)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }
}

/// Split a migration batch into single statements for the sqlite driver.
fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upgrades_apply_cleanly_and_idempotently() {
        let db = Database::in_memory().await.unwrap();
        let (version,): (i64,) = sqlx::query_as("SELECT MAX(version) FROM version")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(version, UPGRADES.len() as i64);
        // A second pass is a no-op.
        db.upgrade().await.unwrap();
    }

    #[tokio::test]
    async fn message_uniqueness_constraints_hold() {
        let db = Database::in_memory().await.unwrap();
        let insert = |mxid: &str, fbid: Option<&str>, txn: Option<i64>| {
            let mxid = mxid.to_string();
            let fbid = fbid.map(str::to_string);
            let pool = db.pool().clone();
            async move {
                sqlx::query(
                    r#"INSERT INTO message (mxid, mx_room, fbid, fb_txn_id, "index",
                       fb_chat, fb_receiver, fb_sender, timestamp)
                       VALUES (?, '!r:x', ?, ?, 0, 1, 2, 3, 0)"#,
                )
                .bind(mxid)
                .bind(fbid)
                .bind(txn)
                .execute(&pool)
                .await
            }
        };
        insert("$a", Some("mid.1"), Some(100)).await.unwrap();
        // Same (fbid, fb_receiver, index) must be rejected.
        assert!(insert("$b", Some("mid.1"), Some(101)).await.is_err());
        // Same (fb_txn_id, fb_sender, fb_receiver, index) must be rejected.
        assert!(insert("$c", Some("mid.2"), Some(100)).await.is_err());
        insert("$d", Some("mid.3"), Some(102)).await.unwrap();
    }
}
