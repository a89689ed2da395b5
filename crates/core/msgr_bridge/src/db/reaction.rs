use sqlx::FromRow;
use sqlx::SqlitePool;

/// One reaction: at most one per (message, receiver, sender).
#[derive(Debug, Clone, FromRow)]
pub struct Reaction {
    pub mxid: String,
    pub mx_room: String,
    pub fb_msgid: String,
    pub fb_receiver: i64,
    pub fb_sender: i64,
    pub reaction: String,
}

const COLUMNS: &str = "mxid, mx_room, fb_msgid, fb_receiver, fb_sender, reaction";

impl Reaction {
    pub async fn get_by_fbid(
        pool: &SqlitePool,
        fb_msgid: &str,
        fb_receiver: i64,
        fb_sender: i64,
    ) -> sqlx::Result<Option<Reaction>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM reaction WHERE fb_msgid=? AND fb_receiver=? AND fb_sender=?"
        ))
        .bind(fb_msgid)
        .bind(fb_receiver)
        .bind(fb_sender)
        .fetch_optional(pool)
        .await
    }

    pub async fn get_by_mxid(
        pool: &SqlitePool,
        mxid: &str,
        mx_room: &str,
    ) -> sqlx::Result<Option<Reaction>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM reaction WHERE mxid=? AND mx_room=?"
        ))
        .bind(mxid)
        .bind(mx_room)
        .fetch_optional(pool)
        .await
    }

    /// Insert or replace: a sender has at most one reaction per message.
    pub async fn upsert(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO reaction ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (fb_msgid, fb_receiver, fb_sender)
             DO UPDATE SET mxid=excluded.mxid, mx_room=excluded.mx_room,
                           reaction=excluded.reaction"
        ))
        .bind(&self.mxid)
        .bind(&self.mx_room)
        .bind(&self.fb_msgid)
        .bind(self.fb_receiver)
        .bind(self.fb_sender)
        .bind(&self.reaction)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM reaction WHERE fb_msgid=? AND fb_receiver=? AND fb_sender=?")
            .bind(&self.fb_msgid)
            .bind(self.fb_receiver)
            .bind(self.fb_sender)
            .execute(pool)
            .await?;
        Ok(())
    }
}
