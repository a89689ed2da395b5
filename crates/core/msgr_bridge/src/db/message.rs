use sqlx::FromRow;
use sqlx::SqlitePool;

/// Mapping between one Matrix event (or one part of a split message) and one
/// remote message.
///
/// A row is inserted pending (`fbid` null, `fb_txn_id` set) before the send
/// and upgraded with the authoritative id when the echo arrives.
#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub mxid: String,
    pub mx_room: String,
    pub fbid: Option<String>,
    pub fb_txn_id: Option<i64>,
    pub index: i64,
    pub fb_chat: i64,
    pub fb_receiver: i64,
    pub fb_sender: i64,
    pub timestamp: i64,
}

const COLUMNS: &str =
    r#"mxid, mx_room, fbid, fb_txn_id, "index", fb_chat, fb_receiver, fb_sender, timestamp"#;

impl Message {
    pub async fn get_all_by_fbid(
        pool: &SqlitePool,
        fbid: &str,
        fb_receiver: i64,
    ) -> sqlx::Result<Vec<Message>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM message WHERE fbid=? AND fb_receiver=?"
        ))
        .bind(fbid)
        .bind(fb_receiver)
        .fetch_all(pool)
        .await
    }

    pub async fn get_by_fbid(
        pool: &SqlitePool,
        fbid: &str,
        fb_receiver: i64,
        index: i64,
    ) -> sqlx::Result<Option<Message>> {
        sqlx::query_as(&format!(
            r#"SELECT {COLUMNS} FROM message WHERE fbid=? AND fb_receiver=? AND "index"=?"#
        ))
        .bind(fbid)
        .bind(fb_receiver)
        .bind(index)
        .fetch_optional(pool)
        .await
    }

    /// Dedup lookup: by authoritative id or by the send-time correlator.
    pub async fn get_by_fbid_or_oti(
        pool: &SqlitePool,
        fbid: &str,
        oti: i64,
        fb_receiver: i64,
        fb_sender: i64,
        index: i64,
    ) -> sqlx::Result<Option<Message>> {
        sqlx::query_as(&format!(
            r#"SELECT {COLUMNS} FROM message
               WHERE (fbid=? OR (fb_txn_id=? AND fb_sender=?)) AND fb_receiver=? AND "index"=?"#
        ))
        .bind(fbid)
        .bind(oti)
        .bind(fb_sender)
        .bind(fb_receiver)
        .bind(index)
        .fetch_optional(pool)
        .await
    }

    pub async fn get_by_mxid(
        pool: &SqlitePool,
        mxid: &str,
        mx_room: &str,
    ) -> sqlx::Result<Option<Message>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM message WHERE mxid=? AND mx_room=?"
        ))
        .bind(mxid)
        .bind(mx_room)
        .fetch_optional(pool)
        .await
    }

    pub async fn get_most_recent(
        pool: &SqlitePool,
        fb_chat: i64,
        fb_receiver: i64,
    ) -> sqlx::Result<Option<Message>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM message
             WHERE fb_chat=? AND fb_receiver=? AND fbid IS NOT NULL
             ORDER BY timestamp DESC LIMIT 1"
        ))
        .bind(fb_chat)
        .bind(fb_receiver)
        .fetch_optional(pool)
        .await
    }

    pub async fn get_closest_before(
        pool: &SqlitePool,
        fb_chat: i64,
        fb_receiver: i64,
        timestamp: i64,
    ) -> sqlx::Result<Option<Message>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM message
             WHERE fb_chat=? AND fb_receiver=? AND timestamp<=? AND fbid IS NOT NULL
             ORDER BY timestamp DESC LIMIT 1"
        ))
        .bind(fb_chat)
        .bind(fb_receiver)
        .bind(timestamp)
        .fetch_optional(pool)
        .await
    }

    /// The oldest bridged message of a thread, used as the backfill anchor.
    pub async fn get_oldest(
        pool: &SqlitePool,
        fb_chat: i64,
        fb_receiver: i64,
    ) -> sqlx::Result<Option<Message>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM message
             WHERE fb_chat=? AND fb_receiver=? AND fbid IS NOT NULL
             ORDER BY timestamp ASC LIMIT 1"
        ))
        .bind(fb_chat)
        .bind(fb_receiver)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete_all_by_room(pool: &SqlitePool, mx_room: &str) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM message WHERE mx_room=?")
            .bind(mx_room)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn insert(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO message ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&self.mxid)
        .bind(&self.mx_room)
        .bind(&self.fbid)
        .bind(self.fb_txn_id)
        .bind(self.index)
        .bind(self.fb_chat)
        .bind(self.fb_receiver)
        .bind(self.fb_sender)
        .bind(self.timestamp)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Attach the authoritative remote id (and server timestamp) to a
    /// pending row.
    pub async fn update(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query("UPDATE message SET fbid=?, timestamp=? WHERE mxid=? AND mx_room=?")
            .bind(&self.fbid)
            .bind(self.timestamp)
            .bind(&self.mxid)
            .bind(&self.mx_room)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(r#"DELETE FROM message WHERE mxid=? AND mx_room=?"#)
            .bind(&self.mxid)
            .bind(&self.mx_room)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn row(mxid: &str, oti: i64) -> Message {
        Message {
            mxid: mxid.to_string(),
            mx_room: "!room:example.com".to_string(),
            fbid: None,
            fb_txn_id: Some(oti),
            index: 0,
            fb_chat: 1,
            fb_receiver: 2,
            fb_sender: 3,
            timestamp: 1000,
        }
    }

    #[tokio::test]
    async fn pending_row_is_upgraded_with_remote_id() {
        let db = Database::in_memory().await.unwrap();
        let mut message = row("$evt", 4242);
        message.insert(db.pool()).await.unwrap();

        let found = Message::get_by_fbid_or_oti(db.pool(), "mid.$x", 4242, 2, 3, 0)
            .await
            .unwrap()
            .expect("pending row is found by OTI");
        assert!(found.fbid.is_none());

        message.fbid = Some("mid.$x".to_string());
        message.timestamp = 2000;
        message.update(db.pool()).await.unwrap();

        let found = Message::get_by_fbid(db.pool(), "mid.$x", 2, 0)
            .await
            .unwrap()
            .expect("row is found by remote id after upgrade");
        assert_eq!(found.timestamp, 2000);
        assert_eq!(found.fb_txn_id, Some(4242));
    }

    #[tokio::test]
    async fn most_recent_ignores_pending_rows() {
        let db = Database::in_memory().await.unwrap();
        let mut sent = row("$a", 1);
        sent.fbid = Some("mid.$a".to_string());
        sent.insert(db.pool()).await.unwrap();
        let mut pending = row("$b", 2);
        pending.timestamp = 5000;
        pending.insert(db.pool()).await.unwrap();

        let most_recent = Message::get_most_recent(db.pool(), 1, 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(most_recent.mxid, "$a");
    }
}
