use sqlx::FromRow;
use sqlx::SqlitePool;

/// Kind of remote thread a portal mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadType {
    User,
    Group,
    Page,
    Unknown,
}

impl ThreadType {
    pub fn as_str(self) -> &'static str {
        match self {
            ThreadType::User => "USER",
            ThreadType::Group => "GROUP",
            ThreadType::Page => "PAGE",
            ThreadType::Unknown => "UNKNOWN",
        }
    }

    pub fn from_str(value: &str) -> ThreadType {
        match value {
            "USER" => ThreadType::User,
            "GROUP" => ThreadType::Group,
            "PAGE" => ThreadType::Page,
            _ => ThreadType::Unknown,
        }
    }

    pub fn is_direct(self) -> bool {
        matches!(self, ThreadType::User | ThreadType::Page)
    }
}

/// One bridged thread. Keyed `(fbid, fb_receiver)`: the receiver is the
/// owning account for DMs and zero for group threads, so two bridge users
/// sharing a DM with the same remote user get separate portals.
#[derive(Debug, Clone, FromRow)]
pub struct Portal {
    pub fbid: i64,
    pub fb_receiver: i64,
    pub fb_type: String,
    pub mxid: Option<String>,
    pub name: Option<String>,
    pub photo_id: Option<String>,
    pub avatar_url: Option<String>,
    pub encrypted: bool,
    pub name_set: bool,
    pub avatar_set: bool,
    pub relay_user_id: Option<String>,
}

const COLUMNS: &str = "fbid, fb_receiver, fb_type, mxid, name, photo_id, avatar_url, encrypted, \
                       name_set, avatar_set, relay_user_id";

impl Portal {
    pub fn new(fbid: i64, fb_receiver: i64, fb_type: ThreadType) -> Portal {
        Portal {
            fbid,
            fb_receiver,
            fb_type: fb_type.as_str().to_string(),
            mxid: None,
            name: None,
            photo_id: None,
            avatar_url: None,
            encrypted: false,
            name_set: false,
            avatar_set: false,
            relay_user_id: None,
        }
    }

    pub fn thread_type(&self) -> ThreadType {
        ThreadType::from_str(&self.fb_type)
    }

    pub async fn get_by_fbid(
        pool: &SqlitePool,
        fbid: i64,
        fb_receiver: i64,
    ) -> sqlx::Result<Option<Portal>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM portal WHERE fbid=? AND fb_receiver=?"
        ))
        .bind(fbid)
        .bind(fb_receiver)
        .fetch_optional(pool)
        .await
    }

    pub async fn get_by_mxid(pool: &SqlitePool, mxid: &str) -> sqlx::Result<Option<Portal>> {
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM portal WHERE mxid=?"))
            .bind(mxid)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_all_direct_by_receiver(
        pool: &SqlitePool,
        fb_receiver: i64,
    ) -> sqlx::Result<Vec<Portal>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM portal WHERE fb_receiver=? AND fb_type='USER'"
        ))
        .bind(fb_receiver)
        .fetch_all(pool)
        .await
    }

    pub async fn insert(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO portal ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(self.fbid)
        .bind(self.fb_receiver)
        .bind(&self.fb_type)
        .bind(&self.mxid)
        .bind(&self.name)
        .bind(&self.photo_id)
        .bind(&self.avatar_url)
        .bind(self.encrypted)
        .bind(self.name_set)
        .bind(self.avatar_set)
        .bind(&self.relay_user_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn save(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE portal SET fb_type=?, mxid=?, name=?, photo_id=?, avatar_url=?, encrypted=?, \
             name_set=?, avatar_set=?, relay_user_id=? WHERE fbid=? AND fb_receiver=?",
        )
        .bind(&self.fb_type)
        .bind(&self.mxid)
        .bind(&self.name)
        .bind(&self.photo_id)
        .bind(&self.avatar_url)
        .bind(self.encrypted)
        .bind(self.name_set)
        .bind(self.avatar_set)
        .bind(&self.relay_user_id)
        .bind(self.fbid)
        .bind(self.fb_receiver)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Remove the portal and everything hanging off its room.
    pub async fn delete(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        let mut tx = pool.begin().await?;
        if let Some(mxid) = &self.mxid {
            sqlx::query("DELETE FROM message WHERE mx_room=?")
                .bind(mxid)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM reaction WHERE mx_room=?")
                .bind(mxid)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM user_portal WHERE portal=? AND portal_receiver=?")
            .bind(self.fbid)
            .bind(self.fb_receiver)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM backfill_queue WHERE portal_fbid=? AND portal_fb_receiver=?")
            .bind(self.fbid)
            .bind(self.fb_receiver)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM portal WHERE fbid=? AND fb_receiver=?")
            .bind(self.fbid)
            .bind(self.fb_receiver)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::db::Message;

    #[tokio::test]
    async fn delete_cascades_into_room_state() {
        let db = Database::in_memory().await.unwrap();
        let mut portal = Portal::new(100, 2, ThreadType::User);
        portal.mxid = Some("!room:example.com".to_string());
        portal.insert(db.pool()).await.unwrap();

        let message = Message {
            mxid: "$evt".to_string(),
            mx_room: "!room:example.com".to_string(),
            fbid: Some("mid.$x".to_string()),
            fb_txn_id: None,
            index: 0,
            fb_chat: 100,
            fb_receiver: 2,
            fb_sender: 100,
            timestamp: 0,
        };
        message.insert(db.pool()).await.unwrap();

        portal.delete(db.pool()).await.unwrap();
        assert!(Portal::get_by_fbid(db.pool(), 100, 2).await.unwrap().is_none());
        assert!(Message::get_by_fbid(db.pool(), "mid.$x", 2, 0)
            .await
            .unwrap()
            .is_none());
    }
}
