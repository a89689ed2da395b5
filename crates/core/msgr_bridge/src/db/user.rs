use sqlx::FromRow;
use sqlx::SqlitePool;

/// One bridge user. `state` is the serialized client state blob; `seq_id`
/// and `connect_token_hash` carry the delta-queue resume position.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub mxid: String,
    pub fbid: Option<i64>,
    pub state: Option<String>,
    pub notice_room: Option<String>,
    pub seq_id: Option<i64>,
    pub connect_token_hash: Option<Vec<u8>>,
}

const COLUMNS: &str = r#"mxid, fbid, state, notice_room, seq_id, connect_token_hash"#;

impl User {
    pub fn new(mxid: &str) -> User {
        User {
            mxid: mxid.to_string(),
            fbid: None,
            state: None,
            notice_room: None,
            seq_id: None,
            connect_token_hash: None,
        }
    }

    pub async fn get_by_mxid(pool: &SqlitePool, mxid: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as(&format!(r#"SELECT {COLUMNS} FROM "user" WHERE mxid=?"#))
            .bind(mxid)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_by_fbid(pool: &SqlitePool, fbid: i64) -> sqlx::Result<Option<User>> {
        sqlx::query_as(&format!(r#"SELECT {COLUMNS} FROM "user" WHERE fbid=?"#))
            .bind(fbid)
            .fetch_optional(pool)
            .await
    }

    pub async fn all_logged_in(pool: &SqlitePool) -> sqlx::Result<Vec<User>> {
        sqlx::query_as(&format!(
            r#"SELECT {COLUMNS} FROM "user" WHERE fbid IS NOT NULL AND state IS NOT NULL"#
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn insert(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(&format!(
            r#"INSERT INTO "user" ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"#
        ))
        .bind(&self.mxid)
        .bind(self.fbid)
        .bind(&self.state)
        .bind(&self.notice_room)
        .bind(self.seq_id)
        .bind(&self.connect_token_hash)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn save(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(
            r#"UPDATE "user" SET fbid=?, state=?, notice_room=?, seq_id=?, connect_token_hash=?
               WHERE mxid=?"#,
        )
        .bind(self.fbid)
        .bind(&self.state)
        .bind(&self.notice_room)
        .bind(self.seq_id)
        .bind(&self.connect_token_hash)
        .bind(&self.mxid)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Persist only the delta-queue resume position.
    pub async fn save_seq_id(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(r#"UPDATE "user" SET seq_id=?, connect_token_hash=? WHERE mxid=?"#)
            .bind(self.seq_id)
            .bind(&self.connect_token_hash)
            .bind(&self.mxid)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn seq_id_save_is_partial() {
        let db = Database::in_memory().await.unwrap();
        let mut user = User::new("@user:example.com");
        user.fbid = Some(123);
        user.state = Some("{}".to_string());
        user.insert(db.pool()).await.unwrap();

        user.seq_id = Some(777);
        user.connect_token_hash = Some(vec![1, 2]);
        user.save_seq_id(db.pool()).await.unwrap();

        let loaded = User::get_by_mxid(db.pool(), "@user:example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.seq_id, Some(777));
        assert_eq!(loaded.connect_token_hash, Some(vec![1, 2]));
        assert_eq!(loaded.fbid, Some(123));
    }
}
