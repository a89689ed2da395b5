use sqlx::FromRow;
use sqlx::SqlitePool;

/// Membership of a bridge user in a portal.
#[derive(Debug, Clone, FromRow)]
pub struct UserPortal {
    pub user: i64,
    pub portal: i64,
    pub portal_receiver: i64,
}

impl UserPortal {
    pub async fn get(
        pool: &SqlitePool,
        user: i64,
        portal: i64,
        portal_receiver: i64,
    ) -> sqlx::Result<Option<UserPortal>> {
        sqlx::query_as(
            r#"SELECT "user", portal, portal_receiver FROM user_portal
               WHERE "user"=? AND portal=? AND portal_receiver=?"#,
        )
        .bind(user)
        .bind(portal)
        .bind(portal_receiver)
        .fetch_optional(pool)
        .await
    }

    pub async fn all_for_user(pool: &SqlitePool, user: i64) -> sqlx::Result<Vec<UserPortal>> {
        sqlx::query_as(
            r#"SELECT "user", portal, portal_receiver FROM user_portal WHERE "user"=?"#,
        )
        .bind(user)
        .fetch_all(pool)
        .await
    }

    pub async fn insert(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(
            r#"INSERT OR IGNORE INTO user_portal ("user", portal, portal_receiver)
               VALUES (?, ?, ?)"#,
        )
        .bind(self.user)
        .bind(self.portal)
        .bind(self.portal_receiver)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(
            r#"DELETE FROM user_portal WHERE "user"=? AND portal=? AND portal_receiver=?"#,
        )
        .bind(self.user)
        .bind(self.portal)
        .bind(self.portal_receiver)
        .execute(pool)
        .await?;
        Ok(())
    }
}
