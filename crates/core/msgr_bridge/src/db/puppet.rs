use sqlx::FromRow;
use sqlx::SqlitePool;

/// One remote user's projection, keyed by remote user id. The `custom_mxid`
/// fields carry double-puppet credentials when a real Matrix user drives
/// their own puppet.
#[derive(Debug, Clone, FromRow)]
pub struct Puppet {
    pub fbid: i64,
    pub name: Option<String>,
    pub photo_id: Option<String>,
    pub photo_mxc: Option<String>,
    pub name_set: bool,
    pub avatar_set: bool,
    pub is_registered: bool,
    pub custom_mxid: Option<String>,
    pub access_token: Option<String>,
    pub next_batch: Option<String>,
    pub base_url: Option<String>,
}

const COLUMNS: &str = "fbid, name, photo_id, photo_mxc, name_set, avatar_set, is_registered, \
                       custom_mxid, access_token, next_batch, base_url";

impl Puppet {
    pub fn new(fbid: i64) -> Puppet {
        Puppet {
            fbid,
            name: None,
            photo_id: None,
            photo_mxc: None,
            name_set: false,
            avatar_set: false,
            is_registered: false,
            custom_mxid: None,
            access_token: None,
            next_batch: None,
            base_url: None,
        }
    }

    pub async fn get_by_fbid(pool: &SqlitePool, fbid: i64) -> sqlx::Result<Option<Puppet>> {
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM puppet WHERE fbid=?"))
            .bind(fbid)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_by_custom_mxid(
        pool: &SqlitePool,
        custom_mxid: &str,
    ) -> sqlx::Result<Option<Puppet>> {
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM puppet WHERE custom_mxid=?"))
            .bind(custom_mxid)
            .fetch_optional(pool)
            .await
    }

    pub async fn get_all_with_custom_mxid(pool: &SqlitePool) -> sqlx::Result<Vec<Puppet>> {
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM puppet WHERE custom_mxid IS NOT NULL"
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn insert(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(&format!(
            "INSERT INTO puppet ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(self.fbid)
        .bind(&self.name)
        .bind(&self.photo_id)
        .bind(&self.photo_mxc)
        .bind(self.name_set)
        .bind(self.avatar_set)
        .bind(self.is_registered)
        .bind(&self.custom_mxid)
        .bind(&self.access_token)
        .bind(&self.next_batch)
        .bind(&self.base_url)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn save(&self, pool: &SqlitePool) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE puppet SET name=?, photo_id=?, photo_mxc=?, name_set=?, avatar_set=?, \
             is_registered=?, custom_mxid=?, access_token=?, next_batch=?, base_url=? \
             WHERE fbid=?",
        )
        .bind(&self.name)
        .bind(&self.photo_id)
        .bind(&self.photo_mxc)
        .bind(self.name_set)
        .bind(self.avatar_set)
        .bind(self.is_registered)
        .bind(&self.custom_mxid)
        .bind(&self.access_token)
        .bind(&self.next_batch)
        .bind(&self.base_url)
        .bind(self.fbid)
        .execute(pool)
        .await?;
        Ok(())
    }
}
