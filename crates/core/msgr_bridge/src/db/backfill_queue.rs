use sqlx::FromRow;
use sqlx::SqlitePool;

use crate::now_secs;

/// How soon a dispatched-but-unfinished job becomes eligible again.
const STALE_AFTER_SECS: i64 = 15 * 60;

/// Kind of history work, lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum BackfillType {
    Immediate = 0,
    Forward = 100,
    Deferred = 200,
}

impl BackfillType {
    pub fn from_i64(value: i64) -> BackfillType {
        match value {
            0 => BackfillType::Immediate,
            100 => BackfillType::Forward,
            _ => BackfillType::Deferred,
        }
    }
}

/// One queued unit of history backfill for a portal.
#[derive(Debug, Clone, FromRow)]
pub struct Backfill {
    pub queue_id: Option<i64>,
    pub user_mxid: String,
    #[sqlx(rename = "type")]
    pub backfill_type: i64,
    pub priority: i64,
    pub portal_fbid: i64,
    pub portal_fb_receiver: i64,
    pub num_pages: i64,
    pub page_delay: i64,
    pub post_batch_delay: i64,
    pub max_total_pages: i64,
    pub dispatch_time: Option<i64>,
    pub completed_at: Option<i64>,
}

const COLUMNS: &str = "queue_id, user_mxid, type, priority, portal_fbid, portal_fb_receiver, \
                       num_pages, page_delay, post_batch_delay, max_total_pages, dispatch_time, \
                       completed_at";

impl Backfill {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_mxid: &str,
        backfill_type: BackfillType,
        priority: i64,
        portal_fbid: i64,
        portal_fb_receiver: i64,
        num_pages: i64,
        page_delay: i64,
        post_batch_delay: i64,
        max_total_pages: i64,
    ) -> Backfill {
        Backfill {
            queue_id: None,
            user_mxid: user_mxid.to_string(),
            backfill_type: backfill_type as i64,
            priority,
            portal_fbid,
            portal_fb_receiver,
            num_pages,
            page_delay,
            post_batch_delay,
            max_total_pages,
            dispatch_time: None,
            completed_at: None,
        }
    }

    /// The next runnable job for a user: never dispatched, or dispatched
    /// over fifteen minutes ago without completing.
    pub async fn get_next(pool: &SqlitePool, user_mxid: &str) -> sqlx::Result<Option<Backfill>> {
        let stale_before = now_secs() - STALE_AFTER_SECS;
        sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM backfill_queue
             WHERE user_mxid=?
               AND (dispatch_time IS NULL
                    OR (dispatch_time < ? AND completed_at IS NULL))
             ORDER BY type, priority, queue_id
             LIMIT 1"
        ))
        .bind(user_mxid)
        .bind(stale_before)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete_all_for_user(pool: &SqlitePool, user_mxid: &str) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM backfill_queue WHERE user_mxid=?")
            .bind(user_mxid)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn insert(&mut self, pool: &SqlitePool) -> sqlx::Result<()> {
        let result = sqlx::query(
            "INSERT INTO backfill_queue (user_mxid, type, priority, portal_fbid, \
             portal_fb_receiver, num_pages, page_delay, post_batch_delay, max_total_pages, \
             dispatch_time, completed_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&self.user_mxid)
        .bind(self.backfill_type)
        .bind(self.priority)
        .bind(self.portal_fbid)
        .bind(self.portal_fb_receiver)
        .bind(self.num_pages)
        .bind(self.page_delay)
        .bind(self.post_batch_delay)
        .bind(self.max_total_pages)
        .bind(self.dispatch_time)
        .bind(self.completed_at)
        .execute(pool)
        .await?;
        self.queue_id = Some(result.last_insert_rowid());
        Ok(())
    }

    pub async fn mark_dispatched(&mut self, pool: &SqlitePool) -> sqlx::Result<()> {
        self.dispatch_time = Some(now_secs());
        sqlx::query("UPDATE backfill_queue SET dispatch_time=? WHERE queue_id=?")
            .bind(self.dispatch_time)
            .bind(self.queue_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn mark_done(&mut self, pool: &SqlitePool) -> sqlx::Result<()> {
        self.completed_at = Some(now_secs());
        sqlx::query("UPDATE backfill_queue SET completed_at=? WHERE queue_id=?")
            .bind(self.completed_at)
            .bind(self.queue_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn job(priority: i64) -> Backfill {
        Backfill::new(
            "@user:example.com",
            BackfillType::Immediate,
            priority,
            100,
            0,
            2,
            0,
            0,
            -1,
        )
    }

    #[tokio::test]
    async fn job_lifecycle() {
        let db = Database::in_memory().await.unwrap();
        let mut backfill = job(1);
        backfill.insert(db.pool()).await.unwrap();
        assert!(backfill.queue_id.is_some());

        // Fresh job is runnable.
        let mut next = Backfill::get_next(db.pool(), "@user:example.com")
            .await
            .unwrap()
            .expect("job is eligible");
        assert!(next.dispatch_time.is_none());

        // In-flight job is not handed out again.
        next.mark_dispatched(db.pool()).await.unwrap();
        assert!(Backfill::get_next(db.pool(), "@user:example.com")
            .await
            .unwrap()
            .is_none());

        // A job stuck for over fifteen minutes becomes eligible again.
        sqlx::query("UPDATE backfill_queue SET dispatch_time=? WHERE queue_id=?")
            .bind(now_secs() - 16 * 60)
            .bind(next.queue_id)
            .execute(db.pool())
            .await
            .unwrap();
        let again = Backfill::get_next(db.pool(), "@user:example.com")
            .await
            .unwrap()
            .expect("stale job is re-dispatched");
        assert_eq!(again.queue_id, next.queue_id);

        // Completed jobs are gone for good.
        let mut again = again;
        again.mark_done(db.pool()).await.unwrap();
        assert!(Backfill::get_next(db.pool(), "@user:example.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn jobs_order_by_priority_then_insertion() {
        let db = Database::in_memory().await.unwrap();
        let mut low = job(5);
        low.insert(db.pool()).await.unwrap();
        let mut high = job(1);
        high.insert(db.pool()).await.unwrap();
        let next = Backfill::get_next(db.pool(), "@user:example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.queue_id, high.queue_id);
    }
}
