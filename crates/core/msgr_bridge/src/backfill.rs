//! The per-user backfill worker: drains the queue of history jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::bridge::Bridge;
use crate::db;
use crate::db::ThreadType;
use crate::user::User;

/// How long to sleep between queue polls when nothing wakes the worker.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) fn start_worker(user: Arc<User>, bridge: Arc<Bridge>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Backfill worker for {} starting", user.mxid);
        loop {
            if user.is_shutdown() {
                return;
            }
            let next = db::Backfill::get_next(bridge.db.pool(), user.mxid.as_str()).await;
            match next {
                Ok(Some(mut job)) => {
                    if let Err(err) = run_job(&user, &bridge, &mut job).await {
                        error!(
                            "Backfill job {:?} for {} failed: {err}",
                            job.queue_id, user.mxid
                        );
                        // The job stays dispatched; the staleness rule makes
                        // it eligible again in fifteen minutes.
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = user.backfill_notified().notified() => {}
                        _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                    }
                }
                Err(err) => {
                    error!("Failed to poll backfill queue: {err}");
                    tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                }
            }
        }
    })
}

async fn run_job(
    user: &Arc<User>,
    bridge: &Arc<Bridge>,
    job: &mut db::Backfill,
) -> Result<(), crate::BridgeError> {
    job.mark_dispatched(bridge.db.pool()).await?;
    debug!(
        "Dispatching backfill job {:?}: portal {}<->{}",
        job.queue_id, job.portal_fbid, job.portal_fb_receiver
    );
    let thread_type = if job.portal_fb_receiver == 0 {
        ThreadType::Group
    } else {
        ThreadType::User
    };
    let portal = bridge
        .get_portal(job.portal_fbid, job.portal_fb_receiver, thread_type)
        .await?;
    portal.backfill(user, job).await?;
    job.mark_done(bridge.db.pool()).await?;
    Ok(())
}
