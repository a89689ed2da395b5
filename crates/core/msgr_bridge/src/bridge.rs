//! Process-wide registries and shared handles.
//!
//! The by-id caches are guarded by async mutexes so the first get-or-create
//! for a given key holds the lock across the database round trip.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::db::Database;
use crate::db::ThreadType;
use crate::matrix::MatrixApi;
use crate::matrix::RoomId;
use crate::matrix::UserId;
use crate::portal::Portal;
use crate::puppet::Puppet;
use crate::user::User;
use crate::BridgeError;

pub struct Bridge {
    pub config: Config,
    pub db: Database,
    pub matrix: Arc<dyn MatrixApi>,
    portals: Mutex<HashMap<(i64, i64), Arc<Portal>>>,
    portals_by_mxid: Mutex<HashMap<String, (i64, i64)>>,
    puppets: Mutex<HashMap<i64, Arc<Puppet>>>,
    users: Mutex<HashMap<String, Arc<User>>>,
    users_by_fbid: Mutex<HashMap<i64, String>>,
}

impl Bridge {
    pub fn new(config: Config, db: Database, matrix: Arc<dyn MatrixApi>) -> Arc<Bridge> {
        Arc::new(Bridge {
            config,
            db,
            matrix,
            portals: Mutex::new(HashMap::new()),
            portals_by_mxid: Mutex::new(HashMap::new()),
            puppets: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
            users_by_fbid: Mutex::new(HashMap::new()),
        })
    }

    pub fn bot_mxid(&self) -> UserId {
        UserId::new(format!(
            "@{}:{}",
            self.config.appservice.bot_username, self.config.homeserver.domain
        ))
    }

    /// Start the orchestrators of every logged-in user.
    pub async fn start(self: &Arc<Bridge>) -> Result<(), BridgeError> {
        let rows = db::User::all_logged_in(self.db.pool()).await?;
        info!("Starting {} logged-in users", rows.len());
        for row in rows {
            let user = self.get_user(&UserId::new(row.mxid.clone()), true).await?;
            if let Some(user) = user {
                user.start(true).await;
            }
        }
        Ok(())
    }

    pub async fn stop(self: &Arc<Bridge>) {
        let users: Vec<Arc<User>> = self.users.lock().await.values().cloned().collect();
        for user in users {
            user.shutdown().await;
        }
    }

    pub async fn get_portal(
        self: &Arc<Bridge>,
        fbid: i64,
        fb_receiver: i64,
        thread_type: ThreadType,
    ) -> Result<Arc<Portal>, BridgeError> {
        // Only USER threads key on the owning account; group and page
        // portals are shared across all bridge users.
        let fb_receiver = if thread_type == ThreadType::User {
            fb_receiver
        } else {
            0
        };
        let mut portals = self.portals.lock().await;
        if let Some(portal) = portals.get(&(fbid, fb_receiver)) {
            return Ok(portal.clone());
        }
        let row = match db::Portal::get_by_fbid(self.db.pool(), fbid, fb_receiver).await? {
            Some(row) => row,
            None => {
                let row = db::Portal::new(fbid, fb_receiver, thread_type);
                row.insert(self.db.pool()).await?;
                row
            }
        };
        let portal = Portal::new(self.clone(), row);
        if let Some(mxid) = portal.mxid().await {
            self.portals_by_mxid
                .lock()
                .await
                .insert(mxid.0, (fbid, fb_receiver));
        }
        portals.insert((fbid, fb_receiver), portal.clone());
        Ok(portal)
    }

    pub async fn get_portal_by_mxid(
        self: &Arc<Bridge>,
        mxid: &RoomId,
    ) -> Result<Option<Arc<Portal>>, BridgeError> {
        // Copy the key out so the two registry locks are never held together.
        let key = self.portals_by_mxid.lock().await.get(mxid.as_str()).copied();
        if let Some(key) = key {
            return Ok(self.portals.lock().await.get(&key).cloned());
        }
        let Some(row) = db::Portal::get_by_mxid(self.db.pool(), mxid.as_str()).await? else {
            return Ok(None);
        };
        let portal = self
            .get_portal(row.fbid, row.fb_receiver, row.thread_type())
            .await?;
        Ok(Some(portal))
    }

    /// Register a freshly created room for mxid lookups.
    pub(crate) async fn register_portal_mxid(&self, mxid: &RoomId, fbid: i64, fb_receiver: i64) {
        self.portals_by_mxid
            .lock()
            .await
            .insert(mxid.as_str().to_string(), (fbid, fb_receiver));
    }

    pub(crate) async fn forget_portal(&self, fbid: i64, fb_receiver: i64, mxid: Option<&str>) {
        self.portals.lock().await.remove(&(fbid, fb_receiver));
        if let Some(mxid) = mxid {
            self.portals_by_mxid.lock().await.remove(mxid);
        }
    }

    pub async fn get_puppet(self: &Arc<Bridge>, fbid: i64) -> Result<Arc<Puppet>, BridgeError> {
        let mut puppets = self.puppets.lock().await;
        if let Some(puppet) = puppets.get(&fbid) {
            return Ok(puppet.clone());
        }
        let row = match db::Puppet::get_by_fbid(self.db.pool(), fbid).await? {
            Some(row) => row,
            None => {
                let row = db::Puppet::new(fbid);
                row.insert(self.db.pool()).await?;
                row
            }
        };
        let puppet = Puppet::new(self.clone(), row);
        puppets.insert(fbid, puppet.clone());
        Ok(puppet)
    }

    pub async fn get_user(
        self: &Arc<Bridge>,
        mxid: &UserId,
        create: bool,
    ) -> Result<Option<Arc<User>>, BridgeError> {
        let mut users = self.users.lock().await;
        if let Some(user) = users.get(mxid.as_str()) {
            return Ok(Some(user.clone()));
        }
        let row = match db::User::get_by_mxid(self.db.pool(), mxid.as_str()).await? {
            Some(row) => row,
            None if create => {
                let row = db::User::new(mxid.as_str());
                row.insert(self.db.pool()).await?;
                row
            }
            None => return Ok(None),
        };
        let user = User::new(self.clone(), row)?;
        if let Some(fbid) = user.fbid().await {
            self.users_by_fbid
                .lock()
                .await
                .insert(fbid, mxid.as_str().to_string());
        }
        users.insert(mxid.as_str().to_string(), user.clone());
        Ok(Some(user))
    }

    pub async fn get_user_by_fbid(
        self: &Arc<Bridge>,
        fbid: i64,
    ) -> Result<Option<Arc<User>>, BridgeError> {
        let known_mxid = self.users_by_fbid.lock().await.get(&fbid).cloned();
        if let Some(mxid) = known_mxid {
            return self.get_user(&UserId::new(mxid), false).await;
        }
        match db::User::get_by_fbid(self.db.pool(), fbid).await? {
            Some(row) => self.get_user(&UserId::new(row.mxid), false).await,
            None => Ok(None),
        }
    }

    pub(crate) async fn register_user_fbid(&self, fbid: i64, mxid: &UserId) {
        self.users_by_fbid
            .lock()
            .await
            .insert(fbid, mxid.as_str().to_string());
    }

    /// Resolve a Matrix user id to a remote user id, checking real users
    /// first and puppet mxids second.
    pub async fn resolve_mxid_to_fbid(self: &Arc<Bridge>, mxid: &str) -> Option<i64> {
        if let Ok(Some(user)) = self.get_user(&UserId::new(mxid), false).await {
            if let Some(fbid) = user.fbid().await {
                return Some(fbid);
            }
        }
        self.parse_puppet_mxid(mxid)
    }

    /// Extract the remote user id from a puppet mxid built with the
    /// configured username template.
    pub fn parse_puppet_mxid(&self, mxid: &str) -> Option<i64> {
        let localpart = mxid
            .strip_prefix('@')?
            .strip_suffix(&format!(":{}", self.config.homeserver.domain))?;
        let template = &self.config.bridge.username_template;
        let (prefix, suffix) = template.split_once("{userid}")?;
        localpart
            .strip_prefix(prefix)?
            .strip_suffix(suffix)?
            .parse()
            .ok()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::matrix::MockMatrixApi;

    /// A bridge wired to an in-memory store and a mock homeserver.
    pub(crate) async fn bridge_with(matrix: MockMatrixApi) -> Arc<Bridge> {
        let db = Database::in_memory().await.unwrap();
        Bridge::new(Config::default(), db, Arc::new(matrix))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::bridge_with;
    use super::*;
    use crate::matrix::MockMatrixApi;

    #[tokio::test]
    async fn puppet_mxid_parsing_follows_template() {
        let bridge = bridge_with(MockMatrixApi::new()).await;
        assert_eq!(
            bridge.parse_puppet_mxid("@facebook_12345:example.com"),
            Some(12345),
        );
        assert_eq!(bridge.parse_puppet_mxid("@someone:example.com"), None);
        assert_eq!(bridge.parse_puppet_mxid("@facebook_12345:other.com"), None);
    }

    #[tokio::test]
    async fn group_portals_collapse_the_receiver() {
        let bridge = bridge_with(MockMatrixApi::new()).await;
        let portal = bridge
            .get_portal(555, 1234, ThreadType::Group)
            .await
            .unwrap();
        assert_eq!(portal.fb_receiver, 0);
        // DMs keep their owning account as the receiver.
        let dm = bridge.get_portal(777, 1234, ThreadType::User).await.unwrap();
        assert_eq!(dm.fb_receiver, 1234);
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_instance() {
        let bridge = bridge_with(MockMatrixApi::new()).await;
        let first = bridge.get_puppet(42).await.unwrap();
        let second = bridge.get_puppet(42).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
