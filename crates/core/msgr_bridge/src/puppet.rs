//! Remote users mirrored into Matrix.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;
use tracing::warn;

use msgr_client::types::graphql::Participant;
use msgr_client::HttpClient;

use crate::bridge::Bridge;
use crate::db;
use crate::matrix::ContentUri;
use crate::matrix::UserId;
use crate::BridgeError;

pub struct Puppet {
    bridge: Arc<Bridge>,
    pub fbid: i64,
    row: Mutex<db::Puppet>,
}

impl Puppet {
    pub(crate) fn new(bridge: Arc<Bridge>, row: db::Puppet) -> Arc<Puppet> {
        Arc::new(Puppet {
            fbid: row.fbid,
            bridge,
            row: Mutex::new(row),
        })
    }

    /// The appservice-owned mxid of this puppet.
    pub fn mxid(&self) -> UserId {
        UserId::new(format!(
            "@{}:{}",
            self.localpart(),
            self.bridge.config.homeserver.domain
        ))
    }

    fn localpart(&self) -> String {
        self.bridge
            .config
            .bridge
            .username_template
            .replace("{userid}", &self.fbid.to_string())
    }

    pub async fn name(&self) -> Option<String> {
        self.row.lock().await.name.clone()
    }

    pub async fn has_name(&self) -> bool {
        self.row.lock().await.name.is_some()
    }

    #[cfg(test)]
    pub(crate) async fn set_name_for_test(&self, name: &str) {
        self.row.lock().await.name = Some(name.to_string());
    }

    /// The mxid used when this puppet's owner double-puppets.
    pub async fn custom_mxid(&self) -> Option<UserId> {
        self.row.lock().await.custom_mxid.clone().map(UserId::new)
    }

    /// The sender to act as: the double-puppet mxid when available.
    pub async fn intent_mxid(&self) -> UserId {
        match self.custom_mxid().await {
            Some(custom) => custom,
            None => self.mxid(),
        }
    }

    pub async fn is_registered(&self) -> bool {
        self.row.lock().await.is_registered
    }

    async fn ensure_registered(&self) -> Result<(), BridgeError> {
        if self.is_registered().await {
            return Ok(());
        }
        self.bridge.matrix.register_puppet(&self.localpart()).await?;
        let mut row = self.row.lock().await;
        row.is_registered = true;
        row.save(self.bridge.db.pool()).await?;
        Ok(())
    }

    /// Sync the puppet's profile from remote participant info.
    ///
    /// Returns true when anything was written; a second call with the same
    /// info is a no-op thanks to the `name_set`/`avatar_set` bits.
    pub async fn update_info(
        self: &Arc<Puppet>,
        source: &HttpClient,
        info: &Participant,
    ) -> Result<bool, BridgeError> {
        self.ensure_registered().await?;
        let mut changed = false;
        changed |= self.update_name(info.display_name()).await?;
        changed |= self
            .update_photo(source, info.profile_pic_large.as_ref().map(|pic| pic.uri.as_str()))
            .await?;
        if changed {
            self.row.lock().await.save(self.bridge.db.pool()).await?;
        }
        Ok(changed)
    }

    async fn update_name(&self, name: Option<&str>) -> Result<bool, BridgeError> {
        let Some(name) = name else {
            return Ok(false);
        };
        let displayname = self
            .bridge
            .config
            .bridge
            .displayname_template
            .replace("{displayname}", name);
        {
            let row = self.row.lock().await;
            if row.name.as_deref() == Some(name) && row.name_set {
                return Ok(false);
            }
        }
        let result = self
            .bridge
            .matrix
            .set_displayname(&self.mxid(), &displayname)
            .await;
        let mut row = self.row.lock().await;
        row.name = Some(name.to_string());
        match result {
            Ok(()) => row.name_set = true,
            Err(err) => {
                row.name_set = false;
                warn!("Failed to set displayname of {}: {err}", self.fbid);
            }
        }
        Ok(true)
    }

    async fn update_photo(
        &self,
        source: &HttpClient,
        photo_url: Option<&str>,
    ) -> Result<bool, BridgeError> {
        let photo_id = photo_url.and_then(photo_id_from_url);
        {
            let row = self.row.lock().await;
            if row.photo_id.as_deref() == photo_id.as_deref() && row.avatar_set {
                return Ok(false);
            }
        }
        let photo_mxc = match photo_url {
            Some(url) => {
                let data = source.fetch_media(url).await?;
                Some(
                    self.bridge
                        .matrix
                        .upload_media(data, "image/jpeg", "avatar.jpg")
                        .await?,
                )
            }
            None => None,
        };
        let result = match &photo_mxc {
            Some(uri) => self.bridge.matrix.set_avatar_url(&self.mxid(), uri).await,
            None => Ok(()),
        };
        let mut row = self.row.lock().await;
        row.photo_id = photo_id;
        row.photo_mxc = photo_mxc.as_ref().map(|uri| uri.as_str().to_string());
        match result {
            Ok(()) => row.avatar_set = true,
            Err(err) => {
                row.avatar_set = false;
                warn!("Failed to set avatar of {}: {err}", self.fbid);
            }
        }
        debug!("Updated avatar of puppet {}", self.fbid);
        Ok(true)
    }

    pub async fn photo_mxc(&self) -> Option<ContentUri> {
        self.row.lock().await.photo_mxc.clone().map(ContentUri::new)
    }

    /// Store double-puppet credentials for this remote user.
    pub async fn set_custom_mxid(
        &self,
        custom_mxid: Option<String>,
        access_token: Option<String>,
        base_url: Option<String>,
    ) -> Result<(), BridgeError> {
        let mut row = self.row.lock().await;
        row.custom_mxid = custom_mxid;
        row.access_token = access_token;
        row.base_url = base_url;
        row.save(self.bridge.db.pool()).await?;
        Ok(())
    }
}

/// The stable part of a CDN photo URL: the last path segment.
pub(crate) fn photo_id_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .next_back()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn photo_id_is_last_path_segment() {
        assert_eq!(
            photo_id_from_url("https://scontent.xx.fbcdn.net/v/t1.30497-1/123_456_n.jpg?stp=c0"),
            Some("123_456_n.jpg".to_string()),
        );
        assert_eq!(photo_id_from_url("not a url"), None);
    }

    #[tokio::test]
    async fn puppet_mxid_uses_username_template() {
        let bridge =
            crate::bridge::test_support::bridge_with(crate::matrix::MockMatrixApi::new()).await;
        let puppet = bridge.get_puppet(424242).await.unwrap();
        assert_eq!(puppet.mxid().as_str(), "@facebook_424242:example.com");
        assert_eq!(bridge.parse_puppet_mxid(puppet.mxid().as_str()), Some(424242));
    }
}
