//! Post-login GraphQL operations.

use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::http::HttpClient;
use crate::http::HttpError;
use crate::http::B_GRAPH_URL;
use crate::types::graphql::LoggedInUser;
use crate::types::graphql::MessageList;
use crate::types::graphql::MessageReactionMutation;
use crate::types::graphql::MessageUndoSend;
use crate::types::graphql::MessageUnsendResponse;
use crate::types::graphql::MoreMessagesQuery;
use crate::types::graphql::ReactionAction;
use crate::types::graphql::Thread;
use crate::types::graphql::ThreadListQuery;
use crate::types::graphql::ThreadListResponse;
use crate::types::graphql::ThreadQuery;
use crate::types::graphql::ThreadQueryResponse;

impl HttpClient {
    pub async fn fetch_thread_list(
        &self,
        thread_count: i32,
    ) -> Result<ThreadListResponse, HttpError> {
        self.graphql(
            &ThreadListQuery::new(thread_count),
            &["data", "viewer", "message_threads"],
        )
        .await
    }

    pub async fn fetch_thread_info(
        &self,
        thread_ids: &[i64],
    ) -> Result<Vec<Thread>, HttpError> {
        let ids = thread_ids.iter().map(|id| id.to_string()).collect();
        let resp: ThreadQueryResponse = self.graphql(&ThreadQuery::new(ids), &["data"]).await?;
        Ok(resp.message_threads)
    }

    /// Fetch one page of messages older than `before_time_ms`.
    pub async fn fetch_messages(
        &self,
        thread_id: i64,
        before_time_ms: i64,
        msg_count: i32,
    ) -> Result<MessageList, HttpError> {
        self.graphql(
            &MoreMessagesQuery::new(thread_id, before_time_ms, msg_count),
            &["data", "message_thread", "messages"],
        )
        .await
    }

    /// Retract a message for everyone.
    pub async fn unsend(&self, message_id: &str) -> Result<MessageUnsendResponse, HttpError> {
        let actor_id = self.snapshot().session.uid.unwrap_or_default().to_string();
        self.graphql(
            &MessageUndoSend {
                message_id: message_id.to_string(),
                client_mutation_id: Uuid::new_v4().to_string(),
                actor_id,
            },
            &["data", "message_undo_send"],
        )
        .await
    }

    /// Add or (with `None`) remove a reaction on a message.
    pub async fn react(&self, message_id: &str, reaction: Option<&str>) -> Result<(), HttpError> {
        let actor_id = self.snapshot().session.uid.unwrap_or_default().to_string();
        let action = if reaction.is_some() {
            ReactionAction::Add
        } else {
            ReactionAction::Remove
        };
        self.graphql_value::<MessageReactionMutation>(
            &MessageReactionMutation {
                message_id: message_id.to_string(),
                client_mutation_id: Uuid::new_v4().to_string(),
                actor_id,
                action,
                reaction: reaction.map(str::to_string),
            },
            &[],
        )
        .await?;
        Ok(())
    }

    /// Fetch the logged-in user through the batch endpoint, used to validate
    /// a session after login or refresh.
    pub async fn fetch_logged_in_user(&self) -> Result<Option<LoggedInUser>, HttpError> {
        let state = self.snapshot();
        let variables = serde_json::json!({
            "profile_pic_small_size": 110,
            "profile_pic_medium_size": 258,
            "profile_pic_large_size": 1080,
            "is_for_messenger": true,
            "fetch_story_holdout": false,
        });
        let inner: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("variables", &variables.to_string())
            .append_pair("method", "post")
            .append_pair("doc_id", "4043011582467507")
            .append_pair("query_name", "GetLoggedInUserQuery")
            .append_pair("strip_defaults", "true")
            .append_pair("strip_nulls", "true")
            .append_pair("locale", &state.device.language)
            .append_pair("client_country_code", &state.device.country_code)
            .append_pair("fb_api_req_friendly_name", "GetLoggedInUserQuery")
            .finish();
        let batch = serde_json::json!([{
            "method": "POST",
            "body": inner,
            "name": "user",
            "omit_response_on_success": false,
            "relative_url": "graphql",
        }]);
        let form: Vec<(&str, String)> = vec![
            ("fb_api_caller_class", "MessagesSyncLoggedInUserFetcher".to_string()),
            ("fb_api_req_friendly_name", "syncRefetchLoggedInUser".to_string()),
            ("batch", batch.to_string()),
        ];
        let mut headers = self.base_headers(&state);
        headers.remove("x-fb-rmd");
        headers.insert(
            HeaderName::from_static("x-fb-friendly-name"),
            HeaderValue::from_static("syncRefetchLoggedInUser"),
        );
        headers.insert(
            HeaderName::from_static("accept-encoding"),
            HeaderValue::from_static("x-fb-dz;d=1, gzip, deflate"),
        );
        let url = format!(
            "{B_GRAPH_URL}/?include_headers=false&decode_body_json=false&streamable_json_response=true"
        );
        let resp = self.http().post(url).headers(headers).form(&form).send().await?;
        let status = resp.status().as_u16();
        let body = self.handle_response(resp).await?;
        let entry = match body.as_array().and_then(|batches| batches.first()) {
            Some(entry) => entry.clone(),
            None => {
                warn!("Batch response did not contain any entries");
                return Ok(None);
            }
        };
        let inner_body: Value = entry
            .get(1)
            .and_then(|item| item.get("body"))
            .cloned()
            .unwrap_or(Value::Null);
        Self::check_body_errors(status, &inner_body)?;
        let actor = inner_body
            .pointer("/data/viewer/actor")
            .cloned()
            .unwrap_or(Value::Null);
        if actor.is_null() {
            warn!("Didn't get expected data in logged-in user response");
            return Ok(None);
        }
        Ok(serde_json::from_value(actor)?)
    }
}
