use serde::Deserialize;

/// The `error` object the Graph API returns with a 2xx status.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub subcode: Option<i64>,
    #[serde(default)]
    pub error_subcode: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_user_msg: Option<String>,
    #[serde(default)]
    pub error_data: Option<TwoFactorData>,
}

impl ErrorData {
    /// Human-readable rendition: the user message if present, otherwise
    /// `code.subcode: message`.
    pub fn describe(&self) -> String {
        if let Some(user_msg) = &self.error_user_msg {
            return user_msg.clone();
        }
        let message = self.message.clone().unwrap_or_default();
        let subcode = self.subcode.or(self.error_subcode);
        match (self.code, subcode) {
            (Some(code), Some(subcode)) => format!("{code}.{subcode}: {message}"),
            (Some(code), None) => format!("{code}: {message}"),
            _ => message,
        }
    }
}

/// Transient second-factor state attached to a 406 login response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TwoFactorData {
    #[serde(default)]
    pub login_first_factor: Option<String>,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub uid: Option<i64>,
}

/// Errors surfaced by the HTTP layer, classified per the Graph error
/// taxonomy: numeric `code` first, then the `type` field.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("got non-JSON response with status {status}: {body}")]
    ResponseType { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid access token: {}", .0.describe())]
    InvalidAccessToken(ErrorData),

    #[error("invalid email: {}", .0.describe())]
    InvalidEmail(ErrorData),

    #[error("incorrect password: {}", .0.describe())]
    IncorrectPassword(ErrorData),

    #[error("two-factor authentication required")]
    TwoFactorRequired(ErrorData),

    #[error("OAuth error: {}", .0.describe())]
    OAuth(ErrorData),

    #[error("graph method error: {}", .0.describe())]
    GraphMethod(ErrorData),

    #[error("response error: {}", .0.describe())]
    Response(ErrorData),

    #[error("GraphQL error: {first} (and {other_count} other errors)")]
    GraphQl {
        first: serde_json::Value,
        other_count: usize,
    },

    #[error("missing expected field {0:?} in response")]
    MissingData(&'static str),

    #[error("{0} requires a login flow in progress")]
    NoLoginInProgress(&'static str),

    #[error("password encryption key material has not been fetched")]
    MissingPasswordKey,

    #[error("password encryption failed: {0}")]
    PasswordEncryption(String),

    #[error("media upload failed: {0}")]
    Upload(String),
}

impl HttpError {
    pub(crate) fn classify(error: ErrorData) -> HttpError {
        match error.code {
            Some(190) => HttpError::InvalidAccessToken(error),
            Some(400) => HttpError::InvalidEmail(error),
            Some(401) => HttpError::IncorrectPassword(error),
            Some(406) => HttpError::TwoFactorRequired(error),
            _ => match error.error_type.as_deref() {
                Some("OAuthException") => HttpError::OAuth(error),
                Some("GraphMethodException") => HttpError::GraphMethod(error),
                _ => HttpError::Response(error),
            },
        }
    }

    /// True when the server told us our session is gone for good.
    pub fn is_auth_invalidated(&self) -> bool {
        matches!(self, HttpError::InvalidAccessToken(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(code: i64) -> ErrorData {
        ErrorData {
            code: Some(code),
            message: Some("nope".to_string()),
            ..ErrorData::default()
        }
    }

    #[test]
    fn classification_by_code() {
        assert!(matches!(
            HttpError::classify(data(190)),
            HttpError::InvalidAccessToken(_)
        ));
        assert!(matches!(HttpError::classify(data(400)), HttpError::InvalidEmail(_)));
        assert!(matches!(
            HttpError::classify(data(401)),
            HttpError::IncorrectPassword(_)
        ));
        assert!(matches!(
            HttpError::classify(data(406)),
            HttpError::TwoFactorRequired(_)
        ));
    }

    #[test]
    fn classification_by_type() {
        let oauth = ErrorData {
            error_type: Some("OAuthException".to_string()),
            ..ErrorData::default()
        };
        assert!(matches!(HttpError::classify(oauth), HttpError::OAuth(_)));
        let unknown = ErrorData::default();
        assert!(matches!(HttpError::classify(unknown), HttpError::Response(_)));
    }

    #[test]
    fn describe_prefers_user_message() {
        let error = ErrorData {
            code: Some(1),
            message: Some("internal".to_string()),
            error_user_msg: Some("Something went wrong".to_string()),
            ..ErrorData::default()
        };
        assert_eq!(error.describe(), "Something went wrong");
        let error = ErrorData {
            code: Some(10),
            subcode: Some(20),
            message: Some("internal".to_string()),
            ..ErrorData::default()
        };
        assert_eq!(error.describe(), "10.20: internal");
    }
}
