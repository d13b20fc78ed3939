use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Coarse classification that drives how the runner reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request never produced a usable response. Skip the item or batch.
    TransientNetwork,
    /// Edit token expired or was rejected. Refresh and retry once.
    AuthStale,
    /// Page missing, deleted or changed underneath us. Skip, not an error.
    Conflict,
    /// Server refused the request for any other reason. Count as failed.
    PermanentRejection,
    /// Response did not have the shape the endpoint promises.
    MalformedResponse,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::AuthStale => "auth_stale",
            Self::Conflict => "conflict",
            Self::PermanentRejection => "permanent_rejection",
            Self::MalformedResponse => "malformed_response",
        }
    }
}

const CONFLICT_CODES: &[&str] = &[
    "editconflict",
    "pagedeleted",
    "missingtitle",
    "articleexists",
    "nocreate-missing",
];

const TOKEN_CODES: &[&str] = &["badtoken", "notoken"];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to call MediaWiki API: {0}")]
    Transport(String),

    #[error("MediaWiki API request failed with HTTP {0}")]
    HttpStatus(u16),

    #[error("edit token rejected [{code}]")]
    BadToken { code: String },

    #[error("MediaWiki API error [{code}]: {info}")]
    Api { code: String, info: String },

    #[error("malformed MediaWiki response: {0}")]
    MalformedResponse(String),

    #[error("page not returned by the server: {0}")]
    UnknownPage(String),

    #[error("session is not logged in")]
    NotLoggedIn,

    #[error("MediaWiki login failed: {0}")]
    LoginFailed(String),
}

impl ApiError {
    /// Build an error from the `error` object of an API payload.
    pub fn from_error_object(error: &Value) -> Self {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error")
            .to_string();
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info")
            .to_string();
        if TOKEN_CODES.contains(&code.as_str()) {
            return Self::BadToken { code };
        }
        Self::Api { code, info }
    }

    pub fn malformed(context: impl Into<String>) -> Self {
        Self::MalformedResponse(context.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::HttpStatus(_) => ErrorKind::TransientNetwork,
            Self::BadToken { .. } | Self::NotLoggedIn => ErrorKind::AuthStale,
            Self::Api { code, .. } if CONFLICT_CODES.contains(&code.as_str()) => {
                ErrorKind::Conflict
            }
            Self::UnknownPage(_) => ErrorKind::Conflict,
            Self::Api { .. } | Self::LoginFailed(_) => ErrorKind::PermanentRejection,
            Self::MalformedResponse(_) => ErrorKind::MalformedResponse,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            Self::BadToken { code } | Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}
