//! Typed views over the MediaWiki API payloads the bots consume.
//!
//! Every payload goes through [`parse`], which turns a shape mismatch into
//! [`ApiError::MalformedResponse`] instead of letting optional fields leak
//! further up as silent `None`s.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;

pub fn parse<T: DeserializeOwned>(payload: Value, what: &str) -> Result<T, ApiError> {
    serde_json::from_value(payload)
        .map_err(|error| ApiError::malformed(format!("failed to decode {what} response: {error}")))
}

#[derive(Debug, Deserialize, Default)]
pub struct TokenQueryResponse {
    #[serde(default)]
    pub query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
pub struct TokenQueryPayload {
    pub tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TokenPayload {
    pub logintoken: Option<String>,
    pub csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoginResponse {
    #[serde(default)]
    pub login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoginPayload {
    pub result: Option<String>,
    pub reason: Option<String>,
    pub lgusername: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct EditResponse {
    pub edit: Option<EditResult>,
}

#[derive(Debug, Deserialize, Default)]
pub struct EditResult {
    pub result: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub nochange: bool,
    pub oldrevid: Option<u64>,
    pub newrevid: Option<u64>,
}

/// `list=search` item with `srprop=` (title, namespace and id only).
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub ns: i32,
    pub title: String,
    pub pageid: Option<i64>,
}

/// `list=categorymembers` item with `cmprop=ids|title|timestamp`.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryMember {
    pub pageid: Option<i64>,
    pub ns: i32,
    pub title: String,
    pub timestamp: Option<String>,
}

/// `list=logevents` item. Suppressed entries carry no title.
#[derive(Debug, Clone, Deserialize)]
pub struct LogEvent {
    pub logid: Option<i64>,
    pub ns: Option<i32>,
    pub title: Option<String>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub params: Value,
}

impl LogEvent {
    /// Destination of a move entry.
    pub fn move_target(&self) -> Option<&str> {
        self.params.get("target_title").and_then(Value::as_str)
    }
}

/// Page item of `prop=globalusage` / `prop=fileusage` queries.
#[derive(Debug, Clone, Deserialize)]
pub struct UsagePage {
    pub title: String,
    #[serde(default)]
    pub missing: bool,
    #[serde(default)]
    pub globalusage: Vec<Value>,
    #[serde(default)]
    pub fileusage: Vec<Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PageQueryResult {
    pub curtimestamp: Option<String>,
    pub query: Option<PageQueryPayload>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PageQueryPayload {
    #[serde(default)]
    pub pages: Vec<PageItem>,
    #[serde(default)]
    pub normalized: Vec<TitleNormalization>,
}

#[derive(Debug, Deserialize)]
pub struct TitleNormalization {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct PageItem {
    pub pageid: Option<i64>,
    pub ns: Option<i32>,
    pub title: Option<String>,
    #[serde(default)]
    pub missing: bool,
    #[serde(default)]
    pub invalid: bool,
    #[serde(default)]
    pub revisions: Vec<RevisionItem>,
}

#[derive(Debug, Deserialize)]
pub struct RevisionItem {
    pub timestamp: Option<String>,
    pub slots: Option<RevisionSlotContainer>,
    #[serde(default)]
    pub texthidden: bool,
}

#[derive(Debug, Deserialize)]
pub struct RevisionSlotContainer {
    pub main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
pub struct RevisionMainSlot {
    pub content: Option<String>,
    #[serde(default)]
    pub texthidden: bool,
}

impl RevisionItem {
    pub fn main_content(&self) -> Option<&str> {
        if self.texthidden {
            return None;
        }
        self.slots
            .as_ref()
            .and_then(|slots| slots.main.as_ref())
            .filter(|slot| !slot.texthidden)
            .and_then(|slot| slot.content.as_deref())
    }
}
