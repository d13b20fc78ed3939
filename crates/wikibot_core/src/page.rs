use serde::Serialize;

pub const NS_FILE: i32 = 6;
pub const NS_TEMPLATE: i32 = 10;

/// A page to act on: by id after a search, by title after a listing or move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRef {
    pub id: Option<i64>,
    pub title: String,
}

impl PageRef {
    pub fn from_title(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
        }
    }

    pub fn with_id(id: i64, title: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            title: title.into(),
        }
    }

    /// Identity used for dedup: the page id when known, else the title key.
    pub fn identity(&self) -> String {
        match self.id {
            Some(id) => format!("#{id}"),
            None => title_key(&self.title),
        }
    }
}

/// Content of one page as read at `server_timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSnapshot {
    pub title: String,
    pub page_id: Option<i64>,
    pub content: Option<String>,
    pub exists: bool,
    pub revision_timestamp: Option<String>,
    pub server_timestamp: String,
}

impl PageSnapshot {
    pub fn missing(title: impl Into<String>, page_id: Option<i64>, server_timestamp: &str) -> Self {
        Self {
            title: title.into(),
            page_id,
            content: None,
            exists: false,
            revision_timestamp: None,
            server_timestamp: server_timestamp.to_string(),
        }
    }
}

/// Case-preserving comparison key: underscores as spaces, first letter upper.
pub fn title_key(title: &str) -> String {
    let normalized = title.replace('_', " ");
    let trimmed = normalized.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
