use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ApiError, ErrorKind};
use crate::page::PageSnapshot;
use crate::response::{EditResponse, parse};
use crate::session::Session;
use crate::transport::ApiTransport;

/// Submissions allowed per edit: the first try plus one after a token refresh.
pub const MAX_EDIT_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub title: String,
    pub text: String,
    pub summary: String,
    /// Timestamp of the revision the new text was derived from.
    pub base_timestamp: Option<String>,
    /// Server clock when that revision was read.
    pub start_timestamp: String,
    pub tags: Option<String>,
    pub bot: bool,
    pub minor: bool,
    pub nocreate: bool,
}

impl EditRequest {
    /// Edit guarded by the conflict-detection pair of `snapshot`.
    pub fn from_snapshot(snapshot: &PageSnapshot, text: String, summary: &str) -> Self {
        Self {
            title: snapshot.title.clone(),
            text,
            summary: summary.to_string(),
            base_timestamp: snapshot.revision_timestamp.clone(),
            start_timestamp: snapshot.server_timestamp.clone(),
            tags: None,
            bot: true,
            minor: true,
            nocreate: false,
        }
    }

    pub fn with_tags(mut self, tags: Option<&str>) -> Self {
        self.tags = tags.map(ToString::to_string);
        self
    }

    pub fn with_nocreate(mut self, nocreate: bool) -> Self {
        self.nocreate = nocreate;
        self
    }

    /// Disabled flags and unset options are left out: the API treats any
    /// present boolean parameter as true, even with an empty value.
    fn params(&self, token: String) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", self.title.clone()),
            ("text", self.text.clone()),
            ("summary", self.summary.clone()),
        ];
        if let Some(tags) = &self.tags {
            params.push(("tags", tags.clone()));
        }
        for (name, enabled) in [("bot", self.bot), ("minor", self.minor), ("nocreate", self.nocreate)] {
            if enabled {
                params.push((name, "1".to_string()));
            }
        }
        if let Some(base) = &self.base_timestamp {
            params.push(("basetimestamp", base.clone()));
        }
        params.push(("starttimestamp", self.start_timestamp.clone()));
        params.push(("token", token));
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditFailure {
    pub kind: ErrorKind,
    pub reason: String,
}

impl From<ApiError> for EditFailure {
    fn from(error: ApiError) -> Self {
        Self {
            kind: error.kind(),
            reason: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EditOutcome {
    Applied { old_revid: u64, new_revid: u64 },
    NoChange,
    Failed(EditFailure),
}

enum SubmitState {
    Attempting { attempt: usize },
    Done(EditOutcome),
}

/// Submit one edit. A rejected token is refreshed and the edit retried once;
/// any other error, or a second rejection, ends in [`EditOutcome::Failed`].
pub fn submit_edit<T: ApiTransport>(session: &mut Session<T>, request: &EditRequest) -> EditOutcome {
    let mut state = SubmitState::Attempting { attempt: 1 };
    loop {
        state = match state {
            SubmitState::Done(outcome) => return outcome,
            SubmitState::Attempting { attempt } => attempt_edit(session, request, attempt),
        };
    }
}

fn attempt_edit<T: ApiTransport>(
    session: &mut Session<T>,
    request: &EditRequest,
    attempt: usize,
) -> SubmitState {
    let token = match session.csrf_token() {
        Ok(token) => token,
        Err(error) => return SubmitState::Done(EditOutcome::Failed(error.into())),
    };

    match session.transport_mut().write(&request.params(token)) {
        Ok(payload) => SubmitState::Done(classify_response(payload)),
        Err(error @ ApiError::BadToken { .. }) => {
            if attempt >= MAX_EDIT_ATTEMPTS {
                warn!(title = %request.title, attempt, "edit token rejected after refresh");
                return SubmitState::Done(EditOutcome::Failed(error.into()));
            }
            warn!(title = %request.title, attempt, "edit token rejected; refreshing");
            session.mark_token_stale();
            SubmitState::Attempting {
                attempt: attempt + 1,
            }
        }
        Err(error) => SubmitState::Done(EditOutcome::Failed(error.into())),
    }
}

fn classify_response(payload: serde_json::Value) -> EditOutcome {
    let parsed: EditResponse = match parse(payload, "edit") {
        Ok(parsed) => parsed,
        Err(error) => return EditOutcome::Failed(error.into()),
    };
    let Some(edit) = parsed.edit else {
        return EditOutcome::Failed(ApiError::malformed("missing edit payload in API response").into());
    };
    if edit.result.as_deref() != Some("Success") {
        return EditOutcome::Failed(EditFailure {
            kind: ErrorKind::PermanentRejection,
            reason: format!(
                "edit result {}",
                edit.result.unwrap_or_else(|| "unknown".to_string())
            ),
        });
    }
    if edit.nochange {
        debug!(title = ?edit.title, "edit produced no change");
        return EditOutcome::NoChange;
    }
    match (edit.oldrevid, edit.newrevid) {
        (Some(old_revid), Some(new_revid)) => EditOutcome::Applied { old_revid, new_revid },
        _ => EditOutcome::Failed(
            ApiError::malformed("successful edit without revision ids").into(),
        ),
    }
}
