use std::collections::VecDeque;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::transport::ApiTransport;

/// Descriptor of one continuation-driven `action=query` listing.
#[derive(Debug, Clone)]
pub struct ListQuery {
    params: Vec<(&'static str, String)>,
    continue_key: &'static str,
    result_field: &'static str,
}

impl ListQuery {
    /// `result_field` names the array under `query`, `continue_key` the
    /// cursor key expected inside the `continue` container.
    pub fn new(result_field: &'static str, continue_key: &'static str) -> Self {
        Self {
            params: vec![("action", "query".to_string())],
            continue_key,
            result_field,
        }
    }

    pub fn param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.push((key, value.into()));
        self
    }

    pub fn continue_key(&self) -> &str {
        self.continue_key
    }

    pub fn result_field(&self) -> &str {
        self.result_field
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageState {
    Pending,
    Exhausted,
    Failed,
}

/// Lazy item sequence over every page of a [`ListQuery`].
///
/// The loop stops on the first response whose `continue` container lacks the
/// query's cursor key. An empty-string cursor is still a cursor. A failed
/// request ends the sequence early; [`Paginator::failure`] tells the caller
/// the items seen so far are partial.
pub struct Paginator<'a, T: ApiTransport + ?Sized> {
    transport: &'a mut T,
    query: ListQuery,
    continuation: Map<String, Value>,
    buffer: VecDeque<Value>,
    state: PageState,
    pages_fetched: usize,
    failure: Option<ApiError>,
}

impl<'a, T: ApiTransport + ?Sized> Paginator<'a, T> {
    pub fn new(transport: &'a mut T, query: ListQuery) -> Self {
        Self {
            transport,
            query,
            continuation: Map::new(),
            buffer: VecDeque::new(),
            state: PageState::Pending,
            pages_fetched: 0,
            failure: None,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn failure(&self) -> Option<&ApiError> {
        self.failure.as_ref()
    }

    /// True once the server stopped returning the cursor key.
    pub fn is_complete(&self) -> bool {
        self.state == PageState::Exhausted && self.buffer.is_empty()
    }

    /// Drain the remaining items as `D`, logging and skipping items that do
    /// not decode.
    pub fn drain_typed<D: DeserializeOwned>(&mut self) -> Vec<D> {
        let mut output = Vec::new();
        for item in self.by_ref() {
            match serde_json::from_value::<D>(item) {
                Ok(decoded) => output.push(decoded),
                Err(error) => warn!(%error, "skipping undecodable list item"),
            }
        }
        output
    }

    fn fetch_page(&mut self) {
        let mut owned = self
            .query
            .params
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect::<Vec<_>>();
        owned.extend(
            self.continuation
                .iter()
                .map(|(key, value)| (key.clone(), cursor_value(value))),
        );
        let params = owned
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect::<Vec<_>>();

        let payload = match self.transport.read(&params) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(
                    %error,
                    list = self.query.result_field,
                    pages = self.pages_fetched,
                    "pagination aborted; remaining pages skipped"
                );
                self.failure = Some(error);
                self.state = PageState::Failed;
                return;
            }
        };
        self.pages_fetched += 1;

        let items = payload
            .get("query")
            .and_then(|query| query.get(self.query.result_field))
            .and_then(Value::as_array);
        let Some(items) = items else {
            debug!(list = self.query.result_field, "result field absent; ending pagination");
            self.state = PageState::Exhausted;
            return;
        };
        self.buffer.extend(items.iter().cloned());

        match payload.get("continue").and_then(Value::as_object) {
            Some(container) if container.contains_key(self.query.continue_key) => {
                self.continuation = container.clone();
            }
            _ => self.state = PageState::Exhausted,
        }
    }
}

impl<T: ApiTransport + ?Sized> Iterator for Paginator<'_, T> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(item);
            }
            if self.state != PageState::Pending {
                return None;
            }
            self.fetch_page();
        }
    }
}

pub(crate) fn cursor_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
