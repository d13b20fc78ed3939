//! Fakes shared by the unit tests.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Value, json};

use crate::error::ApiError;
use crate::throttle::Pacer;
use crate::transport::{ApiTransport, check_payload};

pub type Handler = Box<dyn FnMut(&Call) -> Result<Value, ApiError>>;

#[derive(Debug, Clone)]
pub struct Call {
    pub write: bool,
    pub params: BTreeMap<String, String>,
}

impl Call {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn is(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| value.split('|').map(ToString::to_string).collect())
            .unwrap_or_default()
    }
}

/// Fake API answering every call through a closure and recording it.
pub struct ScriptedTransport {
    handler: Handler,
    pub calls: Vec<Call>,
}

impl ScriptedTransport {
    pub fn new(handler: impl FnMut(&Call) -> Result<Value, ApiError> + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Vec::new(),
        }
    }

    /// Answer login/logout/token calls and defer everything else to `handler`.
    pub fn with_auth(
        mut handler: impl FnMut(&Call) -> Result<Value, ApiError> + 'static,
    ) -> Self {
        Self::new(move |call| {
            if let Some(response) = auth_response(call) {
                return Ok(response);
            }
            handler(call)
        })
    }

    pub fn calls_where(&self, key: &str, value: &str) -> Vec<&Call> {
        self.calls.iter().filter(|call| call.is(key, value)).collect()
    }

    fn dispatch(&mut self, params: &[(&str, String)], write: bool) -> Result<Value, ApiError> {
        let call = Call {
            write,
            params: params
                .iter()
                .map(|(key, value)| ((*key).to_string(), value.clone()))
                .collect(),
        };
        let result = (self.handler)(&call);
        self.calls.push(call);
        result.and_then(check_payload)
    }
}

impl ApiTransport for ScriptedTransport {
    fn read(&mut self, params: &[(&str, String)]) -> Result<Value, ApiError> {
        self.dispatch(params, false)
    }

    fn write(&mut self, params: &[(&str, String)]) -> Result<Value, ApiError> {
        self.dispatch(params, true)
    }

    fn endpoint(&self) -> &str {
        "https://wiki.example.org/api.php"
    }

    fn request_count(&self) -> usize {
        self.calls.len()
    }
}

pub fn auth_response(call: &Call) -> Option<Value> {
    if call.is("meta", "tokens") {
        if call.is("type", "login") {
            return Some(json!({ "query": { "tokens": { "logintoken": "login+\\" } } }));
        }
        return Some(json!({ "query": { "tokens": { "csrftoken": "csrf+\\" } } }));
    }
    if call.is("action", "login") {
        return Some(json!({ "login": { "result": "Success", "lgusername": "Bot" } }));
    }
    if call.is("action", "logout") {
        return Some(json!({}));
    }
    None
}

/// Records requested pauses instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingPacer {
    pub pauses: Vec<Duration>,
}

impl Pacer for RecordingPacer {
    fn pause(&mut self, duration: Duration) {
        self.pauses.push(duration);
    }
}
