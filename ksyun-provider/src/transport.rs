//! Transport - The seam to the signed HTTP layer
//!
//! Request signing and HTTP live outside this crate behind [`Transport`].
//! [`ScriptedTransport`] answers from canned responses and records every
//! request; it backs the tests and the offline CLI.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ksyun_core::call::RequestParams;
use serde::Serialize;
use serde_json::Value as Json;

use crate::errors::SdkError;

/// Connection settings the HTTP layer applies when sending a request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpSettings {
    pub proxy: Option<String>,
    pub keepalive: bool,
    /// Bound on one attempt; the client enforces it as well
    pub timeout: Duration,
}

/// One query-style API request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRequest {
    pub service: String,
    pub version: String,
    pub endpoint: String,
    pub region: String,
    pub action: String,
    pub params: RequestParams,
    pub http: HttpSettings,
}

impl ApiRequest {
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Json::as_str)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the decoded JSON body
    async fn send(&self, request: &ApiRequest) -> Result<Json, SdkError>;
}

type Handler = Box<dyn Fn(&ApiRequest) -> Result<Json, SdkError> + Send + Sync>;

/// In-memory transport answering from a script
///
/// Queued answers for an action are used first, in order; after that the
/// action's handler answers. Actions with neither fail with
/// `UnsupportedOperation`.
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Result<Json, SdkError>>>>,
    handlers: Mutex<HashMap<String, Handler>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response for the next call of `action`
    pub fn respond(&self, action: &str, response: Json) -> &Self {
        self.enqueue(action, Ok(response))
    }

    /// Queue an error for the next call of `action`
    pub fn fail(&self, action: &str, error: SdkError) -> &Self {
        self.enqueue(action, Err(error))
    }

    /// Answer every further call of `action` through `handler`
    pub fn on<F>(&self, action: &str, handler: F) -> &Self
    where
        F: Fn(&ApiRequest) -> Result<Json, SdkError> + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.insert(action.to_string(), Box::new(handler));
        }
        self
    }

    /// Answer every further call of `action` with the same response
    pub fn always(&self, action: &str, response: Json) -> &Self {
        self.on(action, move |_| Ok(response.clone()))
    }

    fn enqueue(&self, action: &str, answer: Result<Json, SdkError>) -> &Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.entry(action.to_string()).or_default().push_back(answer);
        }
        self
    }

    /// Every request sent so far, in order
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Actions sent so far, in order
    pub fn actions(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.action).collect()
    }

    /// Requests sent for one action
    pub fn requests_for(&self, action: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.action == action)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Json, SdkError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let queued = self
            .queued
            .lock()
            .ok()
            .and_then(|mut queued| queued.get_mut(&request.action)?.pop_front());
        if let Some(answer) = queued {
            return answer;
        }

        let handlers = self
            .handlers
            .lock()
            .map_err(|_| SdkError::new("InternalError", "transport script poisoned", 500))?;
        match handlers.get(&request.action) {
            Some(handler) => handler(request),
            None => Err(SdkError::new(
                "UnsupportedOperation",
                format!("no scripted response for {}", request.action),
                400,
            )),
        }
    }
}
