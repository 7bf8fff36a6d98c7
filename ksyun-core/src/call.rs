//! Call - One API action and the hooks around it
//!
//! An [`ApiCall`] runs its hooks strictly in order:
//!
//! ```text
//! before_call -> execute_call -> (on error: call_error) -> after_call
//! ```
//!
//! `before_call` may veto the rest of the call by returning `false`.
//! `call_error` replaces the default error propagation and may run
//! `execute_call` again. `after_call` sees the response and commits IDs and
//! nested state into the [`ResourceData`].

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use serde_json::Value as Json;

use crate::provider::{BoxFuture, ProviderError, ProviderResult};
use crate::resource::ResourceData;
use crate::retry::{Attempt, RetryPolicy, retry};
use crate::unmarshal::lookup;

/// Request parameters of one call, keyed by API parameter name
pub type RequestParams = BTreeMap<String, Json>;

pub type BeforeFn = dyn for<'a> Fn(&'a mut CallState, &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<bool>>
    + Send
    + Sync;

pub type ExecuteFn =
    dyn for<'a> Fn(&'a CallState, &'a ResourceData) -> BoxFuture<'a, ProviderResult<Json>> + Send + Sync;

pub type ErrorFn = dyn for<'a> Fn(
        &'a CallState,
        &'a ResourceData,
        &'a ExecuteFn,
        ProviderError,
    ) -> BoxFuture<'a, ProviderResult<Option<Json>>>
    + Send
    + Sync;

pub type AfterFn = dyn for<'a> Fn(&'a CallState, &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>>
    + Send
    + Sync;

/// Data of a call shared across its hooks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallState {
    /// API action (e.g., "CreateVpc")
    pub action: String,
    pub params: RequestParams,
    /// Response of the last successful `execute_call`
    pub response: Option<Json>,
}

impl CallState {
    /// Value at a dotted path in the response (e.g., "Subnet.SubnetId")
    pub fn response_value(&self, path: &str) -> Option<&Json> {
        self.response.as_ref().and_then(|r| lookup(r, path))
    }

    pub fn response_str(&self, path: &str) -> Option<&str> {
        self.response_value(path).and_then(Json::as_str)
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Json::as_str)
    }
}

/// What happened to a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// `before_call` vetoed the call
    Skipped,
    /// `execute_call` (or the error hook) produced a response
    Executed,
    /// The error hook concluded the goal holds without a response
    Settled,
}

/// One unit of work in an [`ApiProcess`](crate::process::ApiProcess)
pub struct ApiCall {
    pub state: CallState,
    before: Option<Box<BeforeFn>>,
    execute: Option<Box<ExecuteFn>>,
    on_error: Option<Box<ErrorFn>>,
    after: Option<Box<AfterFn>>,
}

impl std::fmt::Debug for ApiCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCall")
            .field("state", &self.state)
            .field("before", &self.before.is_some())
            .field("execute", &self.execute.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

impl ApiCall {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            state: CallState {
                action: action.into(),
                ..CallState::default()
            },
            before: None,
            execute: None,
            on_error: None,
            after: None,
        }
    }

    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.state.params = params;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Json>) -> Self {
        self.state.params.insert(name.into(), value.into());
        self
    }

    pub fn action(&self) -> &str {
        &self.state.action
    }

    pub fn params(&self) -> &RequestParams {
        &self.state.params
    }

    pub fn on_before<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut CallState, &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<bool>>
            + Send
            + Sync
            + 'static,
    {
        self.before = Some(Box::new(f));
        self
    }

    pub fn on_execute<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a CallState, &'a ResourceData) -> BoxFuture<'a, ProviderResult<Json>>
            + Send
            + Sync
            + 'static,
    {
        self.execute = Some(Box::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(
                &'a CallState,
                &'a ResourceData,
                &'a ExecuteFn,
                ProviderError,
            ) -> BoxFuture<'a, ProviderResult<Option<Json>>>
            + Send
            + Sync
            + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_after<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a CallState, &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>>
            + Send
            + Sync
            + 'static,
    {
        self.after = Some(Box::new(f));
        self
    }

    /// Error hook treating not-found as already done
    pub fn ignore_not_found(self) -> Self {
        self.on_error(|_call, _data, _execute, err| {
            Box::pin(async move {
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            })
        })
    }

    /// Error hook that re-runs the call while the error is transient
    pub fn retry_transient(self, policy: RetryPolicy) -> Self {
        self.on_error(move |call, data, execute, first_err| {
            let policy = policy.clone();
            Box::pin(async move {
                if !first_err.is_transient() {
                    return Err(first_err);
                }
                debug!("{} hit a transient error, retrying", call.action);
                retry(&policy, || async move {
                    match execute(call, data).await {
                        Ok(response) => Attempt::Done(Some(response)),
                        Err(e) if e.is_transient() => Attempt::Retry(e),
                        Err(e) => Attempt::Fail(e),
                    }
                })
                .await
            })
        })
    }

    /// Error hook for deletions
    ///
    /// Polls `read` until the resource is gone, re-running the call whenever
    /// the resource still exists. A not-found from either side ends the loop
    /// successfully without running the call again.
    pub fn retry_until_gone<R>(self, policy: RetryPolicy, read: R) -> Self
    where
        R: for<'a> Fn(&'a ResourceData) -> BoxFuture<'a, ProviderResult<()>>
            + Send
            + Sync
            + 'static,
    {
        let read = Arc::new(read);
        self.on_error(move |call, data, execute, first_err| {
            let read = Arc::clone(&read);
            let policy = policy.clone();
            Box::pin(async move {
                if first_err.is_not_found() {
                    return Ok(None);
                }
                if first_err.is_validation() {
                    return Err(first_err);
                }
                debug!("{} failed ({}), polling until gone", call.action, first_err);
                let read = &read;
                retry(&policy, || async move {
                    match (**read)(data).await {
                        Err(e) if e.is_not_found() => return Attempt::Done(None),
                        Err(e) => return Attempt::Retry(e),
                        Ok(()) => {}
                    }
                    match execute(call, data).await {
                        Ok(response) => Attempt::Done(Some(response)),
                        Err(e) if e.is_not_found() => Attempt::Done(None),
                        Err(e) if e.is_validation() => Attempt::Fail(e),
                        Err(e) => Attempt::Retry(e),
                    }
                })
                .await
            })
        })
    }

    /// Run the hook protocol against `data`
    pub async fn run(&mut self, data: &mut ResourceData) -> ProviderResult<CallOutcome> {
        if let Some(before) = &self.before
            && !before(&mut self.state, data).await?
        {
            debug!("{} skipped by before_call", self.state.action);
            return Ok(CallOutcome::Skipped);
        }

        let execute = self.execute.as_deref().ok_or_else(|| {
            ProviderError::new(format!("no execute hook for {}", self.state.action))
        })?;

        debug!("calling {} {:?}", self.state.action, self.state.params);
        let response = match execute(&self.state, data).await {
            Ok(response) => Some(response),
            Err(err) => match &self.on_error {
                Some(on_error) => on_error(&self.state, data, execute, err).await?,
                None => return Err(err),
            },
        };

        let outcome = if response.is_some() {
            CallOutcome::Executed
        } else {
            CallOutcome::Settled
        };
        self.state.response = response;

        if let Some(after) = &self.after {
            after(&self.state, data).await?;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn quick() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_secs(5), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn runs_hooks_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (l1, l2, l3) = (log.clone(), log.clone(), log.clone());

        let mut call = ApiCall::new("CreateVpc")
            .param("CidrBlock", "10.0.0.0/16")
            .on_before(move |call, _data| {
                let log = l1.clone();
                Box::pin(async move {
                    log.lock().unwrap().push("before");
                    call.params.insert("VpcName".to_string(), json!("tf-vpc"));
                    Ok(true)
                })
            })
            .on_execute(move |call, _data| {
                let log = l2.clone();
                Box::pin(async move {
                    log.lock().unwrap().push("execute");
                    assert_eq!(call.param_str("VpcName"), Some("tf-vpc"));
                    Ok(json!({"Vpc": {"VpcId": "vpc-1"}}))
                })
            })
            .on_after(move |call, data| {
                let log = l3.clone();
                Box::pin(async move {
                    log.lock().unwrap().push("after");
                    data.set_id(call.response_str("Vpc.VpcId").unwrap_or_default());
                    Ok(())
                })
            });

        let mut data = ResourceData::new("vpc");
        let outcome = call.run(&mut data).await.unwrap();

        assert_eq!(outcome, CallOutcome::Executed);
        assert_eq!(data.id(), "vpc-1");
        assert_eq!(*log.lock().unwrap(), vec!["before", "execute", "after"]);
    }

    #[tokio::test]
    async fn before_false_skips_execute_and_after() {
        let executed = Arc::new(AtomicU32::new(0));
        let e1 = executed.clone();
        let e2 = executed.clone();

        let mut call = ApiCall::new("ModifyNat")
            .on_before(|_call, _data| Box::pin(async { Ok(false) }))
            .on_execute(move |_call, _data| {
                let executed = e1.clone();
                Box::pin(async move {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({}))
                })
            })
            .on_after(move |_call, _data| {
                let executed = e2.clone();
                Box::pin(async move {
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            });

        let mut data = ResourceData::new("nat");
        assert_eq!(call.run(&mut data).await.unwrap(), CallOutcome::Skipped);
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_without_hook_propagates() {
        let mut call = ApiCall::new("DeleteVpc").on_execute(|_call, _data| {
            Box::pin(async { Err(ProviderError::new("boom")) })
        });
        let err = call.run(&mut ResourceData::new("vpc")).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn missing_execute_is_an_error() {
        let mut call = ApiCall::new("DeleteVpc");
        assert!(call.run(&mut ResourceData::new("vpc")).await.is_err());
    }

    #[tokio::test]
    async fn ignore_not_found_settles() {
        let mut call = ApiCall::new("DissociateNat")
            .on_execute(|_call, _data| {
                Box::pin(async { Err(ProviderError::not_found("association not found")) })
            })
            .ignore_not_found();
        let outcome = call.run(&mut ResourceData::new("nat_associate")).await.unwrap();
        assert_eq!(outcome, CallOutcome::Settled);
        assert_eq!(call.state.response, None);
    }

    #[tokio::test]
    async fn retry_transient_reruns_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let mut call = ApiCall::new("AssociateNat")
            .on_execute(move |_call, _data| {
                let attempts = a.clone();
                Box::pin(async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::transient("order is processing"))
                    } else {
                        Ok(json!({"Return": true}))
                    }
                })
            })
            .retry_transient(quick());

        let outcome = call.run(&mut ResourceData::new("nat")).await.unwrap();
        assert_eq!(outcome, CallOutcome::Executed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_on_first_poll_settles_without_reexecuting() {
        let executes = Arc::new(AtomicU32::new(0));
        let reads = Arc::new(AtomicU32::new(0));
        let (e, r) = (executes.clone(), reads.clone());

        let mut call = ApiCall::new("DeleteVpc")
            .on_execute(move |_call, _data| {
                let executes = e.clone();
                Box::pin(async move {
                    executes.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::transient("vpc has dependent routes"))
                })
            })
            .retry_until_gone(quick(), move |_data| {
                let reads = r.clone();
                Box::pin(async move {
                    reads.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::not_found("vpc not found"))
                })
            });

        let outcome = call.run(&mut ResourceData::new("vpc")).await.unwrap();
        assert_eq!(outcome, CallOutcome::Settled);
        assert_eq!(executes.load(Ordering::SeqCst), 1);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_until_gone_reexecutes_while_resource_exists() {
        let executes = Arc::new(AtomicU32::new(0));
        let e = executes.clone();

        let mut call = ApiCall::new("DeleteSubnet")
            .on_execute(move |_call, _data| {
                let executes = e.clone();
                Box::pin(async move {
                    if executes.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::transient("subnet in use"))
                    } else {
                        Ok(json!({"Return": true}))
                    }
                })
            })
            .retry_until_gone(quick(), |_data| Box::pin(async { Ok(()) }));

        let outcome = call.run(&mut ResourceData::new("subnet")).await.unwrap();
        assert_eq!(outcome, CallOutcome::Executed);
        assert_eq!(executes.load(Ordering::SeqCst), 3);
    }
}
