//! Mock network backend.
//!
//! A [`MockBackend`] holds a connection-response table keyed by
//! `(method, url)`. Requests issued through an [`HttpClient`] are matched
//! against it: a match settles the [`ResponseFuture`] on the next microtask,
//! no match parks the request as pending until
//! [`MockBackend::resolve_all_pending_connections`] re-dispatches it.
//! After a test the verification calls report unused, overused and
//! unanswered entries.

use crate::module::TestModuleDef;
use crate::result::{SettleError, SettleResult};
use crate::scheduler::Scheduler;
use crate::view::injector::Provider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use thiserror::Error;

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
    /// OPTIONS
    Options,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        };
        f.write_str(name)
    }
}

/// Request headers, sorted by name
pub type Headers = BTreeMap<String, String>;

/// Outgoing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Method
    pub method: Method,
    /// Target URL
    pub url: String,
    /// Headers
    pub headers: Headers,
    /// JSON body
    pub body: Option<Value>,
}

impl Request {
    /// Request without headers or body
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach a JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Mocked response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Status code
    pub status: u16,
    /// JSON body, if one was configured
    pub body: Option<Value>,
}

impl Response {
    /// Status in the 2xx range
    #[must_use]
    pub const fn ok(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Deserialize the body
    ///
    /// # Errors
    ///
    /// Returns `Json` if the body is absent or has the wrong shape
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> SettleResult<T> {
        Ok(serde_json::from_value(self.body.clone().unwrap_or(Value::Null))?)
    }
}

/// Network failure configured with [`ResponseAction::fail_with`]
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct HttpError {
    /// Failure message
    pub message: String,
}

type EvaluateFn = Rc<dyn Fn(&Value, &Headers, &Request)>;

struct ConnectionResponse {
    method: Method,
    url: String,
    status: u16,
    body: Option<Value>,
    error: Option<String>,
    evaluate: Option<EvaluateFn>,
    times_used: usize,
}

impl ConnectionResponse {
    fn label(&self) -> String {
        format!("-) {} on {}", self.method, self.url)
    }

    fn outcome(&self) -> Result<Response, HttpError> {
        match &self.error {
            Some(message) => Err(HttpError {
                message: message.clone(),
            }),
            None => Ok(Response {
                status: self.status,
                body: self.body.clone(),
            }),
        }
    }
}

/// Configures the answer to one `(method, url)` pair
#[derive(Clone)]
pub struct ResponseAction {
    entry: Rc<RefCell<ConnectionResponse>>,
}

impl fmt::Debug for ResponseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = self.entry.borrow();
        f.debug_struct("ResponseAction")
            .field("method", &entry.method)
            .field("url", &entry.url)
            .field("status", &entry.status)
            .field("error", &entry.error)
            .finish_non_exhaustive()
    }
}

impl ResponseAction {
    /// Respond with a JSON body; clears a configured failure
    #[must_use]
    pub fn respond_with(self, body: Value) -> Self {
        {
            let mut entry = self.entry.borrow_mut();
            entry.body = Some(body);
            entry.error = None;
        }
        self
    }

    /// Status code of the response (200 unless set)
    #[must_use]
    pub fn with_status(self, status: u16) -> Self {
        self.entry.borrow_mut().status = status;
        self
    }

    /// Fail the request with `message`; clears a configured body
    #[must_use]
    pub fn fail_with(self, message: impl Into<String>) -> Self {
        {
            let mut entry = self.entry.borrow_mut();
            entry.error = Some(message.into());
            entry.body = None;
        }
        self
    }

    /// Inspect each matching request (body, headers, request) before it is
    /// answered
    #[must_use]
    pub fn evaluate_request(self, f: impl Fn(&Value, &Headers, &Request) + 'static) -> Self {
        self.entry.borrow_mut().evaluate = Some(Rc::new(f));
        self
    }
}

#[derive(Default)]
struct Slot {
    outcome: RefCell<Option<Result<Response, HttpError>>>,
    waker: RefCell<Option<Waker>>,
}

impl Slot {
    fn settle(&self, outcome: Result<Response, HttpError>) {
        *self.outcome.borrow_mut() = Some(outcome);
        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Answer to an issued request
pub struct ResponseFuture {
    slot: Rc<Slot>,
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("settled", &self.slot.outcome.borrow().is_some())
            .finish()
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response, HttpError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.slot.outcome.borrow_mut().take() {
            return Poll::Ready(outcome);
        }
        *self.slot.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

struct Connection {
    request: Request,
    slot: Rc<Slot>,
    scheduler: Rc<dyn Scheduler>,
}

#[derive(Default)]
struct BackendInner {
    responses: RefCell<Vec<Rc<RefCell<ConnectionResponse>>>>,
    pending: RefCell<Vec<Connection>>,
}

/// Connection-response table shared by every client built over it
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Rc<BackendInner>,
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockBackend")
            .field("responses", &self.inner.responses.borrow().len())
            .field("pending", &self.inner.pending.borrow().len())
            .finish()
    }
}

impl MockBackend {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the response for `(method, url)`
    ///
    /// # Errors
    ///
    /// Returns `DuplicateResponse` if the pair already has a response
    pub fn when(&self, method: Method, url: impl Into<String>) -> SettleResult<ResponseAction> {
        let url = url.into();
        let duplicate = self.find(method, &url).is_some();
        if duplicate {
            return Err(SettleError::DuplicateResponse {
                method: method.to_string(),
                url,
            });
        }
        let entry = Rc::new(RefCell::new(ConnectionResponse {
            method,
            url,
            status: 200,
            body: None,
            error: None,
            evaluate: None,
            times_used: 0,
        }));
        self.inner.responses.borrow_mut().push(Rc::clone(&entry));
        Ok(ResponseAction { entry })
    }

    fn find(&self, method: Method, url: &str) -> Option<Rc<RefCell<ConnectionResponse>>> {
        self.inner
            .responses
            .borrow()
            .iter()
            .find(|entry| {
                let entry = entry.borrow();
                entry.method == method && entry.url == url
            })
            .cloned()
    }

    fn handle(&self, connection: Connection) {
        let Some(entry) = self.find(connection.request.method, &connection.request.url) else {
            tracing::debug!(
                method = %connection.request.method,
                url = %connection.request.url,
                "no mock response, request pending"
            );
            self.inner.pending.borrow_mut().push(connection);
            return;
        };

        let evaluate = entry.borrow().evaluate.clone();
        if let Some(evaluate) = evaluate {
            let body = connection.request.body.clone().unwrap_or(Value::Null);
            evaluate(&body, &connection.request.headers, &connection.request);
        }
        let outcome = {
            let mut entry = entry.borrow_mut();
            entry.times_used += 1;
            entry.outcome()
        };
        let slot = connection.slot;
        connection
            .scheduler
            .queue_microtask(Box::new(move || slot.settle(outcome)));
    }

    /// Number of requests waiting for a response
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    /// How often the response for `(method, url)` was used, if defined
    #[must_use]
    pub fn times_used(&self, method: Method, url: &str) -> Option<usize> {
        self.find(method, url).map(|entry| entry.borrow().times_used)
    }

    /// Re-dispatch every pending request against the current table
    pub fn resolve_all_pending_connections(&self) {
        let pending = std::mem::take(&mut *self.inner.pending.borrow_mut());
        for connection in pending {
            self.handle(connection);
        }
    }

    /// Forget all responses and pending requests
    pub fn reset_expectations(&self) {
        self.inner.responses.borrow_mut().clear();
        self.inner.pending.borrow_mut().clear();
    }

    fn pending_message(&self) -> Option<String> {
        let pending = self.inner.pending.borrow();
        if pending.is_empty() {
            return None;
        }
        let lines: Vec<String> = pending
            .iter()
            .map(|c| format!("-) {} on {}", c.request.method, c.request.url))
            .collect();
        Some(format!(
            "No response could be found for the following connection(s):\n{}",
            lines.join("\n")
        ))
    }

    fn usage_message(&self) -> Option<String> {
        let responses = self.inner.responses.borrow();
        let unused: Vec<String> = responses
            .iter()
            .filter(|r| r.borrow().times_used == 0)
            .map(|r| r.borrow().label())
            .collect();
        let overused: Vec<String> = responses
            .iter()
            .filter(|r| r.borrow().times_used > 1)
            .map(|r| {
                let r = r.borrow();
                format!("{} fired {} times", r.label(), r.times_used)
            })
            .collect();

        let mut sections = Vec::new();
        if !unused.is_empty() {
            sections.push(format!("The following responses were not used:\n{}", unused.join("\n")));
        }
        if !overused.is_empty() {
            sections.push(format!(
                "The following responses were used more than once:\n{}",
                overused.join("\n")
            ));
        }
        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n"))
        }
    }

    /// Fail if any request is still waiting for a response
    ///
    /// # Errors
    ///
    /// Returns `VerificationFailed` listing the pending requests
    pub fn verify_no_pending_requests(&self) -> SettleResult<()> {
        match self.pending_message() {
            Some(message) => Err(SettleError::VerificationFailed { message }),
            None => Ok(()),
        }
    }

    /// Fail if any response was used zero times or more than once
    ///
    /// # Errors
    ///
    /// Returns `VerificationFailed` listing the offending responses
    pub fn verify_each_response_used_once(&self) -> SettleResult<()> {
        match self.usage_message() {
            Some(message) => Err(SettleError::VerificationFailed { message }),
            None => Ok(()),
        }
    }

    /// Both verifications; failures are reported together
    ///
    /// # Errors
    ///
    /// Returns `VerificationFailed` with every failure message
    pub fn verify_all_interactions(&self) -> SettleResult<()> {
        let messages: Vec<String> = [self.pending_message(), self.usage_message()]
            .into_iter()
            .flatten()
            .collect();
        if messages.is_empty() {
            Ok(())
        } else {
            Err(SettleError::VerificationFailed {
                message: messages.join("\n\n"),
            })
        }
    }
}

/// Issues requests against a [`MockBackend`]
#[derive(Clone)]
pub struct HttpClient {
    backend: MockBackend,
    scheduler: Rc<dyn Scheduler>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient").field("backend", &self.backend).finish()
    }
}

impl HttpClient {
    /// Client over `backend`; answers are delivered through `scheduler`
    #[must_use]
    pub fn new(backend: MockBackend, scheduler: Rc<dyn Scheduler>) -> Self {
        Self { backend, scheduler }
    }

    /// Backend this client talks to
    #[must_use]
    pub const fn backend(&self) -> &MockBackend {
        &self.backend
    }

    /// Issue `request`
    #[must_use]
    pub fn request(&self, request: Request) -> ResponseFuture {
        tracing::trace!(method = %request.method, url = %request.url, "mock request");
        let slot = Rc::new(Slot::default());
        self.backend.handle(Connection {
            request,
            slot: Rc::clone(&slot),
            scheduler: Rc::clone(&self.scheduler),
        });
        ResponseFuture { slot }
    }

    /// GET `url`
    #[must_use]
    pub fn get(&self, url: impl Into<String>) -> ResponseFuture {
        self.request(Request::new(Method::Get, url))
    }

    /// POST `body` to `url`
    #[must_use]
    pub fn post(&self, url: impl Into<String>, body: Value) -> ResponseFuture {
        self.request(Request::new(Method::Post, url).with_body(body))
    }

    /// PUT `body` to `url`
    #[must_use]
    pub fn put(&self, url: impl Into<String>, body: Value) -> ResponseFuture {
        self.request(Request::new(Method::Put, url).with_body(body))
    }

    /// DELETE `url`
    #[must_use]
    pub fn delete(&self, url: impl Into<String>) -> ResponseFuture {
        self.request(Request::new(Method::Delete, url))
    }
}

/// Module providing `backend` and an [`HttpClient`] wired to the harness
/// scheduler
#[must_use]
pub fn mock_backend_module(backend: &MockBackend) -> TestModuleDef {
    TestModuleDef::new("MockBackendModule")
        .provider(Provider::value(backend.clone()))
        .provider(Provider::factory(|injector| {
            let backend = injector.get::<MockBackend>()?;
            let scheduler = injector.get::<Rc<dyn Scheduler>>()?;
            Ok(HttpClient::new(backend, scheduler))
        }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::TestContext;
    use crate::inspector::{Inspector, PromiseResult};
    use crate::module::ModuleConfig;
    use serde_json::json;
    use std::cell::Cell;

    fn client(ctx: &TestContext, backend: &MockBackend) -> HttpClient {
        HttpClient::new(backend.clone(), ctx.scheduler())
    }

    // =========================================================================
    // Table
    // =========================================================================

    mod table_tests {
        use super::*;

        #[test]
        fn test_duplicate_pair_rejected() {
            let backend = MockBackend::new();
            let _ = backend.when(Method::Get, "/a").unwrap();
            let err = backend.when(Method::Get, "/a").unwrap_err();
            assert_eq!(err.to_string(), "Already defined a response for GET on /a");
            assert!(backend.when(Method::Post, "/a").is_ok());
        }

        #[test]
        fn test_respond_and_fail_clear_each_other() {
            let ctx = TestContext::new();
            let backend = MockBackend::new();
            let _ = backend
                .when(Method::Get, "/x")
                .unwrap()
                .fail_with("down")
                .respond_with(json!({"ok": true}))
                .with_status(201);
            let result = Inspector::new(&ctx).inspect_future(client(&ctx, &backend).get("/x")).unwrap();
            assert_eq!(
                result,
                PromiseResult::Resolved(Response {
                    status: 201,
                    body: Some(json!({"ok": true})),
                })
            );

            backend.reset_expectations();
            let _ = backend
                .when(Method::Get, "/x")
                .unwrap()
                .respond_with(json!(1))
                .fail_with("down");
            let result = Inspector::new(&ctx).inspect_future(client(&ctx, &backend).get("/x")).unwrap();
            assert_eq!(
                result,
                PromiseResult::Rejected(HttpError {
                    message: "down".to_string()
                })
            );
        }

        #[test]
        fn test_evaluate_request_sees_body_and_headers() {
            let ctx = TestContext::new();
            let backend = MockBackend::new();
            let seen = Rc::new(Cell::new(false));
            let flag = Rc::clone(&seen);
            let _ = backend.when(Method::Post, "/save").unwrap().evaluate_request(move |body, headers, request| {
                assert_eq!(body, &json!({"name": "x"}));
                assert_eq!(headers.get("auth").map(String::as_str), Some("t"));
                assert_eq!(request.url, "/save");
                flag.set(true);
            });
            let request = Request::new(Method::Post, "/save")
                .with_header("auth", "t")
                .with_body(json!({"name": "x"}));
            let result = Inspector::new(&ctx)
                .inspect_future(client(&ctx, &backend).request(request))
                .unwrap();
            assert!(seen.get());
            assert_eq!(result, PromiseResult::Resolved(Response { status: 200, body: None }));
        }
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    mod delivery_tests {
        use super::*;

        #[test]
        fn test_settles_on_next_microtask() {
            let ctx = TestContext::new();
            let backend = MockBackend::new();
            let _ = backend.when(Method::Get, "/n").unwrap().respond_with(json!(5));
            let result = Inspector::new(&ctx)
                .immediate_future(client(&ctx, &backend).get("/n"))
                .unwrap();
            assert!(result.is_resolved());
        }

        #[test]
        fn test_unmatched_stays_pending_until_resolved() {
            let ctx = TestContext::new();
            let backend = MockBackend::new();
            let inspector = Inspector::new(&ctx);
            let http = client(&ctx, &backend);

            let slot = Rc::new(RefCell::new(None));
            let sink = Rc::clone(&slot);
            let future = http.get("/late");
            let handle = ctx.zone().run(|| {
                ctx.zone().spawn(async move {
                    *sink.borrow_mut() = Some(future.await);
                })
            });
            inspector.inspect_future(async { Ok::<_, String>(()) }).unwrap();
            assert!(slot.borrow().is_none());
            assert_eq!(backend.pending_count(), 1);

            let _ = backend.when(Method::Get, "/late").unwrap().respond_with(json!("now"));
            backend.resolve_all_pending_connections();
            assert_eq!(backend.pending_count(), 0);
            inspector.inspect_future(async { Ok::<_, String>(()) }).unwrap();
            assert!(handle.is_finished());
            let body = slot.borrow().clone().unwrap().unwrap().body;
            assert_eq!(body, Some(json!("now")));
        }
    }

    // =========================================================================
    // Verification
    // =========================================================================

    mod verify_tests {
        use super::*;

        #[test]
        fn test_pending_reported() {
            let ctx = TestContext::new();
            let backend = MockBackend::new();
            let _pending = client(&ctx, &backend).get("/missing");
            let err = backend.verify_no_pending_requests().unwrap_err();
            assert_eq!(
                err.to_string(),
                "No response could be found for the following connection(s):\n-) GET on /missing"
            );
        }

        #[test]
        fn test_unused_and_overused() {
            let ctx = TestContext::new();
            let backend = MockBackend::new();
            let _ = backend.when(Method::Get, "/twice").unwrap();
            let _ = backend.when(Method::Delete, "/never").unwrap();
            let http = client(&ctx, &backend);
            let inspector = Inspector::new(&ctx);
            inspector.inspect_future(http.get("/twice")).unwrap();
            inspector.inspect_future(http.get("/twice")).unwrap();
            assert_eq!(backend.times_used(Method::Get, "/twice"), Some(2));

            let err = backend.verify_each_response_used_once().unwrap_err();
            assert_eq!(
                err.to_string(),
                "The following responses were not used:\n-) DELETE on /never\n\
                 The following responses were used more than once:\n-) GET on /twice fired 2 times"
            );
        }

        #[test]
        fn test_verify_all_joins_sections() {
            let ctx = TestContext::new();
            let backend = MockBackend::new();
            let _ = backend.when(Method::Get, "/unused").unwrap();
            let _pending = client(&ctx, &backend).get("/nobody");
            let err = backend.verify_all_interactions().unwrap_err();
            assert_eq!(
                err.to_string(),
                "No response could be found for the following connection(s):\n-) GET on /nobody\n\n\
                 The following responses were not used:\n-) GET on /unused"
            );
        }

        #[test]
        fn test_clean_run_verifies() {
            let ctx = TestContext::new();
            let backend = MockBackend::new();
            let _ = backend.when(Method::Get, "/once").unwrap().respond_with(json!([]));
            Inspector::new(&ctx).inspect_future(client(&ctx, &backend).get("/once")).unwrap();
            backend.verify_all_interactions().unwrap();
        }
    }

    // =========================================================================
    // Module
    // =========================================================================

    mod module_tests {
        use super::*;

        #[test]
        fn test_client_injected() {
            let ctx = TestContext::new();
            let backend = MockBackend::new();
            let _ = backend.when(Method::Get, "/i").unwrap().respond_with(json!(true));
            let _scope = ctx.activate();
            ctx.configure_test_module(ModuleConfig::new().imports(mock_backend_module(&backend)))
                .unwrap();
            let http: HttpClient = ctx.inject().unwrap();
            let response = ctx.run_synchronously(http.get("/i")).unwrap().unwrap();
            assert!(response.json::<bool>().unwrap());
            backend.verify_all_interactions().unwrap();
        }
    }
}
