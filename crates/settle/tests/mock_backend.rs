//! Mock backend scenarios run through the suite runner.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::{json, Value};
use settle::{
    describe, mock_backend_module, HttpClient, Method, MockBackend, ModuleConfig, SettleError,
    SettleResult, TestContext, TestRunner,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

const TEST_URL: &str = "/v1/some-resource";

fn resource() -> Value {
    json!({"name": "resource-name"})
}

fn setup(ctx: &TestContext) -> SettleResult<(MockBackend, HttpClient)> {
    let backend = MockBackend::new();
    ctx.configure_test_module(ModuleConfig::new().imports(mock_backend_module(&backend)))?;
    Ok((ctx.inject::<MockBackend>()?, ctx.inject::<HttpClient>()?))
}

fn verification_message(result: SettleResult<()>) -> String {
    match result {
        Err(SettleError::VerificationFailed { message }) => message,
        other => panic!("expected a verification failure, got {other:?}"),
    }
}

#[test]
fn fulfills_matching_request() {
    let suite = describe("Mock backend", |s| {
        s.it("fulfills a request when URL and method match", |ctx| {
            let (backend, http) = setup(ctx)?;
            let _ = backend.when(Method::Get, TEST_URL)?.with_status(200).respond_with(resource());
            let response = ctx.run_synchronously(http.get(TEST_URL))?.expect("mock response");
            assert_eq!(response.status, 200);
            assert!(response.ok());
            assert_eq!(response.body, Some(resource()));
            backend.verify_no_pending_requests()?;
            backend.verify_each_response_used_once()
        });
    })
    .unwrap();
    let results = TestRunner::new().run(&suite);
    assert!(results.all_passed(), "{:?}", results.failures());
}

#[test]
fn failure_and_duplicate_pairs() {
    let suite = describe("Mock backend", |s| {
        s.it("returns an error", |ctx| {
            let (backend, http) = setup(ctx)?;
            let _ = backend.when(Method::Get, TEST_URL)?.fail_with("severe_error");
            let err = ctx.run_synchronously(http.get(TEST_URL))?.unwrap_err();
            assert!(err.to_string().contains("severe_error"));
            backend.verify_all_interactions()
        });
        s.it("only accepts one response per pair", |ctx| -> SettleResult<()> {
            let (backend, _http) = setup(ctx)?;
            let _ = backend.when(Method::Get, TEST_URL)?.respond_with(json!({}));
            let err = backend.when(Method::Get, TEST_URL).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Already defined a response for GET on /v1/some-resource"
            );
            let _ = backend.when(Method::Get, format!("{TEST_URL}/v2"))?;
            let _ = backend.when(Method::Post, TEST_URL)?;
            Ok(())
        });
    })
    .unwrap();
    let results = TestRunner::new().run(&suite);
    assert!(results.all_passed(), "{:?}", results.failures());
}

#[test]
fn get_used_twice_is_reported() {
    let seen = Rc::new(RefCell::new(String::new()));
    let sink = Rc::clone(&seen);
    let suite = describe("verify_each_response_used_once", move |s| {
        s.it("fails a test if a response is used more than once", move |ctx| -> SettleResult<()> {
            let (backend, http) = setup(ctx)?;
            let _ = backend.when(Method::Get, TEST_URL)?.respond_with(resource());
            let _first = http.get(TEST_URL);
            let _second = http.get(TEST_URL);
            ctx.flush_pending_work()?;
            *sink.borrow_mut() = verification_message(backend.verify_each_response_used_once());
            Ok(())
        });
    })
    .unwrap();
    assert!(TestRunner::new().run(&suite).all_passed());

    let message = seen.borrow();
    assert!(message.contains("The following responses were used more than once"));
    assert!(message.contains(TEST_URL));
    assert!(message.contains("fired 2 time"));
}

#[test]
fn evaluates_request_body_and_reports_pending() {
    let evaluated = Rc::new(Cell::new(false));
    let flag = Rc::clone(&evaluated);
    let suite = describe("Mock backend", move |s| {
        s.it("enables inspecting the request", move |ctx| -> SettleResult<()> {
            let (backend, http) = setup(ctx)?;
            let flag = Rc::clone(&flag);
            let _ = backend
                .when(Method::Post, TEST_URL)?
                .evaluate_request(move |body, _headers, _request| {
                    assert_eq!(body, &resource());
                    flag.set(true);
                })
                .respond_with(json!({}));
            let _response = http.post(TEST_URL, resource());
            ctx.flush_pending_work()?;
            Ok(())
        });
        s.it("fails verification while requests are pending", |ctx| -> SettleResult<()> {
            let (backend, http) = setup(ctx)?;
            let _response = http.get(TEST_URL);
            ctx.flush_pending_work()?;
            let message = verification_message(backend.verify_no_pending_requests());
            assert!(message.contains("No response could be found for"));
            assert!(message.contains(TEST_URL));
            let all = verification_message(backend.verify_all_interactions());
            assert_eq!(all, message);
            Ok(())
        });
    })
    .unwrap();
    let results = TestRunner::new().run(&suite);
    assert!(results.all_passed(), "{:?}", results.failures());
    assert!(evaluated.get());
}
