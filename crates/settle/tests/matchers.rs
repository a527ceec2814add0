//! Stream and future matchers against virtual time.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::stream::{self, Stream};
use settle::{describe, expect_future, expect_stream, Scheduler, SettleResult, TestContext, TestRunner};

fn values(items: Vec<i32>) -> impl Stream<Item = Result<i32, String>> {
    stream::iter(items.into_iter().map(Ok))
}

fn delayed(ctx: &TestContext, ms: u64, value: &'static str) -> impl Stream<Item = Result<&'static str, String>> {
    let sleep = ctx.scheduler().sleep(ms);
    stream::once(async move {
        sleep.await;
        Ok(value)
    })
}

#[test]
fn emits_single_value() {
    let ctx = TestContext::new();
    let result = expect_stream(&ctx, values(vec![1])).to_emit(1).unwrap();
    assert!(result.pass);
    assert_eq!(result.message, "Expected not to emit value: \n\n1\n\n but emitted: \n\n1\n\n\n");

    let mismatch = expect_stream(&ctx, values(vec![2])).to_emit(1).unwrap();
    assert!(!mismatch.pass);
    assert!(mismatch.message.starts_with("Expected to emit value: \n\n1\n\n but emitted: \n\n2\n\n"));
}

#[test]
fn zero_and_two_emissions_fail_differently() {
    let ctx = TestContext::new();
    let none = expect_stream(&ctx, values(vec![])).to_emit(1).unwrap();
    let two = expect_stream(&ctx, values(vec![1, 1])).to_emit(1).unwrap();
    assert!(!none.pass);
    assert!(!two.pass);
    assert_eq!(
        none.message,
        "Expected observable to emit one value, but got 0 values instead: \"\n\n[  ]\n\n\""
    );
    assert_eq!(
        two.message,
        "Expected observable to emit one value, but got 2 values instead: \"\n\n[ 1, 1 ]\n\n\""
    );
    assert_ne!(none.message, two.message);
}

#[test]
fn immediate_sees_only_undelayed_values() {
    let ctx = TestContext::new();
    let immediate = expect_stream(&ctx, delayed(&ctx, 100, "later"))
        .to_emit_immediately("later")
        .unwrap();
    assert!(!immediate.pass);
    assert!(immediate.message.contains("but got 0 values instead"));

    let awaited = expect_stream(&ctx, delayed(&ctx, 100, "later")).to_emit("later").unwrap();
    assert!(awaited.pass);

    let now = expect_stream(&ctx, values(vec![5])).to_emit_immediately(5).unwrap();
    assert!(now.pass);
}

#[test]
fn sequences_and_errors() {
    let ctx = TestContext::new();
    expect_stream(&ctx, values(vec![1, 2, 3]))
        .to_emit_sequence(&[1, 2, 3])
        .unwrap()
        .assert();

    let failing = stream::iter(vec![Ok(1), Err("boom".to_string())]);
    expect_stream(&ctx, failing).to_emit_error("boom").unwrap().assert();

    let err = expect_stream(&ctx, stream::iter(vec![Err::<i32, _>("bad".to_string())]))
        .to_emit_immediately(1)
        .unwrap_err();
    assert!(err.to_string().contains("Expected not to throw error but did! Cause:"));

    let empty = expect_stream(&ctx, values(vec![])).to_have_never_emitted().unwrap();
    assert!(empty.pass);
    let emitted = expect_stream(&ctx, values(vec![4])).to_have_emitted().unwrap();
    assert!(emitted.pass);
}

#[test]
fn futures_resolve_reject_and_pend() {
    let ctx = TestContext::new();
    expect_future(&ctx, async { Ok::<_, String>(7) })
        .to_resolve_with(7)
        .unwrap()
        .assert();
    expect_future(&ctx, async { Err::<i32, _>("nope".to_string()) })
        .to_reject_with("nope")
        .unwrap()
        .assert();
    expect_future(&ctx, futures::future::pending::<Result<i32, String>>())
        .to_be_pending()
        .unwrap()
        .assert();
}

#[test]
fn matchers_inside_a_spec() {
    let suite = describe("matchers", |s| {
        s.it("waits for virtual time", |ctx| -> SettleResult<()> {
            let sleep = ctx.scheduler().sleep(1_000);
            let numbers = stream::once(async move {
                sleep.await;
                Ok::<_, String>(vec![1, 2])
            });
            expect_stream(ctx, numbers).to_emit(vec![1, 2])?.into_result()
        });
        s.it("reports a failed expectation", |ctx| -> SettleResult<()> {
            expect_stream(ctx, values(vec![3])).to_emit(4)?.into_result()
        });
    })
    .unwrap();
    let results = TestRunner::new().run(&suite);
    assert_eq!(results.passed_count(), 1);
    assert_eq!(results.failed_count(), 1);
    let failure = results.get("matchers > reports a failed expectation").unwrap();
    assert!(failure
        .error
        .as_deref()
        .unwrap()
        .starts_with("Assertion failed: Expected to emit value:"));
}
