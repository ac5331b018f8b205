//! Catch-and-retry wrappers.
//!
//! The wrapper catches `BodyExc` and calls a retry stage from the closing
//! phase. The retry stage's outcome becomes the wrapper's, whether the body
//! ran locally or on a pool thread.

use super::common::*;
use crate::{Chain, Failure, StageResult};

// ============================================================================
// Wrappers
// ============================================================================

fn catch_ret_ret(
    plan: &Plan,
    body: Result<String, Failure>,
    chain: &mut Chain,
) -> StageResult<String> {
    match body {
        Err(failure) if failure.is::<BodyExc>() => {
            plan.redirect(chain)?;
            chain.call(RetryStage {
                fails: plan.retry_fails,
            })
        }
        body => Ok(body?),
    }
}

fn catch_void_ret(
    plan: &Plan,
    body: Result<String, Failure>,
    chain: &mut Chain,
) -> StageResult<()> {
    match body {
        Err(failure) if failure.is::<BodyExc>() => {
            plan.redirect(chain)?;
            chain.call(VoidRetryStage {
                fails: plan.retry_fails,
            })
        }
        body => {
            body?;
            Ok(())
        }
    }
}

fn catch_ret_void(
    plan: &Plan,
    body: Result<(), Failure>,
    chain: &mut Chain,
) -> StageResult<String> {
    match body {
        Err(failure) if failure.is::<BodyExc>() => {
            plan.redirect(chain)?;
            chain.call(RetryStage {
                fails: plan.retry_fails,
            })
        }
        body => {
            body?;
            Ok("Invoke value".to_string())
        }
    }
}

fn catch_void_void(plan: &Plan, body: Result<(), Failure>, chain: &mut Chain) -> StageResult<()> {
    match body {
        Err(failure) if failure.is::<BodyExc>() => {
            plan.redirect(chain)?;
            chain.call(VoidRetryStage {
                fails: plan.retry_fails,
            })
        }
        body => Ok(body?),
    }
}

/// Expected outcome of a catch wrapper whose success value is `ok` and whose
/// retry returns `retried`.
fn expected(plan: &Plan, ok: Expect, retried: Expect) -> Expect {
    match (plan.body_fails, plan.retry_fails) {
        (true, true) => Expect::Retry,
        (true, false) => retried,
        (false, _) => ok,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn catch_ret_ret_uses_retry_value() {
    for plan in Plan::all() {
        let expect = expected(&plan, Expect::Value("Body value"), Expect::Value("Retry value"));
        let case = plan.describe();
        let (outcome, log) = run_probe(Probe {
            plan,
            body: ret_body,
            wrap: catch_ret_ret,
        })
        .await;
        assert_outcome(outcome, expect, &case);
        assert!(log.lines().is_empty(), "{case}: {:?}", log.lines());
    }
}

#[tokio::test]
async fn catch_void_ret_discards_values() {
    for plan in Plan::all() {
        let expect = expected(&plan, Expect::Void, Expect::Void);
        let case = plan.describe();
        let (outcome, _) = run_probe(Probe {
            plan,
            body: ret_body,
            wrap: catch_void_ret,
        })
        .await;
        assert_outcome(outcome, expect, &case);
    }
}

#[tokio::test]
async fn catch_ret_void_recovers_with_a_value() {
    for plan in Plan::all() {
        let expect = expected(&plan, Expect::Value("Invoke value"), Expect::Value("Retry value"));
        let case = plan.describe();
        let (outcome, _) = run_probe(Probe {
            plan,
            body: void_body,
            wrap: catch_ret_void,
        })
        .await;
        assert_outcome(outcome, expect, &case);
    }
}

#[tokio::test]
async fn catch_void_void_keeps_only_failures() {
    for plan in Plan::all() {
        let expect = expected(&plan, Expect::Void, Expect::Void);
        let case = plan.describe();
        let (outcome, _) = run_probe(Probe {
            plan,
            body: void_body,
            wrap: catch_void_void,
        })
        .await;
        assert_outcome(outcome, expect, &case);
    }
}

#[tokio::test]
async fn unmatched_failures_are_rethrown() {
    fn catch_retry_only(
        plan: &Plan,
        body: Result<String, Failure>,
        chain: &mut Chain,
    ) -> StageResult<String> {
        match body {
            Err(failure) if failure.is::<RetryExc>() => chain.call(RetryStage {
                fails: plan.retry_fails,
            }),
            body => Ok(body?),
        }
    }

    for plan in [Plan::new(true, false), Plan::new(true, false).pooled()] {
        let case = plan.describe();
        let (outcome, _) = run_probe(Probe {
            plan,
            body: ret_body,
            wrap: catch_retry_only,
        })
        .await;
        assert_outcome(outcome, Expect::Body, &case);
    }
}
