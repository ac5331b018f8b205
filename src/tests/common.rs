//! Common stages, errors and helpers for tests.
//!
//! This module contains:
//! - `BodyExc` / `RetryExc`: declared failures of the probe stages
//! - `BodyStage` / `RetryStage` and their void twins
//! - `Probe`: a full stage parameterized by body type, output type and wrapper
//! - `Plan`: which cases fail and whether the body is redirected to a pool
//! - `run_chain`: start a chain and wait for its outcome

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::{
    Chain, Executor, Failure, FullStage, LogSink, Outcome, PatternViolation, PoolRedirector,
    Returned, SimpleStage, StageResult, ThreadSpawner,
};

// ============================================================================
// Error Types
// ============================================================================

/// Declared failure of the body stages.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("BodyExc")]
pub struct BodyExc;

/// Declared failure of the retry stages.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("RetryExc")]
pub struct RetryExc;

// ============================================================================
// Log Sink
// ============================================================================

/// Collects every spurious failure line.
#[derive(Default)]
pub struct Recorder {
    lines: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Wait until at least `count` lines arrived; the logging task may still
    /// be unwinding when the outcome is delivered.
    pub async fn wait_for(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            let lines = self.lines();
            if lines.len() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.lines()
    }
}

impl LogSink for Recorder {
    fn error(&self, message: &str, cause: &Failure) {
        self.lines.lock().push(format!("{message}: {cause}"));
    }
}

// ============================================================================
// Plans
// ============================================================================

/// Which stages fail and where the body runs.
#[derive(Clone)]
pub struct Plan {
    pub body_fails: bool,
    pub retry_fails: bool,
    pub pool: Option<Arc<dyn Executor>>,
}

impl Plan {
    pub fn new(body_fails: bool, retry_fails: bool) -> Self {
        Self {
            body_fails,
            retry_fails,
            pool: None,
        }
    }

    pub fn pooled(mut self) -> Self {
        self.pool = Some(Arc::new(ThreadSpawner::new("test-pool")));
        self
    }

    /// All four failure combinations, locally and on a pool.
    pub fn all() -> Vec<Plan> {
        let mut plans = Vec::new();
        for body_fails in [true, false] {
            for retry_fails in [true, false] {
                plans.push(Plan::new(body_fails, retry_fails));
                plans.push(Plan::new(body_fails, retry_fails).pooled());
            }
        }
        plans
    }

    pub fn redirect(&self, chain: &mut Chain) -> Result<(), PatternViolation> {
        if let Some(pool) = &self.pool {
            chain.set_redirector(&PoolRedirector::on(Arc::clone(pool)))?;
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "body {} / retry {}{}",
            if self.body_fails { "exc" } else { "value" },
            if self.retry_fails { "exc" } else { "value" },
            if self.pool.is_some() { " (pool)" } else { "" },
        )
    }
}

// ============================================================================
// Leaf Stages
// ============================================================================

pub struct BodyStage {
    pub fails: bool,
}

impl SimpleStage for BodyStage {
    type Output = String;

    fn invoke(&self, _chain: &mut Chain) -> StageResult<String> {
        if self.fails {
            return Err(crate::Interrupt::declared(BodyExc));
        }
        Ok("Body value".to_string())
    }
}

pub struct VoidBodyStage {
    pub fails: bool,
}

impl SimpleStage for VoidBodyStage {
    type Output = ();

    fn invoke(&self, _chain: &mut Chain) -> StageResult<()> {
        if self.fails {
            return Err(crate::Interrupt::declared(BodyExc));
        }
        Ok(())
    }
}

pub struct RetryStage {
    pub fails: bool,
}

impl SimpleStage for RetryStage {
    type Output = String;

    fn invoke(&self, _chain: &mut Chain) -> StageResult<String> {
        if self.fails {
            return Err(crate::Interrupt::declared(RetryExc));
        }
        Ok("Retry value".to_string())
    }
}

pub struct VoidRetryStage {
    pub fails: bool,
}

impl SimpleStage for VoidRetryStage {
    type Output = ();

    fn invoke(&self, _chain: &mut Chain) -> StageResult<()> {
        if self.fails {
            return Err(crate::Interrupt::declared(RetryExc));
        }
        Ok(())
    }
}

// ============================================================================
// Probe
// ============================================================================

pub type BodyFn<B> = fn(&Plan, &mut Chain) -> StageResult<B>;
pub type WrapFn<B, O> = fn(&Plan, Result<B, Failure>, &mut Chain) -> StageResult<O>;

/// Full stage whose body and wrapper are chosen per test case.
pub struct Probe<B, O> {
    pub plan: Plan,
    pub body: BodyFn<B>,
    pub wrap: WrapFn<B, O>,
}

impl<B: Send + 'static, O: Send + 'static> FullStage for Probe<B, O> {
    type Body = B;
    type Output = O;

    fn body(&self, chain: &mut Chain) -> StageResult<B> {
        (self.body)(&self.plan, chain)
    }

    fn invoke(&self, body: Result<B, Failure>, chain: &mut Chain) -> StageResult<O> {
        (self.wrap)(&self.plan, body, chain)
    }
}

/// Body returning `"Body value"` or failing with `BodyExc`.
pub fn ret_body(plan: &Plan, chain: &mut Chain) -> StageResult<String> {
    plan.redirect(chain)?;
    chain.call(BodyStage {
        fails: plan.body_fails,
    })
}

/// Void body failing with `BodyExc` when planned.
pub fn void_body(plan: &Plan, chain: &mut Chain) -> StageResult<()> {
    plan.redirect(chain)?;
    chain.call(VoidBodyStage {
        fails: plan.body_fails,
    })
}

// ============================================================================
// Expectations
// ============================================================================

/// Expected final outcome of a chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expect {
    Value(&'static str),
    Void,
    Body,
    Retry,
    NonVoidFinally,
}

pub fn assert_outcome(outcome: Outcome, expect: Expect, case: &str) {
    match (outcome, expect) {
        (Ok(Returned::Value(value)), Expect::Value(expected)) => {
            let value = value.downcast::<String>().expect("value is not a String");
            assert_eq!(*value, expected, "{case}");
        }
        (Ok(Returned::Void), Expect::Void) => {}
        (Err(failure), Expect::Body) if failure.is::<BodyExc>() => {}
        (Err(failure), Expect::Retry) if failure.is::<RetryExc>() => {}
        (
            Err(Failure::Pattern(PatternViolation::NonVoidFinally { .. })),
            Expect::NonVoidFinally,
        ) => {}
        (other, expect) => panic!("{case}: expected {:?}, got {:?}", expect, other),
    }
}

// ============================================================================
// Running
// ============================================================================

/// Start a chain and wait for the outcome its terminal callback receives.
pub async fn run_chain<F>(first: F) -> (Outcome, Arc<Recorder>)
where
    F: FnOnce(&mut Chain) -> StageResult<()>,
{
    let (outcome, log, _) = run_chain_counted(first).await;
    (outcome, log)
}

/// Like [`run_chain`], also counting how often the terminal callback ran.
pub async fn run_chain_counted<F>(first: F) -> (Outcome, Arc<Recorder>, Arc<AtomicUsize>)
where
    F: FnOnce(&mut Chain) -> StageResult<()>,
{
    let log = Arc::new(Recorder::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let (tx, rx) = tokio::sync::oneshot::channel();
    Chain::start_with_outcome(
        first,
        move |outcome| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(outcome).expect("outcome receiver dropped");
        },
        log.clone(),
    );
    let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("chain did not terminate in time")
        .expect("terminal callback dropped");
    (outcome, log, calls)
}

/// Run `probe` as the only stage of a chain.
pub async fn run_probe<B, O>(probe: Probe<B, O>) -> (Outcome, Arc<Recorder>)
where
    B: Send + 'static,
    O: Send + 'static,
{
    run_chain(move |chain| chain.call(probe).map(|_| ())).await
}
