//! Basic chain execution: direct returns, phases, failure classification.

use std::sync::Arc;

use parking_lot::Mutex;

use super::common::*;
use crate::{
    full_stage, simple_stage, Chain, ChainPhase, Failure, Interrupt, LocalRedirector,
    PoolRedirector, SimpleStage, StageKind, StagePanicked, StageResult, ThreadSpawner,
};

struct Add(u32, u32);

simple_stage!(Add => u32, |this, _chain| { Ok(this.0 + this.1) });

/// Adds twice through nested calls that return directly.
struct Accumulate;

full_stage!(Accumulate => u32 => u32,
    body |this, chain| {
        let partial = chain.call(Add(1, 2))?;
        chain.call(Add(partial, 3))
    },
    invoke |this, body, chain| { Ok(body? * 10) }
);

#[tokio::test]
async fn first_stage_value_reaches_the_listener() {
    let (outcome, log) = run_chain(|chain| chain.call(Add(2, 3)).map(|_| ())).await;
    match outcome {
        Ok(returned) => assert_eq!(returned.downcast::<u32>(), Ok(5)),
        other => panic!("Expected value, got {:?}", other),
    }
    assert!(log.lines().is_empty());
}

#[tokio::test]
async fn local_calls_return_values_directly() {
    let (outcome, _) = run_chain(|chain| chain.call(Accumulate).map(|_| ())).await;
    match outcome {
        Ok(returned) => assert_eq!(returned.downcast::<u32>(), Ok(60)),
        other => panic!("Expected value, got {:?}", other),
    }
    let shape = crate::registry::registered::<Accumulate>().expect("shape cached");
    assert_eq!(shape.kind, StageKind::Full);
    assert!(shape.fast_path);
}

#[tokio::test]
async fn listener_sees_only_the_failure() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    Chain::start(
        |chain| chain.call(BodyStage { fails: true }).map(|_| ()),
        move |failure| {
            let _ = tx.send(failure);
        },
        Arc::new(Recorder::default()),
    );
    let failure = rx.await.unwrap().expect("expected a failure");
    assert!(failure.is::<BodyExc>());

    let (tx, rx) = tokio::sync::oneshot::channel();
    Chain::start(
        |chain| chain.call(BodyStage { fails: false }).map(|_| ()),
        move |failure| {
            let _ = tx.send(failure);
        },
        Arc::new(Recorder::default()),
    );
    assert!(rx.await.unwrap().is_none());
}

#[tokio::test]
async fn start_failures_are_undeclared() {
    let (outcome, _) = run_chain(|_chain| Err(Interrupt::declared(BodyExc))).await;
    match outcome {
        Err(failure) => {
            assert!(!failure.is::<BodyExc>());
            assert!(failure.unexpected_cause().is_some());
        }
        other => panic!("Expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn empty_chain_completes_void() {
    let (outcome, _) = run_chain(|_chain| Ok(())).await;
    assert!(matches!(outcome, Ok(crate::Returned::Void)));
}

struct Boom;

impl SimpleStage for Boom {
    type Output = ();

    fn invoke(&self, _chain: &mut Chain) -> StageResult<()> {
        panic!("stage exploded");
    }
}

#[tokio::test]
async fn panicking_stages_become_unexpected_failures() {
    let (outcome, _) = run_chain(|chain| chain.call(Boom)).await;
    match outcome {
        Err(Failure::Unexpected(cause)) => {
            let panicked = cause
                .downcast_ref::<StagePanicked>()
                .expect("not a panic");
            assert_eq!(panicked.0, "stage exploded");
        }
        other => panic!("Expected panic failure, got {:?}", other),
    }
}

// ============================================================================
// Phases
// ============================================================================

struct Phases(Arc<Mutex<Vec<Option<ChainPhase>>>>);

full_stage!(Phases => () => (),
    body |this, chain| {
        this.0.lock().push(chain.phase());
        Ok(())
    },
    invoke |this, body, chain| {
        this.0.lock().push(chain.phase());
        Ok(body?)
    }
);

#[tokio::test]
async fn phases_follow_the_run() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let stage = Phases(Arc::clone(&seen));
    let probe = Arc::clone(&seen);
    let (outcome, _) = run_chain(move |chain| {
        probe.lock().push(chain.phase());
        chain.call(stage)
    })
    .await;
    assert!(outcome.is_ok());
    assert_eq!(
        *seen.lock(),
        vec![
            Some(ChainPhase::Starting),
            Some(ChainPhase::Running),
            Some(ChainPhase::Closing),
        ]
    );
}

// ============================================================================
// Redirect helpers
// ============================================================================

#[tokio::test]
async fn redirect_and_return_hands_back_the_value() {
    let pool = PoolRedirector::on(Arc::new(ThreadSpawner::default()));
    let (outcome, _) = run_chain(move |chain| {
        chain.redirect_and_return(&pool, "moved".to_string()).map(|_| ())
    })
    .await;
    match outcome {
        Ok(returned) => assert_eq!(returned.downcast::<String>(), Ok("moved".to_string())),
        other => panic!("Expected value, got {:?}", other),
    }
}

#[tokio::test]
async fn redirect_and_close_completes_void() {
    let (outcome, _) = run_chain(|chain| chain.redirect_and_close(&LocalRedirector)).await;
    assert!(matches!(outcome, Ok(crate::Returned::Void)));
}

#[tokio::test]
async fn chain_ids_are_unique() {
    let log = Arc::new(Recorder::default());
    let a = Chain::start(|_| Ok(()), |_| {}, log.clone());
    let b = Chain::start(|_| Ok(()), |_| {}, log);
    assert_ne!(a, b);
    assert_ne!(a.to_string(), b.to_string());
}

// ============================================================================
// Swallowed signals
// ============================================================================

/// Calls a pooled stage, then ignores the redirect and returns a value.
struct Swallow;

impl SimpleStage for Swallow {
    type Output = String;

    fn invoke(&self, chain: &mut Chain) -> StageResult<String> {
        let pool = PoolRedirector::on(Arc::new(ThreadSpawner::default()));
        chain.set_redirector(&pool)?;
        let _ = chain.call(BodyStage { fails: false });
        Ok("swallowed".to_string())
    }
}

struct Outer;

full_stage!(Outer => String => String,
    body |this, chain| { chain.call(Swallow) },
    invoke |this, body, chain| { Ok(body?) }
);

#[tokio::test]
async fn swallowed_redirects_are_logged_and_unwound() {
    let (outcome, log) = run_chain(|chain| chain.call(Outer).map(|_| ())).await;
    assert_outcome(outcome, Expect::Value("Body value"), "swallowed");
    let lines = log.wait_for(1).await;
    assert_eq!(lines.len(), 1, "{lines:?}");
    assert!(lines[0].starts_with("Unexpected error in Chain execution"));
    assert!(lines[0].contains("swallowed"));
}
