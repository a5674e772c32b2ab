//! Tests for StateMachineEngine
//!
//! Covers the transition contract of a single replica (legal edges, stale
//! requests, failure handling and reset) and the concurrency guarantees across
//! replicas.

use async_trait::async_trait;
use corral_core::{ReplicaId, StateModelDefinition};
use futures::future::{join_all, BoxFuture};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    HandlerError, HandlerFuture, LogTransition, ReplicaState, StateMachineEngine,
    TransitionContext, TransitionError, TransitionHandler, TransitionRequest, TransitionTable,
};

#[derive(Debug, Clone, Default)]
struct Counters {
    rollbacks: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

/// Per-replica model holding a fake external resource.
struct TestModel {
    counters: Counters,
    holding: bool,
}

fn acquire<'a>(model: &'a mut TestModel, _ctx: &'a TransitionContext) -> HandlerFuture<'a> {
    Box::pin(async move {
        model.holding = true;
        Ok(())
    })
}

fn release<'a>(model: &'a mut TestModel, _ctx: &'a TransitionContext) -> HandlerFuture<'a> {
    Box::pin(async move {
        if model.holding {
            model.holding = false;
            model.counters.released.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    })
}

fn fail<'a>(model: &'a mut TestModel, ctx: &'a TransitionContext) -> HandlerFuture<'a> {
    Box::pin(async move {
        model.holding = true;
        let err: HandlerError = format!("cannot reach {}", ctx.to).into();
        Err(err)
    })
}

fn count_rollback<'a>(
    model: &'a mut TestModel,
    _ctx: &'a TransitionContext,
    _error: &'a TransitionError,
) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        model.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
    })
}

fn release_on_reset<'a>(model: &'a mut TestModel, _replica: &'a ReplicaId) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        if model.holding {
            model.holding = false;
            model.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    })
}

/// Handler that records how many transitions run at the same time.
struct Track;

#[async_trait]
impl TransitionHandler<TestModel> for Track {
    async fn on_transition(
        &self,
        model: &mut TestModel,
        _ctx: &TransitionContext,
    ) -> Result<(), HandlerError> {
        let now = model.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        model.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        model.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Explode;

#[async_trait]
impl TransitionHandler<TestModel> for Explode {
    async fn on_transition(
        &self,
        _model: &mut TestModel,
        _ctx: &TransitionContext,
    ) -> Result<(), HandlerError> {
        panic!("handler blew up")
    }
}

fn engine_with(
    promote: impl TransitionHandler<TestModel> + 'static,
    counters: &Counters,
) -> StateMachineEngine<TestModel> {
    let table = TransitionTable::builder(&StateModelDefinition::leader_standby())
        .transition("OFFLINE", "STANDBY", acquire)
        .transition("STANDBY", "LEADER", promote)
        .transition("LEADER", "STANDBY", LogTransition)
        .transition("LEADER", "LEADER", Track)
        .transition("STANDBY", "OFFLINE", release)
        .transition("OFFLINE", "DROPPED", LogTransition)
        .recovery("OFFLINE", release)
        .on_rollback(count_rollback)
        .on_reset(release_on_reset)
        .build()
        .unwrap();

    let counters = counters.clone();
    StateMachineEngine::new(table, move |_replica: &ReplicaId| TestModel {
        counters: counters.clone(),
        holding: false,
    })
}

fn replica(partition: &str) -> ReplicaId {
    ReplicaId::new("orders", partition, "node-1")
}

async fn promote(engine: &StateMachineEngine<TestModel>, replica: &ReplicaId) {
    engine
        .apply(TransitionRequest::new(replica.clone(), "OFFLINE", "STANDBY"))
        .await
        .unwrap();
    engine
        .apply(TransitionRequest::new(replica.clone(), "STANDBY", "LEADER"))
        .await
        .unwrap();
}

/// **Test:** Declared Edges Are Applied
///
/// **Reason:** The basic contract: a request along a declared edge runs the
/// handler and moves the replica.
///
/// **Expectation:** A fresh replica starts in OFFLINE, OFFLINE -> STANDBY -> LEADER
/// succeeds and each call returns the new state.
#[tokio::test]
async fn test_declared_transitions_are_applied() {
    let counters = Counters::default();
    let engine = engine_with(LogTransition, &counters);
    let r = replica("orders_0");

    assert_eq!(engine.current_state(&r).await, None);

    let state = engine
        .apply(TransitionRequest::new(r.clone(), "OFFLINE", "STANDBY"))
        .await
        .unwrap();
    assert_eq!(state, "STANDBY");
    assert_eq!(
        engine.current_state(&r).await,
        Some(ReplicaState::declared("STANDBY"))
    );

    let state = engine
        .apply(TransitionRequest::to(r.clone(), "LEADER"))
        .await
        .unwrap();
    assert_eq!(state, "LEADER");
    assert_eq!(engine.replica_count(), 1);
}

/// **Test:** Illegal Transitions Leave The Replica Untouched
///
/// **Reason:** Only declared edges may run. Skipping a state or looping on a
/// state without a declared self-edge must be refused without side effects.
///
/// **Expectation:** OFFLINE -> LEADER and STANDBY -> STANDBY fail with
/// IllegalTransition and the state is unchanged; LEADER -> LEADER (declared)
/// succeeds.
#[tokio::test]
async fn test_illegal_transition_is_rejected() {
    let counters = Counters::default();
    let engine = engine_with(LogTransition, &counters);
    let r = replica("orders_0");

    let err = engine
        .apply(TransitionRequest::new(r.clone(), "OFFLINE", "LEADER"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TransitionError::IllegalTransition {
            replica: r.clone(),
            from: ReplicaState::declared("OFFLINE"),
            to: "LEADER".into(),
        }
    );
    assert_eq!(
        engine.current_state(&r).await,
        Some(ReplicaState::declared("OFFLINE"))
    );

    engine
        .apply(TransitionRequest::new(r.clone(), "OFFLINE", "STANDBY"))
        .await
        .unwrap();
    let err = engine
        .apply(TransitionRequest::to(r.clone(), "STANDBY"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::IllegalTransition { .. }));
    assert_eq!(
        engine.current_state(&r).await,
        Some(ReplicaState::declared("STANDBY"))
    );

    engine
        .apply(TransitionRequest::to(r.clone(), "LEADER"))
        .await
        .unwrap();
    let state = engine
        .apply(TransitionRequest::new(r.clone(), "LEADER", "LEADER"))
        .await
        .unwrap();
    assert_eq!(state, "LEADER");
}

/// **Test:** Stale Requests
///
/// **Reason:** A request computed against an old view of the replica must not be
/// applied to whatever state the replica has moved to since.
///
/// **Expectation:** Asking for STANDBY -> LEADER while the replica is OFFLINE
/// fails with StaleRequest and runs nothing.
#[tokio::test]
async fn test_stale_request_is_rejected() {
    let counters = Counters::default();
    let engine = engine_with(LogTransition, &counters);
    let r = replica("orders_0");

    let err = engine
        .apply(TransitionRequest::new(r.clone(), "STANDBY", "LEADER"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TransitionError::StaleRequest {
            replica: r.clone(),
            expected: "STANDBY".into(),
            current: ReplicaState::declared("OFFLINE"),
        }
    );
    assert_eq!(
        engine.current_state(&r).await,
        Some(ReplicaState::declared("OFFLINE"))
    );
}

/// **Test:** Handler Failure Rolls Back Into ERROR
///
/// **Reason:** A failing handler may have left partial side effects. The engine
/// must run the rollback hook, park the replica in ERROR, and let reset release
/// whatever the replica still holds.
///
/// **Expectation:** The failure is reported as HandlerFailure, rollback runs once,
/// the replica is in ERROR and refuses ordinary edges; reset brings it back to
/// OFFLINE and releases the resource exactly once even when called twice.
#[tokio::test]
async fn test_handler_failure_enters_error_and_reset_recovers() {
    let counters = Counters::default();
    let engine = engine_with(fail, &counters);
    let r = replica("orders_0");

    engine
        .apply(TransitionRequest::new(r.clone(), "OFFLINE", "STANDBY"))
        .await
        .unwrap();
    let err = engine
        .apply(TransitionRequest::new(r.clone(), "STANDBY", "LEADER"))
        .await
        .unwrap_err();

    match err {
        TransitionError::HandlerFailure {
            from, to, reason, ..
        } => {
            assert_eq!(from, "STANDBY");
            assert_eq!(to, "LEADER");
            assert_eq!(reason, "cannot reach LEADER");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(engine.current_state(&r).await, Some(ReplicaState::Error));

    let err = engine
        .apply(TransitionRequest::to(r.clone(), "STANDBY"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::IllegalTransition { .. }));

    assert_eq!(engine.reset(&r).await, "OFFLINE");
    assert_eq!(
        engine.current_state(&r).await,
        Some(ReplicaState::declared("OFFLINE"))
    );
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);

    engine.reset(&r).await;
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
}

/// **Test:** Recovery Edge Out Of ERROR
///
/// **Reason:** State models may declare explicit recovery edges from ERROR in
/// addition to reset.
///
/// **Expectation:** ERROR -> OFFLINE runs the recovery handler and the replica
/// leaves ERROR.
#[tokio::test]
async fn test_recovery_edge_leaves_error() {
    let counters = Counters::default();
    let engine = engine_with(fail, &counters);
    let r = replica("orders_1");

    engine
        .apply(TransitionRequest::to(r.clone(), "STANDBY"))
        .await
        .unwrap();
    assert!(engine
        .apply(TransitionRequest::to(r.clone(), "LEADER"))
        .await
        .is_err());

    let state = engine
        .apply(TransitionRequest::new(r.clone(), "ERROR", "OFFLINE"))
        .await
        .unwrap();
    assert_eq!(state, "OFFLINE");
    assert_eq!(counters.released.load(Ordering::SeqCst), 1);
}

/// **Test:** Panicking Handler Is Contained
///
/// **Reason:** A panic inside a handler must not take down the engine or poison
/// the replica's slot.
///
/// **Expectation:** The panic surfaces as HandlerFailure, rollback runs, the
/// replica is in ERROR and can be reset and used again.
#[tokio::test]
async fn test_panicking_handler_is_contained() {
    let counters = Counters::default();
    let engine = engine_with(Explode, &counters);
    let r = replica("orders_2");

    engine
        .apply(TransitionRequest::to(r.clone(), "STANDBY"))
        .await
        .unwrap();
    let err = engine
        .apply(TransitionRequest::to(r.clone(), "LEADER"))
        .await
        .unwrap_err();

    match err {
        TransitionError::HandlerFailure { reason, .. } => {
            assert!(reason.contains("handler blew up"), "reason: {reason}")
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(counters.rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(engine.current_state(&r).await, Some(ReplicaState::Error));

    engine.reset(&r).await;
    let state = engine
        .apply(TransitionRequest::new(r.clone(), "OFFLINE", "STANDBY"))
        .await
        .unwrap();
    assert_eq!(state, "STANDBY");
}

/// **Test:** Reset Of An Unknown Replica
///
/// **Reason:** Reset is called by cleanup paths that may run before the replica
/// ever transitioned.
///
/// **Expectation:** Returns the initial state, creates nothing and calls no hook.
#[tokio::test]
async fn test_reset_unknown_replica_is_noop() {
    let counters = Counters::default();
    let engine = engine_with(LogTransition, &counters);

    assert_eq!(engine.reset(&replica("orders_9")).await, "OFFLINE");
    assert_eq!(engine.replica_count(), 0);
    assert_eq!(counters.released.load(Ordering::SeqCst), 0);
}

/// **Test:** Per-Replica Serialization
///
/// **Reason:** Two transitions on the same replica must never overlap, otherwise
/// handlers would race on the replica's resources.
///
/// **Expectation:** Five concurrent LEADER -> LEADER requests on one replica all
/// succeed and never more than one handler runs at a time.
#[tokio::test]
async fn test_transitions_on_one_replica_are_serialized() {
    let counters = Counters::default();
    let engine = engine_with(LogTransition, &counters);
    let r = replica("orders_0");
    promote(&engine, &r).await;

    let requests = (0..5).map(|_| engine.apply(TransitionRequest::new(r.clone(), "LEADER", "LEADER")));
    let results = join_all(requests).await;

    assert!(results.iter().all(|res| res.is_ok()));
    assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);
}

/// **Test:** Replicas Transition Independently
///
/// **Reason:** Serialization is per replica; distinct replicas must not wait on
/// each other.
///
/// **Expectation:** Concurrent self-loops on four replicas overlap.
#[tokio::test]
async fn test_distinct_replicas_transition_concurrently() {
    let counters = Counters::default();
    let engine = engine_with(LogTransition, &counters);
    let replicas: Vec<ReplicaId> = (0..4).map(|i| replica(&format!("orders_{i}"))).collect();
    for r in &replicas {
        promote(&engine, r).await;
    }

    let requests = replicas
        .iter()
        .map(|r| engine.apply(TransitionRequest::to(r.clone(), "LEADER")));
    let results = join_all(requests).await;

    assert!(results.iter().all(|res| res.is_ok()));
    assert!(counters.max_in_flight.load(Ordering::SeqCst) >= 2);
}

/// **Test:** Snapshot And Forget
///
/// **Reason:** The participant runtime publishes the engine snapshot as its
/// current state and drops replicas once they are DROPPED.
///
/// **Expectation:** The snapshot lists every known replica with its state in
/// replica order; a forgotten replica disappears and starts over from OFFLINE.
#[tokio::test]
async fn test_snapshot_and_forget() {
    let counters = Counters::default();
    let engine = engine_with(LogTransition, &counters);
    let a = replica("orders_0");
    let b = replica("orders_1");

    promote(&engine, &a).await;
    engine
        .apply(TransitionRequest::to(b.clone(), "STANDBY"))
        .await
        .unwrap();

    let snapshot = engine.snapshot().await;
    assert_eq!(
        snapshot.into_iter().collect::<Vec<_>>(),
        vec![
            (a.clone(), ReplicaState::declared("LEADER")),
            (b.clone(), ReplicaState::declared("STANDBY")),
        ]
    );

    assert!(engine.forget(&a));
    assert!(!engine.forget(&a));
    assert_eq!(engine.current_state(&a).await, None);
    let err = engine
        .apply(TransitionRequest::new(a.clone(), "LEADER", "STANDBY"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::StaleRequest { .. }));
}
