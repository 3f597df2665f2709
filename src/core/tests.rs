use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::flag::testing::{Switch, switch_flag};
use crate::fortress::{self, Guard};
use crate::gate::{self, Lock};
use crate::{
    BackoffPolicy, Engine, EngineConfig, EngineError, EngineState, EventKind, FortressError,
    Housing, JitterPolicy, Manifold, ManifoldState, Report, WorkerError, WorkerFn, WorkerRef,
    value,
};

fn config() -> EngineConfig {
    EngineConfig {
        grace: Duration::from_secs(5),
        backoff: BackoffPolicy::fixed(Duration::from_millis(100)),
        ..EngineConfig::default()
    }
}

fn idle_worker() -> WorkerRef {
    WorkerRef::new(WorkerFn::spawn(|token| async move {
        token.cancelled().await;
        Ok(())
    }))
}

fn idle(name: &str) -> Manifold {
    Manifold::new(name, |_ctx| async { Ok(idle_worker()) })
}

/// Worker that fails once `trip` is notified.
fn trippable(name: &str, trip: Arc<Notify>) -> Manifold {
    Manifold::new(name, move |_ctx| {
        let trip = trip.clone();
        async move {
            Ok(WorkerRef::new(WorkerFn::spawn(move |token| async move {
                tokio::select! {
                    _ = token.cancelled() => Ok(()),
                    _ = trip.notified() => Err(WorkerError::fail("tripped")),
                }
            })))
        }
    })
}

async fn until(engine: &Engine, what: impl Fn(&Report) -> bool) -> Report {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let report = engine.report().await;
            if what(&report) {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("engine never reached the expected state")
}

fn state(report: &Report, name: &str) -> Option<ManifoldState> {
    report.manifold(name).map(|m| m.state)
}

async fn stop(engine: &Engine) {
    engine.kill();
    assert_eq!(engine.wait().await, Ok(()));
}

#[tokio::test(start_paused = true)]
async fn locked_gate_blocks_dependents() {
    let lock = Lock::new();
    let engine = Engine::new(config());
    engine
        .start(vec![
            gate::manifold("upgrade-steps-gate", lock.clone()),
            idle("worker").with_input("upgrade-steps-gate"),
        ])
        .unwrap();

    until(&engine, |r| {
        state(r, "upgrade-steps-gate") == Some(ManifoldState::Starting)
    })
    .await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let report = engine.report().await;
    assert_eq!(state(&report, "worker"), Some(ManifoldState::Stopped));
    assert_eq!(report.manifold("worker").unwrap().start_count, 0);

    lock.unlock();
    let report = until(&engine, |r| state(r, "worker") == Some(ManifoldState::Started)).await;
    assert_eq!(report.manifold("upgrade-steps-gate").unwrap().start_count, 1);
    stop(&engine).await;
}

#[tokio::test(start_paused = true)]
async fn failing_start_backs_off_then_unblocks_dependents() {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let app_started = Arc::new(Mutex::new(None));

    let api = {
        let attempts = attempts.clone();
        Manifold::new("api-caller", move |_ctx| {
            let attempts = attempts.clone();
            async move {
                let n = {
                    let mut attempts = attempts.lock();
                    attempts.push(Instant::now());
                    attempts.len()
                };
                if n <= 3 {
                    return Err(WorkerError::fail("connection refused"));
                }
                Ok(idle_worker())
            }
        })
    };
    let app = {
        let app_started = app_started.clone();
        Manifold::new("app", move |_ctx| {
            let app_started = app_started.clone();
            async move {
                *app_started.lock() = Some(Instant::now());
                Ok(idle_worker())
            }
        })
        .with_input("api-caller")
    };

    let engine = Engine::new(EngineConfig {
        backoff: BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::None,
        },
        ..config()
    });
    let mut events = engine.subscribe();
    engine.start(vec![app, api]).unwrap();

    let report = until(&engine, |r| state(r, "app") == Some(ManifoldState::Started)).await;
    let api = report.manifold("api-caller").unwrap();
    assert_eq!(api.start_count, 4);
    assert_eq!(api.failures, 0);
    assert_eq!(api.last_error, Some(WorkerError::fail("connection refused")));
    assert_eq!(report.manifold("app").unwrap().start_count, 1);

    let attempts = attempts.lock().clone();
    let gaps: Vec<_> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    for (gap, expected) in gaps.iter().zip([100, 200, 400]) {
        let expected = Duration::from_millis(expected);
        assert!(*gap >= expected && *gap < expected + Duration::from_millis(50), "{gaps:?}");
    }
    let app_started = app_started.lock().unwrap();
    assert!(app_started >= attempts[3]);

    let mut delays = Vec::new();
    while let Ok(ev) = events.try_recv() {
        if ev.kind == EventKind::BackoffScheduled {
            delays.push((ev.attempt, ev.delay_ms));
        }
    }
    assert_eq!(
        delays,
        vec![(Some(1), Some(100)), (Some(2), Some(200)), (Some(3), Some(400))]
    );
    stop(&engine).await;
}

#[tokio::test(start_paused = true)]
async fn failed_input_tears_down_dependents_then_restarts_them() {
    let trip = Arc::new(Notify::new());
    let engine = Engine::new(config());
    engine
        .start(vec![
            trippable("a", trip.clone()),
            idle("b").with_input("a"),
            idle("c").with_input("b"),
        ])
        .unwrap();
    let before = until(&engine, |r| state(r, "c") == Some(ManifoldState::Started)).await;
    assert_eq!(before.manifold("c").unwrap().generation, 1);

    trip.notify_one();
    until(&engine, |r| state(r, "c") != Some(ManifoldState::Started)).await;
    let after = until(&engine, |r| {
        r.manifold("c").is_some_and(|m| m.state == ManifoldState::Started && m.generation == 2)
    })
    .await;
    let a = after.manifold("a").unwrap();
    assert_eq!(a.start_count, 2);
    assert_eq!(a.last_error, Some(WorkerError::fail("tripped")));
    assert_eq!(after.manifold("b").unwrap().start_count, 2);
    // Dependents were stopped, not failed.
    assert_eq!(after.manifold("b").unwrap().last_error, None);
    stop(&engine).await;
}

#[tokio::test(start_paused = true)]
async fn lockdown_completes_after_housed_worker_exits() {
    let switch = Switch::new(true);
    let exited = Arc::new(Mutex::new(None));
    let (guards, mut guard_rx) = mpsc::unbounded_channel::<Guard>();

    let slow = {
        let exited = exited.clone();
        Manifold::new("worker", move |_ctx| {
            let exited = exited.clone();
            async move {
                Ok(WorkerRef::new(WorkerFn::spawn(move |token| async move {
                    token.cancelled().await;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    *exited.lock() = Some(Instant::now());
                    Ok(())
                })))
            }
        })
    };
    let probe = Manifold::new("probe", move |ctx| {
        let guards = guards.clone();
        async move {
            let guard: Guard = ctx.get("fortress")?;
            let _ = guards.send(guard);
            Ok(idle_worker())
        }
    })
    .with_typed_input::<Guard>("fortress");
    let housing = Housing::new().with_flag("flag").occupying("fortress");

    let engine = Engine::new(config());
    engine
        .start(vec![
            value::manifold("api-caller", ()),
            switch_flag("flag", "api-caller", switch.clone()),
            fortress::manifold("fortress"),
            housing.decorate(slow),
            probe,
        ])
        .unwrap();
    until(&engine, |r| state(r, "worker") == Some(ManifoldState::Started)).await;
    let guard = guard_rx.recv().await.unwrap();

    let lockdown = tokio::spawn(async move {
        guard.lockdown(&CancellationToken::new()).await?;
        Ok::<_, FortressError>((Instant::now(), guard))
    });
    switch.set(false);

    let (locked_at, guard) = lockdown.await.unwrap().unwrap();
    let exited_at = exited.lock().expect("worker exited before lockdown completed");
    assert!(exited_at <= locked_at);
    assert!(guard.is_locked_down());

    // The restarted flag waits for the switch instead of failing.
    let report = until(&engine, |r| {
        state(r, "flag") == Some(ManifoldState::Starting)
            && r.manifold("flag").map(|m| m.start_count) == Some(2)
    })
    .await;
    assert_eq!(report.manifold("flag").map(|m| m.failures), Some(0));
    assert_ne!(state(&report, "worker"), Some(ManifoldState::Started));

    // Flag set again but the fortress stays locked: the worker cannot enter.
    switch.set(true);
    let report = until(&engine, |r| {
        r.manifold("worker").and_then(|m| m.last_error.clone())
            == Some(WorkerError::Fortress(FortressError::LockedDown))
            && state(r, "flag") == Some(ManifoldState::Started)
    })
    .await;
    assert_ne!(state(&report, "worker"), Some(ManifoldState::Started));

    guard.unlock();
    until(&engine, |r| state(r, "worker") == Some(ManifoldState::Started)).await;
    stop(&engine).await;
}

#[tokio::test(start_paused = true)]
async fn unset_flag_holds_dependents_without_backoff() {
    let switch = Switch::new(true);
    let engine = Engine::new(EngineConfig::default());
    engine
        .start(vec![
            value::manifold("api-caller", ()),
            switch_flag("flag", "api-caller", switch.clone()),
            Housing::new().with_flag("flag").decorate(idle("worker")),
        ])
        .unwrap();
    until(&engine, |r| state(r, "worker") == Some(ManifoldState::Started)).await;

    switch.set(false);
    tokio::time::sleep(Duration::from_secs(300)).await;
    let report = engine.report().await;
    let flag = report.manifold("flag").unwrap();
    assert_eq!(flag.state, ManifoldState::Starting);
    assert_eq!(flag.start_count, 2);
    assert_eq!(flag.failures, 0);
    assert_eq!(flag.last_error, None);
    let worker = report.manifold("worker").unwrap();
    assert_eq!(worker.state, ManifoldState::Stopped);
    assert_eq!(worker.start_count, 1);

    let set_at = Instant::now();
    switch.set(true);
    let report = until(&engine, |r| state(r, "worker") == Some(ManifoldState::Started)).await;
    assert!(set_at.elapsed() < Duration::from_secs(1));
    assert_eq!(report.manifold("flag").map(|m| m.start_count), Some(2));
    stop(&engine).await;
}

#[tokio::test(start_paused = true)]
async fn missing_input_waits_for_a_change() {
    let calls = Arc::new(AtomicU32::new(0));
    let picky = {
        let calls = calls.clone();
        Manifold::new("picky", move |_ctx| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    return Err(WorkerError::missing("dep"));
                }
                Ok(idle_worker())
            }
        })
        .with_input("dep")
    };
    let engine = Engine::new(config());
    engine.start(vec![idle("dep"), picky]).unwrap();
    let report = until(&engine, |r| {
        r.manifold("picky").is_some_and(|m| m.last_error.is_some())
    })
    .await;
    let picky = report.manifold("picky").unwrap();
    assert_eq!(picky.state, ManifoldState::Stopped);
    assert_eq!(picky.failures, 0);

    // No retry on its own.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    stop(&engine).await;
}

#[tokio::test(start_paused = true)]
async fn missing_input_retries_once_the_input_restarts() {
    let trip = Arc::new(Notify::new());
    let calls = Arc::new(AtomicU32::new(0));
    let picky = {
        let calls = calls.clone();
        Manifold::new("picky", move |_ctx| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    return Err(WorkerError::missing("dep"));
                }
                Ok(idle_worker())
            }
        })
        .with_input("dep")
    };
    let dep = {
        let trip = trip.clone();
        Manifold::new("dep", move |_ctx| {
            let trip = trip.clone();
            async move {
                Ok(WorkerRef::new(WorkerFn::spawn(move |token| async move {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = trip.notified() => {}
                    }
                    Ok(())
                })))
            }
        })
    };

    let engine = Engine::new(config());
    engine.start(vec![dep, picky]).unwrap();
    until(&engine, |r| r.manifold("picky").is_some_and(|m| m.last_error.is_some())).await;

    // A clean exit restarts dep after the bounce delay; picky is re-evaluated.
    trip.notify_one();
    let report = until(&engine, |r| state(r, "picky") == Some(ManifoldState::Started)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.manifold("dep").unwrap().start_count, 2);
    assert_eq!(report.manifold("dep").unwrap().failures, 0);
    stop(&engine).await;
}

#[tokio::test(start_paused = true)]
async fn bounce_restarts_without_backoff() {
    let calls = Arc::new(AtomicU32::new(0));
    let bouncy = {
        let calls = calls.clone();
        Manifold::new("bouncy", move |_ctx| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    return Ok(WorkerRef::new(WorkerFn::spawn(|_| async {
                        Err(WorkerError::Bounce)
                    })));
                }
                Ok(idle_worker())
            }
        })
    };
    let engine = Engine::new(EngineConfig {
        backoff: BackoffPolicy::fixed(Duration::from_secs(3600)),
        ..config()
    });
    let began = Instant::now();
    engine.start(vec![bouncy]).unwrap();

    let report = until(&engine, |r| {
        r.manifold("bouncy").is_some_and(|m| m.state == ManifoldState::Started && m.start_count == 2)
    })
    .await;
    assert!(began.elapsed() < Duration::from_secs(1));
    assert_eq!(report.manifold("bouncy").unwrap().failures, 0);
    stop(&engine).await;
}

#[tokio::test(start_paused = true)]
async fn uninstalled_manifold_never_starts_again() {
    let calls = Arc::new(AtomicU32::new(0));
    let once = {
        let calls = calls.clone();
        Manifold::new("once", move |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(WorkerError::Uninstall) }
        })
    };
    let engine = Engine::new(config());
    let mut events = engine.subscribe();
    engine
        .start(vec![once, idle("after").with_input("once")])
        .unwrap();

    until(&engine, |r| state(r, "once") == Some(ManifoldState::Uninstalled)).await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    let report = engine.report().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(state(&report, "after"), Some(ManifoldState::Stopped));
    assert_eq!(report.manifold("after").unwrap().start_count, 0);

    let mut uninstalled = false;
    while let Ok(ev) = events.try_recv() {
        uninstalled |= ev.kind == EventKind::ManifoldUninstalled;
    }
    assert!(uninstalled);
    stop(&engine).await;
}

#[tokio::test]
async fn optional_unregistered_input_does_not_block() {
    let engine = Engine::new(config());
    engine
        .start(vec![idle("worker").with_optional_input("metrics")])
        .unwrap();
    let report = until(&engine, |r| state(r, "worker") == Some(ManifoldState::Started)).await;
    assert_eq!(report.manifold("worker").unwrap().inputs, vec!["metrics"]);
    assert_eq!(report.state, EngineState::Running);
    stop(&engine).await;
}

#[tokio::test]
async fn configuration_errors_finish_the_engine() {
    let engine = Engine::new(config());
    let err = engine
        .start(vec![idle("a").with_input("b"), idle("b").with_input("a")])
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()]
        }
    );
    assert_eq!(engine.wait().await, Err(err));
    assert_eq!(
        engine.start(vec![idle("a")]),
        Err(EngineError::AlreadyStarted)
    );

    let engine = Engine::new(config());
    assert_eq!(
        engine.start(vec![idle("a"), idle("a")]),
        Err(EngineError::DuplicateManifold { name: "a".into() })
    );

    let engine = Engine::new(config());
    assert_eq!(
        engine.start(vec![idle("a").with_input("ghost")]),
        Err(EngineError::UnknownInput {
            manifold: "a".into(),
            input: "ghost".into()
        })
    );
}

#[tokio::test]
async fn second_start_is_rejected() {
    let engine = Engine::new(config());
    assert_eq!(engine.report().await.state, EngineState::Idle);
    engine.start(vec![idle("a")]).unwrap();
    assert_eq!(
        engine.start(vec![idle("b")]),
        Err(EngineError::AlreadyStarted)
    );
    stop(&engine).await;
    assert_eq!(engine.report().await.state, EngineState::Stopped);
}

#[tokio::test]
async fn kill_before_start() {
    let engine = Engine::new(config());
    engine.kill();
    assert_eq!(engine.wait().await, Ok(()));
    assert_eq!(engine.report().await.state, EngineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stuck_worker_exceeds_grace() {
    let stubborn = Manifold::new("stubborn", |_ctx| async {
        Ok(WorkerRef::new(WorkerFn::spawn(|_token| async {
            std::future::pending::<()>().await;
            Ok(())
        })))
    });
    let engine = Engine::new(EngineConfig {
        grace: Duration::from_secs(1),
        ..config()
    });
    engine.start(vec![stubborn, idle("polite")]).unwrap();
    until(&engine, |r| r.in_state(ManifoldState::Started).len() == 2).await;

    engine.kill();
    assert_eq!(
        engine.wait().await,
        Err(EngineError::GraceExceeded {
            grace: Duration::from_secs(1),
            stuck: vec!["stubborn".into()],
        })
    );
    let report = engine.report().await;
    assert_eq!(report.state, EngineState::Stopped);
    assert_eq!(state(&report, "polite"), Some(ManifoldState::Stopped));
}
