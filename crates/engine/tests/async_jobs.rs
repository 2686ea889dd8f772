//! Async executor behavior across engines sharing one store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use kestrel_core::{Clock, EngineError, JobSpec, ManualClock, SuspensionState};
use kestrel_engine::{AsyncExecutorConfig, EngineConfig, JobOutcome, ProcessEngine};
use kestrel_storage::{MemoryStore, Store};
use parking_lot::Mutex;
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
}

fn idle_config(name: &str) -> EngineConfig {
    EngineConfig::default()
        .with_name(name)
        .with_async_executor_activate(false)
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn two_engines_execute_each_job_exactly_once() {
    init_tracing();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let executions: Arc<Mutex<HashMap<i64, usize>>> = Arc::new(Mutex::new(HashMap::new()));

    let build = |name: &str| {
        let seen = Arc::clone(&executions);
        ProcessEngine::builder(EngineConfig::default().with_name(name).with_async_executor(
            AsyncExecutorConfig {
                activate: true,
                acquire_interval_ms: 20,
                max_jobs_per_acquisition: 4,
                worker_threads: 2,
                queue_capacity: 4,
                shutdown_grace_ms: 5_000,
                ..AsyncExecutorConfig::default()
            },
        ))
        .store(Arc::clone(&store))
        .job_handler_fn("count", move |job, _ctx| {
            let n = job.payload["n"].as_i64().unwrap_or(-1);
            *seen.lock().entry(n).or_insert(0) += 1;
            Ok(())
        })
        .build()
        .unwrap()
    };
    let first = build("shared-store-first");
    let second = build("shared-store-second");
    assert_ne!(first.async_executor().lock_owner(), second.async_executor().lock_owner());

    for n in 0..40 {
        first
            .management_service()
            .schedule_job(JobSpec::new("count", json!({ "n": n })))
            .unwrap();
    }

    let drained = wait_until(Duration::from_secs(20), || {
        first.management_service().list_jobs().unwrap().is_empty()
    });
    first.close().unwrap();
    second.close().unwrap();

    assert!(drained, "jobs were not executed in time");
    let executions = executions.lock();
    assert_eq!(executions.len(), 40);
    assert!(executions.values().all(|&count| count == 1));
}

#[test]
fn expired_lock_lets_another_engine_take_over() {
    init_tracing();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let clock = manual_clock();
    let ran = Arc::new(AtomicBool::new(false));

    let crashed = ProcessEngine::builder(idle_config("takeover-crashed"))
        .store(Arc::clone(&store))
        .clock(clock.clone())
        .build()
        .unwrap();
    let flag = Arc::clone(&ran);
    let survivor = ProcessEngine::builder(idle_config("takeover-survivor"))
        .store(Arc::clone(&store))
        .clock(clock.clone())
        .job_handler_fn("work", move |_job, _ctx| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap();

    survivor
        .management_service()
        .schedule_job(JobSpec::new("work", json!({})))
        .unwrap();

    let locked = crashed.async_executor().acquire_jobs(10).unwrap();
    assert_eq!(locked.len(), 1);
    assert!(survivor.async_executor().acquire_jobs(10).unwrap().is_empty());

    let lock_time = crashed.config().async_executor.lock_time();
    clock.advance(lock_time + chrono::Duration::seconds(1));

    let taken = survivor.async_executor().acquire_jobs(10).unwrap();
    assert_eq!(taken.len(), 1);
    assert_eq!(
        survivor.async_executor().execute_locked_job(&taken[0].id).unwrap(),
        JobOutcome::Executed
    );
    assert!(ran.load(Ordering::SeqCst));

    // The original owner no longer holds the lock
    let stale = crashed.async_executor().execute_locked_job(&locked[0].id);
    assert!(matches!(stale, Err(EngineError::NotFound { .. })));

    crashed.close().unwrap();
    survivor.close().unwrap();
}

#[test]
fn activation_date_activates_definitions_when_due() {
    let clock = manual_clock();
    let engine = ProcessEngine::builder(idle_config("timed-activation"))
        .clock(clock.clone())
        .build()
        .unwrap();
    let repository = engine.repository_service();

    let activation = clock.now() + chrono::Duration::hours(1);
    let deployment = repository
        .create_deployment()
        .name("timed")
        .add_string("invoice.flow", r#"{"key": "invoice"}"#)
        .add_string("refund.flow", r#"{"key": "refund"}"#)
        .activate_process_definitions_on(activation)
        .deploy()
        .unwrap();
    assert_eq!(deployment.activation_date, Some(activation));

    let definitions = repository.list_process_definitions().unwrap();
    assert_eq!(definitions.len(), 2);
    assert!(definitions
        .iter()
        .all(|d| d.suspension_state == SuspensionState::Suspended));

    let executor = engine.async_executor();
    assert!(executor.acquire_jobs(10).unwrap().is_empty());

    clock.advance(chrono::Duration::hours(1));
    let due = executor.acquire_jobs(10).unwrap();
    assert_eq!(due.len(), 2);
    for job in &due {
        assert_eq!(executor.execute_locked_job(&job.id).unwrap(), JobOutcome::Executed);
    }

    assert!(repository
        .list_process_definitions()
        .unwrap()
        .iter()
        .all(|d| d.suspension_state == SuspensionState::Active));
    assert!(engine.management_service().list_jobs().unwrap().is_empty());
    engine.close().unwrap();
}

#[test]
fn failed_job_waits_for_its_backoff() {
    let clock = manual_clock();
    let succeed = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&succeed);
    let engine = ProcessEngine::builder(idle_config("backoff-timing"))
        .clock(clock.clone())
        .job_handler_fn("flaky", move |job, _ctx| {
            if gate.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(EngineError::job_execution(job.id.as_str(), "remote unavailable"))
            }
        })
        .build()
        .unwrap();
    let executor = engine.async_executor();
    let management = engine.management_service();

    let id = management
        .schedule_job(JobSpec::new("flaky", json!({})).with_retries(3))
        .unwrap();
    let job = executor.acquire_jobs(1).unwrap().remove(0);
    assert!(executor.execute_locked_job(&job.id).is_err());

    let failed = management.get_job(&id).unwrap().unwrap();
    assert_eq!(failed.retries, 2);
    assert_eq!(failed.failed_attempts, 1);
    assert_eq!(failed.exception_message.as_deref(), Some("remote unavailable"));
    assert!(failed.lock_owner.is_none());
    assert_eq!(failed.due_time, clock.now() + chrono::Duration::seconds(1));

    assert!(executor.acquire_jobs(1).unwrap().is_empty());
    clock.advance(chrono::Duration::seconds(1));
    let retry = executor.acquire_jobs(1).unwrap();
    assert_eq!(retry.len(), 1);

    succeed.store(true, Ordering::SeqCst);
    assert_eq!(executor.execute_locked_job(&id).unwrap(), JobOutcome::Executed);
    assert!(management.get_job(&id).unwrap().is_none());
    engine.close().unwrap();
}

#[test]
fn panicking_handler_consumes_retries_until_dead_letter() {
    init_tracing();
    let clock = manual_clock();
    let engine = ProcessEngine::builder(idle_config("panicking-handler"))
        .clock(clock.clone())
        .job_handler_fn("explode", |_job, _ctx| -> kestrel_core::Result<()> {
            panic!("handler bug")
        })
        .build()
        .unwrap();
    let executor = engine.async_executor();
    let management = engine.management_service();

    let id = management
        .schedule_job(JobSpec::new("explode", json!({})).with_retries(2))
        .unwrap();

    let job = executor.acquire_jobs(1).unwrap().remove(0);
    let err = executor.execute_locked_job(&job.id).unwrap_err();
    assert!(matches!(err, EngineError::JobExecution { .. }));

    let failed = management.get_job(&id).unwrap().unwrap();
    assert_eq!(failed.retries, 1);
    assert_eq!(failed.failed_attempts, 1);
    assert!(failed.lock_owner.is_none());
    assert!(failed
        .exception_message
        .as_deref()
        .is_some_and(|m| m.contains("handler bug")));

    clock.advance(chrono::Duration::seconds(1));
    let retry = executor.acquire_jobs(1).unwrap().remove(0);
    assert!(executor.execute_locked_job(&retry.id).is_err());

    let dead = management.get_job(&id).unwrap().unwrap();
    assert!(dead.is_dead_letter());
    assert_eq!(dead.retries, 0);
    clock.advance(chrono::Duration::hours(1));
    assert!(executor.acquire_jobs(1).unwrap().is_empty());
    engine.close().unwrap();
}

fn single_worker_engine(
    name: &str,
    grace_ms: u64,
    handler: impl Fn() + Send + Sync + 'static,
) -> Arc<ProcessEngine> {
    ProcessEngine::builder(EngineConfig::default().with_name(name).with_async_executor(
        AsyncExecutorConfig {
            activate: true,
            acquire_interval_ms: 20,
            max_jobs_per_acquisition: 4,
            worker_threads: 1,
            queue_capacity: 4,
            shutdown_grace_ms: grace_ms,
            ..AsyncExecutorConfig::default()
        },
    ))
    .job_handler_fn("slow", move |_job, _ctx| {
        handler();
        Ok(())
    })
    .build()
    .unwrap()
}

#[test]
fn shutdown_runs_queued_jobs_within_grace() {
    init_tracing();
    let executed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&executed);
    let engine = single_worker_engine("shutdown-drains-queue", 5_000, move || {
        std::thread::sleep(Duration::from_millis(30));
        counter.fetch_add(1, Ordering::SeqCst);
    });
    for _ in 0..3 {
        engine
            .management_service()
            .schedule_job(JobSpec::new("slow", json!({})))
            .unwrap();
    }
    let executor = engine.async_executor();
    assert!(wait_until(Duration::from_secs(10), || executor.stats().acquired == 3));

    assert!(executor.shutdown());
    assert_eq!(executed.load(Ordering::SeqCst), 3);
    assert!(engine.management_service().list_jobs().unwrap().is_empty());
    engine.close().unwrap();
}

#[test]
fn shutdown_unlocks_jobs_that_never_started() {
    init_tracing();
    let hold = Arc::new(AtomicBool::new(true));
    let started = Arc::new(AtomicUsize::new(0));
    let (h, s) = (Arc::clone(&hold), Arc::clone(&started));
    let engine = single_worker_engine("shutdown-unlocks-queue", 100, move || {
        s.fetch_add(1, Ordering::SeqCst);
        while h.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
    });
    let management = engine.management_service();
    for _ in 0..3 {
        management
            .schedule_job(JobSpec::new("slow", json!({})))
            .unwrap();
    }
    let executor = engine.async_executor();
    assert!(wait_until(Duration::from_secs(10), || {
        executor.stats().acquired == 3 && started.load(Ordering::SeqCst) == 1
    }));

    // The running job outlives the grace period; the queued ones never start
    assert!(!executor.shutdown());
    let jobs = management.list_jobs().unwrap();
    assert_eq!(jobs.len(), 3);
    let locked: Vec<_> = jobs.iter().filter(|j| j.lock_owner.is_some()).collect();
    assert_eq!(locked.len(), 1);
    assert!(jobs
        .iter()
        .filter(|j| j.lock_owner.is_none())
        .all(|j| j.lock_expiration.is_none()));

    hold.store(false, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(10), || {
        management.list_jobs().unwrap().len() == 2
    }));
    assert_eq!(started.load(Ordering::SeqCst), 1);
    engine.close().unwrap();
}
