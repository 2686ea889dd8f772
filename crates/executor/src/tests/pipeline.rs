//! Pipeline tests: interceptor order, commit/rollback, retry, post-commit dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use kestrel_core::{EngineError, EngineEvent, Job, JobSpec, Result};
use kestrel_storage::{Store, WriteBatch, WriteOp};

use super::{builder, create_test_executor};
use crate::{
    CommandConfig, CommandContext, CommandInterceptor, CommitListener, Invocation, Next,
    RetryConfig,
};

#[derive(Default)]
struct RecordingListener {
    commits: Mutex<Vec<(Vec<String>, usize)>>,
}

impl CommitListener for RecordingListener {
    fn on_commit(&self, events: &[EngineEvent], jobs_added: usize) {
        let names = events.iter().map(|e| e.name().to_string()).collect();
        self.commits.lock().push((names, jobs_added));
    }
}

fn custom(name: &str) -> EngineEvent {
    EngineEvent::Custom {
        name: name.to_string(),
        payload: serde_json::Value::Null,
    }
}

// =============================================================================
// Chain composition
// =============================================================================

#[test]
fn test_chain_order() {
    let (executor, _) = create_test_executor();
    assert_eq!(
        executor.interceptor_names(),
        vec!["logging", "retry", "transaction", "command-context"]
    );
}

#[test]
fn test_custom_interceptor_sits_after_logging() {
    let store: Arc<dyn Store> = Arc::new(kestrel_storage::MemoryStore::with_schema());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    let executor = builder(&store)
        .interceptor(move |inv: &mut Invocation<'_>, next: Next<'_>| -> Result<()> {
            seen_in.lock().push(inv.command_name().to_string());
            assert!(inv.transaction_mut().is_none());
            next.run(inv)
        })
        .build();

    assert_eq!(executor.interceptor_names()[1], "custom");
    executor
        .run(&|_: &mut CommandContext| -> Result<()> { Ok(()) })
        .unwrap();
    assert_eq!(*seen.lock(), vec!["closure".to_string()]);
}

// =============================================================================
// Commit / rollback
// =============================================================================

#[test]
fn test_successful_command_commits_jobs() {
    let (executor, store) = create_test_executor();
    let id = executor
        .run(&|ctx: &mut CommandContext| -> Result<_> {
            Ok(ctx.schedule_job(JobSpec::new("noop", serde_json::Value::Null)))
        })
        .unwrap();

    assert!(store.job(&id).unwrap().is_some());
    let stats = executor.transaction_stats();
    assert_eq!(stats.committed, 1);
    assert_eq!(stats.rolled_back, 0);
}

#[test]
fn test_failed_command_rolls_back_and_propagates() {
    let (executor, store) = create_test_executor();
    let err = executor
        .run(&|ctx: &mut CommandContext| -> Result<()> {
            ctx.schedule_job(JobSpec::new("noop", serde_json::Value::Null));
            Err(EngineError::validation("bad input"))
        })
        .unwrap_err();

    assert_eq!(err, EngineError::validation("bad input"));
    assert!(store.jobs().unwrap().is_empty());
    assert_eq!(executor.transaction_stats().rolled_back, 1);
}

#[test]
fn test_captured_failure_rolls_back_even_on_ok() {
    let (executor, store) = create_test_executor();
    let err = executor
        .run(&|ctx: &mut CommandContext| -> Result<()> {
            ctx.schedule_job(JobSpec::new("noop", serde_json::Value::Null));
            ctx.set_failure(EngineError::internal("handler gave up"));
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, EngineError::Internal(_)));
    assert!(store.jobs().unwrap().is_empty());
}

#[test]
fn test_closed_executor_rejects_commands() {
    let (executor, _) = create_test_executor();
    executor.close();
    let err = executor
        .run(&|_: &mut CommandContext| -> Result<()> { Ok(()) })
        .unwrap_err();
    assert_eq!(err.error_code(), "ENGINE_LIFECYCLE_ERROR");
}

// =============================================================================
// Post-commit dispatch
// =============================================================================

#[test]
fn test_events_dispatch_only_after_commit() {
    let (executor, _) = create_test_executor();
    let listener = Arc::new(RecordingListener::default());
    executor.add_commit_listener(listener.clone());

    executor
        .run(&|ctx: &mut CommandContext| -> Result<()> {
            ctx.add_event(custom("first"));
            ctx.schedule_job(JobSpec::new("noop", serde_json::Value::Null));
            ctx.add_event(custom("second"));
            Ok(())
        })
        .unwrap();

    let _ = executor.run(&|ctx: &mut CommandContext| -> Result<()> {
        ctx.add_event(custom("never"));
        Err(EngineError::validation("no"))
    });

    let commits = listener.commits.lock();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].0, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(commits[0].1, 1);
}

#[test]
fn test_commit_conflict_suppresses_events() {
    let (executor, store) = create_test_executor();
    let listener = Arc::new(RecordingListener::default());
    executor.add_commit_listener(listener.clone());

    let job = Job::from_spec(JobSpec::new("noop", serde_json::Value::Null), chrono::Utc::now(), 3);
    let mut seed = WriteBatch::new();
    seed.push(WriteOp::InsertJob(job.clone()));
    store.apply(seed).unwrap();

    let mut stale = job.clone();
    stale.revision = 7;
    let err = executor
        .run(&|ctx: &mut CommandContext| -> Result<()> {
            ctx.jobs()?.delete(&stale);
            ctx.add_event(custom("deleted"));
            Ok(())
        })
        .unwrap_err();

    assert!(err.is_conflict());
    assert!(listener.commits.lock().is_empty());
    assert!(store.job(&job.id).unwrap().is_some());
}

// =============================================================================
// Retry
// =============================================================================

fn conflicting_command(attempts: Arc<AtomicUsize>, fail_times: usize) -> impl Fn(&mut CommandContext) -> Result<usize> {
    move |_ctx| {
        let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= fail_times {
            Err(EngineError::optimistic_lock("job 'j'", "expected 1, found 2"))
        } else {
            Ok(n)
        }
    }
}

#[test]
fn test_business_commands_do_not_retry() {
    let (executor, _) = create_test_executor();
    let attempts = Arc::new(AtomicUsize::new(0));
    let err = executor
        .run(&conflicting_command(Arc::clone(&attempts), 1))
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_retrying_commands_retry_conflicts() {
    let (executor, _) = create_test_executor();
    let attempts = Arc::new(AtomicUsize::new(0));
    let n = executor
        .execute(
            &CommandConfig::retrying(),
            &conflicting_command(Arc::clone(&attempts), 2),
        )
        .unwrap();
    assert_eq!(n, 3);
    // Every attempt ran in its own transaction
    assert_eq!(executor.transaction_stats().started, 3);
}

#[test]
fn test_retry_budget_is_bounded() {
    let (executor, _) = create_test_executor();
    let attempts = Arc::new(AtomicUsize::new(0));
    let config = CommandConfig::new().with_retry(
        RetryConfig::new()
            .with_max_retries(2)
            .with_base_delay_ms(0)
            .with_max_delay_ms(0),
    );
    let err = executor
        .execute(&config, &conflicting_command(Arc::clone(&attempts), 10))
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn test_non_conflict_errors_are_not_retried() {
    let (executor, _) = create_test_executor();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let err = executor
        .execute(&CommandConfig::retrying(), &move |_: &mut CommandContext| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::validation("broken"))
        })
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

struct CountingInterceptor(Arc<AtomicUsize>);

impl CommandInterceptor for CountingInterceptor {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn intercept(&self, invocation: &mut Invocation<'_>, next: Next<'_>) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        next.run(invocation)
    }
}

#[test]
fn test_custom_interceptor_runs_once_per_command_even_with_retry() {
    let store: Arc<dyn Store> = Arc::new(kestrel_storage::MemoryStore::with_schema());
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = builder(&store)
        .interceptor(CountingInterceptor(Arc::clone(&calls)))
        .build();

    let attempts = Arc::new(AtomicUsize::new(0));
    executor
        .execute(
            &CommandConfig::retrying(),
            &conflicting_command(Arc::clone(&attempts), 1),
        )
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_in_context_subcommand_shares_the_transaction() {
    let (executor, store) = create_test_executor();
    let inner = |ctx: &mut CommandContext| -> Result<()> {
        ctx.schedule_job(JobSpec::new("inner", serde_json::Value::Null));
        Ok(())
    };

    let result = executor.run(&|ctx: &mut CommandContext| -> Result<()> {
        ctx.schedule_job(JobSpec::new("outer", serde_json::Value::Null));
        crate::Command::execute(&inner, ctx)?;
        Err(EngineError::validation("outer gives up"))
    });

    assert!(result.is_err());
    assert!(store.jobs().unwrap().is_empty());
    assert_eq!(executor.transaction_stats().rolled_back, 1);
}

#[test]
fn test_nested_execute_runs_its_own_transaction() {
    let (executor, store) = create_test_executor();

    let result = executor.run(&|ctx: &mut CommandContext| -> Result<()> {
        ctx.schedule_job(JobSpec::new("outer", serde_json::Value::Null));
        executor.run(&|nested: &mut CommandContext| -> Result<()> {
            nested.schedule_job(JobSpec::new("nested", serde_json::Value::Null));
            Ok(())
        })?;
        Err(EngineError::validation("outer gives up"))
    });

    assert!(result.is_err());
    let jobs = store.jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].handler_type, "nested");
    let stats = executor.transaction_stats();
    assert_eq!((stats.committed, stats.rolled_back), (1, 1));
}
