//! Concurrent commit tests for kestrel-concurrency
//!
//! Two transactions that read the same job revision race to lock it. Exactly
//! one commits; only the winner's post-commit listeners run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Utc;
use kestrel_concurrency::{TransactionManager, TransactionStatus};
use kestrel_core::{Job, JobSpec};
use kestrel_storage::{MemoryStore, Store, WriteBatch, WriteOp};

#[test]
fn test_first_committer_wins_on_job_lock() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::with_schema());
    let job = Job::from_spec(JobSpec::new("noop", serde_json::Value::Null), Utc::now(), 3);
    let mut seed = WriteBatch::new();
    seed.push(WriteOp::InsertJob(job.clone()));
    store.apply(seed).unwrap();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let post_commits = Arc::new(AtomicUsize::new(0));
    let rollbacks = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let manager = TransactionManager::new(Arc::clone(&store));
            let barrier = Arc::clone(&barrier);
            let post_commits = Arc::clone(&post_commits);
            let rollbacks = Arc::clone(&rollbacks);
            let mut locked = job.clone();
            thread::spawn(move || {
                locked.lock_owner = Some(format!("node-{}", i));
                let mut txn = manager.begin();
                txn.stage(WriteOp::UpdateJob {
                    job: locked,
                    expected_revision: 1,
                })
                .unwrap();
                txn.on_post_commit(move || {
                    post_commits.fetch_add(1, Ordering::SeqCst);
                });
                txn.on_rollback(move || {
                    rollbacks.fetch_add(1, Ordering::SeqCst);
                });

                barrier.wait();
                let result = txn.commit();
                manager.record(&txn);
                match result {
                    Ok(()) => assert_eq!(txn.status(), &TransactionStatus::Committed),
                    Err(e) => {
                        assert!(e.is_conflict());
                        assert!(txn.is_rolled_back());
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(post_commits.load(Ordering::SeqCst), 1);
    assert_eq!(rollbacks.load(Ordering::SeqCst), threads - 1);
    assert_eq!(store.job(&job.id).unwrap().unwrap().revision, 2);
}
