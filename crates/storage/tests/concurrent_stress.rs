//! Concurrent access tests for `MemoryBackend`.
//!
//! Rate-limit counters and certificate rotation both depend on the backend's
//! atomic primitives holding up under contention: no lost increments and
//! exactly one winner per conditional write.

#![allow(clippy::expect_used, clippy::panic)]

use std::time::Duration;

use apiguard_storage::{MemoryBackend, StorageBackend, StorageError};
use tokio::task::JoinSet;

/// Number of concurrent tasks for most tests.
const CONCURRENCY: usize = 16;

/// Increments each task performs.
const OPS_PER_TASK: usize = 100;

/// Number of CAS rounds for the exactly-one-winner test.
const CAS_ROUNDS: usize = 50;

// ---------------------------------------------------------------------------
// Test: Concurrent increments are never lost
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_increments_are_not_lost() {
    let backend = MemoryBackend::new();
    let key = b"ratelimit/ip/10.0.0.1/28333333".to_vec();

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let backend = backend.clone();
        let key = key.clone();
        set.spawn(async move {
            let mut seen = Vec::with_capacity(OPS_PER_TASK);
            for _ in 0..OPS_PER_TASK {
                let count = backend
                    .increment(&key, Some(Duration::from_secs(120)))
                    .await
                    .expect("increment should succeed");
                seen.push(count);
            }
            seen
        });
    }

    let mut all = Vec::new();
    while let Some(result) = set.join_next().await {
        all.extend(result.expect("task should not panic"));
    }

    // Every returned count is unique, so no two callers observed the same value.
    all.sort_unstable();
    let expected: Vec<i64> = (1..=(CONCURRENCY * OPS_PER_TASK) as i64).collect();
    assert_eq!(all, expected);
}

// ---------------------------------------------------------------------------
// Test: Parallel CAS, exactly one winner per round
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cas_exactly_one_winner_per_round() {
    let backend = MemoryBackend::new();
    let key = b"certs/private/latest".to_vec();

    for round in 0..CAS_ROUNDS {
        let current_value = format!("round-{round}").into_bytes();
        backend.set(key.clone(), current_value.clone()).await.expect("setup set should succeed");

        let mut set = JoinSet::new();
        for task_id in 0..CONCURRENCY {
            let backend = backend.clone();
            let key = key.clone();
            let expected = current_value.clone();
            let new_val = format!("round-{round}-winner-{task_id}").into_bytes();
            set.spawn(async move { backend.compare_and_set(&key, Some(&expected), new_val).await });
        }

        let mut successes = 0usize;
        let mut conflicts = 0usize;
        while let Some(result) = set.join_next().await {
            match result.expect("task should not panic") {
                Ok(()) => successes += 1,
                Err(StorageError::Conflict) => conflicts += 1,
                Err(e) => panic!("unexpected error in CAS round {round}: {e}"),
            }
        }

        assert_eq!(successes, 1, "round {round}: exactly one CAS should succeed");
        assert_eq!(conflicts, CONCURRENCY - 1, "round {round}: all other CAS should conflict");
    }
}

// ---------------------------------------------------------------------------
// Test: Racing transactions, exactly one commits
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_rotation_transactions_commit_once() {
    let backend = MemoryBackend::new();

    let mut set = JoinSet::new();
    for task_id in 0..CONCURRENCY {
        let backend = backend.clone();
        set.spawn(async move {
            let mut txn = backend.transaction().await.expect("begin");
            txn.compare_and_set(
                b"latest".to_vec(),
                None,
                format!("key-{task_id}").into_bytes(),
                Some(Duration::from_secs(10)),
            );
            txn.set_with_ttl(
                format!("public/{task_id:04}").into_bytes(),
                b"cert".to_vec(),
                Duration::from_secs(10),
            );
            txn.commit().await.map(|()| task_id)
        });
    }

    let mut winners = Vec::new();
    while let Some(result) = set.join_next().await {
        if let Ok(task_id) = result.expect("task should not panic") {
            winners.push(task_id);
        }
    }

    assert_eq!(winners.len(), 1, "exactly one rotation may win");
    let published = backend.get_prefix(b"public/").await.expect("scan");
    assert_eq!(published.len(), 1, "losing transactions must not publish certificates");

    let winner = winners[0];
    let latest = backend.get(b"latest").await.expect("get").expect("latest present");
    assert_eq!(&latest[..], format!("key-{winner}").as_bytes());

    // A late conditional insert conflicts.
    let late = backend.compare_and_set(b"latest", None, b"late".to_vec()).await;
    assert!(matches!(late, Err(StorageError::Conflict)));
}
