//! Long-running stress tests. Run with `cargo test -- --ignored`.

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use taskgate::prelude::*;

#[test]
#[ignore]
fn stress_many_tasks_small_queue() {
    let config = PoolConfig::builder()
        .workers(8)
        .queue_capacity(16)
        .build()
        .unwrap();
    let mut pool = WorkerPool::threaded(config, Registry::with_builtins()).unwrap();

    let n = 100_000usize;
    pool.submit_many((0..n).map(|i| Task::new("add", json!([i, 1]))))
        .unwrap();
    pool.shutdown().unwrap();

    let outcomes = pool.drain_and_collect(n).unwrap();
    assert_eq!(outcomes.len(), n);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert_eq!(pool.executed(), n as u64);
}

#[test]
#[ignore]
fn stress_repeated_pool_lifecycles() {
    for round in 0..200 {
        let workers = round % 7 + 1;
        let config = PoolConfig::builder().workers(workers).build().unwrap();
        let mut pool = WorkerPool::threaded(config, Registry::with_builtins()).unwrap();

        pool.submit_many((0..round).map(|i| Task::new("echo", json!(i))))
            .unwrap();
        pool.shutdown().unwrap();
        assert_eq!(pool.drain_and_collect(round).unwrap().len(), round);
    }
}

#[test]
#[ignore]
fn stress_concurrent_join_and_acknowledge() {
    let queue = Arc::new(TaskQueue::<u64>::unbounded());
    let processed = Arc::new(AtomicUsize::new(0));
    let total = 20_000;

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            let processed = processed.clone();
            thread::spawn(move || loop {
                match queue.dequeue_timeout(Duration::from_millis(200)) {
                    Ok(_) => {
                        processed.fetch_add(1, Ordering::SeqCst);
                        queue.acknowledge().unwrap();
                    }
                    Err(_) if queue.is_closed() => break,
                    Err(_) => {}
                }
            })
        })
        .collect();

    let mut joiners = Vec::new();
    for i in 0..total {
        queue.enqueue(i).unwrap();
        if i % 1000 == 0 {
            let queue = queue.clone();
            let processed = processed.clone();
            let seen = i as usize + 1;
            joiners.push(thread::spawn(move || {
                queue.join();
                processed.load(Ordering::SeqCst) >= seen
            }));
        }
    }

    queue.join();
    assert_eq!(processed.load(Ordering::SeqCst), total as usize);
    for j in joiners {
        assert!(j.join().unwrap());
    }
    queue.close();
    for c in consumers {
        c.join().unwrap();
    }
}
