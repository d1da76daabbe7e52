use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use gate::{Cancelled, Gate};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tripwire::Tripwire;

#[tokio::test(start_paused = true)]
async fn bursty_arrivals_wait_bounded_time() {
    const CAPACITY: usize = 1000;
    const NEW_WORKERS_PER_SEC: usize = 1000;
    const TOTAL_WORKERS: usize = 10000;

    let gate = Arc::new(Gate::new(CAPACITY));
    let max_wait = Arc::new(Mutex::new(Duration::ZERO));
    let holding = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::with_capacity(TOTAL_WORKERS);
    for i in 1..=TOTAL_WORKERS {
        // the first two rounds start at once, the rest arrive over time
        if i > NEW_WORKERS_PER_SEC * 2 {
            tokio::time::sleep(Duration::from_secs(1) / NEW_WORKERS_PER_SEC as u32).await;
        }

        let gate = Arc::clone(&gate);
        let max_wait = Arc::clone(&max_wait);
        let holding = Arc::clone(&holding);
        let peak = Arc::clone(&peak);

        workers.push(tokio::spawn(async move {
            let start = Instant::now();
            let turn = gate.turn().await;
            let wait = start.elapsed();

            {
                let mut max_wait = max_wait.lock();
                if wait > *max_wait {
                    *max_wait = wait;
                }
            }

            let now = holding.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_secs(1)).await;

            holding.fetch_sub(1, Ordering::SeqCst);
            drop(turn);
        }));
    }

    for worker in workers {
        worker.await.unwrap();
    }

    let max_wait = *max_wait.lock();
    assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
    // the burst is two rounds deep, so nobody waits for more than two
    // release cycles
    assert!(max_wait >= Duration::from_secs(1), "max wait {max_wait:?}");
    assert!(max_wait <= Duration::from_secs(3), "max wait {max_wait:?}");
    assert_eq!(gate.occupancy(), 0);
    assert_eq!(gate.waiting(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_waiters_keep_others_in_order() {
    const WAITERS: usize = 30;

    let gate = Arc::new(Gate::new(1));
    let first = Arc::clone(&gate).turn_owned().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancelled = Arc::new(AtomicUsize::new(0));
    let mut triggers = Vec::new();
    let mut tasks = Vec::new();

    for index in 0..WAITERS {
        let (trigger, tripwire) = Tripwire::new(format!("waiter-{index}"));
        triggers.push(trigger);

        let waiter_gate = Arc::clone(&gate);
        let tx = tx.clone();
        let cancelled = Arc::clone(&cancelled);
        tasks.push(tokio::spawn(async move {
            match waiter_gate.turn_until(tripwire).await {
                Ok(_turn) => tx.send(index).unwrap(),
                Err(Cancelled) => {
                    cancelled.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));

        // queue strictly one after another
        while gate.waiting() != index + 1 {
            tokio::task::yield_now().await;
        }
    }
    drop(tx);

    // cancel every third waiter, wherever it is in the line
    let mut expected = Vec::new();
    let mut armed = Vec::new();
    for (index, trigger) in triggers.into_iter().enumerate() {
        if index % 3 == 1 {
            trigger.cancel();
        } else {
            expected.push(index);
            armed.push(trigger);
        }
    }

    while cancelled.load(Ordering::SeqCst) != WAITERS / 3 {
        tokio::task::yield_now().await;
    }
    assert_eq!(gate.waiting(), WAITERS - WAITERS / 3);
    assert_eq!(gate.occupancy(), 1);

    drop(first);
    for task in tasks {
        task.await.unwrap();
    }

    let mut order = Vec::new();
    while let Some(index) = rx.recv().await {
        order.push(index);
    }
    assert_eq!(order, expected);
    assert_eq!(gate.occupancy(), 0);

    drop(armed);
}
