//! Scheduler backend behavior tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aerogate_sdk::schedule::{LoopScheduler, PoolScheduler, Scheduler};

#[test]
fn loop_scheduler_preserves_single_poster_order() {
    let scheduler = Arc::new(LoopScheduler::new().expect("loop scheduler"));
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..100usize {
        let order = Arc::clone(&order);
        scheduler.post(Box::pin(async move {
            order.lock().unwrap().push(i);
        }));
    }
    {
        let scheduler = Arc::clone(&scheduler);
        let stopper = Arc::clone(&scheduler);
        scheduler.post(Box::pin(async move {
            stopper.stop();
        }));
    }

    scheduler.run();

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, (0..100).collect::<Vec<_>>());
}

#[test]
fn loop_scheduler_tasks_only_progress_inside_run() {
    let scheduler = Arc::new(LoopScheduler::new().expect("loop scheduler"));
    let ran = Arc::new(AtomicUsize::new(0));

    {
        let ran = Arc::clone(&ran);
        let stopper = Arc::clone(&scheduler);
        scheduler.post(Box::pin(async move {
            ran.fetch_add(1, Ordering::SeqCst);
            stopper.stop();
        }));
    }

    std::thread::sleep(std::time::Duration::from_millis(100));
    assert_eq!(ran.load(Ordering::SeqCst), 0, "task ran outside the loop");

    scheduler.run();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn pool_scheduler_runs_until_stopped() {
    let scheduler = Arc::new(PoolScheduler::with_workers(2).expect("pool scheduler"));
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let done = Arc::clone(&done);
        let stopper = Arc::clone(&scheduler);
        scheduler.post(Box::pin(async move {
            if done.fetch_add(1, Ordering::SeqCst) + 1 == 10 {
                stopper.stop();
            }
        }));
    }

    scheduler.run();
    assert_eq!(done.load(Ordering::SeqCst), 10);
}

#[test]
fn stop_before_run_returns_immediately() {
    let scheduler = LoopScheduler::new().expect("loop scheduler");
    scheduler.stop();
    scheduler.run();
    // Idempotent.
    scheduler.stop();
}

#[test]
fn panicking_task_is_contained() {
    let scheduler = Arc::new(PoolScheduler::with_workers(1).expect("pool scheduler"));
    let survived = Arc::new(AtomicUsize::new(0));

    scheduler.post(Box::pin(async {
        panic!("task fault");
    }));
    {
        let survived = Arc::clone(&survived);
        let stopper = Arc::clone(&scheduler);
        scheduler.post(Box::pin(async move {
            survived.fetch_add(1, Ordering::SeqCst);
            stopper.stop();
        }));
    }

    scheduler.run();
    assert_eq!(
        survived.load(Ordering::SeqCst),
        1,
        "scheduler must outlive a panicking task"
    );
}
