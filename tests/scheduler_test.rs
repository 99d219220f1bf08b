//! Integration tests for delayed and periodic scheduling

use prometheus_worker_pool::config::WorkerPoolConfig;
use prometheus_worker_pool::core::{Cadence, PoolError, TaskContext, WorkerPool};
use prometheus_worker_pool::util::TaskState;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn pool(workers: usize) -> WorkerPool {
    WorkerPool::new(WorkerPoolConfig::fixed(workers, 64)).expect("Failed to create pool")
}

#[test]
fn test_schedule_once_fires_after_delay() {
    println!("\n=== test_schedule_once_fires_after_delay ===");

    let pool = pool(2);
    let start = Instant::now();
    let handle = pool
        .schedule_once(move |_| Ok(start.elapsed()), Duration::from_millis(100))
        .expect("Failed to schedule");
    assert_eq!(handle.cadence(), Cadence::Once);
    assert_eq!(pool.stats().scheduled_tasks, 1);

    let fired_after = handle.get().expect("Scheduled task failed");
    println!("Fired after {fired_after:?}");
    assert!(fired_after >= Duration::from_millis(100));
    assert_eq!(pool.stats().scheduled_tasks, 0);
    println!("=== test_schedule_once_fires_after_delay PASSED ===\n");
}

#[test]
fn test_equal_fire_times_keep_insertion_order() {
    println!("\n=== test_equal_fire_times_keep_insertion_order ===");

    let pool = pool(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<_> = (0..5)
        .map(|i| {
            let order = Arc::clone(&order);
            pool.schedule_once(
                move |_| {
                    order.lock().unwrap().push(i);
                    Ok(())
                },
                Duration::from_millis(50),
            )
            .expect("Failed to schedule")
        })
        .collect();
    for handle in &handles {
        handle.get().expect("Scheduled task failed");
    }
    // Delays are computed per call, so later entries are never earlier.
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    println!("=== test_equal_fire_times_keep_insertion_order PASSED ===\n");
}

#[test]
fn test_cancel_before_fire() {
    println!("\n=== test_cancel_before_fire ===");

    let pool = pool(1);
    let fired = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&fired);
    let handle = pool
        .schedule_once(
            move |_| {
                f.store(true, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(100),
        )
        .expect("Failed to schedule");

    assert!(handle.cancel(false));
    assert!(handle.is_cancelled());
    assert_eq!(pool.stats().scheduled_tasks, 0);

    thread::sleep(Duration::from_millis(200));
    assert!(!fired.load(Ordering::SeqCst));
    assert!(matches!(handle.get(), Err(PoolError::Cancelled)));
    println!("=== test_cancel_before_fire PASSED ===\n");
}

#[test]
fn test_fixed_rate_fires_on_schedule() {
    println!("\n=== test_fixed_rate_fires_on_schedule ===");

    let pool = pool(2);
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let handle = pool
        .schedule_at_fixed_rate(
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Duration::ZERO,
            Duration::from_millis(100),
        )
        .expect("Failed to schedule");

    thread::sleep(Duration::from_millis(1050));
    assert!(handle.cancel(false));
    let fired = count.load(Ordering::SeqCst);
    println!("Fired {fired} times in 1050ms");
    // Firings at 0, 100, ..., 1000 ms.
    assert!((10..=11).contains(&fired), "unexpected firing count {fired}");

    thread::sleep(Duration::from_millis(250));
    assert_eq!(count.load(Ordering::SeqCst), fired, "Cancelled schedule kept firing");
    assert_eq!(handle.state(), TaskState::Cancelled);
    println!("=== test_fixed_rate_fires_on_schedule PASSED ===\n");
}

#[test]
fn test_fixed_rate_overrun_fires_back_to_back() {
    println!("\n=== test_fixed_rate_overrun_fires_back_to_back ===");

    let pool = pool(4);
    let running = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let starts = Arc::new(Mutex::new(Vec::new()));

    let (r, o, s) = (Arc::clone(&running), Arc::clone(&overlaps), Arc::clone(&starts));
    let handle = pool
        .schedule_at_fixed_rate(
            move |_| {
                if r.swap(true, Ordering::SeqCst) {
                    o.fetch_add(1, Ordering::SeqCst);
                }
                s.lock().unwrap().push(Instant::now());
                thread::sleep(Duration::from_millis(250));
                r.store(false, Ordering::SeqCst);
                Ok(())
            },
            Duration::ZERO,
            Duration::from_millis(100),
        )
        .expect("Failed to schedule");

    thread::sleep(Duration::from_millis(1100));
    handle.cancel(false);
    thread::sleep(Duration::from_millis(300));

    let starts = starts.lock().unwrap();
    println!("Fired {} times", starts.len());
    // Starts near 0, 250, 500, 750 and 1000 ms.
    assert!((4..=5).contains(&starts.len()), "unexpected firing count {}", starts.len());
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        // Every tick is overdue, so the next firing starts as soon as the last ends.
        assert!(gap >= Duration::from_millis(250), "firings overlapped: {gap:?}");
        assert!(gap < Duration::from_millis(340), "overdue tick was delayed: {gap:?}");
    }
    println!("=== test_fixed_rate_overrun_fires_back_to_back PASSED ===\n");
}

#[test]
fn test_fixed_rate_catches_up_missed_ticks() {
    println!("\n=== test_fixed_rate_catches_up_missed_ticks ===");

    let pool = pool(2);
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let handle = pool
        .schedule_at_fixed_rate(
            move |_| {
                // The first two firings overrun; the rest are instant.
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    thread::sleep(Duration::from_millis(250));
                }
                Ok(())
            },
            Duration::ZERO,
            Duration::from_millis(100),
        )
        .expect("Failed to schedule");

    thread::sleep(Duration::from_millis(1050));
    assert!(handle.cancel(false));
    let fired = count.load(Ordering::SeqCst);
    println!("Fired {fired} times in 1050ms");
    // Ticks 200..500 ms fire back to back at 500 ms, so none of 0..=1000 is lost.
    assert!((10..=11).contains(&fired), "unexpected firing count {fired}");
    println!("=== test_fixed_rate_catches_up_missed_ticks PASSED ===\n");
}

#[test]
fn test_overrunning_firings_stay_registered_as_running() {
    println!("\n=== test_overrunning_firings_stay_registered_as_running ===");

    let pool = pool(4);
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
    let handle = pool
        .schedule_at_fixed_rate(
            move |_| {
                s.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(3));
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Duration::ZERO,
            Duration::from_micros(100),
        )
        .expect("Failed to schedule");

    let deadline = Instant::now() + Duration::from_secs(1);
    let (mut samples, mut unregistered) = (0usize, 0usize);
    while Instant::now() < deadline {
        let before = (started.load(Ordering::SeqCst), finished.load(Ordering::SeqCst));
        let active = pool.stats().active_tasks;
        let after = (started.load(Ordering::SeqCst), finished.load(Ordering::SeqCst));
        // Only count samples taken entirely inside one firing's body.
        if before == after && before.0 > before.1 {
            samples += 1;
            if active == 0 {
                unregistered += 1;
            }
        }
    }
    handle.cancel(false);

    println!("Samples inside a firing: {samples}, unregistered: {unregistered}");
    assert!(samples > 0);
    assert_eq!(unregistered, 0);
    assert!(pool.close(Duration::from_secs(5)));
    println!("=== test_overrunning_firings_stay_registered_as_running PASSED ===\n");
}

#[test]
fn test_fixed_delay_never_overlaps() {
    println!("\n=== test_fixed_delay_never_overlaps ===");

    let pool = pool(4);
    let running = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let starts = Arc::new(Mutex::new(Vec::new()));

    let (r, o, s) = (Arc::clone(&running), Arc::clone(&overlaps), Arc::clone(&starts));
    let handle = pool
        .schedule_with_fixed_delay(
            move |_| {
                if r.swap(true, Ordering::SeqCst) {
                    o.fetch_add(1, Ordering::SeqCst);
                }
                s.lock().unwrap().push(Instant::now());
                thread::sleep(Duration::from_millis(30));
                r.store(false, Ordering::SeqCst);
                Ok(())
            },
            Duration::ZERO,
            Duration::from_millis(20),
        )
        .expect("Failed to schedule");

    thread::sleep(Duration::from_millis(400));
    handle.cancel(false);

    let starts = starts.lock().unwrap();
    println!("Fired {} times", starts.len());
    assert!(starts.len() >= 3);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    for pair in starts.windows(2) {
        // 30ms of work plus 20ms of delay between consecutive starts.
        assert!(pair[1] - pair[0] >= Duration::from_millis(50));
    }
    println!("=== test_fixed_delay_never_overlaps PASSED ===\n");
}

#[test]
fn test_failing_periodic_task_stops_schedule() {
    println!("\n=== test_failing_periodic_task_stops_schedule ===");

    let pool = pool(1);
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let handle = pool
        .schedule_at_fixed_rate(
            move |_| {
                if c.fetch_add(1, Ordering::SeqCst) == 2 {
                    anyhow::bail!("third firing fails");
                }
                Ok(())
            },
            Duration::ZERO,
            Duration::from_millis(10),
        )
        .expect("Failed to schedule");

    assert!(matches!(handle.get(), Err(PoolError::TaskFailed(_))));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert_eq!(pool.stats().scheduled_tasks, 0);
    println!("=== test_failing_periodic_task_stops_schedule PASSED ===\n");
}

#[test]
fn test_periodic_task_stops_itself_with_cancel_marker() {
    println!("\n=== test_periodic_task_stops_itself_with_cancel_marker ===");

    let pool = pool(1);
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let handle = pool
        .schedule_with_fixed_delay(
            move |ctx: &TaskContext| {
                if c.fetch_add(1, Ordering::SeqCst) == 4 {
                    ctx.token().cancel();
                }
                ctx.checkpoint()?;
                Ok(())
            },
            Duration::ZERO,
            Duration::from_millis(5),
        )
        .expect("Failed to schedule");

    assert!(matches!(handle.get(), Err(PoolError::Cancelled)));
    assert_eq!(count.load(Ordering::SeqCst), 5);
    println!("=== test_periodic_task_stops_itself_with_cancel_marker PASSED ===\n");
}

#[test]
fn test_zero_period_is_invalid() {
    let pool = pool(1);
    let err = pool
        .schedule_at_fixed_rate(|_| Ok(()), Duration::ZERO, Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, PoolError::InvalidArgument(_)));
    let err = pool
        .schedule_with_fixed_delay(|_| Ok(()), Duration::ZERO, Duration::ZERO)
        .unwrap_err();
    assert!(matches!(err, PoolError::InvalidArgument(_)));
}

#[test]
fn test_shutdown_cancels_pending_entries() {
    println!("\n=== test_shutdown_cancels_pending_entries ===");

    let pool = pool(1);
    let once = pool
        .schedule_once(|_| Ok(1), Duration::from_secs(60))
        .expect("Failed to schedule");
    let periodic = pool
        .schedule_at_fixed_rate(|_| Ok(()), Duration::from_secs(60), Duration::from_secs(1))
        .expect("Failed to schedule");
    assert_eq!(pool.stats().scheduled_tasks, 2);

    pool.shutdown();
    assert!(once.is_cancelled());
    assert!(periodic.is_cancelled());
    assert!(pool.await_termination(Duration::from_secs(5)));

    let err = pool.schedule_once(|_| Ok(2), Duration::ZERO).unwrap_err();
    assert!(err.is_rejected());
    println!("=== test_shutdown_cancels_pending_entries PASSED ===\n");
}
