//! Integration tests for the scheduler, including the timing-sensitive
//! fixed-rate and cancellation-race properties exercised through manual
//! pool doubles behind the `WorkerPool` seam.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use threadweave::prelude::*;

/// A pool double that collects submitted tasks instead of executing them,
/// standing in for a paused pool.
#[derive(Default)]
struct CollectingPool {
    tasks: Mutex<Vec<Task>>,
}

impl CollectingPool {
    fn run_collected(&self) -> usize {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let count = tasks.len();
        for task in tasks {
            task();
        }
        count
    }

    fn collected(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl WorkerPool for CollectingPool {
    fn submit_task(&self, task: Task) -> Result<()> {
        self.tasks.lock().push(task);
        Ok(())
    }

    fn size(&self) -> usize {
        0
    }

    fn pending_tasks(&self) -> usize {
        self.collected()
    }

    fn wait_for_tasks(&self) {}

    fn shutdown(&self) {}
}

/// A pool double whose first submission stalls, delaying the timer thread
/// past upcoming deadlines.
struct StallingPool {
    submissions: Mutex<Vec<Instant>>,
    stalled: AtomicBool,
    stall: Duration,
}

impl StallingPool {
    fn new(stall: Duration) -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            stalled: AtomicBool::new(false),
            stall,
        }
    }
}

impl WorkerPool for StallingPool {
    fn submit_task(&self, task: Task) -> Result<()> {
        self.submissions.lock().push(Instant::now());
        drop(task);
        if !self.stalled.swap(true, Ordering::SeqCst) {
            std::thread::sleep(self.stall);
        }
        Ok(())
    }

    fn size(&self) -> usize {
        1
    }

    fn pending_tasks(&self) -> usize {
        0
    }

    fn wait_for_tasks(&self) {}

    fn shutdown(&self) {}
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_fixed_rate_catch_up_after_delayed_firing() {
    init_logging();
    // Periodic task every 100ms; the first hand-off stalls the timer
    // thread for 250ms. Fixed-rate scheduling must fire the two overdue
    // deadlines back-to-back instead of shifting the cadence.
    let pool = Arc::new(StallingPool::new(Duration::from_millis(250)));
    let scheduler =
        Scheduler::new(SchedulerProbe(Arc::clone(&pool))).expect("Failed to create scheduler");

    scheduler.schedule_periodic(Duration::from_millis(100), || {});
    std::thread::sleep(Duration::from_millis(450));
    scheduler.shutdown();

    let submissions = pool.submissions.lock();
    assert!(
        submissions.len() >= 4,
        "expected at least 4 firings, got {}",
        submissions.len()
    );

    // Firing 1 happened immediately, then the stall. Firings 2 and 3 cover
    // the overdue 100ms and 200ms deadlines and must be nearly gapless.
    let catch_up_gap = submissions[2].duration_since(submissions[1]);
    assert!(
        catch_up_gap < Duration::from_millis(50),
        "catch-up firings were {}ms apart",
        catch_up_gap.as_millis()
    );
}

/// Newtype so the scheduler owns an `Arc`-shared double.
struct SchedulerProbe(Arc<StallingPool>);

impl WorkerPool for SchedulerProbe {
    fn submit_task(&self, task: Task) -> Result<()> {
        self.0.submit_task(task)
    }
    fn size(&self) -> usize {
        self.0.size()
    }
    fn pending_tasks(&self) -> usize {
        self.0.pending_tasks()
    }
    fn wait_for_tasks(&self) {
        self.0.wait_for_tasks()
    }
    fn shutdown(&self) {
        self.0.shutdown()
    }
}

/// Shared handle to a collecting double usable inside a scheduler.
struct CollectingProbe(Arc<CollectingPool>);

impl WorkerPool for CollectingProbe {
    fn submit_task(&self, task: Task) -> Result<()> {
        self.0.submit_task(task)
    }
    fn size(&self) -> usize {
        self.0.size()
    }
    fn pending_tasks(&self) -> usize {
        self.0.pending_tasks()
    }
    fn wait_for_tasks(&self) {
        self.0.wait_for_tasks()
    }
    fn shutdown(&self) {
        self.0.shutdown()
    }
}

#[test]
fn test_cancel_racing_zero_delay_never_executes_body() {
    // schedule_after(0) then cancel immediately, with a pool that never
    // runs anything on its own. Whether the timer hands the task off
    // before or after the cancel, the body must not run once the flag is
    // set and the collected tasks are finally driven.
    let pool = Arc::new(CollectingPool::default());
    let executed = Arc::new(AtomicUsize::new(0));

    for _ in 0..50 {
        let scheduler = Scheduler::new(CollectingProbe(Arc::clone(&pool)))
            .expect("Failed to create scheduler");

        let executed_clone = Arc::clone(&executed);
        let handle = scheduler.schedule_after(Duration::ZERO, move || {
            executed_clone.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.cancel(&handle);

        // Give the timer thread a chance to process the entry either way.
        std::thread::sleep(Duration::from_millis(20));
        scheduler.shutdown();

        // Drive whatever the timer handed off; the in-task cancellation
        // check must keep the body from running.
        pool.run_collected();
    }

    assert_eq!(executed.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancelled_before_handoff_is_not_submitted() {
    let pool = Arc::new(CollectingPool::default());
    let scheduler =
        Scheduler::new(CollectingProbe(Arc::clone(&pool))).expect("Failed to create scheduler");

    let handle = scheduler.schedule_after(Duration::from_millis(100), || {});
    scheduler.cancel(&handle);

    std::thread::sleep(Duration::from_millis(250));
    scheduler.shutdown();

    // The timer observed the flag before the deadline; nothing was handed
    // to the pool at all.
    assert_eq!(pool.collected(), 0);
}

#[test]
fn test_periodic_cadence_roughly_fixed_rate() {
    let scheduler = ScheduledPool::with_workers(2).expect("Failed to create scheduler");
    let stamps = Arc::new(Mutex::new(Vec::new()));

    let stamps_clone = Arc::clone(&stamps);
    let handle = scheduler.schedule_periodic(Duration::from_millis(50), move || {
        stamps_clone.lock().push(Instant::now());
    });

    std::thread::sleep(Duration::from_millis(400));
    handle.cancel();
    scheduler.shutdown();

    let stamps = stamps.lock();
    assert!(stamps.len() >= 4, "expected several firings, got {}", stamps.len());
    for pair in stamps.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap < Duration::from_millis(200),
            "cadence gap drifted to {}ms",
            gap.as_millis()
        );
    }
}

#[test]
fn test_identical_deadlines_both_fire() {
    let scheduler = ScheduledSharedPool::with_workers(2).expect("Failed to create scheduler");
    let fired = Arc::new(AtomicUsize::new(0));

    let at = Instant::now() + Duration::from_millis(50);
    for _ in 0..2 {
        let fired = Arc::clone(&fired);
        scheduler.schedule_at(at, move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    scheduler.shutdown();
}

#[test]
fn test_scheduler_over_both_pool_types() {
    let fired = Arc::new(AtomicUsize::new(0));

    let stealing = ScheduledPool::with_workers(2).expect("Failed to create scheduler");
    let fired_clone = Arc::clone(&fired);
    stealing.schedule_after(Duration::from_millis(10), move || {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    });

    let shared = ScheduledSharedPool::with_workers(2).expect("Failed to create scheduler");
    let fired_clone = Arc::clone(&fired);
    shared.schedule_after(Duration::from_millis(10), move || {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    });

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    stealing.shutdown();
    shared.shutdown();
}

#[test]
fn test_shutdown_swallows_pool_stopped_race() {
    // Shut the owned pool down under the scheduler, then let a due entry
    // fire: the timer thread must survive the failed hand-off and shut
    // down cleanly.
    let scheduler = ScheduledPool::with_workers(1).expect("Failed to create scheduler");
    scheduler.pool().shutdown();

    scheduler.schedule_after(Duration::from_millis(10), || {});
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(scheduler.scheduled_count(), 0);
    scheduler.shutdown();
}

#[test]
fn test_handle_outlives_entry() {
    let scheduler = ScheduledPool::with_workers(1).expect("Failed to create scheduler");
    let handle = scheduler.schedule_after(Duration::from_millis(10), || {});

    std::thread::sleep(Duration::from_millis(150));
    // Entry consumed long ago; cancelling the stale handle is still safe.
    handle.cancel();
    assert!(handle.is_cancelled());
    scheduler.shutdown();
}

#[test]
fn test_many_entries_fire_in_deadline_order_on_collector() {
    let pool = Arc::new(CollectingPool::default());
    let scheduler =
        Scheduler::new(CollectingProbe(Arc::clone(&pool))).expect("Failed to create scheduler");

    for i in 0..5u64 {
        scheduler.schedule_after(Duration::from_millis(10 * (5 - i)), || {});
    }
    assert_eq!(scheduler.scheduled_count(), 5);

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(scheduler.scheduled_count(), 0);
    assert_eq!(pool.collected(), 5);
    scheduler.shutdown();
}
