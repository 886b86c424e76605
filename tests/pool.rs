//! Pool behavior: assignment, resizing, clearing, and bookkeeping.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use signalpool::{Controller, PoolControl, PoolStats, Processor, Worker};

/// Worker returning `task + 1`.
struct AddOne;

impl Worker<u64, u64> for AddOne {
    fn fulfill(&mut self, task: u64) -> u64 {
        task + 1
    }

    fn clone_box(&self) -> Box<dyn Worker<u64, u64>> {
        Box::new(AddOne)
    }
}

/// Worker echoing the task back after a fixed delay.
struct SlowEcho {
    delay: Duration,
}

impl Worker<u64, u64> for SlowEcho {
    fn fulfill(&mut self, task: u64) -> u64 {
        thread::sleep(self.delay);
        task
    }

    fn clone_box(&self) -> Box<dyn Worker<u64, u64>> {
        Box::new(SlowEcho { delay: self.delay })
    }
}

/// Processor forwarding every result to the test thread.
struct Collect {
    tx: Sender<u64>,
}

impl Processor<u64, u64> for Collect {
    fn on_result(&mut self, result: u64, _pool: &PoolControl<u64, u64>) {
        let _ = self.tx.send(result);
    }
}

fn collect_n(rx: &Receiver<u64>, n: usize) -> Vec<u64> {
    (0..n)
        .map(|_| {
            rx.recv_timeout(Duration::from_secs(10))
                .expect("result within timeout")
        })
        .collect()
}

fn assert_silent(rx: &Receiver<u64>, window: Duration) {
    assert!(
        rx.recv_timeout(window).is_err(),
        "unexpected extra completion"
    );
}

fn wait_for_stats(
    control: &PoolControl<u64, u64>,
    accept: impl Fn(PoolStats) -> bool,
) -> PoolStats {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        let stats = control.stats();
        if accept(stats) || std::time::Instant::now() > deadline {
            return stats;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn identity_pool_completes_every_task() {
    let (tx, rx) = unbounded();
    let pool = Controller::new(Box::new(Collect { tx }), Box::new(AddOne), 2).unwrap();

    pool.control().extend_queue(vec![0, 1, 2, 3, 4]);

    let mut results = collect_n(&rx, 5);
    results.sort_unstable();
    assert_eq!(results, vec![1, 2, 3, 4, 5]);
    assert_silent(&rx, Duration::from_millis(100));
}

#[test]
fn no_task_is_lost_under_steady_state() {
    let (tx, rx) = unbounded();
    let pool = Controller::new(Box::new(Collect { tx }), Box::new(AddOne), 3).unwrap();
    let control = pool.control();

    control.extend_queue((0..50).collect());

    let mut results = collect_n(&rx, 50);
    results.sort_unstable();
    assert_eq!(results, (1..=50).collect::<Vec<_>>());
    assert_silent(&rx, Duration::from_millis(100));

    let stats = wait_for_stats(&control, |s| s.ready == s.workers && s.pending == 0);
    assert_eq!(
        stats,
        PoolStats {
            workers: 3,
            ready: 3,
            pending: 0
        }
    );
}

#[test]
fn resize_to_zero_pauses_and_resume_finishes() {
    let (tx, rx) = unbounded();
    let worker = SlowEcho {
        delay: Duration::from_millis(5),
    };
    let pool = Controller::new(Box::new(Collect { tx }), Box::new(worker), 4).unwrap();
    let control = pool.control();

    control.extend_queue((0..20).collect());
    let mut seen = collect_n(&rx, 5);

    // Stop every worker; in-flight tasks still finish during the join.
    control.set_thread_count(0);
    while let Ok(result) = rx.recv_timeout(Duration::from_millis(100)) {
        seen.push(result);
    }

    // With zero workers nothing more completes.
    assert_silent(&rx, Duration::from_millis(150));
    let paused = control.stats();
    assert_eq!(paused.workers, 0);
    assert_eq!(paused.ready, 0);
    assert_eq!(paused.pending, 20 - seen.len());

    control.set_thread_count(4);
    seen.extend(collect_n(&rx, 20 - seen.len()));
    seen.sort_unstable();
    assert_eq!(seen, (0..20).collect::<Vec<_>>());
    assert_silent(&rx, Duration::from_millis(100));
}

#[test]
fn clear_queue_drops_only_unassigned_tasks() {
    let (tx, rx) = unbounded();
    let worker = SlowEcho {
        delay: Duration::from_millis(10),
    };
    let pool = Controller::new(Box::new(Collect { tx }), Box::new(worker), 1).unwrap();
    let control = pool.control();

    control.extend_queue((0..100).collect());
    thread::sleep(Duration::from_millis(35));
    control.clear_queue();

    // Clearing at ~35ms with 10ms tasks leaves three or four completions
    // plus at most one task that was already in flight; fewer would mean
    // the clear aborted dispatched work, more that it left queued tasks
    // behind.
    let mut completions = 0;
    while rx.recv_timeout(Duration::from_millis(300)).is_ok() {
        completions += 1;
    }
    assert!(
        (2..=5).contains(&completions),
        "expected between 2 and 5 completions, got {completions}"
    );
    assert_eq!(control.stats().pending, 0);
    assert_silent(&rx, Duration::from_millis(150));
}

#[test]
fn retired_worker_notifications_are_discarded() {
    let (tx, rx) = unbounded();
    let worker = SlowEcho {
        delay: Duration::from_millis(50),
    };
    let pool = Controller::new(Box::new(Collect { tx }), Box::new(worker), 1).unwrap();
    let control = pool.control();

    control.extend_queue(vec![1, 2, 3]);
    thread::sleep(Duration::from_millis(10));

    // Retire the worker while its task is in flight. Its ready notification
    // arrives after the shrink and must be ignored; the pending tasks wait
    // for the regrow instead of being double-assigned.
    control.set_thread_count(0);
    assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
    let paused = control.stats();
    assert_eq!(paused.workers, 0);
    assert_eq!(paused.pending, 2);

    control.set_thread_count(2);
    let mut rest = collect_n(&rx, 2);
    rest.sort_unstable();
    assert_eq!(rest, vec![2, 3]);
    assert_silent(&rx, Duration::from_millis(150));
}

/// Processor that steers the pool from inside `on_result`: the first result
/// grows the pool and enqueues one extra task.
struct Steering {
    tx: Sender<u64>,
    steered: bool,
}

impl Processor<u64, u64> for Steering {
    fn on_result(&mut self, result: u64, pool: &PoolControl<u64, u64>) {
        if !self.steered {
            self.steered = true;
            pool.set_thread_count(3);
            pool.extend_queue(vec![100]);
        }
        let _ = self.tx.send(result);
    }
}

#[test]
fn processor_can_steer_the_pool_from_on_result() {
    let (tx, rx) = unbounded();
    let pool = Controller::new(
        Box::new(Steering { tx, steered: false }),
        Box::new(AddOne),
        1,
    )
    .unwrap();
    let control = pool.control();

    control.extend_queue(vec![1, 2]);

    let mut results = collect_n(&rx, 3);
    results.sort_unstable();
    assert_eq!(results, vec![2, 3, 101]);

    let stats = wait_for_stats(&control, |s| s.workers == 3 && s.ready == 3);
    assert_eq!(stats.workers, 3);
}

#[test]
fn zero_thread_pool_holds_tasks_until_grown() {
    let (tx, rx) = unbounded();
    let pool = Controller::new(Box::new(Collect { tx }), Box::new(AddOne), 0).unwrap();
    let control = pool.control();

    control.extend_queue(vec![1, 2, 3]);
    assert_silent(&rx, Duration::from_millis(150));
    assert_eq!(control.stats().pending, 3);

    control.set_thread_count(1);
    let mut results = collect_n(&rx, 3);
    results.sort_unstable();
    assert_eq!(results, vec![2, 3, 4]);
}
