//! # Demo: Collatz stopping times with signal-relayed results
//!
//! Workers compute the total stopping time of the Collatz sequence for each
//! task. Instead of printing directly, the processor re-emits every result
//! through a signal of its own, and that signal is chained to a second one
//! whose slot does the printing — the same fan-out shape an application
//! uses to route pool results into its existing signal graph.
//!
//! The processor also steers the pool as the run progresses: after
//! `RESIZE_AT` results it shrinks to a single worker, and at `CLEAR_AT`
//! it drops whatever is still queued — both from inside `on_result`,
//! through the control handle every result arrives with.
//!
//! Run with: `cargo run --example collatz`

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};
use signalpool::{
    Controller, DeliveryMode, Executor, PoolControl, Processor, Signal, SlotContext, SlotKey,
    Worker,
};

/// `(n, total stopping time, instant the worker finished)`.
type CollatzResult = (u64, u32, Instant);

/// Results after which the pool shrinks to one worker.
const RESIZE_AT: usize = 10;
/// Results after which the remaining queue is dropped.
const CLEAR_AT: usize = 20;

struct CollatzWorker;

impl Worker<u64, CollatzResult> for CollatzWorker {
    fn fulfill(&mut self, task: u64) -> CollatzResult {
        // Pace the run so the mid-run steering below has a queue to act on.
        thread::sleep(Duration::from_millis(10));
        let mut n = task;
        let mut steps = 1u32;
        while n > 1 {
            if n % 2 == 1 {
                n = 3 * n + 1;
            } else {
                n /= 2;
            }
            steps += 1;
        }
        (task, steps, Instant::now())
    }

    fn clone_box(&self) -> Box<dyn Worker<u64, CollatzResult>> {
        Box::new(CollatzWorker)
    }
}

/// Re-emits results through its own signal, counts down the batch, and
/// steers the pool at the two thresholds above.
struct CollatzProcessor {
    results: Arc<Signal<CollatzResult>>,
    completed: usize,
    outstanding: usize,
    all_done: Sender<()>,
}

impl Processor<u64, CollatzResult> for CollatzProcessor {
    fn on_result(&mut self, result: CollatzResult, pool: &PoolControl<u64, CollatzResult>) {
        self.results.emit(&result);
        self.completed += 1;
        self.outstanding = self.outstanding.saturating_sub(1);

        if self.completed == RESIZE_AT {
            println!("-- {RESIZE_AT} results in, shrinking to one worker --");
            pool.set_thread_count(1);
        }
        if self.completed == CLEAR_AT {
            let pending = pool.stats().pending;
            pool.clear_queue();
            println!("-- {CLEAR_AT} results in, dropping {pending} queued tasks --");
            self.outstanding = self.outstanding.saturating_sub(pending);
        }

        if self.outstanding == 0 {
            let _ = self.all_done.try_send(());
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let host = Executor::spawn("collatz-host").expect("spawn host executor");
    let (all_done, done_rx) = bounded(1);

    let tasks: Vec<u64> = (1..=40).collect();
    let results: Arc<Signal<CollatzResult>> = Arc::new(Signal::new(&host));

    // results ──chain──► relay ──slot──► println, on the host executor.
    let relay: Signal<CollatzResult> = Signal::new(&host);
    results.chain(&relay, DeliveryMode::Auto);

    let printer = SlotContext::new(&host);
    relay.connect(
        &printer,
        SlotKey::unique(),
        DeliveryMode::Auto,
        |&(n, steps, produced_at): &CollatzResult| {
            let transmission = produced_at.elapsed();
            println!("total stopping time of {n}: {steps} (relayed in {transmission:?})");
        },
    );

    let processor = CollatzProcessor {
        results: Arc::clone(&results),
        completed: 0,
        outstanding: tasks.len(),
        all_done,
    };

    let pool = Controller::new(
        Box::new(processor),
        Box::new(CollatzWorker),
        std::thread::available_parallelism().map_or(2, |n| n.get()),
    )
    .expect("build pool");

    pool.control().extend_queue(tasks);
    done_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("all results");

    // Give the relayed prints a moment to drain before teardown.
    thread::sleep(Duration::from_millis(100));
    drop(pool);
    host.quit();
    host.join();
}
