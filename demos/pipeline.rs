//! # Demo: steering a pool through signals
//!
//! An external "communicator" object drives the pool entirely through the
//! dispatch layer: one signal queues task batches, one prints announcements,
//! one resizes the pool. The processor wires the batch and resize slots onto
//! its own context during attach; the announcement slot is wired from the
//! outside to show both placements work.
//!
//! Run with: `cargo run --example pipeline`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use signalpool::{
    Controller, DeliveryMode, Executor, PoolControl, Processor, Signal, SlotContext, SlotKey,
    Worker,
};

/// Takes about 100 ms per task, like real work would.
struct SlowAddOne;

impl Worker<i64, i64> for SlowAddOne {
    fn fulfill(&mut self, task: i64) -> i64 {
        thread::sleep(Duration::from_millis(100));
        task + 1
    }

    fn clone_box(&self) -> Box<dyn Worker<i64, i64>> {
        Box::new(SlowAddOne)
    }
}

/// Signals the communicator emits at the processor.
struct Communicator {
    tasks: Signal<Vec<i64>>,
    announce: Signal<String>,
    threads: Signal<usize>,
}

impl Communicator {
    fn new(executor: &Executor) -> Self {
        Self {
            tasks: Signal::new(executor),
            announce: Signal::new(executor),
            threads: Signal::new(executor),
        }
    }
}

/// Prints each result and reports when the first batch is done.
struct PrintProcessor {
    outstanding: usize,
    batch_done: Sender<()>,
    communicator: Arc<Communicator>,
}

impl Processor<i64, i64> for PrintProcessor {
    fn on_result(&mut self, result: i64, _pool: &PoolControl<i64, i64>) {
        println!("result: {result}");
        if self.outstanding > 0 {
            self.outstanding -= 1;
            if self.outstanding == 0 {
                let _ = self.batch_done.send(());
            }
        }
    }

    fn on_attach(&mut self, ctx: &SlotContext, pool: &PoolControl<i64, i64>) {
        let control = pool.clone();
        self.communicator.tasks.connect(
            ctx,
            SlotKey::unique(),
            DeliveryMode::Queued,
            move |batch: &Vec<i64>| {
                control.extend_queue(batch.clone());
            },
        );

        let control = pool.clone();
        self.communicator.threads.connect(
            ctx,
            SlotKey::unique(),
            DeliveryMode::Queued,
            move |count: &usize| {
                println!("-- switching to {count} worker thread(s) --");
                control.set_thread_count(*count);
            },
        );
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let threads = thread::available_parallelism().map_or(2, |n| n.get());
    let host = Executor::spawn("demo-host").expect("spawn host executor");
    let communicator = Arc::new(Communicator::new(&host));
    let (batch_done, batch_rx) = bounded(1);

    let processor = PrintProcessor {
        outstanding: threads * 10,
        batch_done,
        communicator: Arc::clone(&communicator),
    };

    let pool = Controller::new(Box::new(processor), Box::new(SlowAddOne), threads)
        .expect("build pool");

    communicator.announce.connect(
        &pool.processor_context(),
        SlotKey::unique(),
        DeliveryMode::Queued,
        |message: &String| {
            println!("-- {message} --");
        },
    );

    println!("feeding {} tasks to {threads} worker(s)", threads * 10);
    communicator.tasks.emit(&(0..(threads * 10) as i64).collect());

    thread::sleep(Duration::from_secs(2));
    communicator.announce.emit(&"halfway there".to_string());

    batch_rx.recv().expect("batch completion");
    println!("first batch complete");

    // Same tasks again, but on a single worker: visibly slower.
    communicator.threads.emit(&1);
    communicator.tasks.emit(&(0..5).collect());
    thread::sleep(Duration::from_secs(1));

    println!("shutting down with work still queued");
    drop(pool);
    host.quit();
    host.join();
}
