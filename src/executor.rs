//! # Executor: a per-thread FIFO event loop.
//!
//! An [`Executor`] owns one dedicated OS thread that drains closures from an
//! unbounded channel, strictly in submission order. Everything in this crate
//! that "lives on a thread" — slot contexts, the processor, every worker —
//! is pinned to an executor, and all cross-thread traffic is expressed as
//! closures delivered to one.
//!
//! ## Architecture
//! ```text
//! submit(f) ──► [ unbounded FIFO channel ] ──► loop {
//!                                                 recv closure
//!                                                 catch_unwind(closure)
//!                                                 quit requested? → drain rest, exit
//!                                               }
//! ```
//!
//! ## Rules
//! - Closures on one executor run **one at a time**, in submission order.
//! - [`Executor::quit`] is drain-then-exit: closures already queued still
//!   run, new submissions are rejected. This is what makes shrinking a pool
//!   lose no already-dispatched work.
//! - A panicking closure does not take the loop down: the payload goes to
//!   the [`PanicHandler`] (or a `tracing` error record) and the loop moves
//!   on to the next closure.
//! - [`Executor::pump`] may only meaningfully be called from inside a
//!   running closure; it drains closures that are already queued behind the
//!   current one. It is the escape hatch a teardown sequence needs when it
//!   must wait for another thread that may itself be blocked on this one.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::Error;

/// Handler invoked with the payload of a panic caught in an executor loop.
pub type PanicHandler = Arc<dyn Fn(Box<dyn Any + Send>) + Send + Sync>;

enum Message {
    Run(Box<dyn FnOnce() + Send>),
    Wake,
}

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

struct CurrentExecutor {
    id: u64,
    name: String,
    rx: Receiver<Message>,
    panic_handler: Option<PanicHandler>,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentExecutor>> = const { RefCell::new(None) };
}

struct ExecInner {
    id: u64,
    name: String,
    tx: Sender<Message>,
    quit: AtomicBool,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    panic_handler: Option<PanicHandler>,
}

/// A cheaply cloneable handle to one event-loop thread.
///
/// All clones refer to the same loop; dropping the handles does not stop the
/// thread. Call [`quit`](Executor::quit) followed by [`join`](Executor::join)
/// to shut it down.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecInner>,
}

impl Executor {
    /// Spawns a new executor thread with the given name.
    pub fn spawn(name: impl Into<String>) -> Result<Self, Error> {
        Self::spawn_with(name, None)
    }

    /// Spawns a new executor thread with a panic handler for its closures.
    pub fn spawn_with(
        name: impl Into<String>,
        panic_handler: Option<PanicHandler>,
    ) -> Result<Self, Error> {
        let name = name.into();
        let (tx, rx) = unbounded();
        let inner = Arc::new(ExecInner {
            id: NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed),
            name: name.clone(),
            tx,
            quit: AtomicBool::new(false),
            handle: Mutex::new(None),
            panic_handler,
        });

        let loop_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(loop_inner, rx))
            .map_err(|source| Error::Spawn { name, source })?;
        *inner.handle.lock() = Some(handle);

        Ok(Self { inner })
    }

    /// The name this executor's thread was spawned with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queues a closure for execution on this executor.
    ///
    /// Returns `false` once [`quit`](Executor::quit) has been requested or
    /// the loop has exited; the closure is dropped in that case.
    pub fn submit<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.inner.quit.load(Ordering::Acquire) {
            return false;
        }
        self.inner.tx.send(Message::Run(Box::new(f))).is_ok()
    }

    /// Requests shutdown.
    ///
    /// Closures already queued still run; subsequent [`submit`](Executor::submit)
    /// calls are rejected. Returns immediately — pair with
    /// [`join`](Executor::join) to wait for the thread.
    pub fn quit(&self) {
        self.inner.quit.store(true, Ordering::Release);
        let _ = self.inner.tx.send(Message::Wake);
    }

    /// Waits for the executor thread to exit. A no-op on second call.
    pub fn join(&self) {
        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Whether the executor thread has exited (or was already joined).
    pub fn is_finished(&self) -> bool {
        self.inner
            .handle
            .lock()
            .as_ref()
            .map_or(true, |h| h.is_finished())
    }

    /// Whether the calling thread is this executor's loop thread.
    pub fn is_current(&self) -> bool {
        CURRENT.with(|c| {
            c.borrow()
                .as_ref()
                .map_or(false, |cur| cur.id == self.inner.id)
        })
    }

    /// Runs closures already queued on the *current* executor.
    ///
    /// Intended to be called from inside a running closure; does nothing on
    /// a thread that is not an executor loop. Closures queued while pumping
    /// are drained as well.
    pub fn pump() {
        let pumped = CURRENT.with(|c| {
            c.borrow().as_ref().map(|cur| {
                (
                    cur.rx.clone(),
                    cur.name.clone(),
                    cur.panic_handler.clone(),
                )
            })
        });
        let Some((rx, name, panic_handler)) = pumped else {
            return;
        };
        while let Ok(message) = rx.try_recv() {
            if let Message::Run(f) = message {
                run_guarded(&name, panic_handler.as_ref(), f);
            }
        }
    }
}

fn run_loop(inner: Arc<ExecInner>, rx: Receiver<Message>) {
    CURRENT.with(|c| {
        *c.borrow_mut() = Some(CurrentExecutor {
            id: inner.id,
            name: inner.name.clone(),
            rx: rx.clone(),
            panic_handler: inner.panic_handler.clone(),
        })
    });
    debug!(executor = %inner.name, "executor loop started");

    loop {
        match rx.recv() {
            Ok(Message::Run(f)) => run_guarded(&inner.name, inner.panic_handler.as_ref(), f),
            Ok(Message::Wake) => {}
            Err(_) => break,
        }
        if inner.quit.load(Ordering::Acquire) {
            break;
        }
    }

    // Finish closures that were queued before the quit request landed.
    while let Ok(message) = rx.try_recv() {
        if let Message::Run(f) = message {
            run_guarded(&inner.name, inner.panic_handler.as_ref(), f);
        }
    }

    CURRENT.with(|c| *c.borrow_mut() = None);
    debug!(executor = %inner.name, "executor loop exited");
}

fn run_guarded(name: &str, panic_handler: Option<&PanicHandler>, f: Box<dyn FnOnce() + Send>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        match panic_handler {
            Some(handler) => handler(payload),
            None => error!(
                executor = %name,
                panic = panic_message(payload.as_ref()),
                "closure panicked in executor loop"
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn runs_closures_in_submission_order() {
        let exec = Executor::spawn("order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..64 {
            let seen = Arc::clone(&seen);
            assert!(exec.submit(move || seen.lock().push(i)));
        }
        exec.quit();
        exec.join();
        assert_eq!(*seen.lock(), (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn quit_drains_pending_closures() {
        let exec = Executor::spawn("drain").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        // Park the loop so everything below is still queued when quit lands.
        exec.submit(|| thread::sleep(Duration::from_millis(30)));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            exec.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        exec.quit();
        exec.join();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn submit_after_quit_is_rejected() {
        let exec = Executor::spawn("rejected").unwrap();
        exec.quit();
        exec.join();
        assert!(!exec.submit(|| {}));
    }

    #[test]
    fn is_current_only_on_loop_thread() {
        let exec = Executor::spawn("current").unwrap();
        assert!(!exec.is_current());
        let (tx, rx) = crossbeam_channel::bounded(1);
        let probe = exec.clone();
        exec.submit(move || {
            tx.send(probe.is_current()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
        exec.quit();
        exec.join();
    }

    #[test]
    fn pump_runs_closures_queued_behind_the_current_one() {
        let exec = Executor::spawn("pump").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = crossbeam_channel::bounded(1);
        {
            let counter = Arc::clone(&counter);
            exec.submit(move || {
                // The closure below is queued behind us; pump runs it now.
                thread::sleep(Duration::from_millis(20));
                Executor::pump();
                tx.send(counter.load(Ordering::SeqCst)).unwrap();
            });
        }
        {
            let counter = Arc::clone(&counter);
            exec.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
        exec.quit();
        exec.join();
    }

    #[test]
    fn panics_are_routed_to_the_handler() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handler: PanicHandler = Arc::new(move |payload| {
            let message = payload
                .downcast_ref::<&'static str>()
                .copied()
                .unwrap_or("?");
            let _ = tx.send(message.to_string());
        });
        let exec = Executor::spawn_with("panicky", Some(handler)).unwrap();
        let survived = Arc::new(AtomicUsize::new(0));
        exec.submit(|| panic!("boom"));
        {
            let survived = Arc::clone(&survived);
            exec.submit(move || {
                survived.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "boom");
        exec.quit();
        exec.join();
        assert_eq!(survived.load(Ordering::SeqCst), 1);
    }
}
