//! # Delivery modes and the raw cross-executor invocation primitive.
//!
//! [`invoke_in_context`] runs a closure in the event loop of a given
//! [`Executor`] under one of four [`DeliveryMode`]s. Signals build their
//! per-connection invokers on top of it, and the pool uses it directly for
//! its internal traffic; host applications may do the same when they want a
//! one-off cross-thread call without setting up a connection.

use crossbeam_channel::bounded;

use crate::executor::Executor;

/// How a slot invocation crosses (or does not cross) executors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Invoke synchronously on the calling thread, whatever it is.
    Direct,
    /// Queue on the receiver's executor and return immediately.
    Queued,
    /// Queue on the receiver's executor and block until it has executed.
    ///
    /// Aiming this at the calling executor itself would deadlock and is
    /// treated as a programming error: the call panics.
    BlockingQueued,
    /// [`Direct`](DeliveryMode::Direct) when the caller already runs on the
    /// receiver's executor, [`Queued`](DeliveryMode::Queued) otherwise.
    Auto,
}

/// Invokes `f` in the event loop of `context` under `mode`.
///
/// Returns `true` if the closure ran or was queued, `false` if the executor
/// has already shut down (the closure is dropped in that case).
///
/// For `BlockingQueued` the caller is suspended until the receiving loop has
/// executed the closure; if the loop exits first the closure is discarded
/// and the caller unblocks. There is no timeout.
///
/// # Panics
///
/// `BlockingQueued` panics when `context` is the executor the caller is
/// currently running on; waiting on our own queue can never make progress.
pub fn invoke_in_context<F>(context: &Executor, mode: DeliveryMode, f: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    match mode {
        DeliveryMode::Direct => {
            f();
            true
        }
        DeliveryMode::Auto if context.is_current() => {
            f();
            true
        }
        DeliveryMode::Auto | DeliveryMode::Queued => context.submit(f),
        DeliveryMode::BlockingQueued => {
            assert!(
                !context.is_current(),
                "BlockingQueued invocation aimed at the current executor '{}' would deadlock",
                context.name()
            );
            let (done_tx, done_rx) = bounded::<()>(0);
            let submitted = context.submit(move || {
                // Dropped when the closure finishes, unwinds, or is
                // discarded with the loop; any of those unblocks the caller.
                let _done = done_tx;
                f();
            });
            if !submitted {
                return false;
            }
            let _ = done_rx.recv();
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn blocking_invocation_completes_before_returning() {
        let exec = Executor::spawn("blocking").unwrap();
        let done = Arc::new(AtomicBool::new(false));
        {
            let done = Arc::clone(&done);
            assert!(invoke_in_context(&exec, DeliveryMode::BlockingQueued, move || {
                std::thread::sleep(Duration::from_millis(20));
                done.store(true, Ordering::SeqCst);
            }));
        }
        assert!(done.load(Ordering::SeqCst));
        exec.quit();
        exec.join();
    }

    #[test]
    fn blocking_invocation_to_current_executor_panics() {
        let exec = Executor::spawn("self-block").unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let target = exec.clone();
        exec.submit(move || {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                invoke_in_context(&target, DeliveryMode::BlockingQueued, || {});
            }));
            tx.send(outcome.is_err()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
        exec.quit();
        exec.join();
    }

    #[test]
    fn blocking_invocation_to_stopped_executor_does_not_hang() {
        let exec = Executor::spawn("stopped").unwrap();
        exec.quit();
        exec.join();
        assert!(!invoke_in_context(&exec, DeliveryMode::BlockingQueued, || {}));
    }

    #[test]
    fn auto_runs_inline_on_the_target_executor() {
        let exec = Executor::spawn("auto").unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let target = exec.clone();
        exec.submit(move || {
            let inline = Arc::new(AtomicBool::new(false));
            {
                let inline = Arc::clone(&inline);
                invoke_in_context(&target, DeliveryMode::Auto, move || {
                    inline.store(true, Ordering::SeqCst);
                });
            }
            // Ran inline: visible before this closure returns.
            tx.send(inline.load(Ordering::SeqCst)).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_secs(1)).unwrap());
        exec.quit();
        exec.join();
    }
}
