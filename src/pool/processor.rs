//! # Processor: the result-consuming side of the pool.
//!
//! Users implement [`Processor`] and receive every result on a dedicated
//! executor thread, together with a [`PoolControl`] handle for steering the
//! pool (resize, clear, enqueue). The crate-private [`ProcessorHost`] owns
//! the user value, its [`SlotContext`], and the bound control handle.
//!
//! ## Rules
//! - `on_result` runs on the processor executor, one call at a time.
//! - [`PoolControl`] calls suspend the caller until the pool's controller
//!   executor has processed them, mirroring a blocking-queued slot call.
//! - After teardown has unbound the processor, late results and control
//!   calls are dropped silently.

use std::sync::{Arc, Weak};

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tracing::trace;

use crate::dispatch::{invoke_in_context, DeliveryMode, SlotContext};
use crate::executor::Executor;
use crate::pool::worker_controller::WorkerController;

/// Consumes results and steers the pool.
///
/// [`on_attach`](Processor::on_attach) runs once on the processor executor
/// before any result can arrive; it is the place to register slots on the
/// processor's [`SlotContext`] so external signals can feed the pool.
pub trait Processor<T: Send + 'static, R: Send + 'static>: Send {
    /// Called once per completed task, on the processor's executor.
    fn on_result(&mut self, result: R, pool: &PoolControl<T, R>);

    /// Hook invoked once when the pool wiring is in place.
    ///
    /// Default implementation does nothing.
    fn on_attach(&mut self, ctx: &SlotContext, pool: &PoolControl<T, R>) {
        let _ = (ctx, pool);
    }
}

/// Counts reported by [`PoolControl::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers currently alive (idle or fulfilling).
    pub workers: usize,
    /// Workers currently idle and ready for a task.
    pub ready: usize,
    /// Tasks queued but not yet assigned to a worker.
    pub pending: usize,
}

/// Handle for steering the pool.
///
/// Every call is forwarded to the pool's controller executor as a blocking
/// invocation: the caller suspends until the controller has processed it.
/// Calls made after the pool has shut down return without effect.
pub struct PoolControl<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    controller: Weak<Mutex<WorkerController<T, R>>>,
    executor: Executor,
}

impl<T, R> Clone for PoolControl<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<T, R> PoolControl<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(
        controller: Weak<Mutex<WorkerController<T, R>>>,
        executor: Executor,
    ) -> Self {
        Self { controller, executor }
    }

    /// Sets the number of worker threads.
    ///
    /// Growing clones the prototype onto fresh executors; shrinking stops
    /// and joins the tail workers (a task they had already been handed is
    /// still fulfilled first). `0` stops them all; the queue keeps its
    /// pending tasks and a later grow resumes assignment.
    pub fn set_thread_count(&self, count: usize) {
        let controller = self.controller.clone();
        invoke_in_context(&self.executor, DeliveryMode::BlockingQueued, move || {
            if let Some(controller) = controller.upgrade() {
                WorkerController::set_thread_count(&controller, count);
            }
        });
    }

    /// Drops every task that has not yet been assigned to a worker.
    /// Tasks already handed to a worker are unaffected.
    pub fn clear_queue(&self) {
        let controller = self.controller.clone();
        invoke_in_context(&self.executor, DeliveryMode::BlockingQueued, move || {
            if let Some(controller) = controller.upgrade() {
                controller.lock().clear_queue();
            }
        });
    }

    /// Appends tasks to the queue, preserving their order, and assigns as
    /// many as there are ready workers.
    pub fn extend_queue(&self, tasks: Vec<T>) {
        let controller = self.controller.clone();
        invoke_in_context(&self.executor, DeliveryMode::BlockingQueued, move || {
            if let Some(controller) = controller.upgrade() {
                controller.lock().extend_queue(tasks);
            }
        });
    }

    /// Snapshot of the pool's bookkeeping. Returns zeros after shutdown.
    pub fn stats(&self) -> PoolStats {
        let controller = self.controller.clone();
        let (tx, rx) = bounded(1);
        invoke_in_context(&self.executor, DeliveryMode::BlockingQueued, move || {
            if let Some(controller) = controller.upgrade() {
                let _ = tx.send(controller.lock().stats());
            }
        });
        rx.try_recv().unwrap_or_default()
    }
}

/// Owns the user processor on its executor.
pub(crate) struct ProcessorHost<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    user: Box<dyn Processor<T, R>>,
    ctx: SlotContext,
    link: Option<PoolControl<T, R>>,
}

impl<T, R> ProcessorHost<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(user: Box<dyn Processor<T, R>>, ctx: SlotContext) -> Self {
        Self {
            user,
            ctx,
            link: None,
        }
    }

    pub(crate) fn bind(&mut self, control: PoolControl<T, R>) {
        self.link = Some(control);
    }

    /// Severs the control link and every signal connection reaching the
    /// processor. Late results are dropped from here on.
    pub(crate) fn unbind(&mut self) {
        self.link = None;
        self.ctx.disconnect_all();
    }

    /// Runs the user's attach hook. Called once on the processor executor.
    pub(crate) fn attach(&mut self) {
        if let Some(link) = self.link.clone() {
            let ctx = self.ctx.clone();
            self.user.on_attach(&ctx, &link);
        }
    }

    /// Hands one result to the user. Called on the processor executor.
    pub(crate) fn deliver(this: &Arc<Mutex<Self>>, result: R) {
        let mut host = this.lock();
        let Some(link) = host.link.clone() else {
            trace!("result dropped, processor unbound");
            return;
        };
        host.user.on_result(result, &link);
    }
}
