//! # Worker: the task-fulfilling side of the pool.
//!
//! Users implement [`Worker`] once; the pool clones that prototype onto as
//! many executor threads as the current thread count asks for. The
//! crate-private [`WorkerHarness`] wraps each clone with the wiring it needs
//! to hand results to the processor and report readiness to the controller.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;
use uuid::Uuid;

use crate::dispatch::{invoke_in_context, DeliveryMode};
use crate::executor::Executor;
use crate::pool::processor::ProcessorHost;
use crate::pool::worker_controller::WorkerController;

/// A unit of task-fulfilling logic.
///
/// Implementations run on a dedicated executor thread and are free to block
/// inside [`fulfill`](Worker::fulfill); nothing else runs on that thread
/// while they do. [`clone_box`](Worker::clone_box) is the prototype hook:
/// growing the pool clones the prototype once per new worker, so the clone
/// must carry whatever user state a fresh worker needs.
///
/// ## Example
/// ```rust
/// use signalpool::Worker;
///
/// struct AddOne;
///
/// impl Worker<u64, u64> for AddOne {
///     fn fulfill(&mut self, task: u64) -> u64 {
///         task + 1
///     }
///
///     fn clone_box(&self) -> Box<dyn Worker<u64, u64>> {
///         Box::new(AddOne)
///     }
/// }
/// ```
pub trait Worker<T, R>: Send {
    /// Produces the result for one task. Runs on the worker's executor.
    fn fulfill(&mut self, task: T) -> R;

    /// Clones this worker with equivalent user-supplied state.
    fn clone_box(&self) -> Box<dyn Worker<T, R>>;
}

/// Where a bound worker sends its traffic.
pub(crate) struct WorkerLink<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub(crate) controller: Weak<Mutex<WorkerController<T, R>>>,
    pub(crate) controller_exec: Executor,
    pub(crate) processor: Arc<Mutex<ProcessorHost<T, R>>>,
    pub(crate) processor_exec: Executor,
}

/// One worker instance pinned to one executor.
///
/// Carries a process-unique instance id that every ready notification
/// echoes back; the controller uses it to discard notifications from
/// workers that a resize has already retired.
pub(crate) struct WorkerHarness<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    worker: Box<dyn Worker<T, R>>,
    index: usize,
    instance: Uuid,
    link: Option<WorkerLink<T, R>>,
}

impl<T, R> WorkerHarness<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(worker: Box<dyn Worker<T, R>>, index: usize, link: WorkerLink<T, R>) -> Self {
        Self {
            worker,
            index,
            instance: Uuid::new_v4(),
            link: Some(link),
        }
    }

    pub(crate) fn instance(&self) -> Uuid {
        self.instance
    }

    /// Severs the wiring; a later `receive_task` still fulfills but emits
    /// nothing.
    pub(crate) fn unbind(&mut self) {
        self.link = None;
    }

    /// Fulfills one task, then queues the result to the processor and the
    /// ready notification to the controller. Runs on the worker's executor.
    pub(crate) fn receive_task(this: &Arc<Mutex<Self>>, task: T) {
        let mut harness = this.lock();
        let result = harness.worker.fulfill(task);

        let Some(link) = &harness.link else {
            trace!(index = harness.index, "result dropped, worker unbound");
            return;
        };

        {
            let processor = Arc::clone(&link.processor);
            invoke_in_context(&link.processor_exec, DeliveryMode::Queued, move || {
                ProcessorHost::deliver(&processor, result);
            });
        }
        {
            let controller = link.controller.clone();
            let index = harness.index;
            let instance = harness.instance;
            invoke_in_context(&link.controller_exec, DeliveryMode::Queued, move || {
                if let Some(controller) = controller.upgrade() {
                    controller.lock().worker_finished(index, instance);
                }
            });
        }
    }
}
