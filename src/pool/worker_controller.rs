//! # WorkerController: the pool's bookkeeping state machine.
//!
//! Lives on its own executor; every operation here runs on that thread, so
//! the task queue, the worker records, and the ready set have exactly one
//! writer. The processor reaches it through blocking invocations, workers
//! through queued ready notifications.
//!
//! ## Task flow
//! ```text
//! extend_queue ──► tasks (FIFO) ──► assign_tasks ──► worker executor
//!                                        ▲                 │ fulfill
//!      ready set ◄── worker_finished ◄───┴─────────────────┘
//! ```
//!
//! ## Rules
//! - A worker is either in the ready set or has exactly one task in flight.
//! - Ready notifications carry `(index, instance id)`; a mismatch on either
//!   means the sender was retired by a resize and the notification is
//!   dropped. Indices are reused, instance ids never are.
//! - Shrinking quits and joins the tail workers. A task already handed to
//!   one of them is still fulfilled before its loop exits (drain-then-exit),
//!   so drawn tasks are never lost to a resize.
//! - During destruction the queue operations become no-ops and the worker
//!   set can no longer grow.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::dispatch::{invoke_in_context, DeliveryMode};
use crate::executor::{Executor, PanicHandler};
use crate::pool::processor::{PoolStats, ProcessorHost};
use crate::pool::worker::{Worker, WorkerHarness, WorkerLink};

pub(crate) struct WorkerRecord<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    executor: Executor,
    harness: Arc<Mutex<WorkerHarness<T, R>>>,
    instance: Uuid,
}

pub(crate) struct WorkerController<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    prototype: Box<dyn Worker<T, R>>,
    processor: Arc<Mutex<ProcessorHost<T, R>>>,
    processor_exec: Executor,
    self_exec: Executor,
    panic_handler: Option<PanicHandler>,
    workers: Vec<WorkerRecord<T, R>>,
    tasks: VecDeque<T>,
    ready: BTreeSet<usize>,
    destructing: bool,
}

impl<T, R> WorkerController<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(
        prototype: Box<dyn Worker<T, R>>,
        processor: Arc<Mutex<ProcessorHost<T, R>>>,
        processor_exec: Executor,
        self_exec: Executor,
        panic_handler: Option<PanicHandler>,
    ) -> Self {
        Self {
            prototype,
            processor,
            processor_exec,
            self_exec,
            panic_handler,
            workers: Vec::new(),
            tasks: VecDeque::new(),
            ready: BTreeSet::new(),
            destructing: false,
        }
    }

    /// Resizes the worker set. Associated rather than inherent because new
    /// workers need a weak reference back to the shared controller.
    pub(crate) fn set_thread_count(this: &Arc<Mutex<Self>>, count: usize) {
        let mut wc = this.lock();
        let current = wc.workers.len();

        if count == 0 {
            let retired: Vec<WorkerRecord<T, R>> = wc.workers.drain(..).collect();
            wc.ready.clear();
            drop(wc);
            join_all(&retired);
            debug!(retired = retired.len(), "stopped all workers");
        } else if count < current {
            let retired: Vec<WorkerRecord<T, R>> = wc.workers.drain(count..).collect();
            for index in count..current {
                wc.ready.remove(&index);
            }
            drop(wc);
            join_all(&retired);
            debug!(from = current, to = count, "shrunk worker set");
        } else if count > current && !wc.destructing {
            for index in current..count {
                let worker = wc.prototype.clone_box();
                let executor = match Executor::spawn_with(
                    format!("worker-{index}"),
                    wc.panic_handler.clone(),
                ) {
                    Ok(executor) => executor,
                    Err(err) => {
                        error!(index, error = %err, "could not spawn worker executor");
                        break;
                    }
                };
                let link = WorkerLink {
                    controller: Arc::downgrade(this),
                    controller_exec: wc.self_exec.clone(),
                    processor: Arc::clone(&wc.processor),
                    processor_exec: wc.processor_exec.clone(),
                };
                let harness = Arc::new(Mutex::new(WorkerHarness::new(worker, index, link)));
                let instance = harness.lock().instance();
                wc.workers.push(WorkerRecord {
                    executor,
                    harness,
                    instance,
                });
                wc.ready.insert(index);
                trace!(index, %instance, "worker started");
            }
            debug!(from = current, to = wc.workers.len(), "grew worker set");
            wc.assign_tasks();
        }
    }

    /// Appends tasks and assigns as many as there are ready workers.
    /// Ignored during destruction.
    pub(crate) fn extend_queue(&mut self, new_tasks: Vec<T>) {
        if self.destructing {
            return;
        }
        self.tasks.extend(new_tasks);
        self.assign_tasks();
    }

    /// Drops every unassigned task. Ignored during destruction.
    pub(crate) fn clear_queue(&mut self) {
        if self.destructing {
            return;
        }
        let dropped = self.tasks.len();
        self.tasks.clear();
        debug!(dropped, "cleared pending tasks");
    }

    /// Re-admits a worker to the ready set — unless the notification is
    /// stale because a resize retired that worker in the meantime.
    pub(crate) fn worker_finished(&mut self, index: usize, instance: Uuid) {
        let live = self
            .workers
            .get(index)
            .map_or(false, |record| record.instance == instance);
        if live {
            self.ready.insert(index);
            self.assign_tasks();
        } else {
            trace!(index, %instance, "dropped stale ready notification");
        }
    }

    /// Pairs queued tasks with ready workers until one side runs dry.
    fn assign_tasks(&mut self) {
        while !self.tasks.is_empty() {
            let Some(index) = self.ready.pop_first() else {
                break;
            };
            let Some(task) = self.tasks.pop_front() else {
                self.ready.insert(index);
                break;
            };
            let record = &self.workers[index];
            let harness = Arc::clone(&record.harness);
            invoke_in_context(&record.executor, DeliveryMode::Queued, move || {
                WorkerHarness::receive_task(&harness, task);
            });
            trace!(index, "task assigned");
        }
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.len(),
            ready: self.ready.len(),
            pending: self.tasks.len(),
        }
    }

    /// Orderly shutdown; runs on the controller executor, triggered by
    /// [`Controller`](crate::Controller) drop.
    ///
    /// Order matters: the processor is unbound first so it stops emitting,
    /// then the workers (blocking, so nothing is mid-`receive_task` when we
    /// join them), then all worker executors stop, and finally the
    /// processor executor is asked to quit. While waiting for the processor
    /// thread we pump our own queue: the processor may be suspended in a
    /// blocking call aimed at this very executor, and draining it is what
    /// lets the processor run its remaining events and exit.
    pub(crate) fn teardown(this: &Arc<Mutex<Self>>) {
        let (processor, processor_exec, worker_targets) = {
            let mut wc = this.lock();
            wc.destructing = true;
            (
                Arc::clone(&wc.processor),
                wc.processor_exec.clone(),
                wc.workers
                    .iter()
                    .map(|record| (record.executor.clone(), Arc::clone(&record.harness)))
                    .collect::<Vec<_>>(),
            )
        };

        {
            let processor = Arc::clone(&processor);
            invoke_in_context(&processor_exec, DeliveryMode::Queued, move || {
                processor.lock().unbind();
            });
        }
        for (executor, harness) in worker_targets {
            invoke_in_context(&executor, DeliveryMode::BlockingQueued, move || {
                harness.lock().unbind();
            });
        }

        Self::set_thread_count(this, 0);

        processor_exec.quit();
        while !processor_exec.is_finished() {
            Executor::pump();
            thread::sleep(Duration::from_millis(1));
        }
        processor_exec.join();
        debug!("pool teardown complete");
    }
}

fn join_all<T, R>(retired: &[WorkerRecord<T, R>])
where
    T: Send + 'static,
    R: Send + 'static,
{
    for record in retired {
        record.executor.quit();
    }
    for record in retired {
        record.executor.join();
    }
}
