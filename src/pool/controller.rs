//! # Controller: owner of the whole pool.
//!
//! Construction wires everything — processor executor, controller executor,
//! initial workers — and returns once the pool is ready to accept tasks.
//! Dropping the controller tears it all down in an order that cannot
//! deadlock, even while blocking calls are still in flight (see
//! [`WorkerController::teardown`]).
//!
//! ```text
//! Controller ──owns──► controller executor ──runs──► WorkerController
//!     │                                                   │
//!     ├──owns──► processor executor ──runs──► ProcessorHost / user slots
//!     └──spawned per worker──► worker executors ──run──► WorkerHarness
//! ```

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dispatch::{invoke_in_context, DeliveryMode, SlotContext};
use crate::error::Error;
use crate::executor::{Executor, PanicHandler};
use crate::pool::processor::{PoolControl, Processor, ProcessorHost};
use crate::pool::worker::Worker;
use crate::pool::worker_controller::WorkerController;

/// Configures and builds a [`Controller`].
#[derive(Default)]
pub struct ControllerBuilder {
    threads: usize,
    panic_handler: Option<PanicHandler>,
}

impl ControllerBuilder {
    /// Number of worker threads to start with. Defaults to zero; the
    /// processor can grow the pool later through its control handle.
    pub fn threads(mut self, count: usize) -> Self {
        self.threads = count;
        self
    }

    /// Handler for panics escaping `fulfill` or a processor slot.
    ///
    /// Without one, panics are recorded through `tracing` and the affected
    /// executor keeps running. A panicking worker stays out of the ready
    /// set until a resize retires it.
    pub fn panic_handler(
        mut self,
        handler: impl Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    ) -> Self {
        self.panic_handler = Some(Arc::new(handler));
        self
    }

    /// Builds the pool; returns once it is fully wired.
    ///
    /// Ownership of `processor` and `prototype` transfers to the controller;
    /// both are dropped during teardown.
    pub fn build<T, R>(
        self,
        processor: Box<dyn Processor<T, R>>,
        prototype: Box<dyn Worker<T, R>>,
    ) -> Result<Controller<T, R>, Error>
    where
        T: Send + 'static,
        R: Send + 'static,
    {
        let controller_exec = Executor::spawn("pool-controller")?;
        let processor_exec = Executor::spawn_with("processor", self.panic_handler.clone())?;

        let processor_ctx = SlotContext::new(&processor_exec);
        let host = Arc::new(Mutex::new(ProcessorHost::new(
            processor,
            processor_ctx.clone(),
        )));
        let controller = Arc::new(Mutex::new(WorkerController::new(
            prototype,
            Arc::clone(&host),
            processor_exec.clone(),
            controller_exec.clone(),
            self.panic_handler,
        )));

        let control = PoolControl::new(Arc::downgrade(&controller), controller_exec.clone());
        host.lock().bind(control.clone());

        // The attach hook runs on the processor executor and completes
        // before construction returns, so slots wired there are connected
        // by the time the caller can emit anything.
        {
            let host = Arc::clone(&host);
            invoke_in_context(&processor_exec, DeliveryMode::BlockingQueued, move || {
                host.lock().attach();
            });
        }

        // Initial resize runs blocking so the pool is wired on return.
        {
            let controller = Arc::clone(&controller);
            let threads = self.threads;
            invoke_in_context(&controller_exec, DeliveryMode::BlockingQueued, move || {
                WorkerController::set_thread_count(&controller, threads);
            });
        }

        Ok(Controller {
            controller,
            controller_exec,
            control,
            processor_ctx,
        })
    }
}

/// Top-level owner of a worker pool.
///
/// Holds the processor, the prototype worker, and every executor thread the
/// pool uses. Dropping it stops and joins them all.
pub struct Controller<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    controller: Arc<Mutex<WorkerController<T, R>>>,
    controller_exec: Executor,
    control: PoolControl<T, R>,
    processor_ctx: SlotContext,
}

impl<T, R> Controller<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Builds a pool with `threads` workers and default settings.
    pub fn new(
        processor: Box<dyn Processor<T, R>>,
        prototype: Box<dyn Worker<T, R>>,
        threads: usize,
    ) -> Result<Self, Error> {
        Self::builder().threads(threads).build(processor, prototype)
    }

    /// Returns a builder for non-default settings.
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::default()
    }

    /// Control handle for this pool.
    ///
    /// Usable from any thread except the pool's own controller executor;
    /// the intended caller is the processor (which receives the same handle
    /// with every result).
    pub fn control(&self) -> PoolControl<T, R> {
        self.control.clone()
    }

    /// The processor's receiver context.
    ///
    /// Connect signals here (typically to slots registered in
    /// [`Processor::on_attach`]) to feed the pool from the outside.
    pub fn processor_context(&self) -> SlotContext {
        self.processor_ctx.clone()
    }
}

impl<T, R> Drop for Controller<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn drop(&mut self) {
        let controller = Arc::clone(&self.controller);
        self.controller_exec.submit(move || {
            WorkerController::teardown(&controller);
        });
        self.controller_exec.quit();
        self.controller_exec.join();
    }
}
