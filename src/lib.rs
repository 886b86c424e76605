//! # signalpool
//!
//! **Signalpool** is a typed task-processing framework: a worker pool with a
//! dynamically adjustable thread count, wired together by a cross-thread
//! signals/slots dispatch layer. Both halves are generic in their payload
//! types — nothing is serialized, nothing is registered with a type
//! registry — and both are usable on their own.
//!
//! ## Features
//!
//! | Area          | Description                                                      | Key types / traits                        |
//! |---------------|------------------------------------------------------------------|-------------------------------------------|
//! | **Executors** | Per-thread FIFO event loops every endpoint is pinned to.         | [`Executor`], [`invoke_in_context`]        |
//! | **Dispatch**  | Typed signals/slots with direct, queued and blocking delivery.   | [`Signal`], [`SlotContext`], [`DeliveryMode`] |
//! | **Pool**      | Prototype-cloned workers, FIFO task queue, live resizing.        | [`Worker`], [`Processor`], [`Controller`]  |
//! | **Steering**  | Resize / clear / enqueue from inside the processor.              | [`PoolControl`], [`PoolStats`]             |
//! | **Errors**    | Typed errors for the dispatch layer and executor spawning.       | [`Error`]                                  |
//!
//! ## Example
//!
//! ```rust
//! use signalpool::{Controller, PoolControl, Processor, Worker};
//! use std::sync::mpsc;
//!
//! struct AddOne;
//!
//! impl Worker<u64, u64> for AddOne {
//!     fn fulfill(&mut self, task: u64) -> u64 {
//!         task + 1
//!     }
//!     fn clone_box(&self) -> Box<dyn Worker<u64, u64>> {
//!         Box::new(AddOne)
//!     }
//! }
//!
//! struct Collect(mpsc::Sender<u64>);
//!
//! impl Processor<u64, u64> for Collect {
//!     fn on_result(&mut self, result: u64, _pool: &PoolControl<u64, u64>) {
//!         let _ = self.0.send(result);
//!     }
//! }
//!
//! fn main() -> Result<(), signalpool::Error> {
//!     let (tx, rx) = mpsc::channel();
//!     let pool = Controller::new(Box::new(Collect(tx)), Box::new(AddOne), 2)?;
//!
//!     pool.control().extend_queue(vec![1, 2, 3]);
//!     let mut results: Vec<u64> = rx.iter().take(3).collect();
//!     results.sort_unstable();
//!     assert_eq!(results, vec![2, 3, 4]);
//!     Ok(())
//! }
//! ```
//!
//! ## Threading model
//!
//! Every moving part runs on an [`Executor`] — a dedicated OS thread
//! draining closures in FIFO order. Slots on one executor run one at a
//! time; parallelism comes from having many executors. The pool spawns one
//! executor per worker, one for the processor, and one for its own
//! bookkeeping; emission order between one signal and one receiver is
//! preserved end to end.
//!
//! ---

mod dispatch;
mod error;
mod executor;
mod pool;

// ---- Public re-exports ----

pub use dispatch::{
    disconnect, invoke_in_context, DeliveryMode, Signal, SignalHandle, SignalId, SlotContext,
    SlotKey,
};
pub use error::Error;
pub use executor::{Executor, PanicHandler};
pub use pool::{Controller, ControllerBuilder, PoolControl, PoolStats, Processor, Worker};
