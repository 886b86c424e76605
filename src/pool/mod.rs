//! # Worker pool built on the dispatch layer.
//!
//! Users supply a [`Processor`] (consumes results, steers the pool) and a
//! prototype [`Worker`] (fulfills tasks, clones itself on grow); the
//! [`Controller`] owns both plus every executor thread involved.
//!
//! ```text
//! user code ──signal──► Processor ──blocking──► WorkerController
//!                           ▲                        │ queued
//!                           │ queued (results)       ▼
//!                           └──────────────────── Worker × N
//!                                                    │ queued (ready)
//!                             WorkerController ◄─────┘
//! ```

mod controller;
mod processor;
mod worker;
mod worker_controller;

pub use controller::{Controller, ControllerBuilder};
pub use processor::{PoolControl, PoolStats, Processor};
pub use worker::Worker;
