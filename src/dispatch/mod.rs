//! # Dispatch layer: typed signals and slots across executors.
//!
//! Connects [`Signal`] emitters to slots registered on [`SlotContext`]
//! receivers with a selectable [`DeliveryMode`]. Payloads are plain generic
//! values; nothing is serialized and no type registration is involved.
//!
//! ## Wiring
//! ```text
//! Signal<A> ── forward table ──► (SlotContext, SlotKey, invoker) rows
//!     ▲                                      │
//!     └───────── inverse table ◄─────────────┘
//! ```
//! The two tables mirror each other. Mutations that touch both endpoints —
//! connect, disconnect, endpoint destruction — serialize on one
//! process-wide registry mutex, always acquired before any endpoint-local
//! mutex. Emission never takes the registry lock: it snapshots the forward
//! table under the signal-local mutex and invokes from the snapshot.
//!
//! ## Rules
//! - Registry lock first, endpoint-local locks second. Never the reverse.
//! - The registry lock is reentrant: dropping the last handle to one
//!   endpoint may cascade into dropping a peer while the lock is held.
//! - Sender stacks are per-thread and only touched around slot invocation
//!   on that thread.

mod context;
mod invoke;
mod signal;

pub use context::{SignalId, SlotContext, SlotKey};
pub use invoke::{invoke_in_context, DeliveryMode};
pub use signal::{disconnect, Signal, SignalHandle};

use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use context::{ContextInner, SlotKey as Key};
use signal::SignalPeer;

/// Serializes every mutation that spans both sides of a connection.
static REGISTRY: ReentrantMutex<()> = ReentrantMutex::new(());

pub(crate) fn registry_lock() -> ReentrantMutexGuard<'static, ()> {
    REGISTRY.lock()
}

/// Shared implementation behind [`disconnect`] and the endpoint `Drop`s.
/// Wildcard columns are `None`; the caller has already validated that at
/// least one endpoint is named.
pub(crate) fn disconnect_filtered(
    key: Option<Key>,
    signal: Option<(SignalId, Arc<dyn SignalPeer>)>,
    receiver: Option<&Arc<ContextInner>>,
) {
    let _registry = registry_lock();
    match (signal, receiver) {
        (Some((id, peer)), Some(ctx)) => {
            peer.remove_rows(key, Some(ctx.id()));
            ctx.remove_inverse(key, Some(id));
        }
        (None, Some(ctx)) => {
            for peer in ctx.connected_signals() {
                peer.remove_rows(key, Some(ctx.id()));
            }
            ctx.remove_inverse(key, None);
        }
        (Some((id, peer)), None) => {
            for ctx in peer.receivers() {
                ctx.remove_inverse(key, Some(id));
            }
            peer.remove_rows(key, None);
        }
        (None, None) => {}
    }
}
