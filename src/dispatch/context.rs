//! # SlotContext: the receiving side of a connection.
//!
//! A [`SlotContext`] binds a set of slots to one executor: every queued or
//! blocking delivery aimed at the context runs on that executor's thread.
//! The context also keeps the two pieces of bookkeeping the dispatch layer
//! needs on the receiving side:
//!
//! - the **inverse table** — for each [`SlotKey`], which signals can still
//!   reach it. It mirrors the forward tables held by the signals and is the
//!   authority consulted right before a queued delivery runs, so a
//!   disconnect also stops deliveries that were already in flight.
//! - the **sender stacks** — one LIFO per thread recording which signal
//!   caused the slot that is currently executing there, backing
//!   [`current_sender`](SlotContext::current_sender).
//!
//! Handles are cheap clones of one shared endpoint. When the last handle
//! drops, the endpoint removes every row naming it from every connected
//! signal under the registry lock; nothing can deliver to it afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::dispatch::registry_lock;
use crate::dispatch::signal::SignalPeer;
use crate::executor::Executor;

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_identity() -> u64 {
    NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed)
}

/// Opaque, process-unique identity of a signal endpoint.
///
/// Returned by [`Signal::id`](crate::Signal::id) and
/// [`SlotContext::current_sender`]; comparing the two identifies the emitter
/// from inside a slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SignalId(u64);

impl SignalId {
    pub(crate) fn fresh() -> Self {
        SignalId(next_identity())
    }
}

/// Identity of one bound callable on a receiver context.
///
/// A `(context, key)` pair appears at most once per signal; connecting it
/// again is a no-op. The key is a pair of pointer-sized opaques:
/// [`SlotKey::unique`] mints a fresh identity, [`SlotKey::tagged`] derives a
/// deterministic one from caller-chosen values (typically an object address
/// and a per-method tag) so that "the same method on the same object" stays
/// one identity across `connect` calls.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SlotKey(u64, u64);

impl SlotKey {
    /// Mints a key that compares equal only to copies of itself.
    pub fn unique() -> Self {
        SlotKey(next_identity(), u64::MAX)
    }

    /// Builds a key from an object/method pair chosen by the caller.
    pub fn tagged(object: usize, method: usize) -> Self {
        SlotKey(object as u64, method as u64)
    }
}

/// One mirror row: which signal can reach a slot key, with a weak handle to
/// that signal's forward table for cleanup on context destruction. Matching
/// always goes through the id, never through an upgrade, so no foreign drop
/// glue can run while the inverse lock is held.
struct InverseRow {
    id: SignalId,
    peer: Weak<dyn SignalPeer>,
}

pub(crate) struct ContextInner {
    id: u64,
    executor: RwLock<Executor>,
    /// slot key → signals that can reach it (mirrors the forward tables).
    inverse: Mutex<HashMap<SlotKey, Vec<InverseRow>>>,
    /// executing thread → LIFO of emitters currently delivering here.
    senders: DashMap<ThreadId, Vec<SignalId>>,
}

impl ContextInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn executor(&self) -> Executor {
        self.executor.read().clone()
    }

    /// Records one forward row's mirror image. Caller holds the registry lock.
    pub(crate) fn register_connection(
        &self,
        key: SlotKey,
        id: SignalId,
        peer: Weak<dyn SignalPeer>,
    ) {
        self.inverse
            .lock()
            .entry(key)
            .or_default()
            .push(InverseRow { id, peer });
    }

    /// Removes inverse rows; `None` is a wildcard on that column.
    pub(crate) fn remove_inverse(&self, key: Option<SlotKey>, signal: Option<SignalId>) {
        let mut inverse = self.inverse.lock();
        match (key, signal) {
            (None, None) => inverse.clear(),
            (Some(key), None) => {
                inverse.remove(&key);
            }
            (key, Some(signal)) => {
                for (entry_key, rows) in inverse.iter_mut() {
                    if key.map_or(true, |k| k == *entry_key) {
                        rows.retain(|row| row.id != signal);
                    }
                }
                inverse.retain(|_, rows| !rows.is_empty());
            }
        }
    }

    /// All signals with at least one row pointing at this context.
    ///
    /// Upgraded handles are moved out to the caller; nothing is dropped
    /// while the inverse lock is held.
    pub(crate) fn connected_signals(&self) -> Vec<Arc<dyn SignalPeer>> {
        let inverse = self.inverse.lock();
        let mut signals: Vec<Arc<dyn SignalPeer>> = Vec::new();
        for rows in inverse.values() {
            for row in rows {
                if signals.iter().any(|s| s.signal_id() == row.id) {
                    continue;
                }
                if let Some(peer) = row.peer.upgrade() {
                    signals.push(peer);
                }
            }
        }
        signals
    }

    /// Whether `(key, signal)` is still a live connection.
    ///
    /// Queued deliveries check this right before running the slot, so rows
    /// removed while a delivery sat in an executor queue stay silent.
    pub(crate) fn still_connected(&self, key: SlotKey, signal: SignalId) -> bool {
        self.inverse
            .lock()
            .get(&key)
            .map_or(false, |rows| rows.iter().any(|row| row.id == signal))
    }

    pub(crate) fn push_sender(&self, sender: SignalId) {
        self.senders
            .entry(thread::current().id())
            .or_default()
            .push(sender);
    }

    pub(crate) fn pop_sender(&self) {
        let thread = thread::current().id();
        let mut empty = false;
        if let Some(mut stack) = self.senders.get_mut(&thread) {
            stack.pop();
            empty = stack.is_empty();
        }
        if empty {
            self.senders.remove_if(&thread, |_, stack| stack.is_empty());
        }
    }

    pub(crate) fn current_sender(&self) -> Option<SignalId> {
        self.senders
            .get(&thread::current().id())
            .and_then(|stack| stack.last().copied())
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        // Purge every forward row naming this endpoint before the memory
        // goes away. Own lock is released before calling into the peers;
        // the registry lock serializes against connects and other drops.
        let _registry = registry_lock();
        let drained: Vec<(SlotKey, Vec<InverseRow>)> = self.inverse.lock().drain().collect();
        for (_, rows) in drained {
            for row in rows {
                if let Some(peer) = row.peer.upgrade() {
                    peer.remove_rows(None, Some(self.id));
                }
            }
        }
        trace!(context = self.id, "slot context destroyed");
    }
}

/// Thread-bound receiver endpoint for slot registrations.
///
/// See the [module docs](self) for the role it plays; user code mostly just
/// creates one per logical receiver object and passes it to
/// [`Signal::connect`](crate::Signal::connect).
#[derive(Clone)]
pub struct SlotContext {
    inner: Arc<ContextInner>,
}

impl SlotContext {
    /// Creates a context whose slots execute on `executor`.
    pub fn new(executor: &Executor) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: next_identity(),
                executor: RwLock::new(executor.clone()),
                inverse: Mutex::new(HashMap::new()),
                senders: DashMap::new(),
            }),
        }
    }

    /// Moves the context to a different executor.
    ///
    /// Existing connections stay up; deliveries dispatched after the rebind
    /// run on the new executor. Deliveries already queued on the old one
    /// still run there.
    pub fn rebind(&self, executor: &Executor) {
        *self.inner.executor.write() = executor.clone();
    }

    /// The signal that caused the slot currently executing on this thread.
    ///
    /// Returns `None` outside of slot execution. With nested emissions the
    /// innermost emitter wins, and the previous one becomes visible again
    /// when the inner slot returns.
    pub fn current_sender(&self) -> Option<SignalId> {
        self.inner.current_sender()
    }

    /// Removes every connection that can reach this context.
    pub fn disconnect_all(&self) {
        crate::dispatch::disconnect_filtered(None, None, Some(&self.inner));
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_keys_do_not_collide() {
        let a = SlotKey::unique();
        let b = SlotKey::unique();
        assert_ne!(a, b);
        assert_eq!(SlotKey::tagged(1, 2), SlotKey::tagged(1, 2));
        assert_ne!(SlotKey::tagged(1, 2), SlotKey::tagged(1, 3));
    }

    #[test]
    fn sender_stack_is_lifo_and_cleans_up() {
        let executor = Executor::spawn("senders").unwrap();
        let ctx = SlotContext::new(&executor);
        let outer = SignalId::fresh();
        let inner = SignalId::fresh();

        assert_eq!(ctx.current_sender(), None);
        ctx.inner.push_sender(outer);
        ctx.inner.push_sender(inner);
        assert_eq!(ctx.current_sender(), Some(inner));
        ctx.inner.pop_sender();
        assert_eq!(ctx.current_sender(), Some(outer));
        ctx.inner.pop_sender();
        assert_eq!(ctx.current_sender(), None);
        assert!(ctx.inner.senders.is_empty());

        executor.quit();
        executor.join();
    }
}
