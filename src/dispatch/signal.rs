//! # Signal: the emitting side of a connection.
//!
//! A [`Signal<A>`] owns a forward table mapping receiver contexts to ordered
//! rows of `(SlotKey, invoker)`. Emitting snapshots that table under the
//! signal-local mutex, releases it, and runs the invokers — so slots may
//! freely emit (even the same signal again) and connection mutations from
//! inside a slot take effect once the current emission returns.
//!
//! A signal is also a receiver: it owns a [`SlotContext`] and a relay slot
//! that re-emits, which is what [`Signal::chain`] connects. That allows
//! fan-out through intermediate signals and thread-hopping relays.
//!
//! ## Rules
//! - A `(receiver, key)` pair exists at most once per signal; connecting it
//!   again is a no-op.
//! - Within one receiver, invocation order is connection order. Across
//!   receivers the order is the order in which the first connection to each
//!   receiver was made.
//! - Mutations that span both endpoints (connect, disconnect, endpoint
//!   drop) serialize on the process-wide registry lock, acquired before any
//!   endpoint-local mutex. Emission takes only the signal-local mutex and
//!   never the registry lock.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::dispatch::context::{ContextInner, SignalId, SlotContext, SlotKey};
use crate::dispatch::invoke::{invoke_in_context, DeliveryMode};
use crate::dispatch::registry_lock;
use crate::error::Error;
use crate::executor::Executor;

/// Type-erased view of a signal's forward table, used by receiver contexts
/// and wildcard disconnects that cannot name the argument type.
pub(crate) trait SignalPeer: Send + Sync {
    fn signal_id(&self) -> SignalId;
    /// Removes forward rows; `None` is a wildcard on that column.
    /// Caller holds the registry lock.
    fn remove_rows(&self, key: Option<SlotKey>, receiver: Option<u64>);
    /// Receiver contexts with at least one live row.
    fn receivers(&self) -> Vec<Arc<ContextInner>>;
}

type Invoker<A> = Arc<dyn Fn(&A) + Send + Sync>;
type Slot<A> = Arc<dyn Fn(&A) + Send + Sync>;

struct Row<A> {
    key: SlotKey,
    invoker: Invoker<A>,
}

struct ReceiverEntry<A> {
    ctx_id: u64,
    ctx: Weak<ContextInner>,
    rows: Vec<Row<A>>,
}

pub(crate) struct SignalTable<A> {
    id: SignalId,
    connections: Mutex<Vec<ReceiverEntry<A>>>,
}

impl<A: Clone + Send + Sync + 'static> SignalTable<A> {
    fn contains(&self, ctx_id: u64, key: SlotKey) -> bool {
        self.connections
            .lock()
            .iter()
            .any(|entry| entry.ctx_id == ctx_id && entry.rows.iter().any(|row| row.key == key))
    }

    fn insert(&self, ctx_id: u64, ctx: Weak<ContextInner>, key: SlotKey, invoker: Invoker<A>) {
        let mut connections = self.connections.lock();
        if let Some(entry) = connections.iter_mut().find(|entry| entry.ctx_id == ctx_id) {
            entry.rows.push(Row { key, invoker });
        } else {
            connections.push(ReceiverEntry {
                ctx_id,
                ctx,
                rows: vec![Row { key, invoker }],
            });
        }
    }

    /// Runs every live invoker against a snapshot of the forward table.
    pub(crate) fn emit(&self, args: &A) {
        let snapshot: Vec<Invoker<A>> = {
            let connections = self.connections.lock();
            connections
                .iter()
                .flat_map(|entry| entry.rows.iter().map(|row| Arc::clone(&row.invoker)))
                .collect()
        };
        for invoker in snapshot {
            invoker(args);
        }
    }
}

impl<A: Clone + Send + Sync + 'static> SignalPeer for SignalTable<A> {
    fn signal_id(&self) -> SignalId {
        self.id
    }

    fn remove_rows(&self, key: Option<SlotKey>, receiver: Option<u64>) {
        let mut connections = self.connections.lock();
        match (key, receiver) {
            (None, None) => connections.clear(),
            (None, Some(ctx_id)) => connections.retain(|entry| entry.ctx_id != ctx_id),
            (Some(key), receiver) => {
                for entry in connections.iter_mut() {
                    if receiver.map_or(true, |ctx_id| ctx_id == entry.ctx_id) {
                        entry.rows.retain(|row| row.key != key);
                    }
                }
                connections.retain(|entry| !entry.rows.is_empty());
            }
        }
    }

    fn receivers(&self) -> Vec<Arc<ContextInner>> {
        self.connections
            .lock()
            .iter()
            .filter_map(|entry| entry.ctx.upgrade())
            .collect()
    }
}

impl<A> Drop for SignalTable<A> {
    fn drop(&mut self) {
        // Symmetric to ContextInner::drop: strip the inverse rows naming
        // this signal from every receiver before the table goes away.
        let _registry = registry_lock();
        let entries: Vec<ReceiverEntry<A>> = {
            let mut connections = self.connections.lock();
            connections.drain(..).collect()
        };
        for entry in entries {
            if let Some(ctx) = entry.ctx.upgrade() {
                ctx.remove_inverse(None, Some(self.id));
            }
        }
    }
}

/// Type-erased reference to a signal, usable where the argument type cannot
/// be named (wildcard [`disconnect`](crate::disconnect)).
pub struct SignalHandle {
    pub(crate) id: SignalId,
    pub(crate) peer: Arc<dyn SignalPeer>,
}

/// Typed emitter endpoint.
///
/// `A` is the argument payload; use a tuple for multi-argument signals.
/// The payload must be `Clone` because queued delivery hands each receiver
/// its own copy, and `Sync` because direct and blocking delivery lend out a
/// reference across the call.
pub struct Signal<A> {
    table: Arc<SignalTable<A>>,
    ctx: SlotContext,
    relay_key: SlotKey,
}

impl<A: Clone + Send + Sync + 'static> Signal<A> {
    /// Creates a signal whose receiving side (see [`Signal::chain`]) is
    /// bound to `executor`.
    pub fn new(executor: &Executor) -> Self {
        Self {
            table: Arc::new(SignalTable {
                id: SignalId::fresh(),
                connections: Mutex::new(Vec::new()),
            }),
            ctx: SlotContext::new(executor),
            relay_key: SlotKey::unique(),
        }
    }

    /// This signal's process-unique identity.
    pub fn id(&self) -> SignalId {
        self.table.id
    }

    /// The signal's own receiver context (the endpoint [`Signal::chain`]
    /// registers its relay slot on).
    pub fn context(&self) -> &SlotContext {
        &self.ctx
    }

    /// A type-erased reference for wildcard disconnects.
    pub fn handle(&self) -> SignalHandle {
        SignalHandle {
            id: self.table.id,
            peer: self.table.clone() as Arc<dyn SignalPeer>,
        }
    }

    /// Connects `slot` on `receiver` under `key` with the given delivery
    /// mode. Returns `false` (and changes nothing) when `(receiver, key)`
    /// is already connected to this signal.
    pub fn connect<F>(
        &self,
        receiver: &SlotContext,
        key: SlotKey,
        mode: DeliveryMode,
        slot: F,
    ) -> bool
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let _registry = registry_lock();
        let ctx = receiver.inner();
        if self.table.contains(ctx.id(), key) {
            trace!(signal = ?self.table.id, context = ctx.id(), "duplicate connect ignored");
            return false;
        }

        let slot: Slot<A> = Arc::new(slot);
        let invoker = build_invoker(self.table.id, Arc::downgrade(ctx), key, mode, slot);
        self.table.insert(ctx.id(), Arc::downgrade(ctx), key, invoker);
        ctx.register_connection(key, self.table.id, {
            let peer: Arc<dyn SignalPeer> = self.table.clone();
            Arc::downgrade(&peer)
        });
        debug!(signal = ?self.table.id, context = ctx.id(), ?mode, "connected");
        true
    }

    /// Connects `downstream` so that emitting `self` re-emits it.
    ///
    /// The relay executes on `downstream`'s bound executor under `mode`,
    /// which makes a chained signal a thread-hopping fan-out point. Returns
    /// `false` when the chain already exists.
    pub fn chain(&self, downstream: &Signal<A>, mode: DeliveryMode) -> bool {
        let table = Arc::downgrade(&downstream.table);
        self.connect(&downstream.ctx, downstream.relay_key, mode, move |args: &A| {
            if let Some(table) = table.upgrade() {
                table.emit(args);
            }
        })
    }

    /// Emits the signal.
    ///
    /// Invokers run against a snapshot of the forward table: a slot may
    /// emit again (reentrantly, even this signal), and connects or
    /// disconnects performed inside a slot take effect after this emission
    /// returns. Queued deliveries additionally re-check the connection when
    /// they reach the receiver's executor, so a disconnect silences them
    /// even when the delivery was already in flight.
    pub fn emit(&self, args: &A) {
        self.table.emit(args);
    }

    /// Removes matching connections from this signal.
    ///
    /// `None` is a wildcard: `disconnect(None, None)` removes every
    /// connection, `disconnect(Some(key), None)` removes `key` on every
    /// receiver, `disconnect(None, Some(ctx))` removes every row to `ctx`.
    /// Unknown rows are silently skipped.
    pub fn disconnect(&self, key: Option<SlotKey>, receiver: Option<&SlotContext>) {
        crate::dispatch::disconnect_filtered(
            key,
            Some((self.table.id, self.table.clone() as Arc<dyn SignalPeer>)),
            receiver.map(|r| r.inner()),
        );
    }
}

struct SendPtr<T>(*const T);

// Moving the pointer to the receiving executor lends out `&T` across
// threads; `T: Sync` is exactly the bound that makes that reference usable
// there. Lifetime is upheld by the blocking rendezvous: the emitter stays
// inside `invoke_in_context` until the closure has run or been discarded.
unsafe impl<T: Sync> Send for SendPtr<T> {}

fn build_invoker<A: Clone + Send + Sync + 'static>(
    signal: SignalId,
    receiver: Weak<ContextInner>,
    key: SlotKey,
    mode: DeliveryMode,
    slot: Slot<A>,
) -> Invoker<A> {
    Arc::new(move |args: &A| {
        let Some(ctx) = receiver.upgrade() else {
            return;
        };
        let executor = ctx.executor();
        let resolved = match mode {
            DeliveryMode::Auto => {
                if executor.is_current() {
                    DeliveryMode::Direct
                } else {
                    DeliveryMode::Queued
                }
            }
            mode => mode,
        };
        // Deferred deliveries hold the receiver weakly and re-resolve it on
        // the target executor: a receiver whose last handle dropped in the
        // meantime stays silent, exactly like one that disconnected.
        match resolved {
            DeliveryMode::Direct => call_slot(&ctx, signal, args, &*slot),
            DeliveryMode::Queued => {
                drop(ctx);
                let owned = args.clone();
                let receiver = Weak::clone(&receiver);
                let slot = Arc::clone(&slot);
                let delivered = executor.submit(move || {
                    let Some(ctx) = receiver.upgrade() else {
                        return;
                    };
                    if ctx.still_connected(key, signal) {
                        call_slot(&ctx, signal, &owned, &*slot);
                    }
                });
                if !delivered {
                    trace!(signal = ?signal, "queued delivery dropped, executor stopped");
                }
            }
            DeliveryMode::BlockingQueued => {
                drop(ctx);
                let ptr = SendPtr(args as *const A);
                let receiver = Weak::clone(&receiver);
                let slot = Arc::clone(&slot);
                invoke_in_context(&executor, DeliveryMode::BlockingQueued, move || {
                    // Force capture of the whole `SendPtr`, not just its `.0`
                    // field, so the manual `Send` impl above applies (2021
                    // disjoint closure captures would otherwise capture the
                    // raw `*const A` field directly).
                    let ptr = ptr;
                    // Valid for the duration of this closure, see SendPtr.
                    let args = unsafe { &*ptr.0 };
                    let Some(ctx) = receiver.upgrade() else {
                        return;
                    };
                    if ctx.still_connected(key, signal) {
                        call_slot(&ctx, signal, args, &*slot);
                    }
                });
            }
            DeliveryMode::Auto => unreachable!("Auto resolved above"),
        }
    })
}

/// Runs a slot with the emitter pushed onto the receiver's sender stack.
/// The pop lives in a drop guard so a panicking slot cannot leave the stack
/// out of balance.
fn call_slot<A>(ctx: &ContextInner, sender: SignalId, args: &A, slot: &dyn Fn(&A)) {
    struct SenderGuard<'a>(&'a ContextInner);
    impl Drop for SenderGuard<'_> {
        fn drop(&mut self) {
            self.0.pop_sender();
        }
    }

    ctx.push_sender(sender);
    let _guard = SenderGuard(ctx);
    slot(args);
}

/// Removes matching connections; `None` means wildcard.
///
/// At least one of `signal` and `receiver` must be given, otherwise
/// [`Error::InvalidDisconnect`] is returned. Unknown rows are silently
/// skipped; the call is idempotent.
pub fn disconnect(
    key: Option<SlotKey>,
    signal: Option<&SignalHandle>,
    receiver: Option<&SlotContext>,
) -> Result<(), Error> {
    if signal.is_none() && receiver.is_none() {
        return Err(Error::InvalidDisconnect);
    }
    crate::dispatch::disconnect_filtered(
        key,
        signal.map(|s| (s.id, Arc::clone(&s.peer))),
        receiver.map(|r| r.inner()),
    );
    Ok(())
}
