//! Signal/slot notifications for gifloop.
//!
//! A [`Signal<Args>`] holds any number of connected slots (closures). Emitting
//! the signal invokes every slot on the emitting thread, in connection order.
//! The playback worker uses signals as its frame-changed, state-changed and
//! error notification channels, so slots connected by a consumer run on the
//! worker thread and should hand work off rather than block.
//!
//! # Example
//!
//! ```
//! use gifloop_core::Signal;
//!
//! let frame_changed = Signal::<usize>::new();
//!
//! let conn_id = frame_changed.connect(|index| {
//!     println!("now showing frame {}", index);
//! });
//!
//! frame_changed.emit(3);
//! frame_changed.disconnect(conn_id);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::logging::targets;

new_key_type! {
    /// Handle returned by [`Signal::connect`]; pass it to
    /// [`Signal::disconnect`] to drop the slot.
    pub struct ConnectionId;
}

type Slot<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

/// A notification source with zero or more subscribed slots.
///
/// # Thread Safety
///
/// `Signal<Args>` is `Send + Sync`. Slots are snapshotted before invocation,
/// so a slot may connect or disconnect on the same signal without deadlocking.
pub struct Signal<Args> {
    connections: Mutex<SlotMap<ConnectionId, Slot<Args>>>,
    blocked: AtomicBool,
}

impl<Args: Send + 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Send + 'static> Signal<Args> {
    /// An empty signal.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(SlotMap::with_key()),
            blocked: AtomicBool::new(false),
        }
    }

    /// Subscribe `slot`. Slots run in subscription order.
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.connections.lock().insert(Arc::new(slot))
    }

    /// Unsubscribe one slot. `false` if `id` was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.connections.lock().remove(id).is_some()
    }

    /// Unsubscribe everything.
    pub fn disconnect_all(&self) {
        self.connections.lock().clear();
    }

    /// Number of subscribed slots.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Suppress (or re-enable) emission. A suppressed `emit` reaches no slot.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    /// Whether emission is suppressed.
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Emit the signal, invoking all connected slots on the current thread.
    ///
    /// Returns the number of slots invoked.
    pub fn emit(&self, args: Args) -> usize {
        if self.is_blocked() {
            tracing::trace!(target: targets::SIGNAL, "signal blocked, skipping emit");
            return 0;
        }

        let slots: Vec<Slot<Args>> = self.connections.lock().values().cloned().collect();
        tracing::trace!(target: targets::SIGNAL, connection_count = slots.len(), "emitting signal");

        for slot in &slots {
            slot(&args);
        }
        slots.len()
    }
}

impl<Args> std::fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.connections.lock().len())
            .field("blocked", &self.blocked.load(Ordering::SeqCst))
            .finish()
    }
}
