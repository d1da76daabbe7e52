//! A one-shot signal to tell waiting tasks to give up.
//!
//! [`Tripwire::new`] returns a [`Trigger`] and a [`Tripwire`]. The tripwire
//! is a future, cloned into as many tasks as needed, which resolves once the
//! trigger is cancelled, disabled or dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use tracing::debug;

const ARMED: u8 = 0;
const CANCELLED: u8 = 1;
const DISABLED: u8 = 2;

struct Shared {
    name: String,
    state: AtomicU8,
    next_id: AtomicU64,
    wakers: Mutex<HashMap<u64, Waker>>,
}

impl Shared {
    fn state(&self) -> u8 {
        self.state.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Moves out of `ARMED`, only the first call has any effect.
    fn release(&self, to: u8) {
        if self
            .state
            .compare_exchange(ARMED, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let wakers = std::mem::take(&mut *self.wakers.lock());
        debug!(
            message = "tripwire released",
            name = %self.name,
            cancelled = to == CANCELLED,
            waiting = wakers.len(),
        );

        wakers.into_values().for_each(Waker::wake);
    }
}

/// The sending half. Dropping it without calling [`Trigger::cancel`] behaves
/// like [`Trigger::disable`].
pub struct Trigger {
    shared: Arc<Shared>,
}

impl Trigger {
    /// Resolves every associated tripwire, and marks them as cancelled.
    pub fn cancel(self) {
        self.shared.release(CANCELLED);
    }

    /// Resolves every associated tripwire without marking them cancelled.
    pub fn disable(self) {
        self.shared.release(DISABLED);
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        self.shared.release(DISABLED);
    }
}

pub struct Tripwire {
    shared: Arc<Shared>,
    id: u64,
}

impl Tripwire {
    pub fn new(name: impl Into<String>) -> (Trigger, Tripwire) {
        let shared = Arc::new(Shared {
            name: name.into(),
            state: AtomicU8::new(ARMED),
            next_id: AtomicU64::new(0),
            wakers: Mutex::new(HashMap::new()),
        });

        let tripwire = Tripwire {
            id: shared.next_id(),
            shared: Arc::clone(&shared),
        };

        (Trigger { shared }, tripwire)
    }

    /// `true` once the trigger is gone, for whatever reason.
    pub fn closed(&self) -> bool {
        self.shared.state() != ARMED
    }

    /// `true` only if the trigger was explicitly cancelled.
    pub fn cancelled(&self) -> bool {
        self.shared.state() == CANCELLED
    }
}

impl Clone for Tripwire {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            id: self.shared.next_id(),
        }
    }
}

impl Drop for Tripwire {
    fn drop(&mut self) {
        self.shared.wakers.lock().remove(&self.id);
    }
}

impl Future for Tripwire {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.closed() {
            return Poll::Ready(());
        }

        let mut wakers = self.shared.wakers.lock();
        // the trigger might be released between the check above and taking
        // the lock, and it drains wakers only after changing the state
        if self.closed() {
            return Poll::Ready(());
        }
        wakers.insert(self.id, cx.waker().clone());

        Poll::Pending
    }
}
