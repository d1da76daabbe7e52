//! A bounded admission gate.
//!
//! At most `capacity` callers hold a turn at any time. Callers arriving while
//! the gate is full wait in a line and are admitted strictly in arrival order:
//! a released turn is handed directly to the head of the line, so no newcomer
//! can slip in between the release and the wake up.

#![deny(unused)]

mod instrument;

use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

pub use instrument::{Metrics, NoopMetrics, RegistryMetrics};

/// Returned when the caller gave up before it was admitted.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("cancelled while waiting for a turn")]
pub struct Cancelled;

struct State {
    occupancy: usize,
    next_ticket: u64,
    /// Pending tickets keyed by ticket id, ids are handed out in arrival order.
    waitline: BTreeMap<u64, Waker>,
}

impl State {
    /// Gives up one turn. If anybody is waiting the turn moves to the head of
    /// the line and occupancy stays the same.
    fn hand_off(&mut self) -> Option<Waker> {
        match self.waitline.pop_first() {
            Some((ticket, waker)) => {
                trace!(message = "hand off turn", ticket);

                Some(waker)
            }
            None => {
                debug_assert!(
                    self.occupancy > 0,
                    "release_turn called without a matching turn"
                );

                self.occupancy = self.occupancy.saturating_sub(1);
                None
            }
        }
    }
}

pub struct Gate {
    capacity: usize,
    state: Mutex<State>,
    metrics: Arc<dyn Metrics>,
}

impl Debug for Gate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();

        f.debug_struct("Gate")
            .field("capacity", &self.capacity)
            .field("occupancy", &state.occupancy)
            .field("waiting", &state.waitline.len())
            .finish()
    }
}

impl Gate {
    /// Creates a gate that admits at most `capacity` callers at once.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        Self::with_metrics(capacity, Arc::new(NoopMetrics))
    }

    /// Same as [`Gate::new`], and reports wait time and occupancy to `metrics`.
    pub fn with_metrics(capacity: usize, metrics: Arc<dyn Metrics>) -> Self {
        assert!(capacity > 0, "gate capacity must be greater than 0");

        metrics.observe_capacity(capacity);

        Self {
            capacity,
            state: Mutex::new(State {
                occupancy: 0,
                next_ticket: 0,
                waitline: BTreeMap::new(),
            }),
            metrics,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of callers holding a turn right now.
    pub fn occupancy(&self) -> usize {
        self.state.lock().occupancy
    }

    /// Number of callers waiting in line.
    pub fn waiting(&self) -> usize {
        self.state.lock().waitline.len()
    }

    /// Waits for a turn.
    ///
    /// The returned future resolves once the caller is admitted, after which
    /// the caller owns a turn and must give it back with [`Gate::release_turn`].
    /// Dropping the future before it resolves cancels the request, which is how
    /// deadlines like `tokio::time::timeout` work with it.
    pub fn request_turn(&self) -> RequestTurn<'_> {
        RequestTurn {
            gate: self,
            ticket: Ticket::Idle,
        }
    }

    /// Waits for a turn until `cancel` resolves.
    ///
    /// If the caller is admitted and `cancel` is ready at the same time, the
    /// admission wins.
    pub async fn request_turn_until<C>(&self, cancel: C) -> Result<(), Cancelled>
    where
        C: Future,
    {
        let mut request = self.request_turn();

        tokio::select! {
            biased;

            _ = &mut request => Ok(()),
            _ = cancel => Err(Cancelled),
        }
    }

    /// Gives back a turn obtained from [`Gate::request_turn`] and admits the
    /// next caller in line, if any. Never blocks.
    pub fn release_turn(&self) {
        let mut state = self.state.lock();
        let waker = state.hand_off();
        self.metrics.observe_occupancy(state.occupancy);
        drop(state);

        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Waits for a turn which is released when the returned guard is dropped.
    pub async fn turn(&self) -> Turn<'_> {
        self.request_turn().await;

        Turn { gate: self }
    }

    /// Like [`Gate::turn`], but gives up when `cancel` resolves first.
    pub async fn turn_until<C>(&self, cancel: C) -> Result<Turn<'_>, Cancelled>
    where
        C: Future,
    {
        self.request_turn_until(cancel).await?;

        Ok(Turn { gate: self })
    }

    /// Like [`Gate::turn`], but the guard keeps the gate alive so it can be
    /// moved into spawned tasks.
    pub async fn turn_owned(self: Arc<Self>) -> OwnedTurn {
        self.request_turn().await;

        OwnedTurn { gate: self }
    }
}

#[derive(Clone, Copy, Debug)]
enum Ticket {
    Idle,
    Waiting { id: u64, since: Instant },
    Done,
}

/// Future returned by [`Gate::request_turn`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct RequestTurn<'a> {
    gate: &'a Gate,
    ticket: Ticket,
}

impl Debug for RequestTurn<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestTurn")
            .field("ticket", &self.ticket)
            .finish()
    }
}

impl Future for RequestTurn<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let gate = this.gate;

        match this.ticket {
            Ticket::Idle => {
                let mut state = gate.state.lock();

                if state.occupancy < gate.capacity {
                    debug_assert!(state.waitline.is_empty());

                    state.occupancy += 1;
                    gate.metrics.observe_occupancy(state.occupancy);
                    drop(state);

                    this.ticket = Ticket::Done;
                    gate.metrics.observe_wait(Duration::ZERO);

                    return Poll::Ready(());
                }

                let id = state.next_ticket;
                state.next_ticket += 1;
                state.waitline.insert(id, cx.waker().clone());

                this.ticket = Ticket::Waiting {
                    id,
                    since: Instant::now(),
                };

                Poll::Pending
            }

            Ticket::Waiting { id, since } => {
                let mut state = gate.state.lock();

                match state.waitline.get_mut(&id) {
                    Some(waker) => {
                        if !waker.will_wake(cx.waker()) {
                            *waker = cx.waker().clone();
                        }

                        Poll::Pending
                    }
                    None => {
                        // the ticket left the line without being cancelled, so
                        // a releasing holder handed its turn to us
                        gate.metrics.observe_occupancy(state.occupancy);
                        drop(state);

                        this.ticket = Ticket::Done;
                        gate.metrics.observe_wait(since.elapsed());

                        Poll::Ready(())
                    }
                }
            }

            Ticket::Done => panic!("`RequestTurn` polled after completion"),
        }
    }
}

impl Drop for RequestTurn<'_> {
    fn drop(&mut self) {
        let Ticket::Waiting { id, .. } = self.ticket else {
            return;
        };

        let mut state = self.gate.state.lock();
        if state.waitline.remove(&id).is_some() {
            drop(state);

            trace!(message = "ticket cancelled", ticket = id);
            self.gate.metrics.observe_cancelled();
            return;
        }

        // admitted, but nobody is around to use the turn
        let waker = state.hand_off();
        self.gate.metrics.observe_occupancy(state.occupancy);
        drop(state);

        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// A turn that is released on drop.
#[must_use = "dropping the turn releases it immediately"]
pub struct Turn<'a> {
    gate: &'a Gate,
}

impl Debug for Turn<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Turn").finish_non_exhaustive()
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.gate.release_turn();
    }
}

/// An owned version of [`Turn`].
#[must_use = "dropping the turn releases it immediately"]
pub struct OwnedTurn {
    gate: Arc<Gate>,
}

impl Debug for OwnedTurn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedTurn").field("gate", &self.gate).finish()
    }
}

impl Drop for OwnedTurn {
    fn drop(&mut self) {
        self.gate.release_turn();
    }
}
