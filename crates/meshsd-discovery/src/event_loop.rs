//! Single-threaded event loop host.
//!
//! The loop multiplexes four sources: a quit request, OS control signals,
//! queued [`LoopEvent`]s, and one-shot timers. Each wake-up dispatches exactly
//! one item to the [`LoopHandler`] and runs it to completion before waiting
//! again, so handlers never run concurrently and need no locking.
//!
//! A timer whose deadline has passed is dispatched before any queued event,
//! so a busy event queue cannot hold back the restart cadence.
//!
//! Timers are one-shot: a timer is disarmed before its callback runs and stays
//! disarmed unless the callback re-arms it through [`LoopContext::timeout_update`].

use crate::engine::{DiscoveryEvent, EngineNotification, Generation};
use crate::signals::{ControlSignal, SignalListener};
use async_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

/// Work item queued for the loop thread
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    /// Engine state change
    Engine(EngineNotification),

    /// Discovery session result
    Discovery {
        generation: Generation,
        event: DiscoveryEvent,
    },

    /// Write the known services snapshot
    ExportRequested,
}

/// Cloneable producer side of the loop's event queue
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<LoopEvent>,
}

impl EventSender {
    /// Queues an event. Never blocks; events sent after the loop is destroyed
    /// are dropped.
    pub fn send(&self, event: LoopEvent) {
        if self.tx.try_send(event).is_err() {
            debug!("Event loop closed, dropping event");
        }
    }
}

/// Quit request shared with anything that may stop the loop.
///
/// Requesting quit only sets an atomic flag and wakes the loop; it performs no
/// allocation and touches no engine state.
#[derive(Debug, Clone, Default)]
pub struct QuitHandle {
    requested: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl QuitHandle {
    pub fn request_quit(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Identifier of a registered timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

#[derive(Debug, Default)]
struct Timers {
    deadlines: Vec<Option<Instant>>,
}

impl Timers {
    fn add(&mut self, deadline: Instant) -> TimerId {
        self.deadlines.push(Some(deadline));
        TimerId(self.deadlines.len() - 1)
    }

    fn update(&mut self, id: TimerId, deadline: Option<Instant>) {
        if let Some(slot) = self.deadlines.get_mut(id.0) {
            *slot = deadline;
        }
    }

    fn next_due(&self) -> Option<(TimerId, Instant)> {
        self.deadlines
            .iter()
            .enumerate()
            .filter_map(|(idx, deadline)| deadline.map(|at| (TimerId(idx), at)))
            .min_by_key(|(_, at)| *at)
    }

    fn is_armed(&self, id: TimerId) -> bool {
        matches!(self.deadlines.get(id.0), Some(Some(_)))
    }

    fn clear(&mut self) {
        self.deadlines.clear();
    }
}

/// Loop services available to a handler while it runs
pub struct LoopContext<'a> {
    timers: &'a mut Timers,
    quit: &'a QuitHandle,
    events: &'a EventSender,
}

impl LoopContext<'_> {
    /// Re-arms `timer` to fire `after` from now, or disarms it with `None`.
    pub fn timeout_update(&mut self, timer: TimerId, after: Option<Duration>) {
        self.timers
            .update(timer, after.map(|after| Instant::now() + after));
    }

    pub fn is_armed(&self, timer: TimerId) -> bool {
        self.timers.is_armed(timer)
    }

    pub fn request_quit(&self) {
        self.quit.request_quit();
    }

    pub fn events(&self) -> &EventSender {
        self.events
    }
}

/// Callbacks dispatched by [`EventLoop::run`]
pub trait LoopHandler {
    /// A timer's deadline passed. The timer is already disarmed.
    fn on_timer(&mut self, timer: TimerId, ctx: &mut LoopContext<'_>);

    /// A queued event is ready.
    fn on_event(&mut self, event: LoopEvent, ctx: &mut LoopContext<'_>);

    /// A control signal arrived.
    fn on_signal(&mut self, signal: ControlSignal, ctx: &mut LoopContext<'_>) {
        match signal {
            ControlSignal::Stop(name) => {
                info!(signal = name, "Received stop signal, goodbye!");
                ctx.request_quit();
            }
            ControlSignal::Export => self.on_event(LoopEvent::ExportRequested, ctx),
        }
    }
}

enum Step {
    Wake,
    Signal(ControlSignal),
    Event(LoopEvent),
    Timer(TimerId),
}

/// The event loop host
pub struct EventLoop {
    tx: EventSender,
    rx: Receiver<LoopEvent>,
    quit: QuitHandle,
    timers: Timers,
    signals: Option<SignalListener>,
    iterations: u64,
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            tx: EventSender { tx },
            rx,
            quit: QuitHandle::default(),
            timers: Timers::default(),
            signals: None,
            iterations: 0,
        }
    }

    pub fn sender(&self) -> EventSender {
        self.tx.clone()
    }

    pub fn quit_handle(&self) -> QuitHandle {
        self.quit.clone()
    }

    /// Makes OS control signals a source of the loop.
    pub fn attach_signals(&mut self, signals: SignalListener) {
        self.signals = Some(signals);
    }

    /// Registers a one-shot timer firing `after` from now.
    pub fn timeout_new(&mut self, after: Duration) -> TimerId {
        self.timers.add(Instant::now() + after)
    }

    /// Whether `timer` has a pending deadline
    pub fn is_armed(&self, timer: TimerId) -> bool {
        self.timers.is_armed(timer)
    }

    /// Number of dispatched wake-ups since creation
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Dispatches events to `handler` until quit is requested.
    pub async fn run<H: LoopHandler>(&mut self, handler: &mut H) {
        debug!("Event loop running");

        while !self.quit.is_requested() {
            let next = self.timers.next_due();

            let step = match next {
                // An overdue timer goes ahead of queued events
                Some((id, deadline)) if deadline <= Instant::now() => Step::Timer(id),
                _ => tokio::select! {
                    biased;
                    _ = self.quit.wake.notified() => Step::Wake,
                    Some(signal) = next_signal(&mut self.signals) => Step::Signal(signal),
                    Ok(event) = self.rx.recv() => Step::Event(event),
                    id = wait_for(next) => Step::Timer(id),
                },
            };

            self.iterations += 1;
            let mut ctx = LoopContext {
                timers: &mut self.timers,
                quit: &self.quit,
                events: &self.tx,
            };

            match step {
                Step::Wake => {}
                Step::Signal(signal) => handler.on_signal(signal, &mut ctx),
                Step::Event(event) => handler.on_event(event, &mut ctx),
                Step::Timer(id) => {
                    ctx.timers.update(id, None);
                    handler.on_timer(id, &mut ctx);
                }
            }
        }

        debug!(iterations = self.iterations, "Event loop stopped");
    }

    /// Releases timers, pending events and signal registrations.
    pub fn destroy(&mut self) {
        self.timers.clear();
        self.signals = None;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    #[cfg(test)]
    pub(crate) fn try_next_event(&self) -> Option<LoopEvent> {
        self.rx.try_recv().ok()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

async fn next_signal(signals: &mut Option<SignalListener>) -> Option<ControlSignal> {
    match signals {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_for(next: Option<(TimerId, Instant)>) -> TimerId {
    match next {
        Some((id, deadline)) => {
            tokio::time::sleep_until(deadline).await;
            id
        }
        None => std::future::pending().await,
    }
}
