//! Callback dispatch: the single entry point for every fired callback.
//!
//! Backends hand the simulator a [`CallbackId`] as user data. When the
//! callback fires, the native layer calls [`Runtime::dispatch`] with that id;
//! the dispatch table maps it back to a [`Handler`] and runs it inside a
//! re-entrancy guard. Unknown or stale ids are ignored, and handler errors
//! and panics are logged and swallowed so nothing unwinds into the simulator.

use crate::error::{panic_message, GpiError};
use crate::handle::{CallbackKind, Phase};
use crate::ids::{BackendId, CallbackId, ClockId, WaitId};
use crate::runtime::Runtime;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, trace};

/// A user callback body.
pub type UserHandler = Box<dyn FnMut(&mut Runtime) -> Result<(), GpiError>>;

/// What runs when a callback fires.
pub enum Handler {
    /// Resume the tasks of a scheduler wait.
    Wake(WaitId),
    /// Toggle a clock and re-arm it.
    Clock(ClockId),
    /// Run the start-of-simulation hook.
    StartOfSim,
    /// Run the end-of-simulation hook.
    EndOfSim,
    /// Arbitrary user code.
    User(UserHandler),
}

impl Handler {
    /// Wraps a closure as a user handler.
    pub fn user<F>(f: F) -> Self
    where
        F: FnMut(&mut Runtime) -> Result<(), GpiError> + 'static,
    {
        Handler::User(Box::new(f))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Wake(w) => write!(f, "Wake({w:?})"),
            Handler::Clock(c) => write!(f, "Clock({c:?})"),
            Handler::StartOfSim => write!(f, "StartOfSim"),
            Handler::EndOfSim => write!(f, "EndOfSim"),
            Handler::User(_) => write!(f, "User(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Idle,
    Running,
}

struct Entry {
    kind: CallbackKind,
    backend: BackendId,
    raw: u64,
    /// `None` while a repeating handler is executing.
    handler: Option<Handler>,
}

/// Counters kept by the dispatch table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Callbacks whose handler ran.
    pub dispatched: u64,
    /// Firings for ids that were unknown or already consumed.
    pub stale: u64,
    /// Handlers that returned an error or panicked.
    pub failed: u64,
}

/// The table of live callback registrations plus the re-entrancy guard.
pub struct Dispatch {
    next_id: u64,
    entries: HashMap<CallbackId, Entry>,
    pending_phase: HashMap<Phase, CallbackId>,
    guard: Guard,
    phase: Option<Phase>,
    stats: DispatchStats,
}

impl Default for Dispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatch {
    /// Creates an empty table in the idle state.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
            pending_phase: HashMap::new(),
            guard: Guard::Idle,
            phase: None,
            stats: DispatchStats::default(),
        }
    }

    /// Reserves a fresh id. Ids are never reused.
    pub(crate) fn allocate(&mut self) -> CallbackId {
        let id = CallbackId::from_raw(self.next_id);
        self.next_id += 1;
        id
    }

    pub(crate) fn insert(
        &mut self,
        id: CallbackId,
        kind: CallbackKind,
        backend: BackendId,
        raw: u64,
        handler: Handler,
    ) {
        if let Some(phase) = kind.phase() {
            self.pending_phase.insert(phase, id);
        }
        self.entries.insert(
            id,
            Entry {
                kind,
                backend,
                raw,
                handler: Some(handler),
            },
        );
    }

    /// Whether `id` is still registered.
    pub fn contains(&self, id: CallbackId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a callback for `phase` is registered and has not fired yet.
    pub fn phase_pending(&self, phase: Phase) -> bool {
        self.pending_phase.contains_key(&phase)
    }

    /// Phase of the callback currently being dispatched, if it is a phase
    /// callback.
    pub fn current_phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Whether a dispatch is in progress.
    pub fn is_running(&self) -> bool {
        self.guard == Guard::Running
    }

    /// Dispatch counters.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    fn enter(&mut self) -> Result<(), GpiError> {
        match self.guard {
            Guard::Running => Err(GpiError::ReentrancyViolation),
            Guard::Idle => {
                self.guard = Guard::Running;
                Ok(())
            }
        }
    }

    fn leave(&mut self) {
        self.guard = Guard::Idle;
        self.phase = None;
    }

    /// Takes the handler for a firing. One-shot entries are consumed here.
    fn take(&mut self, id: CallbackId) -> Option<(CallbackKind, Handler)> {
        let entry = self.entries.get_mut(&id)?;
        let kind = entry.kind;
        if kind.is_repeating() {
            let handler = entry.handler.take()?;
            return Some((kind, handler));
        }
        let entry = self.remove(id)?;
        entry.handler.map(|h| (kind, h))
    }

    /// Puts a repeating handler back unless it was deregistered meanwhile.
    fn restore(&mut self, id: CallbackId, handler: Handler) {
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.handler.is_none() {
                entry.handler = Some(handler);
            }
        }
    }

    /// Removes an entry, returning where its native registration lives.
    pub(crate) fn forget(&mut self, id: CallbackId) -> Option<(BackendId, u64)> {
        self.remove(id).map(|e| (e.backend, e.raw))
    }

    fn remove(&mut self, id: CallbackId) -> Option<Entry> {
        let entry = self.entries.remove(&id)?;
        if let Some(phase) = entry.kind.phase() {
            if self.pending_phase.get(&phase) == Some(&id) {
                self.pending_phase.remove(&phase);
            }
        }
        Some(entry)
    }

    /// Empties the table, returning every native registration still live.
    pub(crate) fn drain(&mut self) -> Vec<(CallbackId, BackendId, u64)> {
        self.pending_phase.clear();
        let mut live: Vec<_> = self
            .entries
            .drain()
            .map(|(id, e)| (id, e.backend, e.raw))
            .collect();
        live.sort_by_key(|(id, _, _)| *id);
        live
    }
}

impl Runtime {
    /// Runs the handler registered under `id`.
    ///
    /// Returns [`GpiError::ReentrancyViolation`] if called while another
    /// dispatch is running; the native layer treats that as fatal. Every
    /// other outcome, including a missing handler or one that fails or
    /// panics, is logged and reported as `Ok`.
    pub fn dispatch(&mut self, id: CallbackId) -> Result<(), GpiError> {
        self.dispatch.enter()?;

        let Some((kind, handler)) = self.dispatch.take(id) else {
            debug!(%id, "ignoring callback with unknown or consumed id");
            self.dispatch.stats.stale += 1;
            self.dispatch.leave();
            return Ok(());
        };
        self.dispatch.phase = kind.phase();
        self.dispatch.stats.dispatched += 1;
        trace!(%id, ?kind, ?handler, "dispatching");

        // Id-only handlers can be rebuilt if the work they trigger panics.
        let rebuilt = match &handler {
            Handler::Wake(wait) => Some(Handler::Wake(*wait)),
            Handler::Clock(clock) => Some(Handler::Clock(*clock)),
            _ => None,
        };
        let (handler, outcome) = match catch_unwind(AssertUnwindSafe(|| self.run_handler(handler))) {
            Ok(done) => done,
            Err(payload) => (rebuilt, Err(Failure::Panicked(panic_message(&*payload)))),
        };
        match outcome {
            Ok(()) => {}
            Err(Failure::Failed(e)) => {
                error!(%id, ?kind, "callback handler failed: {e}");
                self.dispatch.stats.failed += 1;
            }
            Err(Failure::Panicked(message)) => {
                error!(%id, ?kind, "callback handler panicked: {message}");
                self.dispatch.stats.failed += 1;
            }
        }
        if let (Some(handler), true) = (handler, kind.is_repeating()) {
            self.dispatch.restore(id, handler);
        }

        self.dispatch.leave();
        Ok(())
    }

    /// Runs one handler. Handlers are handed back so repeating
    /// registrations can be restored, even after a user panic.
    fn run_handler(&mut self, handler: Handler) -> (Option<Handler>, Result<(), Failure>) {
        match handler {
            Handler::Wake(wait) => {
                self.wake(wait);
                (Some(handler), Ok(()))
            }
            Handler::Clock(clock) => {
                let result = self.clock_toggle(clock).map_err(Failure::Failed);
                (Some(handler), result)
            }
            Handler::StartOfSim => {
                let status = self.start_of_sim_time();
                let result = if status == 0 {
                    Ok(())
                } else {
                    Err(Failure::Failed(GpiError::EnvironmentInitFailure(format!(
                        "start of simulation returned {status}"
                    ))))
                };
                (None, result)
            }
            Handler::EndOfSim => {
                self.end_of_sim_time();
                (None, Ok(()))
            }
            Handler::User(mut f) => {
                let result = match catch_unwind(AssertUnwindSafe(|| f(self))) {
                    Ok(result) => result.map_err(Failure::Failed),
                    Err(payload) => Err(Failure::Panicked(panic_message(&*payload))),
                };
                (Some(Handler::User(f)), result)
            }
        }
    }
}

/// Why a handler did not complete.
enum Failure {
    Failed(GpiError),
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(kind: CallbackKind) -> (Dispatch, CallbackId) {
        let mut d = Dispatch::new();
        let id = d.allocate();
        d.insert(id, kind, BackendId::from_raw(0), 77, Handler::StartOfSim);
        (d, id)
    }

    #[test]
    fn ids_are_unique() {
        let mut d = Dispatch::new();
        let a = d.allocate();
        let b = d.allocate();
        assert_ne!(a, b);
        assert!(a.as_raw() > 0);
    }

    #[test]
    fn one_shot_consumed_by_take() {
        let (mut d, id) = table_with(CallbackKind::Timed);
        assert!(d.take(id).is_some());
        assert!(!d.contains(id));
        assert!(d.take(id).is_none());
    }

    #[test]
    fn repeating_stays_registered() {
        let (mut d, id) =
            table_with(CallbackKind::ValueChange(crate::handle::Edge::Any));
        let (_, handler) = d.take(id).unwrap();
        assert!(d.contains(id));
        // Handler is out while running: a nested firing finds nothing.
        assert!(d.take(id).is_none());
        d.restore(id, handler);
        assert!(d.take(id).is_some());
    }

    #[test]
    fn restore_after_forget_drops_handler() {
        let (mut d, id) =
            table_with(CallbackKind::ValueChange(crate::handle::Edge::Rising));
        let (_, handler) = d.take(id).unwrap();
        assert_eq!(d.forget(id), Some((BackendId::from_raw(0), 77)));
        d.restore(id, handler);
        assert!(!d.contains(id));
    }

    #[test]
    fn phase_pending_tracks_registration() {
        let (mut d, id) = table_with(CallbackKind::Phase(Phase::ReadOnly));
        assert!(d.phase_pending(Phase::ReadOnly));
        assert!(!d.phase_pending(Phase::ReadWrite));
        d.take(id);
        assert!(!d.phase_pending(Phase::ReadOnly));
    }

    #[test]
    fn guard_rejects_nesting() {
        let mut d = Dispatch::new();
        d.enter().unwrap();
        assert!(d.is_running());
        assert_eq!(d.enter(), Err(GpiError::ReentrancyViolation));
        d.leave();
        assert!(!d.is_running());
        d.enter().unwrap();
    }

    #[test]
    fn drain_returns_live_registrations_in_order() {
        let mut d = Dispatch::new();
        for raw in [5, 6, 7] {
            let id = d.allocate();
            d.insert(id, CallbackKind::Timed, BackendId::from_raw(0), raw, Handler::EndOfSim);
        }
        let raws: Vec<u64> = d.drain().into_iter().map(|(_, _, raw)| raw).collect();
        assert_eq!(raws, vec![5, 6, 7]);
        assert!(d.is_empty());
    }
}
