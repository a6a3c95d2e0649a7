//! The runtime: one value owning every piece of simulation-control state.
//!
//! A [`Runtime`] is created once per simulator process. The native entry
//! layer keeps it in a thread-local slot and hands `&mut Runtime` to
//! [`Runtime::dispatch`] for every fired callback; tests and the model
//! backend drive it directly.

use crate::arena::Arena;
use crate::backend::{Backend, IterKind, SignalValue, ValueFormat, WriteAction};
use crate::clock::GpiClock;
use crate::dispatch::{Dispatch, Handler};
use crate::entry::TestEnvironment;
use crate::error::GpiError;
use crate::handle::{CallbackHandle, CallbackKind, Edge, LifecycleEvent, ObjectHandle, Phase};
use crate::ids::{BackendId, CallbackId, ClockId};
use crate::registry::{Handles, Registry};
use crate::scheduler::Scheduler;
use gpi_common::{Precision, SimTime};
use gpi_config::RuntimeConfig;
use serde::Serialize;
use tracing::{debug, info};

/// Where the runtime is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunState {
    /// Built, entry hook not run yet.
    Created,
    /// Environment initialized, waiting for start of simulation.
    Initialized,
    /// Test environment started.
    Running,
    /// Finalized; no further callbacks are serviced.
    Finished,
}

/// Simulation-control state for one simulator process.
pub struct Runtime {
    pub(crate) gpi: Registry,
    pub(crate) dispatch: Dispatch,
    pub(crate) scheduler: Scheduler,
    pub(crate) clocks: Arena<ClockId, Option<GpiClock>>,
    pub(crate) env: Option<Box<dyn TestEnvironment>>,
    pub(crate) state: RunState,
    pub(crate) config: RuntimeConfig,
    pub(crate) lifecycle: Vec<CallbackHandle>,
    pub(crate) end_requested: bool,
}

impl Runtime {
    /// Creates a runtime with no backend loaded.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            gpi: Registry::new(),
            dispatch: Dispatch::new(),
            scheduler: Scheduler::new(),
            clocks: Arena::new(),
            env: None,
            state: RunState::Created,
            config,
            lifecycle: Vec::new(),
            end_requested: false,
        }
    }

    /// Creates a runtime with one backend already loaded.
    pub fn with_backend(config: RuntimeConfig, backend: Box<dyn Backend>) -> Self {
        let mut rt = Self::new(config);
        rt.add_backend(backend);
        rt
    }

    /// Loads a backend. The first one loaded becomes the primary backend.
    pub fn add_backend(&mut self, backend: Box<dyn Backend>) -> BackendId {
        let name = backend.name().to_string();
        let id = self.gpi.add_backend(backend);
        info!(backend = %name, "backend loaded");
        id
    }

    /// Resolved configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// The backend registry.
    pub fn registry(&self) -> &Registry {
        &self.gpi
    }

    /// The dispatch table.
    pub fn dispatch_table(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Whether [`sim_end`](Runtime::sim_end) has been called.
    pub fn end_requested(&self) -> bool {
        self.end_requested
    }

    // Discovery

    /// Looks up a root scope by name, or the first root when `name` is `None`.
    pub fn root(&mut self, name: Option<&str>) -> Result<ObjectHandle, GpiError> {
        self.gpi.root(name)
    }

    /// Looks up a child of `parent` by leaf name.
    pub fn child_by_name(
        &mut self,
        parent: &ObjectHandle,
        name: &str,
    ) -> Result<Option<ObjectHandle>, GpiError> {
        self.gpi.child_by_name(parent, name)
    }

    /// Looks up an element of an indexable object.
    pub fn child_by_index(
        &mut self,
        parent: &ObjectHandle,
        index: i32,
    ) -> Result<Option<ObjectHandle>, GpiError> {
        self.gpi.child_by_index(parent, index)
    }

    /// Iterates over objects related to `parent`.
    pub fn iterate(
        &mut self,
        parent: Option<&ObjectHandle>,
        kind: IterKind,
    ) -> Result<Handles, GpiError> {
        self.gpi.iterate(parent, kind)
    }

    /// Resolves a dotted path such as `top.dut.data`.
    ///
    /// The first component names a root; `Ok(None)` means some later
    /// component does not exist.
    pub fn handle(&mut self, path: &str) -> Result<Option<ObjectHandle>, GpiError> {
        let mut parts = path.split('.');
        let first = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| GpiError::InvalidArgument(format!("empty path '{path}'")))?;
        let mut current = self.root(Some(first))?;
        for part in parts {
            if part.is_empty() {
                return Err(GpiError::InvalidArgument(format!("empty component in '{path}'")));
            }
            match self.child_by_name(&current, part)? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    // Values

    /// Reads the value of an object.
    pub fn get_value(
        &mut self,
        obj: &ObjectHandle,
        format: ValueFormat,
    ) -> Result<SignalValue, GpiError> {
        self.gpi.get_value(obj, format)
    }

    /// Writes the value of an object.
    ///
    /// Writes are refused during the read-only phase and on constants.
    pub fn set_value(
        &mut self,
        obj: &ObjectHandle,
        value: &SignalValue,
        action: WriteAction,
    ) -> Result<(), GpiError> {
        if self.dispatch.current_phase() == Some(Phase::ReadOnly) {
            return Err(GpiError::InvalidOperation(format!(
                "write to {} during the read-only phase",
                obj.full_name()
            )));
        }
        if obj.is_const() {
            return Err(GpiError::InvalidOperation(format!(
                "{} is a constant",
                obj.full_name()
            )));
        }
        self.gpi.set_value(obj, value, action)
    }

    // Simulator

    /// Current simulation time.
    pub fn sim_time(&self) -> SimTime {
        self.gpi.sim_time()
    }

    /// Simulator precision.
    pub fn precision(&self) -> Precision {
        self.gpi.precision()
    }

    /// Simulator product name.
    pub fn product(&self) -> String {
        self.gpi.product()
    }

    /// Simulator version string.
    pub fn version(&self) -> String {
        self.gpi.version()
    }

    /// Asks the simulator to finish. Only the first request reaches it.
    pub fn sim_end(&mut self) {
        if self.end_requested {
            debug!("simulation end already requested");
            return;
        }
        self.end_requested = true;
        info!(time = self.sim_time().steps, "requesting simulation end");
        self.gpi.sim_end();
    }

    // Callbacks

    /// Registers `handler` to run after `steps` simulator steps.
    pub fn register_timed(&mut self, steps: u64, handler: Handler) -> Result<CallbackHandle, GpiError> {
        self.register(CallbackKind::Timed, handler, |gpi, id| {
            gpi.register_timed(steps, id)
        })
    }

    /// Registers `handler` to run on every matching change of `obj`.
    pub fn register_value_change(
        &mut self,
        obj: &ObjectHandle,
        edge: Edge,
        handler: Handler,
    ) -> Result<CallbackHandle, GpiError> {
        self.register(CallbackKind::ValueChange(edge), handler, |gpi, id| {
            gpi.register_value_change(obj, edge, id)
        })
    }

    /// Registers `handler` for a scheduling phase.
    ///
    /// Only one callback per phase may be pending.
    pub fn register_phase(&mut self, phase: Phase, handler: Handler) -> Result<CallbackHandle, GpiError> {
        if self.dispatch.phase_pending(phase) {
            return Err(GpiError::RegistrationFailure(format!(
                "a {phase:?} callback is already pending"
            )));
        }
        self.register(CallbackKind::Phase(phase), handler, |gpi, id| {
            gpi.register_phase(phase, id)
        })
    }

    /// Registers `handler` for start or end of simulation.
    pub fn register_lifecycle(
        &mut self,
        event: LifecycleEvent,
        handler: Handler,
    ) -> Result<CallbackHandle, GpiError> {
        self.register(CallbackKind::Lifecycle(event), handler, |gpi, id| {
            gpi.register_lifecycle(event, id)
        })
    }

    fn register<F>(
        &mut self,
        kind: CallbackKind,
        handler: Handler,
        native: F,
    ) -> Result<CallbackHandle, GpiError>
    where
        F: FnOnce(&mut Registry, CallbackId) -> Result<(BackendId, u64), GpiError>,
    {
        let id = self.dispatch.allocate();
        let (backend, raw) = native(&mut self.gpi, id)?;
        self.dispatch.insert(id, kind, backend, raw, handler);
        debug!(%id, ?kind, raw, "callback registered");
        Ok(CallbackHandle::new(id, backend, raw, kind))
    }

    /// Removes a registration.
    ///
    /// Deregistering a one-shot callback that already fired, or anything
    /// deregistered before, is a no-op.
    pub fn deregister(&mut self, handle: CallbackHandle) -> Result<(), GpiError> {
        let Some((backend, raw)) = self.dispatch.forget(handle.id()) else {
            debug!(id = %handle.id(), "deregister of a callback that is gone");
            return Ok(());
        };
        self.gpi.deregister(backend, raw)
    }

    /// Phase of the callback being dispatched right now.
    pub fn current_phase(&self) -> Option<Phase> {
        self.dispatch.current_phase()
    }
}
