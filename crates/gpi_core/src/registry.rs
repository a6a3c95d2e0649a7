//! The object/callback registry: routes uniform operations to the backend
//! that owns each handle.
//!
//! The registry is the only place that knows more than one backend may be
//! loaded. Everything above it works with [`ObjectHandle`]s and never asks
//! which simulator interface produced them.

use crate::arena::Arena;
use crate::backend::{Backend, IterKind, ObjectIter, SignalValue, ValueFormat, WriteAction};
use crate::error::GpiError;
use crate::handle::{Edge, LifecycleEvent, ObjectHandle, Phase};
use crate::ids::{BackendId, CallbackId};
use gpi_common::{Precision, SimTime};
use tracing::{debug, warn};

/// Owns the loaded backends.
///
/// The first backend added is the primary one: it receives timed, phase and
/// lifecycle registrations and answers simulator-wide queries.
#[derive(Default)]
pub struct Registry {
    backends: Arena<BackendId, Box<dyn Backend>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a backend and returns the tag its handles will carry.
    pub fn add_backend(&mut self, backend: Box<dyn Backend>) -> BackendId {
        debug!(backend = backend.name(), "backend registered");
        self.backends.alloc(backend)
    }

    /// Number of loaded backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Returns `true` if no backend is loaded.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Names of the loaded backends in load order.
    pub fn backend_names(&self) -> Vec<String> {
        self.backends.values().map(|b| b.name().to_string()).collect()
    }

    fn primary(&mut self) -> Result<(BackendId, &mut (dyn Backend + 'static)), GpiError> {
        match self.backends.iter_mut().next() {
            Some((id, backend)) => Ok((id, &mut **backend)),
            None => Err(GpiError::InvalidOperation("no backend loaded".into())),
        }
    }

    fn primary_ref(&self) -> Option<&dyn Backend> {
        self.backends.values().next().map(|b| &**b)
    }

    fn owner(&mut self, backend: BackendId) -> Result<&mut (dyn Backend + 'static), GpiError> {
        self.backends
            .try_get_mut(backend)
            .map(|b| &mut **b)
            .ok_or_else(|| {
                GpiError::InvalidOperation(format!("handle from unknown backend {backend:?}"))
            })
    }

    /// Resolves a top-level scope, asking each backend in load order.
    pub fn root(&mut self, name: Option<&str>) -> Result<ObjectHandle, GpiError> {
        for (id, backend) in self.backends.iter_mut() {
            match backend.root(name) {
                Ok(desc) => return Ok(ObjectHandle::new(id, desc)),
                Err(GpiError::ObjectNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(GpiError::ObjectNotFound(
            name.unwrap_or("<simulation root>").to_string(),
        ))
    }

    /// Finds a child by name, trying the parent's backend first and then the
    /// others (a VHDL instance below a Verilog scope, or the reverse).
    pub fn child_by_name(
        &mut self,
        parent: &ObjectHandle,
        name: &str,
    ) -> Result<Option<ObjectHandle>, GpiError> {
        let first = parent.backend();
        if let Some(desc) = self.owner(first)?.child_by_name(parent, name)? {
            return Ok(Some(ObjectHandle::new(first, desc)));
        }
        for (id, backend) in self.backends.iter_mut() {
            if id == first {
                continue;
            }
            if let Some(desc) = backend.child_by_name(parent, name)? {
                return Ok(Some(ObjectHandle::new(id, desc)));
            }
        }
        Ok(None)
    }

    /// Selects a child of an indexable object.
    pub fn child_by_index(
        &mut self,
        parent: &ObjectHandle,
        index: i32,
    ) -> Result<Option<ObjectHandle>, GpiError> {
        let id = parent.backend();
        Ok(self
            .owner(id)?
            .child_by_index(parent, index)?
            .map(|desc| ObjectHandle::new(id, desc)))
    }

    /// Starts an iteration rooted at `parent`, or at the primary backend's root.
    pub fn iterate(
        &mut self,
        parent: Option<&ObjectHandle>,
        kind: IterKind,
    ) -> Result<Handles, GpiError> {
        let (id, inner) = match parent {
            Some(p) => (p.backend(), self.owner(p.backend())?.iterate(Some(p), kind)?),
            None => {
                let (id, backend) = self.primary()?;
                (id, backend.iterate(None, kind)?)
            }
        };
        Ok(Handles { backend: id, inner })
    }

    /// Reads a value through the owning backend.
    pub fn get_value(
        &mut self,
        obj: &ObjectHandle,
        format: ValueFormat,
    ) -> Result<SignalValue, GpiError> {
        self.owner(obj.backend())?.get_value(obj, format)
    }

    /// Writes a value through the owning backend.
    pub fn set_value(
        &mut self,
        obj: &ObjectHandle,
        value: &SignalValue,
        action: WriteAction,
    ) -> Result<(), GpiError> {
        self.owner(obj.backend())?.set_value(obj, value, action)
    }

    /// Registers a timed callback on the primary backend.
    pub fn register_timed(
        &mut self,
        steps: u64,
        id: CallbackId,
    ) -> Result<(BackendId, u64), GpiError> {
        let (backend_id, backend) = self.primary()?;
        Ok((backend_id, backend.register_timed(steps, id)?))
    }

    /// Registers a value-change callback on the backend owning `obj`.
    pub fn register_value_change(
        &mut self,
        obj: &ObjectHandle,
        edge: Edge,
        id: CallbackId,
    ) -> Result<(BackendId, u64), GpiError> {
        let raw = self
            .owner(obj.backend())?
            .register_value_change(obj, edge, id)?;
        Ok((obj.backend(), raw))
    }

    /// Registers a phase callback on the primary backend.
    pub fn register_phase(
        &mut self,
        phase: Phase,
        id: CallbackId,
    ) -> Result<(BackendId, u64), GpiError> {
        let (backend_id, backend) = self.primary()?;
        Ok((backend_id, backend.register_phase(phase, id)?))
    }

    /// Registers a lifecycle callback on the primary backend.
    pub fn register_lifecycle(
        &mut self,
        event: LifecycleEvent,
        id: CallbackId,
    ) -> Result<(BackendId, u64), GpiError> {
        let (backend_id, backend) = self.primary()?;
        Ok((backend_id, backend.register_lifecycle(event, id)?))
    }

    /// Removes a native registration.
    pub fn deregister(&mut self, backend: BackendId, raw: u64) -> Result<(), GpiError> {
        self.owner(backend)?.deregister(raw)
    }

    /// Current simulation time, zero when no backend is loaded.
    pub fn sim_time(&self) -> SimTime {
        self.primary_ref()
            .map(|b| b.sim_time())
            .unwrap_or_default()
    }

    /// Simulator precision, picoseconds when no backend is loaded.
    pub fn precision(&self) -> Precision {
        self.primary_ref()
            .map(|b| b.precision())
            .unwrap_or_default()
    }

    /// Simulator product name.
    pub fn product(&self) -> String {
        self.primary_ref()
            .map(|b| b.product())
            .unwrap_or_else(|| "none".to_string())
    }

    /// Simulator version string.
    pub fn version(&self) -> String {
        self.primary_ref()
            .map(|b| b.version())
            .unwrap_or_default()
    }

    /// Asks the simulator to finish.
    pub fn sim_end(&mut self) {
        match self.primary() {
            Ok((_, backend)) => backend.sim_end(),
            Err(_) => warn!("sim_end requested with no backend loaded"),
        }
    }
}

/// Iterator over handles, tagging every discovered object with its backend.
pub struct Handles {
    backend: BackendId,
    inner: ObjectIter,
}

impl Iterator for Handles {
    type Item = ObjectHandle;

    fn next(&mut self) -> Option<ObjectHandle> {
        self.inner
            .next()
            .map(|desc| ObjectHandle::new(self.backend, desc))
    }
}
