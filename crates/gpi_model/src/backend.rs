//! [`Backend`] implementation over a shared [`ModelSim`].

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use gpi_common::{Precision, SimTime};
use gpi_core::{
    Backend, CallbackId, Edge, GpiError, IterKind, LifecycleEvent, ObjectDesc, ObjectHandle,
    ObjectIter, Phase, SignalValue, ValueFormat, WriteAction,
};
use tracing::warn;

use crate::design::ObjId;
use crate::kernel::ModelSim;

/// Adapter handing runtime requests to the model simulator.
///
/// The simulator is shared with the driver loop, which releases its borrow
/// before dispatching, so every call here can borrow it freely.
pub struct ModelBackend {
    sim: Rc<RefCell<ModelSim>>,
}

impl ModelBackend {
    /// Wraps a shared simulator.
    pub fn new(sim: Rc<RefCell<ModelSim>>) -> Self {
        Self { sim }
    }

    fn sim(&self) -> Result<RefMut<'_, ModelSim>, GpiError> {
        self.sim
            .try_borrow_mut()
            .map_err(|_| GpiError::backend("model", "simulator state is busy"))
    }

    /// Resolves a handle through its full name, so handles issued by other
    /// backends for the same object still work.
    fn lookup(sim: &ModelSim, obj: &ObjectHandle) -> Result<ObjId, GpiError> {
        sim.find(obj.full_name())
            .ok_or_else(|| GpiError::ObjectNotFound(obj.full_name().to_string()))
    }
}

impl Backend for ModelBackend {
    fn name(&self) -> &str {
        "model"
    }

    fn root(&mut self, name: Option<&str>) -> Result<ObjectDesc, GpiError> {
        let sim = self.sim()?;
        let id = sim.root(name)?;
        Ok(sim.describe(id)?)
    }

    fn child_by_name(
        &mut self,
        parent: &ObjectHandle,
        name: &str,
    ) -> Result<Option<ObjectDesc>, GpiError> {
        let sim = self.sim()?;
        let Some(parent) = sim.find(parent.full_name()) else {
            return Ok(None);
        };
        sim.child(parent, name)
            .map(|id| sim.describe(id).map_err(GpiError::from))
            .transpose()
    }

    fn child_by_index(
        &mut self,
        parent: &ObjectHandle,
        index: i32,
    ) -> Result<Option<ObjectDesc>, GpiError> {
        let sim = self.sim()?;
        let Some(parent) = sim.find(parent.full_name()) else {
            return Ok(None);
        };
        sim.child_at(parent, index)
            .map(|id| sim.describe(id).map_err(GpiError::from))
            .transpose()
    }

    fn iterate(
        &mut self,
        parent: Option<&ObjectHandle>,
        kind: IterKind,
    ) -> Result<ObjectIter, GpiError> {
        let sim = self.sim()?;
        let parent = parent.map(|p| Self::lookup(&sim, p)).transpose()?;
        let descs = sim
            .related(parent, kind)
            .into_iter()
            .map(|id| sim.describe(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(descs.into_iter()))
    }

    fn get_value(
        &mut self,
        obj: &ObjectHandle,
        format: ValueFormat,
    ) -> Result<SignalValue, GpiError> {
        let sim = self.sim()?;
        let id = Self::lookup(&sim, obj)?;
        Ok(sim.read(id, format)?)
    }

    fn set_value(
        &mut self,
        obj: &ObjectHandle,
        value: &SignalValue,
        action: WriteAction,
    ) -> Result<(), GpiError> {
        let mut sim = self.sim()?;
        let id = Self::lookup(&sim, obj)?;
        Ok(sim.write(id, value, action)?)
    }

    fn register_timed(&mut self, steps: u64, id: CallbackId) -> Result<u64, GpiError> {
        Ok(self.sim()?.register_timed(steps, id))
    }

    fn register_value_change(
        &mut self,
        obj: &ObjectHandle,
        edge: Edge,
        id: CallbackId,
    ) -> Result<u64, GpiError> {
        let mut sim = self.sim()?;
        let target = Self::lookup(&sim, obj)?;
        sim.register_value_change(target, edge, id)
            .map_err(|e| GpiError::RegistrationFailure(e.to_string()))
    }

    fn register_phase(&mut self, phase: Phase, id: CallbackId) -> Result<u64, GpiError> {
        Ok(self.sim()?.register_phase(phase, id))
    }

    fn register_lifecycle(
        &mut self,
        event: LifecycleEvent,
        id: CallbackId,
    ) -> Result<u64, GpiError> {
        Ok(self.sim()?.register_lifecycle(event, id))
    }

    fn deregister(&mut self, raw: u64) -> Result<(), GpiError> {
        Ok(self.sim()?.deregister(raw)?)
    }

    fn sim_time(&self) -> SimTime {
        match self.sim.try_borrow() {
            Ok(sim) => sim.sim_time(),
            Err(_) => {
                warn!("simulator state busy while reading time");
                SimTime::zero()
            }
        }
    }

    fn precision(&self) -> Precision {
        self.sim
            .try_borrow()
            .map(|sim| sim.precision())
            .unwrap_or_default()
    }

    fn product(&self) -> String {
        "gpi-model".into()
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").into()
    }

    fn sim_end(&mut self) {
        match self.sim.try_borrow_mut() {
            Ok(mut sim) => sim.request_end(),
            Err(_) => warn!("simulator state busy; end request dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpi_config::RuntimeConfig;
    use gpi_core::{ObjectType, Runtime};

    fn shared() -> Rc<RefCell<ModelSim>> {
        let mut sim = ModelSim::new(Precision::NS);
        let top = sim.add_scope(None, "top", "top_tb").unwrap();
        sim.add_signal(top, "clk", 1).unwrap();
        sim.add_array(top, "mem", gpi_core::Range::new(0, 3), 8).unwrap();
        sim.add_package("pkg").unwrap();
        Rc::new(RefCell::new(sim))
    }

    fn runtime(sim: &Rc<RefCell<ModelSim>>) -> Runtime {
        Runtime::with_backend(
            RuntimeConfig::new("test-image"),
            Box::new(ModelBackend::new(sim.clone())),
        )
    }

    #[test]
    fn discovery_through_runtime() {
        let sim = shared();
        let mut rt = runtime(&sim);
        let top = rt.root(None).unwrap();
        assert_eq!(top.kind(), ObjectType::Module);
        assert_eq!(top.definition_name(), Some("top_tb"));
        let clk = rt.handle("top.clk").unwrap().unwrap();
        assert_eq!(clk.full_name(), "top.clk");
        assert!(rt.handle("top.nope").unwrap().is_none());
        let mem = rt.handle("top.mem").unwrap().unwrap();
        let elem = rt.child_by_index(&mem, 2).unwrap().unwrap();
        assert_eq!(elem.full_name(), "top.mem[2]");
    }

    #[test]
    fn package_iteration() {
        let sim = shared();
        let mut rt = runtime(&sim);
        let names: Vec<String> = rt
            .iterate(None, IterKind::PackageScopes)
            .unwrap()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(names, vec!["pkg"]);
    }

    #[test]
    fn values_round_trip() {
        let sim = shared();
        let mut rt = runtime(&sim);
        let clk = rt.handle("top.clk").unwrap().unwrap();
        rt.set_value(&clk, &SignalValue::bin_str("1").unwrap(), WriteAction::Deposit)
            .unwrap();
        assert_eq!(
            rt.get_value(&clk, ValueFormat::BinStr).unwrap(),
            SignalValue::bin_str("1").unwrap()
        );
        assert_eq!(rt.get_value(&clk, ValueFormat::Int).unwrap(), SignalValue::Int(1));
    }

    #[test]
    fn simulator_queries() {
        let sim = shared();
        let rt = runtime(&sim);
        assert_eq!(rt.product(), "gpi-model");
        assert_eq!(rt.precision(), Precision::NS);
        assert_eq!(rt.sim_time(), SimTime::zero());
    }

    #[test]
    fn sim_end_reaches_kernel() {
        let sim = shared();
        let mut rt = runtime(&sim);
        rt.sim_end();
        assert!(sim.borrow().end_requested());
    }

    #[test]
    fn busy_state_is_an_error() {
        let sim = shared();
        let mut rt = runtime(&sim);
        let _held = sim.borrow_mut();
        assert!(matches!(rt.root(None), Err(GpiError::Backend { .. })));
    }
}
