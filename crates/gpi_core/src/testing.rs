//! In-crate test backend: a flat design under `top` whose callbacks fire
//! only when a test says so.

use crate::backend::{Backend, IterKind, ObjectIter, SignalValue, ValueFormat, WriteAction};
use crate::error::GpiError;
use crate::handle::{Edge, LifecycleEvent, ObjectDesc, ObjectHandle, ObjectType, Phase};
use crate::ids::CallbackId;
use crate::runtime::Runtime;
use gpi_common::{LogicVec, Precision, SimTime};
use gpi_config::RuntimeConfig;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

#[derive(Clone, Copy, Debug)]
enum MockCb {
    Timed(u64),
    ValueChange(u64, Edge),
    Phase(Phase),
    Lifecycle(LifecycleEvent),
}

pub(crate) struct MockState {
    objects: Vec<ObjectDesc>,
    values: HashMap<u64, SignalValue>,
    callbacks: BTreeMap<u64, (CallbackId, MockCb)>,
    next_raw: u64,
    pub now: u64,
    pub ended: bool,
    pub end_requests: u32,
    pub deregistered: Vec<u64>,
    pub writes: Vec<(u64, SignalValue)>,
    pub refuse_registrations: bool,
}

impl MockState {
    fn new() -> Self {
        let clk = ObjectDesc::new(2, "clk", "top.clk", ObjectType::Logic);
        let mut data = ObjectDesc::new(3, "data", "top.data", ObjectType::LogicArray);
        data.num_elems = Some(4);
        let mut width = ObjectDesc::new(4, "WIDTH", "top.WIDTH", ObjectType::Integer);
        width.is_const = true;
        Self {
            objects: vec![clk, data, width],
            values: HashMap::new(),
            callbacks: BTreeMap::new(),
            next_raw: 100,
            now: 0,
            ended: false,
            end_requests: 0,
            deregistered: Vec::new(),
            writes: Vec::new(),
            refuse_registrations: false,
        }
    }

    pub fn live_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    pub fn value_of(&self, raw: u64) -> Option<&SignalValue> {
        self.values.get(&raw)
    }

    fn add(&mut self, id: CallbackId, cb: MockCb) -> Result<u64, GpiError> {
        if self.refuse_registrations {
            return Err(GpiError::RegistrationFailure("mock refuses".into()));
        }
        self.next_raw += 1;
        self.callbacks.insert(self.next_raw, (id, cb));
        Ok(self.next_raw)
    }

    fn take_where(&mut self, pred: impl Fn(&MockCb) -> bool) -> Vec<CallbackId> {
        let raws: Vec<u64> = self
            .callbacks
            .iter()
            .filter(|(_, (_, cb))| pred(cb))
            .map(|(raw, _)| *raw)
            .collect();
        raws.into_iter()
            .filter_map(|raw| self.callbacks.remove(&raw).map(|(id, _)| id))
            .collect()
    }
}

/// The backend half; tests keep the shared state to drive it.
pub(crate) struct Mock(Rc<RefCell<MockState>>);

pub(crate) fn mock_runtime() -> (Runtime, Rc<RefCell<MockState>>) {
    let state = Rc::new(RefCell::new(MockState::new()));
    let rt = Runtime::with_backend(
        RuntimeConfig::new("test-image"),
        Box::new(Mock(state.clone())),
    );
    (rt, state)
}

impl Mock {
    /// Moves time forward, firing due timers in order.
    pub fn advance(state: &Rc<RefCell<MockState>>, rt: &mut Runtime, steps: u64) {
        let target = state.borrow().now + steps;
        loop {
            let due = {
                let s = state.borrow();
                s.callbacks
                    .iter()
                    .filter_map(|(raw, (id, cb))| match cb {
                        MockCb::Timed(at) if *at <= target => Some((*at, *raw, *id)),
                        _ => None,
                    })
                    .min()
            };
            let Some((at, raw, id)) = due else { break };
            {
                let mut s = state.borrow_mut();
                s.now = at;
                s.callbacks.remove(&raw);
            }
            rt.dispatch(id).unwrap();
        }
        state.borrow_mut().now = target;
    }

    /// Sets a signal and fires the value-change callbacks its edge matches.
    pub fn toggle(state: &Rc<RefCell<MockState>>, rt: &mut Runtime, obj: &ObjectHandle, bits: &str) {
        let value = LogicVec::from_binary_str(bits).unwrap();
        let lsb = (value.width() > 0).then(|| value.get(0));
        let ids: Vec<CallbackId> = {
            let mut s = state.borrow_mut();
            s.values.insert(obj.raw(), SignalValue::BinStr(value));
            s.callbacks
                .values()
                .filter_map(|(id, cb)| match cb {
                    MockCb::ValueChange(raw, edge) if *raw == obj.raw() => {
                        edge.accepts(lsb).then_some(*id)
                    }
                    _ => None,
                })
                .collect()
        };
        for id in ids {
            rt.dispatch(id).unwrap();
        }
    }

    /// Fires every pending callback for `phase`.
    pub fn fire_phase(state: &Rc<RefCell<MockState>>, rt: &mut Runtime, phase: Phase) {
        let ids = state
            .borrow_mut()
            .take_where(|cb| matches!(cb, MockCb::Phase(p) if *p == phase));
        for id in ids {
            rt.dispatch(id).unwrap();
        }
    }

    /// Fires every pending callback for a lifecycle event.
    pub fn fire_lifecycle(state: &Rc<RefCell<MockState>>, rt: &mut Runtime, event: LifecycleEvent) {
        let ids = state
            .borrow_mut()
            .take_where(|cb| matches!(cb, MockCb::Lifecycle(e) if *e == event));
        for id in ids {
            rt.dispatch(id).unwrap();
        }
    }
}

impl Backend for Mock {
    fn name(&self) -> &str {
        "mock"
    }

    fn root(&mut self, name: Option<&str>) -> Result<ObjectDesc, GpiError> {
        match name {
            None | Some("top") => Ok(ObjectDesc::new(1, "top", "top", ObjectType::Module)),
            Some(other) => Err(GpiError::ObjectNotFound(other.to_string())),
        }
    }

    fn child_by_name(
        &mut self,
        parent: &ObjectHandle,
        name: &str,
    ) -> Result<Option<ObjectDesc>, GpiError> {
        if parent.raw() != 1 {
            return Ok(None);
        }
        Ok(self.0.borrow().objects.iter().find(|d| d.name == name).cloned())
    }

    fn child_by_index(
        &mut self,
        _parent: &ObjectHandle,
        _index: i32,
    ) -> Result<Option<ObjectDesc>, GpiError> {
        Ok(None)
    }

    fn iterate(
        &mut self,
        _parent: Option<&ObjectHandle>,
        _kind: IterKind,
    ) -> Result<ObjectIter, GpiError> {
        Ok(Box::new(self.0.borrow().objects.clone().into_iter()))
    }

    fn get_value(&mut self, obj: &ObjectHandle, _format: ValueFormat) -> Result<SignalValue, GpiError> {
        let width = obj.num_elems().unwrap_or(1);
        Ok(self
            .0
            .borrow()
            .values
            .get(&obj.raw())
            .cloned()
            .unwrap_or_else(|| SignalValue::BinStr(LogicVec::new(width))))
    }

    fn set_value(
        &mut self,
        obj: &ObjectHandle,
        value: &SignalValue,
        _action: WriteAction,
    ) -> Result<(), GpiError> {
        let mut s = self.0.borrow_mut();
        s.values.insert(obj.raw(), value.clone());
        s.writes.push((obj.raw(), value.clone()));
        Ok(())
    }

    fn register_timed(&mut self, steps: u64, id: CallbackId) -> Result<u64, GpiError> {
        let mut s = self.0.borrow_mut();
        let at = s.now + steps;
        s.add(id, MockCb::Timed(at))
    }

    fn register_value_change(
        &mut self,
        obj: &ObjectHandle,
        edge: Edge,
        id: CallbackId,
    ) -> Result<u64, GpiError> {
        self.0
            .borrow_mut()
            .add(id, MockCb::ValueChange(obj.raw(), edge))
    }

    fn register_phase(&mut self, phase: Phase, id: CallbackId) -> Result<u64, GpiError> {
        self.0.borrow_mut().add(id, MockCb::Phase(phase))
    }

    fn register_lifecycle(&mut self, event: LifecycleEvent, id: CallbackId) -> Result<u64, GpiError> {
        self.0.borrow_mut().add(id, MockCb::Lifecycle(event))
    }

    fn deregister(&mut self, raw: u64) -> Result<(), GpiError> {
        let mut s = self.0.borrow_mut();
        s.callbacks.remove(&raw);
        s.deregistered.push(raw);
        Ok(())
    }

    fn sim_time(&self) -> SimTime {
        SimTime::from_steps(self.0.borrow().now)
    }

    fn precision(&self) -> Precision {
        Precision::PS
    }

    fn product(&self) -> String {
        "mocksim".into()
    }

    fn version(&self) -> String {
        "0.0".into()
    }

    fn sim_end(&mut self) {
        let mut s = self.0.borrow_mut();
        s.ended = true;
        s.end_requests += 1;
    }
}
