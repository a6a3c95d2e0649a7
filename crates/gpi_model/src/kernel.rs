//! Model simulation kernel: timer queue, settle loop and time-step phases.
//!
//! [`ModelSim`] walks each time step through the same order a real
//! simulator uses: due timers, settling with value-change notification,
//! read-write callbacks (settling again after each batch), read-only
//! callbacks, then the advance to the next scheduled time. The kernel never
//! calls the runtime itself; [`step`](ModelSim::step) returns the batch of
//! raw callbacks due next and the driver dispatches them.
//!
//! Writes take effect immediately and mark the object dirty. Settling runs
//! the combinational processes reading dirty objects until nothing changes,
//! then compares each touched object with the value it had at its last
//! notification. An object written several times in one batch notifies
//! once with its final value, and not at all if it ends where it started.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use gpi_common::{Interner, Logic, LogicVec, Precision, SimTime};
use gpi_core::{Arena, CallbackId, Edge, LifecycleEvent, Phase, SignalValue, ValueFormat, WriteAction};
use tracing::{debug, trace};

use crate::design::{ModelObject, ModelProcess, ObjId};
use crate::error::ModelError;

/// Default cap on settle iterations and callback batches per time step.
pub const DEFAULT_MAX_DELTA: u32 = 10_000;

/// What a callback registration waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Registration {
    Timed { at: u64 },
    ValueChange { obj: ObjId, edge: Edge },
    Phase(Phase),
    Lifecycle(LifecycleEvent),
}

#[derive(Clone, Copy, Debug)]
struct Registered {
    id: CallbackId,
    reg: Registration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Boot,
    Active,
    ReadWrite,
    ReadOnly,
    NextTime,
    Ending,
    Finished,
}

/// The result of one [`ModelSim::step`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimStep {
    /// Raw callbacks to dispatch, in firing order.
    Fire(Vec<u64>),
    /// End of simulation has been reported; nothing more will fire.
    Finished,
}

/// The model simulator.
pub struct ModelSim {
    pub(crate) objects: Arena<ObjId, ModelObject>,
    pub(crate) roots: Vec<ObjId>,
    pub(crate) interner: Interner,
    pub(crate) processes: Vec<ModelProcess>,
    /// Min-heap of (time, raw callback).
    timers: BinaryHeap<Reverse<(u64, u64)>>,
    callbacks: BTreeMap<u64, Registered>,
    next_raw: u64,
    now: u64,
    stage: Stage,
    read_only: bool,
    end_requested: bool,
    precision: Precision,
    time_limit: Option<u64>,
    max_delta: u32,
    deltas_now: u32,
    total_deltas: u64,
    dirty: BTreeSet<ObjId>,
}

impl ModelSim {
    /// Creates an empty design at time zero.
    pub fn new(precision: Precision) -> Self {
        Self {
            objects: Arena::new(),
            roots: Vec::new(),
            interner: Interner::new(),
            processes: Vec::new(),
            timers: BinaryHeap::new(),
            callbacks: BTreeMap::new(),
            next_raw: 0,
            now: 0,
            stage: Stage::Boot,
            read_only: false,
            end_requested: false,
            precision,
            time_limit: None,
            max_delta: DEFAULT_MAX_DELTA,
            deltas_now: 0,
            total_deltas: 0,
            dirty: BTreeSet::new(),
        }
    }

    /// Stops the run once the next time step would pass `steps`.
    pub fn set_time_limit(&mut self, steps: Option<u64>) {
        self.time_limit = steps;
    }

    /// Sets the per-time-step delta limit.
    pub fn set_max_delta(&mut self, max: u32) {
        self.max_delta = max;
    }

    /// Current time in steps.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Current time.
    pub fn sim_time(&self) -> SimTime {
        SimTime::from_steps(self.now)
    }

    /// Length of one step.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Settle iterations and callback batches run so far.
    pub fn total_deltas(&self) -> u64 {
        self.total_deltas
    }

    /// Whether end of simulation has been requested.
    pub fn end_requested(&self) -> bool {
        self.end_requested
    }

    /// Whether the end-of-simulation batch has been handed out.
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Finished
    }

    /// Whether read-only callbacks are being dispatched.
    pub fn in_read_only(&self) -> bool {
        self.read_only
    }

    /// Asks the kernel to finish after the current batch.
    pub fn request_end(&mut self) {
        if !self.end_requested {
            debug!(at = self.now, "end of simulation requested");
        }
        self.end_requested = true;
    }

    // Values

    /// The value readers currently see.
    pub fn value(&self, id: ObjId) -> Option<&SignalValue> {
        self.objects.try_get(id).and_then(ModelObject::effective)
    }

    /// Reads a value in the requested format.
    pub fn read(&self, id: ObjId, format: ValueFormat) -> Result<SignalValue, ModelError> {
        let obj = self.object(id)?;
        let value = obj.effective().ok_or_else(|| ModelError::TypeMismatch {
            object: obj.full_name.clone(),
            reason: "scopes hold no value".into(),
        })?;
        present(&obj.full_name, value, format, obj.signed)
    }

    /// Writes a value. Takes effect immediately; processes and value-change
    /// callbacks see it at the next settle.
    pub fn write(
        &mut self,
        id: ObjId,
        value: &SignalValue,
        action: WriteAction,
    ) -> Result<(), ModelError> {
        let read_only = self.read_only;
        let obj = self
            .objects
            .try_get_mut(id)
            .ok_or_else(|| ModelError::UnknownObject(format!("{id:?}")))?;
        if read_only {
            return Err(ModelError::ReadOnlyWrite(obj.full_name.clone()));
        }
        if obj.is_const {
            return Err(ModelError::Constant(obj.full_name.clone()));
        }
        match action {
            WriteAction::Release => obj.forced = None,
            WriteAction::Force => obj.forced = Some(coerce(obj, value)?),
            WriteAction::Deposit | WriteAction::NoDelay => obj.value = Some(coerce(obj, value)?),
        }
        trace!(object = %obj.full_name, ?action, %value, "write");
        self.dirty.insert(id);
        Ok(())
    }

    // Callbacks

    fn add_callback(&mut self, id: CallbackId, reg: Registration) -> u64 {
        self.next_raw += 1;
        self.callbacks.insert(self.next_raw, Registered { id, reg });
        self.next_raw
    }

    /// Registers a callback `steps` after now.
    pub fn register_timed(&mut self, steps: u64, id: CallbackId) -> u64 {
        let at = self.now.saturating_add(steps);
        let raw = self.add_callback(id, Registration::Timed { at });
        self.timers.push(Reverse((at, raw)));
        raw
    }

    /// Registers a repeating value-change callback on a value object.
    pub fn register_value_change(
        &mut self,
        obj: ObjId,
        edge: Edge,
        id: CallbackId,
    ) -> Result<u64, ModelError> {
        let o = self.object(obj)?;
        if o.value.is_none() {
            return Err(ModelError::TypeMismatch {
                object: o.full_name.clone(),
                reason: "scopes do not change value".into(),
            });
        }
        Ok(self.add_callback(id, Registration::ValueChange { obj, edge }))
    }

    /// Registers a callback for the next occurrence of `phase`.
    pub fn register_phase(&mut self, phase: Phase, id: CallbackId) -> u64 {
        self.add_callback(id, Registration::Phase(phase))
    }

    /// Registers a start or end of simulation callback.
    pub fn register_lifecycle(&mut self, event: LifecycleEvent, id: CallbackId) -> u64 {
        self.add_callback(id, Registration::Lifecycle(event))
    }

    /// Removes a registration.
    pub fn deregister(&mut self, raw: u64) -> Result<(), ModelError> {
        self.callbacks
            .remove(&raw)
            .map(|_| ())
            .ok_or(ModelError::UnknownCallback(raw))
    }

    /// Claims a callback from a fired batch.
    ///
    /// Returns `None` if it was removed after the batch was built. One-shot
    /// registrations are consumed; value-change registrations stay.
    pub fn take_fired(&mut self, raw: u64) -> Option<CallbackId> {
        let cb = *self.callbacks.get(&raw)?;
        if !matches!(cb.reg, Registration::ValueChange { .. }) {
            self.callbacks.remove(&raw);
        }
        Some(cb.id)
    }

    /// Number of live registrations.
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    fn matching(&self, pred: impl Fn(&Registration) -> bool) -> Vec<u64> {
        self.callbacks
            .iter()
            .filter(|(_, cb)| pred(&cb.reg))
            .map(|(raw, _)| *raw)
            .collect()
    }

    // Stepping

    /// Advances to the next non-empty batch of callbacks.
    pub fn step(&mut self) -> Result<SimStep, ModelError> {
        self.read_only = false;
        loop {
            let batch = match self.stage {
                Stage::Boot => {
                    for idx in 0..self.processes.len() {
                        self.evaluate(idx);
                    }
                    self.settle()?;
                    for (_, obj) in self.objects.iter_mut() {
                        obj.settled = obj.effective().cloned();
                    }
                    self.stage = Stage::Active;
                    self.matching(|r| *r == Registration::Lifecycle(LifecycleEvent::StartOfSim))
                }
                Stage::Active => {
                    if self.end_requested {
                        self.stage = Stage::Ending;
                        continue;
                    }
                    let due = self.due_timers();
                    if due.is_empty() {
                        let notified = self.settle_and_notify()?;
                        if notified.is_empty() {
                            self.stage = Stage::ReadWrite;
                        }
                        notified
                    } else {
                        due
                    }
                }
                Stage::ReadWrite => {
                    let batch = self.matching(|r| *r == Registration::Phase(Phase::ReadWrite));
                    if batch.is_empty() {
                        self.stage = Stage::ReadOnly;
                    } else {
                        self.count_delta()?;
                        self.stage = Stage::Active;
                    }
                    batch
                }
                Stage::ReadOnly => {
                    self.stage = Stage::NextTime;
                    let batch = self.matching(|r| *r == Registration::Phase(Phase::ReadOnly));
                    self.read_only = !batch.is_empty();
                    batch
                }
                Stage::NextTime => {
                    if self.end_requested {
                        self.stage = Stage::Ending;
                        continue;
                    }
                    match self.next_timer() {
                        None => {
                            debug!(at = self.now, "no more scheduled events");
                            self.stage = Stage::Ending;
                            continue;
                        }
                        Some(at) if self.time_limit.is_some_and(|limit| at > limit) => {
                            debug!(at = self.now, next = at, "time limit reached");
                            self.stage = Stage::Ending;
                            continue;
                        }
                        Some(at) if at <= self.now => {
                            self.stage = Stage::Active;
                            continue;
                        }
                        Some(at) => {
                            trace!(from = self.now, to = at, "advancing time");
                            self.now = at;
                            self.deltas_now = 0;
                            self.stage = Stage::Active;
                            self.matching(|r| *r == Registration::Phase(Phase::NextTimeStep))
                        }
                    }
                }
                Stage::Ending => {
                    self.stage = Stage::Finished;
                    self.matching(|r| *r == Registration::Lifecycle(LifecycleEvent::EndOfSim))
                }
                Stage::Finished => return Ok(SimStep::Finished),
            };
            if !batch.is_empty() {
                trace!(at = self.now, stage = ?self.stage, count = batch.len(), "firing");
                return Ok(SimStep::Fire(batch));
            }
        }
    }

    fn due_timers(&mut self) -> Vec<u64> {
        let mut due = Vec::new();
        while let Some(&Reverse((at, raw))) = self.timers.peek() {
            if at > self.now {
                break;
            }
            self.timers.pop();
            if self.callbacks.contains_key(&raw) {
                due.push(raw);
            }
        }
        due
    }

    /// Time of the earliest live timer, dropping deregistered ones.
    fn next_timer(&mut self) -> Option<u64> {
        while let Some(&Reverse((at, raw))) = self.timers.peek() {
            if self.callbacks.contains_key(&raw) {
                return Some(at);
            }
            self.timers.pop();
        }
        None
    }

    fn count_delta(&mut self) -> Result<(), ModelError> {
        self.deltas_now += 1;
        self.total_deltas += 1;
        if self.deltas_now > self.max_delta {
            return Err(ModelError::DeltaLimit {
                at: self.now,
                max: self.max_delta,
            });
        }
        Ok(())
    }

    /// Runs processes until no output changes. Returns every object that
    /// was dirty along the way.
    fn settle(&mut self) -> Result<BTreeSet<ObjId>, ModelError> {
        let mut touched = BTreeSet::new();
        while !self.dirty.is_empty() {
            self.count_delta()?;
            let dirty = std::mem::take(&mut self.dirty);
            for idx in 0..self.processes.len() {
                if self.processes[idx].inputs.iter().any(|i| dirty.contains(i)) {
                    self.evaluate(idx);
                }
            }
            touched.extend(dirty);
        }
        Ok(touched)
    }

    fn evaluate(&mut self, idx: usize) {
        let process = &self.processes[idx];
        let inputs: Vec<LogicVec> = process.inputs.iter().map(|&i| self.bits_of(i)).collect();
        let out = SignalValue::BinStr((process.eval)(&inputs));
        let output = process.output;
        let obj = &mut self.objects[output];
        if obj.value.as_ref() != Some(&out) {
            obj.value = Some(out);
            self.dirty.insert(output);
        }
    }

    fn bits_of(&self, id: ObjId) -> LogicVec {
        match self.value(id) {
            Some(SignalValue::BinStr(bits)) => bits.clone(),
            Some(SignalValue::Int(v)) => LogicVec::from_i64(i64::from(*v), 32),
            _ => LogicVec::new(0),
        }
    }

    fn settle_and_notify(&mut self) -> Result<Vec<u64>, ModelError> {
        let touched = self.settle()?;
        let mut batch = Vec::new();
        for id in touched {
            let obj = &mut self.objects[id];
            let Some(current) = obj.effective().cloned() else {
                continue;
            };
            if obj.settled.as_ref() == Some(&current) {
                continue;
            }
            let bit = lsb(&current);
            obj.settled = Some(current);
            batch.extend(self.callbacks.iter().filter_map(|(raw, cb)| match cb.reg {
                Registration::ValueChange { obj, edge } if obj == id && edge.accepts(bit) => {
                    Some(*raw)
                }
                _ => None,
            }));
        }
        if !batch.is_empty() {
            self.count_delta()?;
        }
        Ok(batch)
    }
}

fn lsb(value: &SignalValue) -> Option<Logic> {
    value
        .as_bits()
        .filter(|bits| bits.width() > 0)
        .map(|bits| bits.get(0))
}

/// Converts an incoming value to the object's storage format.
fn coerce(obj: &ModelObject, value: &SignalValue) -> Result<SignalValue, ModelError> {
    let mismatch = |reason: String| ModelError::TypeMismatch {
        object: obj.full_name.clone(),
        reason,
    };
    let current = obj
        .value
        .as_ref()
        .ok_or_else(|| mismatch("scopes hold no value".into()))?;
    match (current, value) {
        (SignalValue::BinStr(cur), SignalValue::BinStr(new)) => {
            if cur.width() != new.width() {
                return Err(ModelError::WidthMismatch {
                    object: obj.full_name.clone(),
                    expected: cur.width(),
                    actual: new.width(),
                });
            }
            Ok(value.clone())
        }
        (SignalValue::BinStr(cur), SignalValue::Int(v)) => Ok(SignalValue::BinStr(
            LogicVec::from_i64(i64::from(*v), cur.width()),
        )),
        (SignalValue::Int(_), SignalValue::Int(_))
        | (SignalValue::Real(_), SignalValue::Real(_))
        | (SignalValue::Bytes(_), SignalValue::Bytes(_)) => Ok(value.clone()),
        (SignalValue::Int(_), SignalValue::BinStr(bits)) => bits
            .to_i32()
            .map(SignalValue::Int)
            .ok_or_else(|| mismatch(format!("'{bits}' is not a resolvable 32-bit value"))),
        (SignalValue::Real(_), SignalValue::Int(v)) => Ok(SignalValue::Real(f64::from(*v))),
        (cur, new) => Err(mismatch(format!(
            "cannot write {:?} to a {:?} object",
            new.format(),
            cur.format()
        ))),
    }
}

/// Converts a stored value to the requested format.
fn present(
    name: &str,
    value: &SignalValue,
    format: ValueFormat,
    signed: bool,
) -> Result<SignalValue, ModelError> {
    if value.format() == format {
        return Ok(value.clone());
    }
    let converted = match (format, value) {
        (ValueFormat::Int, SignalValue::BinStr(bits)) if signed => {
            bits.to_signed_i32().map(SignalValue::Int)
        }
        (ValueFormat::Int, v) => v.as_int().map(SignalValue::Int),
        (ValueFormat::BinStr, SignalValue::Int(v)) => {
            Some(SignalValue::BinStr(LogicVec::from_i64(i64::from(*v), 32)))
        }
        (ValueFormat::Real, SignalValue::Int(v)) => Some(SignalValue::Real(f64::from(*v))),
        (ValueFormat::Bytes, SignalValue::BinStr(bits)) => {
            Some(SignalValue::Bytes(bits.to_string().into_bytes()))
        }
        _ => None,
    };
    converted.ok_or_else(|| ModelError::TypeMismatch {
        object: name.to_string(),
        reason: format!("cannot read a {:?} value as {format:?}", value.format()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cb(n: u64) -> CallbackId {
        CallbackId::from_raw(n)
    }

    fn sim() -> (ModelSim, ObjId, ObjId) {
        let mut sim = ModelSim::new(Precision::NS);
        let top = sim.add_scope(None, "top", "top").unwrap();
        let clk = sim.add_signal(top, "clk", 1).unwrap();
        let data = sim.add_signal(top, "data", 4).unwrap();
        (sim, clk, data)
    }

    /// Steps until a batch fires, claiming every callback in it.
    fn fire(sim: &mut ModelSim) -> Vec<CallbackId> {
        match sim.step().unwrap() {
            SimStep::Fire(raws) => raws.into_iter().filter_map(|r| sim.take_fired(r)).collect(),
            SimStep::Finished => Vec::new(),
        }
    }

    #[test]
    fn boot_fires_start_of_sim() {
        let (mut sim, _, _) = sim();
        sim.register_lifecycle(LifecycleEvent::StartOfSim, cb(1));
        assert_eq!(fire(&mut sim), vec![cb(1)]);
        assert_eq!(sim.pending_callbacks(), 0);
    }

    #[test]
    fn empty_design_finishes() {
        let (mut sim, _, _) = sim();
        sim.register_lifecycle(LifecycleEvent::EndOfSim, cb(9));
        assert_eq!(fire(&mut sim), vec![cb(9)]);
        assert_eq!(sim.step().unwrap(), SimStep::Finished);
        assert!(sim.is_finished());
    }

    #[test]
    fn timers_fire_in_time_order() {
        let (mut sim, _, _) = sim();
        sim.register_timed(20, cb(2));
        sim.register_timed(10, cb(1));
        assert_eq!(fire(&mut sim), vec![cb(1)]);
        assert_eq!(sim.now(), 10);
        assert_eq!(fire(&mut sim), vec![cb(2)]);
        assert_eq!(sim.now(), 20);
    }

    #[test]
    fn deregistered_timer_never_fires() {
        let (mut sim, _, _) = sim();
        let raw = sim.register_timed(5, cb(1));
        sim.register_timed(10, cb(2));
        sim.deregister(raw).unwrap();
        assert_eq!(fire(&mut sim), vec![cb(2)]);
        assert!(matches!(sim.deregister(raw), Err(ModelError::UnknownCallback(_))));
    }

    #[test]
    fn phases_run_in_order_within_a_step() {
        let (mut sim, _, _) = sim();
        sim.register_timed(5, cb(1));
        assert_eq!(fire(&mut sim), vec![cb(1)]);
        sim.register_phase(Phase::ReadOnly, cb(3));
        sim.register_phase(Phase::ReadWrite, cb(2));
        assert_eq!(fire(&mut sim), vec![cb(2)]);
        assert!(!sim.in_read_only());
        assert_eq!(fire(&mut sim), vec![cb(3)]);
        assert!(sim.in_read_only());
        assert_eq!(sim.now(), 5);
    }

    #[test]
    fn next_time_step_fires_on_advance() {
        let (mut sim, _, _) = sim();
        sim.register_phase(Phase::NextTimeStep, cb(1));
        sim.register_timed(7, cb(2));
        assert_eq!(fire(&mut sim), vec![cb(1)]);
        assert_eq!(sim.now(), 7);
        assert_eq!(fire(&mut sim), vec![cb(2)]);
    }

    #[test]
    fn read_only_batch_refuses_writes() {
        let (mut sim, clk, _) = sim();
        sim.register_timed(1, cb(1));
        fire(&mut sim);
        sim.register_phase(Phase::ReadOnly, cb(2));
        fire(&mut sim);
        let err = sim
            .write(clk, &SignalValue::bin_str("1").unwrap(), WriteAction::Deposit)
            .unwrap_err();
        assert!(matches!(err, ModelError::ReadOnlyWrite(_)));
    }

    #[test]
    fn edges_filter_on_new_value() {
        let (mut sim, clk, _) = sim();
        sim.register_value_change(clk, Edge::Rising, cb(1)).unwrap();
        sim.register_value_change(clk, Edge::Falling, cb(2)).unwrap();
        sim.register_value_change(clk, Edge::Any, cb(3)).unwrap();
        sim.register_timed(1, cb(10));
        assert_eq!(fire(&mut sim), vec![cb(10)]);

        sim.write(clk, &SignalValue::bin_str("1").unwrap(), WriteAction::Deposit)
            .unwrap();
        assert_eq!(fire(&mut sim), vec![cb(1), cb(3)]);
        sim.write(clk, &SignalValue::bin_str("0").unwrap(), WriteAction::Deposit)
            .unwrap();
        assert_eq!(fire(&mut sim), vec![cb(2), cb(3)]);
        // Value-change registrations stay.
        assert_eq!(sim.pending_callbacks(), 3);
    }

    #[test]
    fn same_batch_writes_coalesce() {
        let (mut sim, clk, _) = sim();
        sim.register_value_change(clk, Edge::Any, cb(1)).unwrap();
        sim.register_timed(1, cb(10));
        assert_eq!(fire(&mut sim), vec![cb(10)]);
        let one = SignalValue::bin_str("1").unwrap();
        let zero = SignalValue::bin_str("0").unwrap();
        sim.write(clk, &one, WriteAction::Deposit).unwrap();
        sim.write(clk, &zero, WriteAction::Deposit).unwrap();
        // Back where it started: nothing to report, straight to the end.
        assert_eq!(sim.step().unwrap(), SimStep::Finished);
    }

    #[test]
    fn processes_propagate_writes() {
        let (mut sim, clk, _) = sim();
        let top = sim.find("top").unwrap();
        let inv = sim.add_signal(top, "clk_n", 1).unwrap();
        sim.add_process(&[clk], inv, |ins| !&ins[0]).unwrap();
        sim.register_timed(1, cb(1));
        fire(&mut sim);
        // Boot evaluated the process once.
        assert_eq!(sim.value(inv), Some(&SignalValue::bin_str("1").unwrap()));
        sim.register_value_change(inv, Edge::Falling, cb(2)).unwrap();
        sim.write(clk, &SignalValue::bin_str("1").unwrap(), WriteAction::Deposit)
            .unwrap();
        assert_eq!(fire(&mut sim), vec![cb(2)]);
        assert_eq!(sim.value(inv), Some(&SignalValue::bin_str("0").unwrap()));
    }

    #[test]
    fn combinational_loop_hits_delta_limit() {
        let (mut sim, clk, _) = sim();
        sim.add_process(&[clk], clk, |ins| !&ins[0]).unwrap();
        sim.set_max_delta(50);
        let err = sim.step().unwrap_err();
        assert!(matches!(err, ModelError::DeltaLimit { at: 0, max: 50 }));
    }

    #[test]
    fn force_overrides_until_release() {
        let (mut sim, _, data) = sim();
        let five = SignalValue::BinStr(LogicVec::from_u64(5, 4));
        let nine = SignalValue::BinStr(LogicVec::from_u64(9, 4));
        sim.write(data, &five, WriteAction::Force).unwrap();
        sim.write(data, &nine, WriteAction::Deposit).unwrap();
        assert_eq!(sim.value(data), Some(&five));
        sim.write(data, &nine, WriteAction::Release).unwrap();
        assert_eq!(sim.value(data), Some(&nine));
    }

    #[test]
    fn writes_check_width_and_type() {
        let (mut sim, clk, data) = sim();
        assert!(matches!(
            sim.write(data, &SignalValue::bin_str("1").unwrap(), WriteAction::Deposit),
            Err(ModelError::WidthMismatch { expected: 4, actual: 1, .. })
        ));
        assert!(matches!(
            sim.write(clk, &SignalValue::Real(1.5), WriteAction::Deposit),
            Err(ModelError::TypeMismatch { .. })
        ));
        sim.write(data, &SignalValue::Int(-1), WriteAction::Deposit).unwrap();
        assert_eq!(sim.read(data, ValueFormat::BinStr).unwrap().to_string(), "1111");
        assert_eq!(sim.read(data, ValueFormat::Int).unwrap(), SignalValue::Int(15));
        sim.write(clk, &SignalValue::Int(1), WriteAction::Deposit).unwrap();
        assert_eq!(sim.read(clk, ValueFormat::Int).unwrap(), SignalValue::Int(1));
    }

    #[test]
    fn signed_signals_read_negative() {
        let (mut sim, _, _) = sim();
        let top = sim.find("top").unwrap();
        let delta = sim.add_signed_signal(top, "delta", 4).unwrap();
        sim.write(delta, &SignalValue::Int(-3), WriteAction::Deposit).unwrap();
        assert_eq!(sim.read(delta, ValueFormat::BinStr).unwrap().to_string(), "1101");
        assert_eq!(sim.read(delta, ValueFormat::Int).unwrap(), SignalValue::Int(-3));
    }

    #[test]
    fn integer_objects_read_in_every_format() {
        let (mut sim, _, _) = sim();
        let top = sim.find("top").unwrap();
        let n = sim.add_integer(top, "count").unwrap();
        sim.write(n, &SignalValue::Int(3), WriteAction::Deposit).unwrap();
        assert_eq!(sim.read(n, ValueFormat::Real).unwrap(), SignalValue::Real(3.0));
        let bits = sim.read(n, ValueFormat::BinStr).unwrap();
        assert_eq!(bits.as_int(), Some(3));
        assert!(sim.read(n, ValueFormat::Bytes).is_err());
    }

    #[test]
    fn constants_refuse_writes() {
        let (mut sim, _, _) = sim();
        let top = sim.find("top").unwrap();
        let w = sim.add_const(top, "WIDTH", 4).unwrap();
        assert!(matches!(
            sim.write(w, &SignalValue::Int(5), WriteAction::Deposit),
            Err(ModelError::Constant(_))
        ));
    }

    #[test]
    fn time_limit_ends_run() {
        let (mut sim, _, _) = sim();
        sim.set_time_limit(Some(100));
        sim.register_timed(50, cb(1));
        sim.register_timed(150, cb(2));
        sim.register_lifecycle(LifecycleEvent::EndOfSim, cb(3));
        assert_eq!(fire(&mut sim), vec![cb(1)]);
        assert_eq!(fire(&mut sim), vec![cb(3)]);
        assert_eq!(sim.now(), 50);
    }

    #[test]
    fn end_request_skips_remaining_timers() {
        let (mut sim, _, _) = sim();
        sim.register_timed(10, cb(1));
        sim.register_timed(20, cb(2));
        sim.register_lifecycle(LifecycleEvent::EndOfSim, cb(3));
        assert_eq!(fire(&mut sim), vec![cb(1)]);
        sim.request_end();
        assert_eq!(fire(&mut sim), vec![cb(3)]);
        assert_eq!(sim.step().unwrap(), SimStep::Finished);
    }
}
