//! End-to-end scenarios: tasks, triggers and clocks running against the
//! model simulator through the full runtime.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use gpi_common::Precision;
use gpi_config::RuntimeConfig;
use gpi_core::{
    CallbackId, Edge, GpiError, Handler, ObjectHandle, RunState, Runtime, SignalValue,
    StaticEnvironment, Step, TaskError, TaskId, TaskValue, Trigger, ValueFormat, Wake,
    WriteAction,
};
use gpi_model::{harness, run, ModelError, ModelSim};

type Log = Rc<RefCell<Vec<String>>>;

fn design() -> ModelSim {
    let mut sim = ModelSim::new(Precision::NS);
    let top = sim.add_scope(None, "top", "top").unwrap();
    sim.add_signal(top, "clk", 1).unwrap();
    sim.add_signal(top, "x", 8).unwrap();
    sim.add_signal(top, "data", 4).unwrap();
    sim
}

fn config() -> RuntimeConfig {
    RuntimeConfig::new("model")
}

fn start<F>(sim: ModelSim, config: RuntimeConfig, entry: F) -> (Runtime, Rc<RefCell<ModelSim>>)
where
    F: FnMut(&mut Runtime) -> Result<(), GpiError> + 'static,
{
    let (mut rt, sim) = harness(sim, config);
    rt.initialize(Box::new(StaticEnvironment::new("scenario", entry)))
        .unwrap();
    (rt, sim)
}

fn sig(rt: &mut Runtime, path: &str) -> Result<ObjectHandle, GpiError> {
    rt.handle(path)?
        .ok_or_else(|| GpiError::ObjectNotFound(path.to_string()))
}

fn bits(s: &str) -> SignalValue {
    SignalValue::bin_str(s).unwrap()
}

/// Continues with `next` if `result` is fine, fails the task otherwise.
fn then(result: Result<(), GpiError>, next: Step) -> Step {
    match result {
        Ok(()) => next,
        Err(e) => Step::fail(e.to_string()),
    }
}

#[test]
fn rising_edge_resumes_once_per_rise() {
    let log: Log = Rc::default();
    let seen = log.clone();
    let (mut rt, sim) = start(design(), config(), move |rt| {
        let clk = sig(rt, "top.clk")?;
        let drive = clk.clone();
        let mut n = 0;
        rt.spawn_fn("driver", move |cx| {
            n += 1;
            match n {
                1 => Step::Wait(Trigger::Timer(10)),
                2 => then(cx.set_value(&drive, bits("1")), Step::Wait(Trigger::Timer(10))),
                3 => then(cx.set_value(&drive, bits("0")), Step::Wait(Trigger::Timer(10))),
                _ => Step::ok(),
            }
        });
        let seen = seen.clone();
        rt.spawn_fn("watcher", move |cx| {
            if let Wake::Fired { .. } = cx.wake() {
                seen.borrow_mut().push(format!("rise@{}", cx.sim_time().steps));
            }
            Step::Wait(Trigger::rising(&clk))
        });
        Ok(())
    });

    let outcome = run(&sim, &mut rt).unwrap();
    assert_eq!(*log.borrow(), vec!["rise@10"]);
    assert_eq!(outcome.final_time.steps, 30);
    assert!(outcome.passed());
    assert_eq!(rt.state(), RunState::Finished);
}

#[test]
fn read_only_waiters_share_one_registration() {
    let log: Log = Rc::default();
    let seen = log.clone();
    let (mut rt, sim) = start(design(), config(), move |rt| {
        let xa = sig(rt, "top.x")?;
        let xb = xa.clone();
        let la = seen.clone();
        rt.spawn_fn("a", move |cx| match cx.take_wake() {
            Wake::Start => then(
                cx.set_value(&xa, SignalValue::Int(5)),
                Step::Wait(Trigger::ReadOnly),
            ),
            _ => {
                let refused = matches!(
                    cx.set_value(&xa, SignalValue::Int(6)),
                    Err(GpiError::InvalidOperation(_))
                );
                la.borrow_mut().push(format!("a refused={refused}"));
                Step::ok()
            }
        });
        let lb = seen.clone();
        rt.spawn_fn("b", move |cx| match cx.take_wake() {
            Wake::Start => Step::Wait(Trigger::ReadOnly),
            _ => {
                let v = cx.get_value(&xb, ValueFormat::Int);
                lb.borrow_mut().push(format!("b saw {v:?}"));
                Step::ok()
            }
        });
        Ok(())
    });

    let outcome = run(&sim, &mut rt).unwrap();
    // A second native read-only registration would have been refused and
    // failed task b.
    assert_eq!(*log.borrow(), vec!["a refused=true", "b saw Ok(Int(5))"]);
    assert!(outcome.passed());
}

#[test]
fn cancelled_task_never_resumes() {
    let log: Log = Rc::default();
    let victim_id: Rc<Cell<Option<TaskId>>> = Rc::default();
    let (seen, slot) = (log.clone(), victim_id.clone());
    let (mut rt, sim) = start(design(), config(), move |rt| {
        let lv = seen.clone();
        let victim = rt.spawn_fn("victim", move |cx| match cx.take_wake() {
            Wake::Start => Step::Wait(Trigger::Timer(100)),
            _ => {
                lv.borrow_mut().push("victim resumed".into());
                Step::ok()
            }
        });
        slot.set(Some(victim));
        rt.spawn_fn("killer", move |cx| match cx.take_wake() {
            Wake::Start => Step::Wait(Trigger::Timer(10)),
            _ => then(cx.runtime().cancel(victim), Step::ok()),
        });
        Ok(())
    });

    let outcome = run(&sim, &mut rt).unwrap();
    assert!(log.borrow().is_empty());
    // The victim's timer was the last one; with it gone the run ends early.
    assert_eq!(outcome.final_time.steps, 10);
    assert!(outcome.passed());
    let victim = victim_id.get().unwrap();
    assert_eq!(rt.task_result(victim), Some(&Err(TaskError::Cancelled)));
}

#[test]
fn joiners_resume_in_join_order() {
    let log: Log = Rc::default();
    let seen = log.clone();
    let (mut rt, sim) = start(design(), config(), move |rt| {
        let target = rt.spawn_fn("target", |cx| match cx.take_wake() {
            Wake::Start => Step::Wait(Trigger::Timer(5)),
            _ => Step::value(TaskValue::Int(7)),
        });
        for name in ["j1", "j2"] {
            let seen = seen.clone();
            rt.spawn_fn(name, move |cx| match cx.take_wake() {
                Wake::Joined { result, .. } => {
                    seen.borrow_mut().push(format!("{name}:{result:?}"));
                    Step::ok()
                }
                _ => Step::Join(target),
            });
        }
        Ok(())
    });

    run(&sim, &mut rt).unwrap();
    assert_eq!(*log.borrow(), vec!["j1:Ok(Int(7))", "j2:Ok(Int(7))"]);
}

#[test]
fn first_of_drops_the_losing_trigger() {
    let log: Log = Rc::default();
    let seen = log.clone();
    let (mut rt, sim) = start(design(), config(), move |rt| {
        let seen = seen.clone();
        rt.spawn_fn("racer", move |cx| match cx.take_wake() {
            Wake::Start => Step::First(vec![Trigger::Timer(50), Trigger::Timer(10)]),
            Wake::Fired { index, .. } => {
                seen.borrow_mut().push(format!("won {index}"));
                Step::ok()
            }
            Wake::Joined { .. } => Step::fail("unexpected join"),
        });
        Ok(())
    });

    let outcome = run(&sim, &mut rt).unwrap();
    assert_eq!(*log.borrow(), vec!["won 1"]);
    assert_eq!(outcome.final_time.steps, 10);
}

#[test]
fn same_batch_writes_notify_nobody() {
    let log: Log = Rc::default();
    let seen = log.clone();
    let (mut rt, sim) = start(design(), config(), move |rt| {
        let clk = sig(rt, "top.clk")?;
        let drive = clk.clone();
        rt.spawn_fn("writer", move |cx| match cx.take_wake() {
            Wake::Start => Step::Wait(Trigger::Timer(5)),
            _ => {
                let first = cx.set_value(&drive, bits("1"));
                then(first.and(cx.set_value(&drive, bits("0"))), Step::ok())
            }
        });
        let seen = seen.clone();
        rt.spawn_fn("watcher", move |cx| match cx.take_wake() {
            Wake::Start => Step::Wait(Trigger::value_change(&clk)),
            _ => {
                seen.borrow_mut().push("changed".into());
                Step::ok()
            }
        });
        Ok(())
    });

    let outcome = run(&sim, &mut rt).unwrap();
    assert!(log.borrow().is_empty());
    assert_eq!(outcome.final_time.steps, 5);
}

#[test]
fn clock_toggles_until_stopped() {
    let rises = Rc::new(Cell::new(0u32));
    let count = rises.clone();
    let (mut rt, sim) = start(design(), config(), move |rt| {
        let clk = sig(rt, "top.clk")?;
        let count = count.clone();
        rt.register_value_change(
            &clk,
            Edge::Rising,
            Handler::user(move |_| {
                count.set(count.get() + 1);
                Ok(())
            }),
        )?;
        let id = rt.create_clock(clk);
        rt.clock_start(id, 10, 5, true, WriteAction::Deposit)?;
        rt.register_timed(45, Handler::user(move |rt| rt.clock_stop(id)))?;
        Ok(())
    });

    let outcome = run(&sim, &mut rt).unwrap();
    // High at 0, 10, 20, 30 and 40; the toggle due at 45 was cancelled.
    assert_eq!(rises.get(), 5);
    assert_eq!(outcome.final_time.steps, 45);
}

#[test]
fn clock_with_minimum_period() {
    let levels: Log = Rc::default();
    let seen = levels.clone();
    let (mut rt, sim) = start(design(), config(), move |rt| {
        let clk = sig(rt, "top.clk")?;
        let probe = clk.clone();
        let seen = seen.clone();
        rt.register_value_change(
            &clk,
            Edge::Any,
            Handler::user(move |rt| {
                let v = rt.get_value(&probe, ValueFormat::BinStr)?;
                seen.borrow_mut().push(format!("{}@{}", v, rt.sim_time().steps));
                Ok(())
            }),
        )?;
        let id = rt.create_clock(clk);
        rt.clock_start(id, 2, 1, true, WriteAction::Deposit)?;
        rt.register_timed(4, Handler::user(move |rt| rt.clock_stop(id)))?;
        Ok(())
    });

    run(&sim, &mut rt).unwrap();
    assert_eq!(*levels.borrow(), vec!["1@0", "0@1", "1@2", "0@3"]);
}

#[test]
fn unobserved_failure_ends_run() {
    let (mut rt, sim) = start(design(), config(), failing);
    let outcome = run(&sim, &mut rt).unwrap();
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.final_time.steps, 10);
    assert!(outcome.ended_by_request);
    assert!(!outcome.passed());

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["failures"][0]["name"], "checker");
    assert_eq!(json["failures"][0]["at_steps"], 10);
}

#[test]
fn failure_can_be_survived() {
    let mut cfg = config();
    cfg.stop_on_failure = false;
    let (mut rt, sim) = start(design(), cfg, failing);
    let outcome = run(&sim, &mut rt).unwrap();
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.final_time.steps, 100);
    assert!(!outcome.ended_by_request);
}

fn failing(rt: &mut Runtime) -> Result<(), GpiError> {
    rt.spawn_fn("checker", |cx| match cx.take_wake() {
        Wake::Start => Step::Wait(Trigger::Timer(10)),
        _ => Step::fail("mismatch"),
    });
    rt.spawn_fn("idler", |cx| match cx.take_wake() {
        Wake::Start => Step::Wait(Trigger::Timer(100)),
        _ => Step::ok(),
    });
    Ok(())
}

#[test]
fn values_round_trip_and_force() {
    let log: Log = Rc::default();
    let seen = log.clone();
    let (mut rt, sim) = start(design(), config(), move |rt| {
        let data = sig(rt, "top.data")?;
        let read = |rt: &mut Runtime| -> Result<(), GpiError> {
            let v = rt.get_value(&data, ValueFormat::BinStr)?;
            seen.borrow_mut().push(v.to_string());
            Ok(())
        };
        rt.set_value(&data, &bits("01XZ"), WriteAction::Deposit)?;
        read(rt)?;
        rt.set_value(&data, &bits("1111"), WriteAction::Force)?;
        rt.set_value(&data, &bits("0000"), WriteAction::Deposit)?;
        read(rt)?;
        rt.set_value(&data, &bits("1111"), WriteAction::Release)?;
        read(rt)
    });

    run(&sim, &mut rt).unwrap();
    assert_eq!(*log.borrow(), vec!["01XZ", "1111", "0000"]);
}

#[test]
fn width_mismatch_is_reported() {
    let result: Rc<RefCell<Option<Result<(), GpiError>>>> = Rc::default();
    let slot = result.clone();
    let (mut rt, sim) = start(design(), config(), move |rt| {
        let data = sig(rt, "top.data")?;
        *slot.borrow_mut() = Some(rt.set_value(&data, &bits("1"), WriteAction::Deposit));
        Ok(())
    });

    run(&sim, &mut rt).unwrap();
    assert!(matches!(
        *result.borrow(),
        Some(Err(GpiError::Backend { .. }))
    ));
}

#[test]
fn nested_dispatch_is_refused() {
    let nested: Rc<RefCell<Option<Result<(), GpiError>>>> = Rc::default();
    let slot = nested.clone();
    let (mut rt, sim) = start(design(), config(), move |rt| {
        let slot = slot.clone();
        rt.register_timed(
            3,
            Handler::user(move |rt| {
                *slot.borrow_mut() = Some(rt.dispatch(CallbackId::from_raw(1)));
                Ok(())
            }),
        )?;
        Ok(())
    });

    let outcome = run(&sim, &mut rt).unwrap();
    assert_eq!(*nested.borrow(), Some(Err(GpiError::ReentrancyViolation)));
    assert_eq!(outcome.final_time.steps, 3);
}

#[test]
fn oscillating_logic_aborts_run() {
    let mut model = design();
    let top = model.find("top").unwrap();
    let en = model.add_signal(top, "en", 1).unwrap();
    let osc = model.add_signal(top, "osc", 1).unwrap();
    model
        .add_process(&[en, osc], osc, |ins| {
            if ins[0].get(0).is_high() {
                !&ins[1]
            } else {
                ins[1].clone()
            }
        })
        .unwrap();
    model.set_max_delta(100);

    let (mut rt, sim) = start(model, config(), |rt| {
        let en = sig(rt, "top.en")?;
        rt.spawn_fn("enable", move |cx| match cx.take_wake() {
            Wake::Start => Step::Wait(Trigger::Timer(5)),
            _ => then(cx.set_value(&en, bits("1")), Step::ok()),
        });
        Ok(())
    });

    let err = run(&sim, &mut rt).unwrap_err();
    assert!(matches!(err, ModelError::DeltaLimit { at: 5, max: 100 }));
    assert_eq!(rt.state(), RunState::Finished);
}

#[test]
fn second_initialize_keeps_first_environment() {
    let log: Log = Rc::default();
    let (first, second) = (log.clone(), log.clone());
    let (mut rt, sim) = start(design(), config(), move |_| {
        first.borrow_mut().push("first".into());
        Ok(())
    });
    rt.initialize(Box::new(StaticEnvironment::new("again", move |_| {
        second.borrow_mut().push("second".into());
        Ok(())
    })))
    .unwrap();

    run(&sim, &mut rt).unwrap();
    assert_eq!(*log.borrow(), vec!["first"]);
}

#[test]
fn discovery_walks_arrays_and_drivers() {
    let mut model = design();
    let top = model.find("top").unwrap();
    model
        .add_array(top, "mem", gpi_core::Range::new(0, 3), 8)
        .unwrap();
    let a = model.find("top.clk").unwrap();
    let y = model.add_signal(top, "y", 1).unwrap();
    model.add_process(&[a], y, |ins| ins[0].clone()).unwrap();

    let names: Log = Rc::default();
    let seen = names.clone();
    let (mut rt, sim) = start(model, config(), move |rt| {
        let mem = sig(rt, "top.mem")?;
        let last = rt
            .child_by_index(&mem, 3)?
            .ok_or_else(|| GpiError::ObjectNotFound("mem[3]".into()))?;
        seen.borrow_mut().push(last.full_name().to_string());
        let y = sig(rt, "top.y")?;
        for driver in rt.iterate(Some(&y), gpi_core::IterKind::Drivers)? {
            seen.borrow_mut().push(driver.full_name().to_string());
        }
        Ok(())
    });

    run(&sim, &mut rt).unwrap();
    assert_eq!(*names.borrow(), vec!["top.mem[3]", "top.clk"]);
}
