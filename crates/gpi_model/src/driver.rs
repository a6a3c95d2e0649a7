//! The loop that plays the simulator's part: step the kernel, dispatch
//! what fired, repeat until end of simulation.

use std::cell::RefCell;
use std::rc::Rc;

use gpi_common::SimTime;
use gpi_config::RuntimeConfig;
use gpi_core::{Runtime, TaskFailure};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::backend::ModelBackend;
use crate::error::ModelError;
use crate::kernel::{ModelSim, SimStep};

/// Summary of a finished model run.
#[derive(Clone, Debug, Serialize)]
pub struct RunOutcome {
    /// Time when the run ended.
    pub final_time: SimTime,
    /// Settle iterations and callback batches executed.
    pub deltas: u64,
    /// Callbacks handed to the runtime.
    pub dispatched: u64,
    /// Tasks that failed with nobody joining them.
    pub failures: Vec<TaskFailure>,
    /// Whether the run ended through an end request rather than running
    /// out of events.
    pub ended_by_request: bool,
}

impl RunOutcome {
    /// No unobserved task failures.
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Builds a runtime whose only backend is `sim`.
pub fn harness(sim: ModelSim, config: RuntimeConfig) -> (Runtime, Rc<RefCell<ModelSim>>) {
    let sim = Rc::new(RefCell::new(sim));
    let rt = Runtime::with_backend(config, Box::new(ModelBackend::new(sim.clone())));
    (rt, sim)
}

/// Runs the simulation to completion.
///
/// The kernel borrow is released before each dispatch, so handlers can
/// call back into the backend. A kernel error (such as the delta limit)
/// finalizes the runtime and is returned.
pub fn run(sim: &Rc<RefCell<ModelSim>>, rt: &mut Runtime) -> Result<RunOutcome, ModelError> {
    let mut dispatched = 0u64;
    loop {
        let step = {
            let mut kernel = sim.try_borrow_mut().map_err(|_| ModelError::Busy)?;
            kernel.step()
        };
        let raws = match step {
            Ok(SimStep::Fire(raws)) => raws,
            Ok(SimStep::Finished) => break,
            Err(e) => {
                error!("simulation aborted: {e}");
                rt.finalize();
                return Err(e);
            }
        };
        for raw in raws {
            let id = sim.try_borrow_mut().map_err(|_| ModelError::Busy)?.take_fired(raw);
            let Some(id) = id else {
                debug!(raw, "callback removed before it could fire");
                continue;
            };
            rt.dispatch(id)?;
            dispatched += 1;
        }
    }
    // A runtime that never saw end of simulation still cleans up.
    rt.finalize();

    let kernel = sim.try_borrow().map_err(|_| ModelError::Busy)?;
    let outcome = RunOutcome {
        final_time: kernel.sim_time(),
        deltas: kernel.total_deltas(),
        dispatched,
        failures: rt.scheduler().failures().to_vec(),
        ended_by_request: kernel.end_requested(),
    };
    info!(
        time = outcome.final_time.steps,
        deltas = outcome.deltas,
        dispatched,
        failures = outcome.failures.len(),
        "model run complete"
    );
    Ok(outcome)
}
