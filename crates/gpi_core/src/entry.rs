//! Entry and exit hooks, and the embedded test environment they drive.
//!
//! The native layer calls [`Runtime::initialize`] once when the simulator
//! loads the library. Initialization registers two lifecycle callbacks:
//! start of simulation runs the environment's entry procedure, end of
//! simulation tears everything down through [`Runtime::finalize`].

use crate::dispatch::Handler;
use crate::error::GpiError;
use crate::handle::LifecycleEvent;
use crate::logging;
use crate::runtime::{RunState, Runtime};
use gpi_config::RuntimeConfig;
use libloading::{Library, Symbol};
use std::io::Write;
use tracing::{debug, error, info, warn};

/// Entry procedure of a test image: spawns the first tasks.
///
/// The image must be built by the same toolchain as the runtime, since the
/// signature crosses the library boundary with the Rust ABI.
pub type EntryFn = fn(&mut Runtime) -> Result<(), GpiError>;

/// The test program hosted by the runtime.
pub trait TestEnvironment {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Prepares the environment before the simulator starts.
    fn init(&mut self, _config: &RuntimeConfig) -> Result<(), GpiError> {
        Ok(())
    }

    /// Runs the entry procedure at time zero.
    fn start(&mut self, rt: &mut Runtime) -> Result<(), GpiError>;

    /// Called once when the simulator shuts down, before tasks are cancelled.
    fn end_of_sim(&mut self, _rt: &mut Runtime) -> Result<(), GpiError> {
        Ok(())
    }

    /// Releases whatever `init` acquired.
    fn teardown(&mut self) {}
}

/// An environment linked into the same binary.
pub struct StaticEnvironment {
    name: String,
    entry: Box<dyn FnMut(&mut Runtime) -> Result<(), GpiError>>,
}

impl StaticEnvironment {
    /// Wraps an entry closure.
    pub fn new<F>(name: impl Into<String>, entry: F) -> Self
    where
        F: FnMut(&mut Runtime) -> Result<(), GpiError> + 'static,
    {
        Self {
            name: name.into(),
            entry: Box::new(entry),
        }
    }

    /// Wraps a plain entry function.
    pub fn from_fn(name: impl Into<String>, entry: EntryFn) -> Self {
        Self::new(name, entry)
    }
}

impl TestEnvironment for StaticEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, rt: &mut Runtime) -> Result<(), GpiError> {
        (self.entry)(rt)
    }
}

/// An environment loaded from a shared library at `config.image`.
#[derive(Default)]
pub struct ImageEnvironment {
    library: Option<Library>,
    entry: Option<EntryFn>,
}

impl ImageEnvironment {
    /// Creates an environment that loads its image during `init`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TestEnvironment for ImageEnvironment {
    fn name(&self) -> &str {
        "image"
    }

    fn init(&mut self, config: &RuntimeConfig) -> Result<(), GpiError> {
        let image = config.image.display().to_string();
        // SAFETY: loading runs the image's initializers; the image is the
        // test program the user asked us to host.
        let library = unsafe { Library::new(&config.image) }.map_err(|e| {
            GpiError::EnvironmentInitFailure(format!("cannot load {image}: {e}"))
        })?;
        // SAFETY: the symbol is declared with the `EntryFn` signature by
        // images built against this crate.
        let entry = unsafe {
            let symbol: Symbol<EntryFn> = library.get(config.entry.as_bytes()).map_err(|e| {
                GpiError::EnvironmentInitFailure(format!(
                    "{image} has no entry '{}': {e}",
                    config.entry
                ))
            })?;
            *symbol
        };
        debug!(%image, entry = %config.entry, "test image loaded");
        self.library = Some(library);
        self.entry = Some(entry);
        Ok(())
    }

    fn start(&mut self, rt: &mut Runtime) -> Result<(), GpiError> {
        let entry = self.entry.ok_or_else(|| {
            GpiError::EnvironmentInitFailure("test image was not loaded".into())
        })?;
        entry(rt)
    }

    fn teardown(&mut self) {
        self.entry = None;
        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                warn!("failed to unload test image: {e}");
            }
        }
    }
}

impl Runtime {
    /// Process-start hook.
    ///
    /// Waits for a debugger if configured, installs logging, prepares the
    /// environment and registers the start and end of simulation hooks.
    /// Calling it again logs a warning and does nothing.
    pub fn initialize(&mut self, env: Box<dyn TestEnvironment>) -> Result<(), GpiError> {
        if self.state != RunState::Created {
            warn!("runtime already initialized");
            return Ok(());
        }
        logging::init(&self.config);

        if let Some(delay) = self.config.attach {
            info!(
                pid = std::process::id(),
                seconds = delay.as_secs(),
                "waiting for a debugger to attach"
            );
            std::thread::sleep(delay);
        }

        let mut env = env;
        if let Err(e) = env.init(&self.config) {
            error!(env = env.name(), "{e}");
            return Err(e);
        }
        info!(env = env.name(), backends = ?self.gpi.backend_names(), "runtime initialized");
        self.env = Some(env);

        let start = self.register_lifecycle(LifecycleEvent::StartOfSim, Handler::StartOfSim)?;
        let end = self.register_lifecycle(LifecycleEvent::EndOfSim, Handler::EndOfSim)?;
        self.lifecycle.push(start);
        self.lifecycle.push(end);
        self.state = RunState::Initialized;
        Ok(())
    }

    /// First time-step hook: runs the entry procedure and drains the
    /// ready queue.
    ///
    /// Returns 0 on success. On failure the simulator is asked to end and
    /// a non-zero status is returned.
    pub fn start_of_sim_time(&mut self) -> i32 {
        info!(
            product = %self.product(),
            version = %self.version(),
            precision = ?self.precision(),
            "start of simulation"
        );
        let Some(mut env) = self.env.take() else {
            error!("start of simulation without a test environment");
            self.sim_end();
            return 1;
        };
        self.state = RunState::Running;
        let started = env.start(self);
        self.env = Some(env);

        match started {
            Ok(()) => {
                self.run_ready();
                0
            }
            Err(e) => {
                error!("test environment failed to start: {e}");
                self.sim_end();
                1
            }
        }
    }

    /// End of simulation hook: notifies the environment, then finalizes.
    pub fn end_of_sim_time(&mut self) {
        if self.state == RunState::Finished {
            return;
        }
        info!(time = self.sim_time().steps, "end of simulation");
        if let Some(mut env) = self.env.take() {
            if let Err(e) = env.end_of_sim(self) {
                error!(env = env.name(), "end of simulation hook failed: {e}");
            }
            self.env = Some(env);
        }
        self.finalize();
    }

    /// Cancels remaining tasks, stops clocks, deregisters every live
    /// callback and tears down the environment. Idempotent.
    pub fn finalize(&mut self) {
        if self.state == RunState::Finished {
            debug!("runtime already finalized");
            return;
        }
        let running = self.scheduler.running();
        for id in self.live_tasks() {
            if Some(id) == running {
                continue;
            }
            if let Err(e) = self.cancel_task(id) {
                warn!(task = ?id, "cancel at finalize failed: {e}");
            }
        }
        for id in self.clocks() {
            if let Err(e) = self.clock_stop(id) {
                warn!(clock = ?id, "stop at finalize failed: {e}");
            }
        }
        for (id, backend, raw) in self.dispatch.drain() {
            debug!(%id, raw, "deregistering dangling callback");
            if let Err(e) = self.gpi.deregister(backend, raw) {
                warn!(%id, "{e}");
            }
        }
        self.lifecycle.clear();
        if let Some(mut env) = self.env.take() {
            env.teardown();
        }

        let failures = self.scheduler.failures();
        info!(
            tasks = self.scheduler.task_count(),
            failures = failures.len(),
            "runtime finalized"
        );
        for failure in failures {
            info!(task = %failure.name, at = failure.at_steps, "FAILED: {}", failure.error);
        }
        self.state = RunState::Finished;
        if let Err(e) = std::io::stderr().flush() {
            warn!("failed to flush diagnostics: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::WriteAction;
    use crate::task::Step;
    use crate::testing::{mock_runtime, Mock};
    use crate::trigger::Trigger;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn idle(_: &mut Runtime) -> Result<(), GpiError> {
        Ok(())
    }

    #[test]
    fn initialize_registers_lifecycle_hooks() {
        let (mut rt, mock) = mock_runtime();
        rt.initialize(Box::new(StaticEnvironment::from_fn("idle", idle)))
            .unwrap();
        assert_eq!(rt.state(), RunState::Initialized);
        assert_eq!(mock.borrow().live_callbacks(), 2);
    }

    #[test]
    fn initialize_twice_is_harmless() {
        let (mut rt, mock) = mock_runtime();
        rt.initialize(Box::new(StaticEnvironment::from_fn("idle", idle)))
            .unwrap();
        rt.initialize(Box::new(StaticEnvironment::from_fn("again", idle)))
            .unwrap();
        assert_eq!(mock.borrow().live_callbacks(), 2);
    }

    #[test]
    fn start_runs_entry_and_drains() {
        let (mut rt, mock) = mock_runtime();
        let ran = Rc::new(RefCell::new(false));
        let r = ran.clone();
        rt.initialize(Box::new(StaticEnvironment::new("main", move |rt| {
            let r = r.clone();
            rt.spawn_fn("first", move |_| {
                *r.borrow_mut() = true;
                Step::ok()
            });
            Ok(())
        })))
        .unwrap();
        Mock::fire_lifecycle(&mock, &mut rt, LifecycleEvent::StartOfSim);
        assert!(*ran.borrow());
        assert_eq!(rt.state(), RunState::Running);
    }

    #[test]
    fn failed_start_ends_simulation() {
        let (mut rt, mock) = mock_runtime();
        rt.initialize(Box::new(StaticEnvironment::new("broken", |_| {
            Err(GpiError::EnvironmentInitFailure("no tests".into()))
        })))
        .unwrap();
        assert_eq!(rt.start_of_sim_time(), 1);
        assert!(mock.borrow().ended);
    }

    #[test]
    fn missing_image_fails_init() {
        let (mut rt, mock) = mock_runtime();
        rt.config.image = "/nonexistent/libtests.so".into();
        let err = rt.initialize(Box::new(ImageEnvironment::new())).unwrap_err();
        assert!(matches!(err, GpiError::EnvironmentInitFailure(_)));
        assert!(err.is_fatal());
        assert_eq!(rt.state(), RunState::Created);
        assert_eq!(mock.borrow().live_callbacks(), 0);
    }

    #[test]
    fn end_of_sim_cleans_up() {
        let (mut rt, mock) = mock_runtime();
        let clk = rt.handle("top.clk").unwrap().unwrap();
        rt.initialize(Box::new(StaticEnvironment::new("main", move |rt| {
            let clock = rt.create_clock(clk.clone());
            rt.clock_start(clock, 10, 5, true, WriteAction::Deposit)?;
            rt.spawn_fn("forever", |_| Step::Wait(Trigger::Timer(1_000)));
            rt.spawn_fn("phase", |_| Step::Wait(Trigger::ReadOnly));
            Ok(())
        })))
        .unwrap();
        Mock::fire_lifecycle(&mock, &mut rt, LifecycleEvent::StartOfSim);
        // Clock timer, two task waits, end-of-sim hook.
        assert_eq!(mock.borrow().live_callbacks(), 4);

        Mock::fire_lifecycle(&mock, &mut rt, LifecycleEvent::EndOfSim);
        assert_eq!(rt.state(), RunState::Finished);
        assert_eq!(mock.borrow().live_callbacks(), 0);
        assert!(rt.live_tasks().is_empty());
        assert!(rt.dispatch_table().is_empty());
        // Cancelled tasks are not failures.
        assert!(rt.scheduler().failures().is_empty());

        // Idempotent.
        rt.finalize();
        rt.end_of_sim_time();
        assert_eq!(rt.state(), RunState::Finished);
    }

    #[test]
    fn finalize_drains_user_callbacks() {
        let (mut rt, mock) = mock_runtime();
        rt.register_timed(50, Handler::user(|_| Ok(()))).unwrap();
        rt.register_phase(crate::handle::Phase::ReadWrite, Handler::user(|_| Ok(())))
            .unwrap();
        rt.finalize();
        assert_eq!(mock.borrow().deregistered.len(), 2);
        assert_eq!(mock.borrow().live_callbacks(), 0);
    }
}
