//! The cooperative scheduler.
//!
//! Tasks run one at a time from a FIFO ready queue. A task runs until it
//! yields; the trigger it yields becomes a native callback registration
//! whose handler is [`Handler::Wake`]. When the callback fires, every task
//! waiting on it moves back to the ready queue and the queue is drained.
//!
//! Tasks waiting on the same phase, or on the same edge of the same signal,
//! share one registration. Timers are never shared.

use crate::arena::Arena;
use crate::dispatch::Handler;
use crate::error::{panic_message, GpiError, TaskError};
use crate::handle::{CallbackHandle, Phase};
use crate::ids::{TaskId, WaitId};
use crate::runtime::Runtime;
use crate::task::{
    FnTask, Resumable, Step, TaskContext, TaskFailure, TaskResult, TaskSlot, TaskState, Wake,
};
use crate::trigger::{Trigger, WaitKey};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, trace, warn};

/// One native registration and the tasks waiting on it.
struct Wait {
    trigger: Trigger,
    callback: Option<CallbackHandle>,
    /// (task, position of the trigger in the task's list)
    waiters: Vec<(TaskId, usize)>,
}

/// Task table, pending waits and the ready queue.
#[derive(Default)]
pub struct Scheduler {
    tasks: Arena<TaskId, TaskSlot>,
    waits: HashMap<WaitId, Wait>,
    shared: HashMap<WaitKey, WaitId>,
    next_wait: u64,
    ready: VecDeque<(TaskId, Wake)>,
    running: Option<TaskId>,
    draining: bool,
    failures: Vec<TaskFailure>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks ever spawned.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of native registrations held for suspended tasks.
    pub fn pending_waits(&self) -> usize {
        self.waits.len()
    }

    /// Number of tasks queued to run.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// The task currently executing, if any.
    pub fn running(&self) -> Option<TaskId> {
        self.running
    }

    /// Failures nobody joined, in the order they happened.
    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    fn next_wait_id(&mut self) -> WaitId {
        self.next_wait += 1;
        WaitId(self.next_wait)
    }

    fn unshare(&mut self, trigger: &Trigger, wait: WaitId) {
        if let Some(key) = trigger.share_key() {
            if self.shared.get(&key) == Some(&wait) {
                self.shared.remove(&key);
            }
        }
    }
}

impl Runtime {
    /// Queues a new task. It first runs when the ready queue is next
    /// drained, after the current task (if any) yields.
    pub fn spawn<R>(&mut self, name: impl Into<String>, body: R) -> TaskId
    where
        R: Resumable + 'static,
    {
        let name = name.into();
        let id = self
            .scheduler
            .tasks
            .alloc(TaskSlot::new(name.clone(), Box::new(body)));
        self.scheduler.ready.push_back((id, Wake::Start));
        debug!(task = ?id, %name, "task spawned");
        id
    }

    /// Queues a closure as a task.
    pub fn spawn_fn<F>(&mut self, name: impl Into<String>, f: F) -> TaskId
    where
        F: FnMut(&mut TaskContext<'_>) -> Step + 'static,
    {
        self.spawn(name, FnTask(f))
    }

    /// Runs queued tasks until the queue is empty.
    ///
    /// Calls made while the queue is already being drained return at once;
    /// the outer drain picks up anything queued meanwhile.
    pub fn run_ready(&mut self) {
        if self.scheduler.draining {
            return;
        }
        self.scheduler.draining = true;
        while let Some((id, wake)) = self.scheduler.ready.pop_front() {
            self.resume(id, wake);
        }
        self.scheduler.draining = false;
    }

    /// Cancels a task that has not finished.
    ///
    /// Pending callbacks are deregistered before the task is finalized with
    /// [`TaskError::Cancelled`]; joiners then resume. Cancelling a finished
    /// task is a no-op. A task cannot cancel itself while it runs.
    pub fn cancel(&mut self, id: TaskId) -> Result<(), GpiError> {
        self.cancel_task(id)?;
        self.run_ready();
        Ok(())
    }

    /// State of a task.
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.scheduler.tasks.try_get(id).map(|slot| slot.state)
    }

    /// Result of a finished task.
    pub fn task_result(&self, id: TaskId) -> Option<&TaskResult> {
        self.scheduler
            .tasks
            .try_get(id)
            .and_then(|slot| slot.result.as_ref())
    }

    /// Name a task was spawned with.
    pub fn task_name(&self, id: TaskId) -> Option<&str> {
        self.scheduler.tasks.try_get(id).map(|slot| slot.name.as_str())
    }

    /// Tasks that have not finished, in spawn order.
    pub fn live_tasks(&self) -> Vec<TaskId> {
        self.scheduler
            .tasks
            .iter()
            .filter(|(_, slot)| slot.state != TaskState::Done)
            .map(|(id, _)| id)
            .collect()
    }

    /// Read access to the scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn cancel_task(&mut self, id: TaskId) -> Result<(), GpiError> {
        let state = self
            .task_state(id)
            .ok_or(GpiError::UnknownTask(id))?;
        if self.scheduler.running == Some(id) {
            return Err(GpiError::InvalidOperation(
                "a task cannot cancel itself while running".into(),
            ));
        }
        match state {
            TaskState::Done => return Ok(()),
            TaskState::Runnable => self.scheduler.ready.retain(|(t, _)| *t != id),
            TaskState::Suspended => {
                let slot = &mut self.scheduler.tasks[id];
                let waits = std::mem::take(&mut slot.waits);
                let joining = slot.joining.take();
                for wait in waits {
                    self.detach(id, wait);
                }
                if let Some(target) = joining.and_then(|t| self.scheduler.tasks.try_get_mut(t)) {
                    target.joiners.retain(|j| *j != id);
                }
            }
        }
        debug!(task = ?id, "task cancelled");
        self.finish_task(id, Err(TaskError::Cancelled));
        Ok(())
    }

    fn resume(&mut self, id: TaskId, wake: Wake) {
        let Some(slot) = self.scheduler.tasks.try_get_mut(id) else {
            return;
        };
        if slot.state != TaskState::Runnable {
            return;
        }
        let Some(mut body) = slot.body.take() else {
            return;
        };
        trace!(task = ?id, ?wake, "resuming");

        self.scheduler.running = Some(id);
        let outcome = {
            let mut cx = TaskContext::new(self, id, wake);
            catch_unwind(AssertUnwindSafe(|| body.resume(&mut cx)))
        };
        self.scheduler.running = None;

        match outcome {
            Ok(Step::Done(result)) => self.finish_task(id, result),
            Ok(step) => {
                self.scheduler.tasks[id].body = Some(body);
                self.yielded(id, step);
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                self.finish_task(id, Err(TaskError::Panicked(message)));
            }
        }
    }

    fn yielded(&mut self, id: TaskId, step: Step) {
        match step {
            Step::Wait(trigger) => self.suspend(id, vec![trigger]),
            Step::First(triggers) if triggers.is_empty() => {
                let err = GpiError::SchedulingError("empty trigger list".into());
                self.finish_task(id, Err(err.into()));
            }
            Step::First(triggers) => self.suspend(id, triggers),
            Step::Join(other) => self.join(id, other),
            Step::Done(result) => self.finish_task(id, result),
        }
    }

    fn suspend(&mut self, id: TaskId, triggers: Vec<Trigger>) {
        if self.dispatch.current_phase() == Some(Phase::ReadOnly) {
            if let Some(t) = triggers
                .iter()
                .find(|t| matches!(t, Trigger::ReadOnly | Trigger::ReadWrite))
            {
                let err = GpiError::SchedulingError(format!(
                    "cannot wait for {t} from the read-only phase"
                ));
                self.finish_task(id, Err(err.into()));
                return;
            }
        }

        let mut waits = Vec::with_capacity(triggers.len());
        for (index, trigger) in triggers.into_iter().enumerate() {
            let label = trigger.to_string();
            match self.attach(id, index, trigger) {
                Ok(wait) => waits.push(wait),
                Err(e) => {
                    for wait in waits {
                        self.detach(id, wait);
                    }
                    let err = GpiError::SchedulingError(format!("{label}: {e}"));
                    self.finish_task(id, Err(err.into()));
                    return;
                }
            }
        }
        let slot = &mut self.scheduler.tasks[id];
        slot.state = TaskState::Suspended;
        slot.waits = waits;
    }

    fn attach(&mut self, task: TaskId, index: usize, trigger: Trigger) -> Result<WaitId, GpiError> {
        let key = trigger.share_key();
        if let Some(existing) = key.as_ref().and_then(|k| self.scheduler.shared.get(k)).copied() {
            if let Some(wait) = self.scheduler.waits.get_mut(&existing) {
                wait.waiters.push((task, index));
                trace!(task = ?task, %trigger, "sharing pending registration");
                return Ok(existing);
            }
        }

        let wait = self.scheduler.next_wait_id();
        let handler = Handler::Wake(wait);
        let callback = match &trigger {
            Trigger::Edge(handle, edge) => self.register_value_change(handle, *edge, handler)?,
            Trigger::Timer(steps) => self.register_timed(*steps, handler)?,
            Trigger::ReadOnly => self.register_phase(Phase::ReadOnly, handler)?,
            Trigger::ReadWrite => self.register_phase(Phase::ReadWrite, handler)?,
            Trigger::NextTimeStep => self.register_phase(Phase::NextTimeStep, handler)?,
        };
        self.scheduler.waits.insert(
            wait,
            Wait {
                trigger,
                callback: Some(callback),
                waiters: vec![(task, index)],
            },
        );
        if let Some(key) = key {
            self.scheduler.shared.insert(key, wait);
        }
        Ok(wait)
    }

    /// Removes `task` from a wait, deregistering the wait once nobody is left.
    fn detach(&mut self, task: TaskId, wait: WaitId) {
        let Some(w) = self.scheduler.waits.get_mut(&wait) else {
            return;
        };
        w.waiters.retain(|(t, _)| *t != task);
        if !w.waiters.is_empty() {
            return;
        }
        let Some(w) = self.scheduler.waits.remove(&wait) else {
            return;
        };
        self.scheduler.unshare(&w.trigger, wait);
        if let Some(callback) = w.callback {
            if let Err(e) = self.deregister(callback) {
                warn!(trigger = %w.trigger, "failed to deregister orphaned callback: {e}");
            }
        }
    }

    /// Handler for a fired wait: wakes its tasks and drains the queue.
    pub(crate) fn wake(&mut self, wait: WaitId) {
        let Some(w) = self.scheduler.waits.remove(&wait) else {
            debug!(?wait, "wake for a wait that is gone");
            return;
        };
        self.scheduler.unshare(&w.trigger, wait);
        if let Some(callback) = w.callback {
            // Value-change registrations keep firing; a trigger fires once.
            if let Err(e) = self.deregister(callback) {
                warn!(trigger = %w.trigger, "failed to deregister fired callback: {e}");
            }
        }

        for (task, index) in w.waiters {
            let Some(slot) = self.scheduler.tasks.try_get_mut(task) else {
                continue;
            };
            if slot.state != TaskState::Suspended || !slot.waits.contains(&wait) {
                continue;
            }
            let others: Vec<WaitId> = std::mem::take(&mut slot.waits)
                .into_iter()
                .filter(|other| *other != wait)
                .collect();
            slot.state = TaskState::Runnable;
            for other in others {
                self.detach(task, other);
            }
            self.scheduler.ready.push_back((
                task,
                Wake::Fired {
                    index,
                    trigger: w.trigger.clone(),
                },
            ));
        }
        self.run_ready();
    }

    fn join(&mut self, id: TaskId, other: TaskId) {
        if other == id {
            let err = GpiError::SchedulingError("a task cannot join itself".into());
            self.finish_task(id, Err(err.into()));
            return;
        }
        let Some(target) = self.scheduler.tasks.try_get_mut(other) else {
            let err = GpiError::SchedulingError(format!("join of unknown task {other:?}"));
            self.finish_task(id, Err(err.into()));
            return;
        };
        if target.state == TaskState::Done {
            let result = target.result.clone().unwrap_or(Err(TaskError::Cancelled));
            self.scheduler
                .ready
                .push_front((id, Wake::Joined { task: other, result }));
            return;
        }
        target.joiners.push(id);
        let slot = &mut self.scheduler.tasks[id];
        slot.state = TaskState::Suspended;
        slot.joining = Some(other);
    }

    fn finish_task(&mut self, id: TaskId, result: TaskResult) {
        let at_steps = self.sim_time().steps;
        let slot = &mut self.scheduler.tasks[id];
        slot.body = None;
        slot.state = TaskState::Done;
        slot.waits.clear();
        slot.joining = None;
        slot.result = Some(result.clone());
        let joiners = std::mem::take(&mut slot.joiners);
        let name = slot.name.clone();

        match &result {
            Ok(value) => debug!(task = ?id, %name, ?value, "task finished"),
            Err(TaskError::Cancelled) => debug!(task = ?id, %name, "task finished cancelled"),
            Err(e) if joiners.is_empty() => {
                error!(task = ?id, %name, "{e}");
                self.scheduler.failures.push(TaskFailure {
                    task: id,
                    name,
                    error: e.to_string(),
                    at_steps,
                });
                if self.config.stop_on_failure {
                    self.sim_end();
                }
            }
            Err(e) => debug!(task = ?id, %name, "{e}; passing to joiners"),
        }

        for joiner in joiners {
            let Some(slot) = self.scheduler.tasks.try_get_mut(joiner) else {
                continue;
            };
            if slot.state != TaskState::Suspended || slot.joining != Some(id) {
                continue;
            }
            slot.state = TaskState::Runnable;
            slot.joining = None;
            self.scheduler.ready.push_back((
                joiner,
                Wake::Joined {
                    task: id,
                    result: result.clone(),
                },
            ));
        }
    }
}
