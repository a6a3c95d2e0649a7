//! Tasks: resumable units of test logic driven by the scheduler.
//!
//! A task is any [`Resumable`] value. Each call to
//! [`resume`](Resumable::resume) runs the task until it either yields a
//! wait condition ([`Step::Wait`], [`Step::First`], [`Step::Join`]) or
//! finishes ([`Step::Done`]). The [`TaskContext`] passed in tells the task
//! why it was resumed and gives it the runtime for reads, writes and
//! spawning.

use crate::backend::{SignalValue, ValueFormat, WriteAction};
use crate::error::{GpiError, TaskError};
use crate::handle::ObjectHandle;
use crate::ids::{TaskId, WaitId};
use crate::runtime::Runtime;
use crate::trigger::Trigger;
use gpi_common::{LogicVec, SimTime};
use serde::Serialize;

/// The value a task finishes with.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskValue {
    /// No value.
    None,
    /// Integer result.
    Int(i64),
    /// Real result.
    Real(f64),
    /// Logic vector result.
    Bits(LogicVec),
    /// Text result.
    Text(String),
}

/// Terminal outcome of a task.
pub type TaskResult = Result<TaskValue, TaskError>;

/// What a task yields back to the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Suspend until the trigger fires.
    Wait(Trigger),
    /// Suspend until the first of the triggers fires; the rest are dropped.
    First(Vec<Trigger>),
    /// Suspend until another task finishes.
    Join(TaskId),
    /// Finish.
    Done(TaskResult),
}

impl Step {
    /// Finishes with no value.
    pub fn ok() -> Self {
        Step::Done(Ok(TaskValue::None))
    }

    /// Finishes with `value`.
    pub fn value(value: TaskValue) -> Self {
        Step::Done(Ok(value))
    }

    /// Finishes with a failure.
    pub fn fail(message: impl Into<String>) -> Self {
        Step::Done(Err(TaskError::Failed(message.into())))
    }
}

/// Why a task is being resumed.
#[derive(Clone, Debug, PartialEq)]
pub enum Wake {
    /// First resumption after spawning.
    Start,
    /// A trigger fired; `index` is its position in a [`Step::First`] list
    /// (always 0 for [`Step::Wait`]).
    Fired {
        /// Position of the trigger that fired.
        index: usize,
        /// The trigger that fired.
        trigger: Trigger,
    },
    /// A joined task finished.
    Joined {
        /// The joined task.
        task: TaskId,
        /// Its outcome.
        result: TaskResult,
    },
}

/// Lifecycle state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TaskState {
    /// Queued to run, or running.
    Runnable,
    /// Waiting on triggers or on another task.
    Suspended,
    /// Finished; the result is available.
    Done,
}

/// A resumable computation.
pub trait Resumable {
    /// Drives the task one step.
    fn resume(&mut self, cx: &mut TaskContext<'_>) -> Step;
}

/// Adapts a closure into a [`Resumable`].
///
/// Built by [`Runtime::spawn_fn`]; the closure keeps its own state between
/// resumptions.
pub struct FnTask<F>(pub F);

impl<F> Resumable for FnTask<F>
where
    F: FnMut(&mut TaskContext<'_>) -> Step,
{
    fn resume(&mut self, cx: &mut TaskContext<'_>) -> Step {
        (self.0)(cx)
    }
}

/// The view a running task has of the world.
pub struct TaskContext<'rt> {
    rt: &'rt mut Runtime,
    task: TaskId,
    wake: Wake,
}

impl<'rt> TaskContext<'rt> {
    pub(crate) fn new(rt: &'rt mut Runtime, task: TaskId, wake: Wake) -> Self {
        Self { rt, task, wake }
    }

    /// The running task.
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Why the task was resumed.
    pub fn wake(&self) -> &Wake {
        &self.wake
    }

    /// Takes the wake reason, leaving [`Wake::Start`] behind.
    pub fn take_wake(&mut self) -> Wake {
        std::mem::replace(&mut self.wake, Wake::Start)
    }

    /// The runtime, for anything not covered by the shortcuts below.
    pub fn runtime(&mut self) -> &mut Runtime {
        &mut *self.rt
    }

    /// Current simulation time.
    pub fn sim_time(&self) -> SimTime {
        self.rt.sim_time()
    }

    /// Reads a value.
    pub fn get_value(
        &mut self,
        obj: &ObjectHandle,
        format: ValueFormat,
    ) -> Result<SignalValue, GpiError> {
        self.rt.get_value(obj, format)
    }

    /// Deposits a value.
    pub fn set_value(&mut self, obj: &ObjectHandle, value: SignalValue) -> Result<(), GpiError> {
        self.rt.set_value(obj, &value, WriteAction::Deposit)
    }

    /// Spawns a sibling task; it runs after the current task yields.
    pub fn spawn_fn<F>(&mut self, name: impl Into<String>, f: F) -> TaskId
    where
        F: FnMut(&mut TaskContext<'_>) -> Step + 'static,
    {
        self.rt.spawn_fn(name, f)
    }
}

/// Scheduler-owned record of one task.
pub(crate) struct TaskSlot {
    pub(crate) name: String,
    pub(crate) body: Option<Box<dyn Resumable>>,
    pub(crate) state: TaskState,
    /// Waits this task is registered in, in trigger order.
    pub(crate) waits: Vec<WaitId>,
    /// Task this one is joining, if any.
    pub(crate) joining: Option<TaskId>,
    /// Tasks joining this one, in join order.
    pub(crate) joiners: Vec<TaskId>,
    pub(crate) result: Option<TaskResult>,
}

impl TaskSlot {
    pub(crate) fn new(name: String, body: Box<dyn Resumable>) -> Self {
        Self {
            name,
            body: Some(body),
            state: TaskState::Runnable,
            waits: Vec::new(),
            joining: None,
            joiners: Vec::new(),
            result: None,
        }
    }
}

/// A task that failed with nobody joining it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskFailure {
    /// The failed task.
    pub task: TaskId,
    /// Its name.
    pub name: String,
    /// Rendered error.
    pub error: String,
    /// Simulation time of the failure, in steps.
    pub at_steps: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_shortcuts() {
        assert_eq!(Step::ok(), Step::Done(Ok(TaskValue::None)));
        assert_eq!(
            Step::value(TaskValue::Int(3)),
            Step::Done(Ok(TaskValue::Int(3)))
        );
        assert_eq!(
            Step::fail("mismatch"),
            Step::Done(Err(TaskError::Failed("mismatch".into())))
        );
    }

    #[test]
    fn failure_serializes() {
        let f = TaskFailure {
            task: TaskId::from_raw(2),
            name: "checker".into(),
            error: "task failed: mismatch".into(),
            at_steps: 40,
        };
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["task"], 2);
        assert_eq!(json["name"], "checker");
        assert_eq!(json["at_steps"], 40);
    }

    fn finish(_: &mut TaskContext<'_>) -> Step {
        Step::ok()
    }

    #[test]
    fn slot_starts_runnable() {
        let slot = TaskSlot::new("t".into(), Box::new(FnTask(finish)));
        assert_eq!(slot.state, TaskState::Runnable);
        assert!(slot.body.is_some());
        assert!(slot.joiners.is_empty());
    }
}
