//! Evaluation host interface
//!
//! Everything a machine needs from the outside world: native functions, the
//! awaiter capability of tasks and host-defined awaitables, and the release
//! capability of resources.

use super::signal::Notifier;
use crate::error::Fault;
use crate::types::{ResourceId, TaskId, Val};

pub trait Host: Send + Sync {
    /// Call a native function
    fn call(&self, function: &str, args: &[Val]) -> Result<Val, Fault>;

    /// Result of a task, or `None` while it is still running
    fn poll_task(&self, task: TaskId) -> Option<Result<Val, Fault>>;

    /// Fire `notifier` once `task` settles; immediately if it already has
    fn subscribe(&self, task: TaskId, notifier: Notifier);

    /// Release a resource
    fn release(&self, resource: ResourceId) -> Result<(), Fault>;

    /// Obtain the awaiter of an awaitable value, as the task it waits on
    ///
    /// Tasks are their own awaitables. Hosts that hand out values of a custom
    /// awaitable type map them to a task here.
    fn obtain_awaiter(&self, value: Val) -> Result<TaskId, Fault> {
        match value {
            Val::Task(task) => Ok(task),
            other => Err(Fault::mismatch("task", other.kind())),
        }
    }
}
