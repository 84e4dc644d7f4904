//! Simulation host
//!
//! In-memory [`Host`] with scripted native functions, tasks that settle by hand or
//! after a delay on the tokio runtime, and resources that count their releases.
//! Used by the CLI and by tests.

use super::host::Host;
use super::signal::Notifier;
use crate::error::Fault;
use crate::types::{ResourceId, TaskId, Val};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/* ===================== Behaviors ===================== */

/// What a native function does when called
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Behavior {
    /// Return a fixed value
    Value { value: Val },

    /// Fail with a host fault
    Fail { message: String },

    /// Start a task. It settles after `after_ms`, or by hand when unset.
    Task {
        #[serde(default = "null_val")]
        value: Val,
        #[serde(default)]
        after_ms: Option<u64>,
        /// Settle as failed with this message instead of succeeding
        #[serde(default)]
        fail: Option<String>,
    },

    /// Acquire a fresh releasable resource
    Resource,
}

fn null_val() -> Val {
    Val::Null
}

impl Behavior {
    pub fn value(value: Val) -> Self {
        Behavior::Value { value }
    }

    /// Task settled by [`SimHost::complete`] or [`SimHost::fail`]
    pub fn manual_task() -> Self {
        Behavior::Task {
            value: Val::Null,
            after_ms: None,
            fail: None,
        }
    }

    /// Task that has already completed when it is returned
    pub fn ready_task(value: Val) -> Self {
        Behavior::Task {
            value,
            after_ms: Some(0),
            fail: None,
        }
    }

    pub fn delayed_task(value: Val, after_ms: u64) -> Self {
        Behavior::Task {
            value,
            after_ms: Some(after_ms),
            fail: None,
        }
    }
}

type NativeFn = Arc<dyn Fn(&[Val]) -> Result<Val, Fault> + Send + Sync>;

/* ===================== State ===================== */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub acquired_by: String,
    pub releases: u32,
}

struct TaskSlot {
    function: String,
    result: Option<Result<Val, Fault>>,
    waiters: Vec<Notifier>,
}

#[derive(Default)]
struct SimState {
    behaviors: HashMap<String, Behavior>,
    natives: HashMap<String, NativeFn>,
    tasks: BTreeMap<TaskId, TaskSlot>,
    resources: BTreeMap<ResourceId, ResourceRecord>,
    next_handle: u64,
    calls: Vec<String>,
}

impl SimState {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/* ===================== Host ===================== */

#[derive(Clone, Default)]
pub struct SimHost {
    inner: Arc<Mutex<SimState>>,
}

impl SimHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_behaviors(behaviors: HashMap<String, Behavior>) -> Self {
        let host = Self::new();
        host.lock().behaviors = behaviors;
        host
    }

    pub fn with(self, function: impl Into<String>, behavior: Behavior) -> Self {
        self.lock().behaviors.insert(function.into(), behavior);
        self
    }

    /// Register a native function computed from its arguments
    pub fn with_fn<F>(self, function: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Val]) -> Result<Val, Fault> + Send + Sync + 'static,
    {
        self.lock().natives.insert(function.into(), Arc::new(f));
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn complete(&self, task: TaskId, value: Val) {
        self.settle(task, Ok(value));
    }

    pub fn fail(&self, task: TaskId, message: impl Into<String>) {
        self.settle(
            task,
            Err(Fault::TaskFailed {
                task,
                message: message.into(),
            }),
        );
    }

    /// Record the result of `task` and fire its waiters. A task settles once.
    fn settle(&self, task: TaskId, result: Result<Val, Fault>) {
        let waiters = {
            let mut state = self.lock();
            let Some(slot) = state.tasks.get_mut(&task) else {
                warn!(task, "settling unknown task");
                return;
            };
            if slot.result.is_some() {
                debug!(task, "task already settled");
                return;
            }
            debug!(task, function = %slot.function, ok = result.is_ok(), "task settled");
            slot.result = Some(result);
            std::mem::take(&mut slot.waiters)
        };

        for waiter in waiters {
            waiter.complete();
        }
    }

    fn start_task(
        &self,
        function: &str,
        result: Result<Val, Fault>,
        after_ms: Option<u64>,
    ) -> TaskId {
        let task = {
            let mut state = self.lock();
            let task = state.next_handle();
            state.tasks.insert(
                task,
                TaskSlot {
                    function: function.to_string(),
                    result: None,
                    waiters: Vec::new(),
                },
            );
            task
        };

        let result = result.map_err(|fault| match fault {
            Fault::Host { message } => Fault::TaskFailed { task, message },
            other => other,
        });

        match after_ms {
            None => {}
            Some(0) => self.settle(task, result),
            Some(ms) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let host = self.clone();
                    handle.spawn(async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        host.settle(task, result);
                    });
                }
                Err(_) => {
                    warn!(task, "no tokio runtime, settling delayed task immediately");
                    self.settle(task, result);
                }
            },
        }
        task
    }

    /* ===================== Inspection ===================== */

    /// Tasks started by `function`, oldest first
    pub fn tasks_of(&self, function: &str) -> Vec<TaskId> {
        self.lock()
            .tasks
            .iter()
            .filter(|(_, slot)| slot.function == function)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn last_task(&self) -> Option<TaskId> {
        self.lock().tasks.keys().next_back().copied()
    }

    pub fn is_settled(&self, task: TaskId) -> bool {
        self.lock()
            .tasks
            .get(&task)
            .is_some_and(|slot| slot.result.is_some())
    }

    pub fn release_count(&self, resource: ResourceId) -> u32 {
        self.lock()
            .resources
            .get(&resource)
            .map_or(0, |record| record.releases)
    }

    pub fn resources(&self) -> BTreeMap<ResourceId, ResourceRecord> {
        self.lock().resources.clone()
    }

    /// Names of the native functions called so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }
}

impl Host for SimHost {
    fn call(&self, function: &str, args: &[Val]) -> Result<Val, Fault> {
        let (behavior, native) = {
            let mut state = self.lock();
            state.calls.push(function.to_string());
            (
                state.behaviors.get(function).cloned(),
                state.natives.get(function).cloned(),
            )
        };

        if let Some(native) = native {
            return native(args);
        }

        match behavior {
            Some(Behavior::Value { value }) => Ok(value),
            Some(Behavior::Fail { message }) => Err(Fault::Host { message }),
            Some(Behavior::Task {
                value,
                after_ms,
                fail,
            }) => {
                let result = match fail {
                    Some(message) => Err(Fault::Host { message }),
                    None => Ok(value),
                };
                Ok(Val::Task(self.start_task(function, result, after_ms)))
            }
            Some(Behavior::Resource) => {
                let mut state = self.lock();
                let resource = state.next_handle();
                state.resources.insert(
                    resource,
                    ResourceRecord {
                        acquired_by: function.to_string(),
                        releases: 0,
                    },
                );
                Ok(Val::Resource(resource))
            }
            None => Err(Fault::host(format!("unknown function `{}`", function))),
        }
    }

    fn poll_task(&self, task: TaskId) -> Option<Result<Val, Fault>> {
        self.lock().tasks.get(&task).and_then(|slot| slot.result.clone())
    }

    fn subscribe(&self, task: TaskId, notifier: Notifier) {
        let settled = {
            let mut state = self.lock();
            match state.tasks.get_mut(&task) {
                Some(slot) if slot.result.is_none() => {
                    slot.waiters.push(notifier.clone());
                    false
                }
                Some(_) => true,
                None => {
                    warn!(task, "subscribing to unknown task");
                    false
                }
            }
        };

        if settled {
            notifier.complete();
        }
    }

    fn release(&self, resource: ResourceId) -> Result<(), Fault> {
        let mut state = self.lock();
        match state.resources.get_mut(&resource) {
            Some(record) => {
                record.releases += 1;
                debug!(resource, releases = record.releases, "released resource");
                Ok(())
            }
            None => Err(Fault::host(format!("unknown resource {}", resource))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_and_fail_behaviors() {
        let host = SimHost::new()
            .with("answer", Behavior::value(Val::Num(42.0)))
            .with(
                "broken",
                Behavior::Fail {
                    message: "boom".into(),
                },
            );

        assert_eq!(host.call("answer", &[]), Ok(Val::Num(42.0)));
        assert_eq!(host.call("broken", &[]), Err(Fault::host("boom")));
        assert!(host.call("missing", &[]).is_err());
        assert_eq!(host.calls(), vec!["answer", "broken", "missing"]);
    }

    #[test]
    fn test_manual_task_settles_once() {
        let host = SimHost::new().with("op", Behavior::manual_task());
        let Ok(Val::Task(task)) = host.call("op", &[]) else {
            panic!("expected a task");
        };

        assert_eq!(host.poll_task(task), None);
        host.complete(task, Val::Num(1.0));
        host.complete(task, Val::Num(2.0));
        assert_eq!(host.poll_task(task), Some(Ok(Val::Num(1.0))));
    }

    #[test]
    fn test_failing_task_reports_task_fault() {
        let host = SimHost::new().with(
            "op",
            Behavior::Task {
                value: Val::Null,
                after_ms: Some(0),
                fail: Some("disk full".into()),
            },
        );
        let Ok(Val::Task(task)) = host.call("op", &[]) else {
            panic!("expected a task");
        };

        assert_eq!(
            host.poll_task(task),
            Some(Err(Fault::TaskFailed {
                task,
                message: "disk full".into()
            }))
        );
    }

    #[test]
    fn test_native_fn_sees_arguments() {
        let host = SimHost::new().with_fn("double", |args| match args {
            [Val::Num(n)] => Ok(Val::Num(n * 2.0)),
            _ => Err(Fault::host("bad arguments")),
        });
        assert_eq!(host.call("double", &[Val::Num(4.0)]), Ok(Val::Num(8.0)));
    }

    #[test]
    fn test_release_counts() {
        let host = SimHost::new().with("open", Behavior::Resource);
        let Ok(Val::Resource(resource)) = host.call("open", &[]) else {
            panic!("expected a resource");
        };

        host.release(resource).unwrap();
        assert_eq!(host.release_count(resource), 1);
        assert!(host.release(resource + 100).is_err());
    }

    #[test]
    fn test_behavior_json() {
        let behavior: Behavior =
            serde_json::from_str(r#"{"t": "Task", "after_ms": 5}"#).unwrap();
        assert_eq!(behavior, Behavior::delayed_task(Val::Null, 5));
    }
}
