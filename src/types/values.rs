//! Runtime value types

use super::ids::{ResourceId, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime value type
///
/// Handles (`Task`, `Awaiter`, `Resource`) refer to host-owned state, which keeps
/// values serializable across a suspension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Val {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Task(TaskId),
    Awaiter(TaskId),
    Resource(ResourceId),
}

impl Val {
    /// Check if value is truthy (for conditionals)
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            Val::Null => false,
            _ => true,
        }
    }

    /// Short name of the value's kind, used in type mismatch faults
    pub fn kind(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Num(_) => "num",
            Val::Str(_) => "str",
            Val::Task(_) => "task",
            Val::Awaiter(_) => "awaiter",
            Val::Resource(_) => "resource",
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Null => write!(f, "null"),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Num(n) => write!(f, "{}", n),
            Val::Str(s) => write!(f, "{:?}", s),
            Val::Task(id) => write!(f, "task#{}", id),
            Val::Awaiter(id) => write!(f, "awaiter#{}", id),
            Val::Resource(id) => write!(f, "resource#{}", id),
        }
    }
}
