//! Static types and their capability tables
//!
//! A node that suspends or releases something checks the capability table of
//! its operand type once, at construction time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Static type of a composed expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Ty {
    Unit,
    Bool,
    Num,
    Str,
    /// Asynchronous operation producing `output`
    Task { output: Box<Ty> },
    /// Awaiter obtained from a task
    Awaiter { output: Box<Ty> },
    /// Host resource with a release operation
    Resource,
    /// Host-defined type with an explicit capability table
    Custom(CustomTy),
}

/// Capability table of a host-defined type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTy {
    pub name: String,

    /// Type returned by obtain-awaiter, if the type exposes it
    #[serde(default)]
    pub awaiter: Option<Box<Ty>>,

    /// Type returned by fetch-result, if the type exposes it
    #[serde(default)]
    pub result: Option<Box<Ty>>,

    #[serde(default)]
    pub release: bool,
}

impl Ty {
    pub fn task(output: Ty) -> Self {
        Ty::Task {
            output: Box::new(output),
        }
    }

    pub fn custom(name: impl Into<String>) -> CustomTy {
        CustomTy {
            name: name.into(),
            awaiter: None,
            result: None,
            release: false,
        }
    }

    /// Type produced by the obtain-awaiter operation, if any
    pub fn obtain_awaiter(&self) -> Option<Ty> {
        match self {
            Ty::Task { output } => Some(Ty::Awaiter {
                output: output.clone(),
            }),
            Ty::Custom(custom) => custom.awaiter.as_deref().cloned(),
            _ => None,
        }
    }

    /// Type produced by the fetch-result operation, if any
    pub fn fetch_result(&self) -> Option<Ty> {
        match self {
            Ty::Awaiter { output } => Some((**output).clone()),
            Ty::Custom(custom) => custom.result.as_deref().cloned(),
            _ => None,
        }
    }

    pub fn has_release(&self) -> bool {
        match self {
            Ty::Resource => true,
            Ty::Custom(custom) => custom.release,
            _ => false,
        }
    }
}

impl CustomTy {
    pub fn with_awaiter(mut self, awaiter: Ty) -> Self {
        self.awaiter = Some(Box::new(awaiter));
        self
    }

    pub fn with_result(mut self, result: Ty) -> Self {
        self.result = Some(Box::new(result));
        self
    }

    pub fn with_release(mut self) -> Self {
        self.release = true;
        self
    }
}

impl From<CustomTy> for Ty {
    fn from(custom: CustomTy) -> Self {
        Ty::Custom(custom)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Unit => write!(f, "unit"),
            Ty::Bool => write!(f, "bool"),
            Ty::Num => write!(f, "num"),
            Ty::Str => write!(f, "str"),
            Ty::Task { output } => write!(f, "task<{}>", output),
            Ty::Awaiter { output } => write!(f, "awaiter<{}>", output),
            Ty::Resource => write!(f, "resource"),
            Ty::Custom(custom) => write!(f, "{}", custom.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_capabilities() {
        let task = Ty::task(Ty::Num);
        let awaiter = task.obtain_awaiter().unwrap();
        assert_eq!(awaiter.fetch_result(), Some(Ty::Num));
        assert!(!task.has_release());
    }

    #[test]
    fn test_custom_capabilities() {
        let half: Ty = Ty::custom("Half").with_awaiter(Ty::custom("HalfAwaiter").into()).into();
        let awaiter = half.obtain_awaiter().unwrap();
        assert_eq!(awaiter.fetch_result(), None);
        assert!(Ty::from(Ty::custom("Handle").with_release()).has_release());
    }
}
