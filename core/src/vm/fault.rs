use std::fmt;

use crate::heap::HeapError;
use crate::tree::{Span, Tag};
use crate::val::Detached;

use super::ControlKind;

/// Ways a run can end other than producing a value.
#[derive(Debug)]
pub enum ExecutionFault {
    /// A control statement reached the root (or a parallel branch boundary) without a
    /// construct accepting it. A backtrack with no checkpoint left is reported the same way.
    UnhandledControl {
        kind: ControlKind,
        tag: Tag,
        span: Option<Span>,
        source: String,
    },
    /// The run passed its deadline.
    Timeout { elapsed_ms: u64, steps: u64 },
    /// Internal invariant violation or a runtime type error. Never caught by the language.
    Runtime(anyhow::Error),
}

pub type ExecutionResult = Result<Detached, ExecutionFault>;

impl ExecutionFault {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionFault::Timeout { .. })
    }

    pub fn control_kind(&self) -> Option<ControlKind> {
        match self {
            ExecutionFault::UnhandledControl { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionFault::UnhandledControl {
                kind,
                tag,
                span,
                source,
            } => {
                write!(f, "unhandled control signal `{kind}")?;
                if let Some(tag) = tag {
                    write!(f, " {tag}")?;
                }
                write!(f, "`")?;
                if let Some(span) = span {
                    write!(f, " at {span}")?;
                }
                if !source.is_empty() {
                    write!(f, " in {source}")?;
                }
                Ok(())
            }
            ExecutionFault::Timeout { elapsed_ms, steps } => {
                write!(f, "execution timed out after {elapsed_ms} ms ({steps} steps)")
            }
            ExecutionFault::Runtime(e) => write!(f, "runtime error: {e:#}"),
        }
    }
}

impl std::error::Error for ExecutionFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExecutionFault::Runtime(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ExecutionFault {
    fn from(e: anyhow::Error) -> Self {
        ExecutionFault::Runtime(e)
    }
}

impl From<HeapError> for ExecutionFault {
    fn from(e: HeapError) -> Self {
        ExecutionFault::Runtime(e.into())
    }
}
