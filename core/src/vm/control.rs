use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tree::{NodeId, Span, Tag};
use crate::val::Value;

/// Keyword of a control statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Exit,
    Next,
    Redo,
    Restart,
    Return,
    Backtrack,
}

impl ControlKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlKind::Exit => "exit",
            ControlKind::Next => "next",
            ControlKind::Redo => "redo",
            ControlKind::Restart => "restart",
            ControlKind::Return => "return",
            ControlKind::Backtrack => "backtrack",
        }
    }

    /// Kinds a loop construct reacts to.
    pub fn is_loop_control(self) -> bool {
        matches!(
            self,
            ControlKind::Exit | ControlKind::Next | ControlKind::Redo | ControlKind::Restart
        )
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control statement in flight. Sits on top of the operand stack while the engine walks it
/// up the parent chain.
#[derive(Debug, Clone)]
pub struct ControlValue {
    pub kind: ControlKind,
    pub tag: Tag,
    pub payload: Value,
    pub span: Option<Span>,
    /// The control node that raised it.
    pub origin: NodeId,
}

impl ControlValue {
    /// True when a construct tagged `own` should handle this value: the value is untagged or
    /// carries the same tag.
    pub fn targets(&self, own: &Tag) -> bool {
        match (&self.tag, own) {
            (None, _) => true,
            (Some(wanted), Some(own)) => wanted == own,
            (Some(_), None) => false,
        }
    }

    /// Takes the payload out, cloning only when another generation still shares this value.
    pub fn into_payload(self: Arc<Self>) -> Value {
        match Arc::try_unwrap(self) {
            Ok(control) => control.payload,
            Err(shared) => shared.payload.clone(),
        }
    }
}
