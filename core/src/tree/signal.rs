use std::fmt;

/// Transition selector passed to a node's analyzer.
///
/// `START` enters a node, `end_of_child(k)` reports that child `k` finished with its value on
/// the operand stack. The high range holds construct-specific signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal(pub u16);

const CONSTRUCT_BASE: u16 = 0xFF00;

/// Most children a single node may have; child signals must stay below the construct range.
pub const MAX_CHILDREN: usize = CONSTRUCT_BASE as usize - 1;

impl Signal {
    pub const START: Signal = Signal(0);
    /// Callee body returned to its call site.
    pub const END_CALL: Signal = Signal(CONSTRUCT_BASE);
    /// Resumed after backtracking into an alternation.
    pub const NEXT_ALTERNATIVE: Signal = Signal(CONSTRUCT_BASE + 1);
    /// Resumed after backtracking into a quantifier: stop iterating.
    pub const REPEAT_STOP: Signal = Signal(CONSTRUCT_BASE + 2);
    /// Resumed after every solution of a collect body was enumerated.
    pub const COLLECT_DONE: Signal = Signal(CONSTRUCT_BASE + 3);
    /// Last property value of an object literal finished.
    pub const END_PROPERTIES: Signal = Signal(CONSTRUCT_BASE + 4);
    /// Payload expression of a control statement finished.
    pub const END_EXPRESSION: Signal = Signal(CONSTRUCT_BASE + 5);
    /// A control value is on top of the stack and is travelling up the tree.
    pub const CONTROL: Signal = Signal(u16::MAX);

    #[inline]
    pub const fn end_of_child(k: usize) -> Signal {
        debug_assert!(k < MAX_CHILDREN, "child index outside the signal range");
        Signal(1 + k as u16)
    }

    #[inline]
    pub fn child_index(self) -> Option<usize> {
        (self.0 >= 1 && self.0 < CONSTRUCT_BASE).then(|| self.0 as usize - 1)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Signal::START => write!(f, "start"),
            Signal::END_CALL => write!(f, "end_call"),
            Signal::NEXT_ALTERNATIVE => write!(f, "next_alternative"),
            Signal::REPEAT_STOP => write!(f, "repeat_stop"),
            Signal::COLLECT_DONE => write!(f, "collect_done"),
            Signal::END_PROPERTIES => write!(f, "end_properties"),
            Signal::END_EXPRESSION => write!(f, "end_expression"),
            Signal::CONTROL => write!(f, "control"),
            other => match other.child_index() {
                Some(k) => write!(f, "end_of_child({k})"),
                None => write!(f, "signal({})", other.0),
            },
        }
    }
}
