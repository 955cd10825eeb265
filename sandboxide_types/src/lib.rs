use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a single execution context.
///
/// Assigned from a monotonically increasing generation counter, so every
/// `create()` yields a fresh id and ids of disposed contexts are never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(usize);

impl ContextId {
    pub fn new(id: usize) -> Self {
        ContextId(id)
    }

    /// The id of the context created after this one.
    pub fn next(self) -> Self {
        ContextId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({})", self.0)
    }
}

/// A unit of communication between the host and an execution context.
///
/// Messages are exchanged as single lines of JSON over the context's standard
/// streams, tagged by `type`:
///
/// ```json
/// {"type":"log","msg":"hello"}
/// {"type":"request","code":"console.log(1)"}
/// ```
///
/// `request` is the only host -> context message; the rest flow from the
/// context back to the host. `done` and `error` are terminal for a run, at
/// most one of them is emitted per submitted `request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContextMessage {
    /// The bootstrap finished installing itself, emitted exactly once.
    Ready { msg: String },
    /// Console output produced by the submitted code.
    Log { msg: String },
    /// A caught error, either console output or a thrown exception.
    Error { msg: String },
    /// The submitted code ran to completion.
    Done { msg: String },
    /// Source text to execute inside the context.
    Request { code: String },
}

impl ContextMessage {
    /// The free-form text payload of the message.
    pub fn payload(&self) -> &str {
        match self {
            ContextMessage::Ready { msg }
            | ContextMessage::Log { msg }
            | ContextMessage::Error { msg }
            | ContextMessage::Done { msg } => msg,
            ContextMessage::Request { code } => code,
        }
    }

    /// Whether this message ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContextMessage::Done { .. } | ContextMessage::Error { .. }
        )
    }
}
