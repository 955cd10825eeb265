use std::fmt;
use std::pin::Pin;

use futures::channel::mpsc::UnboundedReceiver;
use futures::stream::Stream;
use futures::task::{Context, Poll};

/// How a rendered output line should be displayed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutputKind {
    /// Console output of the submitted code.
    Log,
    /// A reported error, rendered visually distinct from regular output.
    Error,
    /// The terminal line of a run that completed normally.
    Done,
    /// Host-side notices: sandbox readiness, stop confirmations, transport
    /// failures.
    Info,
}

/// One line of the append-only output log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub kind: OutputKind,
    pub text: String,
}

impl OutputLine {
    pub fn log(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Log,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Error,
            text: text.into(),
        }
    }

    pub fn done(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Done,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Info,
            text: text.into(),
        }
    }
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OutputKind::Error => write!(f, "Error: {}", self.text),
            _ => f.write_str(&self.text),
        }
    }
}

/// Append-only log of rendered output, the host-side view of a run.
///
/// Lines are only ever appended as messages arrive; `clear` backs the
/// clear-output control and empties the whole log at once.
#[derive(Debug, Default)]
pub struct OutputLog {
    lines: Vec<OutputLine>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: OutputLine) {
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[OutputLine] {
        &self.lines
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// The receiver part of an output subscription.
///
/// Every line the handler renders is forwarded to all currently registered
/// output streams in arrival order.
#[derive(Debug)]
pub struct OutputStream {
    lines: UnboundedReceiver<OutputLine>,
}

impl OutputStream {
    pub(crate) fn new(lines: UnboundedReceiver<OutputLine>) -> Self {
        Self { lines }
    }
}

impl Stream for OutputStream {
    type Item = OutputLine;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();
        Stream::poll_next(Pin::new(&mut pin.lines), cx)
    }
}
