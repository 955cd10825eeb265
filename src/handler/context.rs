use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use sandboxide_types::ContextId;

use crate::async_process::Child;
use crate::conn::Connection;
use crate::error::Result;
use crate::runner::RunnerConfig;

/// Lifecycle state of an execution context.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContextState {
    /// Launched, but the bootstrap has not reported `ready` yet.
    Initializing,
    /// The bootstrap is installed and the context accepts requests.
    Ready,
    /// Torn down; the handle only lingers until it is dropped.
    Disposed,
}

/// An isolated, disposable execution environment: a spawned interpreter
/// process plus the connection into it.
///
/// Contexts are created fresh for every run request and never reused. The
/// connection is owned here and dropped together with the context, so a
/// disposed context can never get another message onto the output log.
#[derive(Debug)]
pub struct ExecutionContext {
    id: ContextId,
    state: ContextState,
    child: Child,
    pub(crate) conn: Connection,
    /// Code submitted while the context was still initializing, flushed in
    /// order on `ready`.
    queued: VecDeque<String>,
    created: Instant,
    /// Deadline by which the current run must have produced its terminal
    /// message, if an execution timeout is configured.
    deadline: Option<Instant>,
    /// Requests sent but not yet answered with `done`/`error`.
    in_flight: usize,
}

impl ExecutionContext {
    /// Spawn a fresh context process pre-loaded with the bootstrap.
    pub(crate) fn launch(id: ContextId, config: &RunnerConfig) -> Result<Self> {
        let mut child = config.launch()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "context stdout not piped"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "context stdin not piped"))?;
        tracing::debug!(%id, pid = ?child.id(), "launched execution context");

        Ok(Self {
            id,
            state: ContextState::Initializing,
            child,
            conn: Connection::new(stdout, stdin),
            queued: Default::default(),
            created: Instant::now(),
            deadline: None,
            in_flight: 0,
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub(crate) fn set_ready(&mut self) {
        if self.state == ContextState::Initializing {
            self.state = ContextState::Ready;
        }
    }

    /// Hold back code until the context reports `ready`.
    pub(crate) fn queue(&mut self, code: String) {
        self.queued.push_back(code);
    }

    pub(crate) fn take_queued(&mut self) -> VecDeque<String> {
        std::mem::take(&mut self.queued)
    }

    /// Send code into the context and start its execution budget.
    pub(crate) fn submit(
        &mut self,
        code: String,
        timeout: Option<Duration>,
    ) -> serde_json::Result<()> {
        self.conn.submit_request(code)?;
        self.in_flight += 1;
        if self.deadline.is_none() {
            self.deadline = timeout.map(|t| Instant::now() + t);
        }
        Ok(())
    }

    /// A run ended with `done` or `error`; rearm the budget for the next
    /// outstanding request, if any.
    pub(crate) fn on_terminal(&mut self, timeout: Option<Duration>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.deadline = if self.in_flight > 0 {
            timeout.map(|t| Instant::now() + t)
        } else {
            None
        };
    }

    /// Whether the context exceeded its ready or execution budget.
    pub(crate) fn timed_out(&self, now: Instant, ready_timeout: Duration) -> bool {
        match self.state {
            ContextState::Initializing => now.duration_since(self.created) > ready_timeout,
            ContextState::Ready => self.deadline.map_or(false, |deadline| now >= deadline),
            ContextState::Disposed => false,
        }
    }

    /// Kill the context process. The script inside gets no cooperative
    /// cancellation signal, the whole context is discarded.
    pub(crate) fn dispose(&mut self) {
        if self.state == ContextState::Disposed {
            return;
        }
        self.state = ContextState::Disposed;
        if let Err(err) = self.child.kill_now() {
            tracing::warn!(id = %self.id, "failed to kill context process: {err}");
        } else {
            tracing::debug!(id = %self.id, "disposed execution context");
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.dispose();
    }
}
