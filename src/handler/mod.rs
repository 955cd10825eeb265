use std::collections::VecDeque;
use std::pin::Pin;
use std::time::{Duration, Instant};

use futures::channel::mpsc::{unbounded, Receiver, UnboundedSender};
use futures::channel::oneshot::Sender as OneshotSender;
use futures::stream::{Fuse, FusedStream, Stream, StreamExt};
use futures::task::{Context, Poll};

use sandboxide_types::{ContextId, ContextMessage};

pub use crate::handler::context::{ContextState, ExecutionContext};
use crate::handler::job::PeriodicJob;
use crate::error::{Result, RunnerError};
use crate::output::{OutputLine, OutputStream};
use crate::runner::RunnerConfig;

mod context;
mod job;

/// How often the handler checks whether the current context exceeded its
/// ready or execution budget.
const EVICTION_INTERVAL: Duration = Duration::from_millis(100);

/// The handler that owns the current execution context and drives all the
/// requests and messages.
///
/// It is a stream of rendered [`OutputLine`]s and must be polled for any
/// progress to happen; callers usually spawn a task that drains it.
#[must_use = "streams do nothing unless polled"]
#[derive(Debug)]
pub struct Handler {
    /// Control messages sent by the `Runner`
    from_runner: Fuse<Receiver<HandlerMessage>>,
    /// The single current execution context; `None` while absent.
    ///
    /// Mutated only by create/stop control messages and eviction, all of
    /// which run on this task.
    context: Option<ExecutionContext>,
    /// Identity handed to the next created context.
    next_id: ContextId,
    /// The registered output subscriptions.
    listeners: Vec<UnboundedSender<OutputLine>>,
    /// Rendered lines not yet yielded from this stream.
    queued_lines: VecDeque<OutputLine>,
    /// Evicts contexts that exceeded their budgets.
    evict_timed_out: PeriodicJob,
    /// How fresh contexts are spawned.
    config: RunnerConfig,
}

impl Handler {
    pub(crate) fn new(config: RunnerConfig, rx: Receiver<HandlerMessage>) -> Self {
        Self {
            from_runner: rx.fuse(),
            context: None,
            next_id: ContextId::new(0),
            listeners: Default::default(),
            queued_lines: Default::default(),
            evict_timed_out: PeriodicJob::every(EVICTION_INTERVAL),
            config,
        }
    }

    /// Identity of the currently-live context, if any.
    pub fn current_context(&self) -> Option<ContextId> {
        self.context.as_ref().map(|ctx| ctx.id())
    }

    /// Append a line to the output and fan it out to all subscribers.
    fn render(&mut self, line: OutputLine) {
        self.listeners
            .retain(|listener| listener.unbounded_send(line.clone()).is_ok());
        self.queued_lines.push_back(line);
    }

    fn on_runner_message(&mut self, msg: HandlerMessage) {
        match msg {
            HandlerMessage::Create => self.create_context(),
            HandlerMessage::Submit(code, tx) => {
                let _ = tx.send(self.submit(code));
            }
            HandlerMessage::Stop(tx) => {
                if self.context.is_some() {
                    self.dispose_context();
                    self.render(OutputLine::info("process stopped"));
                } else {
                    self.render(OutputLine::info("no process running"));
                }
                let _ = tx.send(());
            }
            HandlerMessage::Subscribe(tx) => {
                let (line_tx, line_rx) = unbounded();
                self.listeners.push(line_tx);
                let _ = tx.send(OutputStream::new(line_rx));
            }
        }
    }

    /// Dispose any existing context and launch a replacement.
    fn create_context(&mut self) {
        self.dispose_context();
        let id = self.next_id;
        self.next_id = id.next();
        match ExecutionContext::launch(id, &self.config) {
            Ok(ctx) => {
                self.context = Some(ctx);
            }
            Err(err) => {
                tracing::error!("failed to launch execution context: {err}");
                self.render(OutputLine::info(format!("could not launch the sandbox: {err}")));
            }
        }
    }

    fn dispose_context(&mut self) {
        if let Some(mut ctx) = self.context.take() {
            ctx.dispose();
        }
    }

    /// Route submitted code into the current context.
    ///
    /// While the context is still initializing the code is queued and
    /// flushed once `ready` arrives, so submissions never race the
    /// handshake.
    fn submit(&mut self, code: String) -> Result<()> {
        let timeout = self.config.execution_timeout();
        let ctx = self.context.as_mut().ok_or(RunnerError::NoContext)?;
        match ctx.state() {
            ContextState::Initializing => {
                ctx.queue(code);
                Ok(())
            }
            ContextState::Ready => Ok(ctx.submit(code, timeout)?),
            ContextState::Disposed => Err(RunnerError::NoContext),
        }
    }

    /// Process a message received from the current execution context.
    fn on_context_message(&mut self, ctx: &mut ExecutionContext, msg: ContextMessage) {
        let timeout = self.config.execution_timeout();
        let line = match msg {
            ContextMessage::Ready { msg } => {
                ctx.set_ready();
                for code in ctx.take_queued() {
                    if let Err(err) = ctx.submit(code, timeout) {
                        tracing::warn!(id = %ctx.id(), "failed to flush queued code: {err}");
                        self.render(OutputLine::info("could not send code into the sandbox"));
                    }
                }
                OutputLine::info(msg)
            }
            ContextMessage::Log { msg } => OutputLine::log(msg),
            ContextMessage::Error { msg } => {
                ctx.on_terminal(timeout);
                OutputLine::error(msg)
            }
            ContextMessage::Done { msg } => {
                ctx.on_terminal(timeout);
                OutputLine::done(msg)
            }
            ContextMessage::Request { .. } => {
                // host -> context only, a context never sends this
                tracing::warn!(id = %ctx.id(), "ignoring request message from context");
                return;
            }
        };
        self.render(line);
    }

    /// Tear down a context that exceeded its ready or execution budget.
    fn evict_timed_out_context(&mut self, now: Instant) {
        let ready_timeout = self.config.ready_timeout();
        let (expired, state) = match self.context.as_ref() {
            Some(ctx) => (ctx.timed_out(now, ready_timeout), ctx.state()),
            None => return,
        };
        if !expired {
            return;
        }
        self.dispose_context();
        let line = match state {
            ContextState::Initializing => {
                tracing::warn!("execution context was not ready in time");
                OutputLine::error(format!(
                    "execution context was not ready after {ready_timeout:?}"
                ))
            }
            _ => {
                let budget = self.config.execution_timeout().unwrap_or_default();
                tracing::warn!("run exceeded its execution budget");
                OutputLine::error(format!("execution timed out after {budget:?}"))
            }
        };
        self.render(line);
    }
}

impl Stream for Handler {
    type Item = Result<OutputLine>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();

        loop {
            if let Some(line) = pin.queued_lines.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }

            // drain control messages first so create/stop take effect before
            // the connection is polled
            while let Poll::Ready(Some(msg)) = Pin::new(&mut pin.from_runner).poll_next(cx) {
                pin.on_runner_message(msg);
            }
            if !pin.queued_lines.is_empty() {
                continue;
            }

            if pin.evict_timed_out.is_ready(cx) {
                pin.evict_timed_out_context(Instant::now());
            }

            let mut done = true;
            if let Some(mut ctx) = pin.context.take() {
                loop {
                    match Pin::new(&mut ctx.conn).poll_next(cx) {
                        Poll::Ready(Some(Ok(msg))) => {
                            done = false;
                            pin.on_context_message(&mut ctx, msg);
                        }
                        Poll::Ready(Some(Err(RunnerError::Serde(err)))) => {
                            // garbage on the protocol stream, not fatal
                            done = false;
                            tracing::warn!(id = %ctx.id(), "dropping malformed line: {err}");
                        }
                        Poll::Ready(Some(Err(err))) => {
                            done = false;
                            tracing::warn!(id = %ctx.id(), "lost contact with the sandbox: {err}");
                            pin.render(OutputLine::info(format!(
                                "could not deliver code to the sandbox: {err}"
                            )));
                            ctx.dispose();
                            break;
                        }
                        Poll::Ready(None) => {
                            // the context process exited on its own
                            done = false;
                            tracing::debug!(id = %ctx.id(), "execution context terminated");
                            pin.render(OutputLine::info("the sandbox terminated"));
                            ctx.dispose();
                            break;
                        }
                        Poll::Pending => break,
                    }
                }
                if ctx.state() != ContextState::Disposed {
                    pin.context = Some(ctx);
                }
            }

            if done && pin.queued_lines.is_empty() {
                if pin.from_runner.is_terminated() && pin.context.is_none() {
                    // the runner is gone and nothing can produce output anymore
                    return Poll::Ready(None);
                }
                return Poll::Pending;
            }
        }
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        self.dispose_context();
    }
}

/// Events used internally to communicate with the handler, which are executed
/// in the background
#[derive(Debug)]
pub(crate) enum HandlerMessage {
    Create,
    Submit(String, OneshotSender<Result<()>>),
    Stop(OneshotSender<()>),
    Subscribe(OneshotSender<OutputStream>),
}
