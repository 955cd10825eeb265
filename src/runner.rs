use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::channel::mpsc::{channel, Sender};
use futures::channel::oneshot::channel as oneshot_channel;
use futures::SinkExt;

use crate::async_process::{Child, Command, Stdio};
use crate::bootstrap::DEFAULT_BOOTSTRAP;
use crate::error::Result;
use crate::handler::{Handler, HandlerMessage};
use crate::output::OutputStream;

/// A [`Runner`] is the host-side handle that drives sandboxed code execution.
///
/// All work happens in the [`Handler`] returned alongside it, which must be
/// polled (usually on a spawned task) for anything to make progress. The
/// runner itself never blocks on a run; output arrives asynchronously on the
/// streams returned by [`Runner::output_listener`].
#[derive(Debug)]
pub struct Runner {
    /// The `Sender` to send messages to the handler that owns the execution
    /// context
    sender: Sender<HandlerMessage>,
    /// How spawned execution contexts are configured
    config: RunnerConfig,
}

impl Runner {
    /// Create a new runner and the handler driving it.
    pub fn new(config: RunnerConfig) -> (Self, Handler) {
        let (tx, rx) = channel(1);
        let handler = Handler::new(config.clone(), rx);
        let runner = Self { sender: tx, config };
        (runner, handler)
    }

    /// The config used for spawned execution contexts.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Dispose any existing execution context and launch a fresh one,
    /// pre-loaded with the bootstrap.
    ///
    /// Fire-and-forget: the new context reports itself with a single `ready`
    /// output line once the bootstrap is installed. Code submitted before
    /// that is queued and flushed on `ready`.
    pub async fn create(&self) -> Result<()> {
        self.sender.clone().send(HandlerMessage::Create).await?;
        Ok(())
    }

    /// Send source text into the current execution context for execution.
    ///
    /// Returns [`RunnerError::NoContext`](crate::error::RunnerError::NoContext)
    /// when no context exists. Acceptance is acknowledged, completion is not
    /// awaited; the run reports back through the output lines, ending in
    /// exactly one `done` or `error` line.
    pub async fn submit(&self, code: impl Into<String>) -> Result<()> {
        let (tx, rx) = oneshot_channel();
        self.sender
            .clone()
            .send(HandlerMessage::Submit(code.into(), tx))
            .await?;
        rx.await?
    }

    /// Destroy the current execution context immediately, if one exists.
    ///
    /// The context is torn down, not signaled; no terminal message is
    /// guaranteed. Idempotent, calling with no active context is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot_channel();
        self.sender.clone().send(HandlerMessage::Stop(tx)).await?;
        Ok(rx.await?)
    }

    /// Subscribe to the rendered output lines of this runner.
    pub async fn output_listener(&self) -> Result<OutputStream> {
        let (tx, rx) = oneshot_channel();
        self.sender.clone().send(HandlerMessage::Subscribe(tx)).await?;
        Ok(rx.await?)
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Path of the interpreter executable hosting the execution contexts.
    ///
    /// If unspecified, the crate will try to automatically detect a suitable
    /// binary.
    executable: PathBuf,
    /// Flag used to hand the bootstrap source to the interpreter.
    eval_flag: Cow<'static, str>,
    /// The fixed script pre-loaded into every fresh context.
    bootstrap: Cow<'static, str>,
    /// Environment variables to set for the context process.
    /// Passes value through to std::process::Command::envs.
    pub process_envs: Option<HashMap<String, String>>,
    /// How long a fresh context may take to report `ready` before it is
    /// disposed.
    ready_timeout: Duration,
    /// Wall-clock budget per submitted run; unlimited when `None`.
    execution_timeout: Option<Duration>,
}

impl RunnerConfig {
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    pub fn with_executable(path: impl AsRef<Path>) -> Self {
        Self::builder().executable(path).build().unwrap()
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn bootstrap(&self) -> &str {
        &self.bootstrap
    }

    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout
    }

    /// Spawn a fresh context process with piped standard streams.
    pub(crate) fn launch(&self) -> io::Result<Child> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(self.eval_flag.as_ref())
            .arg(self.bootstrap.as_ref())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        if let Some(ref envs) = self.process_envs {
            cmd.envs(envs);
        }
        cmd.spawn()
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfigBuilder {
    executable: Option<PathBuf>,
    eval_flag: Cow<'static, str>,
    bootstrap: Cow<'static, str>,
    process_envs: Option<HashMap<String, String>>,
    ready_timeout: Duration,
    execution_timeout: Option<Duration>,
}

impl Default for RunnerConfigBuilder {
    fn default() -> Self {
        Self {
            executable: None,
            eval_flag: "-e".into(),
            bootstrap: DEFAULT_BOOTSTRAP.into(),
            process_envs: None,
            ready_timeout: Duration::from_secs(10),
            execution_timeout: None,
        }
    }
}

impl RunnerConfigBuilder {
    pub fn executable(mut self, path: impl AsRef<Path>) -> Self {
        self.executable = Some(path.as_ref().to_path_buf());
        self
    }

    /// The flag handing the bootstrap to the interpreter, `-e` by default.
    pub fn eval_flag(mut self, flag: impl Into<Cow<'static, str>>) -> Self {
        self.eval_flag = flag.into();
        self
    }

    /// Replace the default bootstrap with a custom protocol implementation.
    pub fn bootstrap(mut self, script: impl Into<Cow<'static, str>>) -> Self {
        self.bootstrap = script.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.process_envs
            .get_or_insert(HashMap::new())
            .insert(key.into(), val.into());
        self
    }

    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.process_envs
            .get_or_insert(HashMap::new())
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Enforce a wall-clock budget per submitted run. A run that produced no
    /// terminal message within the budget gets its context disposed.
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> std::result::Result<RunnerConfig, String> {
        let executable = if let Some(e) = self.executable {
            e
        } else {
            default_executable()?
        };

        Ok(RunnerConfig {
            executable,
            eval_flag: self.eval_flag,
            bootstrap: self.bootstrap,
            process_envs: self.process_envs,
            ready_timeout: self.ready_timeout,
            execution_timeout: self.execution_timeout,
        })
    }
}

/// Returns the path to the interpreter executable.
///
/// If the `NODE` environment variable is set, `default_executable` will use
/// it as the default path. Otherwise the filenames `node` and `nodejs` are
/// searched for in standard places. If that fails, an error is returned.
pub fn default_executable() -> std::result::Result<PathBuf, String> {
    if let Ok(path) = std::env::var("NODE") {
        if Path::new(&path).exists() {
            return Ok(path.into());
        }
    }

    for app in &["node", "nodejs"] {
        if let Ok(path) = which::which(app) {
            return Ok(path);
        }
    }

    Err("Could not auto detect a node executable".to_string())
}
