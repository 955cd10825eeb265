//! Internal module providing an async child process abstraction for
//! `async-std` or `tokio`.

use std::ffi::OsStr;
use std::pin::Pin;
pub use std::process::Stdio;
use std::task::{Context, Poll};

cfg_if::cfg_if! {
    if #[cfg(feature = "async-std-runtime")] {
        use ::async_std::process;
    } else if #[cfg(feature = "tokio-runtime")] {
        use ::tokio::process;
    }
}

#[derive(Debug)]
pub struct Command {
    inner: process::Command,
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        let inner = process::Command::new(program);
        Self { inner }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.inner.arg(arg);
        self
    }

    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.inner.envs(vars);
        self
    }

    pub fn stdin<T: Into<Stdio>>(&mut self, cfg: T) -> &mut Self {
        self.inner.stdin(cfg);
        self
    }

    pub fn stdout<T: Into<Stdio>>(&mut self, cfg: T) -> &mut Self {
        self.inner.stdout(cfg);
        self
    }

    pub fn stderr<T: Into<Stdio>>(&mut self, cfg: T) -> &mut Self {
        self.inner.stderr(cfg);
        self
    }

    pub fn spawn(&mut self) -> std::io::Result<Child> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "tokio-runtime")] {
                self.inner.kill_on_drop(true);
            }
        }
        let inner = self.inner.spawn()?;
        Ok(Child::new(inner))
    }
}

/// Wrapper for an async child process.
///
/// The inner implementation depends on the selected async runtime (features
/// `async-std-runtime` or `tokio-runtime`).
#[derive(Debug)]
pub struct Child {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    inner: process::Child,
}

impl Child {
    fn new(mut inner: process::Child) -> Self {
        let stdin = inner.stdin.take();
        let stdout = inner.stdout.take();
        Self {
            stdin: stdin.map(|inner| ChildStdin { inner }),
            stdout: stdout.map(|inner| ChildStdout { inner }),
            inner,
        }
    }

    /// The OS process id, if the process is still running.
    pub fn id(&self) -> Option<u32> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "async-std-runtime")] {
                Some(self.inner.id())
            } else if #[cfg(feature = "tokio-runtime")] {
                self.inner.id()
            }
        }
    }

    /// Kill the child process without waiting for it to exit.
    ///
    /// - `async-std-runtime`: call to `async_std::process::Child::kill`.
    /// - `tokio-runtime`: call to `tokio::process::Child::start_kill`.
    pub fn kill_now(&mut self) -> std::io::Result<()> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "async-std-runtime")] {
                self.inner.kill()
            } else if #[cfg(feature = "tokio-runtime")] {
                self.inner.start_kill()
            }
        }
    }
}

#[derive(Debug)]
pub struct ChildStdout {
    inner: process::ChildStdout,
}

impl futures::AsyncRead for ChildStdout {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "async-std-runtime")] {
                Pin::new(&mut self.inner).poll_read(cx, buf)
            } else if #[cfg(feature = "tokio-runtime")] {
                let mut buf = tokio::io::ReadBuf::new(buf);
                futures::ready!(tokio::io::AsyncRead::poll_read(
                    Pin::new(&mut self.inner),
                    cx,
                    &mut buf
                ))?;
                Poll::Ready(Ok(buf.filled().len()))
            }
        }
    }
}

#[derive(Debug)]
pub struct ChildStdin {
    inner: process::ChildStdin,
}

impl futures::AsyncWrite for ChildStdin {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "async-std-runtime")] {
                Pin::new(&mut self.inner).poll_write(cx, buf)
            } else if #[cfg(feature = "tokio-runtime")] {
                tokio::io::AsyncWrite::poll_write(Pin::new(&mut self.inner), cx, buf)
            }
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "async-std-runtime")] {
                Pin::new(&mut self.inner).poll_flush(cx)
            } else if #[cfg(feature = "tokio-runtime")] {
                tokio::io::AsyncWrite::poll_flush(Pin::new(&mut self.inner), cx)
            }
        }
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "async-std-runtime")] {
                Pin::new(&mut self.inner).poll_close(cx)
            } else if #[cfg(feature = "tokio-runtime")] {
                tokio::io::AsyncWrite::poll_shutdown(Pin::new(&mut self.inner), cx)
            }
        }
    }
}
