//! Execute untrusted script text in a disposable, isolated interpreter
//! process and stream its console output and errors back to the host.
//!
//! The host side is a [`Runner`] plus the [`Handler`] driving it:
//!
//! ```no_run
//! use futures::StreamExt;
//! use sandboxide::runner::{Runner, RunnerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (runner, mut handler) = Runner::new(RunnerConfig::builder().build()?);
//!
//! async_std::task::spawn(async move {
//!     while let Some(_) = handler.next().await {}
//! });
//! let mut output = runner.output_listener().await?;
//!
//! runner.create().await?;
//! runner.submit(r#"console.log("hello")"#).await?;
//!
//! while let Some(line) = output.next().await {
//!     println!("{line}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod bootstrap;
pub mod conn;
pub mod error;
pub mod handler;
pub mod output;
pub mod runner;

mod async_process;

pub use crate::error::{Result, RunnerError};
pub use crate::handler::{ContextState, Handler};
pub use crate::output::{OutputKind, OutputLine, OutputLog, OutputStream};
pub use crate::runner::{Runner, RunnerConfig, RunnerConfigBuilder};
pub use sandboxide_types as types;

cfg_if::cfg_if! {
    if #[cfg(all(not(feature = "async-std-runtime"), not(feature = "tokio-runtime")))] {
        compile_error!("one of the features ['async-std-runtime', 'tokio-runtime'] must be enabled");
    } else if #[cfg(all(feature = "async-std-runtime", feature = "tokio-runtime"))] {
        compile_error!("only one of features ['async-std-runtime', 'tokio-runtime'] can be enabled");
    }
}
