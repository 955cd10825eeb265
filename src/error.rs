use std::io;

use thiserror::Error;

pub type Result<T, E = RunnerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    ChannelSendError(#[from] futures::channel::mpsc::SendError),
    #[error("{0}")]
    ChannelRecvError(#[from] futures::channel::oneshot::Canceled),
    /// `submit()` was called while no execution context exists.
    #[error("no execution context, call create() first")]
    NoContext,
}
