use std::collections::VecDeque;
use std::io;
use std::pin::Pin;

use futures::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, Lines};
use futures::stream::Stream;
use futures::task::{Context, Poll};

use sandboxide_types::ContextMessage;

use crate::async_process::{ChildStdin, ChildStdout};
use crate::error::{Result, RunnerError};

/// Exchanges the messages with an execution context over its standard
/// streams, one JSON message per line.
#[must_use = "streams do nothing unless polled"]
#[derive(Debug)]
pub struct Connection<R = ChildStdout, W = ChildStdin> {
    /// Queue of requests to send.
    pending_requests: VecDeque<Vec<u8>>,
    /// Inbound messages read from the context's stdout.
    lines: Lines<BufReader<R>>,
    /// The write half of the context's stdin.
    sink: W,
    /// The frame that is currently being written out, with the write offset.
    pending_flush: Option<(Vec<u8>, usize)>,
    needs_flush: bool,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            pending_requests: Default::default(),
            lines: BufReader::new(reader).lines(),
            sink: writer,
            pending_flush: None,
            needs_flush: false,
        }
    }

    /// Queue in a `request` message carrying the source text to execute.
    pub fn submit_request(&mut self, code: String) -> serde_json::Result<()> {
        tracing::debug!("submit request ({} bytes)", code.len());
        let mut frame = serde_json::to_vec(&ContextMessage::Request { code })?;
        frame.push(b'\n');
        self.pending_requests.push_back(frame);
        Ok(())
    }

    /// Flush any processed frame and start writing the next one into the
    /// context's stdin.
    fn start_send_next(&mut self, cx: &mut Context<'_>) -> Result<()> {
        loop {
            if let Some((frame, offset)) = self.pending_flush.as_mut() {
                match Pin::new(&mut self.sink).poll_write(cx, &frame[*offset..]) {
                    Poll::Ready(Ok(0)) => {
                        return Err(io::Error::from(io::ErrorKind::WriteZero).into())
                    }
                    Poll::Ready(Ok(n)) => {
                        *offset += n;
                        if *offset == frame.len() {
                            self.pending_flush = None;
                            self.needs_flush = true;
                        }
                    }
                    Poll::Ready(Err(err)) => return Err(err.into()),
                    Poll::Pending => return Ok(()),
                }
            } else if self.needs_flush {
                match Pin::new(&mut self.sink).poll_flush(cx) {
                    Poll::Ready(Ok(())) => self.needs_flush = false,
                    Poll::Ready(Err(err)) => return Err(err.into()),
                    Poll::Pending => return Ok(()),
                }
            } else if let Some(frame) = self.pending_requests.pop_front() {
                self.pending_flush = Some((frame, 0));
            } else {
                return Ok(());
            }
        }
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Stream for Connection<R, W> {
    type Item = Result<ContextMessage>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let pin = self.get_mut();

        // progress any queued request if not currently flushing
        if let Err(err) = pin.start_send_next(cx) {
            return Poll::Ready(Some(Err(err)));
        }

        // read from the context's stdout
        loop {
            return match Stream::poll_next(Pin::new(&mut pin.lines), cx) {
                Poll::Ready(Some(Ok(line))) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    tracing::debug!("read {:?}", line);
                    match serde_json::from_str::<ContextMessage>(&line) {
                        Ok(msg) => Poll::Ready(Some(Ok(msg))),
                        Err(err) => {
                            tracing::error!("failed to parse message {:?}", line);
                            Poll::Ready(Some(Err(err.into())))
                        }
                    }
                }
                Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(RunnerError::Io(err)))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            };
        }
    }
}
