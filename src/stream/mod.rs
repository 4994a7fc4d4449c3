//! Bidirectional text streams to a device console.
//!
//! The engine only needs three things from a transport: write text, read
//! whatever arrived within a timeout, and close. [`Console`] wraps a
//! [`Stream`] with the accumulation buffer that dialogs match against.
//!
//! # Implementations
//!
//! - [`ChannelStream`] - a pair of tokio mpsc channels
//! - [`SshStream`] - an interactive SSH shell
//! - [`ScriptedStream`] - an in-memory scripted device for tests

use std::future::Future;
use std::time::Duration;

use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConsoleError;
use crate::session::{SessionEvent, SessionRecorder};

pub mod channel;
pub mod mock;
pub mod ssh;

pub use channel::ChannelStream;
pub use mock::{ScriptedStream, SentLog};
pub use ssh::{SshStream, SshTarget};

/// A text stream to a device console.
///
/// Sessions are moved between tokio tasks, so every future must be `Send`.
pub trait Stream: Send {
    /// Writes `data` as-is.
    fn send(&mut self, data: &str) -> impl Future<Output = Result<(), ConsoleError>> + Send;

    /// Writes `data` followed by a line terminator.
    fn sendline(&mut self, data: &str) -> impl Future<Output = Result<(), ConsoleError>> + Send {
        let line = format!("{data}\n");
        async move { self.send(&line).await }
    }

    /// Waits up to `timeout` for the next chunk of output.
    ///
    /// Returns `Ok(None)` when nothing arrived in time and
    /// [`ConsoleError::StreamClosed`] once the peer has gone away.
    fn recv(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<String>, ConsoleError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), ConsoleError>> + Send;
}

/// Backspace and bare carriage-return runs some consoles emit while
/// redrawing a line.
static REDRAW_NOISE: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\u{8}+|\r+(?:[ \t]+\r+)+") {
    Ok(re) => re,
    Err(err) => panic!("invalid REDRAW_NOISE regex: {err}"),
});

/// Unmatched output kept for matching; older text is dropped beyond this.
const MAX_BUFFER_LEN: usize = 256 * 1024;
const KEEP_BUFFER_LEN: usize = 64 * 1024;

/// A stream plus the buffer of output not yet consumed by a match.
pub struct Console<S> {
    stream: S,
    buffer: String,
    recorder: Option<SessionRecorder>,
}

impl<S: Stream> Console<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: String::new(),
            recorder: None,
        }
    }

    /// Records raw chunks into `recorder` when it runs at full level.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    pub(crate) fn record(&self, event: SessionEvent) {
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(event);
        }
    }

    /// Output received but not yet consumed.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Removes and returns the buffer up to byte offset `end`.
    pub fn consume(&mut self, end: usize) -> String {
        let end = end.min(self.buffer.len());
        self.buffer.drain(..end).collect()
    }

    pub fn take_buffer(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub async fn send(&mut self, data: &str) -> Result<(), ConsoleError> {
        trace!("send {:?}", data);
        self.stream.send(data).await
    }

    pub async fn sendline(&mut self, data: &str) -> Result<(), ConsoleError> {
        trace!("sendline {:?}", data);
        self.stream.sendline(data).await
    }

    /// Reads one chunk into the buffer. Returns false if nothing arrived
    /// within `timeout`.
    pub async fn fill(&mut self, timeout: Duration) -> Result<bool, ConsoleError> {
        match self.stream.recv(timeout).await? {
            Some(chunk) => {
                trace!("{:?}", chunk);
                if let Some(recorder) = self.recorder.as_ref() {
                    let _ = recorder.record_raw_chunk(chunk.clone());
                }
                let cleaned = REDRAW_NOISE.replace_all(&chunk, "");
                self.buffer.push_str(&cleaned);
                if self.buffer.len() > MAX_BUFFER_LEN {
                    let mut cut = self.buffer.len() - KEEP_BUFFER_LEN;
                    while !self.buffer.is_char_boundary(cut) {
                        cut += 1;
                    }
                    self.buffer.drain(..cut);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops the buffer and any output already waiting on the stream.
    pub async fn discard(&mut self) -> Result<(), ConsoleError> {
        self.buffer.clear();
        while let Some(chunk) = self.stream.recv(Duration::ZERO).await? {
            trace!("discard {:?}", chunk);
        }
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), ConsoleError> {
        self.stream.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fill_strips_redraw_noise_and_keeps_prompt() {
        let stream = ScriptedStream::new().initial_output("abc\u{8}\u{8}\u{8}kp-2110# ");
        let mut console = Console::new(stream);

        assert!(console.fill(Duration::from_secs(1)).await.expect("fill"));
        assert_eq!(console.buffer(), "abckp-2110# ");
        assert!(!console.fill(Duration::from_secs(1)).await.expect("fill"));
    }

    #[tokio::test(start_paused = true)]
    async fn consume_keeps_unmatched_tail() {
        let stream = ScriptedStream::new().initial_output("one\ntwo\n");
        let mut console = Console::new(stream);
        console.fill(Duration::from_secs(1)).await.expect("fill");

        assert_eq!(console.consume(4), "one\n");
        assert_eq!(console.buffer(), "two\n");
        assert_eq!(console.consume(100), "two\n");
        assert!(console.buffer().is_empty());
    }
}
