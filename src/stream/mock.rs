//! Scripted in-memory device for exercising dialogs and workflows.
//!
//! A [`ScriptedStream`] prints its initial output, then answers each line it
//! receives with the output registered for that line. One-shot reactions
//! are consumed in registration order, so the same command can produce a
//! different answer every time it is polled.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::Stream;
use crate::error::ConsoleError;

/// Shared record of everything written to a [`ScriptedStream`].
#[derive(Debug, Clone, Default)]
pub struct SentLog {
    inner: Arc<Mutex<Vec<String>>>,
}

impl SentLog {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, data: &str) {
        self.lock().push(data.to_string());
    }

    /// Raw writes, terminators included.
    pub fn raw(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Writes with their line terminator removed.
    pub fn lines(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|data| data.trim_end_matches(['\r', '\n']).to_string())
            .collect()
    }

    /// Number of writes equal to `line` once the terminator is removed.
    pub fn count(&self, line: &str) -> usize {
        self.lines()
            .iter()
            .filter(|sent| sent.as_str() == line)
            .count()
    }

    pub fn contains(&self, line: &str) -> bool {
        self.count(line) > 0
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug)]
struct Reaction {
    trigger: String,
    output: String,
    persistent: bool,
    used: bool,
}

#[derive(Debug)]
pub struct ScriptedStream {
    pending: VecDeque<String>,
    reactions: Vec<Reaction>,
    sent: SentLog,
    echo: bool,
    eof: bool,
    closed: bool,
}

impl Default for ScriptedStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            reactions: Vec::new(),
            sent: SentLog::default(),
            echo: true,
            eof: false,
            closed: false,
        }
    }

    /// Output available before anything is sent.
    #[must_use]
    pub fn initial_output(mut self, output: &str) -> Self {
        self.pending.push_back(output.to_string());
        self
    }

    /// Answers the next unanswered `trigger` line with `output`, once.
    #[must_use]
    pub fn on(mut self, trigger: &str, output: &str) -> Self {
        self.reactions.push(Reaction {
            trigger: trigger.to_string(),
            output: output.to_string(),
            persistent: false,
            used: false,
        });
        self
    }

    /// Answers every `trigger` line with `output` once the one-shot
    /// reactions for it are used up.
    #[must_use]
    pub fn always(mut self, trigger: &str, output: &str) -> Self {
        self.reactions.push(Reaction {
            trigger: trigger.to_string(),
            output: output.to_string(),
            persistent: true,
            used: false,
        });
        self
    }

    /// Whether sent lines are echoed back the way a terminal does.
    #[must_use]
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Reports the stream as closed once its output is drained.
    #[must_use]
    pub fn eof(mut self) -> Self {
        self.eof = true;
        self
    }

    /// Handle for inspecting what was sent after the stream is moved.
    pub fn sent_log(&self) -> SentLog {
        self.sent.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn react(&mut self, data: &str) {
        let line = data.trim_end_matches(['\r', '\n']);
        if self.echo && data.ends_with('\n') {
            self.pending.push_back(format!("{line}\r\n"));
        }

        let index = self
            .reactions
            .iter()
            .position(|r| !r.persistent && !r.used && r.trigger == line)
            .or_else(|| {
                self.reactions
                    .iter()
                    .position(|r| r.persistent && r.trigger == line)
            });
        if let Some(index) = index {
            let reaction = &mut self.reactions[index];
            reaction.used = true;
            if !reaction.output.is_empty() {
                self.pending.push_back(reaction.output.clone());
            }
        }
    }
}

impl Stream for ScriptedStream {
    async fn send(&mut self, data: &str) -> Result<(), ConsoleError> {
        if self.closed {
            return Err(ConsoleError::StreamClosed);
        }
        self.sent.push(data);
        self.react(data);
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>, ConsoleError> {
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Some(chunk));
        }
        if self.closed || self.eof {
            return Err(ConsoleError::StreamClosed);
        }
        if !timeout.is_zero() {
            tokio::time::sleep(timeout).await;
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<(), ConsoleError> {
        self.closed = true;
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_shot_reactions_are_consumed_in_order() {
        let mut stream = ScriptedStream::new()
            .echo(false)
            .on("status", "Downloading")
            .on("status", "Downloaded")
            .always("status", "Idle");
        let log = stream.sent_log();

        for expected in ["Downloading", "Downloaded", "Idle", "Idle"] {
            stream.sendline("status").await.expect("send");
            let chunk = stream.recv(Duration::ZERO).await.expect("recv");
            assert_eq!(chunk.as_deref(), Some(expected));
        }
        assert_eq!(log.count("status"), 4);
    }

    #[tokio::test]
    async fn echo_precedes_reaction_output() {
        let mut stream = ScriptedStream::new().on("show clock", "12:00:00\r\nkp# ");
        stream.sendline("show clock").await.expect("send");

        let echo = stream.recv(Duration::ZERO).await.expect("recv");
        let output = stream.recv(Duration::ZERO).await.expect("recv");
        assert_eq!(echo.as_deref(), Some("show clock\r\n"));
        assert_eq!(output.as_deref(), Some("12:00:00\r\nkp# "));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_recv_waits_out_the_timeout() {
        let mut stream = ScriptedStream::new();
        let start = tokio::time::Instant::now();
        let chunk = stream.recv(Duration::from_secs(3)).await.expect("recv");
        assert!(chunk.is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn closed_stream_rejects_writes() {
        let mut stream = ScriptedStream::new().initial_output("bye");
        stream.close().await.expect("close");
        assert!(stream.is_closed());
        assert!(matches!(
            stream.send("x").await,
            Err(ConsoleError::StreamClosed)
        ));
        assert!(matches!(
            stream.recv(Duration::ZERO).await,
            Err(ConsoleError::StreamClosed)
        ));
    }
}
