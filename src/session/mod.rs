//! Live device sessions.
//!
//! A [`Line`] owns one console stream and one [`StateMachine`] over a shared
//! topology. Everything a workflow does to a device goes through it:
//! transitions, command execution, ad-hoc dialogs and polling expects.
//!
//! # Main Components
//!
//! - [`Line`] - a stream plus its state tracking and dialog context
//! - [`Command`] - a command bound to the state it must run in
//! - [`SessionRecorder`] - optional JSONL recording of what happened

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::LineSettings;
use crate::dialog::{Dialog, DialogContext, DialogMatch, ExpectOutcome, expect_any};
use crate::error::ConsoleError;
use crate::pattern::Pattern;
use crate::statemachine::{StateMachine, Topology};
use crate::stream::{Console, Stream};

pub use recording::{
    NormalizeOptions, SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder,
};

mod recording;

/// A command to run in a specific device state.
#[derive(Default, Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Command {
    /// State the command must run in, e.g. "fxos", "fireos" or "sudo".
    /// The line walks there first.
    pub mode: String,

    /// The command text, e.g. "show version".
    pub command: String,

    /// Timeout in seconds. Falls back to the line's default when `None`.
    pub timeout: Option<u64>,
}

impl Command {
    pub fn new(mode: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            command: command.into(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }
}

/// One expect/send step for [`Line::expect_and_sendline`].
#[derive(Debug, Clone)]
pub struct ExpectSend {
    pub pattern: Pattern,
    pub send: String,
    pub timeout: Option<Duration>,
}

impl ExpectSend {
    pub fn new(pattern: Pattern, send: impl Into<String>) -> Self {
        Self {
            pattern,
            send: send.into(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A connected console with state tracking.
pub struct Line<S: Stream> {
    console: Console<S>,
    sm: StateMachine,
    ctx: DialogContext,
    settings: LineSettings,
}

impl<S: Stream> Line<S> {
    /// Wraps `stream` without touching the device; the state starts
    /// unknown.
    pub fn new(
        stream: S,
        topology: Arc<Topology>,
        ctx: DialogContext,
        settings: LineSettings,
    ) -> Self {
        Self {
            console: Console::new(stream),
            sm: StateMachine::new(topology),
            ctx,
            settings,
        }
    }

    /// Wraps `stream` and detects the current state.
    pub async fn connect(
        stream: S,
        topology: Arc<Topology>,
        ctx: DialogContext,
        settings: LineSettings,
    ) -> Result<Self, ConsoleError> {
        let mut line = Self::new(stream, topology, ctx, settings);
        line.go_to_any().await?;
        Ok(line)
    }

    #[must_use]
    pub fn with_recorder(self, recorder: SessionRecorder) -> Self {
        let Line {
            console,
            sm,
            ctx,
            settings,
        } = self;
        Self {
            console: console.with_recorder(recorder),
            sm,
            ctx,
            settings,
        }
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.console.recorder()
    }

    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    pub fn context(&self) -> &DialogContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DialogContext {
        &mut self.ctx
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.sm
    }

    pub fn console(&self) -> &Console<S> {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut Console<S> {
        &mut self.console
    }

    fn default_timeout(&self) -> Duration {
        self.settings.default_timeout()
    }

    pub fn current_state(&self) -> Option<&str> {
        self.sm.current_state()
    }

    pub fn update_state(&mut self, state: &str) -> Result<(), ConsoleError> {
        self.sm.update_state(state)
    }

    /// Forget the current state; the next transition re-detects it.
    pub fn invalidate_state(&mut self) {
        self.sm.invalidate();
    }

    pub async fn go_to(&mut self, state: &str) -> Result<(), ConsoleError> {
        let timeout = self.default_timeout();
        self.go_to_with_timeout(state, timeout).await
    }

    pub async fn go_to_with_timeout(
        &mut self,
        state: &str,
        timeout: Duration,
    ) -> Result<(), ConsoleError> {
        self.sm
            .go_to(state, &mut self.console, &self.ctx, timeout)
            .await
    }

    /// Re-detects the state from the prompt the device shows.
    pub async fn go_to_any(&mut self) -> Result<String, ConsoleError> {
        let timeout = self.default_timeout();
        self.sm
            .go_to_any(&mut self.console, &self.ctx, timeout)
            .await
    }

    /// Runs `command` in the current state and returns its output.
    pub async fn execute(&mut self, command: &str) -> Result<String, ConsoleError> {
        let timeout = self.default_timeout();
        self.execute_with_timeout(command, timeout).await
    }

    pub async fn execute_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ConsoleError> {
        self.sm
            .execute(command, &mut self.console, &self.ctx, timeout)
            .await
    }

    /// Runs each non-blank line of `commands` in turn and joins the outputs.
    pub async fn execute_lines(
        &mut self,
        commands: &str,
        timeout: Duration,
    ) -> Result<String, ConsoleError> {
        let mut outputs = Vec::new();
        for command in commands.lines().map(str::trim).filter(|c| !c.is_empty()) {
            outputs.push(self.execute_with_timeout(command, timeout).await?);
        }
        Ok(outputs.join("\n"))
    }

    /// Walks to `cmd.mode` and runs the command there.
    pub async fn run(&mut self, cmd: &Command) -> Result<String, ConsoleError> {
        let timeout = cmd
            .timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.default_timeout());
        self.go_to_with_timeout(&cmd.mode, timeout).await?;
        self.execute_with_timeout(&cmd.command, timeout).await
    }

    /// Runs a command for its side effect, such as terminal setup, and
    /// drops the output.
    pub async fn execute_only(&mut self, command: &str) -> Result<(), ConsoleError> {
        let output = self.execute(command).await?;
        debug!("execute only {:?}: {} byte(s) dropped", command, output.len());
        Ok(())
    }

    pub async fn send(&mut self, data: &str) -> Result<(), ConsoleError> {
        self.console.send(data).await
    }

    pub async fn sendline(&mut self, data: &str) -> Result<(), ConsoleError> {
        self.console.sendline(data).await
    }

    /// Runs a dialog with this line's context. The state is not updated;
    /// callers that land in a known state call [`Line::update_state`].
    pub async fn run_dialog(
        &mut self,
        dialog: &Dialog,
        timeout: Duration,
    ) -> Result<DialogMatch, ConsoleError> {
        dialog.run(&mut self.console, &self.ctx, timeout).await
    }

    /// Waits for any of `patterns` without sending anything.
    pub async fn expect_any(
        &mut self,
        patterns: &[Pattern],
        timeout: Duration,
    ) -> Result<ExpectOutcome, ConsoleError> {
        expect_any(&mut self.console, patterns, timeout).await
    }

    /// Like [`Line::expect_any`] but a timeout is an error.
    pub async fn expect(
        &mut self,
        pattern: &Pattern,
        timeout: Duration,
    ) -> Result<DialogMatch, ConsoleError> {
        let start = tokio::time::Instant::now();
        match self
            .expect_any(std::slice::from_ref(pattern), timeout)
            .await?
        {
            ExpectOutcome::Matched(m) => Ok(m),
            ExpectOutcome::TimedOut { buffer } => Err(ConsoleError::DialogTimeout {
                elapsed: start.elapsed(),
                buffer,
            }),
        }
    }

    /// For each step, sends its text and then waits for its pattern.
    pub async fn expect_and_sendline(
        &mut self,
        steps: &[ExpectSend],
        timeout: Duration,
    ) -> Result<(), ConsoleError> {
        for step in steps {
            self.console.sendline(&step.send).await?;
            self.expect(&step.pattern, step.timeout.unwrap_or(timeout))
                .await?;
        }
        Ok(())
    }

    /// Closes the stream. The line is unusable afterwards.
    pub async fn close(&mut self, reason: &str) -> Result<(), ConsoleError> {
        info!("closing line: {}", reason);
        self.console.record(SessionEvent::ConnectionClosed {
            reason: reason.to_string(),
            state_before: self.sm.current_state().map(str::to_string),
        });
        self.sm.invalidate();
        self.console.close().await
    }
}
