//! Error types for console sessions, state transitions and provisioning.
//!
//! Every terminal failure carries enough context (operation, target,
//! elapsed time or attempt count, unmatched buffer) to be diagnosed from the
//! log line alone.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// How a retry or polling budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    /// A polling loop passed its overall deadline.
    Elapsed(Duration),
    /// A retry loop used up its attempts.
    Attempts(u32),
}

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exhausted::Elapsed(elapsed) => write!(f, "after {:.1}s", elapsed.as_secs_f64()),
            Exhausted::Attempts(attempts) => write!(f, "after {attempts} attempts"),
        }
    }
}

/// Errors raised by the dialog engine, the state machine and the workflows.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// No dialog rule matched before the deadline.
    ///
    /// The unmatched buffer is kept so the caller can see what the device
    /// actually printed.
    #[error("dialog timed out after {:.1}s, unmatched buffer: {buffer:?}", .elapsed.as_secs_f64())]
    DialogTimeout { elapsed: Duration, buffer: String },

    /// A templated action referenced a context key that was never provided.
    #[error("dialog context has no value for '{0}'")]
    ContextLookup(String),

    /// None of the known state prompts matched during detection.
    #[error("cannot detect device state, last output: {buffer:?}")]
    StateDetection { buffer: String },

    /// The target state is not reachable from the current one.
    #[error("no path from '{from}' to '{to}'")]
    NoPath { from: String, to: String },

    /// The state name is not declared in the topology.
    #[error("unknown state '{0}'")]
    UnknownState(String),

    /// The current state is unknown or does not accept commands.
    #[error("state '{state}' does not accept commands")]
    CommandNotAccepted { state: String },

    /// A retry or polling budget ran out.
    #[error("{operation} for '{target}' gave up {exhausted}")]
    ProvisioningTimeout {
        operation: String,
        target: String,
        exhausted: Exhausted,
    },

    /// Installed software does not match the requested version.
    #[error("version mismatch: expected '{expected}', device reports '{observed}'")]
    VersionMismatch { expected: String, observed: String },

    /// The device reported that a command failed.
    #[error("command '{command}' failed: {output}")]
    CommandFailed { command: String, output: String },

    /// A topology, pattern or configuration value is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required installation artifact could not be found.
    #[error("missing artifact: {0}")]
    MissingArtifact(String),

    /// The power controller reported a failure.
    #[error("power cycle failed: {0}")]
    PowerCycle(String),

    /// The transport could not be opened before its deadline.
    #[error("connecting to {target} timed out after {:.1}s", .elapsed.as_secs_f64())]
    ConnectTimeout { target: String, elapsed: Duration },

    /// The underlying stream is closed.
    #[error("stream closed")]
    StreamClosed,

    /// Reading a configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    Russh(#[from] russh::Error),

    /// Failed to hand data to the I/O task.
    #[error("failed to send data: {0}")]
    SendData(#[from] SendError<String>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConsoleError {
    /// Builds a [`ConsoleError::ProvisioningTimeout`].
    pub fn provisioning_timeout(
        operation: impl Into<String>,
        target: impl Into<String>,
        exhausted: Exhausted,
    ) -> Self {
        ConsoleError::ProvisioningTimeout {
            operation: operation.into(),
            target: target.into(),
            exhausted,
        }
    }

    /// Returns true for a dialog or detection timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ConsoleError::DialogTimeout { .. } | ConsoleError::StateDetection { .. }
        )
    }
}
