//! Collaborators the workflows call out to but do not implement.
//!
//! Power distribution units, the build file servers and the metrics
//! backend differ per lab. Workflows take them as trait objects bound at
//! construction time.

use std::future::Future;
use std::pin::Pin;

use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::PowerBar;
use crate::error::ConsoleError;

pub type PowerCycleFuture<'a> =
    Pin<Box<dyn Future<Output = Result<bool, ConsoleError>> + Send + 'a>>;

/// Switches power outlets off and back on.
///
/// Object safe so a device can hold `Arc<dyn PowerController>`.
pub trait PowerController: Send + Sync {
    /// Cycles every outlet listed in `power_bar`. The comma-separated lists
    /// are passed through untouched. Returns whether the PDU accepted the
    /// request.
    fn power_cycle<'a>(&'a self, power_bar: &'a PowerBar) -> PowerCycleFuture<'a>;
}

/// Where a build's installation files live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InstallationFiles {
    pub server_ip: String,
    /// Directory of the build on the TFTP server, e.g.
    /// `netboot/ims/Development/6.2.1-1177/installers`.
    pub tftp_prefix: String,
    /// Directory of the build for SCP downloads.
    pub scp_prefix: String,
    pub files: Vec<String>,
}

impl InstallationFiles {
    /// First file whose name satisfies `matches`.
    pub fn find(&self, matches: impl Fn(&str) -> bool) -> Option<&str> {
        self.files
            .iter()
            .map(String::as_str)
            .find(|name| matches(name))
    }

    /// Like [`InstallationFiles::find`] but reports a missing file,
    /// described as `what`.
    pub fn require(
        &self,
        what: &str,
        matches: impl Fn(&str) -> bool,
    ) -> Result<&str, ConsoleError> {
        self.find(matches).ok_or_else(|| {
            ConsoleError::MissingArtifact(format!(
                "no {} among {:?} on {}",
                what, self.files, self.server_ip
            ))
        })
    }
}

/// Looks up the installation files of a build.
pub trait FileResolver: Send + Sync {
    fn resolve_files(
        &self,
        site: &str,
        product: &str,
        branch: &str,
        version: &str,
    ) -> impl Future<Output = Result<InstallationFiles, ConsoleError>> + Send;
}

/// Fire-and-forget counters.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str, value: u64);
}

/// Writes each counter increment to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn increment(&self, name: &str, value: u64) {
        info!("metric {} += {}", name, value);
    }
}

impl<M: MetricsSink + ?Sized> MetricsSink for std::sync::Arc<M> {
    fn increment(&self, name: &str, value: u64) {
        (**self).increment(name, value);
    }
}
