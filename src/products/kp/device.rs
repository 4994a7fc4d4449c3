use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::config::{DeviceConfig, DeviceIdentity, LineSettings, PowerBar};
use crate::dialog::DialogContext;
use crate::error::ConsoleError;
use crate::external::{MetricsSink, PowerController};
use crate::provision::RetryPolicy;
use crate::session::Line;
use crate::statemachine::Topology;
use crate::stream::{SshStream, SshTarget, Stream};

use super::dialogs::{CTX_DEFAULT_PASSWORD, CTX_PASSWORD, CTX_SUDO_PASSWORD, CTX_USERNAME};
use super::line::KpLine;
use super::patterns::KpPatterns;
use super::topology::build_kp_topology;

const CONNECTION_RETRY_PAUSE: Duration = Duration::from_secs(10);

/// A Firepower 2100 appliance: its credentials, prompt patterns and state
/// graph. Cheap to clone; every line attached to it shares the topology.
#[derive(Clone)]
pub struct Kp {
    identity: DeviceIdentity,
    patterns: Arc<KpPatterns>,
    topology: Arc<Topology>,
    metrics: Arc<dyn MetricsSink>,
    settings: LineSettings,
    power_bar: PowerBar,
    power: Option<Arc<dyn PowerController>>,
}

impl Kp {
    pub(crate) fn from_parts(
        identity: DeviceIdentity,
        patterns: Arc<KpPatterns>,
        topology: Arc<Topology>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            identity,
            patterns,
            topology,
            metrics,
            settings: LineSettings::default(),
            power_bar: PowerBar::default(),
            power: None,
        }
    }

    pub fn new(
        identity: DeviceIdentity,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConsoleError> {
        let patterns = Arc::new(KpPatterns::new(&identity)?);
        let topology = build_kp_topology(&patterns)?;
        metrics.increment("device.kp.init", 1);
        info!("Done: Kp instance created for {}", identity.hostname);
        Ok(Self::from_parts(identity, patterns, topology, metrics))
    }

    /// Builds the device from a loaded configuration, keeping its power bar
    /// and line settings.
    pub fn from_config(
        config: &DeviceConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConsoleError> {
        let mut kp = Self::new(config.identity.clone(), metrics)?
            .with_power_bar(config.power_bar.clone());
        kp.settings = config.settings.clone();
        Ok(kp)
    }

    #[must_use]
    pub fn with_power_bar(mut self, power_bar: PowerBar) -> Self {
        self.power_bar = power_bar;
        self
    }

    #[must_use]
    pub fn with_power_controller(mut self, power: Arc<dyn PowerController>) -> Self {
        self.power = Some(power);
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn patterns(&self) -> &KpPatterns {
        &self.patterns
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn power_bar(&self) -> &PowerBar {
        &self.power_bar
    }

    /// Line settings from the device configuration.
    pub fn line_settings(&self) -> &LineSettings {
        &self.settings
    }

    /// Credentials the shared transition dialogs look up.
    pub fn context(&self) -> DialogContext {
        DialogContext::new()
            .with(CTX_USERNAME, &self.identity.login_username)
            .with(CTX_PASSWORD, &self.identity.login_password)
            .with(CTX_SUDO_PASSWORD, &self.identity.sudo_password)
            .with(CTX_DEFAULT_PASSWORD, &self.identity.default_password)
    }

    pub(crate) fn wrap<S: Stream>(&self, line: Line<S>) -> KpLine<S> {
        KpLine::new(
            line,
            Arc::clone(&self.patterns),
            Arc::clone(&self.metrics),
            self.power_bar.clone(),
            self.power.clone(),
        )
    }

    /// Wraps `stream` without touching the device.
    pub(crate) fn open_line<S: Stream>(&self, stream: S, settings: LineSettings) -> KpLine<S> {
        self.wrap(Line::new(
            stream,
            Arc::clone(&self.topology),
            self.context(),
            settings,
        ))
    }

    /// Attaches to an open console stream and detects the device state.
    ///
    /// A chassis console whose state cannot be detected is dropped into
    /// ROMMON if the device happens to be booting; otherwise it is returned
    /// with the state unknown so a power cycle can still be issued.
    pub async fn attach<S: Stream>(
        &self,
        stream: S,
        settings: LineSettings,
    ) -> Result<KpLine<S>, ConsoleError> {
        let mut line = self.open_line(stream, settings);
        line.bring_up(true).await?;
        Ok(line)
    }

    /// Connects until the device answers, then waits for FXOS and every
    /// application instance to come up.
    ///
    /// `connect` is called once per attempt; `retry` bounds the attempts.
    pub async fn poll_connection<S, F, Fut>(
        &self,
        label: &str,
        retry: u32,
        mut connect: F,
    ) -> Result<KpLine<S>, ConsoleError>
    where
        S: Stream,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, ConsoleError>>,
    {
        let settings = LineSettings {
            chassis_line: true,
            ..self.settings.clone()
        };
        let mut budget =
            RetryPolicy::new(retry, CONNECTION_RETRY_PAUSE).budget("connection poll", label);

        let mut line = loop {
            let stream = match connect().await {
                Ok(stream) => stream,
                Err(err) => {
                    budget.failed(&err.to_string()).await?;
                    continue;
                }
            };
            let mut line = self.open_line(stream, settings.clone());
            match line.line_mut().go_to_any().await {
                Ok(state) => {
                    info!("{} is up in '{}'", label, state);
                    break line;
                }
                Err(err) => {
                    if let Err(close_err) = line.line_mut().close("connection poll").await {
                        debug!("closing {} after a failed attempt: {}", label, close_err);
                    }
                    budget.failed(&err.to_string()).await?;
                }
            }
        };

        line.wait_for_device_ready().await?;
        Ok(line)
    }

    /// [`Kp::poll_connection`] over SSH to the chassis manager.
    pub async fn poll_ssh_connection(
        &self,
        target: &SshTarget,
        retry: u32,
    ) -> Result<KpLine<SshStream>, ConsoleError> {
        let label = target.label();
        self.poll_connection(&label, retry, || SshStream::connect(target))
            .await
    }

    /// Opens an SSH session straight into the application.
    pub async fn ssh_vty(
        &self,
        target: &SshTarget,
        timeout_secs: u64,
    ) -> Result<KpLine<SshStream>, ConsoleError> {
        let stream = SshStream::connect(target).await?;
        let settings = LineSettings {
            default_timeout_secs: timeout_secs,
            chassis_line: false,
        };
        let mut line = self.open_line(stream, settings);
        line.bring_up(true).await?;
        Ok(line)
    }
}
