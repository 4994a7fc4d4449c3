//! Firepower 1000 series (Westminster) appliances.
//!
//! The console graph is the 2100 one with a different `connect fxos`
//! exchange: the application asks for the login password again before
//! handing the console back to FXOS.

use std::sync::Arc;

use log::info;

use crate::config::{DeviceIdentity, FACTORY_PASSWORD, LineSettings, PowerBar};
use crate::dialog::{Action, Dialog, Rule};
use crate::error::ConsoleError;
use crate::external::{FileResolver, MetricsSink, PowerController};
use crate::pattern::Pattern;
use crate::statemachine::{Path, TopologyOverlay};
use crate::stream::Stream;

use super::kp::dialogs::CTX_PASSWORD;
use super::kp::topology::{FIREOS, FXOS, kp_topology};
use super::kp::{BaselineOptions, Kp, KpLine, KpPatterns, resolve_baseline};

/// Differences between the 1000 and 2100 console graphs.
pub fn wm_overlay(p: &KpPatterns) -> TopologyOverlay {
    let dialog = Dialog::default()
        .rule(
            Rule::new(
                Pattern::literal("exit-hint", "Please enter 'exit' to go back"),
                Action::sendline("exit"),
            )
            .and_continue()
            .reset_timer(),
        )
        .rule(Rule::new(p.password.clone(), Action::sendline_ctx(CTX_PASSWORD)).and_continue());
    TopologyOverlay::new().path(Path::new(FIREOS, FXOS, "connect fxos").dialog(dialog))
}

/// A Firepower 1000 appliance.
#[derive(Clone)]
pub struct Wm {
    kp: Kp,
}

impl Wm {
    pub fn new(
        identity: DeviceIdentity,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConsoleError> {
        let patterns = Arc::new(KpPatterns::new(&identity)?);
        let topology = kp_topology(&patterns)
            .overlay(wm_overlay(&patterns))
            .build()?;
        metrics.increment("device.wm.init", 1);
        info!("Done: Wm instance created for {}", identity.hostname);
        Ok(Self {
            kp: Kp::from_parts(identity, patterns, topology, metrics),
        })
    }

    /// Identity with the factory password as both login and sudo password,
    /// which is how 1000 series boxes ship.
    pub fn default_identity(hostname: impl Into<String>) -> DeviceIdentity {
        DeviceIdentity::new(hostname)
            .with_login("admin", FACTORY_PASSWORD)
            .with_sudo_password(FACTORY_PASSWORD)
    }

    #[must_use]
    pub fn with_power_bar(self, power_bar: PowerBar) -> Self {
        Self {
            kp: self.kp.with_power_bar(power_bar),
        }
    }

    #[must_use]
    pub fn with_power_controller(self, power: Arc<dyn PowerController>) -> Self {
        Self {
            kp: self.kp.with_power_controller(power),
        }
    }

    pub fn kp(&self) -> &Kp {
        &self.kp
    }

    /// Attaches to a console. Unlike the 2100, an undetectable state is an
    /// error rather than a cue to wait for ROMMON.
    pub async fn attach<S: Stream>(
        &self,
        stream: S,
        settings: LineSettings,
    ) -> Result<WmLine<S>, ConsoleError> {
        let mut inner = self.kp.open_line(stream, settings);
        inner.bring_up(false).await?;
        Ok(WmLine { inner })
    }
}

/// A session on a Firepower 1000 console.
pub struct WmLine<S: Stream> {
    inner: KpLine<S>,
}

impl<S: Stream> WmLine<S> {
    pub fn kp_line(&self) -> &KpLine<S> {
        &self.inner
    }

    pub fn kp_line_mut(&mut self) -> &mut KpLine<S> {
        &mut self.inner
    }

    pub fn into_inner(self) -> KpLine<S> {
        self.inner
    }

    pub async fn baseline(&mut self, opts: &BaselineOptions) -> Result<(), ConsoleError> {
        self.inner.metrics().increment("device.wm.baseline", 1);
        self.inner.baseline_fp2k_ftd(opts).await
    }

    pub async fn baseline_by_branch_and_version<R: FileResolver>(
        &mut self,
        resolver: &R,
        site: &str,
        branch: &str,
        version: &str,
        opts: BaselineOptions,
    ) -> Result<(), ConsoleError> {
        let opts = resolve_baseline(resolver, "wm", site, branch, version, opts).await?;
        self.baseline(&opts).await
    }
}
