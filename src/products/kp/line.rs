//! A console line into a Firepower 2100 and the provisioning workflows
//! that run over it.
//!
//! Every workflow is a chain of short bounded waits: transitions through the
//! shared topology, ad-hoc dialogs for installers and boot prompts, and
//! [`Poller`]/[`RetryPolicy`] loops around slow device-side progress.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::PowerBar;
use crate::dialog::{Action, Dialog, DialogMatch, Rule};
use crate::error::ConsoleError;
use crate::external::{FileResolver, MetricsSink, PowerController};
use crate::pattern::Pattern;
use crate::provision::{
    DEFAULT_TIMEOUT, DOWNLOAD_WAIT, MAX_RETRY_COUNT, POLL_INTERVAL, Poller, RetryPolicy,
};
use crate::session::{ExpectSend, Line};
use crate::stream::Stream;

use super::options::{BaselineOptions, ManagerMode, ManagerRegistration};
use super::parse::{
    AppInstance, DownloadState, FtdVersion, Package, find_error, ftd_version_from,
    image_name_from_url, parse_app_instances, parse_package_version, parse_packages,
};
use super::patterns::KpPatterns;
use super::topology::{FIREOS, FXOS, LOCAL_MGMT, ROMMON, SUDO};

/// Terminal setup run on every chassis line once FXOS is reached.
pub const KP_INIT_COMMANDS: &[&str] = &["top", "terminal length 0", "terminal width 511"];

/// Name prefix of the ROMMON netboot image among a build's files.
pub const ROMMON_IMAGE_PREFIX: &str = "fxos-k8-fp2k-lfbff";

/// Files and search strings [`KpLine::get_logs`] falls back to.
pub const DEFAULT_LOG_FILES: &[&str] = &["/var/log/boot_*"];
pub const DEFAULT_LOG_SEARCH: &[&str] = &["fatal", "error"];

const ESC: &str = "\u{1b}";
const CTRL_C: &str = "\u{3}";

const ROMMON_WAIT: Duration = Duration::from_secs(300);
const DOWNLOAD_RETRY_PAUSE: Duration = Duration::from_secs(300);
const DEVICE_SETTLE: Duration = Duration::from_secs(120);
const ROMMON_INSTALL_SETTLE: Duration = Duration::from_secs(60);
const PASSWORD_CHANGE_WAIT: Duration = Duration::from_secs(900);
const FXOS_READY_WAIT: Duration = Duration::from_secs(600);
const APPS_ONLINE_INTERVAL: Duration = Duration::from_secs(20);
const APPS_ONLINE_WAIT: Duration = Duration::from_secs(1200);

/// Rule that answers and keeps going with a fresh timeout window.
fn step(pattern: Pattern, action: Action) -> Rule {
    Rule::new(pattern, action).and_continue().reset_timer()
}

/// Progress text that only restarts the timeout window.
fn progress(name: &str, text: &str) -> Rule {
    step(Pattern::literal(name, text), Action::None)
}

fn literal(name: &str, text: &str) -> Pattern {
    Pattern::literal(name, text)
}

/// The exact `Password: ` prompt, as opposed to `Enter new password:`.
fn password_prompt() -> Pattern {
    literal("password", "Password: ")
}

/// Errors after which a session can still be recovered by re-detection.
fn is_state_error(err: &ConsoleError) -> bool {
    matches!(
        err,
        ConsoleError::StateDetection { .. }
            | ConsoleError::NoPath { .. }
            | ConsoleError::DialogTimeout { .. }
            | ConsoleError::UnknownState(_)
            | ConsoleError::CommandNotAccepted { .. }
    )
}

/// Joins URL or path segments with single slashes, keeping the leading
/// slash of the first one and skipping empty segments.
pub(crate) fn join_segments(parts: &[&str]) -> String {
    let mut joined = String::new();
    for part in parts {
        let part = if joined.is_empty() {
            part.trim_end_matches('/')
        } else {
            part.trim_matches('/')
        };
        if part.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push('/');
        }
        joined.push_str(part);
    }
    joined
}

/// Fills the server, image paths and version of `opts` from the build's
/// installation files.
pub async fn resolve_baseline<R: FileResolver>(
    resolver: &R,
    product: &str,
    site: &str,
    branch: &str,
    version: &str,
    mut opts: BaselineOptions,
) -> Result<BaselineOptions, ConsoleError> {
    let files = resolver
        .resolve_files(site, product, branch, version)
        .await?;

    let rommon_file = files.require(&format!("{ROMMON_IMAGE_PREFIX}* image"), |name| {
        name.starts_with(ROMMON_IMAGE_PREFIX)
    })?;
    let package = files.require("bundle package", |name| name != rommon_file)?;

    opts.rommon_file = join_segments(&[files.tftp_prefix.as_str(), rommon_file]);
    let server = format!("tftp://{}", files.server_ip);
    opts.fxos_url = join_segments(&[server.as_str(), files.tftp_prefix.as_str(), package]);
    if opts.ftd_version.is_empty() {
        opts.ftd_version = ftd_version_from(version).ok_or_else(|| {
            ConsoleError::InvalidConfig(format!("no FTD version in build version '{version}'"))
        })?;
    }
    opts.tftp_server = files.server_ip.clone();
    info!(
        "resolved {} {} {}: rommon {}, bundle {}",
        product, branch, version, opts.rommon_file, opts.fxos_url
    );
    Ok(opts)
}

/// A tracked session on a Firepower 2100 console or SSH vty.
pub struct KpLine<S: Stream> {
    line: Line<S>,
    patterns: Arc<KpPatterns>,
    metrics: Arc<dyn MetricsSink>,
    power_bar: PowerBar,
    power: Option<Arc<dyn PowerController>>,
    change_password_flag: bool,
}

impl<S: Stream> KpLine<S> {
    pub(crate) fn new(
        line: Line<S>,
        patterns: Arc<KpPatterns>,
        metrics: Arc<dyn MetricsSink>,
        power_bar: PowerBar,
        power: Option<Arc<dyn PowerController>>,
    ) -> Self {
        Self {
            line,
            patterns,
            metrics,
            power_bar,
            power,
            change_password_flag: false,
        }
    }

    pub fn line(&self) -> &Line<S> {
        &self.line
    }

    pub fn line_mut(&mut self) -> &mut Line<S> {
        &mut self.line
    }

    pub fn into_line(self) -> Line<S> {
        self.line
    }

    pub fn patterns(&self) -> &KpPatterns {
        &self.patterns
    }

    pub(crate) fn metrics(&self) -> &dyn MetricsSink {
        self.metrics.as_ref()
    }

    /// True for a console into the chassis, false for an SSH vty into the
    /// application.
    pub fn chassis_line(&self) -> bool {
        self.line.settings().chassis_line
    }

    /// Whether the first-login password change already happened on this
    /// line, so the configured login password is in effect.
    pub fn change_password_flag(&self) -> bool {
        self.change_password_flag
    }

    pub fn power_bar(&self) -> &PowerBar {
        &self.power_bar
    }

    pub fn current_state(&self) -> Option<&str> {
        self.line.current_state()
    }

    pub async fn go_to(&mut self, state: &str) -> Result<(), ConsoleError> {
        self.line.go_to(state).await
    }

    pub async fn execute(&mut self, command: &str) -> Result<String, ConsoleError> {
        self.line.execute(command).await
    }

    /// Runs a multi-line script with the line's default timeout.
    pub async fn execute_lines(&mut self, commands: &str) -> Result<String, ConsoleError> {
        let timeout = self.line.settings().default_timeout();
        self.line.execute_lines(commands, timeout).await
    }

    /// Like [`KpLine::execute_lines`] but fails on the first command the
    /// device rejects.
    pub async fn execute_lines_checked(&mut self, commands: &str) -> Result<String, ConsoleError> {
        let timeout = self.line.settings().default_timeout();
        let mut outputs = Vec::new();
        for command in commands.lines().map(str::trim).filter(|c| !c.is_empty()) {
            let output = self.line.execute_with_timeout(command, timeout).await?;
            if let Some(reason) = find_error(&output) {
                return Err(ConsoleError::CommandFailed {
                    command: command.to_string(),
                    output: reason.to_string(),
                });
            }
            outputs.push(output);
        }
        Ok(outputs.join("\n"))
    }

    /// Detects the state of a freshly attached line.
    ///
    /// With `recover_to_rommon`, a chassis line whose state cannot be
    /// detected waits for the boot countdown and drops into ROMMON; if that
    /// fails too the line stays usable in an unknown state so a power cycle
    /// can still be issued.
    pub(crate) async fn bring_up(&mut self, recover_to_rommon: bool) -> Result<(), ConsoleError> {
        if let Err(err) = self.line.go_to_any().await {
            if !(recover_to_rommon && self.chassis_line()) {
                return Err(err);
            }
            warn!("cannot detect device state: {}", err);
            info!("Try to drop device to rommon state.");
            match self.wait_for_rommon(ROMMON_WAIT).await {
                Ok(()) => info!("Device is in 'rommon' state."),
                Err(err) => {
                    info!("Failed to go to rommon. Unknown device state. ({})", err);
                    return Ok(());
                }
            }
        }

        if self.chassis_line() && self.current_state() != Some(ROMMON) {
            self.init_terminal(false).await?;
        }
        Ok(())
    }

    /// Walks to FXOS and sets up paging and width. A state machine failure
    /// is logged and leaves the terminal as it is.
    pub async fn init_terminal(&mut self, determine_state: bool) -> Result<(), ConsoleError> {
        let mut reached = Ok(());
        if determine_state {
            reached = self.line.go_to_any().await.map(|_| ());
        }
        if reached.is_ok() {
            reached = self.line.go_to(FXOS).await;
        }
        match reached {
            Ok(()) => {}
            Err(err) if is_state_error(&err) => {
                error!("Cannot initialize FXOS terminal: {}", err);
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        for command in KP_INIT_COMMANDS {
            self.line.execute_only(command).await?;
        }
        Ok(())
    }

    /// Leaves a chassis line in FXOS and closes the stream.
    pub async fn disconnect(&mut self) -> Result<(), ConsoleError> {
        if self.chassis_line() {
            self.line.go_to(FXOS).await?;
        }
        self.line.close("disconnect").await
    }

    pub fn set_power_bar(&mut self, power_bar: PowerBar) {
        self.power_bar = power_bar;
    }

    /// Cycles the device's outlets, replacing the stored power bar with
    /// `power_bar` when one is given.
    ///
    /// Returns `Ok(None)` without touching the device when no valid power
    /// bar or no power controller is configured.
    pub async fn power_cycle(
        &mut self,
        power_bar: Option<PowerBar>,
        wait_until_device_is_on: bool,
        timeout: Duration,
    ) -> Result<Option<bool>, ConsoleError> {
        if let Some(power_bar) = power_bar {
            if !power_bar.is_valid() {
                error!("Invalid power bar server/port");
                return Ok(None);
            }
            self.set_power_bar(power_bar);
        }
        if !self.power_bar.is_valid() {
            error!("Invalid power bar server/port");
            return Ok(None);
        }
        let Some(power) = self.power.clone() else {
            error!("no power controller configured for {}", self.patterns.hostname());
            return Ok(None);
        };

        info!(
            "power cycling {} via {} port {}",
            self.patterns.hostname(),
            self.power_bar.server,
            self.power_bar.port
        );
        let result = power.power_cycle(&self.power_bar).await?;
        self.line.invalidate_state();

        if wait_until_device_is_on {
            self.wait_until_device_on(timeout).await?;
        }
        Ok(Some(result))
    }

    /// Waits for the boot messages, lets FXOS settle, then re-initialises
    /// the terminal.
    pub async fn wait_until_device_on(&mut self, timeout: Duration) -> Result<(), ConsoleError> {
        let dialog = Dialog::default()
            .rule(Rule::expect(literal("vdc-online", "vdc 1 has come online")))
            .rule(Rule::expect(literal("drbg", "SW-DRBG health test passed")));
        self.line.run_dialog(&dialog, timeout).await?;

        // FXOS answers "Timed out communicating with DME" for a while after
        // the boot messages.
        tokio::time::sleep(DEVICE_SETTLE).await;
        self.init_terminal(true).await
    }

    pub async fn get_app_instance_list(&mut self) -> Result<Vec<AppInstance>, ConsoleError> {
        self.line.go_to(FXOS).await?;
        let output = self
            .execute_lines("top\nscope ssa\nshow app-instance detail")
            .await?;
        Ok(parse_app_instances(&output))
    }

    /// Polls until `scope ssa` is accepted.
    pub async fn wait_for_fxos_ready(
        &mut self,
        interval: Duration,
        timeout: Duration,
    ) -> Result<(), ConsoleError> {
        let target = self.patterns.hostname().to_string();
        let mut poller = Poller::new("FXOS ready", target, interval, timeout);
        loop {
            match self.execute_lines_checked("top\nscope ssa").await {
                Ok(_) => return Ok(()),
                Err(ConsoleError::StreamClosed) => return Err(ConsoleError::StreamClosed),
                Err(err) => debug!("FXOS not ready yet: {}", err),
            }
            poller.wait().await?;
        }
    }

    /// Polls until every application instance reports `Online`.
    pub async fn wait_for_app_instances_online(
        &mut self,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Vec<AppInstance>, ConsoleError> {
        let target = self.patterns.hostname().to_string();
        let mut poller = Poller::new("app instances online", target, interval, timeout);
        loop {
            let apps = self.get_app_instance_list().await?;
            let mut online = true;
            for app in &apps {
                let name = app.application_name.as_deref().unwrap_or("?");
                match app.operational_state.as_deref() {
                    None => {
                        return Err(ConsoleError::CommandFailed {
                            command: "show app-instance detail".to_string(),
                            output: format!("no operational state for app instance '{name}'"),
                        });
                    }
                    Some("Online") => info!("App {} comes online", name),
                    Some(state) => {
                        debug!("App {} is {}", name, state);
                        online = false;
                    }
                }
            }
            if online {
                return Ok(apps);
            }
            poller.wait().await?;
        }
    }

    /// FXOS readiness followed by application instances coming online,
    /// with the usual lab limits.
    pub async fn wait_for_device_ready(&mut self) -> Result<Vec<AppInstance>, ConsoleError> {
        self.wait_for_fxos_ready(POLL_INTERVAL, FXOS_READY_WAIT)
            .await?;
        self.wait_for_app_instances_online(APPS_ONLINE_INTERVAL, APPS_ONLINE_WAIT)
            .await
    }

    /// Packages already downloaded to the box.
    pub async fn get_packages(&mut self) -> Result<Vec<Package>, ConsoleError> {
        self.line.go_to(FXOS).await?;
        self.execute_lines("top\nscope firmware").await?;
        let output = self.line.execute("show package").await?;
        parse_packages(&output)
    }

    pub async fn get_download_status(
        &mut self,
        image_name: &str,
    ) -> Result<DownloadState, ConsoleError> {
        self.line.go_to(FXOS).await?;
        let command = format!("show download-task {image_name} detail | grep State");
        let output = self.line.execute(&command).await?;
        let status = DownloadState::parse(&output)
            .ok_or(ConsoleError::CommandFailed { command, output })?;
        info!("download status: {:?}", status);
        Ok(status)
    }

    /// Polls the download task of `file_url` until it ends.
    ///
    /// Returns [`DownloadState::Downloaded`] or [`DownloadState::Failed`];
    /// still downloading after `wait_upto` is a provisioning timeout.
    pub async fn wait_till_download_complete(
        &mut self,
        file_url: &str,
        wait_upto: Duration,
    ) -> Result<DownloadState, ConsoleError> {
        self.line.go_to(FXOS).await?;
        let image_name = image_name_from_url(file_url)?;
        let mut poller = Poller::new("firmware download", &image_name, POLL_INTERVAL, wait_upto);
        loop {
            poller.wait().await?;
            match self.get_download_status(&image_name).await? {
                DownloadState::Downloaded => {
                    info!("download completed for {}", image_name);
                    return Ok(DownloadState::Downloaded);
                }
                DownloadState::Failed => return Ok(DownloadState::Failed),
                other => debug!("{} still {:?}", image_name, other),
            }
        }
    }

    /// Downloads the FXOS + FTD bundle unless it is already installed or
    /// already on the box.
    pub async fn download_ftd_fp2k(
        &mut self,
        fxos_url: &str,
        ftd_version: &str,
        file_server_password: &str,
    ) -> Result<(), ConsoleError> {
        let bundle = fxos_url
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        self.line.go_to(FXOS).await?;

        if self.is_firmware_fp2k_ready(ftd_version).await? {
            info!("fxos fp2k bundle package {} has been installed, nothing to do", bundle);
            return Ok(());
        }

        let packages = self.get_packages().await?;
        if packages.iter().any(|package| package.name == bundle) {
            info!("Target package {} already downloaded", bundle);
            return Ok(());
        }

        let dialog = Dialog::default()
            .rule(step(
                Pattern::new("host-key", r"continue connecting \(yes/no")?,
                Action::sendline("yes"),
            ))
            .rule(step(
                self.patterns.password.clone(),
                Action::sendline(file_server_password),
            ))
            .rule(Rule::expect(self.patterns.fxos.clone()));

        let mut budget = RetryPolicy::new(MAX_RETRY_COUNT, DOWNLOAD_RETRY_PAUSE)
            .budget("firmware download", &bundle);
        loop {
            self.execute_lines("top\nscope firmware").await?;
            self.line
                .sendline(&format!("download image {fxos_url}"))
                .await?;
            self.line.run_dialog(&dialog, DEFAULT_TIMEOUT).await?;

            match self
                .wait_till_download_complete(fxos_url, DOWNLOAD_WAIT)
                .await?
            {
                DownloadState::Downloaded => return Ok(()),
                status => {
                    warn!("download of {} ended as {:?}", bundle, status);
                    self.line.sendline(CTRL_C).await?;
                    budget
                        .failed(&format!("download of {fxos_url} ended as {status:?}"))
                        .await?;
                }
            }
        }
    }

    /// Whether FXOS reports `version` as its firmware package version.
    pub async fn is_firmware_fp2k_ready(&mut self, version: &str) -> Result<bool, ConsoleError> {
        self.line.go_to(FXOS).await?;
        let output = self
            .execute_lines("top\nscope system\nshow firmware package-version | grep Package-Vers")
            .await?;
        match parse_package_version(&output) {
            Some(installed) => {
                debug!("firmware package version {}", installed);
                Ok(installed == version)
            }
            None => Ok(false),
        }
    }

    /// Formats the disk from local-mgmt and catches the reboot in ROMMON.
    pub async fn format_goto_rommon(&mut self, timeout: Duration) -> Result<(), ConsoleError> {
        self.line.go_to(LOCAL_MGMT).await?;
        self.line.sendline("format everything").await?;
        let dialog = Dialog::default().rule(Rule::new(
            literal("format-confirm", "Do you still want to format"),
            Action::sendline("yes"),
        ));
        self.line
            .run_dialog(&dialog, Duration::from_secs(30))
            .await?;
        self.line.invalidate_state();
        self.wait_for_rommon(timeout).await
    }

    /// Power cycles without waiting for FXOS and stops the boot in ROMMON.
    pub async fn power_cycle_goto_rommon(
        &mut self,
        timeout: Duration,
        power_bar: Option<PowerBar>,
    ) -> Result<(), ConsoleError> {
        if self.current_state() == Some(ROMMON) {
            return Ok(());
        }

        match self.power_cycle(power_bar, false, timeout).await? {
            None => {
                return Err(ConsoleError::PowerCycle(format!(
                    "cannot power cycle {}: no valid power bar or controller",
                    self.patterns.hostname()
                )));
            }
            Some(false) => warn!("power controller reported a failed power cycle"),
            Some(true) => {}
        }
        self.wait_for_rommon(timeout).await
    }

    /// Interrupts the boot countdown and waits for the ROMMON prompt.
    pub async fn wait_for_rommon(&mut self, timeout: Duration) -> Result<(), ConsoleError> {
        let dialog = Dialog::default()
            .rule(
                Rule::new(
                    literal("boot-countdown", "Boot in 10 seconds."),
                    Action::sendline(ESC),
                )
                .and_continue(),
            )
            .rule(Rule::expect(self.patterns.rommon.clone()));
        self.line.run_dialog(&dialog, timeout).await?;
        self.line.update_state(ROMMON)
    }

    /// From ROMMON: factory reset, boot, take the first-login password
    /// change, then format everything and land in ROMMON again.
    ///
    /// Stops early, still in ROMMON, when there is nothing to boot.
    pub async fn rommon_factory_reset_and_format(
        &mut self,
        boot_timeout: Duration,
        format_timeout: Duration,
    ) -> Result<(), ConsoleError> {
        if self.current_state() != Some(ROMMON) {
            self.line.go_to_any().await?;
            self.power_cycle_goto_rommon(format_timeout, None).await?;
        }

        info!("=== Issuing factory-reset from rommon");
        self.line.sendline("set").await?;
        let reset = Dialog::default()
            .rule(step(
                Pattern::new("rommon", r"rommon.*> ")?,
                Action::sendline("factory-reset"),
            ))
            .rule(Rule::new(
                Pattern::new("confirm", r" yes/no .*:")?,
                Action::sendline("yes"),
            ));
        self.line.run_dialog(&reset, Duration::from_secs(30)).await?;
        self.line.invalidate_state();

        self.line.sendline("boot").await?;
        let boot = Dialog::default()
            .rule(step(self.patterns.prelogin.clone(), Action::sendline("admin")))
            .rule(Rule::new(
                password_prompt(),
                Action::sendline(&self.patterns.default_password),
            ))
            .rule(Rule::expect(literal(
                "no-boot-file",
                "boot: cannot determine first file name on device",
            )));
        let m = self.line.run_dialog(&boot, boot_timeout).await?;
        if m.pattern == "no-boot-file" {
            info!("Boot disk not found. Still in rommon mode");
            return self.line.update_state(ROMMON);
        }

        self.change_password().await?;
        self.init_terminal(true).await?;

        info!("=== Issuing format everything");
        self.format_goto_rommon(format_timeout).await
    }

    /// Sets the ROMMON network parameters and waits until the TFTP server
    /// answers pings.
    pub async fn rommon_configure(
        &mut self,
        tftp_server: &str,
        rommon_file: &str,
        uut_ip: &str,
        uut_netmask: &str,
        uut_gateway: &str,
    ) -> Result<(), ConsoleError> {
        info!("add rommon config");
        let prompt = literal("rommon", "rommon");
        let steps = [
            format!("address {uut_ip}"),
            format!("netmask {uut_netmask}"),
            format!("gateway {uut_gateway}"),
            format!("server {tftp_server}"),
            format!("image {rommon_file}"),
            "sync".to_string(),
        ]
        .into_iter()
        .map(|command| ExpectSend::new(prompt.clone(), command))
        .collect::<Vec<_>>();
        self.line
            .expect_and_sendline(&steps, Duration::from_secs(10))
            .await?;

        let success = literal("ping-ok", "Success rate is 100 percent");
        let mut budget =
            RetryPolicy::new(20, Duration::from_secs(60)).budget("rommon ping", tftp_server);
        loop {
            self.line.sendline(&format!("ping {tftp_server}")).await?;
            let outcome = self
                .line
                .expect_any(std::slice::from_ref(&success), Duration::from_secs(5))
                .await?;
            if outcome.is_matched() {
                return Ok(());
            }
            budget.failed("ping did not reach 100 percent").await?;
        }
    }

    /// Starts `tftpdnld` and logs in once the downloaded image booted. The
    /// download is restarted whenever ROMMON comes back.
    pub async fn rommon_tftp_download(
        &mut self,
        tftp_server: &str,
        rommon_file: &str,
        username: &str,
        timeout: Duration,
    ) -> Result<(), ConsoleError> {
        info!(
            "=== Wait for installation to complete, timeout = {} seconds ...",
            timeout.as_secs()
        );
        let dialog = Dialog::default()
            .rule(step(
                Pattern::new("rommon", r"rommon.*> ")?,
                Action::sendline("tftpdnld"),
            ))
            .rule(step(self.patterns.prelogin.clone(), Action::sendline(username)))
            .rule(Rule::new(
                password_prompt(),
                Action::sendline(&self.patterns.default_password),
            ));

        self.line.console_mut().discard().await?;
        self.line.sendline("").await?;
        if let Err(err) = self.line.run_dialog(&dialog, timeout).await {
            info!("=== Rommon file download failed");
            return Err(ConsoleError::CommandFailed {
                command: "tftpdnld".to_string(),
                output: format!(
                    "download failed, tftp_server: {tftp_server}, image file: {rommon_file}: {err}"
                ),
            });
        }
        info!("=== Rommon file was installed successfully.");
        self.line.invalidate_state();

        self.change_password().await?;
        self.line.sendline("").await
    }

    /// Reimages from ROMMON over TFTP and waits for FXOS.
    #[allow(clippy::too_many_arguments)]
    pub async fn install_rommon_build_fp2k(
        &mut self,
        tftp_server: &str,
        rommon_file: &str,
        uut_ip: &str,
        uut_netmask: &str,
        uut_gateway: &str,
        username: &str,
        format_timeout: Duration,
    ) -> Result<(), ConsoleError> {
        info!(
            "====== format disk, download and install integrated fxos build {} from server {} ...",
            rommon_file, tftp_server
        );

        info!("=== Drop device into rommon mode");
        if self.current_state() != Some(ROMMON) {
            self.format_goto_rommon(format_timeout).await?;
        } else {
            self.rommon_factory_reset_and_format(ROMMON_WAIT, format_timeout)
                .await?;
        }

        info!("=== Configure management network interface");
        self.rommon_configure(tftp_server, rommon_file, uut_ip, uut_netmask, uut_gateway)
            .await?;

        info!("=== Tftp download and install integrated fxos build");
        self.rommon_tftp_download(tftp_server, rommon_file, username, Duration::from_secs(600))
            .await?;

        tokio::time::sleep(ROMMON_INSTALL_SETTLE).await;
        self.init_terminal(true).await?;
        info!("=== Rommon build installed.");
        Ok(())
    }

    fn install_dialog(&self, ftd_version: &str) -> Result<Dialog, ConsoleError> {
        Ok(Dialog::default()
            .rule(Rule::expect(literal("invalid-version", "Invalid Software Version")))
            .rule(step(literal("proceed", "Do you want to proceed"), Action::sendline("yes")))
            .rule(step(
                literal(
                    "triggered",
                    &format!("Triggered the install of software package version {ftd_version}"),
                ),
                Action::None,
            ))
            .rule(step(
                Pattern::new("stopping", r"Stopping Cisco Firepower 21[1-4]0 Threat Defense")?,
                Action::None,
            ))
            .rule(progress("rebooting", "Rebooting..."))
            .rule(progress("install-begins", "Cisco FTD begins installation ..."))
            .rule(progress("install-done", "Cisco FTD installation finished successfully."))
            .rule(progress("init-done", "Cisco FTD initialization finished successfully."))
            .rule(progress("post", "INFO: Power-On Self-Test complete."))
            .rule(progress("drbg", "INFO: SW-DRBG health test passed."))
            .rule(Rule::expect(literal("failed-logins", "Failed logins since the last login:")))
            .rule(step(self.patterns.rommon.clone(), Action::sendline("boot"))))
    }

    fn network_dialog(&self, opts: &BaselineOptions) -> Dialog {
        let ipv6_answer = if opts.ipv6.is_some() { "y" } else { "n" };
        let mut dialog = Dialog::default()
            .rule(step(literal("ipv4", "Do you want to configure IPv4"), Action::sendline("y")))
            .rule(step(
                literal("ipv6", "Do you want to configure IPv6"),
                Action::sendline(ipv6_answer),
            ))
            .rule(step(
                literal("ipv4-mode", "Configure IPv4 via DHCP or manually"),
                Action::sendline("manual"),
            ))
            .rule(step(
                literal("ipv4-address", "Enter an IPv4 address for the management interface"),
                Action::sendline(&opts.uut_ip),
            ))
            .rule(step(
                literal("ipv4-netmask", "Enter an IPv4 netmask for the management interface"),
                Action::sendline(&opts.uut_netmask),
            ))
            .rule(step(
                literal(
                    "ipv4-gateway",
                    "Enter the IPv4 default gateway for the management interface",
                ),
                Action::sendline(&opts.uut_gateway),
            ));
        if let Some(ipv6) = &opts.ipv6 {
            dialog = dialog
                .rule(step(
                    literal("ipv6-mode", "Configure IPv6 via DHCP, router, or manually"),
                    Action::sendline("manual"),
                ))
                .rule(step(
                    literal("ipv6-address", "Enter the IPv6 address for the management interface"),
                    Action::sendline(&ipv6.address),
                ))
                .rule(step(
                    literal(
                        "ipv6-prefix",
                        "Enter the IPv6 address prefix for the management interface",
                    ),
                    Action::sendline(&ipv6.prefix),
                ))
                .rule(step(
                    literal("ipv6-gateway", "Enter the IPv6 gateway for the management interface"),
                    Action::sendline(&ipv6.gateway),
                ));
        }
        dialog
            .rule(step(
                literal("hostname", "Enter a fully qualified hostname for this system "),
                Action::sendline(&opts.uut_hostname),
            ))
            .rule(step(
                literal("dns", "Enter a comma-separated list of DNS servers or"),
                Action::sendline(&opts.dns_servers),
            ))
            .rule(Rule::new(
                literal("search-domains", "Enter a comma-separated list of search domains or"),
                Action::sendline(&opts.search_domains),
            ))
    }

    /// Installs the downloaded security pack and answers the first-boot
    /// questions of the new FTD.
    pub async fn upgrade_bundle_package_fp2k(
        &mut self,
        opts: &BaselineOptions,
    ) -> Result<(), ConsoleError> {
        let version = ftd_version_from(&opts.ftd_version).ok_or_else(|| {
            ConsoleError::InvalidConfig(format!("malformed FTD version '{}'", opts.ftd_version))
        })?;

        self.line.go_to(FXOS).await?;
        self.execute_lines("top\nscope firmware\nscope auto-install")
            .await?;
        info!("====== Install security package {} ...", opts.bundle_package());
        let install = format!("install security-pack version {version}");
        self.line.sendline(&install).await?;

        let install_dialog = self.install_dialog(&opts.ftd_version)?;
        let m = self
            .line
            .run_dialog(&install_dialog, opts.install_timeout())
            .await?;
        self.line.invalidate_state();
        if m.pattern == "invalid-version" {
            error!("Invalid Software Version, please check your installation package");
            return Err(ConsoleError::CommandFailed {
                command: install,
                output: "Invalid Software Version, please check your installation package"
                    .to_string(),
            });
        }

        let fxos_login_password = if self.change_password_flag {
            self.patterns.login_password.clone()
        } else {
            self.patterns.default_password.clone()
        };
        self.line.sendline("").await?;
        let login = Dialog::default()
            .rule(step(self.patterns.prelogin.clone(), Action::sendline("admin")))
            .rule(step(password_prompt(), Action::sendline(fxos_login_password)))
            .rule(step(
                Pattern::new("fxos-default", r"firepower.*#")?,
                Action::sendline("connect ftd"),
            ))
            .rule(Rule::new(
                literal("eula-display", "Press <ENTER> to display the EULA: "),
                Action::sendline(""),
            ));
        self.run_phase(&login, 180).await?;

        let eula_agree = "Please enter 'YES' or press <ENTER> to AGREE to the EULA: ";
        let eula = Dialog::default()
            .rule(Rule::new(literal("more", "--More--"), Action::send("q")))
            .rule(Rule::new(literal("eula-agree", eula_agree), Action::sendline("")));
        self.run_phase(&eula, 180).await?;

        let password = Dialog::default()
            .rule(step(literal("eula-agree", eula_agree), Action::sendline("YES")))
            .rule(step(
                literal("new-password", "Enter new password:"),
                Action::sendline(&opts.uut_password),
            ))
            .rule(step(
                literal("confirm-password", "Confirm new password:"),
                Action::sendline(&opts.uut_password),
            ))
            .rule(Rule::expect(literal(
                "network-required",
                "You must configure the network to continue.",
            )));
        self.run_phase(&password, 360).await?;

        let network = self.network_dialog(opts);
        self.run_phase(&network, 600).await?;

        let manage_locally = match opts.mode {
            ManagerMode::Local => "yes",
            ManagerMode::Remote => "no",
        };
        let firstboot = Dialog::default()
            .rule(step(
                Pattern::new("firewall-mode", r"Configure (firewall|deployment) mode")?,
                Action::sendline(opts.firewall_mode.to_string()),
            ))
            .rule(step(
                literal("manage-locally", "Manage the device locally?"),
                Action::sendline(manage_locally),
            ))
            .rule(step(
                literal(
                    "firstboot-done",
                    "Successfully performed firstboot initial configuration steps",
                ),
                Action::sendline(""),
            ))
            .rule(Rule::new(self.patterns.fireos.clone(), Action::sendline("")));
        self.run_phase(&firstboot, 900).await?;

        info!("fully installed.");
        Ok(())
    }

    async fn run_phase(&mut self, dialog: &Dialog, secs: u64) -> Result<DialogMatch, ConsoleError> {
        self.line
            .run_dialog(dialog, Duration::from_secs(secs))
            .await
    }

    /// Registers the application with a management center.
    pub async fn configure_manager(
        &mut self,
        manager: &ManagerRegistration,
    ) -> Result<(), ConsoleError> {
        let command = match &manager.nat_id {
            Some(nat_id) => format!(
                "configure manager add {} {} {}",
                manager.host, manager.key, nat_id
            ),
            None => format!("configure manager add {} {}", manager.host, manager.key),
        };
        let response = self
            .line
            .execute_with_timeout(&command, Duration::from_secs(120))
            .await?;
        if !response.contains("Manager successfully configured") {
            error!("failed to configure the manager");
            return Err(ConsoleError::CommandFailed {
                command,
                output: response,
            });
        }
        Ok(())
    }

    /// Compares `show version` with `ftd_version` and returns to FXOS.
    pub async fn validate_version(&mut self, ftd_version: &str) -> Result<(), ConsoleError> {
        let timeout = Duration::from_secs(30);
        let mut response = self
            .line
            .execute_with_timeout("show version", timeout)
            .await?;
        if response.trim().is_empty() {
            response = self
                .line
                .execute_with_timeout("show version", timeout)
                .await?;
        }

        let observed = FtdVersion::parse(&response).ok_or_else(|| ConsoleError::VersionMismatch {
            expected: ftd_version.to_string(),
            observed: response.trim().to_string(),
        })?;
        if !observed.matches(ftd_version) {
            error!("show version reports {}, expected {}", observed, ftd_version);
            return Err(ConsoleError::VersionMismatch {
                expected: ftd_version.to_string(),
                observed: observed.to_string(),
            });
        }
        info!("Installed ftd version {} validated", observed);

        self.line.go_to(FXOS).await
    }

    /// Downloads and installs the bundle unless FXOS already runs it or
    /// already lists it among its packages. Returns whether anything was
    /// installed.
    pub async fn ensure_ftd_installed(
        &mut self,
        opts: &BaselineOptions,
    ) -> Result<bool, ConsoleError> {
        self.line.go_to(FXOS).await?;
        if self.bundle_in_place(opts).await? {
            return Ok(false);
        }
        self.download_ftd_fp2k(&opts.fxos_url, &opts.ftd_version, &opts.file_server_password)
            .await?;
        self.upgrade_bundle_package_fp2k(opts).await?;
        Ok(true)
    }

    /// Whether FXOS runs `opts.ftd_version` or has the bundle package.
    async fn bundle_in_place(&mut self, opts: &BaselineOptions) -> Result<bool, ConsoleError> {
        if self.is_firmware_fp2k_ready(&opts.ftd_version).await? {
            info!("{} already installed", opts.ftd_version);
            return Ok(true);
        }
        let bundle = opts.bundle_package();
        let packages = self.get_packages().await?;
        if packages.iter().any(|package| package.name == bundle) {
            info!("Target package {} already on the box, skipping download and install", bundle);
            return Ok(true);
        }
        Ok(false)
    }

    /// Walks to FXOS from wherever the line is and checks the bundle there.
    /// A line that cannot reach FXOS, such as one sitting in ROMMON, is not
    /// at target.
    async fn already_at_target(&mut self, opts: &BaselineOptions) -> Result<bool, ConsoleError> {
        if let Err(err) = self.line.go_to(FXOS).await {
            if is_state_error(&err) {
                debug!("FXOS not reachable before baseline: {}", err);
                return Ok(false);
            }
            return Err(err);
        }
        self.bundle_in_place(opts).await
    }

    fn out_of_band_script(opts: &BaselineOptions) -> String {
        format!(
            "top
            scope system
                scope services
                    disable dhcp-server
                    create dns {dns}
                    set domain-name {domain}
                    show dns
                    show domain-name
            scope fabric a
                show detail
                set out-of-band static ip {ip} netmask {netmask} gw {gateway}
                commit-buffer
                show detail
                top
            scope system
                scope services
                    show dns
                    show domain-name
                    top",
            dns = opts.dns_server(),
            domain = opts.domain(),
            ip = opts.uut_ip,
            netmask = opts.uut_netmask,
            gateway = opts.uut_gateway,
        )
    }

    async fn reimage_and_install(&mut self, opts: &BaselineOptions) -> Result<(), ConsoleError> {
        info!("=== Drop fp2k to rommon mode");
        info!("=== Download rommon build and Install the build");
        self.install_rommon_build_fp2k(
            &opts.tftp_server,
            &opts.rommon_file,
            &opts.uut_ip,
            &opts.uut_netmask,
            &opts.uut_gateway,
            &opts.uut_username,
            opts.reboot_timeout(),
        )
        .await?;

        info!("=== Set out of band ip, dns and domain");
        self.execute_lines(&Self::out_of_band_script(opts)).await?;

        let protocol = opts.fxos_url.split(':').next().unwrap_or_default();
        info!("=== Download and upgrade fxos package over {}", protocol);
        self.ensure_ftd_installed(opts).await?;
        Ok(())
    }

    /// Brings the device from any state to `opts.ftd_version` with the
    /// initial configuration applied, then validates the version.
    ///
    /// Without a power cycle, a device that reaches FXOS and already runs
    /// the target version, or already has its bundle package, skips the
    /// reimage, download, install and manager steps.
    pub async fn baseline_fp2k_ftd(&mut self, opts: &BaselineOptions) -> Result<(), ConsoleError> {
        opts.validate()?;
        self.metrics.increment("device.kp.baseline", 1);

        info!("=== power_cycle_flag={}", opts.power_cycle_flag);
        let installed = if opts.power_cycle_flag {
            self.power_cycle_goto_rommon(opts.reboot_timeout(), None)
                .await?;
            self.rommon_factory_reset_and_format(opts.reboot_timeout(), opts.reboot_timeout())
                .await?;
            self.reimage_and_install(opts).await?;
            true
        } else if self.already_at_target(opts).await? {
            info!(
                "=== {} already at target {}, skipping reimage, download and install",
                self.patterns.hostname(),
                opts.ftd_version
            );
            false
        } else {
            self.reimage_and_install(opts).await?;
            true
        };

        self.line.go_to_any().await?;
        self.line.go_to(FIREOS).await?;

        if installed
            && opts.mode == ManagerMode::Remote
            && let Some(manager) = &opts.manager
        {
            info!("=== Configure manager ...");
            self.configure_manager(manager).await?;
        }

        info!("=== Validate installed version ...");
        self.validate_version(&opts.ftd_version).await?;
        info!("Installation completed successfully.");
        Ok(())
    }

    /// Looks the build up on the file servers, then runs
    /// [`KpLine::baseline_fp2k_ftd`].
    pub async fn baseline_by_branch_and_version<R: FileResolver>(
        &mut self,
        resolver: &R,
        site: &str,
        branch: &str,
        version: &str,
        opts: BaselineOptions,
    ) -> Result<(), ConsoleError> {
        let opts = resolve_baseline(resolver, "Kp", site, branch, version, opts).await?;
        self.baseline_fp2k_ftd(&opts).await
    }

    /// Handles the password change enforced at first login. Sets
    /// [`KpLine::change_password_flag`] when the password was updated.
    pub async fn change_password(&mut self) -> Result<bool, ConsoleError> {
        let p = Arc::clone(&self.patterns);
        let dialog = Dialog::default()
            .rule(progress("change-required", "You are required to change your password"))
            .rule(step(
                literal("coming-up", "System is coming up"),
                Action::sleep(Duration::from_secs(60)),
            ))
            .rule(step(p.prelogin.clone(), Action::sendline(&p.login_username)))
            .rule(step(password_prompt(), Action::sendline(&p.default_password)))
            .rule(step(
                literal("old-password", "Enter old password:"),
                Action::sendline(&p.default_password),
            ))
            .rule(step(
                literal("new-password", "Enter new password:"),
                Action::sendline(&p.login_password),
            ))
            .rule(step(
                literal("confirm-password", "Confirm new password:"),
                Action::sendline(&p.login_password),
            ))
            .rule(Rule::expect(Pattern::new(
                "password-updated",
                r"Your password (was|has been) updated successfully",
            )?))
            .rule(Rule::expect(p.fxos.clone()));

        let m = self.line.run_dialog(&dialog, PASSWORD_CHANGE_WAIT).await?;
        if m.pattern == "password-updated" {
            self.change_password_flag = true;
            info!("Password has been changed successfully");
        } else {
            info!("Changing password was not required...");
        }
        Ok(self.change_password_flag)
    }

    /// Greps `files` for each of `search_strings` as root and returns to
    /// FXOS, or to FTD on an SSH vty.
    ///
    /// Empty `files` or `search_strings` fall back to [`DEFAULT_LOG_FILES`]
    /// and [`DEFAULT_LOG_SEARCH`].
    pub async fn get_logs(
        &mut self,
        files: &[&str],
        search_strings: &[&str],
        exclude_strings: &[&str],
    ) -> Result<String, ConsoleError> {
        let files = if files.is_empty() { DEFAULT_LOG_FILES } else { files };
        let search_strings = if search_strings.is_empty() {
            DEFAULT_LOG_SEARCH
        } else {
            search_strings
        };
        self.line
            .go_to_with_timeout(SUDO, Duration::from_secs(30))
            .await?;

        let exclude = exclude_strings
            .iter()
            .map(|s| format!("| grep -v {s}"))
            .collect::<String>();
        let commands = files
            .iter()
            .flat_map(|file| {
                let exclude = &exclude;
                search_strings
                    .iter()
                    .map(move |s| format!("grep -Ii {s} {file} | sort -u {exclude}"))
            })
            .collect::<Vec<_>>();
        let output = self.execute_lines(&commands.join("\n")).await?;

        let home = if self.chassis_line() { FXOS } else { FIREOS };
        self.line.go_to(home).await?;
        Ok(output)
    }

    /// [`KpLine::get_logs`] with the result written to the log.
    pub async fn log_checks(
        &mut self,
        files: &[&str],
        search_strings: &[&str],
        exclude_strings: &[&str],
    ) -> Result<String, ConsoleError> {
        let output = self.get_logs(files, search_strings, exclude_strings).await?;
        info!("Logs for the requested files in the FTD are:\n{}", output);
        Ok(output)
    }
}
