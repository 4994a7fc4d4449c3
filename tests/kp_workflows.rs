use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rkick::config::{DeviceIdentity, LineSettings, PowerBar};
use rkick::external::{
    FileResolver, InstallationFiles, LogMetrics, MetricsSink, PowerController, PowerCycleFuture,
};
use rkick::products::kp::parse::DownloadState;
use rkick::products::kp::topology::{FIREOS, FXOS, ROMMON};
use rkick::products::kp::{BaselineOptions, Kp, KpLine, resolve_baseline};
use rkick::products::wm::Wm;
use rkick::stream::{ScriptedStream, SentLog};
use rkick::{ConsoleError, error::Exhausted};
use tokio::time::Instant;

const PROMPT: &str = "\r\nkp-2110# ";
const FIRMWARE_PROMPT: &str = "\r\nkp-2110 /firmware # ";
const BUNDLE: &str = "cisco-ftd-fp2k.6.2.1-1088.SSA";
const BUNDLE_URL: &str = "tftp://10.89.23.80/netboot/cisco-ftd-fp2k.6.2.1-1088.SSA";
const DOWNLOAD_STATE: &str =
    "show download-task cisco-ftd-fp2k.6.2.1-1088.SSA detail | grep State";
const PACKAGE_VERSION: &str = "show firmware package-version | grep Package-Vers";

#[derive(Default)]
struct CountingMetrics {
    names: Mutex<Vec<String>>,
}

impl CountingMetrics {
    fn names(&self) -> Vec<String> {
        self.names.lock().expect("metrics lock").clone()
    }
}

impl MetricsSink for CountingMetrics {
    fn increment(&self, name: &str, _value: u64) {
        self.names
            .lock()
            .expect("metrics lock")
            .push(name.to_string());
    }
}

#[derive(Default)]
struct RecordingPdu {
    cycled: Mutex<Vec<PowerBar>>,
}

impl PowerController for RecordingPdu {
    fn power_cycle<'a>(&'a self, power_bar: &'a PowerBar) -> PowerCycleFuture<'a> {
        Box::pin(async move {
            self.cycled
                .lock()
                .expect("pdu lock")
                .push(power_bar.clone());
            Ok(true)
        })
    }
}

struct StaticFiles(InstallationFiles);

impl FileResolver for StaticFiles {
    fn resolve_files(
        &self,
        _site: &str,
        _product: &str,
        _branch: &str,
        _version: &str,
    ) -> impl Future<Output = Result<InstallationFiles, ConsoleError>> + Send {
        let files = self.0.clone();
        async move { Ok(files) }
    }
}

fn kp() -> Kp {
    Kp::new(DeviceIdentity::new("kp-2110"), Arc::new(LogMetrics)).expect("kp")
}

/// An appliance sitting at the FXOS prompt that accepts terminal setup.
fn fxos_device() -> ScriptedStream {
    ScriptedStream::new()
        .always("", PROMPT)
        .always("top", PROMPT)
        .always("terminal length 0", PROMPT)
        .always("terminal width 511", PROMPT)
        .always("scope firmware", FIRMWARE_PROMPT)
        .always("scope system", "\r\nkp-2110 /system # ")
}

/// Adds the firmware queries a download starts with: installed version
/// 6.2.1-1052 and `packages` already on the box.
fn with_firmware(device: ScriptedStream, packages: &str) -> ScriptedStream {
    device
        .always(
            PACKAGE_VERSION,
            "\r\n    Package-Vers: 6.2.1-1052\r\nkp-2110 /system # ",
        )
        .always(
            "show package",
            &format!(
                "Name                                          Package-Vers\r\n\
                 --------------------------------------------- ------------\r\n\
                 {packages}\r\nkp-2110 /firmware # "
            ),
        )
}

async fn attach(kp: &Kp, stream: ScriptedStream) -> KpLine<ScriptedStream> {
    kp.attach(stream, LineSettings::default())
        .await
        .expect("attach")
}

fn baseline_options() -> BaselineOptions {
    BaselineOptions {
        tftp_server: "10.89.23.80".to_string(),
        rommon_file: "netboot/fxos-k8-fp2k-lfbff.82.2.1.386i.SSA".to_string(),
        uut_ip: "10.0.0.5".to_string(),
        uut_netmask: "255.255.255.0".to_string(),
        uut_gateway: "10.0.0.1".to_string(),
        dns_servers: "10.0.0.2".to_string(),
        fxos_url: BUNDLE_URL.to_string(),
        ftd_version: "6.2.1-1088".to_string(),
        ..BaselineOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn failed_download_is_retried_three_times_then_gives_up() {
    let device = with_firmware(fxos_device(), "cisco-ftd-fp2k.6.2.1-1052.SSA 6.2.1-1052")
        .always(&format!("download image {BUNDLE_URL}"), FIRMWARE_PROMPT)
        .always(DOWNLOAD_STATE, "\r\n    State: Failed\r\nkp-2110 /firmware # ");
    let log = device.sent_log();
    let mut line = attach(&kp(), device).await;

    let start = Instant::now();
    let err = line
        .download_ftd_fp2k(BUNDLE_URL, "6.2.1-1088", "pxe")
        .await
        .expect_err("every attempt fails");

    assert!(matches!(
        err,
        ConsoleError::ProvisioningTimeout {
            exhausted: Exhausted::Attempts(3),
            ..
        }
    ));
    assert_eq!(log.count(&format!("download image {BUNDLE_URL}")), 3);
    assert_eq!(log.count("\u{3}"), 3);
    // One 10s status poll per attempt and a 300s pause between attempts.
    assert_eq!(start.elapsed(), Duration::from_secs(3 * 10 + 2 * 300));
}

#[tokio::test(start_paused = true)]
async fn download_completion_is_seen_on_the_fourth_poll() {
    let device = fxos_device()
        .on(DOWNLOAD_STATE, "\r\n    State: Downloading\r\nkp-2110# ")
        .on(DOWNLOAD_STATE, "\r\n    State: Downloading\r\nkp-2110# ")
        .on(DOWNLOAD_STATE, "\r\n    State: Downloading\r\nkp-2110# ")
        .always(DOWNLOAD_STATE, "\r\n    State: Downloaded\r\nkp-2110# ");
    let log = device.sent_log();
    let mut line = attach(&kp(), device).await;

    let start = Instant::now();
    let status = line
        .wait_till_download_complete(BUNDLE_URL, Duration::from_secs(1800))
        .await
        .expect("download completes");

    assert_eq!(status, DownloadState::Downloaded);
    assert_eq!(log.count(DOWNLOAD_STATE), 4);
    assert_eq!(start.elapsed(), Duration::from_secs(40));
}

#[tokio::test(start_paused = true)]
async fn download_never_finishing_is_a_provisioning_timeout() {
    let device =
        fxos_device().always(DOWNLOAD_STATE, "\r\n    State: Downloading\r\nkp-2110# ");
    let mut line = attach(&kp(), device).await;

    let err = line
        .wait_till_download_complete(BUNDLE_URL, Duration::from_secs(35))
        .await
        .expect_err("still downloading");
    assert!(matches!(
        err,
        ConsoleError::ProvisioningTimeout {
            exhausted: Exhausted::Elapsed(_),
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn bundle_already_on_the_box_is_not_downloaded_again() {
    let device = with_firmware(fxos_device(), &format!("{BUNDLE}                 6.2.1-1088"));
    let log = device.sent_log();
    let mut line = attach(&kp(), device).await;

    line.download_ftd_fp2k(BUNDLE_URL, "6.2.1-1088", "pxe")
        .await
        .expect("nothing to do");

    assert!(log.contains("show package"));
    assert!(!log.lines().iter().any(|l| l.starts_with("download image")));
}

/// Lets the line move between FXOS and FTD, where `show version`
/// reports 6.2.1 build 1088.
fn with_ftd(device: ScriptedStream) -> ScriptedStream {
    device
        .always("connect ftd", "\r\n> ")
        .always(
            "show version",
            "-------------------[ firepower ]--------------------\r\n\
             Model                     : Cisco Firepower 2110 Threat Defense (77) Version 6.2.1 (Build 1088)\r\n\
             UUID                      : 4bd9a2a8-0b8a-11e7-9fc1-c1b84a6a7ebe\r\n\r\n> ",
        )
        .always("connect fxos", PROMPT)
}

/// FXOS already running the 6.2.1-1088 bundle.
fn device_at_target() -> ScriptedStream {
    with_ftd(fxos_device().always(
        PACKAGE_VERSION,
        "\r\n    Package-Vers: 6.2.1-1088\r\nkp-2110 /system # ",
    ))
}

fn assert_not_reimaged(log: &SentLog) {
    for reimage_step in ["format everything", "set", "boot", "tftpdnld"] {
        assert!(!log.contains(reimage_step), "{reimage_step} was sent");
    }
    let lines = log.lines();
    assert!(!lines.iter().any(|l| l.starts_with("download image")));
    assert!(!lines.iter().any(|l| l.starts_with("install security-pack")));
}

#[tokio::test(start_paused = true)]
async fn baseline_on_a_device_at_target_skips_the_reimage() {
    let metrics = Arc::new(CountingMetrics::default());
    let kp = Kp::new(DeviceIdentity::new("kp-2110"), metrics.clone()).expect("kp");
    let device = device_at_target();
    let log = device.sent_log();
    let mut line = attach(&kp, device).await;

    line.baseline_fp2k_ftd(&baseline_options())
        .await
        .expect("baseline");

    assert_eq!(line.current_state(), Some(FXOS));
    assert!(log.contains("show version"));
    assert_not_reimaged(&log);
    assert_eq!(
        metrics.names(),
        vec!["device.kp.init".to_string(), "device.kp.baseline".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn repeated_baseline_started_from_ftd_is_still_a_no_op() {
    let device = device_at_target();
    let log = device.sent_log();
    let mut line = attach(&kp(), device).await;
    line.go_to(FIREOS).await.expect("fxos -> fireos");

    line.baseline_fp2k_ftd(&baseline_options())
        .await
        .expect("baseline");

    assert!(log.contains("connect fxos"));
    assert!(log.contains(PACKAGE_VERSION));
    assert_not_reimaged(&log);
    assert_eq!(line.current_state(), Some(FXOS));
}

#[tokio::test(start_paused = true)]
async fn listed_bundle_skips_download_and_install() {
    let device = with_firmware(fxos_device(), &format!("{BUNDLE}                 6.2.1-1088"));
    let log = device.sent_log();
    let mut line = attach(&kp(), device).await;

    let installed = line
        .ensure_ftd_installed(&baseline_options())
        .await
        .expect("nothing to install");

    assert!(!installed);
    assert!(log.contains("show package"));
    assert_not_reimaged(&log);
}

#[tokio::test(start_paused = true)]
async fn baseline_with_the_bundle_listed_goes_straight_to_validation() {
    let device = with_ftd(with_firmware(
        fxos_device(),
        &format!("{BUNDLE}                 6.2.1-1088"),
    ));
    let log = device.sent_log();
    let mut line = attach(&kp(), device).await;

    line.baseline_fp2k_ftd(&baseline_options())
        .await
        .expect("baseline");

    assert!(log.contains("show package"));
    assert!(log.contains("show version"));
    assert_not_reimaged(&log);
}

#[tokio::test(start_paused = true)]
async fn baseline_rejects_incomplete_options_before_touching_the_device() {
    let device = fxos_device();
    let log = device.sent_log();
    let mut line = attach(&kp(), device).await;
    let sent_before = log.lines().len();

    let opts = BaselineOptions {
        fxos_url: String::new(),
        ..baseline_options()
    };
    let err = line
        .baseline_fp2k_ftd(&opts)
        .await
        .expect_err("fxos_url missing");
    assert!(matches!(err, ConsoleError::InvalidConfig(msg) if msg.contains("fxos_url")));
    assert_eq!(log.lines().len(), sent_before);
}

#[tokio::test(start_paused = true)]
async fn booting_device_is_caught_in_rommon_on_attach() {
    let device = ScriptedStream::new()
        .on("", "\r\nCisco System ROMMON\r\nBoot in 10 seconds.\r\n")
        .on("\u{1b}", "\r\nrommon 1 > ");
    let log = device.sent_log();

    let start = Instant::now();
    let line = attach(&kp(), device).await;

    assert_eq!(line.current_state(), Some(ROMMON));
    assert!(log.contains("\u{1b}"));
    assert!(!log.contains("terminal length 0"));
    // Detection gives up after the default 60s window.
    assert_eq!(start.elapsed(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn silent_console_still_attaches_with_unknown_state() {
    let line = attach(&kp(), ScriptedStream::new()).await;
    assert_eq!(line.current_state(), None);
}

#[tokio::test(start_paused = true)]
async fn wm_attach_does_not_wait_for_rommon() {
    let wm = Wm::new(Wm::default_identity("kp-2110"), Arc::new(LogMetrics)).expect("wm");
    let err = wm
        .attach(ScriptedStream::new(), LineSettings::default())
        .await
        .err()
        .expect("nothing to detect");
    assert!(matches!(err, ConsoleError::StateDetection { .. }));
}

#[tokio::test(start_paused = true)]
async fn connection_poll_waits_for_app_instances() {
    let device = fxos_device()
        .always("scope ssa", "\r\nkp-2110 /ssa # ")
        .on(
            "show app-instance detail",
            "\r\nApplication Name: ftd\r\nSlot ID: 1\r\nOperational State: Starting\r\nkp-2110 /ssa # ",
        )
        .always(
            "show app-instance detail",
            "\r\nApplication Name: ftd\r\nSlot ID: 1\r\nOperational State: Online\r\nkp-2110 /ssa # ",
        );
    let mut attempts = vec![Err(ConsoleError::StreamClosed), Ok(device)].into_iter();

    let start = Instant::now();
    let mut line = kp()
        .poll_connection("ts-1:2005", 3, move || {
            let next = attempts.next();
            async move { next.unwrap_or(Err(ConsoleError::StreamClosed)) }
        })
        .await
        .expect("device comes up");

    // 10s retry pause, then one 20s wait for the app to come online.
    assert_eq!(start.elapsed(), Duration::from_secs(30));
    assert_eq!(line.current_state(), Some(FXOS));
    let apps = line.get_app_instance_list().await.expect("apps");
    assert!(apps.iter().all(|app| app.is_online()));
}

#[tokio::test(start_paused = true)]
async fn rejected_scope_keeps_fxos_polling_until_the_deadline() {
    let device = fxos_device().always(
        "scope ssa",
        "\r\n% Invalid Command at '^' marker\r\nkp-2110# ",
    );
    let mut line = attach(&kp(), device).await;

    let start = Instant::now();
    let err = line
        .wait_for_fxos_ready(Duration::from_secs(10), Duration::from_secs(30))
        .await
        .expect_err("never ready");
    assert!(matches!(err, ConsoleError::ProvisioningTimeout { .. }));
    assert_eq!(start.elapsed(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn first_login_password_change_sets_the_flag() {
    let device = fxos_device()
        .on("exit", "\r\nkp-2110 login: ")
        .on("admin", "\r\nPassword: ")
        .on(
            "Admin123",
            "\r\nYou are required to change your password immediately (password aged)\r\nEnter old password:",
        )
        .on("Admin123", "\r\nEnter new password:")
        .on("cisco123", "\r\nConfirm new password:")
        .on(
            "cisco123",
            "\r\nYour password was updated successfully.\r\n\r\nkp-2110# ",
        );
    let log = device.sent_log();
    let mut line = attach(&kp(), device).await;
    assert!(!line.change_password_flag());

    line.line_mut().sendline("exit").await.expect("logout");
    let changed = line.change_password().await.expect("password change");

    assert!(changed);
    assert!(line.change_password_flag());
    let lines = log.lines();
    let after_exit = &lines[lines.iter().position(|l| l == "exit").expect("exit") + 1..];
    assert_eq!(
        after_exit,
        ["admin", "Admin123", "Admin123", "cisco123", "cisco123"]
    );
}

#[tokio::test(start_paused = true)]
async fn logs_are_grepped_as_root_and_the_line_returns_to_fxos() {
    let grep = "grep -Ii fatal /var/log/boot_* | sort -u | grep -v ignore";
    let device = fxos_device()
        .on("connect ftd", "\r\n> ")
        .on("expert", "\r\nadmin@firepower:~$ ")
        .on("sudo su -", "\r\nPassword: ")
        .on("cisco123", "\r\nroot@firepower:/home/admin# ")
        .on(grep, "boot_1.log: fatal: disk not found\r\nroot@firepower:/home/admin# ")
        .on("exit", "\r\nadmin@firepower:~$ ")
        .on("exit", "\r\n> ")
        .on("connect fxos", PROMPT);
    let mut line = attach(&kp(), device).await;

    let output = line
        .log_checks(&["/var/log/boot_*"], &["fatal"], &["ignore"])
        .await
        .expect("logs");

    assert_eq!(output, "boot_1.log: fatal: disk not found");
    assert_eq!(line.current_state(), Some(FXOS));
}

#[tokio::test(start_paused = true)]
async fn empty_log_arguments_grep_the_boot_logs() {
    const ROOT: &str = "\r\nroot@firepower:/home/admin# ";
    const GREP_FATAL: &str = "grep -Ii fatal /var/log/boot_* | sort -u";
    const GREP_ERROR: &str = "grep -Ii error /var/log/boot_* | sort -u";
    let device = fxos_device()
        .on("connect ftd", "\r\n> ")
        .on("expert", "\r\nadmin@firepower:~$ ")
        .on("sudo su -", "\r\nPassword: ")
        .on("cisco123", ROOT)
        .on(GREP_FATAL, ROOT)
        .on(GREP_ERROR, ROOT)
        .on("exit", "\r\nadmin@firepower:~$ ")
        .on("exit", "\r\n> ")
        .on("connect fxos", PROMPT);
    let log = device.sent_log();
    let mut line = attach(&kp(), device).await;

    line.get_logs(&[], &[], &[]).await.expect("logs");

    assert_eq!(log.count(GREP_FATAL), 1);
    assert_eq!(log.count(GREP_ERROR), 1);
    assert_eq!(line.current_state(), Some(FXOS));
}

#[tokio::test(start_paused = true)]
async fn power_cycle_needs_a_controller_and_a_valid_bar() {
    let device = fxos_device();
    let mut line = attach(&kp(), device).await;
    assert_eq!(
        line.power_cycle(None, false, Duration::from_secs(300))
            .await
            .expect("no bar"),
        None
    );
    let err = line
        .power_cycle_goto_rommon(Duration::from_secs(300), None)
        .await
        .expect_err("nothing to cycle with");
    assert!(matches!(err, ConsoleError::PowerCycle(_)));

    let pdu = Arc::new(RecordingPdu::default());
    let kp = kp()
        .with_power_bar(PowerBar::new("pdu-1,pdu-2", "12,13"))
        .with_power_controller(pdu.clone());
    let mut line = attach(&kp, fxos_device()).await;
    let cycled = line
        .power_cycle(None, false, Duration::from_secs(300))
        .await
        .expect("cycle");

    assert_eq!(cycled, Some(true));
    assert_eq!(line.current_state(), None);
    let bars = pdu.cycled.lock().expect("pdu lock").clone();
    assert_eq!(bars.len(), 1);
    assert_eq!(bars[0].server, "pdu-1,pdu-2");
    assert_eq!(bars[0].port, "12,13");
}

#[tokio::test]
async fn build_files_resolve_into_baseline_paths() {
    let resolver = StaticFiles(InstallationFiles {
        server_ip: "10.89.23.80".to_string(),
        tftp_prefix: "netboot/ims/Development/6.2.1-1088/installers".to_string(),
        scp_prefix: "/netboot/ims/Development/6.2.1-1088/installers".to_string(),
        files: vec![
            "cisco-ftd-fp2k.6.2.1-1088.SSA".to_string(),
            "fxos-k8-fp2k-lfbff.82.2.1.386i.SSA".to_string(),
        ],
    });

    let opts = resolve_baseline(
        &resolver,
        "Kp",
        "ful",
        "Development",
        "6.2.1-1088",
        BaselineOptions::default(),
    )
    .await
    .expect("resolved");

    assert_eq!(opts.tftp_server, "10.89.23.80");
    assert_eq!(
        opts.rommon_file,
        "netboot/ims/Development/6.2.1-1088/installers/fxos-k8-fp2k-lfbff.82.2.1.386i.SSA"
    );
    assert_eq!(
        opts.fxos_url,
        "tftp://10.89.23.80/netboot/ims/Development/6.2.1-1088/installers/cisco-ftd-fp2k.6.2.1-1088.SSA"
    );
    assert_eq!(opts.ftd_version, "6.2.1-1088");
}

#[tokio::test]
async fn build_without_a_rommon_image_is_a_missing_artifact() {
    let resolver = StaticFiles(InstallationFiles {
        server_ip: "10.89.23.80".to_string(),
        tftp_prefix: "netboot".to_string(),
        scp_prefix: "/netboot".to_string(),
        files: vec!["cisco-ftd-fp2k.6.2.1-1088.SSA".to_string()],
    });
    let err = resolve_baseline(
        &resolver,
        "Kp",
        "ful",
        "Development",
        "6.2.1-1088",
        BaselineOptions::default(),
    )
    .await
    .expect_err("no rommon image");
    assert!(matches!(err, ConsoleError::MissingArtifact(_)));
}
