//! Parsers for FXOS and FTD command output.

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;

fn compile(re: &str) -> Regex {
    match Regex::new(re) {
        Ok(re) => re,
        Err(err) => panic!("invalid built-in regex {re:?}: {err}"),
    }
}

static KEY_VALUE: Lazy<Regex> = Lazy::new(|| compile(r"^([^:]+):(.*)$"));
static HYPHEN_RULE: Lazy<Regex> = Lazy::new(|| compile(r"-{2,}"));
static DOWNLOAD_STATE: Lazy<Regex> = Lazy::new(|| compile(r"State: (\w+)"));
static BUILD: Lazy<Regex> = Lazy::new(|| compile(r"Build\s(\d+)"));
static VERSION: Lazy<Regex> = Lazy::new(|| compile(r"Version\s([0-9.]+\d)"));
static FTD_VERSION: Lazy<Regex> = Lazy::new(|| compile(r"[\d.]+-\d+"));
static BAD_COMMAND: Lazy<Regex> =
    Lazy::new(|| compile(r"(?m)^\s*(% ?Invalid.*|Error:.*|Software Error:.*|ERROR:.*)$"));
static SCP_URL: Lazy<Regex> = Lazy::new(|| compile(r"(\w+)://(\w+)@[0-9.]+:([\w\-./]+)"));
static TFTP_URL: Lazy<Regex> = Lazy::new(|| compile(r"(\w+)://[0-9.]+/([\w\-./]+)"));

/// One block of `show app-instance detail`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AppInstance {
    pub application_name: Option<String>,
    pub slot_id: Option<u32>,
    pub admin_state: Option<String>,
    pub operational_state: Option<String>,
    pub running_version: Option<String>,
    pub startup_version: Option<String>,
    pub cluster_oper_state: Option<String>,
    pub cluster_role: Option<String>,
    pub job_type: Option<String>,
    pub job_progress: Option<String>,
    pub job_state: Option<String>,
    pub clear_log_data: Option<String>,
    pub error_msg: Option<String>,
    pub hotfixes: Option<String>,
    pub externally_upgraded: Option<String>,
}

impl AppInstance {
    pub fn is_online(&self) -> bool {
        self.operational_state.as_deref() == Some("Online")
    }
}

/// Splits the output on `Application Name:` and reads the `key: value`
/// lines of each block. Unknown keys are ignored.
pub fn parse_app_instances(output: &str) -> Vec<AppInstance> {
    let starts = output
        .match_indices("Application Name:")
        .map(|(i, _)| i)
        .collect::<Vec<_>>();

    let mut instances = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(output.len());
        let mut app = AppInstance::default();
        for line in output[start..end].lines() {
            let Some(caps) = KEY_VALUE.captures(line.trim()) else {
                continue;
            };
            let key = caps[1].trim();
            let value = caps[2].trim().to_string();
            match key {
                "Application Name" => app.application_name = Some(value),
                "Slot ID" => app.slot_id = value.parse().ok(),
                "Admin State" => app.admin_state = Some(value),
                "Operational State" => app.operational_state = Some(value),
                "Running Version" => app.running_version = Some(value),
                "Startup Version" => app.startup_version = Some(value),
                "Cluster Oper State" => app.cluster_oper_state = Some(value),
                "Cluster Role" => app.cluster_role = Some(value),
                "Current Job Type" => app.job_type = Some(value),
                "Current Job Progress" => app.job_progress = Some(value),
                "Current Job State" => app.job_state = Some(value),
                "Clear Log Data" => app.clear_log_data = Some(value),
                "Error Msg" => app.error_msg = Some(value),
                "Hotfixes" => app.hotfixes = Some(value),
                "Externally Upgraded" => app.externally_upgraded = Some(value),
                _ => {}
            }
        }
        instances.push(app);
    }
    instances
}

/// A firmware package listed by `show package`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Package {
    pub name: String,
    pub version: String,
}

/// Reads the rows after the last `----` rule of `show package`.
pub fn parse_packages(output: &str) -> Result<Vec<Package>, ConsoleError> {
    let start = HYPHEN_RULE
        .find_iter(output)
        .last()
        .map(|m| m.end())
        .unwrap_or(0);

    output[start..]
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(name), Some(version), None) => Ok(Package {
                    name: name.to_string(),
                    version: version.to_string(),
                }),
                _ => Err(ConsoleError::CommandFailed {
                    command: "show package".to_string(),
                    output: format!("unexpected package row {line:?}"),
                }),
            }
        })
        .collect()
}

/// Progress of a firmware download task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DownloadState {
    Downloaded,
    Downloading,
    Failed,
    Other(String),
}

impl DownloadState {
    pub fn parse(output: &str) -> Option<DownloadState> {
        let caps = DOWNLOAD_STATE.captures(output)?;
        Some(match &caps[1] {
            "Downloaded" => DownloadState::Downloaded,
            "Downloading" => DownloadState::Downloading,
            "Failed" => DownloadState::Failed,
            other => DownloadState::Other(other.to_string()),
        })
    }
}

/// `FPRM: Package-Vers: 6.2.1-1052` -> `6.2.1-1052`.
pub fn parse_package_version(output: &str) -> Option<String> {
    let (_, value) = output.split_once("Package-Vers:")?;
    let value = value.lines().next()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Version and build number printed by FTD `show version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtdVersion {
    pub version: String,
    pub build: String,
}

impl FtdVersion {
    pub fn parse(output: &str) -> Option<FtdVersion> {
        let build = BUILD.captures(output)?[1].to_string();
        let version = VERSION.captures(output)?[1].to_string();
        Some(FtdVersion { version, build })
    }

    /// Whether version and build both equal those of a version string
    /// like `6.2.1-1088`.
    pub fn matches(&self, ftd_version: &str) -> bool {
        let Some(expected) = ftd_version_from(ftd_version) else {
            return false;
        };
        match expected.rsplit_once('-') {
            Some((version, build)) => version == self.version && build == self.build,
            None => false,
        }
    }
}

impl std::fmt::Display for FtdVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.version, self.build)
    }
}

/// Pulls `6.4.0-10138` out of strings such as `6.4.0-10138` or
/// `Development/6.4.0-10138`.
pub fn ftd_version_from(text: &str) -> Option<String> {
    FTD_VERSION.find(text).map(|m| m.as_str().to_string())
}

/// First line of `output` that FXOS or lina uses to reject a command.
pub fn find_error(output: &str) -> Option<&str> {
    BAD_COMMAND
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end())
}

/// File name of an `scp://` or `tftp://` image URL.
pub fn image_name_from_url(url: &str) -> Result<String, ConsoleError> {
    let full_path = if url.starts_with("scp") {
        SCP_URL.captures(url).map(|caps| caps[3].to_string())
    } else if url.starts_with("tftp") {
        TFTP_URL.captures(url).map(|caps| caps[2].to_string())
    } else {
        return Err(ConsoleError::InvalidConfig(format!(
            "unsupported download protocol in {url:?}"
        )));
    };

    full_path
        .as_deref()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConsoleError::InvalidConfig(format!("unknown file url {url:?}")))
}
