//! Parameters of a baseline run.

use std::fmt;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::FACTORY_PASSWORD;
use crate::error::ConsoleError;

/// Who manages the application after first boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ManagerMode {
    #[default]
    Local,
    Remote,
}

/// Answer to the `Configure firewall mode` question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FirewallMode {
    #[default]
    Routed,
    Transparent,
    Ngips,
}

impl fmt::Display for FirewallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FirewallMode::Routed => "routed",
            FirewallMode::Transparent => "transparent",
            FirewallMode::Ngips => "ngips",
        };
        f.write_str(text)
    }
}

/// Static IPv6 management address. Without it the IPv6 question is
/// answered with `n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Ipv6Settings {
    pub address: String,
    pub prefix: String,
    pub gateway: String,
}

/// Management center the device registers with in remote mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ManagerRegistration {
    pub host: String,
    pub key: String,
    #[serde(default)]
    pub nat_id: Option<String>,
}

fn default_uut_hostname() -> String {
    "firepower".to_string()
}

fn default_uut_username() -> String {
    "admin".to_string()
}

fn default_uut_password() -> String {
    FACTORY_PASSWORD.to_string()
}

fn default_search_domains() -> String {
    "cisco.com".to_string()
}

fn default_install_timeout_secs() -> u64 {
    3600
}

fn default_reboot_timeout_secs() -> u64 {
    300
}

/// Everything a baseline needs besides the device itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BaselineOptions {
    /// TFTP server the appliance reaches from ROMMON.
    pub tftp_server: String,
    /// ROMMON image path on the TFTP server.
    pub rommon_file: String,
    #[serde(default = "default_uut_hostname")]
    pub uut_hostname: String,
    #[serde(default = "default_uut_username")]
    pub uut_username: String,
    #[serde(default = "default_uut_password")]
    pub uut_password: String,
    pub uut_ip: String,
    pub uut_netmask: String,
    pub uut_gateway: String,
    /// Comma-separated DNS servers; only the first is set on FXOS.
    #[serde(default)]
    pub dns_servers: String,
    #[serde(default = "default_search_domains")]
    pub search_domains: String,
    /// `tftp://` or `scp://` URL of the FXOS + FTD bundle.
    pub fxos_url: String,
    /// Target version, e.g. `6.2.1-1088`.
    pub ftd_version: String,
    #[serde(default)]
    pub file_server_password: String,
    #[serde(default)]
    pub power_cycle_flag: bool,
    #[serde(default)]
    pub mode: ManagerMode,
    #[serde(default)]
    pub ipv6: Option<Ipv6Settings>,
    #[serde(default)]
    pub manager: Option<ManagerRegistration>,
    #[serde(default)]
    pub firewall_mode: FirewallMode,
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_reboot_timeout_secs")]
    pub reboot_timeout_secs: u64,
}

impl Default for BaselineOptions {
    fn default() -> Self {
        Self {
            tftp_server: String::new(),
            rommon_file: String::new(),
            uut_hostname: default_uut_hostname(),
            uut_username: default_uut_username(),
            uut_password: default_uut_password(),
            uut_ip: String::new(),
            uut_netmask: String::new(),
            uut_gateway: String::new(),
            dns_servers: String::new(),
            search_domains: default_search_domains(),
            fxos_url: String::new(),
            ftd_version: String::new(),
            file_server_password: String::new(),
            power_cycle_flag: false,
            mode: ManagerMode::Local,
            ipv6: None,
            manager: None,
            firewall_mode: FirewallMode::Routed,
            install_timeout_secs: default_install_timeout_secs(),
            reboot_timeout_secs: default_reboot_timeout_secs(),
        }
    }
}

impl BaselineOptions {
    pub fn validate(&self) -> Result<(), ConsoleError> {
        let required = [
            ("tftp_server", &self.tftp_server),
            ("rommon_file", &self.rommon_file),
            ("uut_ip", &self.uut_ip),
            ("uut_netmask", &self.uut_netmask),
            ("uut_gateway", &self.uut_gateway),
            ("fxos_url", &self.fxos_url),
            ("ftd_version", &self.ftd_version),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConsoleError::InvalidConfig(format!(
                "baseline option '{name}' is required"
            )));
        }
        if self.mode == ManagerMode::Remote && self.manager.is_none() {
            log::warn!("remote manager mode without a manager to register with");
        }
        Ok(())
    }

    /// Last path segment of the bundle URL, e.g.
    /// `cisco-ftd-fp2k.6.2.1-1088.SSA`.
    pub fn bundle_package(&self) -> &str {
        self.fxos_url.rsplit('/').next().unwrap_or_default().trim()
    }

    pub fn dns_server(&self) -> &str {
        self.dns_servers
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
    }

    /// Domain part of a fully qualified hostname, else the search domains.
    pub fn domain(&self) -> &str {
        match self.uut_hostname.split_once('.') {
            Some((_, domain)) if !domain.is_empty() => domain,
            _ => self.search_domains.as_str(),
        }
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn reboot_timeout(&self) -> Duration {
        Duration::from_secs(self.reboot_timeout_secs)
    }
}
