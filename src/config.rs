//! Per-device configuration threaded into sessions at construction time.
//!
//! Nothing in here is process-wide: every value is owned by the device or
//! line that was built from it.

use std::path::Path;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;

/// Timeout applied to transitions and commands when the caller gives none.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Factory password an appliance accepts right after a reimage.
pub const FACTORY_PASSWORD: &str = "Admin123";

fn default_login_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "cisco123".to_string()
}

fn default_config_hostname() -> String {
    "firepower".to_string()
}

fn default_factory_password() -> String {
    FACTORY_PASSWORD.to_string()
}

/// Identity of one appliance: what its prompts look like and how to log in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceIdentity {
    /// Chassis hostname shown in the FXOS prompt, e.g. `BATIT-2100-2-AST`.
    pub hostname: String,
    #[serde(default = "default_login_username")]
    pub login_username: String,
    #[serde(default = "default_password")]
    pub login_password: String,
    /// Root password used by `sudo su -` in the expert shell.
    #[serde(default = "default_password")]
    pub sudo_password: String,
    /// Hostname configured on the application, as printed by
    /// `show running-config hostname`.
    #[serde(default = "default_config_hostname")]
    pub config_hostname: String,
    /// Password the device accepts after a factory reset.
    #[serde(default = "default_factory_password")]
    pub default_password: String,
}

impl DeviceIdentity {
    /// Identity with the usual lab credentials.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            login_username: default_login_username(),
            login_password: default_password(),
            sudo_password: default_password(),
            config_hostname: default_config_hostname(),
            default_password: default_factory_password(),
        }
    }

    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.login_username = username.into();
        self.login_password = password.into();
        self
    }

    pub fn with_sudo_password(mut self, password: impl Into<String>) -> Self {
        self.sudo_password = password.into();
        self
    }

    pub fn with_config_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.config_hostname = hostname.into();
        self
    }

    /// Rejects identities whose fields would produce empty prompt patterns.
    pub fn validate(&self) -> Result<(), ConsoleError> {
        if self.hostname.trim().is_empty() {
            return Err(ConsoleError::InvalidConfig("hostname is empty".to_string()));
        }
        if self.config_hostname.trim().is_empty() {
            return Err(ConsoleError::InvalidConfig(
                "config_hostname is empty".to_string(),
            ));
        }
        if self.login_username.trim().is_empty() {
            return Err(ConsoleError::InvalidConfig(
                "login_username is empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_power_bar_credential() -> String {
    "admn".to_string()
}

/// Power distribution unit outlets feeding one appliance.
///
/// Each field may hold a comma-separated list when the device has more than
/// one power supply. The lists are handed to the power controller as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PowerBar {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_power_bar_credential")]
    pub user: String,
    #[serde(default = "default_power_bar_credential")]
    pub password: String,
}

impl Default for PowerBar {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: String::new(),
            user: default_power_bar_credential(),
            password: default_power_bar_credential(),
        }
    }
}

impl PowerBar {
    pub fn new(server: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: port.into(),
            ..Self::default()
        }
    }

    /// Both a server and a port are needed to reach an outlet.
    pub fn is_valid(&self) -> bool {
        !self.server.trim().is_empty() && !self.port.trim().is_empty()
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_chassis_line() -> bool {
    true
}

/// Behaviour of one console line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LineSettings {
    /// Default timeout for transitions and commands, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// True for a terminal-server console into the chassis, false for an SSH
    /// session straight into the application. A chassis line stays usable
    /// even when the device state cannot be detected.
    #[serde(default = "default_chassis_line")]
    pub chassis_line: bool,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            chassis_line: true,
        }
    }
}

impl LineSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// Everything needed to attach to one appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceConfig {
    pub identity: DeviceIdentity,
    #[serde(default)]
    pub power_bar: PowerBar,
    #[serde(default)]
    pub settings: LineSettings,
}

impl DeviceConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConsoleError> {
        let config: DeviceConfig = serde_json::from_str(json)?;
        config.identity.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConsoleError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
