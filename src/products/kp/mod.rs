//! Firepower 2100 series appliances.
//!
//! [`Kp`] describes one appliance and attaches [`KpLine`]s to it. The
//! provisioning workflows (ROMMON reimage, bundle download and install,
//! first-boot configuration) live on the line.

pub mod dialogs;
pub mod options;
pub mod parse;
pub mod patterns;
pub mod topology;

mod device;
mod line;

pub use device::Kp;
pub use line::{
    DEFAULT_LOG_FILES, DEFAULT_LOG_SEARCH, KP_INIT_COMMANDS, KpLine, ROMMON_IMAGE_PREFIX,
    resolve_baseline,
};
pub use options::{BaselineOptions, FirewallMode, Ipv6Settings, ManagerMode, ManagerRegistration};
pub use patterns::KpPatterns;
