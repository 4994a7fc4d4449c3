//! # rkick - Console automation for firewall appliances
//!
//! `rkick` drives the serial console or SSH shell of a Firepower appliance
//! through its boot and login prompts. It tracks which CLI mode the device
//! is in, walks between modes along a declared state graph, answers
//! interactive questions with ordered dialogs, and builds the long-running
//! provisioning workflows (ROMMON reimage, bundle download, install and
//! first-boot configuration) on top of those.
//!
//! ## Features
//!
//! - **Dialog Engine**: ordered expect/respond rules with per-rule timer control
//! - **State Machine**: prompt detection and shortest-path mode transitions over a shared topology
//! - **Provisioning**: bounded retries and polling around slow device-side progress
//! - **Transports**: SSH shells via russh, or any custom [`stream::Stream`]
//! - **Async/Await**: built on Tokio; every wait is bounded
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rkick::config::{DeviceIdentity, LineSettings};
//! use rkick::external::LogMetrics;
//! use rkick::products::kp::{Kp, topology::FIREOS};
//! use rkick::stream::{SshStream, SshTarget};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rkick::ConsoleError> {
//!     let kp = Kp::new(
//!         DeviceIdentity::new("kp-2110").with_login("admin", "cisco123"),
//!         Arc::new(LogMetrics),
//!     )?;
//!
//!     let target = SshTarget::new("10.0.0.10", 2005, "lab", "lab");
//!     let stream = SshStream::connect(&target).await?;
//!     let mut line = kp.attach(stream, LineSettings::default()).await?;
//!
//!     line.go_to(FIREOS).await?;
//!     let version = line.execute("show version").await?;
//!     println!("{version}");
//!
//!     line.disconnect().await
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`dialog::Dialog`] - ordered expect/respond rules
//! - [`statemachine::Topology`] - states, paths and default statements of a device
//! - [`session::Line`] - a stream plus its tracked state
//! - [`products::kp::Kp`] / [`products::wm::Wm`] - Firepower 2100 and 1000 appliances
//! - [`provision`] - retry budgets and pollers
//! - [`error::ConsoleError`] - error type for everything above

pub mod config;
pub mod dialog;
pub mod error;
pub mod external;
pub mod pattern;
pub mod products;
pub mod provision;
pub mod session;
pub mod statemachine;
pub mod stream;

pub use error::ConsoleError;
pub use products::kp::{Kp, KpLine};
pub use products::wm::{Wm, WmLine};
