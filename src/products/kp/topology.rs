//! State graph of the Firepower 2100 console.

use std::sync::Arc;

use crate::error::ConsoleError;
use crate::statemachine::{Path, State, Topology, TopologyBuilder};

use super::dialogs;
use super::patterns::KpPatterns;

pub const PRELOGIN: &str = "prelogin";
pub const FXOS: &str = "fxos";
pub const FIREOS: &str = "fireos";
pub const EXPERT: &str = "expert";
pub const SUDO: &str = "sudo";
pub const ROMMON: &str = "rommon";
pub const LOCAL_MGMT: &str = "local_mgmt";
pub const ENABLE: &str = "enable";
pub const DISABLE: &str = "disable";
pub const CONFIG: &str = "config";

fn state(p: &KpPatterns, name: &str, pattern: &crate::pattern::Pattern) -> State {
    p.samples(name)
        .into_iter()
        .fold(State::new(name, pattern.clone()), |s, prompt| s.sample(prompt))
}

/// States, paths and default statements shared by the 2100 family.
///
/// Returned unbuilt so product variants can apply an overlay first.
pub fn kp_topology(p: &KpPatterns) -> TopologyBuilder {
    Topology::builder()
        .state(state(p, PRELOGIN, &p.prelogin).no_commands())
        .state(state(p, FXOS, &p.fxos))
        .state(state(p, FIREOS, &p.fireos))
        .state(state(p, EXPERT, &p.expert))
        .state(state(p, SUDO, &p.sudo))
        .state(state(p, ROMMON, &p.rommon))
        .state(state(p, LOCAL_MGMT, &p.local_mgmt))
        .state(state(p, ENABLE, &p.enable))
        .state(state(p, DISABLE, &p.disable))
        .state(state(p, CONFIG, &p.config))
        .path(Path::new(PRELOGIN, FXOS, "").dialog(dialogs::prelogin_to_fxos(p)))
        .path(Path::new(FXOS, PRELOGIN, "top; exit"))
        .path(Path::new(FXOS, FIREOS, "connect ftd"))
        .path(Path::new(FXOS, LOCAL_MGMT, "connect local-mgmt"))
        .path(Path::new(FIREOS, EXPERT, "expert"))
        .path(Path::new(EXPERT, SUDO, "sudo su -").dialog(dialogs::expert_to_sudo(p)))
        .path(Path::new(SUDO, EXPERT, "exit"))
        .path(Path::new(EXPERT, FIREOS, "exit"))
        .path(Path::new(FIREOS, FXOS, "connect fxos").dialog(dialogs::fireos_to_fxos()))
        .path(Path::new(LOCAL_MGMT, FXOS, "exit"))
        .path(Path::new(EXPERT, DISABLE, "sudo lina_cli").dialog(dialogs::expert_to_disable(p)))
        .path(
            Path::new(FIREOS, DISABLE, "system support diagnostic-cli")
                .dialog(dialogs::fireos_to_disable(p)),
        )
        .path(
            Path::new(FIREOS, ENABLE, "system support diagnostic-cli")
                .dialog(dialogs::fireos_to_enable(p)),
        )
        .path(
            Path::new(FIREOS, CONFIG, "system support diagnostic-cli")
                .dialog(dialogs::fireos_to_config(p)),
        )
        .path(Path::new(DISABLE, ENABLE, "en").dialog(dialogs::disable_to_enable(p)))
        .path(Path::new(ENABLE, DISABLE, "disable"))
        // Ctrl-A d detaches from the lina console, then exit leaves it.
        .path(Path::new(DISABLE, FIREOS, "\u{1}dexit"))
        .path(Path::new(ENABLE, CONFIG, "conf t"))
        .path(Path::new(CONFIG, ENABLE, "end"))
        .default_statements(dialogs::default_statements(p))
}

pub fn build_kp_topology(p: &KpPatterns) -> Result<Arc<Topology>, ConsoleError> {
    kp_topology(p).build()
}
