//! Dialogs handled while moving between Firepower 2100 states.
//!
//! Credentials are never baked into these rules; they are looked up in the
//! line's [`DialogContext`](crate::dialog::DialogContext) under the keys
//! below, so one topology serves every session of a model.

use crate::dialog::{Action, Dialog, Rule};
use crate::pattern::Pattern;

use super::patterns::KpPatterns;

pub const CTX_USERNAME: &str = "username";
pub const CTX_PASSWORD: &str = "password";
pub const CTX_SUDO_PASSWORD: &str = "sudo_password";
pub const CTX_DEFAULT_PASSWORD: &str = "default_password";

fn refused() -> Rule {
    Rule::expect(Pattern::literal("refused", "Request refused. Exiting ..."))
}

/// `prelogin` -> `fxos`: answer the password prompt.
pub fn prelogin_to_fxos(p: &KpPatterns) -> Dialog {
    Dialog::default()
        .rule(Rule::new(p.password.clone(), Action::sendline_ctx(CTX_PASSWORD)).and_continue())
}

/// `expert` -> `sudo`: root password for `sudo su -`.
pub fn expert_to_sudo(p: &KpPatterns) -> Dialog {
    Dialog::default().rule(
        Rule::new(p.password.clone(), Action::sendline_ctx(CTX_SUDO_PASSWORD)).and_continue(),
    )
}

/// `fireos` -> `fxos`: the console hint appears before FXOS takes over and
/// can take a while, so each hint restarts the timer.
pub fn fireos_to_fxos() -> Dialog {
    Dialog::default().rule(
        Rule::new(
            Pattern::literal("exit-hint", "Please enter 'exit' to go back"),
            Action::sendline("exit"),
        )
        .and_continue()
        .reset_timer(),
    )
}

/// `expert` -> `disable`: `sudo lina_cli` asks for the root password.
pub fn expert_to_disable(p: &KpPatterns) -> Dialog {
    Dialog::default().rule(
        Rule::new(p.password.clone(), Action::sendline_ctx(CTX_SUDO_PASSWORD)).and_continue(),
    )
}

/// `fireos` -> `disable`: the diagnostic CLI resumes in whatever lina mode
/// it was left in.
pub fn fireos_to_disable(p: &KpPatterns) -> Dialog {
    Dialog::default()
        .rule(Rule::new(p.enable.clone(), Action::sendline("disable")).and_continue())
        .rule(refused())
        .rule(Rule::new(p.config.clone(), Action::sendline("end")).and_continue())
}

/// `fireos` -> `enable`.
pub fn fireos_to_enable(p: &KpPatterns) -> Dialog {
    Dialog::default()
        .rule(Rule::new(p.disable.clone(), Action::sendline("en")).and_continue())
        .rule(Rule::new(p.password.clone(), Action::sendline("")).and_continue())
        .rule(refused())
        .rule(Rule::new(p.config.clone(), Action::sendline("end")).and_continue())
}

/// `fireos` -> `config`.
pub fn fireos_to_config(p: &KpPatterns) -> Dialog {
    Dialog::default()
        .rule(Rule::new(p.disable.clone(), Action::sendline("en")).and_continue())
        .rule(Rule::new(p.password.clone(), Action::sendline("")).and_continue())
        .rule(refused())
        .rule(Rule::new(p.enable.clone(), Action::sendline("conf t")).and_continue())
}

/// `disable` -> `enable`: the enable password is empty.
pub fn disable_to_enable(p: &KpPatterns) -> Dialog {
    Dialog::default().rule(Rule::new(p.password.clone(), Action::sendline("")).and_continue())
}

/// Background rules merged into every transition: log back in after the
/// inactivity timer dropped the session, and page through `--More--`.
pub fn default_statements(p: &KpPatterns) -> Vec<Rule> {
    vec![
        Rule::new(p.prelogin.clone(), Action::sendline_ctx(CTX_USERNAME)).and_continue(),
        Rule::new(p.password.clone(), Action::sendline_ctx(CTX_PASSWORD)).and_continue(),
        Rule::new(Pattern::literal("more", "--More--"), Action::send(" ")).and_continue(),
    ]
}
