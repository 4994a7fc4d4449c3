//! Prompt patterns of a Firepower 2100 built from its identity.

use crate::config::DeviceIdentity;
use crate::error::ConsoleError;
use crate::pattern::Pattern;

/// Prompt table for one appliance. Built once from a [`DeviceIdentity`]
/// and never changed afterwards.
#[derive(Debug, Clone)]
pub struct KpPatterns {
    pub prelogin: Pattern,
    pub password: Pattern,
    pub fxos: Pattern,
    pub local_mgmt: Pattern,
    pub fireos: Pattern,
    pub expert: Pattern,
    pub sudo: Pattern,
    pub rommon: Pattern,
    pub enable: Pattern,
    pub disable: Pattern,
    pub config: Pattern,
    pub login_username: String,
    pub login_password: String,
    pub sudo_password: String,
    pub default_password: String,
    hostname: String,
    config_hostname: String,
}

impl KpPatterns {
    pub fn new(identity: &DeviceIdentity) -> Result<Self, ConsoleError> {
        identity.validate()?;
        if identity.hostname == identity.config_hostname {
            return Err(ConsoleError::InvalidConfig(format!(
                "hostname '{}' equals config_hostname, FXOS and lina prompts would be identical",
                identity.hostname
            )));
        }

        let h = regex::escape(&identity.hostname);
        let c = regex::escape(&identity.config_hostname);
        let u = regex::escape(&identity.login_username);

        Ok(Self {
            prelogin: Pattern::new("prelogin", r"[\w\-.]+ login: ?$")?,
            password: Pattern::new("password", r"[Pp]assword: ?$")?,
            fxos: Pattern::new("fxos", &format!(r"(?:^|[\r\n]){h}(?: /[\w\-/]+\*?)? ?# ?$"))?,
            local_mgmt: Pattern::new("local_mgmt", &format!(r"(?:^|[\r\n]){h}\(local-mgmt\)# ?$"))?,
            fireos: Pattern::new("fireos", r"(?:^|[\r\n])> ?$")?,
            expert: Pattern::new("expert", &format!(r"(?:^|[\r\n]){u}@{c}:[^$#\r\n]*\$ ?$"))?,
            sudo: Pattern::new("sudo", &format!(r"(?:^|[\r\n])root@{c}:[^$#\r\n]*# ?$"))?,
            rommon: Pattern::new("rommon", r"rommon \d+ > ?$")?,
            enable: Pattern::new("enable", &format!(r"(?:^|[\r\n]){c}# ?$"))?,
            disable: Pattern::new("disable", &format!(r"(?:^|[\r\n]){c}> ?$"))?,
            config: Pattern::new("config", &format!(r"(?:^|[\r\n]){c}\(config\)# ?$"))?,
            login_username: identity.login_username.clone(),
            login_password: identity.login_password.clone(),
            sudo_password: identity.sudo_password.clone(),
            default_password: identity.default_password.clone(),
            hostname: identity.hostname.clone(),
            config_hostname: identity.config_hostname.clone(),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn config_hostname(&self) -> &str {
        &self.config_hostname
    }

    /// Prompts the device prints in each state, used to check that no two
    /// state patterns claim the same prompt.
    pub(crate) fn samples(&self, state: &str) -> Vec<String> {
        let h = &self.hostname;
        let c = &self.config_hostname;
        let u = &self.login_username;
        match state {
            "prelogin" => vec![format!("{h} login: ")],
            "fxos" => vec![
                format!("{h}# "),
                format!("{h} /system # "),
                format!("{h} /fabric-interconnect* # "),
            ],
            "local_mgmt" => vec![format!("{h}(local-mgmt)# ")],
            "fireos" => vec!["> ".to_string()],
            "expert" => vec![format!("{u}@{c}:~$ ")],
            "sudo" => vec![format!("root@{c}:/home/{u}# ")],
            "rommon" => vec!["rommon 1 > ".to_string()],
            "enable" => vec![format!("{c}# ")],
            "disable" => vec![format!("{c}> ")],
            "config" => vec![format!("{c}(config)# ")],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> KpPatterns {
        KpPatterns::new(&DeviceIdentity::new("BATIT-2100-2-AST")).expect("patterns")
    }

    #[test]
    fn fxos_prompt_accepts_scopes_and_pending_commits() {
        let p = patterns();
        assert!(p.fxos.is_match("\r\nBATIT-2100-2-AST# "));
        assert!(
            p.fxos
                .is_match("\r\nBATIT-2100-2-AST /firmware/auto-install # ")
        );
        assert!(p.fxos.is_match("BATIT-2100-2-AST /system/services* # "));
        assert!(!p.fxos.is_match("BATIT-2100-2-AST(local-mgmt)# "));
        assert!(!p.fxos.is_match("BATIT-2100-2-AST# show version\r\n"));
    }

    #[test]
    fn lina_prompts_are_distinct() {
        let p = patterns();
        assert!(p.enable.is_match("\r\nfirepower# "));
        assert!(!p.enable.is_match("\r\nfirepower> "));
        assert!(p.disable.is_match("\r\nfirepower> "));
        assert!(!p.fireos.is_match("\r\nfirepower> "));
        assert!(p.config.is_match("firepower(config)# "));
        assert!(!p.enable.is_match("root@firepower:~# "));
    }

    #[test]
    fn hostname_is_escaped() {
        let p = KpPatterns::new(&DeviceIdentity::new("kp.lab+1")).expect("patterns");
        assert!(p.fxos.is_match("kp.lab+1# "));
        assert!(!p.fxos.is_match("kpXlab+1# "));
    }

    #[test]
    fn shell_prompts_follow_identity() {
        let p = patterns();
        assert!(p.expert.is_match("admin@firepower:~$ "));
        assert!(p.sudo.is_match("root@firepower:/home/admin# "));
        assert!(!p.expert.is_match("root@firepower:/home/admin# "));
    }

    #[test]
    fn identical_hostnames_are_rejected() {
        let identity = DeviceIdentity::new("firepower");
        let err = KpPatterns::new(&identity).expect_err("ambiguous prompts");
        assert!(matches!(err, ConsoleError::InvalidConfig(_)));
    }
}
