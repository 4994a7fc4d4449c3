//! Interactive SSH shell exposed as a [`Stream`].
//!
//! Appliance firmware often ships an old OpenSSH, so the algorithm lists
//! below keep legacy key exchanges and CBC ciphers after the modern ones.

use std::borrow::Cow;
use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::debug;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{ChannelMsg, Preferred, cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{ChannelStream, Stream};
use crate::error::ConsoleError;

/// Key exchange algorithms in order of preference.
pub const KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_GEX_SHA1,
    kex::DH_G1_SHA1,
];

pub const CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_192_CBC,
    cipher::AES_128_CBC,
];

pub const MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

pub const COMPRESSION_ALGORITHMS: &[compression::Name] = &[compression::NONE, compression::ZLIB];

pub const KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
    Algorithm::Dsa,
];

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    30
}

/// Where and how to open an SSH shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SshTarget {
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl SshTarget {
    pub fn new(
        address: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            port,
            username: username.into(),
            password: password.into(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    /// `user@address:port`, used to tag log lines.
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.username, self.address, self.port)
    }

    fn preferred() -> Preferred {
        Preferred {
            kex: Cow::Borrowed(KEX_ORDER),
            key: Cow::Borrowed(KEY_TYPES),
            cipher: Cow::Borrowed(CIPHERS),
            mac: Cow::Borrowed(MAC_ALGORITHMS),
            compression: Cow::Borrowed(COMPRESSION_ALGORITHMS),
        }
    }
}

/// An SSH shell with a PTY, pumped by a background I/O task.
pub struct SshStream {
    client: Client,
    inner: ChannelStream,
    label: String,
}

impl SshStream {
    /// Connects, authenticates with a password and starts a shell.
    ///
    /// Lab appliances are reimaged constantly, so host keys are not checked.
    pub async fn connect(target: &SshTarget) -> Result<SshStream, ConsoleError> {
        let label = target.label();
        let config = Config {
            preferred: SshTarget::preferred(),
            inactivity_timeout: None,
            ..Default::default()
        };

        let connect = Client::connect_with_config(
            (target.address.clone(), target.port),
            &target.username,
            AuthMethod::with_password(&target.password),
            ServerCheckMethod::NoCheck,
            config,
        );
        let client =
            match tokio::time::timeout(Duration::from_secs(target.connect_timeout_secs), connect)
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ConsoleError::ConnectTimeout {
                        target: label,
                        elapsed: Duration::from_secs(target.connect_timeout_secs),
                    });
                }
            };
        debug!("{} TCP connection successful", label);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 511, 200, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", label);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        let io_task_label = label.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    data = receiver_from_user.recv() => {
                        let Some(data) = data else {
                            debug!("{} Console side dropped. Closing task.", io_task_label);
                            let _ = channel.eof().await;
                            break;
                        };
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_task_label, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let text = String::from_utf8_lossy(data).into_owned();
                                if sender_to_user.send(text).await.is_err() {
                                    debug!(
                                        "{} Shell output receiver dropped. Closing task.",
                                        io_task_label
                                    );
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!(
                                    "{} Shell exited with status code: {}",
                                    io_task_label, exit_status
                                );
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF.", io_task_label);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            debug!("{} SSH I/O task ended.", io_task_label);
        });

        Ok(SshStream {
            client,
            inner: ChannelStream::new(sender_to_shell, receiver_from_shell),
            label,
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Stream for SshStream {
    async fn send(&mut self, data: &str) -> Result<(), ConsoleError> {
        self.inner.send(data).await
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>, ConsoleError> {
        self.inner.recv(timeout).await
    }

    async fn close(&mut self) -> Result<(), ConsoleError> {
        debug!("{} Closing SSH shell", self.label);
        self.inner.close().await?;
        self.client.disconnect().await?;
        Ok(())
    }
}
