use std::time::Duration;

use tokio::sync::mpsc::{self, Receiver, Sender};

use super::Stream;
use crate::error::ConsoleError;

/// A stream backed by a pair of tokio mpsc channels.
///
/// The SSH adapter pumps its shell through one of these; any other
/// transport that can run an I/O task can do the same.
pub struct ChannelStream {
    sender: Sender<String>,
    recv: Receiver<String>,
}

impl ChannelStream {
    pub fn new(sender: Sender<String>, recv: Receiver<String>) -> Self {
        Self { sender, recv }
    }

    /// Two connected ends: what one sends, the other receives.
    pub fn pair(capacity: usize) -> (ChannelStream, ChannelStream) {
        let (a_tx, a_rx) = mpsc::channel::<String>(capacity);
        let (b_tx, b_rx) = mpsc::channel::<String>(capacity);
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }
}

impl Stream for ChannelStream {
    async fn send(&mut self, data: &str) -> Result<(), ConsoleError> {
        self.sender.send(data.to_string()).await?;
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<String>, ConsoleError> {
        match tokio::time::timeout(timeout, self.recv.recv()).await {
            Ok(Some(data)) => Ok(Some(data)),
            Ok(None) => Err(ConsoleError::StreamClosed),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), ConsoleError> {
        self.recv.close();
        Ok(())
    }
}
