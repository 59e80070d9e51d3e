//! Outgoing channel notifications.
//!
//! The rule engine only knows channels by name and talks to a [`ChannelSender`]. The
//! production sender, [`RadioSender`], resolves the name through a
//! [`ChannelDirectory`] and hands the text to a bounded queue without waiting; a
//! transport task on the other side of the queue ([`spawn_transport`]) writes to the
//! radio (or stdout) and applies the per-message timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::logutil::escape_log;
use crate::metrics;

/// Name of channel index 0 regardless of how the radio labels it.
pub const PRIMARY_CHANNEL: &str = "primary";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("channel '{0}' not found")]
    UnknownChannel(String),

    #[error("outgoing queue full, dropped message for '{0}'")]
    QueueFull(String),

    #[error("radio transport is not running")]
    Closed,
}

/// Something that can deliver text to a named mesh channel.
pub trait ChannelSender {
    fn send_to_channel(&self, channel_name: &str, text: &str) -> Result<(), SendError>;
}

impl<T: ChannelSender + ?Sized> ChannelSender for Arc<T> {
    fn send_to_channel(&self, channel_name: &str, text: &str) -> Result<(), SendError> {
        (**self).send_to_channel(channel_name, text)
    }
}

impl<T: ChannelSender + ?Sized> ChannelSender for &T {
    fn send_to_channel(&self, channel_name: &str, text: &str) -> Result<(), SendError> {
        (**self).send_to_channel(channel_name, text)
    }
}

/// Channel names in radio index order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelDirectory {
    names: Vec<String>,
}

impl ChannelDirectory {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// `primary` (any case) is always index 0; other names must match exactly.
    pub fn resolve(&self, name: &str) -> Option<u32> {
        if name.eq_ignore_ascii_case(PRIMARY_CHANNEL) {
            return Some(0);
        }
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| idx as u32)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Text ready for the radio transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingText {
    pub channel_index: u32,
    pub channel_name: String,
    pub text: String,
}

/// [`ChannelSender`] that enqueues onto the radio transport queue.
#[derive(Debug, Clone)]
pub struct RadioSender {
    directory: ChannelDirectory,
    tx: mpsc::Sender<OutgoingText>,
}

/// Create a radio sender and the receiving end of its bounded queue.
pub fn radio_channel(
    directory: ChannelDirectory,
    capacity: usize,
) -> (RadioSender, mpsc::Receiver<OutgoingText>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (RadioSender { directory, tx }, rx)
}

impl ChannelSender for RadioSender {
    fn send_to_channel(&self, channel_name: &str, text: &str) -> Result<(), SendError> {
        let Some(channel_index) = self.directory.resolve(channel_name) else {
            metrics::inc_send_failures();
            return Err(SendError::UnknownChannel(channel_name.to_string()));
        };
        let out = OutgoingText {
            channel_index,
            channel_name: channel_name.to_string(),
            text: text.to_string(),
        };
        match self.tx.try_send(out) {
            Ok(()) => {
                metrics::inc_notifications_sent();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::inc_send_failures();
                Err(SendError::QueueFull(channel_name.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics::inc_send_failures();
                Err(SendError::Closed)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub delivered: u64,
    pub failed: u64,
    pub timed_out: u64,
}

/// Drain the outgoing queue into `sink`, one message at a time, each bounded by
/// `timeout`. Ends when every [`RadioSender`] has been dropped.
pub fn spawn_transport<F, Fut>(
    mut rx: mpsc::Receiver<OutgoingText>,
    timeout: Duration,
    mut sink: F,
) -> JoinHandle<TransportStats>
where
    F: FnMut(OutgoingText) -> Fut + Send + 'static,
    Fut: Future<Output = std::io::Result<()>> + Send,
{
    tokio::spawn(async move {
        let mut stats = TransportStats::default();
        while let Some(out) = rx.recv().await {
            let channel = out.channel_name.clone();
            match tokio::time::timeout(timeout, sink(out)).await {
                Ok(Ok(())) => stats.delivered += 1,
                Ok(Err(e)) => {
                    stats.failed += 1;
                    warn!("transport: send to '{}' failed: {}", escape_log(&channel), e);
                }
                Err(_) => {
                    stats.timed_out += 1;
                    warn!(
                        "transport: send to '{}' timed out after {:?}",
                        escape_log(&channel),
                        timeout
                    );
                }
            }
        }
        debug!("transport loop terminated");
        stats
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_primary_and_named_channels() {
        let dir = ChannelDirectory::new(["LongFast", "alerts", "ops"]);
        assert_eq!(dir.resolve("primary"), Some(0));
        assert_eq!(dir.resolve("PRIMARY"), Some(0));
        assert_eq!(dir.resolve("LongFast"), Some(0));
        assert_eq!(dir.resolve("alerts"), Some(1));
        assert_eq!(dir.resolve("Alerts"), None);
        assert_eq!(dir.resolve("missing"), None);
    }

    #[tokio::test]
    async fn radio_sender_enqueues_and_reports_full_queue() {
        let (sender, mut rx) = radio_channel(ChannelDirectory::new(["primary", "alerts"]), 1);
        sender.send_to_channel("alerts", "one").unwrap();
        assert_eq!(
            sender.send_to_channel("alerts", "two"),
            Err(SendError::QueueFull("alerts".into()))
        );
        assert_eq!(
            sender.send_to_channel("nowhere", "x"),
            Err(SendError::UnknownChannel("nowhere".into()))
        );
        let got = rx.recv().await.unwrap();
        assert_eq!(got.channel_index, 1);
        assert_eq!(got.text, "one");
        drop(rx);
        assert_eq!(sender.send_to_channel("alerts", "three"), Err(SendError::Closed));
    }

    #[tokio::test]
    async fn transport_counts_outcomes() {
        let (sender, rx) = radio_channel(ChannelDirectory::new(["primary"]), 8);
        let handle = spawn_transport(rx, Duration::from_millis(50), |out| async move {
            match out.text.as_str() {
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(())
                }
                "bad" => Err(std::io::Error::new(std::io::ErrorKind::Other, "radio busy")),
                _ => Ok(()),
            }
        });
        for text in ["ok", "bad", "slow", "ok"] {
            sender.send_to_channel("primary", text).unwrap();
        }
        drop(sender);
        let stats = handle.await.unwrap();
        assert_eq!(
            stats,
            TransportStats {
                delivered: 2,
                failed: 1,
                timed_out: 1
            }
        );
    }
}
