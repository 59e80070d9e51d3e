//! Shared fixtures for integration tests.

use std::sync::Mutex;

use meshwatch::channel::{ChannelSender, SendError};
use meshwatch::store::MonitorStore;
use tempfile::TempDir;

/// Open a fresh store in a temp dir. Keep the `TempDir` alive for the test's duration.
pub fn open_store() -> (TempDir, MonitorStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MonitorStore::open(dir.path().join("meshwatch")).expect("open store");
    (dir, store)
}

/// Channel sender that records every message it is asked to send.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl RecordingSender {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl ChannelSender for RecordingSender {
    fn send_to_channel(&self, channel_name: &str, text: &str) -> Result<(), SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel_name.to_string(), text.to_string()));
        Ok(())
    }
}
