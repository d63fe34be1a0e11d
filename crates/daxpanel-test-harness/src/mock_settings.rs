//! In-memory settings store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use daxpanel_core::{ChannelId, ChannelRecord, Error, Result, SettingsStore};
use tokio::sync::Mutex;

use crate::{WAIT_TIMEOUT, wait_until};

/// A [`SettingsStore`] backed by a map, counting every save.
#[derive(Default)]
pub struct MemorySettingsStore {
    records: Mutex<BTreeMap<ChannelId, ChannelRecord>>,
    saves: std::sync::atomic::AtomicUsize,
    fail_saves: std::sync::atomic::AtomicBool,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-loaded with `records`.
    pub fn with_records(records: impl IntoIterator<Item = ChannelRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.id, r)).collect();
        MemorySettingsStore {
            records: Mutex::new(map),
            ..Default::default()
        }
    }

    pub async fn get(&self, id: ChannelId) -> Option<ChannelRecord> {
        self.records.lock().await.get(&id).cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn wait_for_saves(&self, n: usize) -> bool {
        wait_until(WAIT_TIMEOUT, || self.save_count() >= n).await
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<Vec<ChannelRecord>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn save(&self, record: &ChannelRecord) -> Result<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::Settings("store is read-only".into()));
        }
        self.records.lock().await.insert(record.id, record.clone());
        self.saves
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
