//! The [`SettingsStore`] trait: persistence of Channel Records.

use async_trait::async_trait;

use crate::error::Result;
use crate::record::ChannelRecord;

/// Persists the mutable fields of every channel across restarts.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Load every stored record. An empty store returns an empty list.
    async fn load(&self) -> Result<Vec<ChannelRecord>>;

    /// Store one record, replacing any previous record with the same id.
    async fn save(&self, record: &ChannelRecord) -> Result<()>;
}
