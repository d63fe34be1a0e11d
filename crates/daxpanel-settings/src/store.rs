//! JsonSettingsStore -- the settings document in a JSON file.
//!
//! A missing file reads as the default document. A file that exists but
//! cannot be parsed is an error rather than silently replaced, so a typo in
//! a hand-edited file does not wipe every channel.
//!
//! Writes go to a sibling temporary file that is then renamed over the
//! original. Read-modify-write cycles are serialized by an internal lock.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use daxpanel_core::{ChannelRecord, Error, Result, SettingsStore};
use tokio::sync::Mutex;

use crate::document::{PanelPreferences, SettingsDocument};

const APP_DIR: &str = "daxpanel";
const FILE_NAME: &str = "settings.json";

/// `<platform config dir>/daxpanel/settings.json`, when the platform has
/// a config dir.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME))
}

/// Settings persisted as one pretty-printed JSON document.
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonSettingsStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// A store at [`default_path`].
    pub fn open_default() -> Result<Self> {
        default_path()
            .map(Self::new)
            .ok_or_else(|| Error::Settings("no configuration directory on this platform".into()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole document.
    pub async fn document(&self) -> Result<SettingsDocument> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn preferences(&self) -> Result<PanelPreferences> {
        Ok(self.document().await?.preferences)
    }

    /// Replace the panel preferences, leaving channel records untouched.
    pub async fn set_preferences(&self, preferences: PanelPreferences) -> Result<()> {
        self.update(|doc| doc.preferences = preferences).await
    }

    async fn update(&self, edit: impl FnOnce(&mut SettingsDocument)) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        edit(&mut doc);
        self.write(&doc).await
    }

    async fn read(&self) -> Result<SettingsDocument> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no settings file, using defaults");
                return Ok(SettingsDocument::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|e| {
            Error::Settings(format!("failed to parse {}: {e}", self.path.display()))
        })
    }

    async fn write(&self, doc: &SettingsDocument) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let text = serde_json::to_string_pretty(doc)
            .map_err(|e| Error::Settings(format!("failed to encode settings: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::trace!(path = %self.path.display(), "settings written");
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load(&self) -> Result<Vec<ChannelRecord>> {
        Ok(self.document().await?.channels)
    }

    async fn save(&self, record: &ChannelRecord) -> Result<()> {
        let record = record.clone();
        self.update(|doc| doc.upsert(record)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daxpanel_core::{ChannelId, DeviceRef, Gain, SampleRate};

    fn store_in(dir: &tempfile::TempDir) -> JsonSettingsStore {
        JsonSettingsStore::new(dir.path().join("nested").join("settings.json"))
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(store.preferences().await.unwrap(), PanelPreferences::default());
    }

    #[tokio::test]
    async fn save_then_load_in_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = ChannelRecord::new(ChannelId::iq(2))
            .with_device("headphones")
            .with_enabled(true);
        record.sample_rate = SampleRate::Hz96k;
        record.gain = Gain::new(80).unwrap();

        store_in(&dir).save(&record).await.unwrap();

        let loaded = store_in(&dir).load().await.unwrap();
        assert_eq!(loaded, vec![record]);
    }

    #[tokio::test]
    async fn save_replaces_same_channel() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .save(&ChannelRecord::new(ChannelId::receive(1)))
            .await
            .unwrap();
        store
            .save(&ChannelRecord::new(ChannelId::transmit()))
            .await
            .unwrap();
        store
            .save(&ChannelRecord::new(ChannelId::receive(1)).with_device("line-out"))
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        let rx = loaded.iter().find(|r| r.id == ChannelId::receive(1)).unwrap();
        assert_eq!(rx.device, Some(DeviceRef::new("line-out")));
    }

    #[tokio::test]
    async fn preferences_and_channels_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .save(&ChannelRecord::new(ChannelId::microphone()))
            .await
            .unwrap();

        let mut prefs = PanelPreferences::default();
        prefs.auto_start = true;
        prefs.last_host = Some("192.168.1.50".into());
        store.set_preferences(prefs.clone()).await.unwrap();

        let doc = store.document().await.unwrap();
        assert_eq!(doc.preferences, prefs);
        assert_eq!(doc.channels.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_settings_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonSettingsStore::new(&path);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, Error::Settings(_)), "{err}");

        // A failed load must not overwrite the file.
        let err = store
            .save(&ChannelRecord::new(ChannelId::receive(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Settings(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn default_path_ends_with_app_file() {
        if let Some(path) = default_path() {
            assert!(path.ends_with("daxpanel/settings.json"));
        }
    }
}
