//! The Channel Record: one channel's desired configuration.

use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, ChannelKind, DeviceRef, Gain, SampleRate};

/// Desired configuration of one channel.
///
/// Pure data. `id` (and through it the kind) never changes after creation;
/// every other field is user-mutable and persisted. `gain` is ignored for IQ
/// channels and `sample_rate` for everything else, but both are always
/// present so the serialized form is uniform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: ChannelId,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub device: Option<DeviceRef>,
    #[serde(default)]
    pub gain: Gain,
    #[serde(default)]
    pub sample_rate: SampleRate,
    #[serde(default = "default_details_visible")]
    pub details_visible: bool,
}

fn default_details_visible() -> bool {
    true
}

impl ChannelRecord {
    /// A record with the default configuration: disabled, no device,
    /// 50% gain, 24 kHz, details shown.
    pub fn new(id: ChannelId) -> Self {
        ChannelRecord {
            id,
            enabled: false,
            device: None,
            gain: Gain::default(),
            sample_rate: SampleRate::default(),
            details_visible: true,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.id.kind
    }

    /// Builder-style helper used when seeding records.
    pub fn with_device(mut self, device: impl Into<DeviceRef>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
