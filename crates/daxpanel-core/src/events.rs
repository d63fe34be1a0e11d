//! Panel-level events.
//!
//! Emitted through a [`tokio::sync::broadcast`] channel by the channel
//! manager. A UI subscribes to render status changes and raise alerts; slow
//! consumers may miss events under heavy load.

use crate::types::{ChannelId, DeviceRef, StreamStatus};

/// An event describing a change visible to the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    /// The radio session connected or disconnected. Every channel has already
    /// reconciled by the time this is sent.
    ConnectivityChanged { connected: bool },

    /// A channel's derived stream status changed.
    StatusChanged {
        channel: ChannelId,
        status: StreamStatus,
    },

    /// A stream could not be opened or bound. The channel is `Off` and
    /// disabled; this is the user-visible alert.
    StreamFailed { channel: ChannelId, reason: String },

    /// The channel's device vanished from the device directory and its
    /// device reference was cleared.
    DeviceLost {
        channel: ChannelId,
        device: DeviceRef,
    },
}
