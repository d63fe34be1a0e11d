//! daxpanel-core: Core traits, types, and error definitions for daxpanel.
//!
//! This crate defines the radio-agnostic abstractions that the channel
//! reconciler is written against. The SmartSDR session, audio backends and
//! settings storage each implement one of these traits in their own crate.
//!
//! # Key types
//!
//! - [`ChannelRecord`] -- one channel's desired configuration
//! - [`RadioSession`] -- stream request/release on the radio
//! - [`EndpointFactory`] / [`AudioEndpoint`] -- local sinks and sources
//! - [`AudioDeviceDirectory`] -- local device enumeration
//! - [`SettingsStore`] -- record persistence
//! - [`PanelEvent`] -- asynchronous notifications for the UI
//! - [`Error`] / [`Result`] -- error handling

pub mod audio;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod record;
pub mod session;
pub mod settings;
pub mod types;

// Re-export key types at crate root for ergonomic `use daxpanel_core::*`.
pub use audio::{
    AUDIO_CHANNEL_DEPTH, AudioBuffer, AudioReceiver, AudioSender, AudioStreamConfig,
    inbound_channel, outbound_channel,
};
pub use device::{AudioDevice, AudioDeviceDirectory};
pub use endpoint::{AudioEndpoint, EndpointBinding, EndpointFactory};
pub use error::{Error, Result};
pub use events::PanelEvent;
pub use record::ChannelRecord;
pub use session::{RadioSession, SessionEvent, StreamGrant, StreamRequest, StreamTap};
pub use settings::SettingsStore;
pub use types::*;
