//! # daxpanel -- DAX Channel Panel
//!
//! Routes FlexRadio DAX audio between a SmartSDR radio and local audio
//! devices. Each channel (Receive, Microphone, Transmit, IQ) is enabled,
//! pointed at a device, and left to its reconciler, which opens the radio
//! stream while the channel is wanted and the radio is connected, and closes
//! it otherwise.
//!
//! ## Architecture
//!
//! | Crate                | Purpose                                              |
//! |----------------------|------------------------------------------------------|
//! | `daxpanel-core`      | Traits, types, channel records, errors               |
//! | `daxpanel-channels`  | Channel reconcilers and the channel manager          |
//! | `daxpanel-flex`      | SmartSDR TCP/IP + VITA-49 radio session              |
//! | `daxpanel-audio`     | Audio bus and cpal hardware endpoints                |
//! | `daxpanel-settings`  | JSON settings file                                   |
//! | **`daxpanel`**       | This facade crate -- re-exports everything           |
//!
//! ## Feature Flags
//!
//! | Feature    | Enables                                 | Default |
//! |------------|-----------------------------------------|---------|
//! | `flex`     | [`flex`] module (SmartSDR session)      | yes     |
//! | `audio`    | [`audio`] module (audio bus)            | yes     |
//! | `settings` | [`settings`] module (JSON store)        | yes     |
//! | `cpal`     | Hardware audio devices via cpal         | no      |
//! | `full`     | Everything                              | no      |
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use daxpanel::{ChannelId, DeviceRef};
//! use daxpanel::channels::ChannelManagerBuilder;
//! use daxpanel::flex::FlexSessionBuilder;
//! use daxpanel::audio::AudioBus;
//!
//! # async fn example() -> daxpanel::Result<()> {
//! let session = Arc::new(FlexSessionBuilder::new().host("192.168.1.100").build().await?);
//! let events = session.subscribe();
//! let bus = AudioBus::new();
//! let manager = Arc::new(
//!     ChannelManagerBuilder::new(session.clone(), Arc::new(bus)).build().await?,
//! );
//! manager.spawn_connectivity_follower(events);
//! manager.connectivity_changed(true).await?;
//!
//! let rx1 = manager.require(ChannelId::receive(1))?;
//! rx1.set_device(Some(DeviceRef::new("speakers"))).await?;
//! rx1.set_enabled(true).await?;
//! # Ok(())
//! # }
//! ```

pub use daxpanel_core::*;

/// Channel reconcilers and the [`ChannelManager`](channels::ChannelManager).
pub mod channels {
    pub use daxpanel_channels::*;
}

/// SmartSDR radio session.
///
/// Provides [`FlexSession`](flex::FlexSession) and
/// [`FlexSessionBuilder`](flex::FlexSessionBuilder): the TCP command
/// channel, DAX stream creation and removal, and VITA-49 audio routing.
#[cfg(feature = "flex")]
pub mod flex {
    pub use daxpanel_flex::*;
}

/// Local audio endpoints.
///
/// Provides the in-process [`AudioBus`](audio::AudioBus) and, with the
/// `cpal` feature, `CpalBackend` for the host's sound cards.
#[cfg(feature = "audio")]
pub mod audio {
    pub use daxpanel_audio::*;
}

/// Settings persistence.
#[cfg(feature = "settings")]
pub mod settings {
    pub use daxpanel_settings::*;
}
