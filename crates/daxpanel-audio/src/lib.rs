//! daxpanel-audio: local audio endpoints for DAX channels.
//!
//! - [`AudioBus`] -- in-process virtual devices. Always available; used for
//!   headless operation and by the test suites.
//! - [`CpalBackend`] -- the host's sound cards via cpal (feature `cpal`).
//!
//! Both implement [`AudioDeviceDirectory`](daxpanel_core::AudioDeviceDirectory)
//! and [`EndpointFactory`](daxpanel_core::EndpointFactory).

mod blocking;
pub mod bus;
#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod gain;

pub use bus::AudioBus;
#[cfg(feature = "cpal")]
pub use cpal_backend::CpalBackend;
pub use gain::SharedGain;
