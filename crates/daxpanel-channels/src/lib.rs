//! daxpanel-channels: Per-channel DAX stream lifecycle.
//!
//! Every channel (Receive 1..N, Microphone, Transmit, IQ 1..M) is driven by
//! one generic [`ChannelReconciler`] that keeps its stream in line with the
//! channel's record and the shared connectivity signal. Each reconciler runs
//! inside its own task; the [`ChannelManager`] owns them all, fans out
//! connectivity, and funnels record changes to the settings store.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use daxpanel_channels::ChannelManagerBuilder;
//! use daxpanel_core::{ChannelId, DeviceRef};
//!
//! let manager = ChannelManagerBuilder::new(session, factory).build().await?;
//! let rx1 = manager.require(ChannelId::receive(1))?;
//! rx1.set_device(Some(DeviceRef::new("speakers"))).await?;
//! rx1.set_enabled(true).await?;
//! manager.connectivity_changed(true).await?;
//! ```

pub mod builder;
pub mod desired;
pub mod kind;
pub mod manager;
pub mod reconciler;
pub mod task;

pub use builder::ChannelManagerBuilder;
pub use desired::should_stream;
pub use kind::{KindDescriptor, descriptor};
pub use manager::ChannelManager;
pub use reconciler::{ChannelEvent, ChannelReconciler, Effect};
pub use task::{ChannelHandle, ChannelSnapshot};
