//! ChannelManagerBuilder -- fluent builder for [`ChannelManager`].
//!
//! Declares the fixed channel catalogue, loads persisted records over the
//! defaults, and spawns one task per channel plus the settings writer.
//!
//! # Example
//!
//! ```ignore
//! let manager = ChannelManagerBuilder::new(session, factory)
//!     .receive_channels(4)
//!     .iq_channels(2)
//!     .settings(store)
//!     .build()
//!     .await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use daxpanel_core::{
    ChannelId, ChannelRecord, EndpointFactory, Error, RadioSession, Result,
    SettingsStore,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::manager::ChannelManager;
use crate::reconciler::ChannelReconciler;
use crate::task::{TaskContext, spawn_channel};

/// Default number of DAX receive channels.
pub const DEFAULT_RECEIVE_CHANNELS: u8 = 4;

/// Most DAX receive channels a radio offers.
pub const MAX_RECEIVE_CHANNELS: u8 = 8;

/// Default (and maximum) number of DAX IQ channels.
pub const DEFAULT_IQ_CHANNELS: u8 = 4;
pub const MAX_IQ_CHANNELS: u8 = 4;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fluent builder for [`ChannelManager`].
pub struct ChannelManagerBuilder {
    session: Arc<dyn RadioSession>,
    factory: Arc<dyn EndpointFactory>,
    settings: Option<Arc<dyn SettingsStore>>,
    receive_channels: u8,
    iq_channels: u8,
    microphone: bool,
    transmit: bool,
    event_capacity: usize,
    announce_connectivity: bool,
}

impl ChannelManagerBuilder {
    pub fn new(session: Arc<dyn RadioSession>, factory: Arc<dyn EndpointFactory>) -> Self {
        ChannelManagerBuilder {
            session,
            factory,
            settings: None,
            receive_channels: DEFAULT_RECEIVE_CHANNELS,
            iq_channels: DEFAULT_IQ_CHANNELS,
            microphone: true,
            transmit: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            announce_connectivity: true,
        }
    }

    /// Number of Receive channels (default 4, at most 8).
    pub fn receive_channels(mut self, n: u8) -> Self {
        self.receive_channels = n;
        self
    }

    /// Number of IQ channels (default 4, at most 4).
    pub fn iq_channels(mut self, n: u8) -> Self {
        self.iq_channels = n;
        self
    }

    /// Whether the Microphone channel exists (default: true).
    pub fn microphone(mut self, enable: bool) -> Self {
        self.microphone = enable;
        self
    }

    /// Whether the Transmit channel exists (default: true).
    pub fn transmit(mut self, enable: bool) -> Self {
        self.transmit = enable;
        self
    }

    /// Load records from and persist changes to `store`.
    ///
    /// Without a store, changes live only as long as the manager.
    pub fn settings(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }

    /// Capacity of the panel event broadcast channel (default: 256).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Whether `build` announces an already-connected session to every
    /// channel (default: true).
    ///
    /// Turn this off to prune missing devices or suspend hidden channels
    /// first, then call
    /// [`ChannelManager::connectivity_changed`] yourself.
    pub fn announce_connectivity(mut self, announce: bool) -> Self {
        self.announce_connectivity = announce;
        self
    }

    /// The channel ids this builder will create, in panel order.
    pub fn catalogue(&self) -> Vec<ChannelId> {
        let mut ids = Vec::new();
        if self.transmit {
            ids.push(ChannelId::transmit());
        }
        if self.microphone {
            ids.push(ChannelId::microphone());
        }
        ids.extend((1..=self.receive_channels).map(ChannelId::receive));
        ids.extend((1..=self.iq_channels).map(ChannelId::iq));
        ids
    }

    /// Validate, load persisted records, and start every channel.
    ///
    /// If the session is already connected (and announcing is on), every
    /// channel is reconciled against that before this returns.
    pub async fn build(self) -> Result<ChannelManager> {
        if self.receive_channels > MAX_RECEIVE_CHANNELS {
            return Err(Error::InvalidParameter(format!(
                "at most {MAX_RECEIVE_CHANNELS} receive channels, got {}",
                self.receive_channels
            )));
        }
        if self.iq_channels > MAX_IQ_CHANNELS {
            return Err(Error::InvalidParameter(format!(
                "at most {MAX_IQ_CHANNELS} IQ channels, got {}",
                self.iq_channels
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidParameter(
                "event capacity must be non-zero".into(),
            ));
        }

        let catalogue = self.catalogue();
        let mut stored: HashMap<ChannelId, ChannelRecord> = match &self.settings {
            Some(store) => store
                .load()
                .await?
                .into_iter()
                .map(|r| (r.id, r))
                .collect(),
            None => HashMap::new(),
        };
        for id in stored.keys().filter(|id| !catalogue.contains(id)) {
            tracing::debug!(channel = %id, "ignoring stored record for unconfigured channel");
        }

        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let writer = spawn_settings_writer(self.settings.clone(), persist_rx);
        let (events, _) = broadcast::channel(self.event_capacity);
        let ctx = TaskContext {
            session: self.session.clone(),
            persist: persist_tx,
            events: events.clone(),
        };

        let mut handles = Vec::with_capacity(catalogue.len());
        let mut tasks = Vec::with_capacity(catalogue.len());
        for id in catalogue {
            let record = stored.remove(&id).unwrap_or_else(|| ChannelRecord::new(id));
            let reconciler = ChannelReconciler::new(record, self.factory.clone());
            let (handle, task) = spawn_channel(reconciler, ctx.clone());
            handles.push(handle);
            tasks.push(task);
        }
        drop(ctx);

        tracing::debug!(
            receive = self.receive_channels,
            iq = self.iq_channels,
            microphone = self.microphone,
            transmit = self.transmit,
            "channel manager started"
        );
        let manager = ChannelManager::new(handles, tasks, writer, events);
        if self.announce_connectivity && self.session.is_connected() {
            manager.connectivity_changed(true).await?;
        }
        Ok(manager)
    }
}

/// Single writer draining persistence requests in order, so saves for one
/// channel are never reordered.
fn spawn_settings_writer(
    store: Option<Arc<dyn SettingsStore>>,
    mut rx: mpsc::UnboundedReceiver<ChannelRecord>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            let Some(store) = &store else {
                continue;
            };
            if let Err(e) = store.save(&record).await {
                tracing::warn!(channel = %record.id, error = %e, "failed to save channel settings");
            } else {
                tracing::trace!(channel = %record.id, "channel settings saved");
            }
        }
    })
}
