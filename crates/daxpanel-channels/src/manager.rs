//! The channel manager: owns every channel and fans out connectivity.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use daxpanel_core::{
    AudioDevice, ChannelId, ChannelKind, Error, PanelEvent, Result, SessionEvent,
};
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::reconciler::ChannelEvent;
use crate::task::ChannelHandle;

/// Owns every configured channel.
///
/// Channels are fixed at construction (see
/// [`ChannelManagerBuilder`](crate::ChannelManagerBuilder)) and never removed
/// while the manager lives. The manager holds the canonical connectivity
/// flag and is the only component that pushes it to channels.
pub struct ChannelManager {
    channels: Vec<ChannelHandle>,
    index: HashMap<ChannelId, usize>,
    connected: AtomicBool,
    /// Serializes connectivity fan-outs so two transitions never interleave.
    fanout: Mutex<()>,
    events: broadcast::Sender<PanelEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelManager {
    pub(crate) fn new(
        channels: Vec<ChannelHandle>,
        tasks: Vec<JoinHandle<()>>,
        writer: JoinHandle<()>,
        events: broadcast::Sender<PanelEvent>,
    ) -> Self {
        let index = channels
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id(), i))
            .collect();
        ChannelManager {
            channels,
            index,
            connected: AtomicBool::new(false),
            fanout: Mutex::new(()),
            events,
            tasks: Mutex::new(tasks),
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Look up a channel by id.
    pub fn channel(&self, id: ChannelId) -> Option<&ChannelHandle> {
        self.index.get(&id).map(|&i| &self.channels[i])
    }

    /// Look up a channel by id, failing with `InvalidParameter` if unknown.
    pub fn require(&self, id: ChannelId) -> Result<&ChannelHandle> {
        self.channel(id)
            .ok_or_else(|| Error::InvalidParameter(format!("no such channel: {id}")))
    }

    /// Channels of one kind, in index order.
    pub fn channels(&self, kind: ChannelKind) -> impl Iterator<Item = &ChannelHandle> {
        self.channels.iter().filter(move |c| c.kind() == kind)
    }

    /// Every channel in panel order (Tx, Mic, Rx, IQ).
    pub fn all(&self) -> &[ChannelHandle] {
        &self.channels
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }

    /// Apply a connectivity transition to every channel.
    ///
    /// Returns after every channel has reconciled, so on a disconnect all
    /// streams are already stopped when this resolves.
    /// [`PanelEvent::ConnectivityChanged`] is sent only if the flag changed.
    pub async fn connectivity_changed(&self, connected: bool) -> Result<()> {
        let _fanout = self.fanout.lock().await;
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        tracing::debug!(connected, channels = self.channels.len(), "connectivity fan-out");

        let acks = self
            .channels
            .iter()
            .map(|c| (c, c.post(ChannelEvent::Connectivity(connected))))
            .collect::<Vec<_>>();
        let result = await_acks(acks).await;

        if previous != connected {
            tracing::info!(connected, "radio connectivity changed");
            let _ = self
                .events
                .send(PanelEvent::ConnectivityChanged { connected });
        }
        result
    }

    /// Clear the device of every channel whose device is no longer offered
    /// (or no longer has the direction the channel needs).
    pub async fn devices_changed(&self, devices: &[AudioDevice]) -> Result<()> {
        let mut acks = Vec::new();
        for channel in &self.channels {
            let Some(device) = channel.record().device else {
                continue;
            };
            let direction = channel.kind().direction();
            let present = devices
                .iter()
                .any(|d| d.id == device && d.supports(direction));
            if !present {
                tracing::info!(channel = %channel.id(), device = %device, "audio device disappeared");
                acks.push((channel, channel.post(ChannelEvent::DeviceRemoved(device))));
            }
        }
        await_acks(acks).await
    }

    /// Follow a radio session's connection events until the session closes.
    pub fn spawn_connectivity_follower(
        self: &Arc<Self>,
        mut session_events: broadcast::Receiver<SessionEvent>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match session_events.recv().await {
                    Ok(event) => {
                        if let Err(e) = manager.connectivity_changed(event.is_connected()).await {
                            tracing::warn!(error = %e, "connectivity fan-out incomplete");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "session events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("session event stream closed");
                        let _ = manager.connectivity_changed(false).await;
                        return;
                    }
                }
            }
        })
    }

    /// Stop every channel, wait for all channel tasks, then flush pending
    /// settings writes.
    pub async fn shutdown(&self) {
        for channel in &self.channels {
            channel.shutdown().await;
        }
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        if let Some(writer) = self.writer.lock().await.take() {
            let _ = writer.await;
        }
        tracing::debug!("channel manager shut down");
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("channels", &self.channels)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Await every acknowledgement, reporting the first channel that failed.
async fn await_acks(acks: Vec<(&ChannelHandle, Result<oneshot::Receiver<()>>)>) -> Result<()> {
    let mut first_error = None;
    for (channel, ack) in acks {
        let outcome = match ack {
            Ok(done) => done.await.map_err(|_| channel.closed()),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            tracing::warn!(channel = %channel.id(), error = %e, "channel did not acknowledge");
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
