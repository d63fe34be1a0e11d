//! Per-channel actor.
//!
//! Each channel runs one task that owns its [`ChannelReconciler`] and drains
//! an unbounded mailbox. Events for one channel are therefore handled
//! strictly in arrival order, while different channels run concurrently.
//! Stream requests run in spawned tasks whose completions are posted back
//! into the same mailbox.

use std::sync::Arc;

use daxpanel_core::{
    ChannelId, ChannelKind, ChannelRecord, DeviceRef, Error, Gain, PanelEvent, RadioSession,
    Result, SampleRate, StreamId, StreamStatus,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::reconciler::{ChannelEvent, ChannelReconciler, Effect};

/// Point-in-time view of a channel, published after every event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub record: ChannelRecord,
    pub status: StreamStatus,
    pub stream_id: Option<StreamId>,
}

pub(crate) enum ChannelCommand {
    Event {
        event: ChannelEvent,
        ack: Option<oneshot::Sender<()>>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

// ---------------------------------------------------------------------------
// ChannelHandle
// ---------------------------------------------------------------------------

/// Cheap, cloneable handle to a running channel.
///
/// Every mutator resolves once the channel has processed the change, so a
/// caller can read [`snapshot`](Self::snapshot) immediately afterwards and
/// see its effect (a started request shows as `Requesting`).
#[derive(Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    tx: mpsc::UnboundedSender<ChannelCommand>,
    snapshot: watch::Receiver<ChannelSnapshot>,
}

impl ChannelHandle {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.id.kind
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn record(&self) -> ChannelRecord {
        self.snapshot.borrow().record.clone()
    }

    pub fn status(&self) -> StreamStatus {
        self.snapshot.borrow().status
    }

    /// Subscribe to snapshot updates.
    pub fn watch(&self) -> watch::Receiver<ChannelSnapshot> {
        self.snapshot.clone()
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.send(ChannelEvent::SetEnabled(enabled)).await
    }

    pub async fn set_device(&self, device: Option<DeviceRef>) -> Result<()> {
        self.send(ChannelEvent::SetDevice(device)).await
    }

    /// Set the gain. IQ channels have no gain.
    pub async fn set_gain(&self, gain: Gain) -> Result<()> {
        if !self.kind().uses_gain() {
            return Err(Error::Unsupported(format!("{} channels have no gain", self.kind())));
        }
        self.send(ChannelEvent::SetGain(gain)).await
    }

    /// Set the sample rate. Only IQ channels have a selectable rate.
    pub async fn set_sample_rate(&self, rate: SampleRate) -> Result<()> {
        if !self.kind().uses_sample_rate() {
            return Err(Error::Unsupported(format!(
                "{} channels have a fixed sample rate",
                self.kind()
            )));
        }
        self.send(ChannelEvent::SetSampleRate(rate)).await
    }

    pub async fn set_details_visible(&self, visible: bool) -> Result<()> {
        self.send(ChannelEvent::SetDetailsVisible(visible)).await
    }

    /// The channel's control became visible.
    pub async fn appear(&self) -> Result<()> {
        self.send(ChannelEvent::Appear).await
    }

    /// The channel's control was hidden. Any stream stops until `appear`.
    pub async fn disappear(&self) -> Result<()> {
        self.send(ChannelEvent::Disappear).await
    }

    async fn send(&self, event: ChannelEvent) -> Result<()> {
        self.post(event)?.await.map_err(|_| self.closed())
    }

    /// Queue an event and return the acknowledgement without waiting on it.
    pub(crate) fn post(&self, event: ChannelEvent) -> Result<oneshot::Receiver<()>> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(ChannelCommand::Event {
                event,
                ack: Some(ack),
            })
            .map_err(|_| self.closed())?;
        Ok(done)
    }

    pub(crate) async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(ChannelCommand::Shutdown { ack }).is_ok() {
            let _ = done.await;
        }
    }

    pub(crate) fn closed(&self) -> Error {
        Error::ChannelClosed(self.id.to_string())
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ChannelTask
// ---------------------------------------------------------------------------

/// Shared plumbing handed to every channel task.
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub session: Arc<dyn RadioSession>,
    pub persist: mpsc::UnboundedSender<ChannelRecord>,
    pub events: broadcast::Sender<PanelEvent>,
}

struct ChannelTask {
    reconciler: ChannelReconciler,
    mailbox: mpsc::UnboundedReceiver<ChannelCommand>,
    mailbox_tx: mpsc::WeakUnboundedSender<ChannelCommand>,
    snapshot: watch::Sender<ChannelSnapshot>,
    ctx: TaskContext,
}

/// Spawn the actor for `reconciler` and return its handle.
pub(crate) fn spawn_channel(
    reconciler: ChannelReconciler,
    ctx: TaskContext,
) -> (ChannelHandle, JoinHandle<()>) {
    let id = reconciler.id();
    let (tx, mailbox) = mpsc::unbounded_channel();
    let (snapshot, snapshot_rx) = watch::channel(snapshot_of(&reconciler));
    let task = ChannelTask {
        reconciler,
        mailbox,
        mailbox_tx: tx.downgrade(),
        snapshot,
        ctx,
    };
    let join = tokio::spawn(task.run());
    let handle = ChannelHandle {
        id,
        tx,
        snapshot: snapshot_rx,
    };
    (handle, join)
}

fn snapshot_of(reconciler: &ChannelReconciler) -> ChannelSnapshot {
    ChannelSnapshot {
        record: reconciler.record().clone(),
        status: reconciler.status(),
        stream_id: reconciler.stream_id(),
    }
}

impl ChannelTask {
    async fn run(mut self) {
        let id = self.reconciler.id();
        tracing::trace!(channel = %id, "channel task started");
        while let Some(command) = self.mailbox.recv().await {
            match command {
                ChannelCommand::Event { event, ack } => {
                    let effects = self.reconciler.handle(event);
                    self.apply(effects);
                    self.publish();
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                }
                ChannelCommand::Shutdown { ack } => {
                    self.mailbox.close();
                    self.stop_all();
                    self.drain();
                    let _ = ack.send(());
                    tracing::trace!(channel = %id, "channel task shut down");
                    return;
                }
            }
        }
        // Every handle is gone.
        self.stop_all();
        tracing::trace!(channel = %id, "channel task ended");
    }

    fn stop_all(&mut self) {
        let effects = self.reconciler.shutdown();
        self.apply(effects);
        self.publish();
    }

    /// Handle whatever was queued before the mailbox closed. Late grants are
    /// released because the reconciler is already off and suspended.
    fn drain(&mut self) {
        while let Ok(command) = self.mailbox.try_recv() {
            match command {
                ChannelCommand::Event { event, ack } => {
                    let effects = self.reconciler.handle(event);
                    self.apply(effects);
                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                }
                ChannelCommand::Shutdown { ack } => {
                    let _ = ack.send(());
                }
            }
        }
        self.publish();
    }

    fn apply(&self, effects: Vec<Effect>) {
        let id = self.reconciler.id();
        for effect in effects {
            match effect {
                Effect::Request {
                    generation,
                    request,
                } => self.spawn_request(generation, request),
                Effect::Release(stream_id) => {
                    let session = self.ctx.session.clone();
                    tokio::spawn(async move {
                        if let Err(e) = session.release_stream(stream_id).await {
                            tracing::warn!(channel = %id, stream_id = %stream_id, error = %e, "stream release failed");
                        }
                    });
                }
                Effect::Persist(record) => {
                    if self.ctx.persist.send(record).is_err() {
                        tracing::warn!(channel = %id, "settings writer gone, change not saved");
                    }
                }
                Effect::Failed(reason) => {
                    tracing::error!(channel = %id, reason = %reason, "channel stream failed");
                    let _ = self.ctx.events.send(PanelEvent::StreamFailed {
                        channel: id,
                        reason,
                    });
                }
                Effect::DeviceLost(device) => {
                    let _ = self.ctx.events.send(PanelEvent::DeviceLost {
                        channel: id,
                        device,
                    });
                }
            }
        }
    }

    fn spawn_request(&self, generation: u64, request: daxpanel_core::StreamRequest) {
        let id = self.reconciler.id();
        let session = self.ctx.session.clone();
        let mailbox = self.mailbox_tx.clone();
        tokio::spawn(async move {
            let result = session.request_stream(&request).await;
            let command = ChannelCommand::Event {
                event: ChannelEvent::StartCompleted { generation, result },
                ack: None,
            };
            let undelivered = match mailbox.upgrade() {
                Some(tx) => tx.send(command).err().map(|e| e.0),
                None => Some(command),
            };
            // The channel is gone; a granted stream has no owner left.
            if let Some(ChannelCommand::Event {
                event:
                    ChannelEvent::StartCompleted {
                        result: Ok(grant), ..
                    },
                ..
            }) = undelivered
            {
                tracing::debug!(channel = %id, stream_id = %grant.stream_id, "releasing orphaned stream");
                let _ = session.release_stream(grant.stream_id).await;
            }
        });
    }

    fn publish(&self) {
        let next = snapshot_of(&self.reconciler);
        let status = next.status;
        let mut status_changed = false;
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            status_changed = current.status != status;
            *current = next;
            true
        });
        if status_changed {
            let channel = self.reconciler.id();
            tracing::debug!(channel = %channel, status = %status, "status changed");
            let _ = self.ctx.events.send(PanelEvent::StatusChanged { channel, status });
        }
    }
}
