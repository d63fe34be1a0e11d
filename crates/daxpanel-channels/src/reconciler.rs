//! The channel reconciler: one channel's stream lifecycle state machine.
//!
//! [`ChannelReconciler::handle`] consumes one [`ChannelEvent`] at a time and
//! returns the [`Effect`]s the caller must carry out. All state changes
//! happen synchronously inside `handle`; the only asynchronous work (stream
//! requests and releases) is described by effects and performed elsewhere.
//! A request's outcome comes back later as [`ChannelEvent::StartCompleted`].
//!
//! # States
//!
//! ```text
//!            start                      grant bound
//!   Off ─────────────▶ Requesting ───────────────────▶ Streaming
//!    ▲                    │  ▲                            │
//!    │  stop (fence)      │  │ start                      │ stop (release)
//!    └────────────────────┘  └──────── Off ◀──────────────┘
//! ```
//!
//! Every start takes a new generation number. A completion whose generation
//! does not match the current `Requesting` state is stale: a granted stream
//! is released immediately and never bound.

use std::sync::Arc;

use daxpanel_core::{
    AudioEndpoint, ChannelId, ChannelRecord, DeviceRef, EndpointBinding, EndpointFactory, Gain,
    Result, SampleRate, StreamGrant, StreamId, StreamRequest, StreamStatus,
};

use crate::desired::should_stream;
use crate::kind::{KindDescriptor, descriptor};

// ---------------------------------------------------------------------------
// Events and effects
// ---------------------------------------------------------------------------

/// An input to a channel reconciler.
#[derive(Debug)]
pub enum ChannelEvent {
    /// The channel's control became visible.
    Appear,
    /// The channel's control was hidden; streaming is suspended until the
    /// next `Appear`.
    Disappear,
    /// Turn the channel on or off. Persisted when it changes.
    SetEnabled(bool),
    /// Rebind to another device, live if streaming. `None` stops the stream.
    SetDevice(Option<DeviceRef>),
    /// Applied to the bound endpoint without restarting the stream.
    SetGain(Gain),
    /// IQ only; a change restarts an open stream at the new rate.
    SetSampleRate(SampleRate),
    /// Persisted only. Never touches the stream.
    SetDetailsVisible(bool),
    /// The shared connectivity signal changed (or was re-announced).
    Connectivity(bool),
    /// The device directory no longer offers `device`. Clears the record's
    /// device only if it still refers to it.
    DeviceRemoved(DeviceRef),
    /// Outcome of the stream request issued for `generation`.
    StartCompleted {
        generation: u64,
        result: Result<StreamGrant>,
    },
}

/// Work the reconciler asks its driver to perform.
#[derive(Debug, PartialEq, Eq)]
pub enum Effect {
    /// Send a stream request; report the outcome as `StartCompleted` with the
    /// same generation.
    Request {
        generation: u64,
        request: StreamRequest,
    },
    /// Release a stream on the radio. Fire and forget.
    Release(StreamId),
    /// Store the record's new configuration.
    Persist(ChannelRecord),
    /// Raise a user-visible alert; the channel is already `Off`.
    Failed(String),
    /// The record's device was cleared because it disappeared.
    DeviceLost(DeviceRef),
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// The live resource: a stream id plus the endpoint moving its samples.
struct StreamHandle {
    stream_id: StreamId,
    endpoint: Box<dyn AudioEndpoint>,
}

enum ChannelState {
    Off,
    Requesting { generation: u64 },
    Streaming(StreamHandle),
}

/// One channel's reconciler.
///
/// Owns the channel's [`ChannelRecord`] and, while streaming, its stream
/// handle. Nothing else may read or change either.
pub struct ChannelReconciler {
    record: ChannelRecord,
    kind: &'static KindDescriptor,
    connected: bool,
    suspended: bool,
    state: ChannelState,
    generation: u64,
    factory: Arc<dyn EndpointFactory>,
}

impl ChannelReconciler {
    /// Create an idle reconciler for `record`, initially disconnected.
    pub fn new(record: ChannelRecord, factory: Arc<dyn EndpointFactory>) -> Self {
        ChannelReconciler {
            kind: descriptor(record.kind()),
            record,
            connected: false,
            suspended: false,
            state: ChannelState::Off,
            generation: 0,
            factory,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.record.id
    }

    pub fn record(&self) -> &ChannelRecord {
        &self.record
    }

    /// Derived stream status.
    pub fn status(&self) -> StreamStatus {
        match self.state {
            ChannelState::Off => StreamStatus::Off,
            ChannelState::Requesting { .. } => StreamStatus::Requesting,
            ChannelState::Streaming(_) => StreamStatus::Streaming,
        }
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        match &self.state {
            ChannelState::Streaming(handle) => Some(handle.stream_id),
            _ => None,
        }
    }

    /// Device the bound endpoint is currently playing to or capturing from.
    pub fn bound_device(&self) -> Option<&DeviceRef> {
        match &self.state {
            ChannelState::Streaming(handle) => Some(handle.endpoint.device()),
            _ => None,
        }
    }

    /// Whether a stream should exist, including view suspension.
    pub fn desired(&self) -> bool {
        !self.suspended && should_stream(&self.record, self.connected)
    }

    /// Process one event.
    pub fn handle(&mut self, event: ChannelEvent) -> Vec<Effect> {
        let mut fx = Vec::new();
        match event {
            ChannelEvent::Appear => {
                self.suspended = false;
                self.reconcile(&mut fx);
            }
            ChannelEvent::Disappear => {
                self.suspended = true;
                self.reconcile(&mut fx);
            }
            ChannelEvent::SetEnabled(enabled) => {
                if self.record.enabled != enabled {
                    self.record.enabled = enabled;
                    self.persist(&mut fx);
                }
                self.reconcile(&mut fx);
            }
            ChannelEvent::SetDevice(device) => {
                if self.record.device != device {
                    self.record.device = device;
                    self.persist(&mut fx);
                }
                self.reconcile(&mut fx);
            }
            ChannelEvent::SetGain(gain) => {
                if self.record.gain != gain {
                    self.record.gain = gain;
                    self.persist(&mut fx);
                }
                self.reconcile(&mut fx);
            }
            ChannelEvent::SetSampleRate(rate) => {
                if self.record.sample_rate != rate {
                    self.record.sample_rate = rate;
                    self.persist(&mut fx);
                    if self.kind.restarts_on_rate_change() {
                        // The radio negotiates the rate when the stream is
                        // created, so an open stream cannot follow the change.
                        self.stop(&mut fx);
                    }
                }
                self.reconcile(&mut fx);
            }
            ChannelEvent::SetDetailsVisible(visible) => {
                if self.record.details_visible != visible {
                    self.record.details_visible = visible;
                    self.persist(&mut fx);
                }
            }
            ChannelEvent::Connectivity(connected) => {
                self.connected = connected;
                self.reconcile(&mut fx);
            }
            ChannelEvent::DeviceRemoved(device) => {
                if self.record.device.as_ref() == Some(&device) {
                    tracing::debug!(channel = %self.record.id, device = %device, "device removed");
                    self.record.device = None;
                    self.persist(&mut fx);
                    fx.push(Effect::DeviceLost(device));
                    self.reconcile(&mut fx);
                }
            }
            ChannelEvent::StartCompleted { generation, result } => {
                self.start_completed(generation, result, &mut fx);
            }
        }
        fx
    }

    /// Stop any stream and cancel any pending request. Used on shutdown.
    pub fn shutdown(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        self.suspended = true;
        self.stop(&mut fx);
        fx
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn reconcile(&mut self, fx: &mut Vec<Effect>) {
        match (self.status(), self.desired()) {
            (StreamStatus::Off, true) => self.start(fx),
            (StreamStatus::Off, false) => {}
            (StreamStatus::Requesting, true) => {}
            (StreamStatus::Streaming, true) => self.live_update(fx),
            (StreamStatus::Requesting | StreamStatus::Streaming, false) => self.stop(fx),
        }
    }

    fn start(&mut self, fx: &mut Vec<Effect>) {
        self.generation += 1;
        let generation = self.generation;
        let request = (self.kind.build_request)(&self.record);
        tracing::debug!(
            channel = %self.record.id,
            generation,
            sample_rate = ?request.sample_rate,
            "requesting stream"
        );
        self.state = ChannelState::Requesting { generation };
        fx.push(Effect::Request {
            generation,
            request,
        });
    }

    fn stop(&mut self, fx: &mut Vec<Effect>) {
        match std::mem::replace(&mut self.state, ChannelState::Off) {
            ChannelState::Off => {}
            ChannelState::Requesting { generation } => {
                // Fence the in-flight request; its completion will be stale.
                self.generation += 1;
                tracing::debug!(channel = %self.record.id, generation, "cancelled pending stream request");
            }
            ChannelState::Streaming(mut handle) => {
                handle.endpoint.stop();
                let stream_id = handle.stream_id;
                drop(handle);
                self.generation += 1;
                tracing::debug!(channel = %self.record.id, stream_id = %stream_id, "stream stopped");
                fx.push(Effect::Release(stream_id));
            }
        }
    }

    /// Push the record's device and gain into the bound endpoint.
    fn live_update(&mut self, fx: &mut Vec<Effect>) {
        let ChannelState::Streaming(handle) = &mut self.state else {
            return;
        };
        let mut failure = None;
        if let Some(device) = &self.record.device {
            if handle.endpoint.device() != device {
                match handle.endpoint.set_device(device) {
                    Ok(()) => tracing::debug!(
                        channel = %self.record.id,
                        stream_id = %handle.stream_id,
                        device = %device,
                        "device switched"
                    ),
                    Err(e) => failure = Some(e.to_string()),
                }
            }
        }
        let gain = self.kind.endpoint_gain(&self.record);
        if failure.is_none() && handle.endpoint.gain() != gain {
            handle.endpoint.set_gain(gain);
            tracing::trace!(channel = %self.record.id, gain = %gain, "gain updated");
        }
        if let Some(reason) = failure {
            tracing::warn!(channel = %self.record.id, reason = %reason, "live device switch failed");
            self.stop(fx);
            self.fail(reason, fx);
        }
    }

    fn start_completed(&mut self, generation: u64, result: Result<StreamGrant>, fx: &mut Vec<Effect>) {
        let current = matches!(self.state, ChannelState::Requesting { generation: g } if g == generation);
        if !current {
            match result {
                Ok(grant) => {
                    tracing::debug!(
                        channel = %self.record.id,
                        generation,
                        stream_id = %grant.stream_id,
                        "stale stream grant, releasing"
                    );
                    fx.push(Effect::Release(grant.stream_id));
                }
                Err(e) => {
                    tracing::trace!(channel = %self.record.id, generation, error = %e, "stale stream failure ignored");
                }
            }
            return;
        }

        self.state = ChannelState::Off;
        let grant = match result {
            Ok(grant) => grant,
            Err(e) => {
                tracing::warn!(channel = %self.record.id, error = %e, "stream request failed");
                self.fail(e.to_string(), fx);
                return;
            }
        };

        let Some(device) = self.record.device.clone() else {
            // Unreachable while desired-state holds; recover instead of binding.
            fx.push(Effect::Release(grant.stream_id));
            return;
        };
        let stream_id = grant.stream_id;
        let binding = EndpointBinding {
            channel: self.record.id,
            stream_id,
            tap: grant.tap,
            device,
            gain: self.kind.endpoint_gain(&self.record),
        };
        match self.factory.bind(binding) {
            Ok(endpoint) => {
                tracing::debug!(channel = %self.record.id, stream_id = %stream_id, "stream bound");
                self.state = ChannelState::Streaming(StreamHandle { stream_id, endpoint });
            }
            Err(e) => {
                tracing::warn!(channel = %self.record.id, stream_id = %stream_id, error = %e, "endpoint bind failed");
                fx.push(Effect::Release(stream_id));
                self.fail(e.to_string(), fx);
            }
        }
    }

    /// Resolve a failure: the channel is already `Off`; clear the user's
    /// intent so nothing retries and raise the alert.
    fn fail(&mut self, reason: String, fx: &mut Vec<Effect>) {
        if self.record.enabled {
            self.record.enabled = false;
            self.persist(fx);
        }
        fx.push(Effect::Failed(reason));
    }

    fn persist(&self, fx: &mut Vec<Effect>) {
        fx.push(Effect::Persist(self.record.clone()));
    }
}
