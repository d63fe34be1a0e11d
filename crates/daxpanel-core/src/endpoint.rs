//! Local audio endpoints: the sink or source bound to a live stream.
//!
//! An endpoint is the only object that moves samples between a granted
//! stream's [`StreamTap`] and a local device. Its contract with the channel
//! reconciler:
//!
//! - device and gain may be changed at any time without interrupting audio;
//! - [`AudioEndpoint::stop`] is synchronous and safe to call repeatedly.

use crate::error::Result;
use crate::session::StreamTap;
use crate::types::{ChannelId, DeviceRef, Gain, StreamId};

/// Everything needed to bind a local endpoint to a granted stream.
#[derive(Debug)]
pub struct EndpointBinding {
    pub channel: ChannelId,
    pub stream_id: StreamId,
    pub tap: StreamTap,
    pub device: DeviceRef,
    pub gain: Gain,
}

/// A bound local sink (inbound streams) or source (outbound streams).
pub trait AudioEndpoint: Send {
    fn device(&self) -> &DeviceRef;

    fn gain(&self) -> Gain;

    /// Move audio to a different device without touching the stream.
    fn set_device(&mut self, device: &DeviceRef) -> Result<()>;

    fn set_gain(&mut self, gain: Gain);

    /// Detach from the stream and stop moving audio. Idempotent.
    fn stop(&mut self);

    fn is_stopped(&self) -> bool;
}

/// Creates endpoints for granted streams.
pub trait EndpointFactory: Send + Sync {
    /// Bind a new endpoint. Fails with [`Error::DeviceNotFound`] when the
    /// device is missing or has the wrong direction.
    ///
    /// [`Error::DeviceNotFound`]: crate::Error::DeviceNotFound
    fn bind(&self, binding: EndpointBinding) -> Result<Box<dyn AudioEndpoint>>;
}
