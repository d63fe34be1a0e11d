//! The [`RadioSession`] trait: stream requests and releases on the radio.

use async_trait::async_trait;

use crate::audio::{AudioReceiver, AudioSender};
use crate::error::Result;
use crate::types::{ChannelKind, SampleRate, StreamId};

/// A request for one DAX stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub kind: ChannelKind,
    /// DAX channel number (1-based). Ignored for Microphone and Transmit.
    pub channel: u8,
    /// Requested rate; only set for IQ streams.
    pub sample_rate: Option<SampleRate>,
}

/// The sample path a granted stream is attached to.
#[derive(Debug)]
pub enum StreamTap {
    /// Samples arriving from the radio.
    Inbound(AudioReceiver),
    /// Samples to be sent to the radio.
    Outbound(AudioSender),
}

/// A successfully opened stream.
#[derive(Debug)]
pub struct StreamGrant {
    pub stream_id: StreamId,
    pub tap: StreamTap,
}

/// Connection state changes published by a radio session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Handshake completed; streams may now be requested.
    Connected,
    /// The connection dropped or was closed.
    Disconnected,
}

impl SessionEvent {
    pub fn is_connected(self) -> bool {
        matches!(self, SessionEvent::Connected)
    }
}

/// A live session with a networked radio that can open and close DAX streams.
///
/// Implementations must be safe to call from many channel tasks at once.
#[async_trait]
pub trait RadioSession: Send + Sync {
    /// Open a stream matching `request`.
    ///
    /// Resolves once the radio has assigned a stream id and the sample path
    /// is registered. Fails with [`Error::StreamRequestFailed`],
    /// [`Error::NotConnected`] or a transport error.
    ///
    /// [`Error::StreamRequestFailed`]: crate::Error::StreamRequestFailed
    /// [`Error::NotConnected`]: crate::Error::NotConnected
    async fn request_stream(&self, request: &StreamRequest) -> Result<StreamGrant>;

    /// Release a stream. Best effort; callers log and ignore failures.
    async fn release_stream(&self, stream_id: StreamId) -> Result<()>;

    /// Whether the session is connected right now.
    fn is_connected(&self) -> bool;
}
