//! Audio sample buffers and the channel wrappers that carry them.
//!
//! All samples are normalized `f32` in `[-1.0, 1.0]`, interleaved. DAX audio
//! from the radio is already float32 stereo, so no conversion happens at this
//! boundary.
//!
//! Audio data flows through [`tokio::sync::mpsc`] channels wrapped in
//! [`AudioReceiver`] and [`AudioSender`]:
//!
//! - **Inbound** (Receive, Microphone, IQ): the radio session pushes
//!   [`AudioBuffer`]s into a channel; the bound sink drains it.
//! - **Outbound** (Transmit): the bound source pushes buffers through an
//!   [`AudioSender`]; the radio session frames and sends them.

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::types::SampleRate;

/// Depth of the bounded channel between the radio session and a local
/// endpoint, in buffers.
pub const AUDIO_CHANNEL_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// AudioStreamConfig
// ---------------------------------------------------------------------------

/// Sample rate and channel count of a DAX stream.
///
/// | Stream        | Sample Rate       | Channels |
/// |---------------|-------------------|----------|
/// | DAX audio     | 24,000 Hz         | 2        |
/// | DAX IQ        | 24k/48k/96k/192k  | 2 (I, Q) |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStreamConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioStreamConfig {
    /// Configuration of the Receive, Microphone and Transmit DAX audio streams.
    pub const fn dax_audio() -> Self {
        AudioStreamConfig {
            sample_rate: 24_000,
            channels: 2,
        }
    }

    /// Configuration of an IQ stream at the given rate.
    pub fn dax_iq(rate: SampleRate) -> Self {
        AudioStreamConfig {
            sample_rate: rate.hz(),
            channels: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioBuffer
// ---------------------------------------------------------------------------

/// A buffer of interleaved audio samples.
///
/// ```text
/// [L0, R0, L1, R1, ...]   // stereo audio
/// [I0, Q0, I1, Q1, ...]   // IQ
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        AudioBuffer {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Number of frames (one sample per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Duration of this buffer in seconds; `0.0` for a zero sample rate.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Multiply every sample by `factor`, clamping to `[-1.0, 1.0]`.
    pub fn scale(&mut self, factor: f32) {
        for s in &mut self.samples {
            *s = (*s * factor).clamp(-1.0, 1.0);
        }
    }
}

// ---------------------------------------------------------------------------
// AudioReceiver
// ---------------------------------------------------------------------------

/// Receives audio buffers of an inbound stream.
///
/// The stream ends when the sender side is dropped (the radio session
/// unregistered the stream or disconnected), at which point
/// [`recv()`](AudioReceiver::recv) returns `None`.
#[derive(Debug)]
pub struct AudioReceiver {
    rx: mpsc::Receiver<AudioBuffer>,
    config: AudioStreamConfig,
}

impl AudioReceiver {
    pub fn new(rx: mpsc::Receiver<AudioBuffer>, config: AudioStreamConfig) -> Self {
        AudioReceiver { rx, config }
    }

    /// Receive the next audio buffer, or `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<AudioBuffer> {
        self.rx.recv().await
    }

    /// Non-blocking receive, used by real-time audio callbacks.
    pub fn try_recv(&mut self) -> Option<AudioBuffer> {
        self.rx.try_recv().ok()
    }

    pub fn config(&self) -> &AudioStreamConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// AudioSender
// ---------------------------------------------------------------------------

/// Sends audio buffers into an outbound stream.
///
/// When the receiver side is dropped, [`send()`](AudioSender::send) returns
/// [`Error::StreamClosed`].
#[derive(Debug, Clone)]
pub struct AudioSender {
    tx: mpsc::Sender<AudioBuffer>,
    config: AudioStreamConfig,
}

impl AudioSender {
    pub fn new(tx: mpsc::Sender<AudioBuffer>, config: AudioStreamConfig) -> Self {
        AudioSender { tx, config }
    }

    pub async fn send(&self, buffer: AudioBuffer) -> Result<()> {
        self.tx.send(buffer).await.map_err(|_| Error::StreamClosed)
    }

    /// Non-blocking send. A full channel drops the buffer and still returns
    /// `Ok`; only a closed stream is an error.
    pub fn try_send(&self, buffer: AudioBuffer) -> Result<()> {
        match self.tx.try_send(buffer) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::StreamClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn config(&self) -> &AudioStreamConfig {
        &self.config
    }
}

/// Create a connected inbound pair: the sender half for the radio session and
/// the [`AudioReceiver`] handed to the local sink.
pub fn inbound_channel(config: AudioStreamConfig) -> (mpsc::Sender<AudioBuffer>, AudioReceiver) {
    let (tx, rx) = mpsc::channel(AUDIO_CHANNEL_DEPTH);
    (tx, AudioReceiver::new(rx, config))
}

/// Create a connected outbound pair: the [`AudioSender`] handed to the local
/// source and the receiver half drained by the radio session.
pub fn outbound_channel(config: AudioStreamConfig) -> (AudioSender, mpsc::Receiver<AudioBuffer>) {
    let (tx, rx) = mpsc::channel(AUDIO_CHANNEL_DEPTH);
    (AudioSender::new(tx, config), rx)
}
