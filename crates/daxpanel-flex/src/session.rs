//! [`FlexSession`]: a [`RadioSession`] over a SmartSDR connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use daxpanel_core::{
    AudioBuffer, AudioStreamConfig, ChannelKind, Error, RadioSession, Result, SessionEvent,
    StreamDirection, StreamGrant, StreamId, StreamRequest, StreamTap, inbound_channel,
    outbound_channel,
};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::client::SmartSdrClient;
use crate::codec;
use crate::vita49::{self, MAX_FRAMES_PER_PACKET};

/// Opens and closes DAX streams on a FlexRadio.
///
/// Inbound streams (Receive, Microphone, IQ) are routed from the client's
/// UDP socket into the granted [`AudioReceiver`](daxpanel_core::AudioReceiver).
/// The Transmit stream gets a pump task that frames whatever the granted
/// [`AudioSender`](daxpanel_core::AudioSender) carries as VITA-49 and sends
/// it to the radio.
pub struct FlexSession {
    client: Arc<SmartSdrClient>,
    transmit_pumps: Mutex<HashMap<StreamId, JoinHandle<()>>>,
}

impl FlexSession {
    pub fn new(client: SmartSdrClient) -> Self {
        FlexSession {
            client: Arc::new(client),
            transmit_pumps: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &SmartSdrClient {
        &self.client
    }

    /// Connection events, for following connectivity.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.client.subscribe()
    }

    /// Close the connection. Every open stream ends with it.
    pub async fn disconnect(&self) {
        for (_, pump) in self.transmit_pumps.lock().await.drain() {
            pump.abort();
        }
        self.client.disconnect().await;
    }

    async fn create_stream(&self, request: &StreamRequest) -> Result<StreamId> {
        let command = match request.kind {
            ChannelKind::Receive => codec::cmd_stream_create_dax_rx(request.channel),
            ChannelKind::Microphone => codec::cmd_stream_create_dax_mic(),
            ChannelKind::Transmit => codec::cmd_stream_create_dax_tx(),
            ChannelKind::Iq => codec::cmd_stream_create_dax_iq(request.channel),
        };
        let data = self.client.send_command(&command).await.map_err(refused)?;
        let id = StreamId(codec::parse_stream_handle(&data).map_err(refused)?);

        if let (ChannelKind::Iq, Some(rate)) = (request.kind, request.sample_rate) {
            let set_rate = codec::cmd_stream_set_iq_rate(id.0, rate);
            if let Err(e) = self.client.send_command(&set_rate).await {
                let remove = codec::cmd_stream_remove(id.0);
                if let Err(remove_err) = self.client.send_command(&remove).await {
                    tracing::warn!(
                        stream_id = %id,
                        error = %remove_err,
                        "failed to remove stream after rate setup failed"
                    );
                }
                return Err(refused(e));
            }
        }
        Ok(id)
    }
}

/// The radio refused: surface the reason as a failed request. Transport
/// failures keep their own variants.
fn refused(e: Error) -> Error {
    match e {
        Error::Protocol(reason) => Error::StreamRequestFailed(reason),
        other => other,
    }
}

#[async_trait]
impl RadioSession for FlexSession {
    async fn request_stream(&self, request: &StreamRequest) -> Result<StreamGrant> {
        if !self.client.is_connected() {
            return Err(Error::NotConnected);
        }
        let stream_id = self.create_stream(request).await?;
        tracing::debug!(kind = %request.kind, channel = request.channel, stream_id = %stream_id, "stream created");

        let tap = match request.kind.direction() {
            StreamDirection::Inbound => {
                let config = match request.sample_rate {
                    Some(rate) if request.kind == ChannelKind::Iq => AudioStreamConfig::dax_iq(rate),
                    _ => AudioStreamConfig::dax_audio(),
                };
                let (tx, rx) = inbound_channel(config);
                self.client.register_stream(stream_id, tx, config).await;
                StreamTap::Inbound(rx)
            }
            StreamDirection::Outbound => {
                let (tx, rx) = outbound_channel(AudioStreamConfig::dax_audio());
                let pump = tokio::spawn(transmit_pump(Arc::clone(&self.client), stream_id, rx));
                if let Some(old) = self.transmit_pumps.lock().await.insert(stream_id, pump) {
                    old.abort();
                }
                StreamTap::Outbound(tx)
            }
        };
        Ok(StreamGrant { stream_id, tap })
    }

    async fn release_stream(&self, stream_id: StreamId) -> Result<()> {
        self.client.unregister_stream(stream_id).await;
        if let Some(pump) = self.transmit_pumps.lock().await.remove(&stream_id) {
            pump.abort();
        }
        if !self.client.is_connected() {
            // The radio drops a client's streams with its connection.
            tracing::debug!(stream_id = %stream_id, "not connected, nothing to remove");
            return Ok(());
        }
        self.client
            .send_command(&codec::cmd_stream_remove(stream_id.0))
            .await?;
        tracing::debug!(stream_id = %stream_id, "stream removed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }
}

impl std::fmt::Debug for FlexSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlexSession")
            .field("client", &self.client)
            .finish()
    }
}

/// Frame Transmit audio as VITA-49 until the source side drops its sender.
async fn transmit_pump(
    client: Arc<SmartSdrClient>,
    stream_id: StreamId,
    mut rx: mpsc::Receiver<AudioBuffer>,
) {
    let mut count: u8 = 0;
    while let Some(buffer) = rx.recv().await {
        let stereo = match buffer.channels {
            2 => buffer.samples,
            1 => buffer.samples.iter().flat_map(|&s| [s, s]).collect(),
            n => {
                tracing::warn!(stream_id = %stream_id, channels = n, "unsupported channel count, buffer dropped");
                continue;
            }
        };
        for chunk in stereo.chunks(MAX_FRAMES_PER_PACKET * 2) {
            let packet = match vita49::build_dax_audio_packet(stream_id.0, count, chunk) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(stream_id = %stream_id, error = %e, "could not frame transmit audio");
                    break;
                }
            };
            count = count.wrapping_add(1) & 0x0F;
            if let Err(e) = client.send_datagram(&packet).await {
                tracing::trace!(stream_id = %stream_id, error = %e, "transmit packet not sent");
            }
        }
    }
    tracing::trace!(stream_id = %stream_id, "transmit pump ended");
}
