//! Scripted radio session.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use daxpanel_core::{
    AudioBuffer, AudioStreamConfig, Error, RadioSession, Result, StreamDirection, StreamGrant,
    StreamId, StreamRequest, StreamTap, inbound_channel, outbound_channel,
};
use tokio::sync::{mpsc, oneshot};

use crate::{WAIT_TIMEOUT, wait_until};

#[derive(Default)]
struct SessionLog {
    requests: Vec<StreamRequest>,
    releases: Vec<StreamId>,
    failure: Option<String>,
    hold: bool,
    held: Vec<oneshot::Sender<()>>,
    inbound: HashMap<StreamId, mpsc::Sender<AudioBuffer>>,
    outbound: HashMap<StreamId, mpsc::Receiver<AudioBuffer>>,
}

/// A [`RadioSession`] that grants every request with sequential stream ids.
///
/// Requests can be made to fail ([`fail_requests`](Self::fail_requests)) or
/// be held until released by the test ([`hold_requests`](Self::hold_requests)
/// and [`complete_held`](Self::complete_held)), which is how tests provoke
/// late completions.
pub struct MockRadioSession {
    log: Mutex<SessionLog>,
    connected: AtomicBool,
    next_id: AtomicU32,
}

impl MockRadioSession {
    /// A disconnected session whose first stream id is `1`.
    pub fn new() -> Self {
        Self::with_first_stream_id(1)
    }

    pub fn with_first_stream_id(first: u32) -> Self {
        MockRadioSession {
            log: Mutex::new(SessionLog::default()),
            connected: AtomicBool::new(false),
            next_id: AtomicU32::new(first),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Fail every subsequent request with `reason`, or stop failing with `None`.
    pub fn fail_requests(&self, reason: Option<&str>) {
        self.lock().failure = reason.map(str::to_string);
    }

    /// Hold subsequent requests until [`complete_held`](Self::complete_held).
    pub fn hold_requests(&self, hold: bool) {
        self.lock().hold = hold;
    }

    /// Let every held request proceed. Returns how many were released.
    pub fn complete_held(&self) -> usize {
        let held: Vec<_> = self.lock().held.drain(..).collect();
        let n = held.len();
        for gate in held {
            let _ = gate.send(());
        }
        n
    }

    pub fn held_count(&self) -> usize {
        self.lock().held.len()
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.lock().requests.clone()
    }

    pub fn releases(&self) -> Vec<StreamId> {
        self.lock().releases.clone()
    }

    /// Push a buffer into a granted inbound stream, as the radio would.
    pub fn push_inbound(&self, stream_id: StreamId, buffer: AudioBuffer) -> Result<()> {
        let tx = self
            .lock()
            .inbound
            .get(&stream_id)
            .cloned()
            .ok_or(Error::StreamClosed)?;
        tx.try_send(buffer).map_err(|_| Error::StreamClosed)
    }

    /// Take the radio side of a granted outbound stream.
    pub fn take_outbound(&self, stream_id: StreamId) -> Option<mpsc::Receiver<AudioBuffer>> {
        self.lock().outbound.remove(&stream_id)
    }

    pub async fn wait_for_requests(&self, n: usize) -> bool {
        self.wait_for_requests_within(n, WAIT_TIMEOUT).await
    }

    pub async fn wait_for_requests_within(&self, n: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.lock().requests.len() >= n).await
    }

    pub async fn wait_for_releases(&self, n: usize) -> bool {
        wait_until(WAIT_TIMEOUT, || self.lock().releases.len() >= n).await
    }

    pub async fn wait_for_held(&self, n: usize) -> bool {
        wait_until(WAIT_TIMEOUT, || self.lock().held.len() >= n).await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionLog> {
        match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MockRadioSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioSession for MockRadioSession {
    async fn request_stream(&self, request: &StreamRequest) -> Result<StreamGrant> {
        let gate = {
            let mut log = self.lock();
            log.requests.push(*request);
            if log.hold {
                let (tx, rx) = oneshot::channel();
                log.held.push(tx);
                Some(rx)
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if let Some(reason) = self.lock().failure.clone() {
            return Err(Error::StreamRequestFailed(reason));
        }

        let stream_id = StreamId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let config = match request.sample_rate {
            Some(rate) => AudioStreamConfig::dax_iq(rate),
            None => AudioStreamConfig::dax_audio(),
        };
        let tap = match request.kind.direction() {
            StreamDirection::Inbound => {
                let (tx, rx) = inbound_channel(config);
                self.lock().inbound.insert(stream_id, tx);
                StreamTap::Inbound(rx)
            }
            StreamDirection::Outbound => {
                let (sender, rx) = outbound_channel(config);
                self.lock().outbound.insert(stream_id, rx);
                StreamTap::Outbound(sender)
            }
        };
        Ok(StreamGrant { stream_id, tap })
    }

    async fn release_stream(&self, stream_id: StreamId) -> Result<()> {
        let mut log = self.lock();
        log.releases.push(stream_id);
        log.inbound.remove(&stream_id);
        log.outbound.remove(&stream_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
