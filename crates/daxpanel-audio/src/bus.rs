//! In-process audio bus.
//!
//! [`AudioBus`] is a registry of virtual audio devices that doubles as the
//! panel's [`AudioDeviceDirectory`] and [`EndpointFactory`]. Output devices
//! fan whatever sinks play out to any number of taps; input devices accept
//! pushed buffers and hand them to the sources recording from them. It lets
//! the panel run headless and is what the channel tests bind against.
//!
//! Each bound endpoint owns one pump task. Switching device or gain reaches
//! the running pump through shared state, so the stream is never restarted.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use daxpanel_core::{
    AudioBuffer, AudioDevice, AudioDeviceDirectory, AudioEndpoint, AudioReceiver, AudioSender,
    DeviceRef, EndpointBinding, EndpointFactory, Error, Gain, Result, StreamDirection, StreamTap,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::gain::SharedGain;

/// Buffers an output tap or input device may queue before lagging.
const DEVICE_CAPACITY: usize = 64;

struct BusDevice {
    info: AudioDevice,
    bus: broadcast::Sender<AudioBuffer>,
}

type Devices = Arc<Mutex<BTreeMap<DeviceRef, BusDevice>>>;

fn lock(devices: &Devices) -> MutexGuard<'_, BTreeMap<DeviceRef, BusDevice>> {
    match devices.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Virtual audio devices plus the endpoints bound to them.
#[derive(Clone, Default)]
pub struct AudioBus {
    devices: Devices,
}

impl AudioBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an output device (a place Receive/IQ audio can play to).
    pub fn add_output(&self, id: &str, name: &str) {
        self.add(AudioDevice::output(id, name));
    }

    /// Register an input device (a place Transmit audio can come from).
    pub fn add_input(&self, id: &str, name: &str) {
        self.add(AudioDevice::input(id, name));
    }

    /// Register `device`, replacing any device with the same id.
    pub fn add(&self, device: AudioDevice) {
        let (bus, _) = broadcast::channel(DEVICE_CAPACITY);
        tracing::debug!(device = %device.id, name = %device.name, "audio device added");
        lock(&self.devices).insert(device.id.clone(), BusDevice { info: device, bus });
    }

    /// Unregister a device. Endpoints already bound to it keep running
    /// silently until the panel moves them.
    pub fn remove(&self, id: &DeviceRef) -> bool {
        let removed = lock(&self.devices).remove(id).is_some();
        if removed {
            tracing::debug!(device = %id, "audio device removed");
        }
        removed
    }

    /// Listen to everything played on output device `id`.
    pub fn tap_output(&self, id: &DeviceRef) -> Result<broadcast::Receiver<AudioBuffer>> {
        Ok(self.device_bus(id, StreamDirection::Inbound)?.subscribe())
    }

    /// Feed a buffer into input device `id`. Returns how many sources got it.
    pub fn push_input(&self, id: &DeviceRef, buffer: AudioBuffer) -> Result<usize> {
        let bus = self.device_bus(id, StreamDirection::Outbound)?;
        Ok(bus.send(buffer).unwrap_or(0))
    }

    /// The bus of device `id`, which must serve streams of `direction`.
    fn device_bus(
        &self,
        id: &DeviceRef,
        direction: StreamDirection,
    ) -> Result<broadcast::Sender<AudioBuffer>> {
        let devices = lock(&self.devices);
        match devices.get(id) {
            Some(d) if d.info.supports(direction) => Ok(d.bus.clone()),
            Some(_) => Err(Error::DeviceNotFound(format!(
                "{id} cannot serve {} streams",
                match direction {
                    StreamDirection::Inbound => "inbound",
                    StreamDirection::Outbound => "outbound",
                }
            ))),
            None => Err(Error::DeviceNotFound(id.to_string())),
        }
    }
}

impl std::fmt::Debug for AudioBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<_> = lock(&self.devices).keys().cloned().collect();
        f.debug_struct("AudioBus").field("devices", &ids).finish()
    }
}

impl AudioDeviceDirectory for AudioBus {
    fn list(&self) -> Result<Vec<AudioDevice>> {
        Ok(lock(&self.devices).values().map(|d| d.info.clone()).collect())
    }
}

impl EndpointFactory for AudioBus {
    fn bind(&self, binding: EndpointBinding) -> Result<Box<dyn AudioEndpoint>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Transport(format!("no async runtime for audio pump: {e}")))?;
        let direction = match &binding.tap {
            StreamTap::Inbound(_) => StreamDirection::Inbound,
            StreamTap::Outbound(_) => StreamDirection::Outbound,
        };
        let bus = self.device_bus(&binding.device, direction)?;
        let (route, route_rx) = watch::channel(bus);
        let gain = SharedGain::new(binding.gain);

        let pump = match binding.tap {
            StreamTap::Inbound(rx) => runtime.spawn(sink_pump(rx, route_rx, gain.clone())),
            StreamTap::Outbound(tx) => runtime.spawn(source_pump(tx, route_rx, gain.clone())),
        };
        tracing::debug!(
            channel = %binding.channel,
            stream_id = %binding.stream_id,
            device = %binding.device,
            "endpoint bound"
        );
        Ok(Box::new(BusEndpoint {
            bus: self.clone(),
            direction,
            device: binding.device,
            gain: binding.gain,
            shared_gain: gain,
            route,
            pump: Some(pump),
        }))
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

struct BusEndpoint {
    bus: AudioBus,
    direction: StreamDirection,
    device: DeviceRef,
    gain: Gain,
    shared_gain: SharedGain,
    route: watch::Sender<broadcast::Sender<AudioBuffer>>,
    pump: Option<JoinHandle<()>>,
}

impl AudioEndpoint for BusEndpoint {
    fn device(&self) -> &DeviceRef {
        &self.device
    }

    fn gain(&self) -> Gain {
        self.gain
    }

    fn set_device(&mut self, device: &DeviceRef) -> Result<()> {
        let bus = self.bus.device_bus(device, self.direction)?;
        self.route.send_replace(bus);
        tracing::debug!(from = %self.device, to = %device, "endpoint switched device");
        self.device = device.clone();
        Ok(())
    }

    fn set_gain(&mut self, gain: Gain) {
        self.gain = gain;
        self.shared_gain.set(gain);
    }

    fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
            tracing::trace!(device = %self.device, "endpoint stopped");
        }
    }

    fn is_stopped(&self) -> bool {
        self.pump.is_none()
    }
}

impl Drop for BusEndpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Play an inbound stream on whichever output device is current.
async fn sink_pump(
    mut rx: AudioReceiver,
    route: watch::Receiver<broadcast::Sender<AudioBuffer>>,
    gain: SharedGain,
) {
    while let Some(mut buffer) = rx.recv().await {
        gain.apply(&mut buffer);
        // No listeners is fine; the device just plays to nobody.
        let _ = route.borrow().send(buffer);
    }
    tracing::trace!("sink pump ended: stream closed");
}

/// Record from whichever input device is current into an outbound stream.
async fn source_pump(
    tx: AudioSender,
    mut route: watch::Receiver<broadcast::Sender<AudioBuffer>>,
    gain: SharedGain,
) {
    let mut input = route.borrow_and_update().subscribe();
    loop {
        tokio::select! {
            changed = route.changed() => {
                if changed.is_err() {
                    break;
                }
                input = route.borrow_and_update().subscribe();
            }
            received = input.recv() => match received {
                Ok(mut buffer) => {
                    gain.apply(&mut buffer);
                    if tx.send(buffer).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::trace!(skipped = n, "source pump lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Device unregistered; wait for a new route.
                    if route.changed().await.is_err() {
                        break;
                    }
                    input = route.borrow_and_update().subscribe();
                }
            },
        }
    }
    tracing::trace!("source pump ended");
}
