//! Recording endpoint factory.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use daxpanel_core::{
    AudioEndpoint, ChannelId, DeviceRef, EndpointBinding, EndpointFactory, Error, Gain, Result,
    StreamId, StreamTap,
};

use crate::{WAIT_TIMEOUT, wait_until};

/// Everything the mock endpoints have been asked to do, in order.
#[derive(Debug, Default, Clone)]
pub struct EndpointLog {
    /// `(channel, stream id, device, gain)` for every successful bind.
    pub binds: Vec<(ChannelId, StreamId, DeviceRef, Gain)>,
    /// `(stream id, new device)` for every live device switch.
    pub device_changes: Vec<(StreamId, DeviceRef)>,
    /// `(stream id, new gain)` for every live gain change.
    pub gain_changes: Vec<(StreamId, Gain)>,
    /// Stream ids whose endpoint was stopped (first stop only).
    pub stops: Vec<StreamId>,
    /// Stream ids whose endpoint saw `stop()` more than once.
    pub repeated_stops: Vec<StreamId>,
}

#[derive(Default)]
struct FactoryState {
    log: EndpointLog,
    missing: HashSet<DeviceRef>,
    bind_failure: Option<String>,
}

type Shared = Arc<Mutex<FactoryState>>;

fn lock(state: &Shared) -> std::sync::MutexGuard<'_, FactoryState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// An [`EndpointFactory`] whose endpoints only record what happens to them.
#[derive(Clone, Default)]
pub struct MockEndpointFactory {
    state: Shared,
}

impl MockEndpointFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `device` as absent: binds and live switches to it fail.
    pub fn remove_device(&self, device: impl Into<DeviceRef>) {
        lock(&self.state).missing.insert(device.into());
    }

    /// Make every bind fail with `reason`, or succeed again with `None`.
    pub fn fail_binds(&self, reason: Option<&str>) {
        lock(&self.state).bind_failure = reason.map(str::to_string);
    }

    pub fn log(&self) -> EndpointLog {
        lock(&self.state).log.clone()
    }

    pub async fn wait_for_binds(&self, n: usize) -> bool {
        wait_until(WAIT_TIMEOUT, || lock(&self.state).log.binds.len() >= n).await
    }
}

impl EndpointFactory for MockEndpointFactory {
    fn bind(&self, binding: EndpointBinding) -> Result<Box<dyn AudioEndpoint>> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.bind_failure {
            return Err(Error::Transport(reason.clone()));
        }
        if state.missing.contains(&binding.device) {
            return Err(Error::DeviceNotFound(binding.device.to_string()));
        }
        state.log.binds.push((
            binding.channel,
            binding.stream_id,
            binding.device.clone(),
            binding.gain,
        ));
        Ok(Box::new(MockEndpoint {
            stream_id: binding.stream_id,
            device: binding.device,
            gain: binding.gain,
            stopped: false,
            _tap: binding.tap,
            state: self.state.clone(),
        }))
    }
}

struct MockEndpoint {
    stream_id: StreamId,
    device: DeviceRef,
    gain: Gain,
    stopped: bool,
    _tap: StreamTap,
    state: Shared,
}

impl AudioEndpoint for MockEndpoint {
    fn device(&self) -> &DeviceRef {
        &self.device
    }

    fn gain(&self) -> Gain {
        self.gain
    }

    fn set_device(&mut self, device: &DeviceRef) -> Result<()> {
        let mut state = lock(&self.state);
        if state.missing.contains(device) {
            return Err(Error::DeviceNotFound(device.to_string()));
        }
        state.log.device_changes.push((self.stream_id, device.clone()));
        self.device = device.clone();
        Ok(())
    }

    fn set_gain(&mut self, gain: Gain) {
        lock(&self.state).log.gain_changes.push((self.stream_id, gain));
        self.gain = gain;
    }

    fn stop(&mut self) {
        let mut state = lock(&self.state);
        if self.stopped {
            state.log.repeated_stops.push(self.stream_id);
            return;
        }
        self.stopped = true;
        state.log.stops.push(self.stream_id);
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daxpanel_core::{AudioStreamConfig, inbound_channel};

    fn binding(device: &str) -> EndpointBinding {
        let (_tx, rx) = inbound_channel(AudioStreamConfig::dax_audio());
        EndpointBinding {
            channel: ChannelId::receive(1),
            stream_id: StreamId(5),
            tap: StreamTap::Inbound(rx),
            device: DeviceRef::new(device),
            gain: Gain::default(),
        }
    }

    #[test]
    fn records_lifecycle() {
        let factory = MockEndpointFactory::new();
        let mut ep = factory.bind(binding("spk")).unwrap();
        ep.set_device(&DeviceRef::new("hdmi")).unwrap();
        ep.set_gain(Gain::new(80).unwrap());
        ep.stop();
        ep.stop();

        let log = factory.log();
        assert_eq!(log.binds.len(), 1);
        assert_eq!(log.device_changes, vec![(StreamId(5), DeviceRef::new("hdmi"))]);
        assert_eq!(log.gain_changes.len(), 1);
        assert_eq!(log.stops, vec![StreamId(5)]);
        assert_eq!(log.repeated_stops, vec![StreamId(5)]);
        assert!(ep.is_stopped());
    }

    #[test]
    fn missing_device_fails() {
        let factory = MockEndpointFactory::new();
        factory.remove_device("gone");
        assert!(matches!(
            factory.bind(binding("gone")),
            Err(Error::DeviceNotFound(_))
        ));
        let mut ep = factory.bind(binding("spk")).unwrap();
        assert!(ep.set_device(&DeviceRef::new("gone")).is_err());
        assert_eq!(ep.device(), &DeviceRef::new("spk"));
    }

    #[test]
    fn bind_failure_mode() {
        let factory = MockEndpointFactory::new();
        factory.fail_binds(Some("audio host busy"));
        assert!(factory.bind(binding("spk")).is_err());
        factory.fail_binds(None);
        assert!(factory.bind(binding("spk")).is_ok());
    }
}
