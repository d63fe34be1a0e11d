//! Hardware audio endpoints via [`cpal`].
//!
//! [`CpalBackend`] lists the host's audio devices and binds DAX streams to
//! them. Devices are identified by their cpal name.
//!
//! A cpal stream is driven by callbacks on an OS audio thread and cannot move
//! between threads, so every endpoint owns a dedicated thread that opens the
//! stream, keeps it alive, and reopens it on another device when asked:
//!
//! - **Sink** (Receive, Microphone, IQ): output callback drains the inbound
//!   [`AudioReceiver`] with `try_recv`, playing silence when it is empty.
//! - **Source** (Transmit): input callback pushes captured frames into the
//!   outbound [`AudioSender`] with `try_send`, never blocking.
//!
//! Calls that wait for the endpoint thread to open or close a device go
//! through `blocking::wait_for`, so on a multi-threaded runtime the calling
//! worker's other tasks keep running. On a current-thread runtime the caller
//! is blocked until the device answers.

use std::collections::HashSet;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use daxpanel_core::{
    AudioBuffer, AudioDevice, AudioDeviceDirectory, AudioEndpoint, AudioReceiver, AudioSender,
    DeviceRef, EndpointBinding, EndpointFactory, Error, Gain, Result, StreamTap,
};

use crate::blocking::wait_for;
use crate::gain::SharedGain;

/// Host audio devices and endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        CpalBackend
    }
}

impl AudioDeviceDirectory for CpalBackend {
    fn list(&self) -> Result<Vec<AudioDevice>> {
        let host = cpal::default_host();
        let inputs: HashSet<String> = host
            .input_devices()
            .map(|devices| devices.filter_map(device_name).collect())
            .unwrap_or_default();
        let outputs: HashSet<String> = host
            .output_devices()
            .map(|devices| devices.filter_map(device_name).collect())
            .unwrap_or_default();

        let mut devices: Vec<AudioDevice> = inputs
            .union(&outputs)
            .map(|name| AudioDevice {
                id: DeviceRef::new(name.as_str()),
                name: name.clone(),
                is_input: inputs.contains(name),
                is_output: outputs.contains(name),
            })
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }
}

impl EndpointFactory for CpalBackend {
    fn bind(&self, binding: EndpointBinding) -> Result<Box<dyn AudioEndpoint>> {
        let tap = match binding.tap {
            StreamTap::Inbound(rx) => Tap::Sink(Arc::new(Mutex::new(rx))),
            StreamTap::Outbound(tx) => Tap::Source(tx),
        };
        let gain = SharedGain::new(binding.gain);
        let (commands, command_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let device = binding.device.clone();
        let thread_gain = gain.clone();
        let thread = std::thread::Builder::new()
            .name(format!("daxpanel-audio-{}", binding.channel))
            .spawn(move || endpoint_thread(tap, device, thread_gain, command_rx, ready_tx))?;
        wait_for(|| ready_rx.recv())
            .map_err(|_| Error::Transport("audio thread exited during start".into()))??;

        tracing::debug!(channel = %binding.channel, device = %binding.device, "hardware endpoint bound");
        Ok(Box::new(CpalEndpoint {
            device: binding.device,
            gain: binding.gain,
            shared_gain: gain,
            commands: Some(commands),
            thread: Some(thread),
        }))
    }
}

fn device_name(device: cpal::Device) -> Option<String> {
    device.description().ok().map(|desc| desc.name().to_string())
}

// ---------------------------------------------------------------------------
// Endpoint and its thread
// ---------------------------------------------------------------------------

enum Tap {
    Sink(Arc<Mutex<AudioReceiver>>),
    Source(AudioSender),
}

enum Command {
    SetDevice(DeviceRef, std_mpsc::Sender<Result<()>>),
    Stop,
}

struct CpalEndpoint {
    device: DeviceRef,
    gain: Gain,
    shared_gain: SharedGain,
    commands: Option<std_mpsc::Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl AudioEndpoint for CpalEndpoint {
    fn device(&self) -> &DeviceRef {
        &self.device
    }

    fn gain(&self) -> Gain {
        self.gain
    }

    fn set_device(&mut self, device: &DeviceRef) -> Result<()> {
        let commands = self.commands.as_ref().ok_or(Error::StreamClosed)?;
        let (reply, reply_rx) = std_mpsc::channel();
        commands
            .send(Command::SetDevice(device.clone(), reply))
            .map_err(|_| Error::StreamClosed)?;
        wait_for(|| reply_rx.recv()).map_err(|_| Error::StreamClosed)??;
        self.device = device.clone();
        Ok(())
    }

    fn set_gain(&mut self, gain: Gain) {
        self.gain = gain;
        self.shared_gain.set(gain);
    }

    fn stop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Stop);
        }
        if let Some(thread) = self.thread.take() {
            let _ = wait_for(|| thread.join());
            tracing::trace!(device = %self.device, "hardware endpoint stopped");
        }
    }

    fn is_stopped(&self) -> bool {
        self.thread.is_none()
    }
}

impl Drop for CpalEndpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

fn endpoint_thread(
    tap: Tap,
    device: DeviceRef,
    gain: SharedGain,
    commands: std_mpsc::Receiver<Command>,
    ready: std_mpsc::Sender<Result<()>>,
) {
    let mut stream = match open_stream(&tap, &device, &gain) {
        Ok(s) => s,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while let Ok(command) = commands.recv() {
        match command {
            Command::SetDevice(next, reply) => {
                // The old stream keeps playing if the new device cannot open.
                let result = open_stream(&tap, &next, &gain).map(|s| stream = s);
                if let Err(e) = &result {
                    tracing::warn!(device = %next, error = %e, "audio device switch failed");
                }
                let _ = reply.send(result);
            }
            Command::Stop => break,
        }
    }
    drop(stream);
}

fn find_device(name: &str, for_input: bool) -> Result<cpal::Device> {
    let host = cpal::default_host();
    let devices = if for_input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| Error::Transport(format!("failed to enumerate audio devices: {e}")))?;

    devices
        .into_iter()
        .find(|d| d.description().is_ok_and(|desc| desc.name() == name))
        .ok_or_else(|| Error::DeviceNotFound(name.to_string()))
}

fn open_stream(tap: &Tap, device: &DeviceRef, gain: &SharedGain) -> Result<cpal::Stream> {
    let for_input = matches!(tap, Tap::Source(_));
    let dev = find_device(device.as_str(), for_input)?;
    let supported = if for_input {
        dev.default_input_config()
    } else {
        dev.default_output_config()
    }
    .map_err(|e| Error::Transport(format!("no default config for {device}: {e}")))?;

    let format = supported.sample_format();
    let channels = usize::from(supported.channels());
    let sample_rate = supported.sample_rate();
    let config: cpal::StreamConfig = supported.into();

    let stream = match (tap, format) {
        (Tap::Sink(rx), SampleFormat::F32) => build_sink::<f32>(&dev, &config, rx, gain, channels),
        (Tap::Sink(rx), SampleFormat::I16) => build_sink::<i16>(&dev, &config, rx, gain, channels),
        (Tap::Source(tx), SampleFormat::F32) => {
            build_source::<f32>(&dev, &config, tx, gain, channels, sample_rate)
        }
        (Tap::Source(tx), SampleFormat::I16) => {
            build_source::<i16>(&dev, &config, tx, gain, channels, sample_rate)
        }
        (_, other) => Err(Error::Transport(format!("unsupported sample format: {other}"))),
    }?;
    stream
        .play()
        .map_err(|e| Error::Transport(format!("failed to start audio stream: {e}")))?;
    Ok(stream)
}

fn build_sink<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    rx: &Arc<Mutex<AudioReceiver>>,
    gain: &SharedGain,
    channels: usize,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let rx = Arc::clone(rx);
    let gain = gain.clone();
    let mut pending: Vec<f32> = Vec::new();
    let mut pos = 0;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels.max(1)) {
                    if pos + 1 >= pending.len() {
                        pending = next_samples(&rx, &gain);
                        pos = 0;
                    }
                    let (left, right) = match pending.get(pos..pos + 2) {
                        Some(&[l, r]) => {
                            pos += 2;
                            (l, r)
                        }
                        _ => (0.0, 0.0),
                    };
                    spread_stereo(left, right, frame);
                }
            },
            |err| tracing::error!(error = %err, "audio output stream error"),
            None,
        )
        .map_err(|e| Error::Transport(format!("failed to build output stream: {e}")))
}

fn next_samples(rx: &Mutex<AudioReceiver>, gain: &SharedGain) -> Vec<f32> {
    let Ok(mut rx) = rx.lock() else {
        return Vec::new();
    };
    let mut samples = rx.try_recv().map(|b| b.samples).unwrap_or_default();
    gain.apply_samples(&mut samples);
    samples
}

fn build_source<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: &AudioSender,
    gain: &SharedGain,
    channels: usize,
    sample_rate: u32,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let tx = tx.clone();
    let gain = gain.clone();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let captured: Vec<f32> = data.iter().map(|&s| f32::from_sample(s)).collect();
                let mut samples = downmix_to_stereo(&captured, channels);
                gain.apply_samples(&mut samples);
                // Full drops the buffer; Closed means the stream is being torn down.
                let _ = tx.try_send(AudioBuffer::new(samples, 2, sample_rate));
            },
            |err| tracing::error!(error = %err, "audio input stream error"),
            None,
        )
        .map_err(|e| Error::Transport(format!("failed to build input stream: {e}")))
}

/// Write one stereo frame into a device frame of any width. Mono devices
/// get the average; extra channels repeat left/right.
fn spread_stereo<T: Sample + FromSample<f32>>(left: f32, right: f32, frame: &mut [T]) {
    if frame.len() == 1 {
        frame[0] = T::from_sample((left + right) / 2.0);
        return;
    }
    for (i, out) in frame.iter_mut().enumerate() {
        *out = T::from_sample(if i % 2 == 0 { left } else { right });
    }
}

/// Interleaved frames of `channels` width to interleaved stereo. Mono is
/// duplicated; channels past the second are dropped.
fn downmix_to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    let mut out = Vec::with_capacity(samples.len() / channels * 2);
    for frame in samples.chunks_exact(channels) {
        let left = frame[0];
        let right = frame.get(1).copied().unwrap_or(left);
        out.push(left);
        out.push(right);
    }
    out
}
