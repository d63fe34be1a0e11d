//! Shared types used across all daxpanel crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// ChannelKind
// ---------------------------------------------------------------------------

/// The four kinds of DAX channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Demodulated receive audio from a slice, played on an output device.
    Receive,
    /// The radio's microphone return, played on an output device.
    Microphone,
    /// Transmit audio captured from an input device and sent to the radio.
    Transmit,
    /// Raw I/Q samples from a panadapter, played on an output device.
    Iq,
}

impl ChannelKind {
    /// All kinds, in panel display order.
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Transmit,
        ChannelKind::Microphone,
        ChannelKind::Receive,
        ChannelKind::Iq,
    ];

    /// Which way audio flows for this kind.
    pub fn direction(self) -> StreamDirection {
        match self {
            ChannelKind::Transmit => StreamDirection::Outbound,
            ChannelKind::Receive | ChannelKind::Microphone | ChannelKind::Iq => {
                StreamDirection::Inbound
            }
        }
    }

    /// Whether the gain field is meaningful for this kind.
    pub fn uses_gain(self) -> bool {
        !matches!(self, ChannelKind::Iq)
    }

    /// Whether the sample rate field is meaningful for this kind.
    pub fn uses_sample_rate(self) -> bool {
        matches!(self, ChannelKind::Iq)
    }

    /// Short lowercase prefix used in channel identifiers.
    pub fn prefix(self) -> &'static str {
        match self {
            ChannelKind::Receive => "rx",
            ChannelKind::Microphone => "mic",
            ChannelKind::Transmit => "tx",
            ChannelKind::Iq => "iq",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Receive => "Rx",
            ChannelKind::Microphone => "Mic",
            ChannelKind::Transmit => "Tx",
            ChannelKind::Iq => "IQ",
        };
        f.write_str(name)
    }
}

/// Parses the lowercase prefix (`rx`, `mic`, `tx`, `iq`).
impl FromStr for ChannelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rx" => Ok(ChannelKind::Receive),
            "mic" => Ok(ChannelKind::Microphone),
            "tx" => Ok(ChannelKind::Transmit),
            "iq" => Ok(ChannelKind::Iq),
            other => Err(Error::InvalidParameter(format!(
                "unknown channel kind: {other:?}"
            ))),
        }
    }
}

/// Direction of audio flow relative to the local machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Radio to local output device (sink).
    Inbound,
    /// Local input device to radio (source).
    Outbound,
}

// ---------------------------------------------------------------------------
// ChannelId
// ---------------------------------------------------------------------------

/// Stable identifier of a channel: its kind plus a 1-based index.
///
/// Formats as `rx1`, `iq3`, `mic1`, `tx1` and parses from the same form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId {
    pub kind: ChannelKind,
    pub index: u8,
}

impl ChannelId {
    pub const fn new(kind: ChannelKind, index: u8) -> Self {
        ChannelId { kind, index }
    }

    pub const fn receive(index: u8) -> Self {
        ChannelId::new(ChannelKind::Receive, index)
    }

    pub const fn iq(index: u8) -> Self {
        ChannelId::new(ChannelKind::Iq, index)
    }

    pub const fn microphone() -> Self {
        ChannelId::new(ChannelKind::Microphone, 1)
    }

    pub const fn transmit() -> Self {
        ChannelId::new(ChannelKind::Transmit, 1)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.index)
    }
}

impl FromStr for ChannelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        let split = s
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(s.len());
        let (prefix, digits) = s.split_at(split);
        let kind: ChannelKind = prefix.parse()?;
        let index = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u8>()
                .map_err(|_| Error::InvalidParameter(format!("invalid channel index: {digits}")))?
        };
        if index == 0 {
            return Err(Error::InvalidParameter(
                "channel indices start at 1".into(),
            ));
        }
        Ok(ChannelId::new(kind, index))
    }
}

// ---------------------------------------------------------------------------
// StreamId
// ---------------------------------------------------------------------------

/// Opaque stream identifier issued by the radio session.
///
/// For SmartSDR this is also the VITA-49 stream id carried in every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

// ---------------------------------------------------------------------------
// DeviceRef
// ---------------------------------------------------------------------------

/// Opaque reference to a local audio device (its stable unique id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceRef(String);

impl DeviceRef {
    pub fn new(uid: impl Into<String>) -> Self {
        DeviceRef(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceRef {
    fn from(s: &str) -> Self {
        DeviceRef::new(s)
    }
}

// ---------------------------------------------------------------------------
// Gain
// ---------------------------------------------------------------------------

/// Channel gain in percent, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Gain(u8);

impl Gain {
    pub const MAX: Gain = Gain(100);
    pub const MIN: Gain = Gain(0);

    /// Create a gain, rejecting values above 100.
    pub fn new(percent: u8) -> Result<Self> {
        if percent > 100 {
            return Err(Error::InvalidParameter(format!(
                "gain {percent} out of range 0-100"
            )));
        }
        Ok(Gain(percent))
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Linear scale factor in `[0.0, 1.0]` applied to samples.
    pub fn linear(self) -> f32 {
        self.0 as f32 / 100.0
    }
}

impl Default for Gain {
    fn default() -> Self {
        Gain(50)
    }
}

impl TryFrom<u8> for Gain {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Gain::new(value)
    }
}

impl From<Gain> for u8 {
    fn from(gain: Gain) -> u8 {
        gain.0
    }
}

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

// ---------------------------------------------------------------------------
// SampleRate
// ---------------------------------------------------------------------------

/// IQ stream sample rates offered by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleRate {
    #[default]
    Hz24k,
    Hz48k,
    Hz96k,
    Hz192k,
}

impl SampleRate {
    pub const ALL: [SampleRate; 4] = [
        SampleRate::Hz24k,
        SampleRate::Hz48k,
        SampleRate::Hz96k,
        SampleRate::Hz192k,
    ];

    pub fn hz(self) -> u32 {
        match self {
            SampleRate::Hz24k => 24_000,
            SampleRate::Hz48k => 48_000,
            SampleRate::Hz96k => 96_000,
            SampleRate::Hz192k => 192_000,
        }
    }

    pub fn from_hz(hz: u32) -> Result<Self> {
        SampleRate::ALL
            .into_iter()
            .find(|r| r.hz() == hz)
            .ok_or_else(|| Error::InvalidParameter(format!("unsupported IQ sample rate: {hz}")))
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = Error;

    fn try_from(hz: u32) -> Result<Self> {
        SampleRate::from_hz(hz)
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> u32 {
        rate.hz()
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kHz", self.hz() / 1000)
    }
}

// ---------------------------------------------------------------------------
// StreamStatus
// ---------------------------------------------------------------------------

/// Observable stream status of a channel.
///
/// Derived from the reconciler's internal state and never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamStatus {
    #[default]
    Off,
    Requesting,
    Streaming,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamStatus::Off => "Off",
            StreamStatus::Requesting => "Requesting",
            StreamStatus::Streaming => "Streaming",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_direction() {
        assert_eq!(ChannelKind::Transmit.direction(), StreamDirection::Outbound);
        assert_eq!(ChannelKind::Receive.direction(), StreamDirection::Inbound);
        assert_eq!(ChannelKind::Microphone.direction(), StreamDirection::Inbound);
        assert_eq!(ChannelKind::Iq.direction(), StreamDirection::Inbound);
    }

    #[test]
    fn kind_field_relevance() {
        assert!(ChannelKind::Receive.uses_gain());
        assert!(!ChannelKind::Iq.uses_gain());
        assert!(ChannelKind::Iq.uses_sample_rate());
        assert!(!ChannelKind::Transmit.uses_sample_rate());
    }

    #[test]
    fn channel_id_display() {
        assert_eq!(ChannelId::receive(2).to_string(), "rx2");
        assert_eq!(ChannelId::iq(4).to_string(), "iq4");
        assert_eq!(ChannelId::microphone().to_string(), "mic1");
        assert_eq!(ChannelId::transmit().to_string(), "tx1");
    }

    #[test]
    fn kind_parse() {
        assert_eq!("rx".parse::<ChannelKind>().unwrap(), ChannelKind::Receive);
        assert_eq!(" IQ".parse::<ChannelKind>().unwrap(), ChannelKind::Iq);
        for kind in ChannelKind::ALL {
            assert_eq!(kind.prefix().parse::<ChannelKind>().unwrap(), kind);
        }
        assert!("slice".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn channel_id_parse() {
        assert_eq!("rx3".parse::<ChannelId>().unwrap(), ChannelId::receive(3));
        assert_eq!("IQ1".parse::<ChannelId>().unwrap(), ChannelId::iq(1));
        assert_eq!("mic".parse::<ChannelId>().unwrap(), ChannelId::microphone());
        assert_eq!("tx".parse::<ChannelId>().unwrap(), ChannelId::transmit());
    }

    #[test]
    fn channel_id_parse_rejects_garbage() {
        assert!("foo1".parse::<ChannelId>().is_err());
        assert!("rx0".parse::<ChannelId>().is_err());
        assert!("rx999".parse::<ChannelId>().is_err());
    }

    #[test]
    fn stream_id_display_is_hex() {
        assert_eq!(StreamId(0x2000_0001).to_string(), "0x20000001");
        assert_eq!(StreamId(7).to_string(), "0x00000007");
    }

    #[test]
    fn gain_range() {
        assert_eq!(Gain::new(0).unwrap().percent(), 0);
        assert_eq!(Gain::new(100).unwrap().percent(), 100);
        assert!(matches!(Gain::new(101), Err(Error::InvalidParameter(_))));
        assert_eq!(Gain::default().percent(), 50);
    }

    #[test]
    fn gain_linear() {
        assert!((Gain::new(50).unwrap().linear() - 0.5).abs() < f32::EPSILON);
        assert!((Gain::MAX.linear() - 1.0).abs() < f32::EPSILON);
        assert_eq!(Gain::MIN.linear(), 0.0);
    }

    #[test]
    fn sample_rate_hz() {
        assert_eq!(SampleRate::Hz24k.hz(), 24_000);
        assert_eq!(SampleRate::Hz192k.hz(), 192_000);
        assert_eq!(SampleRate::from_hz(96_000).unwrap(), SampleRate::Hz96k);
        assert!(SampleRate::from_hz(44_100).is_err());
        assert_eq!(SampleRate::default(), SampleRate::Hz24k);
    }

    #[test]
    fn sample_rate_serde_as_number() {
        let json = serde_json::to_string(&SampleRate::Hz48k).unwrap();
        assert_eq!(json, "48000");
        let back: SampleRate = serde_json::from_str("192000").unwrap();
        assert_eq!(back, SampleRate::Hz192k);
        assert!(serde_json::from_str::<SampleRate>("11025").is_err());
    }

    #[test]
    fn gain_serde_rejects_out_of_range() {
        assert!(serde_json::from_str::<Gain>("150").is_err());
        let g: Gain = serde_json::from_str("75").unwrap();
        assert_eq!(g.percent(), 75);
    }

    #[test]
    fn status_default_is_off() {
        assert_eq!(StreamStatus::default(), StreamStatus::Off);
        assert_eq!(StreamStatus::Streaming.to_string(), "Streaming");
    }
}
