//! VITA-49.0 framing for DAX streams.
//!
//! The radio sends DAX audio and DAX IQ to the client's UDP port as VITA-49
//! Extension Data packets, and expects Transmit audio back in the same
//! framing. Pure byte-slice code; no I/O.
//!
//! ```text
//! offset  0  header word: type(31-28) C(27) T(26) TSI(23-22) TSF(21-20) count(19-16) size(15-0)
//! offset  4  stream id
//! offset  8  OUI << 8
//! offset 12  information class (upper 16) | packet class (lower 16)
//! offset 16  integer timestamp
//! offset 20  fractional timestamp (64 bit)
//! offset 28  payload: f32 little-endian, interleaved pairs
//! ```

use daxpanel_core::{Error, Result, SampleRate};

/// Header length in bytes.
pub const HEADER_SIZE: usize = 28;

/// FlexRadio OUI carried in the class id.
pub const FLEXRADIO_OUI: u32 = 0x001C2D;

/// Information class code FlexRadio puts in every packet.
pub const FLEX_INFO_CLASS: u16 = 0x534C;

/// Packet class of DAX audio (Receive, Microphone and Transmit).
pub const DAX_AUDIO_CLASS: u16 = 0x03E3;

/// Extension Data with stream id.
const PACKET_TYPE_EXT_DATA: u8 = 0x3;

/// Largest payload in one outbound packet, in frames (128 stereo f32 frames
/// keep the datagram under a typical MTU).
pub const MAX_FRAMES_PER_PACKET: usize = 128;

const BYTES_PER_FRAME: usize = 8;

/// Stream kind carried by a packet, from its packet class code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// DAX audio, 24 ksps stereo float32.
    DaxAudio,
    /// DAX IQ at the given rate.
    DaxIq(SampleRate),
    /// Meter, FFT, waterfall and other streams the panel ignores.
    Other(u16),
}

impl StreamType {
    pub fn from_class_code(code: u16) -> Self {
        match code {
            DAX_AUDIO_CLASS => StreamType::DaxAudio,
            0x02E3 => StreamType::DaxIq(SampleRate::Hz24k),
            0x02E4 => StreamType::DaxIq(SampleRate::Hz48k),
            0x02E5 => StreamType::DaxIq(SampleRate::Hz96k),
            0x02E6 => StreamType::DaxIq(SampleRate::Hz192k),
            other => StreamType::Other(other),
        }
    }

    /// Whether the payload is DAX samples the panel routes to a channel.
    pub fn is_dax(self) -> bool {
        !matches!(self, StreamType::Other(_))
    }

    pub fn sample_rate(self) -> Option<u32> {
        match self {
            StreamType::DaxAudio => Some(24_000),
            StreamType::DaxIq(rate) => Some(rate.hz()),
            StreamType::Other(_) => None,
        }
    }
}

/// Decoded header fields the panel uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vita49Header {
    pub packet_type: u8,
    pub packet_count: u8,
    pub packet_size_words: u16,
    pub stream_id: u32,
    pub class_oui: u32,
    pub packet_class_code: u16,
    pub stream_type: StreamType,
    pub timestamp_int: u32,
    pub timestamp_frac: u64,
}

/// A parsed packet borrowing its payload from the datagram.
#[derive(Debug, PartialEq)]
pub struct Vita49Packet<'a> {
    pub header: Vita49Header,
    pub payload: &'a [u8],
}

fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Parse one UDP datagram.
///
/// The declared packet size must fit in `data`; bytes past it are ignored.
pub fn parse_packet(data: &[u8]) -> Result<Vita49Packet<'_>> {
    if data.len() < HEADER_SIZE {
        return Err(Error::Protocol(format!(
            "VITA-49 packet too short: {} bytes",
            data.len()
        )));
    }

    let word = be_u32(data, 0);
    let packet_size_words = (word & 0xFFFF) as u16;
    let size = packet_size_words as usize * 4;
    if size < HEADER_SIZE || size > data.len() {
        return Err(Error::Protocol(format!(
            "VITA-49 packet size {size} bytes does not fit datagram of {} bytes",
            data.len()
        )));
    }

    let class_oui = (be_u32(data, 8) >> 8) & 0x00FF_FFFF;
    if class_oui != FLEXRADIO_OUI {
        tracing::trace!(oui = class_oui, "VITA-49 packet from foreign OUI");
    }
    let packet_class_code = (be_u32(data, 12) & 0xFFFF) as u16;
    let timestamp_frac = (u64::from(be_u32(data, 20)) << 32) | u64::from(be_u32(data, 24));

    let header = Vita49Header {
        packet_type: ((word >> 28) & 0x0F) as u8,
        packet_count: ((word >> 16) & 0x0F) as u8,
        packet_size_words,
        stream_id: be_u32(data, 4),
        class_oui,
        packet_class_code,
        stream_type: StreamType::from_class_code(packet_class_code),
        timestamp_int: be_u32(data, 16),
        timestamp_frac,
    };
    Ok(Vita49Packet {
        header,
        payload: &data[HEADER_SIZE..size],
    })
}

/// Decode a DAX payload into interleaved `f32` samples.
///
/// Both DAX audio (L/R) and DAX IQ (I/Q) carry little-endian float32 pairs,
/// so the payload must be a whole number of 8-byte frames.
pub fn parse_dax_payload(payload: &[u8]) -> Result<Vec<f32>> {
    if payload.len() % BYTES_PER_FRAME != 0 {
        return Err(Error::Protocol(format!(
            "DAX payload length {} is not a multiple of {BYTES_PER_FRAME}",
            payload.len()
        )));
    }
    Ok(payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Build one DAX audio packet for the Transmit stream.
///
/// `samples` are interleaved stereo and must hold whole frames.
/// `packet_count` is the 4-bit rolling counter; only its low bits are used.
pub fn build_dax_audio_packet(stream_id: u32, packet_count: u8, samples: &[f32]) -> Result<Vec<u8>> {
    if samples.len() % 2 != 0 {
        return Err(Error::InvalidParameter(format!(
            "DAX audio needs stereo frames, got {} samples",
            samples.len()
        )));
    }
    let total = HEADER_SIZE + samples.len() * 4;
    let words = u16::try_from(total / 4).map_err(|_| {
        Error::InvalidParameter(format!("{} samples do not fit one packet", samples.len()))
    })?;

    let mut buf = Vec::with_capacity(total);
    let word: u32 = (u32::from(PACKET_TYPE_EXT_DATA) << 28)
        | (1 << 27) // class id present
        | (0x01 << 22) // TSI: UTC
        | (0x01 << 20) // TSF: sample count
        | ((u32::from(packet_count) & 0x0F) << 16)
        | u32::from(words);
    buf.extend_from_slice(&word.to_be_bytes());
    buf.extend_from_slice(&stream_id.to_be_bytes());
    buf.extend_from_slice(&(FLEXRADIO_OUI << 8).to_be_bytes());
    buf.extend_from_slice(&((u32::from(FLEX_INFO_CLASS) << 16) | u32::from(DAX_AUDIO_CLASS)).to_be_bytes());
    buf.extend_from_slice(&[0u8; 12]); // timestamps
    for s in samples {
        buf.extend_from_slice(&s.to_le_bytes());
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iq_packet(stream_id: u32, class: u16, samples: &[f32]) -> Vec<u8> {
        let mut buf = build_dax_audio_packet(stream_id, 0, samples).unwrap();
        buf[14..16].copy_from_slice(&class.to_be_bytes());
        buf
    }

    #[test]
    fn class_codes() {
        assert_eq!(StreamType::from_class_code(0x03E3), StreamType::DaxAudio);
        assert_eq!(
            StreamType::from_class_code(0x02E3),
            StreamType::DaxIq(SampleRate::Hz24k)
        );
        assert_eq!(
            StreamType::from_class_code(0x02E6),
            StreamType::DaxIq(SampleRate::Hz192k)
        );
        assert_eq!(StreamType::from_class_code(0x8002), StreamType::Other(0x8002));
        assert!(!StreamType::Other(0x8002).is_dax());
        assert_eq!(StreamType::DaxIq(SampleRate::Hz96k).sample_rate(), Some(96_000));
    }

    #[test]
    fn built_packet_parses_back() {
        let samples = [0.5, -0.5, 0.25, -0.25];
        let buf = build_dax_audio_packet(0x8400_0000, 5, &samples).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 16);

        let packet = parse_packet(&buf).unwrap();
        assert_eq!(packet.header.packet_type, 3);
        assert_eq!(packet.header.packet_count, 5);
        assert_eq!(packet.header.stream_id, 0x8400_0000);
        assert_eq!(packet.header.class_oui, FLEXRADIO_OUI);
        assert_eq!(packet.header.stream_type, StreamType::DaxAudio);
        assert_eq!(packet.header.packet_size_words as usize * 4, buf.len());
        assert_eq!(parse_dax_payload(packet.payload).unwrap(), samples);
    }

    #[test]
    fn counter_wraps_to_four_bits() {
        let buf = build_dax_audio_packet(1, 0x13, &[]).unwrap();
        assert_eq!(parse_packet(&buf).unwrap().header.packet_count, 3);
    }

    #[test]
    fn iq_packet_type() {
        let buf = iq_packet(0x2000_0001, 0x02E4, &[0.1, 0.2]);
        let packet = parse_packet(&buf).unwrap();
        assert_eq!(packet.header.stream_type, StreamType::DaxIq(SampleRate::Hz48k));
    }

    #[test]
    fn rejects_short_and_oversized() {
        assert!(parse_packet(&[0u8; 27]).is_err());
        let mut buf = build_dax_audio_packet(1, 0, &[0.0, 0.0]).unwrap();
        buf.truncate(HEADER_SIZE + 4);
        assert!(parse_packet(&buf).is_err());
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut buf = build_dax_audio_packet(1, 0, &[0.0, 1.0]).unwrap();
        buf.extend_from_slice(&[0xFF; 4]);
        let packet = parse_packet(&buf).unwrap();
        assert_eq!(packet.payload.len(), 8);
    }

    #[test]
    fn payload_must_be_whole_frames() {
        assert!(parse_dax_payload(&[0u8; 12]).is_err());
        assert!(parse_dax_payload(&[]).unwrap().is_empty());
    }

    #[test]
    fn odd_sample_count_is_rejected() {
        let err = build_dax_audio_packet(1, 0, &[0.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }
}
