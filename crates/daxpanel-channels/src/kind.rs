//! Channel kind descriptors.
//!
//! The reconciler is written once; everything that differs between Receive,
//! Microphone, Transmit and IQ channels lives in a [`KindDescriptor`].

use daxpanel_core::{ChannelKind, ChannelRecord, Gain, StreamDirection, StreamRequest};

/// The per-kind strategy plugged into a channel reconciler.
#[derive(Debug)]
pub struct KindDescriptor {
    pub kind: ChannelKind,
    /// Build the remote stream request for a record of this kind.
    pub build_request: fn(&ChannelRecord) -> StreamRequest,
}

impl KindDescriptor {
    pub fn direction(&self) -> StreamDirection {
        self.kind.direction()
    }

    /// Gain the local endpoint should apply. IQ samples pass at unity.
    pub fn endpoint_gain(&self, record: &ChannelRecord) -> Gain {
        if self.kind.uses_gain() {
            record.gain
        } else {
            Gain::MAX
        }
    }

    /// Whether a change of sample rate requires a new stream.
    pub fn restarts_on_rate_change(&self) -> bool {
        self.kind.uses_sample_rate()
    }
}

fn dax_audio_request(record: &ChannelRecord) -> StreamRequest {
    StreamRequest {
        kind: record.kind(),
        channel: record.id.index,
        sample_rate: None,
    }
}

fn dax_iq_request(record: &ChannelRecord) -> StreamRequest {
    StreamRequest {
        kind: ChannelKind::Iq,
        channel: record.id.index,
        sample_rate: Some(record.sample_rate),
    }
}

pub static RECEIVE: KindDescriptor = KindDescriptor {
    kind: ChannelKind::Receive,
    build_request: dax_audio_request,
};

pub static MICROPHONE: KindDescriptor = KindDescriptor {
    kind: ChannelKind::Microphone,
    build_request: dax_audio_request,
};

pub static TRANSMIT: KindDescriptor = KindDescriptor {
    kind: ChannelKind::Transmit,
    build_request: dax_audio_request,
};

pub static IQ: KindDescriptor = KindDescriptor {
    kind: ChannelKind::Iq,
    build_request: dax_iq_request,
};

/// The descriptor for `kind`.
pub fn descriptor(kind: ChannelKind) -> &'static KindDescriptor {
    match kind {
        ChannelKind::Receive => &RECEIVE,
        ChannelKind::Microphone => &MICROPHONE,
        ChannelKind::Transmit => &TRANSMIT,
        ChannelKind::Iq => &IQ,
    }
}
