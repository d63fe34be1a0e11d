//! daxpanel-flex: SmartSDR radio session for the DAX channel panel.
//!
//! - **Codec** ([`codec`]) -- SmartSDR command/response/status lines and the
//!   DAX `stream create` / `stream remove` commands.
//! - **VITA-49** ([`vita49`]) -- DAX audio and IQ packet parsing, and framing
//!   of Transmit audio.
//! - **Client** ([`client`]) -- the TCP command channel, response
//!   correlation, disconnect detection, and UDP stream routing.
//! - **FlexSession** ([`session`]) -- the
//!   [`RadioSession`](daxpanel_core::RadioSession) the channel reconcilers
//!   drive.
//!
//! TCP carries commands and status; UDP carries sample data. Stream handles
//! returned by `stream create` are the VITA-49 stream ids of the packets.

pub mod builder;
pub mod client;
pub mod codec;
pub mod session;
pub mod vita49;

pub use builder::FlexSessionBuilder;
pub use client::{ClientOptions, SmartSdrClient};
pub use session::FlexSession;
