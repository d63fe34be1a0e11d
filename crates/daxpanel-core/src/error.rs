//! Error types for daxpanel.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Session-layer, audio-layer, and
//! persistence-layer failures are all captured here.

/// The error type for all daxpanel operations.
///
/// Variants cover the failure modes met while keeping DAX channels alive:
/// radio transport failures, protocol decode errors, stream requests the
/// radio refused, missing audio devices, and settings persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (TCP socket, UDP socket, audio host).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed SmartSDR line, bad VITA-49 frame).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for a response from the radio.
    #[error("timeout waiting for response")]
    Timeout,

    /// The requested operation is not supported for this channel kind.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An invalid parameter was passed to a channel or session operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No radio session is connected.
    #[error("not connected")]
    NotConnected,

    /// The connection to the radio was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An audio stream was closed unexpectedly.
    ///
    /// This occurs when the receiver side of an audio channel is dropped
    /// (for Transmit) or the sender side is dropped (for Receive).
    #[error("stream closed")]
    StreamClosed,

    /// The radio session could not open the requested stream.
    #[error("stream request failed: {0}")]
    StreamRequestFailed(String),

    /// A referenced local audio device does not exist (or lacks the needed
    /// direction).
    #[error("audio device not found: {0}")]
    DeviceNotFound(String),

    /// Settings could not be read, parsed, or written.
    #[error("settings error: {0}")]
    Settings(String),

    /// The channel's control task is no longer running.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_transport() {
        let e = Error::Transport("socket reset".into());
        assert_eq!(e.to_string(), "transport error: socket reset");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("bad response line".into());
        assert_eq!(e.to_string(), "protocol error: bad response line");
    }

    #[test]
    fn error_display_stream_request_failed() {
        let e = Error::StreamRequestFailed("SmartSDR error 0x50000016".into());
        assert_eq!(
            e.to_string(),
            "stream request failed: SmartSDR error 0x50000016"
        );
    }

    #[test]
    fn error_display_device_not_found() {
        let e = Error::DeviceNotFound("usb-headset".into());
        assert_eq!(e.to_string(), "audio device not found: usb-headset");
    }

    #[test]
    fn error_display_unit_variants() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for response");
        assert_eq!(Error::NotConnected.to_string(), "not connected");
        assert_eq!(Error::ConnectionLost.to_string(), "connection lost");
        assert_eq!(Error::StreamClosed.to_string(), "stream closed");
    }

    #[test]
    fn error_display_channel_closed() {
        let e = Error::ChannelClosed("rx1".into());
        assert_eq!(e.to_string(), "channel closed: rx1");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("no such file"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }
}
