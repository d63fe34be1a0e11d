//! FlexSessionBuilder -- fluent builder for [`FlexSession`].
//!
//! # Example
//!
//! ```no_run
//! use daxpanel_flex::FlexSessionBuilder;
//!
//! # async fn example() -> daxpanel_core::Result<()> {
//! let session = FlexSessionBuilder::new()
//!     .host("192.168.1.100")
//!     .low_bandwidth(true)
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use daxpanel_core::{Error, Result};

use crate::client::{ClientOptions, DEFAULT_COMMAND_TIMEOUT, SmartSdrClient};
use crate::codec;
use crate::session::FlexSession;

/// SmartSDR TCP command port.
pub const DEFAULT_TCP_PORT: u16 = 4992;

/// VITA-49 UDP port, on both the radio and the client.
pub const DEFAULT_UDP_PORT: u16 = 4991;

/// Client program name announced to the radio.
pub const DEFAULT_CLIENT_NAME: &str = "daxpanel";

/// Fluent builder for [`FlexSession`].
#[derive(Debug, Clone)]
pub struct FlexSessionBuilder {
    host: Option<String>,
    tcp_port: u16,
    udp_port: u16,
    radio_udp_port: u16,
    client_name: String,
    command_timeout: Duration,
    low_bandwidth: bool,
}

impl FlexSessionBuilder {
    pub fn new() -> Self {
        FlexSessionBuilder {
            host: None,
            tcp_port: DEFAULT_TCP_PORT,
            udp_port: DEFAULT_UDP_PORT,
            radio_udp_port: DEFAULT_UDP_PORT,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            low_bandwidth: false,
        }
    }

    /// Radio hostname or IP address. Required.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// TCP command port (default: 4992).
    pub fn tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    /// Local UDP port for inbound DAX data (default: 4991, 0 for any).
    pub fn udp_port(mut self, port: u16) -> Self {
        self.udp_port = port;
        self
    }

    /// The radio's VITA-49 port Transmit audio is sent to (default: 4991).
    pub fn radio_udp_port(mut self, port: u16) -> Self {
        self.radio_udp_port = port;
        self
    }

    /// Client program name (default: `"daxpanel"`).
    pub fn client_name(mut self, name: &str) -> Self {
        self.client_name = name.to_string();
        self
    }

    /// Command response timeout (default: 2s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Ask the radio for reduced-bandwidth DAX audio (default: off).
    pub fn low_bandwidth(mut self, enabled: bool) -> Self {
        self.low_bandwidth = enabled;
        self
    }

    /// Connect, register as a client, and bind the VITA-49 socket.
    pub async fn build(self) -> Result<FlexSession> {
        let host = self.host.as_deref().ok_or_else(|| {
            Error::InvalidParameter("host is required: call .host() before .build()".into())
        })?;
        let options = ClientOptions {
            command_timeout: self.command_timeout,
        };
        let client = SmartSdrClient::connect(host, self.tcp_port, options).await?;

        let radio_ip = client
            .peer_addr()
            .map(|a| a.ip())
            .ok_or_else(|| Error::Transport("radio address unknown".into()))?;
        let radio = SocketAddr::new(radio_ip, self.radio_udp_port);
        let local_port = client.start_udp(self.udp_port, radio).await?;

        client
            .send_command_no_wait(&codec::cmd_client_program(&self.client_name))
            .await?;
        client
            .send_command_no_wait(&codec::cmd_client_udpport(local_port))
            .await?;
        if self.low_bandwidth {
            client
                .send_command_no_wait(&codec::cmd_client_low_bandwidth_dax(true))
                .await?;
        }
        client
            .send_command_no_wait(&codec::cmd_subscribe("stream"))
            .await?;

        tracing::info!(host = %host, udp_port = local_port, "connected to radio");
        Ok(FlexSession::new(client))
    }
}

impl Default for FlexSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
