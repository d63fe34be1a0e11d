//! SmartSDR client: the TCP command channel plus the VITA-49 UDP socket.
//!
//! [`SmartSdrClient`] performs the handshake, correlates responses with
//! commands by sequence number, watches for the connection dropping, and
//! routes inbound DAX packets to per-stream audio channels. It knows nothing
//! about panel channels; [`FlexSession`](crate::FlexSession) maps those onto
//! stream commands.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use daxpanel_core::{AudioBuffer, AudioStreamConfig, Error, Result, SessionEvent, StreamId};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{self, SmartSdrMessage, SmartSdrResponse, SmartSdrVersion};
use crate::vita49;

/// Default command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Time allowed for connecting and reading the two handshake lines.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Largest datagram the radio sends.
const MAX_DATAGRAM: usize = 16 * 1024;

type BoxReader = Box<dyn AsyncBufRead + Unpin + Send>;
type BoxWriter = Box<dyn AsyncWrite + Unpin + Send>;
type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<SmartSdrResponse>>>>;
type Routes = Arc<Mutex<HashMap<u32, InboundRoute>>>;

/// Connection options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub command_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Where the UDP loop delivers one inbound stream.
struct InboundRoute {
    tx: mpsc::Sender<AudioBuffer>,
    config: AudioStreamConfig,
}

/// UDP socket plus the radio's VITA-49 address for outbound packets.
struct UdpLink {
    socket: Arc<UdpSocket>,
    radio: SocketAddr,
}

/// SmartSDR client for one radio connection.
pub struct SmartSdrClient {
    writer: Arc<Mutex<Option<BoxWriter>>>,
    next_seq: AtomicU32,
    pending: Pending,
    routes: Routes,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<SessionEvent>,
    handle: u32,
    version: SmartSdrVersion,
    peer: Option<SocketAddr>,
    command_timeout: Duration,
    udp: Mutex<Option<UdpLink>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SmartSdrClient {
    /// Connect over TCP and complete the handshake.
    pub async fn connect(host: &str, tcp_port: u16, options: ClientOptions) -> Result<Self> {
        let addr = format!("{host}:{tcp_port}");
        tracing::debug!(addr = %addr, "connecting to SmartSDR");

        let stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::Transport(format!("TCP connect to {addr} failed: {e}")))?;
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().ok();

        let (read, write) = tokio::io::split(stream);
        let mut client =
            Self::from_streams(Box::new(BufReader::new(read)), Box::new(write), options).await?;
        client.peer = peer;
        Ok(client)
    }

    /// Run the handshake over an already-open stream pair.
    pub async fn from_streams(
        mut reader: BoxReader,
        writer: BoxWriter,
        options: ClientOptions,
    ) -> Result<Self> {
        let version = match codec::parse_message(&read_handshake_line(&mut reader).await?)? {
            SmartSdrMessage::Version(v) => v,
            other => {
                return Err(Error::Protocol(format!("expected version line, got {other:?}")));
            }
        };
        let handle = match codec::parse_message(&read_handshake_line(&mut reader).await?)? {
            SmartSdrMessage::Handle(h) => h,
            other => {
                return Err(Error::Protocol(format!("expected handle line, got {other:?}")));
            }
        };
        tracing::debug!(version = %version, handle = format!("{handle:08X}"), "SmartSDR handshake complete");

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(tcp_read_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&routes),
            events.clone(),
            Arc::clone(&connected),
        ));

        let _ = events.send(SessionEvent::Connected);
        Ok(SmartSdrClient {
            writer: Arc::new(Mutex::new(Some(writer))),
            next_seq: AtomicU32::new(1),
            pending,
            routes,
            connected,
            events,
            handle,
            version,
            peer: None,
            command_timeout: options.command_timeout,
            udp: Mutex::new(None),
            tasks: Mutex::new(vec![reader_task]),
        })
    }

    /// Send a command and wait for its response data.
    ///
    /// A non-zero error code from the radio becomes [`Error::Protocol`].
    pub async fn send_command(&self, command: &str) -> Result<String> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);

        if let Err(e) = self.write_command(seq, command).await {
            self.pending.lock().await.remove(&seq);
            return Err(e);
        }

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(resp)) => {
                tracing::trace!(seq, error_code = resp.error_code, message = %resp.message, "response");
                if resp.is_ok() {
                    Ok(resp.message)
                } else {
                    Err(Error::Protocol(format!(
                        "SmartSDR error 0x{:08X}: {}",
                        resp.error_code, resp.message
                    )))
                }
            }
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                self.pending.lock().await.remove(&seq);
                Err(Error::Timeout)
            }
        }
    }

    /// Send a command without waiting for the response.
    pub async fn send_command_no_wait(&self, command: &str) -> Result<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.write_command(seq, command).await
    }

    async fn write_command(&self, seq: u32, command: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        tracing::trace!(seq, command = %command, "sending command");
        let mut writer = self.writer.lock().await;
        let w = writer.as_mut().ok_or(Error::NotConnected)?;
        w.write_all(&codec::encode_command(seq, command))
            .await
            .map_err(|e| Error::Transport(format!("failed to send command: {e}")))?;
        w.flush()
            .await
            .map_err(|e| Error::Transport(format!("failed to flush command: {e}")))
    }

    /// Bind the local VITA-49 socket and start routing inbound DAX packets.
    ///
    /// `local_port` 0 picks a free port. Outbound packets go to `radio`.
    /// Returns the bound local port.
    pub async fn start_udp(&self, local_port: u16, radio: SocketAddr) -> Result<u16> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))
            .await
            .map_err(|e| Error::Transport(format!("failed to bind UDP port {local_port}: {e}")))?;
        let port = socket.local_addr()?.port();
        let socket = Arc::new(socket);
        tracing::debug!(port, radio = %radio, "VITA-49 socket bound");

        let task = tokio::spawn(udp_read_loop(Arc::clone(&socket), Arc::clone(&self.routes)));
        self.tasks.lock().await.push(task);
        *self.udp.lock().await = Some(UdpLink { socket, radio });
        Ok(port)
    }

    /// Send one VITA-49 packet to the radio.
    pub async fn send_datagram(&self, packet: &[u8]) -> Result<()> {
        let udp = self.udp.lock().await;
        let link = udp.as_ref().ok_or(Error::NotConnected)?;
        link.socket
            .send_to(packet, link.radio)
            .await
            .map_err(|e| Error::Transport(format!("UDP send failed: {e}")))?;
        Ok(())
    }

    /// Route inbound packets for `stream_id` into `tx`.
    pub async fn register_stream(
        &self,
        stream_id: StreamId,
        tx: mpsc::Sender<AudioBuffer>,
        config: AudioStreamConfig,
    ) {
        self.routes
            .lock()
            .await
            .insert(stream_id.0, InboundRoute { tx, config });
        tracing::debug!(stream_id = %stream_id, "stream route registered");
    }

    /// Stop routing `stream_id`. Dropping the sender ends the receiver.
    pub async fn unregister_stream(&self, stream_id: StreamId) -> bool {
        let removed = self.routes.lock().await.remove(&stream_id.0).is_some();
        if removed {
            tracing::debug!(stream_id = %stream_id, "stream route removed");
        }
        removed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Client handle assigned in the handshake.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn version(&self) -> SmartSdrVersion {
        self.version
    }

    /// Remote TCP address, when connected over TCP.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Close the connection and stop the background tasks.
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("disconnecting SmartSDR client");
        if let Some(mut w) = self.writer.lock().await.take() {
            let _ = w.shutdown().await;
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.pending.lock().await.clear();
        self.routes.lock().await.clear();
        *self.udp.lock().await = None;
        let _ = self.events.send(SessionEvent::Disconnected);
    }
}

impl std::fmt::Debug for SmartSdrClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartSdrClient")
            .field("handle", &format!("{:08X}", self.handle))
            .field("version", &self.version)
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Background loops
// ---------------------------------------------------------------------------

async fn read_handshake_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut line = String::new();
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(0)) => Err(Error::ConnectionLost),
        Ok(Ok(_)) => Ok(line.trim_end().to_string()),
        Ok(Err(e)) => Err(Error::Transport(format!("handshake read error: {e}"))),
        Err(_) => Err(Error::Timeout),
    }
}

async fn tcp_read_loop(
    mut reader: BoxReader,
    pending: Pending,
    routes: Routes,
    events: broadcast::Sender<SessionEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                tracing::info!("radio closed the connection");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP read error");
                break;
            }
            Ok(_) => {}
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        match codec::parse_message(trimmed) {
            Ok(SmartSdrMessage::Response(resp)) => {
                match pending.lock().await.remove(&resp.sequence) {
                    Some(waiter) => {
                        let _ = waiter.send(resp);
                    }
                    None => tracing::trace!(seq = resp.sequence, "response for unknown sequence"),
                }
            }
            Ok(SmartSdrMessage::Status(status)) => {
                if let Some(id) = codec::stream_removed(&status) {
                    if routes.lock().await.remove(&id).is_some() {
                        tracing::info!(stream_id = %StreamId(id), "radio removed stream");
                    }
                }
            }
            Ok(SmartSdrMessage::Message(text)) => tracing::debug!(message = %text, "SmartSDR message"),
            Ok(other) => tracing::trace!(line = ?other, "ignored line"),
            Err(e) => tracing::trace!(error = %e, line = %trimmed, "unparsable line"),
        }
    }

    // Dropping the waiters fails outstanding commands with ConnectionLost,
    // dropping the routes ends every inbound receiver.
    pending.lock().await.clear();
    routes.lock().await.clear();
    if connected.swap(false, Ordering::SeqCst) {
        let _ = events.send(SessionEvent::Disconnected);
    }
}

async fn udp_read_loop(socket: Arc<UdpSocket>, routes: Routes) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => len,
            Err(e) => {
                tracing::debug!(error = %e, "UDP receive error");
                continue;
            }
        };
        let packet = match vita49::parse_packet(&buf[..len]) {
            Ok(p) => p,
            Err(e) => {
                tracing::trace!(error = %e, "dropping malformed VITA-49 packet");
                continue;
            }
        };
        let stream_type = packet.header.stream_type;
        if !stream_type.is_dax() {
            continue;
        }
        let stream_id = packet.header.stream_id;

        let mut table = routes.lock().await;
        let Some(route) = table.get(&stream_id) else {
            continue;
        };
        let samples = match vita49::parse_dax_payload(packet.payload) {
            Ok(s) => s,
            Err(e) => {
                tracing::trace!(error = %e, "dropping DAX packet");
                continue;
            }
        };
        let sample_rate = stream_type.sample_rate().unwrap_or(route.config.sample_rate);
        let buffer = AudioBuffer::new(samples, route.config.channels, sample_rate);
        match route.tx.try_send(buffer) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::trace!(stream_id = %StreamId(stream_id), "sink lagging, buffer dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                table.remove(&stream_id);
            }
        }
    }
}

/// Wrap any byte stream for [`SmartSdrClient::from_streams`].
pub fn split_stream<S>(stream: S) -> (BoxReader, BoxWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, write) = tokio::io::split(stream);
    (Box::new(BufReader::new(read)), Box::new(write))
}

#[cfg(test)]
mod tests {
    use super::*;
    use daxpanel_test_harness::MockSmartSdrServer;

    async fn connect(server: &MockSmartSdrServer) -> SmartSdrClient {
        SmartSdrClient::connect("127.0.0.1", server.port(), ClientOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn handshake_reads_version_and_handle() {
        let server = MockSmartSdrServer::start().await;
        let client = connect(&server).await;
        assert!(client.is_connected());
        assert_eq!(client.handle(), MockSmartSdrServer::HANDLE);
        assert_eq!(client.version().to_string(), "1.4.0.0");
        assert!(client.peer_addr().is_some());
    }

    #[tokio::test]
    async fn command_response_correlation() {
        let server = MockSmartSdrServer::start().await;
        let client = connect(&server).await;
        let first = client.send_command("stream create type=dax_mic").await.unwrap();
        let second = client.send_command("stream create type=dax_tx").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(
            server.commands().await,
            vec!["stream create type=dax_mic", "stream create type=dax_tx"]
        );
    }

    #[tokio::test]
    async fn error_code_becomes_protocol_error() {
        let server = MockSmartSdrServer::start().await;
        server.fail_creates("dax_rx").await;
        let client = connect(&server).await;
        let err = client
            .send_command("stream create type=dax_rx dax_channel=1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m.contains("0x50000016")), "{err}");
    }

    #[tokio::test]
    async fn silent_radio_times_out() {
        let server = MockSmartSdrServer::start().await;
        server.set_silent(true).await;
        let client = SmartSdrClient::connect(
            "127.0.0.1",
            server.port(),
            ClientOptions {
                command_timeout: Duration::from_millis(50),
            },
        )
        .await
        .unwrap();
        let err = client.send_command("stream create type=dax_mic").await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn dropped_connection_emits_disconnected() {
        let server = MockSmartSdrServer::start().await;
        let client = connect(&server).await;
        let mut events = client.subscribe();
        server.drop_connection().await;

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, SessionEvent::Disconnected);
        assert!(!client.is_connected());
        let err = client.send_command("stream create type=dax_mic").await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let server = MockSmartSdrServer::start().await;
        let client = connect(&server).await;
        let mut events = client.subscribe();
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn handshake_rejects_wrong_first_line() {
        let (client_side, mut server_side) = tokio::io::duplex(256);
        server_side.write_all(b"H12345678\n").await.unwrap();
        let (reader, writer) = split_stream(client_side);
        let err = SmartSdrClient::from_streams(reader, writer, ClientOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn inbound_dax_packets_are_routed_by_stream_id() {
        let server = MockSmartSdrServer::start().await;
        let client = connect(&server).await;
        let radio = server.udp_addr();
        let port = client.start_udp(0, radio).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        client
            .register_stream(StreamId(0x0400_0008), tx, AudioStreamConfig::dax_audio())
            .await;

        let packet = vita49::build_dax_audio_packet(0x0400_0008, 0, &[0.5, -0.5]).unwrap();
        let other = vita49::build_dax_audio_packet(0x0400_0009, 0, &[0.1, 0.1]).unwrap();
        server.send_udp(port, &other).await;
        server.send_udp(port, &packet).await;

        let buffer = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buffer.samples, vec![0.5, -0.5]);
        assert_eq!(buffer.sample_rate, 24_000);
        assert_eq!(buffer.channels, 2);

        assert!(client.unregister_stream(StreamId(0x0400_0008)).await);
        assert!(!client.unregister_stream(StreamId(0x0400_0008)).await);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn removed_stream_status_closes_route() {
        let server = MockSmartSdrServer::start().await;
        let client = connect(&server).await;
        let (tx, mut rx) = mpsc::channel(8);
        client
            .register_stream(StreamId(0x0400_0008), tx, AudioStreamConfig::dax_audio())
            .await;
        server.send_line("S12345678|stream 0x04000008 removed").await;
        let ended = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(ended.is_none());
    }
}
