//! A TCP server that speaks enough SmartSDR to exercise the session client.
//!
//! The server sends the `V`/`H` handshake to every connection, records each
//! command it receives, and answers `stream create` with a fresh stream
//! handle. Everything else gets an empty success response. A UDP socket
//! stands in for the radio's VITA-49 port.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::WAIT_TIMEOUT;

/// Error code returned for refused `stream create` commands.
pub const STREAM_CREATE_ERROR: u32 = 0x5000_0016;

/// Error code returned for commands refused through
/// [`MockSmartSdrServer::fail_commands`].
pub const COMMAND_ERROR: u32 = 0x5000_002D;

/// First stream handle handed out.
const FIRST_STREAM_HANDLE: u32 = 0x0400_0008;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

enum Control {
    Line(String),
    Drop,
}

#[derive(Default)]
struct ServerState {
    commands: Vec<String>,
    failing_types: HashSet<String>,
    failing_prefixes: Vec<String>,
    silent: bool,
    next_handle: u32,
    datagrams: Vec<Vec<u8>>,
    control: Option<mpsc::UnboundedSender<Control>>,
    connections: usize,
}

/// Mock SmartSDR radio listening on `127.0.0.1`.
pub struct MockSmartSdrServer {
    port: u16,
    udp: Arc<UdpSocket>,
    state: Arc<Mutex<ServerState>>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockSmartSdrServer {
    /// Client handle sent in the handshake.
    pub const HANDLE: u32 = 0x1234_5678;

    /// Bind the TCP and UDP sockets and start accepting connections.
    ///
    /// # Panics
    ///
    /// Panics if the loopback sockets cannot be bound.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock SmartSDR listener");
        let port = listener.local_addr().expect("listener address").port();
        let udp = Arc::new(
            UdpSocket::bind("127.0.0.1:0")
                .await
                .expect("bind mock VITA-49 socket"),
        );
        let state = Arc::new(Mutex::new(ServerState {
            next_handle: FIRST_STREAM_HANDLE,
            ..ServerState::default()
        }));

        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&state)));
        let datagrams = tokio::spawn(udp_loop(Arc::clone(&udp), Arc::clone(&state)));
        MockSmartSdrServer {
            port,
            udp,
            state,
            tasks: vec![accept, datagrams],
        }
    }

    /// TCP command port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address of the radio's VITA-49 socket.
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp.local_addr().expect("udp address")
    }

    /// Every command received so far, without the `C<seq>|` prefix.
    pub async fn commands(&self) -> Vec<String> {
        self.state.lock().await.commands.clone()
    }

    /// Received commands that start with `prefix`.
    pub async fn commands_matching(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Wait until at least `n` commands starting with `prefix` arrived.
    pub async fn wait_for_commands(&self, prefix: &str, n: usize) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            if self.commands_matching(prefix).await.len() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Refuse `stream create type=<stream_type>` from now on.
    pub async fn fail_creates(&self, stream_type: &str) {
        self.state
            .lock()
            .await
            .failing_types
            .insert(stream_type.to_string());
    }

    /// Refuse every command starting with `prefix` from now on.
    pub async fn fail_commands(&self, prefix: &str) {
        self.state
            .lock()
            .await
            .failing_prefixes
            .push(prefix.to_string());
    }

    /// Stop answering commands (they are still recorded).
    pub async fn set_silent(&self, silent: bool) {
        self.state.lock().await.silent = silent;
    }

    /// Push a raw line (status, message) to the connected client.
    pub async fn send_line(&self, line: &str) {
        if let Some(control) = &self.state.lock().await.control {
            let _ = control.send(Control::Line(line.to_string()));
        }
    }

    /// Close the current client connection from the radio side.
    pub async fn drop_connection(&self) {
        if let Some(control) = self.state.lock().await.control.take() {
            let _ = control.send(Control::Drop);
        }
    }

    /// Number of TCP connections accepted so far.
    pub async fn connections(&self) -> usize {
        self.state.lock().await.connections
    }

    /// Send a datagram from the radio's VITA-49 socket to a local port.
    pub async fn send_udp(&self, port: u16, packet: &[u8]) {
        self.udp
            .send_to(packet, ("127.0.0.1", port))
            .await
            .expect("send datagram");
    }

    /// Datagrams the client sent to the radio's VITA-49 socket.
    pub async fn datagrams(&self) -> Vec<Vec<u8>> {
        self.state.lock().await.datagrams.clone()
    }

    /// Wait until at least `n` datagrams arrived.
    pub async fn wait_for_datagrams(&self, n: usize) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            if self.state.lock().await.datagrams.len() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Drop for MockSmartSdrServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<Mutex<ServerState>>) {
    while let Ok((stream, _)) = listener.accept().await {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        {
            let mut s = state.lock().await;
            s.control = Some(control_tx);
            s.connections += 1;
        }
        tokio::spawn(serve(stream, Arc::clone(&state), control_rx));
    }
}

async fn serve(
    stream: TcpStream,
    state: Arc<Mutex<ServerState>>,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let (read, mut write) = stream.into_split();
    let handshake = format!("V1.4.0.0\nH{:08X}\n", MockSmartSdrServer::HANDLE);
    if write.write_all(handshake.as_bytes()).await.is_err() {
        return;
    }
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    return;
                };
                let Some(reply) = answer(&line, &state).await else {
                    continue;
                };
                if write.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
            ctl = control.recv() => match ctl {
                Some(Control::Line(line)) => {
                    if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        return;
                    }
                }
                Some(Control::Drop) | None => {
                    let _ = write.shutdown().await;
                    return;
                }
            },
        }
    }
}

/// Record one `C<seq>|<command>` line and build the response, if any.
async fn answer(line: &str, state: &Arc<Mutex<ServerState>>) -> Option<String> {
    let body = line.trim().strip_prefix('C')?;
    let (seq, command) = body.split_once('|')?;
    let mut s = state.lock().await;
    s.commands.push(command.to_string());
    if s.silent {
        return None;
    }
    if s.failing_prefixes.iter().any(|p| command.starts_with(p.as_str())) {
        return Some(format!("R{seq}|{COMMAND_ERROR:08X}|Command failed\n"));
    }

    let Some(args) = command.strip_prefix("stream create ") else {
        return Some(format!("R{seq}|00000000|\n"));
    };
    let stream_type = args
        .split_whitespace()
        .find_map(|kv| kv.strip_prefix("type="))
        .unwrap_or_default();
    if s.failing_types.contains(stream_type) {
        return Some(format!(
            "R{seq}|{STREAM_CREATE_ERROR:08X}|Unable to create stream\n"
        ));
    }
    let handle = s.next_handle;
    s.next_handle += 1;
    Some(format!("R{seq}|00000000|{handle:08X}\n"))
}

async fn udp_loop(socket: Arc<UdpSocket>, state: Arc<Mutex<ServerState>>) {
    let mut buf = vec![0u8; 16 * 1024];
    while let Ok((len, _)) = socket.recv_from(&mut buf).await {
        state.lock().await.datagrams.push(buf[..len].to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Reader = BufReader<tokio::net::tcp::OwnedReadHalf>;

    async fn connect(server: &MockSmartSdrServer) -> (Reader, tokio::net::tcp::OwnedWriteHalf) {
        let stream = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
        let (read, write) = stream.into_split();
        (BufReader::new(read), write)
    }

    async fn read_line(reader: &mut Reader) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn handshake_and_stream_handles() {
        let server = MockSmartSdrServer::start().await;
        let (mut reader, mut writer) = connect(&server).await;
        assert_eq!(read_line(&mut reader).await, "V1.4.0.0");
        assert_eq!(read_line(&mut reader).await, "H12345678");

        writer.write_all(b"C1|stream create type=dax_mic\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, "R1|00000000|04000008");
        writer.write_all(b"C2|stream remove 0x04000008\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, "R2|00000000|");

        assert_eq!(
            server.commands().await,
            vec!["stream create type=dax_mic", "stream remove 0x04000008"]
        );
        assert_eq!(server.connections().await, 1);
    }

    #[tokio::test]
    async fn refused_stream_type() {
        let server = MockSmartSdrServer::start().await;
        server.fail_creates("dax_tx").await;
        let (mut reader, mut writer) = connect(&server).await;
        read_line(&mut reader).await;
        read_line(&mut reader).await;

        writer.write_all(b"C5|stream create type=dax_tx\n").await.unwrap();
        assert_eq!(
            read_line(&mut reader).await,
            "R5|50000016|Unable to create stream"
        );
    }

    #[tokio::test]
    async fn refuses_failing_commands() {
        let server = MockSmartSdrServer::start().await;
        server.fail_commands("stream set").await;
        let (mut reader, mut writer) = connect(&server).await;
        read_line(&mut reader).await;
        read_line(&mut reader).await;

        writer.write_all(b"C2|stream set 0x04000008 daxiq_rate=96000\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, "R2|5000002D|Command failed");
        writer.write_all(b"C3|stream remove 0x04000008\n").await.unwrap();
        assert_eq!(read_line(&mut reader).await, "R3|00000000|");
    }

    #[tokio::test]
    async fn records_datagrams() {
        let server = MockSmartSdrServer::start().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.send_to(b"abcd", server.udp_addr()).await.unwrap();
        assert!(server.wait_for_datagrams(1).await);
        assert_eq!(server.datagrams().await, vec![b"abcd".to_vec()]);
    }
}
