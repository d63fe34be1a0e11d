//! SmartSDR line codec for DAX stream management.
//!
//! The radio speaks newline-terminated ASCII over TCP port 4992:
//!
//! ```text
//! Command:   C<seq>|<command_text>\n
//! Response:  R<seq>|<hex_error_code>|<response_data>\n
//! Status:    S<hex_handle>|<object> <key>=<value> ...\n
//! Message:   M<seq>|<text>\n
//! Version:   V<major>.<minor>.<patch>.<build>\n
//! Handle:    H<hex_handle>\n
//! ```
//!
//! Nothing here performs I/O.

use daxpanel_core::{Error, Result, SampleRate};

// ---------------------------------------------------------------------------
// Command encoding
// ---------------------------------------------------------------------------

/// Frame a command with its sequence number: `C<seq>|<command>\n`.
pub fn encode_command(seq: u32, command: &str) -> Vec<u8> {
    format!("C{seq}|{command}\n").into_bytes()
}

// ---------------------------------------------------------------------------
// Command builders
//
// Builders return the command text only; the client adds `C<seq>|`.
// ---------------------------------------------------------------------------

/// `client program <name>`
pub fn cmd_client_program(name: &str) -> String {
    format!("client program {name}")
}

/// `sub <object> all`
pub fn cmd_subscribe(object: &str) -> String {
    format!("sub {object} all")
}

/// `client udpport <port>`, telling the radio where to send VITA-49 data.
pub fn cmd_client_udpport(port: u16) -> String {
    format!("client udpport {port}")
}

/// `client low_bw_dax=<0|1>`: ask for reduced-bandwidth DAX audio.
pub fn cmd_client_low_bandwidth_dax(enabled: bool) -> String {
    format!("client low_bw_dax={}", u8::from(enabled))
}

/// `stream create type=dax_rx dax_channel=<n>`
///
/// The response data is the new stream's handle, which doubles as the
/// VITA-49 stream id of the audio packets.
pub fn cmd_stream_create_dax_rx(dax_channel: u8) -> String {
    format!("stream create type=dax_rx dax_channel={dax_channel}")
}

/// `stream create type=dax_mic`
pub fn cmd_stream_create_dax_mic() -> String {
    "stream create type=dax_mic".to_string()
}

/// `stream create type=dax_tx`
///
/// The radio accepts one Transmit stream per client.
pub fn cmd_stream_create_dax_tx() -> String {
    "stream create type=dax_tx".to_string()
}

/// `stream create type=dax_iq daxiq_channel=<n>`
pub fn cmd_stream_create_dax_iq(daxiq_channel: u8) -> String {
    format!("stream create type=dax_iq daxiq_channel={daxiq_channel}")
}

/// `stream set 0x<id> daxiq_rate=<hz>`
pub fn cmd_stream_set_iq_rate(stream_id: u32, rate: SampleRate) -> String {
    format!("stream set 0x{stream_id:08X} daxiq_rate={}", rate.hz())
}

/// `stream remove 0x<id>`, zero-padded uppercase hex as the radio reports it.
pub fn cmd_stream_remove(stream_id: u32) -> String {
    format!("stream remove 0x{stream_id:08X}")
}

// ---------------------------------------------------------------------------
// Decoded line types
// ---------------------------------------------------------------------------

/// Response to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartSdrResponse {
    pub sequence: u32,
    /// `0` on success, otherwise a SmartSDR error code.
    pub error_code: u32,
    /// Response data, possibly empty. For `stream create` this is the handle.
    pub message: String,
}

impl SmartSdrResponse {
    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }
}

/// Unsolicited status line.
#[derive(Debug, Clone, PartialEq)]
pub struct SmartSdrStatus {
    pub handle: u32,
    /// Object words before the first `key=value`, e.g. `"stream 0x04000008"`.
    pub object: String,
    pub params: Vec<(String, String)>,
}

impl SmartSdrStatus {
    /// Value of the first parameter named `key`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Bare words after the object (e.g. `removed`) are kept as params with
    /// an empty value.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.params.iter().any(|(k, v)| k == flag && v.is_empty())
    }
}

/// Handshake version line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmartSdrVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
}

impl std::fmt::Display for SmartSdrVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

/// One line from the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum SmartSdrMessage {
    Version(SmartSdrVersion),
    Handle(u32),
    Response(SmartSdrResponse),
    Status(SmartSdrStatus),
    Message(String),
    Unknown(String),
}

// ---------------------------------------------------------------------------
// Line parsing
// ---------------------------------------------------------------------------

/// Parse one line (without its newline) received from the radio.
pub fn parse_message(line: &str) -> Result<SmartSdrMessage> {
    let line = line.trim();
    let Some(tag) = line.chars().next() else {
        return Err(Error::Protocol("empty line".into()));
    };
    let body = &line[tag.len_utf8()..];
    match tag {
        'V' => parse_version(line, body),
        'H' => parse_hex(body, "handle").map(SmartSdrMessage::Handle),
        'R' => parse_response(line, body),
        'S' => parse_status(line, body),
        'M' => {
            let (_, text) = split_pipe(line, body)?;
            Ok(SmartSdrMessage::Message(text.to_string()))
        }
        _ => Ok(SmartSdrMessage::Unknown(line.to_string())),
    }
}

fn split_pipe<'a>(line: &str, body: &'a str) -> Result<(&'a str, &'a str)> {
    body.split_once('|')
        .ok_or_else(|| Error::Protocol(format!("missing '|' in line: {line}")))
}

fn parse_hex(s: &str, what: &str) -> Result<u32> {
    u32::from_str_radix(s, 16).map_err(|_| Error::Protocol(format!("invalid {what}: {s}")))
}

fn parse_version(line: &str, body: &str) -> Result<SmartSdrMessage> {
    let numbers = body
        .split('.')
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| Error::Protocol(format!("invalid version number: {part}")))
        })
        .collect::<Result<Vec<_>>>()?;
    let [major, minor, patch, build] = numbers[..] else {
        return Err(Error::Protocol(format!("invalid version format: {line}")));
    };
    Ok(SmartSdrMessage::Version(SmartSdrVersion {
        major,
        minor,
        patch,
        build,
    }))
}

fn parse_response(line: &str, body: &str) -> Result<SmartSdrMessage> {
    let (seq, rest) = split_pipe(line, body)?;
    let (code, message) = rest.split_once('|').unwrap_or((rest, ""));
    let sequence = seq
        .parse::<u32>()
        .map_err(|_| Error::Protocol(format!("invalid response sequence number: {seq}")))?;
    let error_code = parse_hex(code, "response error code")?;
    Ok(SmartSdrMessage::Response(SmartSdrResponse {
        sequence,
        error_code,
        message: message.to_string(),
    }))
}

fn parse_status(line: &str, body: &str) -> Result<SmartSdrMessage> {
    let (handle, payload) = split_pipe(line, body)?;
    let handle = parse_hex(handle, "status handle")?;

    // Leading words without '=' name the object; the rest are parameters.
    let mut tokens = payload.split_whitespace().peekable();
    let mut object = Vec::new();
    while let Some(token) = tokens.next_if(|t| !t.contains('=')) {
        object.push(token);
        // A stream object is "stream <id>"; anything after is a flag.
        if object.len() == 2 && object[0] == "stream" {
            break;
        }
    }
    let params = tokens
        .map(|token| match token.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (token.to_string(), String::new()),
        })
        .collect();

    Ok(SmartSdrMessage::Status(SmartSdrStatus {
        handle,
        object: object.join(" "),
        params,
    }))
}

/// Parse the stream handle returned by `stream create`.
///
/// The radio answers with bare hex (`04000008`) or `0x`-prefixed hex.
pub fn parse_stream_handle(data: &str) -> Result<u32> {
    let data = data.trim();
    let hex = data
        .strip_prefix("0x")
        .or_else(|| data.strip_prefix("0X"))
        .unwrap_or(data);
    if hex.is_empty() {
        return Err(Error::Protocol("empty stream handle".into()));
    }
    parse_hex(hex, "stream handle")
}

/// If `status` reports that a stream was removed, return its id.
///
/// `S<handle>|stream 0x04000008 removed`
pub fn stream_removed(status: &SmartSdrStatus) -> Option<u32> {
    let id = status.object.strip_prefix("stream ")?;
    if !status.has_flag("removed") {
        return None;
    }
    parse_stream_handle(id).ok()
}
