// daxpanel -- command-line DAX channel panel.
//
// Usage:
//   daxpanel devices
//   daxpanel channels
//   daxpanel set rx1 --enable --device "USB Audio CODEC" --gain 70
//   daxpanel set iq2 --rate 96000
//   daxpanel set tx --disable --no-device
//   daxpanel prefs --auto-start true --hide iq
//   daxpanel run --host 192.168.1.100
//   daxpanel run                      (last radio, when auto start is on)
//
// Channel settings are stored in <config dir>/daxpanel/settings.json unless
// --settings is given. `run` connects to the radio and keeps every enabled
// channel streaming until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use daxpanel::channels::ChannelManagerBuilder;
use daxpanel::flex::FlexSessionBuilder;
use daxpanel::settings::{JsonSettingsStore, SettingsDocument};
use daxpanel::{
    AudioDeviceDirectory, ChannelId, ChannelKind, ChannelRecord, DeviceRef, EndpointFactory, Gain, PanelEvent,
    RadioSession, SampleRate, SettingsStore,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often `run` re-reads the audio device list.
const DEVICE_REFRESH: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// DAX channel panel for FlexRadio SmartSDR radios.
#[derive(Parser)]
#[command(name = "daxpanel", version, about)]
struct Cli {
    /// Settings file (default: <config dir>/daxpanel/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (e.g. info, debug, daxpanel_channels=trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List audio devices channels can be bound to.
    Devices,

    /// Show stored channel settings and panel preferences.
    Channels,

    /// Change one channel's stored settings.
    Set(SetArgs),

    /// Change panel preferences.
    Prefs(PrefsArgs),

    /// Connect to a radio and keep channels streaming until Ctrl-C.
    Run(RunArgs),
}

#[derive(clap::Args)]
struct SetArgs {
    /// Channel: rx1..rx8, mic, tx, iq1..iq4.
    channel: ChannelId,

    /// Turn the channel on.
    #[arg(long, conflicts_with = "disable")]
    enable: bool,

    /// Turn the channel off.
    #[arg(long)]
    disable: bool,

    /// Audio device name.
    #[arg(long, conflicts_with = "no_device")]
    device: Option<String>,

    /// Clear the audio device.
    #[arg(long)]
    no_device: bool,

    /// Gain in percent, 0-100 (ignored for IQ channels).
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    gain: Option<u8>,

    /// IQ sample rate in Hz: 24000, 48000, 96000 or 192000.
    #[arg(long)]
    rate: Option<u32>,

    /// Show or hide the channel's detail controls.
    #[arg(long)]
    details: Option<bool>,
}

#[derive(clap::Args)]
struct PrefsArgs {
    /// Connect to the last radio when `run` is given no --host.
    #[arg(long)]
    auto_start: Option<bool>,

    /// Request reduced-bandwidth DAX audio by default.
    #[arg(long)]
    low_bandwidth: Option<bool>,

    /// Station name announced to the radio.
    #[arg(long)]
    station: Option<String>,

    /// Show panel sections (tx, mic, rx, iq).
    #[arg(long, value_delimiter = ',')]
    show: Vec<ChannelKind>,

    /// Hide panel sections (tx, mic, rx, iq). Channels in hidden sections
    /// do not stream.
    #[arg(long, value_delimiter = ',')]
    hide: Vec<ChannelKind>,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Radio IP address or hostname (default: the last radio used, if auto
    /// start is on).
    #[arg(long)]
    host: Option<String>,

    /// SmartSDR TCP port.
    #[arg(long, default_value_t = 4992)]
    tcp_port: u16,

    /// Local UDP port for DAX data (0 = any free port).
    #[arg(long, default_value_t = 4991)]
    udp_port: u16,

    /// Request reduced-bandwidth DAX audio.
    #[arg(long)]
    low_bandwidth: bool,

    /// Number of Receive channels.
    #[arg(long, default_value_t = 4)]
    receive_channels: u8,

    /// Number of IQ channels.
    #[arg(long, default_value_t = 4)]
    iq_channels: u8,
}

// ---------------------------------------------------------------------------
// Audio backend selection
// ---------------------------------------------------------------------------

struct AudioBackend {
    directory: Arc<dyn AudioDeviceDirectory>,
    factory: Arc<dyn EndpointFactory>,
}

#[cfg(feature = "cpal")]
fn audio_backend() -> AudioBackend {
    let backend = Arc::new(daxpanel::audio::CpalBackend::new());
    AudioBackend {
        directory: backend.clone(),
        factory: backend,
    }
}

/// Without hardware support, channels bind to a virtual device pair.
#[cfg(not(feature = "cpal"))]
fn audio_backend() -> AudioBackend {
    let bus = daxpanel::audio::AudioBus::new();
    bus.add_output("virtual-out", "Virtual output");
    bus.add_input("virtual-in", "Virtual input");
    let bus = Arc::new(bus);
    AudioBackend {
        directory: bus.clone(),
        factory: bus,
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_devices() -> Result<()> {
    let devices = audio_backend()
        .directory
        .list()
        .context("failed to list audio devices")?;
    if devices.is_empty() {
        println!("No audio devices found.");
        return Ok(());
    }
    println!("{:<40} {:>5} {:>6}", "DEVICE", "INPUT", "OUTPUT");
    for device in &devices {
        println!(
            "{:<40} {:>5} {:>6}",
            device.name,
            yes_no(device.is_input),
            yes_no(device.is_output)
        );
    }
    Ok(())
}

async fn cmd_channels(store: &JsonSettingsStore) -> Result<()> {
    let doc = store
        .document()
        .await
        .with_context(|| format!("failed to read {}", store.path().display()))?;
    print_document(&doc);
    Ok(())
}

async fn cmd_set(store: &JsonSettingsStore, args: SetArgs) -> Result<()> {
    let doc = store.document().await?;
    let mut record = doc
        .channel(args.channel)
        .cloned()
        .unwrap_or_else(|| ChannelRecord::new(args.channel));

    if args.enable {
        record.enabled = true;
    }
    if args.disable {
        record.enabled = false;
    }
    if let Some(device) = args.device {
        record.device = Some(DeviceRef::new(device));
    }
    if args.no_device {
        record.device = None;
    }
    if let Some(gain) = args.gain {
        record.gain = Gain::new(gain)?;
    }
    if let Some(hz) = args.rate {
        if !record.kind().uses_sample_rate() {
            bail!("{} has no sample rate; only IQ channels do", record.id);
        }
        record.sample_rate = SampleRate::from_hz(hz)?;
    }
    if let Some(details) = args.details {
        record.details_visible = details;
    }

    store
        .save(&record)
        .await
        .with_context(|| format!("failed to write {}", store.path().display()))?;
    print_record(&record);
    Ok(())
}

async fn cmd_prefs(store: &JsonSettingsStore, args: PrefsArgs) -> Result<()> {
    let mut prefs = store.preferences().await?;
    if let Some(auto_start) = args.auto_start {
        prefs.auto_start = auto_start;
    }
    if let Some(low_bandwidth) = args.low_bandwidth {
        prefs.low_bandwidth = low_bandwidth;
    }
    if let Some(station) = args.station {
        prefs.station = station;
    }
    for kind in args.show {
        prefs.visible_sections.set(kind, true);
    }
    for kind in args.hide {
        prefs.visible_sections.set(kind, false);
    }
    store
        .set_preferences(prefs)
        .await
        .with_context(|| format!("failed to write {}", store.path().display()))?;
    cmd_channels(store).await
}

async fn cmd_run(store: Arc<JsonSettingsStore>, args: RunArgs) -> Result<()> {
    let mut prefs = store.preferences().await?;
    let Some(host) = prefs.startup_host(args.host) else {
        bail!("no radio to connect to: pass --host, or turn on auto start with `prefs --auto-start true`");
    };

    let session = FlexSessionBuilder::new()
        .host(&host)
        .tcp_port(args.tcp_port)
        .udp_port(args.udp_port)
        .client_name(&prefs.station)
        .low_bandwidth(args.low_bandwidth || prefs.low_bandwidth)
        .build()
        .await
        .with_context(|| format!("failed to connect to radio at {host}"))?;
    let session = Arc::new(session);
    let session_events = session.subscribe();

    let visible = prefs.visible_sections;
    if prefs.last_host.as_deref() != Some(host.as_str()) {
        prefs.last_host = Some(host.clone());
        store.set_preferences(prefs).await?;
    }

    let audio = audio_backend();
    let manager = ChannelManagerBuilder::new(session.clone(), audio.factory.clone())
        .receive_channels(args.receive_channels)
        .iq_channels(args.iq_channels)
        .settings(store.clone())
        .announce_connectivity(false)
        .build()
        .await
        .context("failed to start channels")?;
    let manager = Arc::new(manager);
    let mut panel_events = manager.subscribe();

    // Hidden sections and unplugged devices are settled before any channel
    // sees the radio, so neither requests a stream.
    for channel in manager.all() {
        if !visible.shows(channel.kind()) {
            channel.disappear().await?;
        }
    }
    manager
        .devices_changed(&audio.directory.list()?)
        .await
        .context("failed to check audio devices")?;
    manager.connectivity_changed(session.is_connected()).await?;
    let follower = manager.spawn_connectivity_follower(session_events);

    println!("Connected to {host}. Press Ctrl-C to stop.");
    for channel in manager.all() {
        let snapshot = channel.snapshot();
        println!("  {:<5} {}", channel.id().to_string(), snapshot.status);
    }

    let mut refresh = tokio::time::interval(DEVICE_REFRESH);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = refresh.tick() => match audio.directory.list() {
                Ok(devices) => {
                    if let Err(e) = manager.devices_changed(&devices).await {
                        tracing::warn!(error = %e, "device refresh incomplete");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to list audio devices"),
            },
            event = panel_events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "panel events lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    println!("Stopping...");
    manager.shutdown().await;
    follower.abort();
    session.disconnect().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn print_document(doc: &SettingsDocument) {
    let prefs = &doc.preferences;
    println!("Station:        {}", prefs.station);
    println!(
        "Last radio:     {}",
        prefs.last_host.as_deref().unwrap_or("(none)")
    );
    println!("Auto start:     {}", yes_no(prefs.auto_start));
    println!("Low bandwidth:  {}", yes_no(prefs.low_bandwidth));
    let hidden: Vec<String> = ChannelKind::ALL
        .into_iter()
        .filter(|kind| !prefs.visible_sections.shows(*kind))
        .map(|kind| kind.prefix().to_string())
        .collect();
    if !hidden.is_empty() {
        println!("Hidden:         {}", hidden.join(", "));
    }
    println!();
    if doc.channels.is_empty() {
        println!("No channels configured.");
        return;
    }
    println!(
        "{:<5} {:<8} {:<32} {:>5} {:>7} {:<7}",
        "CH", "ENABLED", "DEVICE", "GAIN", "RATE", "DETAILS"
    );
    for record in &doc.channels {
        print_record(record);
    }
}

fn print_record(record: &ChannelRecord) {
    let device = record.device.as_ref().map(|d| d.as_str()).unwrap_or("-");
    let gain = if record.kind().uses_gain() {
        record.gain.to_string()
    } else {
        "-".to_string()
    };
    let rate = if record.kind().uses_sample_rate() {
        record.sample_rate.to_string()
    } else {
        "-".to_string()
    };
    println!(
        "{:<5} {:<8} {:<32} {:>5} {:>7} {:<7}",
        record.id.to_string(),
        yes_no(record.enabled),
        device,
        gain,
        rate,
        if record.details_visible { "shown" } else { "hidden" }
    );
}

fn print_event(event: &PanelEvent) {
    match event {
        PanelEvent::ConnectivityChanged { connected: true } => println!("[radio] connected"),
        PanelEvent::ConnectivityChanged { connected: false } => println!("[radio] disconnected"),
        PanelEvent::StatusChanged { channel, status } => println!("[{channel}] {status}"),
        PanelEvent::StreamFailed { channel, reason } => {
            println!("[{channel}] stream failed, channel disabled: {reason}");
        }
        PanelEvent::DeviceLost { channel, device } => {
            println!("[{channel}] audio device {device} is gone");
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn init_logging(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn settings_store(path: Option<PathBuf>) -> Result<JsonSettingsStore> {
    match path {
        Some(path) => Ok(JsonSettingsStore::new(path)),
        None => JsonSettingsStore::open_default().context("pass --settings to choose a file"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Command::Devices => cmd_devices(),
        Command::Channels => cmd_channels(&settings_store(cli.settings)?).await,
        Command::Set(args) => cmd_set(&settings_store(cli.settings)?, args).await,
        Command::Prefs(args) => cmd_prefs(&settings_store(cli.settings)?, args).await,
        Command::Run(args) => cmd_run(Arc::new(settings_store(cli.settings)?), args).await,
    }
}
