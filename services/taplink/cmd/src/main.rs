//! Tap link host binary.
//!
//! Reads framed traffic from a capture agent (stdin by default), logs every
//! interface report and captured frame, and answers each frame with an ACK
//! or NAK on the agent's input pipe (stdout by default).

use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use taplink_session::{run_link, EventSink, LinkEvent, LinkStats};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::TaplinkConfig;
use logging::TaplinkLogFormatter;

/// Host side of the tap agent link
#[derive(Parser, Debug)]
#[command(name = "taplink", version, about = "Host side of the tap agent link")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "taplink.yaml")]
    config: PathBuf,

    /// Agent output to read frames from ('-' for stdin)
    #[arg(long, default_value = "-")]
    input: String,

    /// Agent input to write responses to ('-' for stdout)
    #[arg(long, default_value = "-")]
    output: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Receive buffer ceiling in bytes; overrides the config file
    #[arg(long)]
    max_buffer_bytes: Option<usize>,

    /// Do not send EOT to the agent on Ctrl-C
    #[arg(long)]
    no_eot: bool,
}

/// Event sink that renders every link event as a log line
struct LogSink;

impl EventSink for LogSink {
    fn on_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::InterfaceInfo(info) => {
                component_info!(
                    "link",
                    "Interface MAC: {} MTU: {} IDX: {} NAME: {}",
                    info.mac,
                    info.mtu,
                    info.ifindex,
                    info.name
                );
            }
            LinkEvent::EthernetFrame { frame, ipv6 } => {
                component_info!(
                    "link",
                    "Ethernet dst {} src {} type 0x{:04x} ({} bytes)",
                    frame.dst_mac,
                    frame.src_mac,
                    frame.ethertype,
                    frame.l3_payload.len()
                );
                if let Some(ip) = ipv6 {
                    component_info!(
                        "link",
                        "IPv6 priority {} flow 0x{:05x} {} -> {} length {} next {} hops {}",
                        ip.priority,
                        ip.flow_label(),
                        ip.src_addr(),
                        ip.dst_addr(),
                        ip.payload_length,
                        ip.next_header,
                        ip.hop_limit
                    );
                }
            }
            LinkEvent::UnknownFrame { tag, payload } => {
                component_warn!(
                    "link",
                    "Unknown frame type 0x{:02x} ({} bytes)",
                    tag,
                    payload.len()
                );
            }
            LinkEvent::EmptyFrame => {
                component_warn!("link", "Empty frame from agent");
            }
            LinkEvent::DecodeError { kind, error } => {
                component_warn!("link", "Bad {:?} frame: {}", kind, error);
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // loaded before the subscriber exists, so its own log lines are not shown
    let mut taplink_config = TaplinkConfig::load_from_file(&args.config)?;
    taplink_config.apply_cli_overrides(
        args.log_level.clone(),
        args.max_buffer_bytes,
        args.no_eot,
    )?;

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("taplink={}", taplink_config.log_level).parse()?)
        .add_directive(format!("taplink_session={}", taplink_config.log_level).parse()?)
        .add_directive(format!("taplink_wire={}", taplink_config.log_level).parse()?);

    let formatter = TaplinkLogFormatter::new("taplink".to_string());

    // stdout may carry frames to the agent
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .event_format(formatter)
        .init();

    info!("Starting taplink v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Link config from {:?}: max_buffer_bytes={}, read_chunk_bytes={}, send_eot_on_exit={}",
        args.config,
        taplink_config.max_buffer_bytes,
        taplink_config.read_chunk_bytes,
        taplink_config.send_eot_on_exit
    );

    let reader = open_input(&args.input).await?;
    let writer = open_output(&args.output).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => warn!("Failed to install Ctrl-C handler: {}", e),
        }
    });

    let started = Instant::now();
    let stats = match run_link(
        reader,
        writer,
        taplink_config.link_config(),
        &mut LogSink,
        Some(shutdown_rx),
    )
    .await
    {
        Ok(stats) => stats,
        Err(e) => {
            component_error!("link", "Link failed: {}", e);
            return Err(e.into());
        }
    };

    log_stats(&stats, started);
    info!("taplink stopped");
    Ok(())
}

async fn open_input(path: &str) -> anyhow::Result<Box<dyn AsyncRead + Unpin + Send>> {
    if path == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open input {}: {}", path, e))?;
    info!("Reading agent output from {}", path);
    Ok(Box::new(file))
}

async fn open_output(path: &str) -> anyhow::Result<Box<dyn AsyncWrite + Unpin + Send>> {
    if path == "-" {
        return Ok(Box::new(tokio::io::stdout()));
    }
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open output {}: {}", path, e))?;
    info!("Writing responses to {}", path);
    Ok(Box::new(file))
}

fn log_stats(stats: &LinkStats, started: Instant) {
    let elapsed = std::time::Duration::from_secs(started.elapsed().as_secs());
    component_info!(
        "link",
        "Link closed after {}: {} frames ({} bytes), {} ACK, {} NAK, {} bad, {} unknown, {} empty",
        humantime::format_duration(elapsed),
        stats.frames_received,
        stats.bytes_in,
        stats.acks_sent,
        stats.naks_sent,
        stats.decode_errors,
        stats.unknown_frames,
        stats.empty_frames
    );
    if stats.noise_dropped > 0 {
        component_warn!(
            "link",
            "Dropped {} bytes outside of frames",
            stats.noise_dropped
        );
    }
}
