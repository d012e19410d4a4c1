// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! wsd-monitor - Watch live WS-Discovery traffic
//!
//! Logs Hello/Bye/Probe/Resolve as they arrive, optionally sends a Probe,
//! and dumps the discovered endpoints on exit (Ctrl+C).

use clap::Parser;
use colored::*;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wsd::{
    DiscoveryBody, DiscoveryConfig, DiscoveryData, DiscoveryMessage, DiscoveryNode,
    DiscoveryResult, InboundMessage, JsonCodec, MessageType, ObservabilitySink, ProbeData,
    ProbeEvent, QName, RegistryEventKind, SharedListener,
};

/// Watch live WS-Discovery traffic
#[derive(Parser, Debug)]
#[command(name = "wsd-monitor")]
#[command(version = "0.1.0")]
#[command(about = "Watch WS-Discovery traffic and dump discovered endpoints")]
struct Args {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Discovery UDP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Multicast group
    #[arg(short, long)]
    group: Option<Ipv4Addr>,

    /// Send a multicast Probe for this type ("{namespace}Local" or "Local"); repeatable
    #[arg(long = "probe", value_name = "TYPE")]
    probe: Vec<String>,

    /// Probe window in seconds (default: match_timeout_ms from the config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Output format for the final dump: pretty, json
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Quiet mode - compact output
    #[arg(long)]
    quiet: bool,
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(OutputFormat::Pretty),
            "json" | "j" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

/// Prints every accepted message.
struct ConsoleSink {
    quiet: bool,
}

impl ObservabilitySink for ConsoleSink {
    fn inbound(&self, message: &DiscoveryMessage, source: SocketAddr) {
        let kind = message.message_type().to_string();
        let kind = match message.body {
            DiscoveryBody::Hello(_) => kind.green(),
            DiscoveryBody::Bye(_) => kind.red(),
            DiscoveryBody::Fault(_) => kind.yellow(),
            _ => kind.cyan(),
        };
        let subject = message
            .header
            .endpoint
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default();

        if self.quiet {
            println!("{} {} {}", kind, source, subject);
            return;
        }
        let seq = message
            .header
            .app_sequence
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{} {:<14} from {:<21} {} {}",
            "<-".dimmed(),
            kind.bold(),
            source,
            subject,
            format!("seq={} id={}", seq, message.id()).dimmed()
        );
    }

    fn outbound(&self, message: &DiscoveryMessage, destination: SocketAddr) {
        if !self.quiet {
            println!(
                "{} {:<14} to   {}",
                "->".dimmed(),
                message.message_type().to_string().bold(),
                destination
            );
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut config = match &args.config {
        Some(path) => DiscoveryConfig::from_file(path)?,
        None => DiscoveryConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(group) = args.group {
        config.multicast_group = group;
    }

    if !args.quiet {
        eprintln!(
            "{} WS-Discovery monitor ({}:{}), Ctrl+C to stop",
            ">>>".green().bold(),
            config.multicast_group,
            config.port
        );
    }

    let window = probe_window(args.timeout, &config);
    let node = DiscoveryNode::start(
        config,
        Arc::new(JsonCodec),
        Arc::new(ConsoleSink { quiet: args.quiet }),
    )?;
    // Without a listener Probe and Resolve are dropped as not relevant.
    let passive = observer();
    for kind in MessageType::LISTENABLE {
        node.register(kind, Arc::clone(&passive));
    }
    let events = node.registry().subscribe();

    if !args.probe.is_empty() {
        let probe = ProbeData {
            types: args.probe.iter().map(|t| parse_qname(t)).collect(),
            ..ProbeData::default()
        };
        let quiet = args.quiet;
        let tokens = node.probe(
            probe,
            window,
            Arc::new(move |event: ProbeEvent| match event {
                ProbeEvent::Match { message, .. } => {
                    if let DiscoveryBody::ProbeMatches(matches) = &message.body {
                        for data in matches {
                            println!("{} {}", "match".green().bold(), describe(data, quiet));
                        }
                    }
                }
                ProbeEvent::Fault { fault, .. } => {
                    println!("{} {:?} {}", "fault".yellow().bold(), fault.code, fault.reason);
                }
                ProbeEvent::Finished { matches } => {
                    eprintln!("{}", format!("    probe finished, {} match(es)", matches).dimmed());
                }
            }),
        )?;
        log::debug!("probe sent as {:?}", tokens);
    }

    while running.load(Ordering::SeqCst) {
        let Ok(event) = events.recv_timeout(Duration::from_millis(200)) else {
            continue;
        };
        if args.quiet {
            continue;
        }
        let label = match event.kind {
            RegistryEventKind::Discovered => "discovered".green(),
            RegistryEventKind::Updated => "updated".cyan(),
            RegistryEventKind::Lost => "lost".red(),
        };
        println!("   {} {}", label.bold(), describe(&event.data, false));
    }

    let metrics = node.metrics().snapshot();
    let records = node.registry().snapshot();
    node.shutdown();

    match args.format {
        OutputFormat::Pretty => {
            println!();
            println!("{}", "=== WS-Discovery endpoints ===".bold());
            for (i, data) in records.iter().enumerate() {
                println!("  {} {}", format!("[{}]", i + 1).yellow(), describe(data, args.quiet));
            }
            println!();
            println!(
                "{} received={} accepted={} duplicates={} stale={} not_relevant={} undecodable={}",
                "Traffic:".cyan().bold(),
                metrics.datagrams_received,
                metrics.accepted,
                metrics.duplicates,
                metrics.stale,
                metrics.not_relevant,
                metrics.decode_failures
            );
        }
        OutputFormat::Json => {
            let dump = serde_json::json!({
                "endpoints": records,
                "metrics": metrics,
            });
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
    }

    Ok(())
}

/// Listener that answers nothing; it only makes every kind reach the sink.
fn observer() -> SharedListener {
    Arc::new(|_: &InboundMessage| -> DiscoveryResult<Option<DiscoveryBody>> { Ok(None) })
}

fn probe_window(seconds: Option<u64>, config: &DiscoveryConfig) -> Duration {
    seconds.map_or_else(|| config.match_timeout(), Duration::from_secs)
}

fn parse_qname(text: &str) -> QName {
    match text.strip_prefix('{').and_then(|rest| rest.split_once('}')) {
        Some((namespace, local)) => QName::new(namespace, local),
        None => QName::new("", text),
    }
}

fn describe(data: &DiscoveryData, quiet: bool) -> String {
    if quiet {
        return format!("{} v{}", data.endpoint_reference, data.metadata_version);
    }
    let types: Vec<String> = data.types.iter().map(|t| t.to_string()).collect();
    let addresses: Vec<&str> = data.x_addresses.iter().map(|a| a.address.as_str()).collect();
    format!(
        "{} v{} types=[{}] xaddrs=[{}] scopes={}",
        data.endpoint_reference.to_string().green(),
        data.metadata_version,
        types.join(" "),
        addresses.join(" "),
        data.scopes.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qname_forms() {
        let q = parse_qname("{http://www.onvif.org/ver10/network/wsdl}NetworkVideoTransmitter");
        assert_eq!(q.namespace, "http://www.onvif.org/ver10/network/wsdl");
        assert_eq!(q.local_part, "NetworkVideoTransmitter");
        assert_eq!(parse_qname("Device"), QName::new("", "Device"));
    }

    #[test]
    fn test_probe_window_defaults_to_config() {
        let config = DiscoveryConfig {
            match_timeout_ms: 2_500,
            ..DiscoveryConfig::default()
        };
        assert_eq!(probe_window(None, &config), Duration::from_millis(2_500));
        assert_eq!(probe_window(Some(3), &config), Duration::from_secs(3));
    }

    #[test]
    fn test_observer_never_replies() {
        use std::net::SocketAddr;
        use wsd::{DiscoveryListener, Reception};

        let inbound = InboundMessage {
            message: DiscoveryMessage::new(DiscoveryBody::Probe(ProbeData::default())),
            source: SocketAddr::from(([10, 0, 0, 2], 3702)),
            reception: Reception::Multicast,
        };
        assert!(observer().on_message(&inbound).unwrap().is_none());
    }

    #[test]
    fn test_output_format_parse() {
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
