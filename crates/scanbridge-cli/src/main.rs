//! scanbridge - Dry-run harness for local scan policies
//!
//! Builds an in-memory message from a file and envelope arguments, runs
//! one scan through the bridge and prints the disposition, the final
//! recipients, any added headers and the host log.

mod message;

use anyhow::{Context, Result};
use clap::Parser;
use scanbridge_common::config::{Config, LoggingConfig};
use scanbridge_common::types::{HeaderLine, LocalScanCode, SessionInfo};
use scanbridge_core::{LocalScanBridge, LogRecord, MemoryHost, SourceLoader};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, info_span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "scanbridge", version, about = "Run a local scan policy against a message")]
struct Args {
    /// Configuration file (default: ./scanbridge.toml or /etc/scanbridge/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Message file; only the header section is read
    #[arg(short, long)]
    message: Option<PathBuf>,

    /// Envelope sender
    #[arg(long)]
    sender: Option<String>,

    /// Envelope recipient, may be repeated
    #[arg(long = "rcpt", value_name = "ADDRESS")]
    recipients: Vec<String>,

    #[arg(long)]
    sender_host_address: Option<String>,

    #[arg(long)]
    sender_host_name: Option<String>,

    #[arg(long, default_value_t = 0)]
    sender_host_port: i32,

    /// Authenticator name, when the session authenticated
    #[arg(long)]
    authenticated: Option<String>,

    #[arg(long)]
    interface_address: Option<String>,

    #[arg(long, default_value_t = 25)]
    interface_port: i32,

    #[arg(long, default_value = "esmtp")]
    protocol: String,

    /// Load the user module from this file instead of the script paths
    #[arg(long)]
    script: Option<PathBuf>,

    /// Extra directory to search for the user module, may be repeated
    #[arg(long = "script-dir", value_name = "DIR")]
    script_dirs: Vec<PathBuf>,

    /// Expansion variable as NAME=VALUE, may be repeated
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_variable)]
    variables: Vec<(String, String)>,

    /// Spool descriptor passed through to the script
    #[arg(long, default_value_t = 0)]
    fd: i32,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

/// What one scan did to the message
#[derive(Debug, Serialize)]
struct ScanReport {
    message_id: String,
    code: i32,
    disposition: Option<&'static str>,
    return_text: Option<String>,
    recipients: Vec<String>,
    added_headers: Vec<HeaderLine>,
    log: Vec<LogRecord>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(Config::default_path);
    let mut config = Config::layered(config_path.as_deref()).context("Failed to load configuration")?;

    init_logging(&config.logging);

    if !args.script_dirs.is_empty() {
        config.bridge.script_paths = args.script_dirs.clone();
    }

    let message_id = Uuid::now_v7();
    let span = info_span!("message", id = %message_id);
    let _enter = span.enter();

    let headers = match args.message {
        Some(ref path) => {
            let raw = std::fs::read(path)
                .with_context(|| format!("Failed to read message {}", path.display()))?;
            message::parse_headers(&raw)?
        }
        None => Vec::new(),
    };
    let original_headers = headers.len();

    let mut host = build_host(&args, headers, &message_id);

    let bridge = match args.script {
        Some(ref path) => {
            let loader = SourceLoader::new()
                .with_file(config.bridge.user_module.clone(), path)
                .map_err(|e| {
                    scanbridge_common::Error::Script(format!(
                        "Failed to read {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            LocalScanBridge::with_loader(config.bridge.clone(), Box::new(loader))
        }
        None => LocalScanBridge::new(config.bridge.clone()),
    };

    info!(
        module = %bridge.config().user_module,
        entry_point = %bridge.config().entry_point,
        recipients = host.recipient_list().len(),
        headers = original_headers,
        "Scanning message"
    );
    let result = bridge.scan(&mut host, args.fd);

    let report = ScanReport {
        message_id: message_id.to_string(),
        code: result.code,
        disposition: result.known_code().map(LocalScanCode::constant_name),
        return_text: result.return_text,
        recipients: host.recipient_list().to_vec(),
        added_headers: host.header_lines()[original_headers..].to_vec(),
        log: host.log_records().to_vec(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn build_host(args: &Args, headers: Vec<HeaderLine>, message_id: &Uuid) -> MemoryHost {
    let session = SessionInfo {
        sender_address: args.sender.clone(),
        interface_address: args.interface_address.clone(),
        interface_port: args.interface_port,
        received_protocol: Some(args.protocol.clone()),
        sender_host_address: args.sender_host_address.clone(),
        sender_host_authenticated: args.authenticated.clone(),
        sender_host_name: args.sender_host_name.clone(),
        sender_host_port: args.sender_host_port,
    };

    let mut host = MemoryHost::new(session)
        .with_recipients(args.recipients.iter().cloned())
        .with_variable("message_id", &message_id.to_string());
    for header in headers {
        host = host.with_header(header);
    }
    for (name, value) in &args.variables {
        host = host.with_variable(name, value);
    }
    host
}

fn print_report(report: &ScanReport) {
    match report.disposition {
        Some(name) => println!("code: {} ({})", report.code, name),
        None => println!("code: {}", report.code),
    }
    if let Some(ref text) = report.return_text {
        println!("text: {}", text);
    }

    println!("recipients:");
    for recipient in &report.recipients {
        println!("  {}", recipient);
    }

    if !report.added_headers.is_empty() {
        println!("added headers:");
        for header in &report.added_headers {
            print!("  {}", header.text);
        }
    }

    if !report.log.is_empty() {
        println!("log:");
        for record in &report.log {
            println!("  [{}] {}", record.selector, record.text);
        }
    }
}

fn parse_variable(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},scanbridge=debug", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scanbridge_core::HostServices;

    #[test]
    fn test_parse_variable() {
        assert_eq!(
            parse_variable("primary_hostname=mx.local").unwrap(),
            ("primary_hostname".to_string(), "mx.local".to_string())
        );
        assert_eq!(parse_variable("empty=").unwrap().1, "");
        assert!(parse_variable("=value").is_err());
        assert!(parse_variable("novalue").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "scanbridge",
            "--sender",
            "a@example.com",
            "--rcpt",
            "b@example.org",
            "--rcpt",
            "c@example.org",
            "--var",
            "primary_hostname=mx.local",
            "--json",
        ]);
        assert_eq!(args.recipients, vec!["b@example.org", "c@example.org"]);
        assert_eq!(args.variables.len(), 1);
        assert_eq!(args.protocol, "esmtp");
        assert!(args.json);
    }

    #[test]
    fn test_build_host() {
        let args = Args::parse_from(["scanbridge", "--sender", "a@example.com", "--rcpt", "b@example.org"]);
        let id = Uuid::now_v7();
        let host = build_host(&args, vec![HeaderLine::classified("To: b@example.org\n")], &id);

        assert_eq!(host.recipient_list(), ["b@example.org"]);
        assert_eq!(host.header_lines().len(), 1);
        assert_eq!(host.expand("$message_id"), Some(id.to_string()));
    }
}
