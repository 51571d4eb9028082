//! chunkline-ctl — run one fragmented request/response exchange.
//!
//! The peer is the in-process loopback peripheral, so every stage of the
//! central (discovery, pacing, reassembly, teardown) runs for real without
//! a radio attached.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use chunkline_central::{
    event_channel, Central, LoopbackConfig, LoopbackTransport, Response, TransferReport,
};
use chunkline_core::ChunklineConfig;

const MOBY: &str = "Call me Ishmael. Some years ago - never mind how long precisely - having \
little or no money in my purse, and nothing particular to interest me on shore, I thought I \
would sail about a little and see the watery part of the world. It is a way I have of driving \
off the spleen and regulating the circulation.";

// ── Output ────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonOutput<'a> {
    response: &'a str,
    report: &'a TransferReport,
}

fn print_response(resp: &Response, json: bool) -> Result<()> {
    if json {
        let out = JsonOutput {
            response: &resp.text,
            report: &resp.report,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let r = &resp.report;
    println!("═══════════════════════════════════════");
    println!("  Exchange #{}", r.transfer_id);
    println!("═══════════════════════════════════════");
    println!("  Request   : {} bytes in {} fragments", r.request_bytes, r.fragments_sent);
    println!("  Response  : {} bytes in {} fragments", r.response_bytes, r.response_fragments);
    println!("  Digest    : {} → {}", r.request_digest, r.response_digest);
    println!("  Elapsed   : {} ms", r.elapsed_ms);
    println!();
    println!("{}", resp.text);
    Ok(())
}

fn print_usage() {
    println!("Usage: chunkline-ctl [--config <path>] [--json] <command>");
    println!();
    println!("Commands:");
    println!("  demo              Send a built-in passage and print the echo (default)");
    println!("  send <text>       Send <text> and print the echo");
    println!("  send-file <path>  Send the contents of a file");
    println!("  config            Print the effective configuration");
    println!("  init              Write a default config file if none exists");
    println!();
    println!("Options:");
    println!("  --config <path>   Config file (default: $CHUNKLINE_CONFIG or ~/.config/chunkline/config.toml)");
    println!("  --json            Print the response and transfer report as JSON");
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn cmd_send(config: ChunklineConfig, payload: Vec<u8>, json: bool) -> Result<()> {
    tracing::debug!(
        bytes = payload.len(),
        fragment_size = config.fragment.max_fragment_size,
        pacing_ms = config.session.pacing_ms,
        "sending over loopback"
    );
    let (sink, events) = event_channel();
    let transport = LoopbackTransport::new(
        sink,
        LoopbackConfig {
            max_fragment_size: config.fragment.max_fragment_size,
            max_payload_len: config.fragment.max_payload_len,
            ..Default::default()
        },
    );
    let central = Central::new(transport, events, config);

    let handle = central.start(payload).context("exchange failed")?;
    tracing::debug!(transfer = handle.id(), "transfer started");
    let response = handle.outcome().await.context("exchange failed")?;
    print_response(&response, json)
}

fn cmd_config(config: &ChunklineConfig) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn cmd_init(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(path) => {
            ChunklineConfig::write_default_to(path)?;
            path.to_path_buf()
        }
        None => ChunklineConfig::write_default_if_missing()?,
    };
    println!("Config at {}", path.display());
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path: Option<PathBuf> = None;
    let mut json = false;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(PathBuf::from(
                    args.get(i).context("--config requires a value")?,
                ));
            }
            "--json" => json = true,
            other => remaining.push(other),
        }
        i += 1;
    }

    let load = || -> Result<ChunklineConfig> {
        let config = match &config_path {
            Some(path) => ChunklineConfig::load_from(path),
            None => ChunklineConfig::load(),
        };
        config.context("failed to load config")
    };

    match remaining.as_slice() {
        ["demo"] | [] => cmd_send(load()?, MOBY.as_bytes().to_vec(), json).await,
        ["send", text @ ..] if !text.is_empty() => {
            cmd_send(load()?, text.join(" ").into_bytes(), json).await
        }
        ["send-file", path] => {
            let data = std::fs::read(path).with_context(|| format!("failed to read {path}"))?;
            cmd_send(load()?, data, json).await
        }
        ["config"] => cmd_config(&load()?),
        ["init"] => cmd_init(config_path.as_deref()),
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            bail!("unknown command");
        }
    }
}
