/*!
 * wlan-decrypt command line
 *
 * Decrypts the WEP, TKIP and CCMP data frames of a pcap capture with a list of
 * candidate keys, tracking the WPA/WPA2 4-way handshakes found along the way.
 */

mod cli;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context as _, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Args, Mode};
use wlan_decrypt::config::Config;
use wlan_decrypt::core::keys::validate;
use wlan_decrypt::core::{
    decrypt_capture, passphrase_to_psk, read_capture_file, Context, KeyItem, ProcessOptions,
    Summary,
};

fn main() -> Result<()> {
    let args = Args::parse();

    let config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        Config::default()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(io::stderr)
        .init();

    if !args.config.exists() {
        warn!(path = ?args.config, "config file not found, using defaults");
    }

    eprintln!("\n{}", "📡 wlan-decrypt".bold().cyan());
    eprintln!("{}\n", "WEP/WPA/WPA2 capture decryption - Educational use only".dimmed());

    match args.mode {
        Mode::Decrypt {
            capture,
            keys,
            output,
            fcs,
            preamble,
            no_decrypt,
        } => {
            let options = ProcessOptions {
                fcs_present: fcs,
                radiotap_present: preamble,
                manage_decrypt: !no_decrypt,
                ..ProcessOptions::default()
            };
            handle_decrypt_mode(&config, &capture, &keys, output.as_deref(), options)?;
        }
        Mode::Psk { passphrase, ssid } => handle_psk_mode(&passphrase, &ssid)?,
    }

    Ok(())
}

fn load_keys(path: &Path) -> Result<Vec<KeyItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read keys file {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse keys file {:?}", path))
}

/// Handle decrypt mode - run a capture through the engine
fn handle_decrypt_mode(
    config: &Config,
    capture_path: &Path,
    keys_path: &Path,
    output: Option<&Path>,
    options: ProcessOptions,
) -> Result<()> {
    let items = load_keys(keys_path)?;
    let mut ctx = Context::with_config(config.engine);
    let accepted = ctx
        .set_keys(&items)
        .with_context(|| format!("Too many keys (limit {})", config.engine.max_keys))?;

    eprintln!("{}", format!("🔑 {} of {} keys accepted", accepted, items.len()).yellow());
    if accepted < items.len() {
        warn!(rejected = items.len() - accepted, "some keys were rejected");
    }

    let capture = read_capture_file(capture_path)?;
    info!(frames = capture.frames.len(), link_layer = ?capture.link_layer, "capture loaded");

    let pb = ProgressBar::new(capture.frames.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) {eta} {msg}")?
            .progress_chars("█▓▒░-"),
    );

    let (records, summary) = decrypt_capture(&mut ctx, &capture, options, |_| pb.inc(1));
    pb.finish_and_clear();

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    for record in &records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    print_summary(&summary);
    if let Some(path) = output {
        eprintln!("{}", format!("✓ Decrypted frames written to {}", path.display()).green());
    }
    Ok(())
}

fn print_summary(summary: &Summary) {
    eprintln!("\n{}", "Summary:".bold().green());
    eprintln!("  Frames:          {}", summary.frames.to_string().cyan());
    eprintln!("  Decrypted:       {}", summary.decrypted.to_string().green());
    eprintln!("  Handshake steps: {}", summary.handshake_steps.to_string().cyan());
    if summary.skipped > 0 {
        eprintln!("  Skipped:         {}", summary.skipped.to_string().yellow());
    }
    for (kind, count) in &summary.errors {
        eprintln!("  {:<16} {}", format!("{}:", kind), count.to_string().dimmed());
    }
}

/// Handle psk mode - print the pairwise master key of a passphrase
fn handle_psk_mode(passphrase: &str, ssid: &str) -> Result<()> {
    validate(&KeyItem::WpaPassword {
        passphrase: passphrase.to_string(),
        ssid: ssid.to_string(),
    })
    .context("Invalid passphrase or SSID")?;
    println!("{}", hex::encode(passphrase_to_psk(passphrase, ssid.as_bytes())));
    Ok(())
}
