use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "wlan-decrypt")]
#[command(author = "maxgfr")]
#[command(version)]
#[command(about = "WEP/WPA/WPA2 802.11 capture decryption - Educational use only", long_about = None)]
pub struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, default_value = "wlan-decrypt.toml")]
    pub config: PathBuf,

    /// Command to execute
    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand)]
pub enum Mode {
    /// Decrypt the protected frames of a capture
    ///
    /// Tracks WPA/WPA2 4-way handshakes found in the capture and decrypts
    /// WEP, TKIP and CCMP data frames with the supplied keys. Decrypted frames
    /// are written as JSON lines.
    ///
    /// Example: wlan-decrypt decrypt capture.pcap --keys keys.json --output frames.jsonl
    Decrypt {
        /// Path to capture file (.pcap / .cap, 802.11 or radiotap link type)
        #[arg(value_name = "CAPTURE")]
        capture: PathBuf,

        /// Path to keys file (JSON list of keys)
        #[arg(short, long)]
        keys: PathBuf,

        /// Output file for decrypted frames (JSON lines, default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Frames end with a 4-byte FCS
        #[arg(long)]
        fcs: bool,

        /// Frames start with a fixed 24-byte preamble
        #[arg(long)]
        preamble: bool,

        /// Only track handshakes, do not decrypt
        #[arg(long)]
        no_decrypt: bool,
    },

    /// Derive the WPA PSK of a passphrase and SSID
    ///
    /// Example: wlan-decrypt psk password IEEE
    Psk {
        /// WPA passphrase (8 to 63 printable ASCII characters)
        passphrase: String,

        /// Network SSID
        ssid: String,
    },
}
