/*!
 * Capture file driver
 *
 * Reads 802.11 frames out of a legacy pcap file and feeds them to a
 * `Context` in capture order, collecting decrypted frames and a tally of
 * outcomes.
 */

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, bail, Context as _, Result};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, Linktype, PcapBlockOwned, PcapError};
use serde::Serialize;
use tracing::{debug, warn};

use super::context::{Context, Outcome, ProcessOptions};
use super::keys::KeyItem;

/// Reader buffer, larger than any single pcap record
const READER_CAPACITY: usize = 1 << 20;

/// LINKTYPE_IEEE802_11
pub const LINKTYPE_IEEE802_11: Linktype = Linktype(105);
/// LINKTYPE_IEEE802_11_RADIOTAP
pub const LINKTYPE_IEEE802_11_RADIOTAP: Linktype = Linktype(127);

/// Link layers the driver understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkLayer {
    /// Bare 802.11 frames
    Ieee80211,
    /// 802.11 frames behind a radiotap header
    Radiotap,
}

impl LinkLayer {
    pub fn from_linktype(linktype: Linktype) -> Option<Self> {
        if linktype == LINKTYPE_IEEE802_11 {
            Some(LinkLayer::Ieee80211)
        } else if linktype == LINKTYPE_IEEE802_11_RADIOTAP {
            Some(LinkLayer::Radiotap)
        } else {
            None
        }
    }

    /// The 802.11 frame inside a captured record
    pub fn frame<'a>(self, data: &'a [u8]) -> Option<&'a [u8]> {
        match self {
            LinkLayer::Ieee80211 => Some(data),
            LinkLayer::Radiotap => {
                let len = u16::from_le_bytes([*data.get(2)?, *data.get(3)?]) as usize;
                if len < 8 {
                    return None;
                }
                data.get(len..)
            }
        }
    }
}

/// One captured record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub index: usize,
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub data: Vec<u8>,
}

/// All records of a capture file
#[derive(Debug, Clone)]
pub struct Capture {
    pub link_layer: LinkLayer,
    pub frames: Vec<CapturedFrame>,
}

/// Read a legacy pcap capture from a file
pub fn read_capture_file(path: &Path) -> Result<Capture> {
    let file = File::open(path).with_context(|| format!("Failed to open capture {:?}", path))?;
    read_capture(file).with_context(|| format!("Failed to read capture {:?}", path))
}

/// Read a legacy pcap capture
pub fn read_capture<R: Read>(input: R) -> Result<Capture> {
    let mut reader = LegacyPcapReader::new(READER_CAPACITY, input)
        .map_err(|e| anyhow!("Failed to parse pcap header: {:?}", e))?;

    let mut link_layer = None;
    let mut frames = Vec::new();
    let mut refilled = false;

    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(header) => {
                        link_layer = Some(LinkLayer::from_linktype(header.network).ok_or_else(
                            || anyhow!("Unsupported link type {}", header.network.0),
                        )?);
                    }
                    PcapBlockOwned::Legacy(packet) => frames.push(CapturedFrame {
                        index: frames.len(),
                        ts_sec: packet.ts_sec,
                        ts_usec: packet.ts_usec,
                        data: packet.data.to_vec(),
                    }),
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
                refilled = false;
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                if refilled {
                    warn!(frames = frames.len(), "capture ends with a truncated record");
                    break;
                }
                reader
                    .refill()
                    .map_err(|e| anyhow!("Failed to read capture: {:?}", e))?;
                refilled = true;
            }
            Err(e) => bail!("Error reading pcap: {:?}", e),
        }
    }

    let link_layer = link_layer.ok_or_else(|| anyhow!("Capture has no pcap header"))?;
    debug!(frames = frames.len(), ?link_layer, "capture read");
    Ok(Capture { link_layer, frames })
}

/// A decrypted frame, as exported
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecryptedRecord {
    pub index: usize,
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub key_used: Option<KeyItem>,
    #[serde(with = "hex")]
    pub frame: Vec<u8>,
}

/// Outcome counts over a capture
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub frames: usize,
    pub decrypted: usize,
    pub handshake_steps: usize,
    pub skipped: usize,
    pub errors: BTreeMap<&'static str, usize>,
}

/// Feed every frame of `capture` to `ctx`
///
/// # Arguments
/// * `ctx` - Engine with its keys already set
/// * `capture` - Frames in capture order
/// * `options` - Processing flags applied to every frame
/// * `on_frame` - Called after each frame, for progress reporting
pub fn decrypt_capture<F>(
    ctx: &mut Context,
    capture: &Capture,
    options: ProcessOptions,
    mut on_frame: F,
) -> (Vec<DecryptedRecord>, Summary)
where
    F: FnMut(&CapturedFrame),
{
    let mut records = Vec::new();
    let mut summary = Summary::default();

    for captured in &capture.frames {
        summary.frames += 1;

        let Some(frame) = capture.link_layer.frame(&captured.data) else {
            summary.skipped += 1;
            on_frame(captured);
            continue;
        };

        match ctx.process_packet(frame, options) {
            Ok(Outcome::Decrypted {
                plaintext,
                key_used,
            }) => {
                summary.decrypted += 1;
                records.push(DecryptedRecord {
                    index: captured.index,
                    ts_sec: captured.ts_sec,
                    ts_usec: captured.ts_usec,
                    key_used,
                    frame: plaintext,
                });
            }
            Ok(Outcome::HandshakeStepOk) => summary.handshake_steps += 1,
            Err(e) => *summary.errors.entry(e.kind()).or_insert(0) += 1,
        }
        on_frame(captured);
    }

    (records, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cipher::wep;
    use std::io::Cursor;

    fn pcap(linktype: u32, records: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&65535u32.to_le_bytes());
        out.extend_from_slice(&linktype.to_le_bytes());
        for (i, record) in records.iter().enumerate() {
            out.extend_from_slice(&(i as u32).to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&(record.len() as u32).to_le_bytes());
            out.extend_from_slice(&(record.len() as u32).to_le_bytes());
            out.extend_from_slice(record);
        }
        out
    }

    fn radiotap(frame: &[u8]) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        out.extend_from_slice(frame);
        out
    }

    #[test]
    fn test_link_layer_from_linktype() {
        assert_eq!(
            LinkLayer::from_linktype(Linktype(105)),
            Some(LinkLayer::Ieee80211)
        );
        assert_eq!(
            LinkLayer::from_linktype(Linktype(127)),
            Some(LinkLayer::Radiotap)
        );
        assert_eq!(LinkLayer::from_linktype(Linktype::ETHERNET), None);
    }

    #[test]
    fn test_radiotap_strip() {
        let data = radiotap(&[1, 2, 3]);
        assert_eq!(LinkLayer::Radiotap.frame(&data), Some(&[1u8, 2, 3][..]));
        assert_eq!(LinkLayer::Ieee80211.frame(&data), Some(&data[..]));
        assert_eq!(LinkLayer::Radiotap.frame(&[0, 0, 0x40, 0]), None);
        assert_eq!(LinkLayer::Radiotap.frame(&[0, 0]), None);
    }

    #[test]
    fn test_read_capture() {
        let bytes = pcap(127, &[radiotap(&[0x08, 0x01]), vec![0xaa; 300]]);
        let capture = read_capture(Cursor::new(bytes)).unwrap();
        assert_eq!(capture.link_layer, LinkLayer::Radiotap);
        assert_eq!(capture.frames.len(), 2);
        assert_eq!(capture.frames[1].ts_sec, 1);
        assert_eq!(capture.frames[1].data, vec![0xaa; 300]);
    }

    #[test]
    fn test_unsupported_linktype() {
        // Ethernet
        let bytes = pcap(1, &[]);
        assert!(read_capture(Cursor::new(bytes)).is_err());
    }

    #[test]
    fn test_decrypt_capture_summary() {
        let key = [0x10, 0x20, 0x30, 0x40, 0x50];
        let mut header = vec![0x08, 0x01, 0x00, 0x00];
        header.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        header.extend_from_slice(&[0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb]);
        header.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        header.extend_from_slice(&[0x00, 0x00]);
        let plaintext = b"\xaa\xaa\x03\x00\x00\x00\x08\x00payload";
        let protected = wep::encrypt(&header, [1, 2, 3], 0, &key, plaintext);

        let mut beacon = vec![0x80, 0x00];
        beacon.extend_from_slice(&[0; 40]);

        let bytes = pcap(105, &[protected, beacon]);
        let capture = read_capture(Cursor::new(bytes)).unwrap();

        let mut ctx = Context::new();
        ctx.set_keys(&[KeyItem::Wep { key: key.to_vec() }]).unwrap();

        let mut seen = 0;
        let (records, summary) =
            decrypt_capture(&mut ctx, &capture, ProcessOptions::default(), |_| seen += 1);

        assert_eq!(seen, 2);
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.decrypted, 1);
        assert_eq!(summary.errors.get("not_data"), Some(&1));
        assert_eq!(records[0].index, 0);
        assert_eq!(&records[0].frame[24..], &plaintext[..]);

        let json = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(json["key_used"]["type"], "wep");
        assert_eq!(json["key_used"]["key"], "1020304050");
    }
}
