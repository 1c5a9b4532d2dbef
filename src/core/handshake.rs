/*!
 * WPA/WPA2 4-way handshake tracking
 *
 * Recognizes EAPOL-Key frames inside cleartext data frames and advances the
 * per-association handshake stage. Message 2 is where the pairwise key gets
 * derived: every candidate PMK is tried until one reproduces the MIC carried
 * in the frame.
 *
 * EAPOL-Key frame layout (offsets from the start of the EAPOL header):
 * - 0: protocol version, 1: packet type (3 = Key), 2..4: body length
 * - 4: descriptor type (2 = RSN, 254 = WPA)
 * - 5..7: key information, 7..9: key length, 9..17: replay counter
 * - 17..49: nonce, 49..65: IV, 65..73: RSC, 73..81: reserved
 * - 81..97: MIC, 97..99: key data length, 99..: key data
 */

use std::sync::Arc;

use tracing::{debug, trace};

use super::crypto;
use super::error::{Error, Result};
use super::frame::LLC_SNAP_EAPOL;
use super::keys::KeyCollection;
use super::store::{HandshakeStage, SecurityAssociation};

/// EAPOL packet type of key frames
pub const EAPOL_TYPE_KEY: u8 = 3;
/// RSN (WPA2) key descriptor
pub const KEY_DESCRIPTOR_RSN: u8 = 2;
/// Pre-RSN WPA key descriptor
pub const KEY_DESCRIPTOR_WPA: u8 = 254;

const EAPOL_HEADER_LEN: usize = 4;
const DESCRIPTOR_OFFSET: usize = 4;
const KEY_INFO_OFFSET: usize = 5;
const REPLAY_COUNTER_OFFSET: usize = 9;
const NONCE_OFFSET: usize = 17;
const MIC_OFFSET: usize = 81;
const MIC_LEN: usize = 16;
const KEY_DATA_LEN_OFFSET: usize = 97;
/// Shortest EAPOL-Key frame: everything up to the key data
pub const EAPOL_KEY_MIN_LEN: usize = 99;

/// Key information field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo(pub u16);

impl KeyInfo {
    /// Key descriptor version (1 = HMAC-MD5/RC4, 2 = HMAC-SHA1/AES, 3 = AES-CMAC)
    pub fn version(self) -> u8 {
        (self.0 & 0x0007) as u8
    }

    pub fn pairwise(self) -> bool {
        self.0 & 0x0008 != 0
    }

    pub fn install(self) -> bool {
        self.0 & 0x0040 != 0
    }

    pub fn ack(self) -> bool {
        self.0 & 0x0080 != 0
    }

    pub fn mic(self) -> bool {
        self.0 & 0x0100 != 0
    }

    pub fn secure(self) -> bool {
        self.0 & 0x0200 != 0
    }
}

/// Position within the 4-way handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    M1,
    M2,
    M3,
    M4,
}

/// Borrowed view over a complete EAPOL-Key frame
#[derive(Debug, Clone, Copy)]
pub struct EapolKey<'a> {
    data: &'a [u8],
}

impl<'a> EapolKey<'a> {
    /// Parse an EAPOL frame, trimmed to its declared length
    ///
    /// Returns `None` unless the frame is an EAPOL-Key frame whose declared
    /// body fits in `data` and covers the fixed key fields.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < EAPOL_HEADER_LEN {
            return None;
        }
        if !(1..=3).contains(&data[0]) || data[1] != EAPOL_TYPE_KEY {
            return None;
        }

        let body_len = u16::from_be_bytes([data[2], data[3]]) as usize;
        let total_len = EAPOL_HEADER_LEN + body_len;
        if total_len < EAPOL_KEY_MIN_LEN || data.len() < total_len {
            return None;
        }

        Some(Self {
            data: &data[..total_len],
        })
    }

    /// Locate an EAPOL-Key frame behind the LLC/SNAP header of a data frame body
    pub fn from_body(body: &'a [u8]) -> Option<Self> {
        let rest = body.strip_prefix(&LLC_SNAP_EAPOL[..])?;
        Self::parse(rest)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn descriptor_type(&self) -> u8 {
        self.data[DESCRIPTOR_OFFSET]
    }

    pub fn key_info(&self) -> KeyInfo {
        KeyInfo(u16::from_be_bytes([
            self.data[KEY_INFO_OFFSET],
            self.data[KEY_INFO_OFFSET + 1],
        ]))
    }

    pub fn replay_counter(&self) -> u64 {
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&self.data[REPLAY_COUNTER_OFFSET..REPLAY_COUNTER_OFFSET + 8]);
        u64::from_be_bytes(counter)
    }

    /// ANonce (messages 1 and 3) or SNonce (message 2)
    pub fn nonce(&self) -> [u8; 32] {
        let mut nonce = [0u8; 32];
        nonce.copy_from_slice(&self.data[NONCE_OFFSET..NONCE_OFFSET + 32]);
        nonce
    }

    pub fn mic(&self) -> &'a [u8] {
        &self.data[MIC_OFFSET..MIC_OFFSET + MIC_LEN]
    }

    pub fn key_data_len(&self) -> u16 {
        u16::from_be_bytes([
            self.data[KEY_DATA_LEN_OFFSET],
            self.data[KEY_DATA_LEN_OFFSET + 1],
        ])
    }

    /// Copy of the frame with the MIC field zeroed, the input of the MIC
    pub fn with_zeroed_mic(&self) -> Vec<u8> {
        let mut copy = self.data.to_vec();
        copy[MIC_OFFSET..MIC_OFFSET + MIC_LEN].fill(0);
        copy
    }

    /// Which handshake message this frame is, from its flags
    ///
    /// Some supplicants send message 4 with the secure bit clear. Such a frame
    /// has the shape of message 2 but carries no key data, which is how it is
    /// told apart.
    pub fn message(&self) -> Option<Message> {
        let info = self.key_info();
        match (info.ack(), info.mic(), info.install()) {
            (true, false, false) => Some(Message::M1),
            (false, true, false) if info.secure() => Some(Message::M4),
            (false, true, false) if self.key_data_len() == 0 => Some(Message::M4),
            (false, true, false) => Some(Message::M2),
            (true, true, _) => Some(Message::M3),
            _ => None,
        }
    }
}

/// Advance the handshake of `sa` with an EAPOL-Key frame
///
/// # Arguments
/// * `sa` - Association the frame belongs to
/// * `eapol` - The EAPOL-Key frame
/// * `keys` - Candidate keys for message 2
///
/// # Errors
/// `NoValidHandshake` for group or non-WPA frames and for a message 2 no key
/// matches; `Unsuccessful` for flag combinations outside the 4-way handshake.
pub fn process(sa: &mut SecurityAssociation, eapol: &EapolKey<'_>, keys: &KeyCollection) -> Result<()> {
    let info = eapol.key_info();
    if !info.pairwise() {
        trace!(id = %sa.id, "group key message ignored");
        return Err(Error::NoValidHandshake);
    }

    let descriptor = eapol.descriptor_type();
    if descriptor != KEY_DESCRIPTOR_RSN && descriptor != KEY_DESCRIPTOR_WPA {
        trace!(id = %sa.id, descriptor, "unknown key descriptor type");
        return Err(Error::NoValidHandshake);
    }

    match eapol.message() {
        Some(Message::M1) => {
            sa.wpa.anonce = eapol.nonce();
            sa.wpa.key_version = info.version();
            sa.stage = HandshakeStage::Msg1;
            debug!(id = %sa.id, version = info.version(), "handshake message 1");
            Ok(())
        }
        Some(Message::M2) => process_message2(sa, eapol, keys),
        Some(Message::M3) => {
            debug!(id = %sa.id, "handshake message 3");
            Ok(())
        }
        Some(Message::M4) => {
            // only a key confirmed by this exchange's message 2 becomes usable
            sa.valid_key = match sa.stage {
                HandshakeStage::Msg2 => sa.cached_key.is_some(),
                HandshakeStage::Msg4 => sa.valid_key,
                HandshakeStage::None | HandshakeStage::Msg1 => false,
            };
            sa.stage = HandshakeStage::Msg4;
            debug!(id = %sa.id, valid_key = sa.valid_key, "handshake message 4");
            Ok(())
        }
        None => Err(Error::Unsuccessful),
    }
}

/// Find the candidate key whose PTK reproduces the message 2 MIC
fn process_message2(
    sa: &mut SecurityAssociation,
    eapol: &EapolKey<'_>,
    keys: &KeyCollection,
) -> Result<()> {
    let version = eapol.key_info().version();
    let snonce = eapol.nonce();
    let claimed_mic = eapol.mic();
    let zeroed = eapol.with_zeroed_mic();

    // cached key first, then the whole collection
    let cached = sa.cached_key.clone().filter(|key| key.is_wpa());
    let candidates = cached.iter().chain(
        keys.wpa_keys()
            .filter(|key| cached.as_ref().map_or(true, |c| !Arc::ptr_eq(c, key))),
    );

    for key in candidates {
        let Some(pmk) = key.pmk() else { continue };
        let ptk = crypto::derive_ptk(
            pmk,
            &sa.id.bssid,
            &sa.id.sta,
            &sa.wpa.anonce,
            &snonce,
            version,
        );

        if crypto::mic_check(&zeroed, claimed_mic, &ptk.kck(), version) {
            sa.wpa.ptk = ptk;
            sa.wpa.key_version = version;
            sa.cached_key = Some(Arc::clone(key));
            sa.stage = HandshakeStage::Msg2;
            sa.valid_key = false;
            debug!(id = %sa.id, version, "handshake message 2, key matched");
            return Ok(());
        }
    }

    debug!(id = %sa.id, "handshake message 2, no key matched");
    Err(Error::NoValidHandshake)
}
