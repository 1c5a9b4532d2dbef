/*!
 * WPA/WPA2 key derivation and handshake integrity
 *
 * Implements the key hierarchy used by the decryption engine:
 * - PSK (Pre-Shared Key) derivation from a passphrase using PBKDF2-HMAC-SHA1
 * - PTK (Pairwise Transient Key) expansion using the 802.11i PRF
 *   (or the SHA-256 KDF for key descriptor version 3)
 * - MIC (Message Integrity Code) calculation and verification for EAPOL-Key frames
 *
 * References:
 * - IEEE 802.11i-2004 standard
 * - RFC 2898 (PBKDF2)
 */

use aes::cipher::generic_array::GenericArray;
use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use md5::Md5;
use pbkdf2::pbkdf2;
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;
type HmacMd5 = Hmac<Md5>;
type Aes128Cmac = Cmac<Aes128>;

/// Label for pairwise key expansion
const PRF_LABEL: &[u8] = b"Pairwise key expansion";

/// PBKDF2 iteration count fixed by 802.11i
const PSK_ITERATIONS: u32 = 4096;

/// Largest PTK produced (TKIP: KCK + KEK + TK + 2 x Michael key)
pub const PTK_MAX_LEN: usize = 64;

/// Key descriptor version 1: HMAC-MD5 MIC, TKIP data
pub const KEY_VERSION_HMAC_MD5_RC4: u8 = 1;
/// Key descriptor version 2: HMAC-SHA1 MIC, CCMP data
pub const KEY_VERSION_HMAC_SHA1_AES: u8 = 2;
/// Key descriptor version 3: AES-128-CMAC MIC, SHA-256 KDF, CCMP data
pub const KEY_VERSION_AES_CMAC: u8 = 3;

/// Pairwise Transient Key
///
/// Layout: KCK (16) | KEK (16) | TK (16) | [TKIP Michael keys (16)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ptk {
    bytes: [u8; PTK_MAX_LEN],
    len: usize,
}

impl Ptk {
    fn from_slice(data: &[u8]) -> Self {
        let len = data.len().min(PTK_MAX_LEN);
        let mut bytes = [0u8; PTK_MAX_LEN];
        bytes[..len].copy_from_slice(&data[..len]);
        Self { bytes, len }
    }

    /// Key Confirmation Key, keys the handshake MIC
    pub fn kck(&self) -> [u8; 16] {
        let mut kck = [0u8; 16];
        kck.copy_from_slice(&self.bytes[0..16]);
        kck
    }

    /// Key Encryption Key
    pub fn kek(&self) -> [u8; 16] {
        let mut kek = [0u8; 16];
        kek.copy_from_slice(&self.bytes[16..32]);
        kek
    }

    /// Temporal Key, the cipher key for TKIP and CCMP data
    pub fn tk(&self) -> [u8; 16] {
        let mut tk = [0u8; 16];
        tk.copy_from_slice(&self.bytes[32..48]);
        tk
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl Default for Ptk {
    fn default() -> Self {
        Self {
            bytes: [0u8; PTK_MAX_LEN],
            len: 0,
        }
    }
}

impl std::fmt::Debug for Ptk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ptk").field("len", &self.len).finish_non_exhaustive()
    }
}

/// Calculate PSK (Pre-Shared Key, used as PMK) from passphrase and SSID
///
/// PSK = PBKDF2(passphrase, SSID, 4096 iterations, 256 bits)
///
/// This is the expensive part of WPA/WPA2 key handling: two PBKDF2 blocks of
/// 4096 HMAC-SHA1 iterations each.
///
/// # Arguments
/// * `passphrase` - WPA passphrase (8-63 characters)
/// * `ssid` - Network SSID bytes (used as salt)
///
/// # Returns
/// 32-byte PSK
#[inline]
pub fn passphrase_to_psk(passphrase: &str, ssid: &[u8]) -> [u8; 32] {
    let mut psk = [0u8; 32];
    let _ = pbkdf2::<HmacSha1>(passphrase.as_bytes(), ssid, PSK_ITERATIONS, &mut psk);
    psk
}

/// Number of PTK bits derived for a key descriptor version
///
/// TKIP needs 512 bits (it carries the Michael keys), CCMP 384.
pub fn ptk_len_bits(key_version: u8) -> usize {
    if key_version == KEY_VERSION_HMAC_MD5_RC4 {
        512
    } else {
        384
    }
}

/// Derive the PTK from PMK and handshake data
///
/// PTK = PRF(PMK, "Pairwise key expansion",
///           min(AA, SPA) || max(AA, SPA) || min(ANonce, SNonce) || max(ANonce, SNonce))
///
/// Both pairs are ordered before concatenation, so swapping the two addresses
/// (or the two nonces) yields the same key.
///
/// # Arguments
/// * `pmk` - Pairwise Master Key
/// * `bssid` - Authenticator (AP) MAC address
/// * `sta` - Supplicant (station) MAC address
/// * `anonce` - Authenticator nonce
/// * `snonce` - Supplicant nonce
/// * `key_version` - Key descriptor version (3 selects the SHA-256 KDF)
#[inline]
pub fn derive_ptk(
    pmk: &[u8; 32],
    bssid: &[u8; 6],
    sta: &[u8; 6],
    anonce: &[u8; 32],
    snonce: &[u8; 32],
    key_version: u8,
) -> Ptk {
    // 6 + 6 + 32 + 32
    let mut data = [0u8; 76];

    let (addr_lo, addr_hi) = if bssid < sta { (bssid, sta) } else { (sta, bssid) };
    data[0..6].copy_from_slice(addr_lo);
    data[6..12].copy_from_slice(addr_hi);

    let (nonce_lo, nonce_hi) = if anonce < snonce {
        (anonce, snonce)
    } else {
        (snonce, anonce)
    };
    data[12..44].copy_from_slice(nonce_lo);
    data[44..76].copy_from_slice(nonce_hi);

    let bits = ptk_len_bits(key_version);
    if key_version == KEY_VERSION_AES_CMAC {
        Ptk::from_slice(&kdf_sha256(pmk, PRF_LABEL, &data, bits))
    } else {
        Ptk::from_slice(&prf(pmk, PRF_LABEL, &data, bits))
    }
}

/// 802.11i PRF: HMAC-SHA1 over `label || 0x00 || data || counter`
///
/// Produces `ceil(bits / 160)` digests and truncates to `bits / 8` bytes.
pub fn prf(key: &[u8], label: &[u8], data: &[u8], bits: usize) -> Vec<u8> {
    let out_len = bits / 8;
    let iterations = (bits + 159) / 160;

    // For the pairwise expansion this is 22 + 1 + 76 + 1 = 100 bytes
    let mut input = Vec::with_capacity(label.len() + data.len() + 2);
    input.extend_from_slice(label);
    input.push(0);
    input.extend_from_slice(data);
    let counter_pos = input.len();
    input.push(0);

    let mut result = Vec::with_capacity(iterations * 20);
    for i in 0..iterations {
        input[counter_pos] = i as u8;
        let mut mac =
            HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(&input);
        result.extend_from_slice(&mac.finalize().into_bytes());
    }

    result.truncate(out_len);
    result
}

/// KDF-SHA256: key derivation function for key descriptor version 3
///
/// Each block is HMAC-SHA256(K, i || label || context || length), with the
/// counter and bit length little-endian.
pub fn kdf_sha256(key: &[u8], label: &[u8], context: &[u8], bits: usize) -> Vec<u8> {
    let out_len = bits / 8;
    let iterations = (bits + 255) / 256;
    let length_bits = bits as u16;

    let mut result = Vec::with_capacity(iterations * 32);
    for i in 1..=iterations as u16 {
        let mut mac =
            HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(&i.to_le_bytes());
        mac.update(label);
        mac.update(context);
        mac.update(&length_bits.to_le_bytes());
        result.extend_from_slice(&mac.finalize().into_bytes());
    }

    result.truncate(out_len);
    result
}

/// Calculate MIC (Message Integrity Code) for an EAPOL frame
///
/// MIC = HMAC-MD5(KCK, EAPOL_frame)             (key_version = 1)
/// MIC = HMAC-SHA1(KCK, EAPOL_frame)[0..16]     (key_version = 2)
/// MIC = AES-128-CMAC(KCK, EAPOL_frame)         (key_version = 3)
///
/// The MIC field inside `eapol_frame` must already be zeroed.
#[inline]
pub fn calculate_mic(kck: &[u8; 16], eapol_frame: &[u8], key_version: u8) -> [u8; 16] {
    let mut result = [0u8; 16];

    match key_version {
        KEY_VERSION_HMAC_MD5_RC4 => {
            let mut mac = HmacMd5::new_from_slice(kck).expect("HMAC can take key of any size");
            mac.update(eapol_frame);
            result.copy_from_slice(&mac.finalize().into_bytes());
        }
        KEY_VERSION_AES_CMAC => {
            let mut mac = <Aes128Cmac as Mac>::new(GenericArray::from_slice(&kck[..]));
            mac.update(eapol_frame);
            result.copy_from_slice(&mac.finalize().into_bytes());
        }
        _ => {
            let mut mac = HmacSha1::new_from_slice(kck).expect("HMAC can take key of any size");
            mac.update(eapol_frame);
            let hash = mac.finalize().into_bytes();
            result.copy_from_slice(&hash[..16]);
        }
    }

    result
}

/// Verify the MIC carried in an EAPOL-Key frame
///
/// # Arguments
/// * `eapol_frame` - EAPOL frame copy with the MIC field zeroed
/// * `claimed_mic` - MIC as carried in the frame
/// * `kck` - Key Confirmation Key candidate
/// * `key_version` - Key descriptor version
#[inline]
pub fn mic_check(eapol_frame: &[u8], claimed_mic: &[u8], kck: &[u8; 16], key_version: u8) -> bool {
    let calculated = calculate_mic(kck, eapol_frame, key_version);
    constant_time_compare_16(&calculated, claimed_mic)
}

#[inline(always)]
fn constant_time_compare_16(a: &[u8; 16], b: &[u8]) -> bool {
    if b.len() != 16 {
        return false;
    }

    let mut diff = 0u8;
    for i in 0..16 {
        diff |= a[i] ^ b[i];
    }
    diff == 0
}
