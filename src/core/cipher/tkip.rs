/*!
 * TKIP decryption
 *
 * The per-packet RC4 seed comes from the two-phase key mixing of the
 * temporal key, the transmitter address and the 48-bit TKIP sequence
 * counter (TSC). The mixed seed then drives the WEP core.
 *
 * Body layout: TSC1 | WEPSeed | TSC0 | key ID | TSC2..TSC5 | ciphertext
 * (MSDU, Michael MIC (8), ICV (4)). The Michael MIC is stripped but not
 * verified.
 */

use super::wep;
use crate::core::error::{Error, Result};
use crate::core::frame;

/// IV, key ID and extended IV
pub const TKIP_HEADER_LEN: usize = 8;
/// Michael MIC
pub const TKIP_MIC_LEN: usize = 8;
/// MIC and ICV
pub const TKIP_TRAILER_LEN: usize = TKIP_MIC_LEN + wep::WEP_ICV_LEN;

const PHASE1_LOOP_COUNT: u16 = 8;

const fn xtime(x: u8) -> u8 {
    (x << 1) ^ if x & 0x80 != 0 { 0x1b } else { 0 }
}

/// AES S-box, built from GF(2^8) inverses and the affine map
const fn aes_sbox() -> [u8; 256] {
    // log/antilog tables over generator 3
    let mut exp = [0u8; 256];
    let mut log = [0u8; 256];
    let mut x: u8 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x;
        log[x as usize] = i as u8;
        x ^= xtime(x);
        i += 1;
    }

    let mut sbox = [0u8; 256];
    let mut v = 0;
    while v < 256 {
        let inv = if v == 0 {
            0
        } else {
            exp[(255 - log[v] as usize) % 255]
        };
        sbox[v] = inv
            ^ inv.rotate_left(1)
            ^ inv.rotate_left(2)
            ^ inv.rotate_left(3)
            ^ inv.rotate_left(4)
            ^ 0x63;
        v += 1;
    }
    sbox
}

/// TKIP 16-bit S-box: (2 * S[i]) << 8 | (3 * S[i])
const fn tkip_sbox() -> [u16; 256] {
    let aes = aes_sbox();
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let s = aes[i];
        let s2 = xtime(s);
        table[i] = ((s2 as u16) << 8) | ((s2 ^ s) as u16);
        i += 1;
    }
    table
}

static SBOX: [u16; 256] = tkip_sbox();

#[inline]
fn s16(v: u16) -> u16 {
    SBOX[(v & 0xff) as usize] ^ SBOX[(v >> 8) as usize].swap_bytes()
}

#[inline]
fn tk16(tk: &[u8; 16], offset: usize) -> u16 {
    u16::from_le_bytes([tk[offset], tk[offset + 1]])
}

/// Phase 1: mix TK, transmitter address and the upper 32 TSC bits into TTAK
pub fn phase1(tk: &[u8; 16], ta: &[u8; 6], iv32: u32) -> [u16; 5] {
    let mut p1k = [
        (iv32 & 0xffff) as u16,
        (iv32 >> 16) as u16,
        u16::from_le_bytes([ta[0], ta[1]]),
        u16::from_le_bytes([ta[2], ta[3]]),
        u16::from_le_bytes([ta[4], ta[5]]),
    ];

    for i in 0..PHASE1_LOOP_COUNT {
        let j = 2 * (i as usize & 1);
        p1k[0] = p1k[0].wrapping_add(s16(p1k[4] ^ tk16(tk, j)));
        p1k[1] = p1k[1].wrapping_add(s16(p1k[0] ^ tk16(tk, 4 + j)));
        p1k[2] = p1k[2].wrapping_add(s16(p1k[1] ^ tk16(tk, 8 + j)));
        p1k[3] = p1k[3].wrapping_add(s16(p1k[2] ^ tk16(tk, 12 + j)));
        p1k[4] = p1k[4]
            .wrapping_add(s16(p1k[3] ^ tk16(tk, j)))
            .wrapping_add(i);
    }
    p1k
}

/// Phase 2: mix TTAK with the lower 16 TSC bits into the 16-byte RC4 seed
pub fn phase2(tk: &[u8; 16], p1k: &[u16; 5], iv16: u16) -> [u8; 16] {
    let mut ppk = [0u16; 6];
    ppk[..5].copy_from_slice(p1k);
    ppk[5] = p1k[4].wrapping_add(iv16);

    ppk[0] = ppk[0].wrapping_add(s16(ppk[5] ^ tk16(tk, 0)));
    ppk[1] = ppk[1].wrapping_add(s16(ppk[0] ^ tk16(tk, 2)));
    ppk[2] = ppk[2].wrapping_add(s16(ppk[1] ^ tk16(tk, 4)));
    ppk[3] = ppk[3].wrapping_add(s16(ppk[2] ^ tk16(tk, 6)));
    ppk[4] = ppk[4].wrapping_add(s16(ppk[3] ^ tk16(tk, 8)));
    ppk[5] = ppk[5].wrapping_add(s16(ppk[4] ^ tk16(tk, 10)));

    ppk[0] = ppk[0].wrapping_add((ppk[5] ^ tk16(tk, 12)).rotate_right(1));
    ppk[1] = ppk[1].wrapping_add((ppk[0] ^ tk16(tk, 14)).rotate_right(1));
    ppk[2] = ppk[2].wrapping_add(ppk[1].rotate_right(1));
    ppk[3] = ppk[3].wrapping_add(ppk[2].rotate_right(1));
    ppk[4] = ppk[4].wrapping_add(ppk[3].rotate_right(1));
    ppk[5] = ppk[5].wrapping_add(ppk[4].rotate_right(1));

    let mut key = [0u8; 16];
    key[0] = (iv16 >> 8) as u8;
    key[1] = (((iv16 >> 8) | 0x20) & 0x7f) as u8;
    key[2] = (iv16 & 0xff) as u8;
    key[3] = ((ppk[5] ^ tk16(tk, 0)) >> 1) as u8;
    for (i, word) in ppk.iter().enumerate() {
        key[4 + 2 * i..6 + 2 * i].copy_from_slice(&word.to_le_bytes());
    }
    key
}

/// Per-packet RC4 seed for a 48-bit TSC
pub fn mix_key(tk: &[u8; 16], ta: &[u8; 6], tsc: u64) -> [u8; 16] {
    let iv16 = (tsc & 0xffff) as u16;
    let iv32 = ((tsc >> 16) & 0xffff_ffff) as u32;
    phase2(tk, &phase1(tk, ta, iv32), iv16)
}

/// 48-bit TSC from the TKIP header at the start of `body`
pub fn tsc(body: &[u8]) -> u64 {
    let iv16 = u64::from(body[0]) << 8 | u64::from(body[2]);
    let iv32 = u64::from(u32::from_le_bytes([body[4], body[5], body[6], body[7]]));
    iv32 << 16 | iv16
}

/// Decrypt a TKIP frame in place
///
/// On success the TKIP header, Michael MIC and ICV are removed, the protected
/// bit is cleared and the new frame length is returned. On failure the frame
/// is left as is.
///
/// # Arguments
/// * `frame` - Frame starting at the MAC header, FCS excluded
/// * `header_len` - MAC header length
/// * `tk` - Temporal key from the PTK
pub fn decrypt(frame: &mut [u8], header_len: usize, tk: &[u8; 16]) -> Result<usize> {
    let ta = frame::addr2(frame).ok_or(Error::TooShort)?;
    let body = frame.get(header_len..).ok_or(Error::TooShort)?;
    if body.len() < TKIP_HEADER_LEN + TKIP_TRAILER_LEN {
        return Err(Error::TooShort);
    }

    let seed = mix_key(tk, &ta, tsc(body));
    let mut data = body[TKIP_HEADER_LEN..].to_vec();
    wep::decrypt_core(&seed, &mut data)?;

    let plain_len = data.len() - TKIP_TRAILER_LEN;
    frame[header_len..header_len + plain_len].copy_from_slice(&data[..plain_len]);
    frame::clear_protected(frame);
    Ok(header_len + plain_len)
}

fn michael_block(mut l: u32, mut r: u32) -> (u32, u32) {
    r ^= l.rotate_left(17);
    l = l.wrapping_add(r);
    r ^= ((l & 0xff00_ff00) >> 8) | ((l & 0x00ff_00ff) << 8);
    l = l.wrapping_add(r);
    r ^= l.rotate_left(3);
    l = l.wrapping_add(r);
    r ^= l.rotate_right(2);
    l = l.wrapping_add(r);
    (l, r)
}

/// Michael over an already assembled message
fn michael_digest(key: &[u8; 8], message: &[u8]) -> [u8; 8] {
    let mut padded = Vec::with_capacity(message.len() + 8);
    padded.extend_from_slice(message);
    padded.push(0x5a);
    padded.extend_from_slice(&[0; 4]);
    while padded.len() % 4 != 0 {
        padded.push(0);
    }

    let mut l = u32::from_le_bytes([key[0], key[1], key[2], key[3]]);
    let mut r = u32::from_le_bytes([key[4], key[5], key[6], key[7]]);
    for word in padded.chunks_exact(4) {
        l ^= u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        (l, r) = michael_block(l, r);
    }

    let mut mic = [0u8; 8];
    mic[..4].copy_from_slice(&l.to_le_bytes());
    mic[4..].copy_from_slice(&r.to_le_bytes());
    mic
}

/// Michael MIC over DA | SA | priority | 0 0 0 | MSDU
pub fn michael(key: &[u8; 8], da: &[u8; 6], sa: &[u8; 6], priority: u8, msdu: &[u8]) -> [u8; 8] {
    let mut message = Vec::with_capacity(16 + msdu.len());
    message.extend_from_slice(da);
    message.extend_from_slice(sa);
    message.extend_from_slice(&[priority, 0, 0, 0]);
    message.extend_from_slice(msdu);
    michael_digest(key, &message)
}

/// Destination and source addresses of a data frame
fn michael_addresses(header: &[u8]) -> Option<([u8; 6], [u8; 6])> {
    let fc = frame::FrameControl::from_frame(header)?;
    let a1 = frame::addr1(header)?;
    let a2 = frame::addr2(header)?;
    let a3 = frame::addr3(header)?;
    let da = if fc.to_ds() { a3 } else { a1 };
    let sa = match (fc.to_ds(), fc.from_ds()) {
        (_, false) => a2,
        (false, true) => a3,
        (true, true) => header.get(24..30)?.try_into().ok()?,
    };
    Some((da, sa))
}

/// Build a TKIP frame from a cleartext header and MSDU
///
/// # Arguments
/// * `header` - MAC header; the protected bit is set on the copy
/// * `tk` - Temporal key
/// * `mic_key` - Michael key for this direction
/// * `tsc` - 48-bit TKIP sequence counter
/// * `key_id` - Key index, 0 to 3
/// * `msdu` - Frame body to protect
pub fn encrypt(
    header: &[u8],
    tk: &[u8; 16],
    mic_key: &[u8; 8],
    tsc: u64,
    key_id: u8,
    msdu: &[u8],
) -> Result<Vec<u8>> {
    let ta = frame::addr2(header).ok_or(Error::TooShort)?;
    let (da, sa) = michael_addresses(header).ok_or(Error::TooShort)?;
    let seed = mix_key(tk, &ta, tsc);

    let mut data = msdu.to_vec();
    data.extend_from_slice(&michael(mic_key, &da, &sa, frame::qos_tid(header), msdu));
    data.extend_from_slice(&crc32fast::hash(&data).to_le_bytes());
    super::rc4::Rc4::new(&seed).apply_keystream(&mut data);

    let mut out = Vec::with_capacity(header.len() + TKIP_HEADER_LEN + data.len());
    out.extend_from_slice(header);
    out[1] |= frame::FC1_PROTECTED;
    out.extend_from_slice(&seed[..3]);
    out.push(((key_id & 0x03) << 6) | frame::EXT_IV);
    out.extend_from_slice(&(((tsc >> 16) & 0xffff_ffff) as u32).to_le_bytes());
    out.extend_from_slice(&data);
    Ok(out)
}
