/*!
 * WEP decryption
 *
 * Body layout: IV (3) | key ID (1) | ciphertext | ICV (4). The RC4 seed is
 * the IV followed by the secret key; the ICV is the little-endian CRC-32 of
 * the plaintext, encrypted along with it.
 */

use super::rc4::Rc4;
use crate::core::error::{Error, Result};
use crate::core::frame;

/// IV and key ID octet
pub const WEP_HEADER_LEN: usize = 4;
/// Integrity check value
pub const WEP_ICV_LEN: usize = 4;

/// RC4-decrypt `data` (ciphertext followed by the ICV) and verify the ICV
///
/// Shared with TKIP, which only differs in how the seed is built.
pub(crate) fn decrypt_core(seed: &[u8], data: &mut [u8]) -> Result<()> {
    if data.len() < WEP_ICV_LEN {
        return Err(Error::TooShort);
    }

    Rc4::new(seed).apply_keystream(data);

    let (plaintext, icv) = data.split_at(data.len() - WEP_ICV_LEN);
    if crc32fast::hash(plaintext).to_le_bytes() != icv {
        return Err(Error::IcvMismatch);
    }
    Ok(())
}

/// Decrypt a WEP frame in place
///
/// On success the WEP header and ICV are removed, the protected bit is cleared
/// and the new frame length is returned. On failure the frame is left as is.
///
/// # Arguments
/// * `frame` - Frame starting at the MAC header, FCS excluded
/// * `header_len` - MAC header length
/// * `key` - WEP secret key
pub fn decrypt(frame: &mut [u8], header_len: usize, key: &[u8]) -> Result<usize> {
    let body = frame.get(header_len..).ok_or(Error::TooShort)?;
    if body.len() < WEP_HEADER_LEN + WEP_ICV_LEN {
        return Err(Error::TooShort);
    }

    let mut seed = Vec::with_capacity(3 + key.len());
    seed.extend_from_slice(&body[..3]);
    seed.extend_from_slice(key);

    let mut data = body[WEP_HEADER_LEN..].to_vec();
    decrypt_core(&seed, &mut data)?;

    let plain_len = data.len() - WEP_ICV_LEN;
    frame[header_len..header_len + plain_len].copy_from_slice(&data[..plain_len]);
    frame::clear_protected(frame);
    Ok(header_len + plain_len)
}

/// Build a WEP frame from a cleartext header and payload
///
/// # Arguments
/// * `header` - MAC header; the protected bit is set on the copy
/// * `iv` - 3-byte initialization vector
/// * `key_id` - Key index, 0 to 3
/// * `key` - WEP secret key
/// * `plaintext` - Frame body to protect
pub fn encrypt(header: &[u8], iv: [u8; 3], key_id: u8, key: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let mut seed = Vec::with_capacity(3 + key.len());
    seed.extend_from_slice(&iv);
    seed.extend_from_slice(key);

    let mut data = plaintext.to_vec();
    data.extend_from_slice(&crc32fast::hash(plaintext).to_le_bytes());
    Rc4::new(&seed).apply_keystream(&mut data);

    let mut out = Vec::with_capacity(header.len() + WEP_HEADER_LEN + data.len());
    out.extend_from_slice(header);
    if let Some(fc1) = out.get_mut(1) {
        *fc1 |= frame::FC1_PROTECTED;
    }
    out.extend_from_slice(&iv);
    out.push((key_id & 0x03) << 6);
    out.extend_from_slice(&data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: [u8; 24] = [
        0x08, 0x01, 0x00, 0x00, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa,
        0xbb, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x10, 0x00,
    ];
    const KEY: [u8; 5] = [0x01, 0x02, 0x03, 0x04, 0x05];
    const PLAINTEXT: &[u8] = b"\xaa\xaa\x03\x00\x00\x00\x08\x00wep protected payload";

    #[test]
    fn test_wep_round_trip() {
        let mut frame = encrypt(&HEADER, [0xde, 0xad, 0x01], 0, &KEY, PLAINTEXT);
        assert_eq!(frame[1] & frame::FC1_PROTECTED, frame::FC1_PROTECTED);
        assert_eq!(frame.len(), 24 + 4 + PLAINTEXT.len() + 4);

        let len = decrypt(&mut frame, 24, &KEY).unwrap();
        assert_eq!(len, 24 + PLAINTEXT.len());
        assert_eq!(&frame[24..len], PLAINTEXT);
        assert_eq!(frame[1], 0x01);
    }

    #[test]
    fn test_wep_flipped_byte_is_icv_mismatch() {
        let original = encrypt(&HEADER, [1, 2, 3], 0, &KEY, PLAINTEXT);
        for index in 28..original.len() {
            let mut frame = original.clone();
            frame[index] ^= 0x01;
            assert_eq!(decrypt(&mut frame, 24, &KEY), Err(Error::IcvMismatch));
            assert_eq!(frame[index], original[index] ^ 0x01);
        }
    }

    #[test]
    fn test_wep_wrong_key() {
        let mut frame = encrypt(&HEADER, [1, 2, 3], 0, &KEY, PLAINTEXT);
        assert_eq!(
            decrypt(&mut frame, 24, &[9, 9, 9, 9, 9]),
            Err(Error::IcvMismatch)
        );
    }

    #[test]
    fn test_wep_short_body() {
        let mut frame = HEADER.to_vec();
        frame.extend_from_slice(&[0; 7]);
        assert_eq!(decrypt(&mut frame, 24, &KEY), Err(Error::TooShort));
    }
}
