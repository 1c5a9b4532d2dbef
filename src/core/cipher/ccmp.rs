/*!
 * CCMP (AES-CCM) decryption
 *
 * Body layout: PN0 | PN1 | reserved | key ID | PN2..PN5 | ciphertext | MIC (8).
 * The nonce is priority | A2 | PN5..PN0; the AAD is built from the masked
 * frame control, the addresses, the masked sequence control and the QoS TID.
 */

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::core::error::{Error, Result};
use crate::core::frame::{self, FrameControl};

/// PN, key ID and extended IV
pub const CCMP_HEADER_LEN: usize = 8;
/// CCM MIC
pub const CCMP_MIC_LEN: usize = 8;

const BLOCK_LEN: usize = 16;
const B0_FLAGS: u8 = 0x59;
const CTR_FLAGS: u8 = 0x01;

/// 48-bit packet number from the CCMP header
pub fn packet_number(header: &[u8]) -> u64 {
    u64::from(header[0])
        | u64::from(header[1]) << 8
        | u64::from(header[4]) << 16
        | u64::from(header[5]) << 24
        | u64::from(header[6]) << 32
        | u64::from(header[7]) << 40
}

fn ccmp_header(pn: u64, key_id: u8) -> [u8; CCMP_HEADER_LEN] {
    [
        pn as u8,
        (pn >> 8) as u8,
        0,
        ((key_id & 0x03) << 6) | frame::EXT_IV,
        (pn >> 16) as u8,
        (pn >> 24) as u8,
        (pn >> 32) as u8,
        (pn >> 40) as u8,
    ]
}

fn nonce(priority: u8, a2: &[u8; 6], pn: u64) -> [u8; 13] {
    let mut nonce = [0u8; 13];
    nonce[0] = priority;
    nonce[1..7].copy_from_slice(a2);
    for i in 0..6 {
        nonce[7 + i] = (pn >> (8 * (5 - i))) as u8;
    }
    nonce
}

/// Additional authenticated data from the MAC header
fn aad(header: &[u8], fc: FrameControl) -> Vec<u8> {
    let mut aad = Vec::with_capacity(30);
    aad.push(header[0] & 0x8f);
    aad.push((header[1] & 0xc7) | frame::FC1_PROTECTED);
    // A1, A2, A3
    aad.extend_from_slice(&header[4..22]);
    aad.push(header[22] & 0x0f);
    aad.push(0);
    if fc.has_addr4() {
        aad.extend_from_slice(&header[24..30]);
    }
    if fc.is_qos() {
        let qc = fc.header_len() - frame::QOS_CONTROL_LEN;
        aad.push(header[qc] & 0x0f);
        aad.push(0);
    }
    aad
}

/// AES-CCM with 8-byte MIC and 2-byte length field
struct Ccm {
    cipher: Aes128,
    nonce: [u8; 13],
}

impl Ccm {
    fn new(tk: &[u8; 16], nonce: [u8; 13]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(tk)),
            nonce,
        }
    }

    fn encrypt_block(&self, input: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        let mut block = GenericArray::clone_from_slice(input);
        self.cipher.encrypt_block(&mut block);
        block.into()
    }

    fn counter_block(&self, counter: u16) -> [u8; BLOCK_LEN] {
        let mut a = [0u8; BLOCK_LEN];
        a[0] = CTR_FLAGS;
        a[1..14].copy_from_slice(&self.nonce);
        a[14..].copy_from_slice(&counter.to_be_bytes());
        self.encrypt_block(&a)
    }

    /// CBC-MAC over B0, the length-prefixed AAD and the plaintext
    fn cbc_mac(&self, aad: &[u8], plaintext: &[u8]) -> [u8; CCMP_MIC_LEN] {
        let mut b0 = [0u8; BLOCK_LEN];
        b0[0] = B0_FLAGS;
        b0[1..14].copy_from_slice(&self.nonce);
        b0[14..].copy_from_slice(&(plaintext.len() as u16).to_be_bytes());
        let mut x = self.encrypt_block(&b0);

        let mut header = Vec::with_capacity(2 + aad.len());
        header.extend_from_slice(&(aad.len() as u16).to_be_bytes());
        header.extend_from_slice(aad);

        for chunk in header.chunks(BLOCK_LEN).chain(plaintext.chunks(BLOCK_LEN)) {
            for (acc, byte) in x.iter_mut().zip(chunk) {
                *acc ^= byte;
            }
            x = self.encrypt_block(&x);
        }

        let mut mic = [0u8; CCMP_MIC_LEN];
        mic.copy_from_slice(&x[..CCMP_MIC_LEN]);
        mic
    }

    /// CTR keystream from counter 1 onwards
    fn apply_ctr(&self, data: &mut [u8]) {
        for (i, chunk) in data.chunks_mut(BLOCK_LEN).enumerate() {
            let keystream = self.counter_block(i as u16 + 1);
            for (byte, k) in chunk.iter_mut().zip(keystream.iter()) {
                *byte ^= k;
            }
        }
    }

    /// Mask or unmask the MIC with counter block 0
    fn mask_mic(&self, mic: &mut [u8; CCMP_MIC_LEN]) {
        let s0 = self.counter_block(0);
        for (byte, k) in mic.iter_mut().zip(s0.iter()) {
            *byte ^= k;
        }
    }
}

fn ccm_for(frame_bytes: &[u8], tk: &[u8; 16], pn: u64) -> Result<Ccm> {
    let a2 = frame::addr2(frame_bytes).ok_or(Error::TooShort)?;
    Ok(Ccm::new(tk, nonce(frame::qos_tid(frame_bytes), &a2, pn)))
}

/// Decrypt a CCMP frame in place
///
/// On success the CCMP header and MIC are removed, the protected bit is
/// cleared and the new frame length is returned. On failure the frame is
/// left as is.
///
/// # Arguments
/// * `frame` - Frame starting at the MAC header, FCS excluded
/// * `header_len` - MAC header length
/// * `tk` - Temporal key from the PTK
pub fn decrypt(frame: &mut [u8], header_len: usize, tk: &[u8; 16]) -> Result<usize> {
    let fc = FrameControl::from_frame(frame).ok_or(Error::TooShort)?;
    if header_len < fc.header_len() || frame.len() < header_len + CCMP_HEADER_LEN + CCMP_MIC_LEN {
        return Err(Error::TooShort);
    }

    let body = &frame[header_len..];
    let pn = packet_number(body);
    let ccm = ccm_for(frame, tk, pn)?;
    let aad = aad(frame, fc);

    let mut plaintext = body[CCMP_HEADER_LEN..body.len() - CCMP_MIC_LEN].to_vec();
    let mut mic = [0u8; CCMP_MIC_LEN];
    mic.copy_from_slice(&body[body.len() - CCMP_MIC_LEN..]);

    ccm.apply_ctr(&mut plaintext);
    ccm.mask_mic(&mut mic);
    if ccm.cbc_mac(&aad, &plaintext) != mic {
        return Err(Error::MicMismatch);
    }

    frame[header_len..header_len + plaintext.len()].copy_from_slice(&plaintext);
    frame::clear_protected(frame);
    Ok(header_len + plaintext.len())
}

/// Build a CCMP frame from a cleartext header and payload
///
/// # Arguments
/// * `header` - MAC header; the protected bit is set on the copy
/// * `tk` - Temporal key
/// * `pn` - 48-bit packet number
/// * `key_id` - Key index, 0 to 3
/// * `plaintext` - Frame body to protect
pub fn encrypt(
    header: &[u8],
    tk: &[u8; 16],
    pn: u64,
    key_id: u8,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let fc = FrameControl::from_frame(header).ok_or(Error::TooShort)?;
    if header.len() < fc.header_len() {
        return Err(Error::TooShort);
    }

    let ccm = ccm_for(header, tk, pn)?;
    let mut mic = ccm.cbc_mac(&aad(header, fc), plaintext);
    ccm.mask_mic(&mut mic);

    let mut data = plaintext.to_vec();
    ccm.apply_ctr(&mut data);

    let mut out = Vec::with_capacity(header.len() + CCMP_HEADER_LEN + data.len() + CCMP_MIC_LEN);
    out.extend_from_slice(header);
    out[1] |= frame::FC1_PROTECTED;
    out.extend_from_slice(&ccmp_header(pn, key_id));
    out.extend_from_slice(&data);
    out.extend_from_slice(&mic);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TK: [u8; 16] = [
        0xc9, 0x7c, 0x1f, 0x67, 0xce, 0x37, 0x11, 0x85, 0x51, 0x4a, 0x8a, 0x19, 0xf2, 0xbd, 0xd5,
        0x2f,
    ];

    fn header(fc0: u8, fc1: u8) -> Vec<u8> {
        let mut header = vec![fc0, fc1, 0x00, 0x00];
        header.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        header.extend_from_slice(&[0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb]);
        header.extend_from_slice(&[0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        header.extend_from_slice(&[0x30, 0x01]);
        if fc0 & 0x80 != 0 {
            header.extend_from_slice(&[0x03, 0x00]);
        }
        header
    }

    #[test]
    fn test_packet_number_layout() {
        let hdr = ccmp_header(0x0605_0403_0201, 2);
        assert_eq!(hdr, [0x01, 0x02, 0x00, 0xa0, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(packet_number(&hdr), 0x0605_0403_0201);
    }

    #[test]
    fn test_nonce_layout() {
        let n = nonce(3, &[1, 2, 3, 4, 5, 6], 0x0a0b_0c0d_0e0f);
        assert_eq!(n, [3, 1, 2, 3, 4, 5, 6, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f]);
    }

    #[test]
    fn test_aad_masks_mutable_bits() {
        // retry, power management and more data set; subtype bits of a QoS frame
        let hdr = header(0xb8, 0x39);
        let fc = FrameControl::from_frame(&hdr).unwrap();
        let aad = aad(&hdr, fc);
        assert_eq!(aad.len(), 24);
        assert_eq!(aad[0], 0x88);
        assert_eq!(aad[1], 0x41);
        assert_eq!(aad[20], 0x00);
        assert_eq!(aad[22], 0x03);

        let plain = header(0x08, 0x01);
        let fc = FrameControl::from_frame(&plain).unwrap();
        assert_eq!(super::aad(&plain, fc).len(), 22);
    }

    #[test]
    fn test_ccmp_ieee_vector() {
        // IEEE 802.11 CCMP test vector (PN 0xb5039776e70c, key ID 0)
        let hdr = hex::decode("0848c32c0fd2e128a57c5030f1844408abaea5b8fcba8033").unwrap();
        let plaintext = hex::decode("f8ba1a55d02f85ae967bb62fb6cda8eb7e78a050").unwrap();
        let expected = hex::decode(concat!(
            "0848c32c0fd2e128a57c5030f1844408abaea5b8fcba8033",
            "0ce70020769703b5",
            "f3d0a2fe9a3dbf2342a643e43246e80c3c04d019",
            "7845ce0b16f97623"
        ))
        .unwrap();

        let mut frame = expected.clone();
        assert_eq!(packet_number(&frame[24..]), 0xb503_9776_e70c);
        let len = decrypt(&mut frame, 24, &TK).unwrap();
        assert_eq!(len, 44);
        assert_eq!(&frame[24..len], &plaintext[..]);

        let produced = encrypt(&hdr, &TK, 0xb503_9776_e70c, 0, &plaintext).unwrap();
        assert_eq!(hex::encode(produced), hex::encode(expected));
    }

    #[test]
    fn test_ccmp_round_trip() {
        let payload = b"\xaa\xaa\x03\x00\x00\x00\x08\x00ccmp protected payload spanning blocks";
        for hdr in [header(0x08, 0x01), header(0x88, 0x01)] {
            let hlen = hdr.len();
            let mut frame = encrypt(&hdr, &TK, 0x0000_0000_0001, 0, payload).unwrap();
            assert_eq!(frame.len(), hlen + 8 + payload.len() + 8);

            let len = decrypt(&mut frame, hlen, &TK).unwrap();
            assert_eq!(len, hlen + payload.len());
            assert_eq!(&frame[hlen..len], payload);
            assert_eq!(frame[1] & frame::FC1_PROTECTED, 0);
        }
    }

    #[test]
    fn test_ccmp_corrupted_mic() {
        let hdr = header(0x08, 0x01);
        let original = encrypt(&hdr, &TK, 7, 0, b"some payload").unwrap();

        let mut frame = original.clone();
        let last = frame.len() - 1;
        frame[last] ^= 0x80;
        assert_eq!(decrypt(&mut frame, 24, &TK), Err(Error::MicMismatch));
        assert_eq!(&frame[..last], &original[..last]);
    }

    #[test]
    fn test_ccmp_corrupted_header_or_payload() {
        let hdr = header(0x08, 0x01);
        let original = encrypt(&hdr, &TK, 7, 0, b"some payload").unwrap();

        // PN byte
        let mut frame = original.clone();
        frame[24] ^= 0x01;
        assert_eq!(decrypt(&mut frame, 24, &TK), Err(Error::MicMismatch));

        // ciphertext byte
        let mut frame = original.clone();
        frame[24 + 8] ^= 0x01;
        assert_eq!(decrypt(&mut frame, 24, &TK), Err(Error::MicMismatch));

        // authenticated address
        let mut frame = original;
        frame[16] ^= 0x01;
        assert_eq!(decrypt(&mut frame, 24, &TK), Err(Error::MicMismatch));
    }

    #[test]
    fn test_ccmp_short_frame() {
        let mut frame = header(0x08, 0x41);
        frame.extend_from_slice(&[0; 15]);
        assert_eq!(decrypt(&mut frame, 24, &TK), Err(Error::TooShort));
    }
}
