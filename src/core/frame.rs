/*!
 * Minimal 802.11 MAC header handling
 *
 * Only what the engine needs: frame type, DS bits, protection flag, header
 * length and the BSSID/station addresses.
 */

use super::store::{MacAddress, SaId};

/// Frame type field value for data frames
pub const FRAME_TYPE_DATA: u8 = 2;

/// Base MAC header: FC, duration, A1, A2, A3, sequence control
pub const MAC_HEADER_LEN: usize = 24;
/// Optional fourth address
pub const ADDR4_LEN: usize = 6;
/// QoS control field
pub const QOS_CONTROL_LEN: usize = 2;

/// Shortest protected body the engine accepts
pub const CRYPTED_DATA_MINLEN: usize = 17;

/// Fixed capture preamble skipped when radiotap is flagged
pub const RADIOTAP_PREAMBLE_LEN: usize = 24;

/// Frame check sequence trailer
pub const FCS_LEN: usize = 4;

/// 802.2 LLC/SNAP header announcing an 802.1X payload
pub const LLC_SNAP_EAPOL: [u8; 8] = [0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x88, 0x8E];

/// Protected frame bit in the second frame-control byte
pub const FC1_PROTECTED: u8 = 0x40;
const FC1_TO_DS: u8 = 0x01;
const FC1_FROM_DS: u8 = 0x02;
const FC0_QOS_SUBTYPE: u8 = 0x80;

/// Extended IV bit in the key ID octet of a protected body
pub const EXT_IV: u8 = 0x20;

/// Frame-control view over the first two header bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl(pub [u8; 2]);

impl FrameControl {
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        Some(Self([*frame.first()?, *frame.get(1)?]))
    }

    pub fn frame_type(self) -> u8 {
        (self.0[0] >> 2) & 0x03
    }

    pub fn is_data(self) -> bool {
        self.frame_type() == FRAME_TYPE_DATA
    }

    pub fn is_qos(self) -> bool {
        self.is_data() && self.0[0] & FC0_QOS_SUBTYPE != 0
    }

    pub fn to_ds(self) -> bool {
        self.0[1] & FC1_TO_DS != 0
    }

    pub fn from_ds(self) -> bool {
        self.0[1] & FC1_FROM_DS != 0
    }

    pub fn has_addr4(self) -> bool {
        self.to_ds() && self.from_ds()
    }

    pub fn is_protected(self) -> bool {
        self.0[1] & FC1_PROTECTED != 0
    }

    /// MAC header length implied by this frame control
    pub fn header_len(self) -> usize {
        let mut len = MAC_HEADER_LEN;
        if self.has_addr4() {
            len += ADDR4_LEN;
        }
        if self.is_qos() {
            len += QOS_CONTROL_LEN;
        }
        len
    }
}

fn addr(frame: &[u8], offset: usize) -> Option<MacAddress> {
    frame.get(offset..offset + 6)?.try_into().ok()
}

pub fn addr1(frame: &[u8]) -> Option<MacAddress> {
    addr(frame, 4)
}

/// Transmitter address
pub fn addr2(frame: &[u8]) -> Option<MacAddress> {
    addr(frame, 10)
}

pub fn addr3(frame: &[u8]) -> Option<MacAddress> {
    addr(frame, 16)
}

/// BSSID and station address by the DS bits
///
/// No-DS frames take the BSSID from A3; the station is A2 unless A2 is the
/// BSSID itself, in which case A1 is. WDS frames carry no single BSSID and
/// yield `None`.
pub fn sa_id(frame: &[u8]) -> Option<SaId> {
    let fc = FrameControl::from_frame(frame)?;
    let (a1, a2, a3) = (addr1(frame)?, addr2(frame)?, addr3(frame)?);

    match (fc.to_ds(), fc.from_ds()) {
        (false, false) => {
            let sta = if a2 == a3 { a1 } else { a2 };
            Some(SaId::new(a3, sta))
        }
        (true, false) => Some(SaId::new(a1, a2)),
        (false, true) => Some(SaId::new(a2, a1)),
        (true, true) => None,
    }
}

/// QoS TID of a QoS data frame, 0 otherwise
pub fn qos_tid(frame: &[u8]) -> u8 {
    let Some(fc) = FrameControl::from_frame(frame) else {
        return 0;
    };
    if !fc.is_qos() {
        return 0;
    }
    let offset = fc.header_len() - QOS_CONTROL_LEN;
    frame.get(offset).map_or(0, |qc| qc & 0x0f)
}

/// Clear the protected bit in place
pub fn clear_protected(frame: &mut [u8]) {
    if let Some(fc1) = frame.get_mut(1) {
        *fc1 &= !FC1_PROTECTED;
    }
}

/// Append the little-endian CRC-32 of `frame` as its FCS
pub fn append_fcs(frame: &mut Vec<u8>) {
    let crc = crc32fast::hash(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    const AP: MacAddress = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
    const STA: MacAddress = [0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb];
    const OTHER: MacAddress = [0xff; 6];

    fn header(fc1: u8, a1: MacAddress, a2: MacAddress, a3: MacAddress) -> Vec<u8> {
        let mut frame = vec![0x08, fc1, 0, 0];
        frame.extend_from_slice(&a1);
        frame.extend_from_slice(&a2);
        frame.extend_from_slice(&a3);
        frame.extend_from_slice(&[0, 0]);
        frame
    }

    #[test]
    fn test_header_lengths() {
        assert_eq!(FrameControl([0x08, 0x00]).header_len(), 24);
        assert_eq!(FrameControl([0x88, 0x00]).header_len(), 26);
        assert_eq!(FrameControl([0x08, 0x03]).header_len(), 30);
        assert_eq!(FrameControl([0x88, 0x03]).header_len(), 32);
    }

    #[test]
    fn test_frame_type() {
        assert!(FrameControl([0x08, 0x00]).is_data());
        assert!(!FrameControl([0x80, 0x00]).is_data());
        assert!(!FrameControl([0xd4, 0x00]).is_data());
        // beacon subtype bit 0x80 is not QoS on management frames
        assert!(!FrameControl([0x80, 0x00]).is_qos());
    }

    #[test]
    fn test_address_selection() {
        let to_ds = header(0x01, AP, STA, OTHER);
        assert_eq!(sa_id(&to_ds), Some(SaId::new(AP, STA)));

        let from_ds = header(0x02, STA, AP, OTHER);
        assert_eq!(sa_id(&from_ds), Some(SaId::new(AP, STA)));

        let no_ds = header(0x00, OTHER, STA, AP);
        assert_eq!(sa_id(&no_ds), Some(SaId::new(AP, STA)));

        let no_ds_from_ap = header(0x00, STA, AP, AP);
        assert_eq!(sa_id(&no_ds_from_ap), Some(SaId::new(AP, STA)));

        let wds = header(0x03, AP, STA, OTHER);
        assert_eq!(sa_id(&wds), None);

        assert_eq!(sa_id(&to_ds[..20]), None);
    }

    #[test]
    fn test_qos_tid() {
        let mut frame = header(0x01, AP, STA, OTHER);
        frame[0] = 0x88;
        frame.extend_from_slice(&[0x35, 0x00]);
        assert_eq!(qos_tid(&frame), 5);

        frame[0] = 0x08;
        assert_eq!(qos_tid(&frame), 0);
    }

    #[test]
    fn test_clear_protected_and_fcs() {
        let mut frame = header(0x41, AP, STA, OTHER);
        assert!(FrameControl::from_frame(&frame).unwrap().is_protected());
        clear_protected(&mut frame);
        assert_eq!(frame[1], 0x01);

        let len = frame.len();
        append_fcs(&mut frame);
        assert_eq!(frame.len(), len + 4);
        assert_eq!(&frame[len..], &crc32fast::hash(&frame[..len]).to_le_bytes());
    }
}
