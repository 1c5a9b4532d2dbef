/*!
 * Packet processing
 *
 * `Context` owns the key collection and the security association store and
 * routes each frame either to the handshake tracker (cleartext EAPOL-Key
 * frames) or to the matching cipher pipeline (protected frames).
 *
 * Every call takes `&mut self`, so key management and packet processing can
 * never overlap on one context. `SharedContext` is the locked variant for
 * callers that need to share a context across threads.
 */

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::cipher::{ccmp, tkip, wep};
use super::crypto::KEY_VERSION_HMAC_MD5_RC4;
use super::error::{Error, Result};
use super::frame::{self, FrameControl};
use super::handshake::{self, EapolKey};
use super::keys::{Key, KeyCollection, KeyItem};
use super::store::{SaId, SaStore, SecurityAssociation};
use crate::config::EngineConfig;

/// Per-call processing flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Input ends with a 4-byte FCS; the output gets a fresh one
    pub fcs_present: bool,
    /// Input starts with a fixed 24-byte capture preamble
    pub radiotap_present: bool,
    /// Track 4-way handshakes in cleartext EAPOL-Key frames
    pub manage_handshake: bool,
    /// Decrypt protected frames
    pub manage_decrypt: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            fcs_present: false,
            radiotap_present: false,
            manage_handshake: true,
            manage_decrypt: true,
        }
    }
}

/// Successful result of `process_packet`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Cleartext frame, starting at the MAC header
    Decrypted {
        plaintext: Vec<u8>,
        key_used: Option<KeyItem>,
    },
    /// An EAPOL-Key frame advanced or confirmed a handshake
    HandshakeStepOk,
}

/// Decryption engine state
#[derive(Debug)]
pub struct Context {
    keys: KeyCollection,
    store: SaStore,
}

impl Context {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            keys: KeyCollection::new(config.max_keys),
            store: SaStore::new(config.max_security_associations),
        }
    }

    /// Replace the key collection
    ///
    /// Associations derived from the previous keys are dropped.
    ///
    /// # Returns
    /// Number of accepted keys
    pub fn set_keys(&mut self, items: &[KeyItem]) -> Result<usize> {
        let accepted = self.keys.set_keys(items)?;
        self.store.clear();
        Ok(accepted)
    }

    /// Up to `max` keys, in collection order
    pub fn get_keys(&self, max: usize) -> Vec<KeyItem> {
        self.keys.get_keys(max)
    }

    /// Remove every key along with the associations derived from them
    ///
    /// # Returns
    /// Number of keys removed
    pub fn clean_keys(&mut self) -> usize {
        self.store.clear();
        self.keys.clean()
    }

    /// Drop all keys and associations
    pub fn reset(&mut self) {
        self.keys.clean();
        self.store.clear();
    }

    pub fn security_association(&self, id: &SaId) -> Option<&SecurityAssociation> {
        self.store.get(self.store.lookup(id)?)
    }

    pub fn security_associations(&self) -> impl Iterator<Item = &SecurityAssociation> {
        self.store.iter()
    }

    /// Free the slot of `id`
    ///
    /// # Returns
    /// Whether an association was released
    pub fn release_association(&mut self, id: &SaId) -> bool {
        match self.store.lookup(id) {
            Some(index) => {
                self.store.release(index);
                true
            }
            None => false,
        }
    }

    /// Process one captured frame
    ///
    /// # Arguments
    /// * `packet` - Captured bytes, optionally with preamble and FCS
    /// * `options` - Framing and processing flags
    ///
    /// # Returns
    /// The decrypted frame or a handshake step; every other path is an `Error`
    pub fn process_packet(&mut self, packet: &[u8], options: ProcessOptions) -> Result<Outcome> {
        if packet.is_empty() {
            return Err(Error::WrongDataSize);
        }

        let mut frame = packet;
        if options.radiotap_present {
            frame = frame
                .get(frame::RADIOTAP_PREAMBLE_LEN..)
                .ok_or(Error::WrongDataSize)?;
        }
        if options.fcs_present {
            let len = frame
                .len()
                .checked_sub(frame::FCS_LEN)
                .ok_or(Error::WrongDataSize)?;
            frame = &frame[..len];
        }

        let fc = FrameControl::from_frame(frame).ok_or(Error::TooShort)?;
        if !fc.is_data() {
            trace!(frame_type = fc.frame_type(), "not a data frame");
            return Err(Error::NotData);
        }

        let header_len = fc.header_len();
        if frame.len() < header_len + frame::CRYPTED_DATA_MINLEN {
            trace!(len = frame.len(), header_len, "frame too short");
            return Err(Error::TooShort);
        }

        let id = frame::sa_id(frame).ok_or(Error::RequiredDataMissing)?;
        let index = self.store.lookup_or_allocate(id)?;

        if !fc.is_protected() {
            return self.process_cleartext(index, frame, header_len, options);
        }

        if !options.manage_decrypt {
            return Err(Error::Unsuccessful);
        }

        let mut buffer = frame.to_vec();
        let key_used = if frame[header_len + 3] & frame::EXT_IV == 0 {
            trace!(%id, "WEP frame");
            self.decrypt_wep(index, &mut buffer, header_len)?
        } else {
            trace!(%id, "RSNA frame");
            self.decrypt_rsna(index, &mut buffer, header_len)?
        };

        if options.fcs_present {
            frame::append_fcs(&mut buffer);
        }

        Ok(Outcome::Decrypted {
            plaintext: buffer,
            key_used: Some(KeyItem::from(&*key_used)),
        })
    }

    fn process_cleartext(
        &mut self,
        index: usize,
        frame: &[u8],
        header_len: usize,
        options: ProcessOptions,
    ) -> Result<Outcome> {
        if !options.manage_handshake {
            return Err(Error::NoDataEncrypted);
        }

        let Some(eapol) = EapolKey::from_body(&frame[header_len..]) else {
            return Err(Error::NoDataEncrypted);
        };

        let sa = self.store.get_mut(index).ok_or(Error::RequiredDataMissing)?;
        handshake::process(sa, &eapol, &self.keys)?;
        Ok(Outcome::HandshakeStepOk)
    }

    /// Try the cached WEP key, then every WEP key in the collection
    ///
    /// Truncates `buffer` to the decrypted frame and returns the key that worked.
    fn decrypt_wep(
        &mut self,
        index: usize,
        buffer: &mut Vec<u8>,
        header_len: usize,
    ) -> Result<Arc<Key>> {
        let sa = self.store.get_mut(index).ok_or(Error::RequiredDataMissing)?;
        let cached = sa.cached_key.clone().filter(|key| key.wep_key().is_some());
        let candidates = cached.iter().chain(
            self.keys
                .wep_keys()
                .filter(|key| cached.as_ref().map_or(true, |c| !Arc::ptr_eq(c, key))),
        );

        let mut result = Err(Error::RequiredDataMissing);
        for key in candidates {
            let Some(secret) = key.wep_key() else { continue };
            match wep::decrypt(buffer, header_len, secret) {
                Ok(len) => {
                    buffer.truncate(len);
                    sa.cached_key = Some(Arc::clone(key));
                    sa.valid_key = true;
                    return Ok(Arc::clone(key));
                }
                Err(Error::IcvMismatch) => result = Err(Error::IcvMismatch),
                Err(e) => return Err(e),
            }
        }

        result
    }

    /// Decrypt with the PTK of a completed handshake
    ///
    /// Records the packet number (CCMP PN or TKIP TSC) of the last frame that
    /// decrypted.
    fn decrypt_rsna(
        &mut self,
        index: usize,
        buffer: &mut Vec<u8>,
        header_len: usize,
    ) -> Result<Arc<Key>> {
        let sa = self.store.get_mut(index).ok_or(Error::RequiredDataMissing)?;
        let key = match &sa.cached_key {
            Some(key) if sa.valid_key && key.is_wpa() => Arc::clone(key),
            _ => return Err(Error::RequiredDataMissing),
        };

        let tk = sa.wpa.ptk.tk();
        let (len, packet_number) = if sa.wpa.key_version == KEY_VERSION_HMAC_MD5_RC4 {
            let tsc = tkip::tsc(&buffer[header_len..]);
            (tkip::decrypt(buffer, header_len, &tk)?, tsc)
        } else {
            let pn = ccmp::packet_number(&buffer[header_len..]);
            (ccmp::decrypt(buffer, header_len, &tk)?, pn)
        };

        sa.wpa.packet_number = packet_number;
        buffer.truncate(len);
        Ok(key)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// `Context` behind a reader/writer lock
///
/// `get_keys` and association lookups take the read lock; everything that
/// mutates takes the write lock.
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    inner: Arc<RwLock<Context>>,
}

impl SharedContext {
    pub fn new(context: Context) -> Self {
        Self {
            inner: Arc::new(RwLock::new(context)),
        }
    }

    pub fn process_packet(&self, packet: &[u8], options: ProcessOptions) -> Result<Outcome> {
        self.inner.write().process_packet(packet, options)
    }

    pub fn set_keys(&self, items: &[KeyItem]) -> Result<usize> {
        self.inner.write().set_keys(items)
    }

    pub fn get_keys(&self, max: usize) -> Vec<KeyItem> {
        self.inner.read().get_keys(max)
    }

    pub fn clean_keys(&self) -> usize {
        self.inner.write().clean_keys()
    }

    pub fn reset(&self) {
        self.inner.write().reset()
    }

    pub fn security_association(&self, id: &SaId) -> Option<SecurityAssociation> {
        self.inner.read().security_association(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AP: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
    const STA: [u8; 6] = [0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb];
    const WEP_KEY: [u8; 5] = [0x0a, 0x0b, 0x0c, 0x0d, 0x0e];

    fn header(fc0: u8, fc1: u8) -> Vec<u8> {
        let mut header = vec![fc0, fc1, 0x00, 0x00];
        header.extend_from_slice(&AP);
        header.extend_from_slice(&STA);
        header.extend_from_slice(&AP);
        header.extend_from_slice(&[0x00, 0x00]);
        header
    }

    fn payload() -> Vec<u8> {
        let mut payload = vec![0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00, 0x08, 0x00];
        payload.extend_from_slice(b"an ip datagram goes here");
        payload
    }

    fn wep_context(keys: &[KeyItem]) -> Context {
        let mut ctx = Context::new();
        ctx.set_keys(keys).unwrap();
        ctx
    }

    #[test]
    fn test_rejects_empty_and_non_data() {
        let mut ctx = Context::new();
        let options = ProcessOptions::default();
        assert_eq!(ctx.process_packet(&[], options), Err(Error::WrongDataSize));

        let mut beacon = header(0x80, 0x00);
        beacon.extend_from_slice(&[0; 40]);
        assert_eq!(ctx.process_packet(&beacon, options), Err(Error::NotData));
    }

    #[test]
    fn test_rejects_short_frames() {
        let mut ctx = Context::new();
        let mut frame = header(0x08, 0x41);
        frame.extend_from_slice(&[0; 16]);
        assert_eq!(
            ctx.process_packet(&frame, ProcessOptions::default()),
            Err(Error::TooShort)
        );

        let options = ProcessOptions {
            radiotap_present: true,
            ..Default::default()
        };
        assert_eq!(ctx.process_packet(&[0; 10], options), Err(Error::WrongDataSize));
    }

    #[test]
    fn test_wds_frames_have_no_association() {
        let mut ctx = Context::new();
        let mut frame = header(0x08, 0x43);
        frame.extend_from_slice(&[0; 6]);
        frame.extend_from_slice(&[0; 20]);
        assert_eq!(
            ctx.process_packet(&frame, ProcessOptions::default()),
            Err(Error::RequiredDataMissing)
        );
    }

    #[test]
    fn test_cleartext_frames() {
        let mut ctx = Context::new();
        let mut frame = header(0x08, 0x01);
        frame.extend_from_slice(&payload());

        assert_eq!(
            ctx.process_packet(&frame, ProcessOptions::default()),
            Err(Error::NoDataEncrypted)
        );

        let options = ProcessOptions {
            manage_handshake: false,
            ..Default::default()
        };
        assert_eq!(ctx.process_packet(&frame, options), Err(Error::NoDataEncrypted));
    }

    #[test]
    fn test_protected_without_decrypt_flag() {
        let mut ctx = wep_context(&[KeyItem::Wep { key: WEP_KEY.to_vec() }]);
        let frame = wep::encrypt(&header(0x08, 0x01), [1, 2, 3], 0, &WEP_KEY, &payload());
        let options = ProcessOptions {
            manage_decrypt: false,
            ..Default::default()
        };
        assert_eq!(ctx.process_packet(&frame, options), Err(Error::Unsuccessful));
    }

    #[test]
    fn test_wep_decrypt_tries_keys_and_caches() {
        let mut ctx = wep_context(&[
            KeyItem::Wep40 { key: vec![1, 1, 1, 1, 1] },
            KeyItem::WpaPmk { pmk: [3; 32] },
            KeyItem::Wep { key: WEP_KEY.to_vec() },
        ]);
        let hdr = header(0x08, 0x01);
        let frame = wep::encrypt(&hdr, [1, 2, 3], 0, &WEP_KEY, &payload());

        let outcome = ctx.process_packet(&frame, ProcessOptions::default()).unwrap();
        let mut expected = hdr.clone();
        expected.extend_from_slice(&payload());
        assert_eq!(
            outcome,
            Outcome::Decrypted {
                plaintext: expected,
                key_used: Some(KeyItem::Wep { key: WEP_KEY.to_vec() }),
            }
        );

        let sa = ctx.security_association(&SaId::new(AP, STA)).unwrap();
        assert_eq!(sa.cached_key.as_ref().unwrap().wep_key(), Some(&WEP_KEY[..]));
        assert!(sa.valid_key);
    }

    #[test]
    fn test_wep_no_matching_key() {
        let mut ctx = wep_context(&[KeyItem::Wep { key: vec![7; 13] }]);
        let frame = wep::encrypt(&header(0x08, 0x01), [1, 2, 3], 0, &WEP_KEY, &payload());
        assert_eq!(
            ctx.process_packet(&frame, ProcessOptions::default()),
            Err(Error::IcvMismatch)
        );

        let mut empty = Context::new();
        assert_eq!(
            empty.process_packet(&frame, ProcessOptions::default()),
            Err(Error::RequiredDataMissing)
        );
    }

    #[test]
    fn test_fcs_and_preamble_handling() {
        let mut ctx = wep_context(&[KeyItem::Wep { key: WEP_KEY.to_vec() }]);
        let hdr = header(0x08, 0x01);
        let frame = wep::encrypt(&hdr, [9, 9, 9], 0, &WEP_KEY, &payload());

        let mut packet = vec![0xee; frame::RADIOTAP_PREAMBLE_LEN];
        packet.extend_from_slice(&frame);
        packet.extend_from_slice(&crc32fast::hash(&frame).to_le_bytes());

        let options = ProcessOptions {
            fcs_present: true,
            radiotap_present: true,
            ..Default::default()
        };
        let Outcome::Decrypted { plaintext, .. } = ctx.process_packet(&packet, options).unwrap() else {
            panic!("expected decrypted frame");
        };

        let body_end = plaintext.len() - frame::FCS_LEN;
        assert_eq!(&plaintext[..24], &hdr[..]);
        assert_eq!(&plaintext[24..body_end], &payload()[..]);
        assert_eq!(
            &plaintext[body_end..],
            &crc32fast::hash(&plaintext[..body_end]).to_le_bytes()
        );
    }

    #[test]
    fn test_rsna_without_handshake() {
        let mut ctx = wep_context(&[KeyItem::WpaPmk { pmk: [1; 32] }]);
        let frame = ccmp::encrypt(&header(0x08, 0x01), &[0; 16], 1, 0, &payload()).unwrap();
        assert_eq!(
            ctx.process_packet(&frame, ProcessOptions::default()),
            Err(Error::RequiredDataMissing)
        );
    }

    #[test]
    fn test_store_exhaustion_is_reported() {
        let mut ctx = Context::with_config(EngineConfig {
            max_security_associations: 1,
            max_keys: 4,
        });
        let mut first = header(0x08, 0x01);
        first.extend_from_slice(&payload());
        assert_eq!(
            ctx.process_packet(&first, ProcessOptions::default()),
            Err(Error::NoDataEncrypted)
        );

        let mut second = first.clone();
        second[10] = 0x01;
        assert_eq!(
            ctx.process_packet(&second, ProcessOptions::default()),
            Err(Error::StoreFull)
        );

        assert!(ctx.release_association(&SaId::new(AP, STA)));
        assert_eq!(
            ctx.process_packet(&second, ProcessOptions::default()),
            Err(Error::NoDataEncrypted)
        );
    }

    #[test]
    fn test_key_management_resets_associations() {
        let mut ctx = wep_context(&[KeyItem::Wep { key: WEP_KEY.to_vec() }]);
        let frame = wep::encrypt(&header(0x08, 0x01), [1, 2, 3], 0, &WEP_KEY, &payload());
        ctx.process_packet(&frame, ProcessOptions::default()).unwrap();
        assert_eq!(ctx.security_associations().count(), 1);

        assert_eq!(ctx.get_keys(8).len(), 1);
        assert_eq!(ctx.clean_keys(), 1);
        assert_eq!(ctx.security_associations().count(), 0);
        assert!(ctx.get_keys(8).is_empty());

        let too_many = vec![KeyItem::Wep { key: vec![1] }; 65];
        assert_eq!(ctx.set_keys(&too_many), Err(Error::WrongDataSize));
    }

    #[test]
    fn test_shared_context() {
        let shared = SharedContext::new(Context::new());
        let other = shared.clone();
        assert_eq!(shared.set_keys(&[KeyItem::Wep { key: WEP_KEY.to_vec() }]), Ok(1));
        assert_eq!(other.get_keys(4), vec![KeyItem::Wep { key: WEP_KEY.to_vec() }]);

        let frame = wep::encrypt(&header(0x08, 0x01), [1, 2, 3], 0, &WEP_KEY, &payload());
        let handle = std::thread::spawn(move || other.process_packet(&frame, ProcessOptions::default()));
        assert!(matches!(handle.join().unwrap(), Ok(Outcome::Decrypted { .. })));
        assert!(shared.security_association(&SaId::new(AP, STA)).is_some());

        shared.reset();
        assert!(shared.get_keys(4).is_empty());
    }
}
