/*!
 * Security association store
 *
 * Fixed-capacity arena of per (BSSID, station) records. Slots are addressed
 * by index; lookups scan from the highest used slot downwards so the most
 * recently created association is found first.
 */

use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use super::crypto::Ptk;
use super::error::{Error, Result};
use super::keys::Key;

/// Default number of association slots
pub const DEFAULT_MAX_SECURITY_ASSOCIATIONS: usize = 256;

pub type MacAddress = [u8; 6];

/// Association key: access point and station addresses
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SaId {
    pub bssid: MacAddress,
    pub sta: MacAddress,
}

impl SaId {
    pub fn new(bssid: MacAddress, sta: MacAddress) -> Self {
        Self { bssid, sta }
    }
}

fn fmt_mac(mac: &MacAddress, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
        f,
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

impl fmt::Display for SaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_mac(&self.bssid, f)?;
        write!(f, "/")?;
        fmt_mac(&self.sta, f)
    }
}

impl fmt::Debug for SaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SaId({})", self)
    }
}

/// Last 4-way handshake message processed for an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeStage {
    #[default]
    None,
    Msg1,
    Msg2,
    Msg4,
}

impl HandshakeStage {
    /// Message number, 0 when nothing was seen yet
    pub fn number(self) -> u8 {
        match self {
            HandshakeStage::None => 0,
            HandshakeStage::Msg1 => 1,
            HandshakeStage::Msg2 => 2,
            HandshakeStage::Msg4 => 4,
        }
    }
}

/// WPA session state gathered from the handshake
#[derive(Debug, Clone, Default)]
pub struct WpaState {
    pub key_version: u8,
    /// CCMP PN or TKIP TSC of the last frame decrypted
    pub packet_number: u64,
    pub anonce: [u8; 32],
    pub ptk: Ptk,
}

/// One slot of the store
#[derive(Debug, Clone, Default)]
pub struct SecurityAssociation {
    pub id: SaId,
    pub used: bool,
    pub cached_key: Option<Arc<Key>>,
    pub stage: HandshakeStage,
    pub valid_key: bool,
    pub wpa: WpaState,
}

impl SecurityAssociation {
    fn reset(&mut self, id: SaId) {
        *self = SecurityAssociation {
            id,
            used: true,
            ..Default::default()
        };
    }
}

/// Bounded association table
#[derive(Debug)]
pub struct SaStore {
    slots: Vec<SecurityAssociation>,
    first_free: usize,
    last_stored: Option<usize>,
}

impl SaStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![SecurityAssociation::default(); capacity],
            first_free: 0,
            last_stored: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots in use
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|sa| sa.used).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the slot holding `id`, newest first
    pub fn lookup(&self, id: &SaId) -> Option<usize> {
        let last = self.last_stored?;
        (0..=last)
            .rev()
            .find(|&index| self.slots[index].used && self.slots[index].id == *id)
    }

    /// Claim a free slot for `id` and reset it
    ///
    /// Callers look up `id` first; the store does not check for duplicates.
    pub fn allocate(&mut self, id: SaId) -> Result<usize> {
        let index = match self.slots.get(self.first_free) {
            Some(sa) if !sa.used => self.first_free,
            _ => self
                .slots
                .iter()
                .enumerate()
                .skip(self.first_free)
                .find(|(_, sa)| !sa.used)
                .map(|(index, _)| index)
                .ok_or_else(|| {
                    warn!(capacity = self.slots.len(), %id, "security association store full");
                    Error::StoreFull
                })?,
        };

        self.slots[index].reset(id);
        self.first_free = index + 1;
        if self.last_stored.map_or(true, |last| index > last) {
            self.last_stored = Some(index);
        }

        trace!(index, %id, "allocated security association");
        Ok(index)
    }

    /// Lookup `id`, allocating a slot when it is unknown
    pub fn lookup_or_allocate(&mut self, id: SaId) -> Result<usize> {
        match self.lookup(&id) {
            Some(index) => Ok(index),
            None => self.allocate(id),
        }
    }

    /// Return a slot to the free pool
    pub fn release(&mut self, index: usize) {
        let Some(sa) = self.slots.get_mut(index) else {
            return;
        };
        sa.used = false;

        if index < self.first_free {
            self.first_free = index;
        }
        if self.last_stored == Some(index) {
            self.last_stored = index.checked_sub(1);
        }
    }

    pub fn get(&self, index: usize) -> Option<&SecurityAssociation> {
        self.slots.get(index).filter(|sa| sa.used)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SecurityAssociation> {
        self.slots.get_mut(index).filter(|sa| sa.used)
    }

    /// Iterate over used slots
    pub fn iter(&self) -> impl Iterator<Item = &SecurityAssociation> {
        self.slots.iter().filter(|sa| sa.used)
    }

    /// Release every slot and reset bookkeeping
    pub fn clear(&mut self) {
        for sa in &mut self.slots {
            *sa = SecurityAssociation::default();
        }
        self.first_free = 0;
        self.last_stored = None;
    }
}

impl Default for SaStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SECURITY_ASSOCIATIONS)
    }
}
