/*!
 * Candidate key collection
 *
 * Keys are supplied by the caller (WEP keys, WPA passphrases, PSKs or PMKs),
 * validated and normalized, and stored in order. Passphrases are turned into
 * their PSK once, when the collection is set, so handshake processing never
 * runs PBKDF2.
 */

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::crypto;
use super::error::{Error, Result};

/// Longest accepted WEP key
pub const WEP_KEY_MAX_LEN: usize = 32;
/// WEP-40 key length
pub const WEP40_KEY_LEN: usize = 5;
/// WEP-104 key length
pub const WEP104_KEY_LEN: usize = 13;
/// Shortest accepted WPA passphrase
pub const WPA_PASSPHRASE_MIN_LEN: usize = 8;
/// Longest accepted WPA passphrase
pub const WPA_PASSPHRASE_MAX_LEN: usize = 63;
/// Longest SSID
pub const SSID_MAX_LEN: usize = 32;
/// Default collection capacity
pub const DEFAULT_MAX_KEYS: usize = 64;

/// Key as supplied by the caller
///
/// `Wep40` and `Wep104` are accepted on input and normalized to `Wep` with a
/// 5 or 13 byte key. `WpaPsk` and `WpaPmk` are both used directly as the PMK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyItem {
    Wep {
        #[serde(with = "hex")]
        key: Vec<u8>,
    },
    Wep40 {
        #[serde(with = "hex")]
        key: Vec<u8>,
    },
    Wep104 {
        #[serde(with = "hex")]
        key: Vec<u8>,
    },
    WpaPassword {
        passphrase: String,
        ssid: String,
    },
    WpaPsk {
        #[serde(with = "hex")]
        psk: [u8; 32],
    },
    WpaPmk {
        #[serde(with = "hex")]
        pmk: [u8; 32],
    },
}

/// Validate a key and normalize its WEP variants
pub fn validate(item: &KeyItem) -> Result<KeyItem> {
    match item {
        KeyItem::Wep { key } => {
            if key.is_empty() || key.len() > WEP_KEY_MAX_LEN {
                return Err(Error::InvalidKey(format!(
                    "WEP key length {} outside 1..={}",
                    key.len(),
                    WEP_KEY_MAX_LEN
                )));
            }
            Ok(item.clone())
        }
        KeyItem::Wep40 { key } => truncate_wep(key, WEP40_KEY_LEN),
        KeyItem::Wep104 { key } => truncate_wep(key, WEP104_KEY_LEN),
        KeyItem::WpaPassword { passphrase, ssid } => {
            let len = passphrase.len();
            if !(WPA_PASSPHRASE_MIN_LEN..=WPA_PASSPHRASE_MAX_LEN).contains(&len) {
                return Err(Error::InvalidKey(format!(
                    "passphrase length {} outside {}..={}",
                    len, WPA_PASSPHRASE_MIN_LEN, WPA_PASSPHRASE_MAX_LEN
                )));
            }
            // printable ASCII only
            if !passphrase.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
                return Err(Error::InvalidKey(
                    "passphrase must be printable ASCII".to_string(),
                ));
            }
            if ssid.len() > SSID_MAX_LEN {
                return Err(Error::InvalidKey(format!(
                    "SSID length {} exceeds {}",
                    ssid.len(),
                    SSID_MAX_LEN
                )));
            }
            Ok(item.clone())
        }
        KeyItem::WpaPsk { .. } | KeyItem::WpaPmk { .. } => Ok(item.clone()),
    }
}

fn truncate_wep(key: &[u8], len: usize) -> Result<KeyItem> {
    if key.len() < len {
        return Err(Error::InvalidKey(format!(
            "WEP key of {} bytes is shorter than {}",
            key.len(),
            len
        )));
    }
    Ok(KeyItem::Wep {
        key: key[..len].to_vec(),
    })
}

/// Validated key held by the collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Wep {
        key: Vec<u8>,
    },
    WpaPassword {
        passphrase: String,
        ssid: String,
        psk: [u8; 32],
    },
    WpaPsk {
        psk: [u8; 32],
    },
    WpaPmk {
        pmk: [u8; 32],
    },
}

impl Key {
    /// Build a key from an already validated item, deriving the PSK of passphrases
    fn from_validated(item: KeyItem) -> Self {
        match item {
            KeyItem::Wep { key } | KeyItem::Wep40 { key } | KeyItem::Wep104 { key } => {
                Key::Wep { key }
            }
            KeyItem::WpaPassword { passphrase, ssid } => {
                let psk = crypto::passphrase_to_psk(&passphrase, ssid.as_bytes());
                Key::WpaPassword {
                    passphrase,
                    ssid,
                    psk,
                }
            }
            KeyItem::WpaPsk { psk } => Key::WpaPsk { psk },
            KeyItem::WpaPmk { pmk } => Key::WpaPmk { pmk },
        }
    }

    /// WEP key bytes, for WEP keys
    pub fn wep_key(&self) -> Option<&[u8]> {
        match self {
            Key::Wep { key } => Some(key),
            _ => None,
        }
    }

    /// PMK, for every WPA key kind
    pub fn pmk(&self) -> Option<&[u8; 32]> {
        match self {
            Key::WpaPassword { psk, .. } | Key::WpaPsk { psk } => Some(psk),
            Key::WpaPmk { pmk } => Some(pmk),
            Key::Wep { .. } => None,
        }
    }

    pub fn is_wpa(&self) -> bool {
        self.pmk().is_some()
    }
}

impl From<&Key> for KeyItem {
    fn from(key: &Key) -> Self {
        match key {
            Key::Wep { key } => KeyItem::Wep { key: key.clone() },
            Key::WpaPassword {
                passphrase, ssid, ..
            } => KeyItem::WpaPassword {
                passphrase: passphrase.clone(),
                ssid: ssid.clone(),
            },
            Key::WpaPsk { psk } => KeyItem::WpaPsk { psk: *psk },
            Key::WpaPmk { pmk } => KeyItem::WpaPmk { pmk: *pmk },
        }
    }
}

/// Ordered, bounded collection of validated keys
///
/// Keys are shared with security associations through `Arc`, so an
/// association keeps the key it matched even after the collection is replaced.
#[derive(Debug)]
pub struct KeyCollection {
    keys: Vec<Arc<Key>>,
    capacity: usize,
}

impl KeyCollection {
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: Vec::new(),
            capacity,
        }
    }

    /// Replace the collection with the accepted subset of `items`
    ///
    /// Invalid items are skipped; the relative order of accepted items is kept.
    /// Passing more items than the capacity fails without touching the
    /// current collection.
    ///
    /// # Returns
    /// Number of accepted keys
    pub fn set_keys(&mut self, items: &[KeyItem]) -> Result<usize> {
        if items.len() > self.capacity {
            return Err(Error::WrongDataSize);
        }

        self.keys.clear();

        // PBKDF2 dominates here, derive passphrases in parallel
        let validated: Vec<Result<Key>> = items
            .par_iter()
            .map(|item| validate(item).map(Key::from_validated))
            .collect();

        for (index, result) in validated.into_iter().enumerate() {
            match result {
                Ok(key) => self.keys.push(Arc::new(key)),
                Err(e) => debug!(index, error = %e, "rejected key"),
            }
        }

        debug!(accepted = self.keys.len(), given = items.len(), "key collection set");
        Ok(self.keys.len())
    }

    /// Up to `max` keys, in collection order
    pub fn get_keys(&self, max: usize) -> Vec<KeyItem> {
        self.keys.iter().take(max).map(|k| KeyItem::from(k.as_ref())).collect()
    }

    /// Remove every key
    ///
    /// # Returns
    /// Number of keys removed
    pub fn clean(&mut self) -> usize {
        let removed = self.keys.len();
        self.keys.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Key>> {
        self.keys.iter()
    }

    pub fn wep_keys(&self) -> impl Iterator<Item = &Arc<Key>> {
        self.keys.iter().filter(|k| k.wep_key().is_some())
    }

    pub fn wpa_keys(&self) -> impl Iterator<Item = &Arc<Key>> {
        self.keys.iter().filter(|k| k.is_wpa())
    }
}

impl Default for KeyCollection {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_KEYS)
    }
}
