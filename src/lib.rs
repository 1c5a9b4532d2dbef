//! WEP/WPA/WPA2 802.11 frame decryption engine
//!
//! Feed captured frames to a [`Context`] holding candidate keys: 4-way
//! handshakes are tracked from cleartext EAPOL-Key frames, and protected data
//! frames are decrypted with WEP, TKIP or CCMP.

pub mod config;
pub mod core;

pub use crate::config::EngineConfig;
pub use crate::core::{
    Context, Error, HandshakeStage, KeyItem, Outcome, ProcessOptions, Result, SaId,
    SecurityAssociation, SharedContext,
};
