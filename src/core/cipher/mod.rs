//! Data frame cipher pipelines: WEP (RC4), TKIP and CCMP (AES-CCM).

pub mod ccmp;
pub mod rc4;
pub mod tkip;
pub mod wep;
