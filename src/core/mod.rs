// Core library modules
pub mod capture;
pub mod cipher;
pub mod context;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod keys;
pub mod store;

// Re-exports
pub use capture::{decrypt_capture, read_capture, read_capture_file, Capture, DecryptedRecord, Summary};
pub use context::{Context, Outcome, ProcessOptions, SharedContext};
pub use crypto::{derive_ptk, mic_check, passphrase_to_psk, Ptk};
pub use error::{Error, Result};
pub use keys::{Key, KeyCollection, KeyItem};
pub use store::{HandshakeStage, SaId, SaStore, SecurityAssociation};
