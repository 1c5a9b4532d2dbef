/*!
 * Error kinds reported by the decryption engine
 *
 * Every processing path ends in either a successful outcome or exactly one of
 * these kinds. All of them are recoverable: the caller may try another key or
 * pass the frame through unmodified, and the engine state stays usable.
 */

use thiserror::Error;

/// Errors returned by the decryption engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Frame is not an 802.11 data frame
    #[error("frame is not a data frame")]
    NotData,

    /// Input buffer is empty or a length field is inconsistent
    #[error("wrong data size")]
    WrongDataSize,

    /// Frame is shorter than its header plus the minimum protected payload
    #[error("frame too short")]
    TooShort,

    /// An address, key or handshake result needed to continue is not available
    #[error("required data missing")]
    RequiredDataMissing,

    /// EAPOL-Key frame is not a usable pairwise 4-way handshake message
    #[error("no valid handshake")]
    NoValidHandshake,

    /// Frame is cleartext and carries nothing for the handshake tracker
    #[error("no encrypted data")]
    NoDataEncrypted,

    /// Generic decrypt or validation failure
    #[error("unsuccessful")]
    Unsuccessful,

    /// WEP/TKIP integrity check value did not match
    #[error("ICV mismatch")]
    IcvMismatch,

    /// CCMP message integrity code did not match
    #[error("MIC mismatch")]
    MicMismatch,

    /// No free security association slot left
    #[error("security association store is full")]
    StoreFull,

    /// Key rejected during validation
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl Error {
    /// Stable snake_case name of the kind, for summaries and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotData => "not_data",
            Error::WrongDataSize => "wrong_data_size",
            Error::TooShort => "too_short",
            Error::RequiredDataMissing => "required_data_missing",
            Error::NoValidHandshake => "no_valid_handshake",
            Error::NoDataEncrypted => "no_data_encrypted",
            Error::Unsuccessful => "unsuccessful",
            Error::IcvMismatch => "icv_mismatch",
            Error::MicMismatch => "mic_mismatch",
            Error::StoreFull => "store_full",
            Error::InvalidKey(_) => "invalid_key",
        }
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, Error>;
