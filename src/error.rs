//! Error kinds shared by every module.
//!
//! Network-layer errors (`Decrypt`, `CertCorrupt`, `MalformedPacket`, ...) are
//! meant to be logged and dropped by callers, not propagated out of the event
//! loop. `Transport` and `TableFull` are the two kinds that user-initiated
//! operations are expected to surface.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("transport send failed: {0}")]
    Transport(String),

    #[error("decryption failed")]
    Decrypt,

    #[error("certificate failed integrity verification")]
    CertCorrupt,

    #[error("invite cert signed by an unknown inviter")]
    UnknownInviter,

    #[error("peer is not authorized to issue this certificate")]
    Unauthorized,

    #[error("peer is banned from this chat")]
    Banned,

    #[error("update timestamp is older than the local high-watermark")]
    StaleTimestamp,

    #[error("table is at capacity")]
    TableFull,

    #[error("packet is malformed: {0}")]
    MalformedPacket(&'static str),

    #[error("payload exceeds the maximum allowed length")]
    LengthOverflow,
}

pub type Result<T> = std::result::Result<T, Error>;
