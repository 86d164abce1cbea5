//! Status codes written into completion entries, and the boundary error type
//! used by the host-memory / backing-store collaborators.
//!
//! `StatusCode` is not a Rust error type in the usual sense: it is a wire
//! value, and every handler in this crate treats "locked" or "bad queue id"
//! as an ordinary, expected outcome rather than something to propagate with
//! `?`. `HostError` is the real error type, reserved for the external
//! collaborators (host memory access, backing-file I/O) that this crate
//! does not implement itself.

use std::fmt;

/// Status code class (`sct` field of the completion status).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Generic,
    CommandSpecific,
    MediaError,
    VendorSpecific,
}

/// NVMe admin completion status codes relevant to this controller.
///
/// Values are whatever the embedding framework chooses to put on the wire;
/// this crate only needs them to be distinct and to carry a status class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    InvalidOpcode,
    InvalidField,
    InvalidNamespace,
    CmdSeqError,
    DataXferError,
    AbortReq,
    Internal,

    InvalidQueueIdentifier,
    CompletionQueueInvalid,
    MaxQueueSizeExceeded,
    InvalidInterruptVector,
    ReqCmdToAbortNotFound,
    AsyncEventLimitExceeded,
    InvalidFormat,
    InvalidLogPage,

    InvalidProtectionDomainIdentifier,
    InvalidStag,
    InvalidNamespaceTag,
    InvalidNamespaceSize,
    InvalidNamespaceCapacity,
    InvalidE2eDataProtectionConfiguration,
}

impl StatusCode {
    pub fn class(self) -> StatusClass {
        use StatusCode::*;
        match self {
            Success | InvalidOpcode | InvalidField | InvalidNamespace | CmdSeqError
            | DataXferError | AbortReq | Internal => StatusClass::Generic,
            InvalidQueueIdentifier
            | CompletionQueueInvalid
            | MaxQueueSizeExceeded
            | InvalidInterruptVector
            | ReqCmdToAbortNotFound
            | AsyncEventLimitExceeded
            | InvalidFormat
            | InvalidLogPage => StatusClass::CommandSpecific,
            InvalidProtectionDomainIdentifier
            | InvalidStag
            | InvalidNamespaceTag
            | InvalidNamespaceSize
            | InvalidNamespaceCapacity
            | InvalidE2eDataProtectionConfiguration => StatusClass::VendorSpecific,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors surfaced by the external collaborators: host-memory DMA and the
/// per-namespace/firmware backing store. Handlers catch these and fold them
/// into a `StatusCode` (usually `Internal` or `DataXferError`) rather than
/// letting them escape to the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host memory access out of bounds: addr={addr:#x} len={len}")]
    OutOfBounds { addr: u64, len: usize },

    #[error("backing store I/O failed for namespace {nsid}: {source}")]
    Io {
        nsid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("backing store not open for namespace {0}")]
    NotOpen(u32),

    #[error("firmware image I/O failed: {0}")]
    Firmware(std::io::Error),
}
