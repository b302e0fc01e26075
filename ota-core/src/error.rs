// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Tagged error types shared across the flash, metadata, manager, and sink
//! layers. No layer panics on caller-supplied input; everything is a
//! `Result`.

/// Result of a flash operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    InvalidParam,
    NotAligned,
    OutOfRange,
    VerifyFailed,
    CrcMismatch,
    Timeout,
}

impl FlashError {
    /// Human-readable name, for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            FlashError::InvalidParam => "invalid parameter",
            FlashError::NotAligned => "not aligned",
            FlashError::OutOfRange => "out of range",
            FlashError::VerifyFailed => "verify failed",
            FlashError::CrcMismatch => "CRC mismatch",
            FlashError::Timeout => "timeout",
        }
    }
}

impl core::fmt::Display for FlashError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FlashError {}

/// Errors from the metadata store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MetadataError {
    /// Neither sector held a valid record and the factory-default write failed.
    Flash(FlashError),
    /// Re-read after a write did not validate; the RAM cache was left unchanged.
    VerifyFailed,
    /// `trigger_rollback` was called but the opposite bank is not valid.
    RollbackUnavailable,
}

impl From<FlashError> for MetadataError {
    fn from(e: FlashError) -> Self {
        MetadataError::Flash(e)
    }
}

impl core::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MetadataError::Flash(e) => write!(f, "metadata flash error: {e}"),
            MetadataError::VerifyFailed => f.write_str("metadata write did not verify"),
            MetadataError::RollbackUnavailable => {
                f.write_str("rollback unavailable: opposite bank is not valid")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MetadataError {}

/// Errors from the firmware manager's state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ManagerError {
    /// Called from a state that does not allow the requested operation.
    WrongState,
    ExpectedSizeTooLarge,
    WriteWouldOverflow,
    SizeMismatch,
    CrcMismatch,
    Flash(FlashError),
    Metadata(MetadataError),
}

impl From<FlashError> for ManagerError {
    fn from(e: FlashError) -> Self {
        ManagerError::Flash(e)
    }
}

impl From<MetadataError> for ManagerError {
    fn from(e: MetadataError) -> Self {
        ManagerError::Metadata(e)
    }
}

impl core::fmt::Display for ManagerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ManagerError::WrongState => f.write_str("operation not valid in current state"),
            ManagerError::ExpectedSizeTooLarge => f.write_str("expected size exceeds bank size"),
            ManagerError::WriteWouldOverflow => f.write_str("write would exceed expected size"),
            ManagerError::SizeMismatch => f.write_str("received size does not match expected size"),
            ManagerError::CrcMismatch => f.write_str("image CRC32 does not match expected value"),
            ManagerError::Flash(e) => write!(f, "manager flash error: {e}"),
            ManagerError::Metadata(e) => write!(f, "manager metadata error: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ManagerError {}

/// Errors from the download/upload sink layer.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SinkError {
    /// URL did not parse as `http://host[:port]/path`.
    BadUrl,
    /// Collaborator (DNS/TCP) reported a failure.
    Connection,
    /// The HTTP response could not be parsed (status line, headers).
    BadResponse,
    /// The response had no usable `Content-Length`.
    MissingContentLength,
    Manager(ManagerError),
}

impl From<ManagerError> for SinkError {
    fn from(e: ManagerError) -> Self {
        SinkError::Manager(e)
    }
}

impl core::fmt::Display for SinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SinkError::BadUrl => f.write_str("malformed or unsupported URL"),
            SinkError::Connection => f.write_str("connection error"),
            SinkError::BadResponse => f.write_str("malformed HTTP response"),
            SinkError::MissingContentLength => f.write_str("missing Content-Length header"),
            SinkError::Manager(e) => write!(f, "sink manager error: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SinkError {}
