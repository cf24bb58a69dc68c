#![forbid(unsafe_code)]
//! Error types for FlashJrnl.
//!
//! Defines `JrnlError` and a `Result<T>` alias used throughout the workspace.
//! Every journal API reports failure through this enum; nothing is signalled
//! out of band and nothing is retried below the caller.

use thiserror::Error;

/// Unified error type for all FlashJrnl operations.
#[derive(Debug, Error)]
pub enum JrnlError {
    /// Empty buffers, misaligned lengths, out-of-range sectors or handles.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted in a transaction state that disallows it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Handle points at an unallocated registry slot.
    #[error("handle not mounted")]
    NotFound,

    /// Registry full, or the store cannot fit the requested operation.
    #[error("no space: {0}")]
    NoMemory(String),

    /// Replay found a corrupted operation header or payload (torn write
    /// before the commit completed).
    #[error("checksum mismatch at store sector {sector}: {detail}")]
    InvalidChecksum { sector: u32, detail: String },

    /// A master record exists on disk but disagrees with the mount
    /// configuration.
    #[error("inconsistent on-disk state: {0}")]
    Inconsistent(String),

    /// Forwarded from the underlying block device.
    #[error("device error: {0}")]
    Device(#[from] std::io::Error),

    /// A harness-armed power-cut point fired; disk state is exactly what a
    /// real power loss at that point would leave behind.
    #[error("power cut injected at {point}")]
    PowerCut { point: &'static str },
}

/// Result alias using `JrnlError`.
pub type Result<T> = std::result::Result<T, JrnlError>;
