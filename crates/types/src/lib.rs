//! # TxFlow Types
//!
//! Core type definitions shared by the TxFlow eventpool, state store and node.
//!
//! This crate provides:
//! - [`Entry`] - an immutable opaque payload submitted for inclusion in a block
//! - [`EntryInfo`] and [`PeerId`] - submission metadata
//! - [`Fingerprint`] - the dedup key derived from an entry payload
//! - [`EntryCodec`] - the length-prefixed wire envelope used for size accounting
//! - Application request/response values exchanged with the validation service
//!
//! ## Example
//!
//! ```rust
//! use txflow_types::{Entry, EntryCodec, Fingerprint};
//!
//! let entry = Entry::from(&b"hello"[..]);
//! assert_eq!(entry.size(), 5);
//! assert_eq!(entry.fingerprint(), Fingerprint::of(b"hello"));
//!
//! let codec = EntryCodec::default();
//! assert_eq!(codec.max_entry_size(), 1_048_568);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod app;
pub mod codec;
pub mod entry;
pub mod fingerprint;

pub use app::{
    CheckEntryRequest, CheckEntryResponse, CheckKind, CommitResponse, DeliverEntryResponse,
    ExecutionResults, CODE_OK,
};
pub use codec::{EntryCodec, DEFAULT_MAX_MSG_SIZE};
pub use entry::{Entry, EntryInfo, PeerId};
pub use fingerprint::{Fingerprint, FINGERPRINT_SIZE};

/// Result type alias for TxFlow types operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with TxFlow types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Encoded message exceeds the maximum wire message size
    #[error("message too large: max {max} bytes, got {actual} bytes")]
    MessageTooLarge {
        /// Maximum message size
        max: usize,
        /// Actual encoded size
        actual: usize,
    },

    /// Malformed wire envelope
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}
