//! Error types for the composition engine
//!
//! Every failure of a composition call is returned as an explicit
//! `ComposeError` value. Nothing is retried inside the engine; callers use
//! [`ComposeError::is_retryable`] to decide whether re-fetching lookup tables
//! and composing again can succeed.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Comprehensive error type for all composition operations
///
/// Covers the whole pipeline:
/// - Envelope parsing (decompile)
/// - Lookup table resolution
/// - Instruction splicing
/// - Message compilation
/// - Budget validation
/// - Signature assembly
#[derive(Error, Debug)]
pub enum ComposeError {
    /// The envelope could not be parsed or is self-inconsistent
    ///
    /// Fatal for the input; retrying with the same bytes will fail again.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// An indirect reference names a lookup table that was not supplied
    #[error("Unknown lookup table: {table}")]
    UnknownTable {
        /// Address of the missing table
        table: Pubkey,
    },

    /// An indirect reference points past the end of its lookup table
    #[error("Lookup table index out of range (table={table}): index {index} >= {len}")]
    IndexOutOfRange {
        /// Address of the table
        table: Pubkey,
        /// Requested index
        index: u8,
        /// Number of entries in the table snapshot
        len: usize,
    },

    /// Serialized transaction is larger than the byte ceiling
    #[error("Transaction size exceeded: {actual} bytes > limit {limit}")]
    SizeExceeded {
        /// Configured ceiling in bytes
        limit: u64,
        /// Serialized size in bytes
        actual: u64,
    },

    /// Declared compute units exceed the compute ceiling
    #[error("Compute budget exceeded: {actual} units > limit {limit}")]
    ComputeExceeded {
        /// Configured ceiling in compute units
        limit: u64,
        /// Declared compute units
        actual: u64,
    },

    /// An address would be encoded twice in one message
    ///
    /// Compilation never produces this for a well-formed intermediate
    /// message; seeing it means the message was corrupted.
    #[error("Duplicate address conflict: {address} ({reason})")]
    DuplicateAddressConflict {
        /// The duplicated address
        address: Pubkey,
        /// Where the duplicate was detected
        reason: String,
    },

    /// The message has no writable signer at position 0 to pay fees
    #[error("Missing fee payer: {0}")]
    MissingFeePayer(String),

    /// More accounts than a u8 index can address
    #[error("Account index overflow: {count} accounts (max {max})")]
    AccountIndexOverflow {
        /// Number of accounts that would need an index
        count: usize,
        /// Maximum addressable accounts
        max: usize,
    },

    /// A length does not fit the compact-u16 encoding
    #[error("Encoding overflow ({what}): length {len}")]
    EncodingOverflow {
        /// The field being encoded
        what: &'static str,
        /// The offending length
        len: usize,
    },

    /// Insert position beyond the end of the instruction list
    #[error("Invalid insert position {position} (instruction count {len})")]
    InvalidInsertPosition {
        /// Requested position
        position: usize,
        /// Current number of instructions
        len: usize,
    },

    /// A required signer did not provide a signature
    #[error("Missing signature for required signer {0}")]
    MissingSignature(Pubkey),

    /// The lookup table collaborator failed to fetch a table
    #[error("Lookup table fetch failed (table={table}): {reason}")]
    TableFetch {
        /// Address of the table being fetched
        table: Pubkey,
        /// Underlying failure
        reason: String,
    },

    /// Configuration or validation error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Wrapped error from collaborators
    #[error("External error: {0}")]
    External(#[from] anyhow::Error),
}

impl ComposeError {
    /// Check if this error is potentially retryable
    ///
    /// Resolution failures can succeed after the caller re-fetches lookup
    /// tables. Budget violations need the caller to restructure the request,
    /// so they are not retryable as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UnknownTable { .. } => true,
            Self::IndexOutOfRange { .. } => true,
            Self::TableFetch { .. } => true,

            Self::MalformedEnvelope(_) => false,
            Self::SizeExceeded { .. } => false,
            Self::ComputeExceeded { .. } => false,
            Self::DuplicateAddressConflict { .. } => false,
            Self::MissingFeePayer(_) => false,
            Self::AccountIndexOverflow { .. } => false,
            Self::EncodingOverflow { .. } => false,
            Self::InvalidInsertPosition { .. } => false,
            Self::MissingSignature(_) => false,
            Self::Configuration(_) => false,
            Self::External(_) => false,
        }
    }

    /// Whether the caller can recover by removing or restructuring instructions
    pub fn is_budget_violation(&self) -> bool {
        matches!(
            self,
            Self::SizeExceeded { .. } | Self::ComputeExceeded { .. }
        )
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "malformed",
            Self::UnknownTable { .. } => "unknown_table",
            Self::IndexOutOfRange { .. } => "index_out_of_range",
            Self::SizeExceeded { .. } => "size",
            Self::ComputeExceeded { .. } => "compute",
            Self::DuplicateAddressConflict { .. } => "duplicate",
            Self::MissingFeePayer(_) => "fee_payer",
            Self::AccountIndexOverflow { .. } => "account_overflow",
            Self::EncodingOverflow { .. } => "encoding_overflow",
            Self::InvalidInsertPosition { .. } => "insert_position",
            Self::MissingSignature(_) => "signing",
            Self::TableFetch { .. } => "table_fetch",
            Self::Configuration(_) => "config",
            Self::External(_) => "external",
        }
    }
}

// Convenience constructors for common error scenarios
impl ComposeError {
    /// Create a malformed envelope error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope(reason.into())
    }

    /// Create a duplicate address error
    pub fn duplicate(address: Pubkey, reason: impl Into<String>) -> Self {
        Self::DuplicateAddressConflict {
            address,
            reason: reason.into(),
        }
    }

    /// Create a lookup table fetch error
    pub fn fetch_failed(table: Pubkey, reason: impl Into<String>) -> Self {
        Self::TableFetch {
            table,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
}
