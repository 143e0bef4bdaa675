//! txcompose - Versioned Transaction Composition Engine
//!
//! This library exposes the composition engine and its collaborators.

pub mod compat;
pub mod composer;
pub mod config;
pub mod lookup_tables;
pub mod metrics;
pub mod structured_logging;

// Re-export commonly used types
pub use composer::{ComposeError, ComposeRequest, ComposedEnvelope, Composer, Envelope};
pub use solana_sdk::{message::VersionedMessage, pubkey::Pubkey, signature::Signature};
