//! Versioned transaction composition
//!
//! Takes an already-built message (typically from a swap router), merges
//! caller instructions into it and recompiles it against lookup tables so
//! the result still fits the runtime's size and compute ceilings.
//!
//! ## Pipeline
//!
//! 1. [`decompile`]: wire bytes + resolved tables → intermediate [`Message`]
//! 2. [`append`] / [`insert_at`]: splice instructions, widening account flags
//! 3. [`compile`]: re-choose lookups and emit canonical v0 bytes
//! 4. [`BudgetLimits::validate`]: size and compute ceilings
//!
//! [`Composer::compose`] runs all four for a [`ComposeRequest`].
//!
//! ## Modules
//!
//! - `types`: engine data model (accounts, tables, intermediate message)
//! - `wire`: compact-u16 codec and the raw message layout
//! - `resolver`: table lookups in both directions
//! - `decompile` / `splice` / `compile`: the transform itself
//! - `budget`: admission control
//! - `envelope`: input envelopes, composed output, signature assembly
//! - `orchestrator`: the staged pipeline with logging and metrics
//! - `errors`: `ComposeError`

pub mod budget;
pub mod compile;
pub mod decompile;
pub mod envelope;
pub mod errors;
pub mod orchestrator;
pub mod resolver;
pub mod splice;
pub mod types;
pub mod wire;

pub use budget::{
    declared_compute_units, validate, BudgetLimits, BudgetReport, Violation, ViolationKind,
    DEFAULT_INSTRUCTION_COMPUTE_UNITS, MAX_COMPUTE_UNITS, MAX_TX_BYTES,
};
pub use compile::{compile, CompiledMessage, MAX_ACCOUNTS};
pub use decompile::{decompile, decompile_raw, decompile_transaction, referenced_tables};
pub use envelope::{ComposedEnvelope, Envelope, EnvelopeSigner};
pub use errors::ComposeError;
pub use orchestrator::{ComposeRequest, Composer, Rejection, Splice, Stage};
pub use resolver::{choose_encoding, resolve, resolve_index};
pub use splice::{append, append_all, insert_at, set_fee_payer};
pub use types::{
    AccountEntry, AccountRef, Address, AddressTableLookup, Instruction, LookupTable, Message,
    MessageHeader, MessageInstruction, ResolvedInstruction, TableSet,
};
pub use wire::{MessageVersion, RawMessage};
