//! Compatibility layer for Solana SDK types
//!
//! Conversions between the engine's pure types and their `solana-sdk`
//! counterparts, so callers can hand over instructions built with SDK
//! helpers (system transfers, compute budget, program clients) and lookup
//! tables fetched as `AddressLookupTableAccount`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use solana_sdk::system_instruction;
//! use txcompose::composer::{ComposeRequest, Instruction};
//!
//! let transfer = system_instruction::transfer(&sender, &recipient, lamports);
//! let request = ComposeRequest::new(envelope, tables).append(Instruction::from(transfer));
//! ```

use crate::composer::{
    decompile_raw, AccountRef, ComposeError, Instruction, LookupTable, Message, RawMessage,
    TableSet,
};
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    instruction::{AccountMeta, Instruction as SdkInstruction},
    message::{MessageHeader, VersionedMessage},
    pubkey::Pubkey,
};

impl From<&AccountMeta> for AccountRef {
    fn from(meta: &AccountMeta) -> Self {
        AccountRef::Direct {
            address: meta.pubkey,
            writable: meta.is_writable,
            signer: meta.is_signer,
        }
    }
}

impl From<&SdkInstruction> for Instruction {
    fn from(ix: &SdkInstruction) -> Self {
        Instruction::new(
            ix.program_id,
            ix.accounts.iter().map(AccountRef::from).collect(),
            ix.data.clone(),
        )
    }
}

impl From<SdkInstruction> for Instruction {
    fn from(ix: SdkInstruction) -> Self {
        Instruction::new(
            ix.program_id,
            ix.accounts.iter().map(AccountRef::from).collect(),
            ix.data,
        )
    }
}

impl From<AddressLookupTableAccount> for LookupTable {
    fn from(account: AddressLookupTableAccount) -> Self {
        LookupTable::new(account.key, account.addresses)
    }
}

impl From<&AddressLookupTableAccount> for LookupTable {
    fn from(account: &AddressLookupTableAccount) -> Self {
        LookupTable::new(account.key, account.addresses.clone())
    }
}

impl From<&LookupTable> for AddressLookupTableAccount {
    fn from(table: &LookupTable) -> Self {
        AddressLookupTableAccount {
            key: table.address,
            addresses: table.entries.clone(),
        }
    }
}

/// Build a [`TableSet`] from SDK lookup table accounts, keeping their order
///
/// The order becomes the candidate order used during compilation.
pub fn table_set(accounts: &[AddressLookupTableAccount]) -> TableSet {
    accounts.iter().map(LookupTable::from).collect()
}

/// Get the message header from a `VersionedMessage`.
///
/// This works uniformly for both Legacy and V0 message formats.
#[inline]
#[must_use]
pub fn get_message_header(message: &VersionedMessage) -> &MessageHeader {
    match message {
        VersionedMessage::Legacy(legacy_msg) => &legacy_msg.header,
        VersionedMessage::V0(v0_msg) => &v0_msg.header,
    }
}

/// Get the required signers from a `VersionedMessage`.
///
/// Signers are always the first `num_required_signatures` static keys.
#[inline]
#[must_use]
pub fn get_required_signers(message: &VersionedMessage) -> &[Pubkey] {
    let keys = message.static_account_keys();
    let count = usize::from(get_message_header(message).num_required_signatures).min(keys.len());
    &keys[..count]
}

/// Decompile an SDK message into the engine's intermediate form
///
/// # Errors
///
/// Same as [`crate::composer::decompile`]: unresolvable lookups or an
/// inconsistent message.
pub fn message_from_versioned(
    message: &VersionedMessage,
    tables: &TableSet,
) -> Result<Message, ComposeError> {
    decompile_raw(RawMessage::from(message.clone()), tables)
}
