//! Core data model of the composition engine
//!
//! The intermediate [`Message`] is a plain value: decompile produces it,
//! the splicer consumes and returns it, compile borrows it. Nothing here is
//! shared between composition calls.

use solana_sdk::{hash::Hash, pubkey::Pubkey};
use std::collections::HashMap;

/// Signer/readonly partition counts, as written on the wire
pub use solana_sdk::message::MessageHeader;
/// Lookup-table section entry: which table indexes load writable / readonly
pub use solana_sdk::message::v0::MessageAddressTableLookup as AddressTableLookup;

/// A 32-byte account address
pub type Address = Pubkey;

/// Maximum number of table entries addressable with a u8 index
pub const MAX_TABLE_INDEX_SPACE: usize = 256;

/// Reference to an account from inside an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountRef {
    /// Address written inline
    Direct {
        address: Address,
        writable: bool,
        signer: bool,
    },
    /// Address loaded from a lookup table
    Indirect {
        table: Address,
        index: u8,
        writable: bool,
    },
}

impl AccountRef {
    /// Writable, non-signer direct reference
    pub fn writable(address: Address) -> Self {
        Self::Direct {
            address,
            writable: true,
            signer: false,
        }
    }

    /// Read-only, non-signer direct reference
    pub fn readonly(address: Address) -> Self {
        Self::Direct {
            address,
            writable: false,
            signer: false,
        }
    }

    /// Signer direct reference
    pub fn signer(address: Address, writable: bool) -> Self {
        Self::Direct {
            address,
            writable,
            signer: true,
        }
    }

    pub fn is_writable(&self) -> bool {
        match self {
            Self::Direct { writable, .. } | Self::Indirect { writable, .. } => *writable,
        }
    }

    /// Looked-up accounts can never sign
    pub fn is_signer(&self) -> bool {
        match self {
            Self::Direct { signer, .. } => *signer,
            Self::Indirect { .. } => false,
        }
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self, Self::Indirect { .. })
    }
}

/// Read-only snapshot of an on-chain address lookup table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable {
    pub address: Address,
    pub entries: Vec<Address>,
}

impl LookupTable {
    pub fn new(address: Address, entries: Vec<Address>) -> Self {
        Self { address, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: u8) -> Option<&Address> {
        self.entries.get(usize::from(index))
    }

    /// Lowest u8-addressable index holding `address`
    pub fn position(&self, address: &Address) -> Option<u8> {
        self.entries
            .iter()
            .take(MAX_TABLE_INDEX_SPACE)
            .position(|entry| entry == address)
            .and_then(|idx| u8::try_from(idx).ok())
    }
}

/// Ordered collection of lookup table snapshots keyed by table address
///
/// Insertion order is the candidate order used by compilation. A second
/// table with an address already present is ignored so that lookups by
/// address and iteration order never disagree.
#[derive(Debug, Clone, Default)]
pub struct TableSet {
    tables: Vec<LookupTable>,
    by_address: HashMap<Address, usize>,
}

impl TableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table; returns `false` if a table with that address already exists
    pub fn insert(&mut self, table: LookupTable) -> bool {
        if self.by_address.contains_key(&table.address) {
            tracing::debug!(table = %table.address, "Ignoring duplicate lookup table snapshot");
            return false;
        }
        self.by_address.insert(table.address, self.tables.len());
        self.tables.push(table);
        true
    }

    pub fn get(&self, address: &Address) -> Option<&LookupTable> {
        self.by_address.get(address).map(|&idx| &self.tables[idx])
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.by_address.contains_key(address)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LookupTable> {
        self.tables.iter()
    }

    pub fn as_slice(&self) -> &[LookupTable] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl FromIterator<LookupTable> for TableSet {
    fn from_iter<I: IntoIterator<Item = LookupTable>>(iter: I) -> Self {
        let mut set = TableSet::new();
        for table in iter {
            set.insert(table);
        }
        set
    }
}

impl<'a> IntoIterator for &'a TableSet {
    type Item = &'a LookupTable;
    type IntoIter = std::slice::Iter<'a, LookupTable>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.iter()
    }
}

/// Caller-supplied instruction to splice into a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Address,
    /// Positional: the target program reads accounts in this order
    pub accounts: Vec<AccountRef>,
    pub data: Vec<u8>,
}

impl Instruction {
    pub fn new(program_id: Address, accounts: Vec<AccountRef>, data: Vec<u8>) -> Self {
        Self {
            program_id,
            accounts,
            data,
        }
    }
}

/// One deduplicated entry of the intermediate account list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountEntry {
    pub address: Address,
    pub writable: bool,
    pub signer: bool,
}

impl AccountEntry {
    pub fn new(address: Address, writable: bool, signer: bool) -> Self {
        Self {
            address,
            writable,
            signer,
        }
    }

    /// Ordering class: writable signers, readonly signers, writable
    /// non-signers, readonly non-signers
    pub fn class(&self) -> u8 {
        match (self.signer, self.writable) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        }
    }
}

/// Instruction inside the intermediate message, referencing account list positions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInstruction {
    pub program_index: usize,
    pub accounts: Vec<usize>,
    pub data: Vec<u8>,
}

/// Instruction view with every account position replaced by its entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstruction {
    pub program_id: Address,
    pub accounts: Vec<AccountEntry>,
    pub data: Vec<u8>,
}

/// Editable intermediate form of a transaction message
///
/// `header` describes `account_list` (signer counts are exact, the readonly
/// unsigned count covers static and looked-up accounts alike) and is kept in
/// sync by every mutation. `address_table_lookups` records the lookups of the
/// envelope this message was decompiled from; compilation recomputes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub recent_blockhash: Hash,
    pub account_list: Vec<AccountEntry>,
    pub instructions: Vec<MessageInstruction>,
    pub address_table_lookups: Vec<AddressTableLookup>,
}

impl Message {
    /// Empty message whose fee payer is `payer`
    pub fn new(payer: Address, recent_blockhash: Hash) -> Self {
        let mut message = Self {
            header: MessageHeader::default(),
            recent_blockhash,
            account_list: vec![AccountEntry::new(payer, true, true)],
            instructions: Vec::new(),
            address_table_lookups: Vec::new(),
        };
        message.refresh_header();
        message
    }

    /// Fee payer: the first account, if it is a writable signer
    pub fn fee_payer(&self) -> Option<&Address> {
        self.account_list
            .first()
            .filter(|entry| entry.signer && entry.writable)
            .map(|entry| &entry.address)
    }

    pub fn position_of(&self, address: &Address) -> Option<usize> {
        self.account_list
            .iter()
            .position(|entry| &entry.address == address)
    }

    pub fn entry(&self, address: &Address) -> Option<&AccountEntry> {
        self.account_list
            .iter()
            .find(|entry| &entry.address == address)
    }

    /// Addresses invoked as programs by at least one instruction
    pub fn program_ids(&self) -> Vec<Address> {
        let mut ids: Vec<Address> = Vec::new();
        for ix in &self.instructions {
            if let Some(entry) = self.account_list.get(ix.program_index) {
                if !ids.contains(&entry.address) {
                    ids.push(entry.address);
                }
            }
        }
        ids
    }

    /// Recompute `header` from the account list flags
    pub fn refresh_header(&mut self) {
        let mut signers = 0usize;
        let mut readonly_signed = 0usize;
        let mut readonly_unsigned = 0usize;
        for entry in &self.account_list {
            match (entry.signer, entry.writable) {
                (true, true) => signers += 1,
                (true, false) => {
                    signers += 1;
                    readonly_signed += 1;
                }
                (false, false) => readonly_unsigned += 1,
                (false, true) => {}
            }
        }
        // Saturate: oversize lists are rejected by compile with a precise error
        self.header = MessageHeader {
            num_required_signatures: u8::try_from(signers).unwrap_or(u8::MAX),
            num_readonly_signed_accounts: u8::try_from(readonly_signed).unwrap_or(u8::MAX),
            num_readonly_unsigned_accounts: u8::try_from(readonly_unsigned).unwrap_or(u8::MAX),
        };
    }

    /// Instructions with account positions replaced by account entries
    ///
    /// Positions outside the account list are skipped; decompile and the
    /// splicer never produce them.
    pub fn resolved_instructions(&self) -> Vec<ResolvedInstruction> {
        self.instructions
            .iter()
            .filter_map(|ix| {
                let program = self.account_list.get(ix.program_index)?;
                Some(ResolvedInstruction {
                    program_id: program.address,
                    accounts: ix
                        .accounts
                        .iter()
                        .filter_map(|&pos| self.account_list.get(pos).copied())
                        .collect(),
                    data: ix.data.clone(),
                })
            })
            .collect()
    }

    /// Same blockhash, same accounts with the same flags, same instruction
    /// semantics; account positions may differ.
    pub fn is_equivalent(&self, other: &Message) -> bool {
        if self.recent_blockhash != other.recent_blockhash
            || self.account_list.len() != other.account_list.len()
            || self.fee_payer() != other.fee_payer()
        {
            return false;
        }
        let flags: HashMap<Address, (bool, bool)> = self
            .account_list
            .iter()
            .map(|e| (e.address, (e.writable, e.signer)))
            .collect();
        let same_accounts = other
            .account_list
            .iter()
            .all(|e| flags.get(&e.address) == Some(&(e.writable, e.signer)));
        same_accounts && self.resolved_instructions() == other.resolved_instructions()
    }
}
