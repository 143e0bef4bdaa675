//! Message compilation: intermediate [`Message`] + candidate tables → v0 wire bytes
//!
//! ## Algorithm
//!
//! 1. Fee payer first, then the four ordering classes (writable signers,
//!    readonly signers, writable non-signers, readonly non-signers), each
//!    keeping account-list order.
//! 2. Every address that may be looked up (not a signer, not the payer, not
//!    an invoked program) is offered to [`choose_encoding`] over the
//!    candidate tables. A table is only kept if the static bytes it removes
//!    outweigh its own lookup entry; a rejected table is withdrawn and the
//!    assignment is recomputed over the remaining candidates.
//! 3. Instruction account positions are renumbered: static keys, then
//!    writable looked-up addresses per table, then readonly ones per table.
//! 4. The layout is emitted as an SDK `v0::Message` and serialized as a
//!    `VersionedMessage`.

use crate::composer::errors::ComposeError;
use crate::composer::resolver::choose_encoding;
use crate::composer::types::{
    AccountRef, Address, AddressTableLookup, LookupTable, Message, MessageHeader,
};
use crate::composer::wire::{check_short_vec_len, serialize_message};
use solana_sdk::{
    instruction::CompiledInstruction,
    message::{v0, VersionedMessage},
};
use std::collections::{HashMap, HashSet};

const ADDRESS_LEN: usize = 32;

/// Maximum accounts a message can address with u8 indexes
pub const MAX_ACCOUNTS: usize = 256;

/// Compiled message bytes together with the layout they encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMessage {
    pub bytes: Vec<u8>,
    pub header: MessageHeader,
    pub static_keys: Vec<Address>,
    pub address_table_lookups: Vec<AddressTableLookup>,
}

impl CompiledMessage {
    /// Addresses whose signatures the transaction needs, in signature order
    pub fn required_signers(&self) -> &[Address] {
        let count = usize::from(self.header.num_required_signatures).min(self.static_keys.len());
        &self.static_keys[..count]
    }

    /// Number of addresses loaded through lookup tables
    pub fn loaded_address_count(&self) -> usize {
        self.address_table_lookups
            .iter()
            .map(|l| l.writable_indexes.len() + l.readonly_indexes.len())
            .sum()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Compile `message` into v0 wire format using `candidate_tables` in order
///
/// # Errors
///
/// - `MissingFeePayer` if the first account is not a writable signer
/// - `DuplicateAddressConflict` if the account list is not deduplicated
/// - `AccountIndexOverflow` if more than 256 accounts must be addressed
/// - `EncodingOverflow` if a section length exceeds compact-u16
/// - `MalformedEnvelope` if an instruction refers past the account list
pub fn compile(
    message: &Message,
    candidate_tables: &[LookupTable],
) -> Result<CompiledMessage, ComposeError> {
    message.fee_payer().ok_or_else(|| {
        ComposeError::MissingFeePayer(match message.account_list.first() {
            Some(entry) => format!("first account {} is not a writable signer", entry.address),
            None => "message has no accounts".to_string(),
        })
    })?;

    let accounts = &message.account_list;
    let mut seen = HashSet::with_capacity(accounts.len());
    for entry in accounts {
        if !seen.insert(entry.address) {
            return Err(ComposeError::duplicate(entry.address, "account list"));
        }
    }

    check_short_vec_len(message.instructions.len(), "instructions")?;
    for (pos, ix) in message.instructions.iter().enumerate() {
        let in_range = ix.program_index < accounts.len()
            && ix.accounts.iter().all(|&idx| idx < accounts.len());
        if !in_range {
            return Err(ComposeError::malformed(format!(
                "instruction {pos} references a position beyond {} accounts",
                accounts.len()
            )));
        }
        check_short_vec_len(ix.accounts.len(), "instruction accounts")?;
        check_short_vec_len(ix.data.len(), "instruction data")?;
    }

    // Candidate order is significant; later copies of a table are ignored
    let mut table_pos: HashMap<Address, usize> = HashMap::new();
    let mut candidates: Vec<&LookupTable> = Vec::with_capacity(candidate_tables.len());
    for table in candidate_tables {
        if !table_pos.contains_key(&table.address) {
            table_pos.insert(table.address, candidates.len());
            candidates.push(table);
        }
    }

    let programs: HashSet<Address> = message.program_ids().into_iter().collect();
    let assignment = assign_lookups(message, &candidates, &table_pos, &programs);

    // Static section: payer first, then class order, stable within a class
    let mut static_positions: Vec<usize> = (0..accounts.len())
        .filter(|&i| assignment[i].is_none())
        .collect();
    static_positions.sort_by_key(|&i| (i != 0, accounts[i].class()));

    let mut per_table: Vec<(Vec<usize>, Vec<usize>)> =
        vec![(Vec::new(), Vec::new()); candidates.len()];
    for (i, slot) in assignment.iter().enumerate() {
        if let Some((t, _)) = slot {
            if accounts[i].writable {
                per_table[*t].0.push(i);
            } else {
                per_table[*t].1.push(i);
            }
        }
    }

    let mut new_index = vec![0usize; accounts.len()];
    for (n, &i) in static_positions.iter().enumerate() {
        new_index[i] = n;
    }
    let mut next = static_positions.len();
    for (writable, _) in &per_table {
        for &i in writable {
            new_index[i] = next;
            next += 1;
        }
    }
    for (_, readonly) in &per_table {
        for &i in readonly {
            new_index[i] = next;
            next += 1;
        }
    }
    if next > MAX_ACCOUNTS {
        return Err(ComposeError::AccountIndexOverflow {
            count: next,
            max: MAX_ACCOUNTS,
        });
    }

    let mut used_pairs: HashSet<(Address, u8)> = HashSet::new();
    let mut lookups = Vec::new();
    for (t, (writable, readonly)) in per_table.iter().enumerate() {
        if writable.is_empty() && readonly.is_empty() {
            continue;
        }
        let key = candidates[t].address;
        let mut indexes_of = |positions: &[usize]| -> Result<Vec<u8>, ComposeError> {
            positions
                .iter()
                .map(|&i| {
                    let (_, index) = assignment[i].ok_or_else(|| {
                        ComposeError::duplicate(accounts[i].address, "lookup assignment lost")
                    })?;
                    if !used_pairs.insert((key, index)) {
                        return Err(ComposeError::duplicate(
                            accounts[i].address,
                            format!("table {key} index {index} referenced twice"),
                        ));
                    }
                    Ok(index)
                })
                .collect()
        };
        let writable_indexes = indexes_of(writable)?;
        let readonly_indexes = indexes_of(readonly)?;
        lookups.push(AddressTableLookup {
            account_key: key,
            writable_indexes,
            readonly_indexes,
        });
    }

    let static_keys: Vec<Address> = static_positions
        .iter()
        .map(|&i| accounts[i].address)
        .collect();
    let header = static_header(message, &static_positions)?;

    let instructions = message
        .instructions
        .iter()
        .map(|ix| CompiledInstruction {
            // every index is < MAX_ACCOUNTS, checked above
            program_id_index: new_index[ix.program_index] as u8,
            accounts: ix.accounts.iter().map(|&i| new_index[i] as u8).collect(),
            data: ix.data.clone(),
        })
        .collect();

    let compiled = v0::Message {
        header,
        account_keys: static_keys.clone(),
        recent_blockhash: message.recent_blockhash,
        instructions,
        address_table_lookups: lookups.clone(),
    };
    let bytes = serialize_message(&VersionedMessage::V0(compiled))?;

    tracing::debug!(
        static_keys = static_keys.len(),
        lookups = lookups.len(),
        loaded = next - static_keys.len(),
        bytes = bytes.len(),
        "Compiled message"
    );

    Ok(CompiledMessage {
        bytes,
        header,
        static_keys,
        address_table_lookups: lookups,
    })
}

/// Table assignment per account position: `(candidate index, table index)`
///
/// Each pass withdraws at most one table, so the loop ends after at most
/// one pass per candidate.
fn assign_lookups(
    message: &Message,
    candidates: &[&LookupTable],
    table_pos: &HashMap<Address, usize>,
    programs: &HashSet<Address>,
) -> Vec<Option<(usize, u8)>> {
    let accounts = &message.account_list;
    let mut withdrawn = vec![false; candidates.len()];

    loop {
        let mut assignment: Vec<Option<(usize, u8)>> = vec![None; accounts.len()];
        let mut counts = vec![(0usize, 0usize); candidates.len()];

        for (i, entry) in accounts.iter().enumerate() {
            if programs.contains(&entry.address) {
                continue;
            }
            let active = candidates
                .iter()
                .enumerate()
                .filter(|(t, _)| !withdrawn[*t])
                .map(|(_, table)| *table);
            if let AccountRef::Indirect { table, index, .. } =
                choose_encoding(&entry.address, entry.writable, entry.signer, i == 0, active)
            {
                let t = table_pos[&table];
                assignment[i] = Some((t, index));
                if entry.writable {
                    counts[t].0 += 1;
                } else {
                    counts[t].1 += 1;
                }
            }
        }

        // One table at a time: its addresses may make a later table pay off
        let unprofitable = counts.iter().position(|&(writable, readonly)| {
            writable + readonly > 0 && !lookup_saves_bytes(writable, readonly)
        });
        match unprofitable {
            Some(t) => {
                tracing::trace!(
                    table = %candidates[t].address,
                    loaded = counts[t].0 + counts[t].1,
                    "Lookup table costs more than it saves"
                );
                withdrawn[t] = true;
            }
            None => return assignment,
        }
    }
}

/// Whether moving `writable + readonly` addresses into one lookup entry
/// shrinks the message
fn lookup_saves_bytes(writable: usize, readonly: usize) -> bool {
    let removed = ((writable + readonly) * ADDRESS_LEN) as u64;
    let entry = AddressTableLookup {
        account_key: Address::default(),
        writable_indexes: vec![0; writable],
        readonly_indexes: vec![0; readonly],
    };
    bincode::serialized_size(&entry).is_ok_and(|added| removed > added)
}

fn static_header(
    message: &Message,
    static_positions: &[usize],
) -> Result<MessageHeader, ComposeError> {
    let mut signers = 0usize;
    let mut readonly_signed = 0usize;
    let mut readonly_unsigned = 0usize;
    for &i in static_positions {
        match message.account_list[i].class() {
            0 => signers += 1,
            1 => {
                signers += 1;
                readonly_signed += 1;
            }
            3 => readonly_unsigned += 1,
            _ => {}
        }
    }
    let to_u8 = |count: usize| {
        u8::try_from(count).map_err(|_| ComposeError::AccountIndexOverflow {
            count,
            max: usize::from(u8::MAX),
        })
    };
    Ok(MessageHeader {
        num_required_signatures: to_u8(signers)?,
        num_readonly_signed_accounts: to_u8(readonly_signed)?,
        num_readonly_unsigned_accounts: to_u8(readonly_unsigned)?,
    })
}
