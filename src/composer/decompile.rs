//! Message decompilation: wire bytes + lookup tables → intermediate [`Message`]
//!
//! The combined account index space follows the runtime's loaded-address
//! layout:
//! 1. Static keys
//! 2. Writable looked-up addresses, table by table, in index-list order
//! 3. Readonly looked-up addresses, table by table, in index-list order

use crate::composer::errors::ComposeError;
use crate::composer::resolver::resolve_index;
use crate::composer::types::{AccountEntry, Address, Message, MessageInstruction, TableSet};
use crate::composer::wire::{parse_transaction, MessageVersion, RawMessage};
use std::collections::HashSet;

/// Decompile serialized message bytes against resolved lookup tables
///
/// # Errors
///
/// - `MalformedEnvelope` for unparseable or self-inconsistent input
/// - `UnknownTable` / `IndexOutOfRange` if a lookup cannot be resolved
pub fn decompile(envelope: &[u8], tables: &TableSet) -> Result<Message, ComposeError> {
    let raw = RawMessage::parse(envelope)?;
    decompile_raw(raw, tables)
}

/// Decompile a serialized transaction (signature section + message)
///
/// Existing signatures are discarded: any change to the message
/// invalidates them.
pub fn decompile_transaction(
    transaction: &[u8],
    tables: &TableSet,
) -> Result<Message, ComposeError> {
    let tx = parse_transaction(transaction)?;
    decompile_raw(RawMessage::from(tx.message), tables)
}

/// Lookup table addresses an envelope references, in envelope order
///
/// Used to fetch tables before decompiling.
pub fn referenced_tables(envelope: &[u8]) -> Result<Vec<Address>, ComposeError> {
    let raw = RawMessage::parse(envelope)?;
    Ok(raw
        .address_table_lookups
        .iter()
        .map(|lookup| lookup.account_key)
        .collect())
}

/// Decompile an already parsed message
pub fn decompile_raw(raw: RawMessage, tables: &TableSet) -> Result<Message, ComposeError> {
    check_header(&raw)?;

    let version = raw.version;
    let header = raw.header;
    let static_len = raw.static_keys.len();
    let signers = usize::from(header.num_required_signatures);
    let writable_signers = signers - usize::from(header.num_readonly_signed_accounts);
    let writable_unsigned_end = static_len - usize::from(header.num_readonly_unsigned_accounts);

    let mut account_list: Vec<AccountEntry> = raw
        .static_keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let signer = i < signers;
            let writable = if signer {
                i < writable_signers
            } else {
                i < writable_unsigned_end
            };
            AccountEntry::new(*key, writable, signer)
        })
        .collect();

    let mut writable_loaded = Vec::new();
    let mut readonly_loaded = Vec::new();
    for lookup in &raw.address_table_lookups {
        if lookup.writable_indexes.is_empty() && lookup.readonly_indexes.is_empty() {
            return Err(ComposeError::malformed(format!(
                "lookup for table {} has no indexes",
                lookup.account_key
            )));
        }
        for &index in &lookup.writable_indexes {
            writable_loaded.push(resolve_index(tables, &lookup.account_key, index)?);
        }
        for &index in &lookup.readonly_indexes {
            readonly_loaded.push(resolve_index(tables, &lookup.account_key, index)?);
        }
    }
    account_list.extend(
        writable_loaded
            .into_iter()
            .map(|address| AccountEntry::new(address, true, false)),
    );
    account_list.extend(
        readonly_loaded
            .into_iter()
            .map(|address| AccountEntry::new(address, false, false)),
    );

    let mut seen = HashSet::with_capacity(account_list.len());
    for entry in &account_list {
        if !seen.insert(entry.address) {
            return Err(ComposeError::malformed(format!(
                "account {} loaded twice",
                entry.address
            )));
        }
    }

    let total = account_list.len();
    let mut instructions = Vec::with_capacity(raw.instructions.len());
    for (ix_pos, ix) in raw.instructions.into_iter().enumerate() {
        let program_index = usize::from(ix.program_id_index);
        if program_index >= static_len {
            return Err(ComposeError::malformed(format!(
                "instruction {ix_pos}: program index {program_index} \
                 outside static keys ({static_len})"
            )));
        }
        let accounts = ix
            .accounts
            .iter()
            .map(|&idx| {
                let idx = usize::from(idx);
                if idx < total {
                    Ok(idx)
                } else {
                    Err(ComposeError::malformed(format!(
                        "instruction {ix_pos}: account index {idx} beyond {total} accounts"
                    )))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        instructions.push(MessageInstruction {
            program_index,
            accounts,
            data: ix.data,
        });
    }

    let mut message = Message {
        header,
        recent_blockhash: raw.recent_blockhash,
        account_list,
        instructions,
        address_table_lookups: raw.address_table_lookups,
    };
    message.refresh_header();

    tracing::trace!(
        version = ?version,
        accounts = message.account_list.len(),
        instructions = message.instructions.len(),
        lookups = message.address_table_lookups.len(),
        "Decompiled message"
    );

    Ok(message)
}

fn check_header(raw: &RawMessage) -> Result<(), ComposeError> {
    let header = &raw.header;
    let static_len = raw.static_keys.len();
    let signers = usize::from(header.num_required_signatures);

    if signers > static_len {
        return Err(ComposeError::malformed(format!(
            "header requires {signers} signatures but only {static_len} static keys"
        )));
    }
    if header.num_readonly_signed_accounts > header.num_required_signatures {
        return Err(ComposeError::malformed(
            "more readonly signers than signers",
        ));
    }
    if usize::from(header.num_readonly_unsigned_accounts) > static_len - signers {
        return Err(ComposeError::malformed(
            "more readonly unsigned accounts than unsigned static keys",
        ));
    }
    if raw.version == MessageVersion::Legacy && !raw.address_table_lookups.is_empty() {
        return Err(ComposeError::malformed("legacy message with lookups"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::types::LookupTable;
    use solana_sdk::{
        address_lookup_table::AddressLookupTableAccount,
        hash::Hash,
        instruction::{AccountMeta, Instruction},
        message::{v0, Message as LegacyMessage, VersionedMessage},
        pubkey::Pubkey,
        signature::{Keypair, Signature},
        signer::Signer,
        transaction::VersionedTransaction,
    };

    struct Fixture {
        payer: Pubkey,
        program: Pubkey,
        table: AddressLookupTableAccount,
        bytes: Vec<u8>,
    }

    /// One instruction touching a writable and a readonly account, both in one table
    fn fixture() -> Fixture {
        let payer = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let pool = Pubkey::new_unique();
        let oracle = Pubkey::new_unique();
        let table = AddressLookupTableAccount {
            key: Pubkey::new_unique(),
            addresses: vec![pool, oracle],
        };
        let ix = Instruction::new_with_bytes(
            program,
            &[1, 2, 3],
            vec![
                AccountMeta::new(pool, false),
                AccountMeta::new_readonly(oracle, false),
                AccountMeta::new(payer, true),
            ],
        );
        let message = v0::Message::try_compile(&payer, &[ix], &[table.clone()], Hash::new_unique())
            .expect("compiles");
        Fixture {
            payer,
            program,
            table,
            bytes: VersionedMessage::V0(message).serialize(),
        }
    }

    fn tables_for(table: &AddressLookupTableAccount) -> TableSet {
        vec![LookupTable::new(table.key, table.addresses.clone())]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_decompile_sdk_compiled_v0() {
        let fx = fixture();
        let message = decompile(&fx.bytes, &tables_for(&fx.table)).expect("decompiles");

        assert_eq!(message.account_list.len(), 4);
        assert_eq!(message.fee_payer(), Some(&fx.payer));
        assert_eq!(message.address_table_lookups.len(), 1);

        let pool = fx.table.addresses[0];
        let oracle = fx.table.addresses[1];
        let pool_entry = message.entry(&pool).expect("pool present");
        assert!(pool_entry.writable && !pool_entry.signer);
        let oracle_entry = message.entry(&oracle).expect("oracle present");
        assert!(!oracle_entry.writable && !oracle_entry.signer);

        let resolved = message.resolved_instructions();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].program_id, fx.program);
        let order: Vec<Pubkey> = resolved[0].accounts.iter().map(|e| e.address).collect();
        assert_eq!(order, vec![pool, oracle, fx.payer]);
        assert_eq!(resolved[0].data, vec![1, 2, 3]);
    }

    #[test]
    fn test_loaded_addresses_follow_static_keys() {
        let fx = fixture();
        let message = decompile(&fx.bytes, &tables_for(&fx.table)).expect("decompiles");
        // static: payer, program; then writable loaded, then readonly loaded
        assert_eq!(message.account_list[0].address, fx.payer);
        assert_eq!(message.account_list[1].address, fx.program);
        assert_eq!(message.account_list[2].address, fx.table.addresses[0]);
        assert_eq!(message.account_list[3].address, fx.table.addresses[1]);
    }

    #[test]
    fn test_decompile_missing_table() {
        let fx = fixture();
        let err = decompile(&fx.bytes, &TableSet::new()).unwrap_err();
        assert!(matches!(err, ComposeError::UnknownTable { table } if table == fx.table.key));
        assert_eq!(referenced_tables(&fx.bytes).unwrap(), vec![fx.table.key]);
    }

    #[test]
    fn test_decompile_short_table_snapshot() {
        let fx = fixture();
        let short: TableSet = vec![LookupTable::new(fx.table.key, vec![fx.table.addresses[0]])]
            .into_iter()
            .collect();
        let err = decompile(&fx.bytes, &short).unwrap_err();
        assert!(matches!(err, ComposeError::IndexOutOfRange { index: 1, len: 1, .. }));
    }

    #[test]
    fn test_decompile_account_index_beyond_list() {
        let fx = fixture();
        let mut raw = RawMessage::parse(&fx.bytes).expect("parses");
        raw.instructions[0].accounts.push(9);
        let bytes = raw.serialize().expect("serializes");
        let err = decompile(&bytes, &tables_for(&fx.table)).unwrap_err();
        assert!(matches!(err, ComposeError::MalformedEnvelope(msg) if msg.contains("beyond")));
    }

    #[test]
    fn test_decompile_duplicate_loaded_account() {
        let fx = fixture();
        let mut raw = RawMessage::parse(&fx.bytes).expect("parses");
        // payer sneaks into the table and gets loaded a second time
        let mut addresses = fx.table.addresses.clone();
        addresses.push(fx.payer);
        raw.address_table_lookups[0].readonly_indexes.push(2);
        let bytes = raw.serialize().expect("serializes");
        let tables: TableSet = vec![LookupTable::new(fx.table.key, addresses)]
            .into_iter()
            .collect();
        let err = decompile(&bytes, &tables).unwrap_err();
        assert!(matches!(err, ComposeError::MalformedEnvelope(msg) if msg.contains("twice")));
    }

    #[test]
    fn test_decompile_inconsistent_header() {
        let fx = fixture();
        let mut raw = RawMessage::parse(&fx.bytes).expect("parses");
        raw.header.num_required_signatures = 5;
        let bytes = raw.serialize().expect("serializes");
        assert!(matches!(
            decompile(&bytes, &tables_for(&fx.table)),
            Err(ComposeError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_decompile_legacy_message() {
        let payer = Pubkey::new_unique();
        let to = Pubkey::new_unique();
        let ix = solana_sdk::system_instruction::transfer(&payer, &to, 42);
        let legacy = LegacyMessage::new(&[ix], Some(&payer));
        let bytes = VersionedMessage::Legacy(legacy).serialize();

        let message = decompile(&bytes, &TableSet::new()).expect("decompiles legacy");
        assert_eq!(message.fee_payer(), Some(&payer));
        assert!(message.entry(&to).expect("recipient").writable);
        assert!(message.address_table_lookups.is_empty());
        assert_eq!(message.header.num_required_signatures, 1);
    }

    #[test]
    fn test_decompile_signed_transaction() {
        let payer = Keypair::new();
        let to = Pubkey::new_unique();
        let ix = solana_sdk::system_instruction::transfer(&payer.pubkey(), &to, 7);
        let message =
            v0::Message::try_compile(&payer.pubkey(), &[ix], &[], Hash::new_unique())
                .expect("compiles");
        let tx = VersionedTransaction::try_new(VersionedMessage::V0(message), &[&payer])
            .expect("signs");
        let bytes = bincode::serialize(&tx).expect("serializes");

        let decompiled = decompile_transaction(&bytes, &TableSet::new()).expect("decompiles");
        let from_message =
            decompile(&tx.message.serialize(), &TableSet::new()).expect("decompiles");
        assert_eq!(decompiled, from_message);
        assert_eq!(decompiled.fee_payer(), Some(&payer.pubkey()));
        assert!(decompiled.entry(&to).expect("recipient").writable);
    }

    #[test]
    fn test_decompile_transaction_signature_count_mismatch() {
        let fx = fixture();
        let message: VersionedMessage = bincode::deserialize(&fx.bytes).expect("sdk parses");
        let tx = VersionedTransaction {
            signatures: vec![Signature::default(); 2],
            message,
        };
        let bytes = bincode::serialize(&tx).expect("serializes");
        assert!(matches!(
            decompile_transaction(&bytes, &tables_for(&fx.table)),
            Err(ComposeError::MalformedEnvelope(msg)) if msg.contains("signatures")
        ));
    }
}
