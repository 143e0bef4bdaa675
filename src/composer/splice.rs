//! Instruction splicing into an intermediate [`Message`]
//!
//! Flags of an existing account are only ever widened:
//! `writable = old || new`, `signer = old || new`. Instructions already in
//! the message keep their relative order; the engine never removes or
//! reorders them on its own.

use crate::composer::errors::ComposeError;
use crate::composer::resolver::resolve;
use crate::composer::types::{
    AccountEntry, Address, Instruction, Message, MessageInstruction, TableSet,
};

/// Append `instruction` as the last instruction of `message`
///
/// # Errors
///
/// `UnknownTable` / `IndexOutOfRange` if an indirect account reference of
/// the instruction cannot be resolved against `tables`.
pub fn append(
    message: Message,
    instruction: &Instruction,
    tables: &TableSet,
) -> Result<Message, ComposeError> {
    let position = message.instructions.len();
    insert_at(message, position, instruction, tables)
}

/// Append several instructions, in order
pub fn append_all(
    mut message: Message,
    instructions: &[Instruction],
    tables: &TableSet,
) -> Result<Message, ComposeError> {
    for instruction in instructions {
        message = append(message, instruction, tables)?;
    }
    Ok(message)
}

/// Insert `instruction` so that it ends up at index `position`
///
/// Same flag-widening rules as [`append`]. `position == len` appends.
pub fn insert_at(
    mut message: Message,
    position: usize,
    instruction: &Instruction,
    tables: &TableSet,
) -> Result<Message, ComposeError> {
    if position > message.instructions.len() {
        return Err(ComposeError::InvalidInsertPosition {
            position,
            len: message.instructions.len(),
        });
    }

    // Resolve everything before touching the message
    let resolved = instruction
        .accounts
        .iter()
        .map(|account| {
            resolve(account, tables)
                .map(|address| (address, account.is_writable(), account.is_signer()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let program_index = upsert(&mut message.account_list, instruction.program_id, false, false);
    let accounts = resolved
        .into_iter()
        .map(|(address, writable, signer)| {
            upsert(&mut message.account_list, address, writable, signer)
        })
        .collect();

    message.instructions.insert(
        position,
        MessageInstruction {
            program_index,
            accounts,
            data: instruction.data.clone(),
        },
    );
    message.refresh_header();

    tracing::trace!(
        program = %instruction.program_id,
        position,
        accounts = message.account_list.len(),
        "Spliced instruction"
    );

    Ok(message)
}

/// Make `payer` the fee payer: first account, writable signer
///
/// An existing entry is moved to the front (flags widened); instruction
/// account positions are remapped accordingly.
pub fn set_fee_payer(mut message: Message, payer: Address) -> Message {
    let remap: Box<dyn Fn(usize) -> usize> = match message.position_of(&payer) {
        Some(0) => {
            let entry = &mut message.account_list[0];
            entry.writable = true;
            entry.signer = true;
            message.refresh_header();
            return message;
        }
        Some(current) => {
            message.account_list.remove(current);
            Box::new(move |idx| match idx {
                i if i == current => 0,
                i if i < current => i + 1,
                i => i,
            })
        }
        None => Box::new(|idx| idx + 1),
    };

    message
        .account_list
        .insert(0, AccountEntry::new(payer, true, true));
    for ix in &mut message.instructions {
        ix.program_index = remap(ix.program_index);
        for account in &mut ix.accounts {
            *account = remap(*account);
        }
    }
    message.refresh_header();
    message
}

/// Position of `address` in the list, adding or widening its entry
fn upsert(list: &mut Vec<AccountEntry>, address: Address, writable: bool, signer: bool) -> usize {
    match list.iter().position(|entry| entry.address == address) {
        Some(idx) => {
            let entry = &mut list[idx];
            entry.writable |= writable;
            entry.signer |= signer;
            idx
        }
        None => {
            list.push(AccountEntry::new(address, writable, signer));
            list.len() - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::types::{AccountRef, LookupTable};
    use solana_sdk::{hash::Hash, pubkey::Pubkey};

    fn base_message() -> (Message, Pubkey, Pubkey) {
        let payer = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let vault = Pubkey::new_unique();
        let message = Message::new(payer, Hash::new_unique());
        let ix = Instruction::new(program, vec![AccountRef::readonly(vault)], vec![1]);
        let message = append(message, &ix, &TableSet::new()).expect("appends");
        (message, program, vault)
    }

    #[test]
    fn test_append_preserves_prior_instructions() {
        let (message, _, _) = base_message();
        let before = message.resolved_instructions();

        let ix = Instruction::new(
            Pubkey::new_unique(),
            vec![AccountRef::writable(Pubkey::new_unique())],
            vec![2, 3],
        );
        let after = append(message, &ix, &TableSet::new()).expect("appends");
        let resolved = after.resolved_instructions();

        assert_eq!(resolved.len(), before.len() + 1);
        assert_eq!(resolved[..before.len()], before[..]);
        assert_eq!(resolved.last().map(|ix| ix.data.clone()), Some(vec![2, 3]));
    }

    #[test]
    fn test_append_widens_never_narrows() {
        let (message, program, vault) = base_message();
        assert!(!message.entry(&vault).unwrap().writable);

        let widen = Instruction::new(program, vec![AccountRef::writable(vault)], vec![]);
        let message = append(message, &widen, &TableSet::new()).expect("appends");
        assert!(message.entry(&vault).unwrap().writable);

        // a later read-only mention keeps it writable
        let narrow = Instruction::new(program, vec![AccountRef::readonly(vault)], vec![]);
        let message = append(message, &narrow, &TableSet::new()).expect("appends");
        let entry = message.entry(&vault).unwrap();
        assert!(entry.writable);
        assert!(!entry.signer);
        assert_eq!(
            message
                .account_list
                .iter()
                .filter(|e| e.address == vault)
                .count(),
            1
        );
    }

    #[test]
    fn test_append_resolves_indirect_refs() {
        let (message, program, _) = base_message();
        let looked_up = Pubkey::new_unique();
        let table = LookupTable::new(Pubkey::new_unique(), vec![Pubkey::new_unique(), looked_up]);
        let key = table.address;
        let tables: TableSet = vec![table].into_iter().collect();

        let ix = Instruction::new(
            program,
            vec![AccountRef::Indirect {
                table: key,
                index: 1,
                writable: true,
            }],
            vec![],
        );
        let message = append(message, &ix, &tables).expect("appends");
        let entry = message.entry(&looked_up).expect("added");
        assert!(entry.writable && !entry.signer);
    }

    #[test]
    fn test_failed_resolution_propagates() {
        let (message, program, _) = base_message();
        let ix = Instruction::new(
            program,
            vec![AccountRef::Indirect {
                table: Pubkey::new_unique(),
                index: 0,
                writable: false,
            }],
            vec![],
        );
        let err = append(message, &ix, &TableSet::new()).unwrap_err();
        assert!(matches!(err, ComposeError::UnknownTable { .. }));
    }

    #[test]
    fn test_insert_at_front_and_bounds() {
        let (message, _, _) = base_message();
        let first_program = Pubkey::new_unique();
        let ix = Instruction::new(first_program, vec![], vec![7]);

        let message = insert_at(message, 0, &ix, &TableSet::new()).expect("inserts");
        let resolved = message.resolved_instructions();
        assert_eq!(resolved[0].program_id, first_program);
        assert_eq!(resolved.len(), 2);

        let err = insert_at(message, 5, &ix, &TableSet::new()).unwrap_err();
        assert!(matches!(
            err,
            ComposeError::InvalidInsertPosition { position: 5, len: 2 }
        ));
    }

    #[test]
    fn test_program_id_added_readonly() {
        let (message, program, _) = base_message();
        let entry = message.entry(&program).expect("program present");
        assert!(!entry.writable && !entry.signer);
    }

    #[test]
    fn test_set_fee_payer_moves_existing_signer() {
        let (message, program, _) = base_message();
        let cosigner = Pubkey::new_unique();
        let ix = Instruction::new(program, vec![AccountRef::signer(cosigner, false)], vec![]);
        let message = append(message, &ix, &TableSet::new()).expect("appends");
        let before = message.resolved_instructions();

        let message = set_fee_payer(message, cosigner);
        assert_eq!(message.fee_payer(), Some(&cosigner));
        assert_eq!(message.header.num_required_signatures, 2);
        assert_eq!(message.header.num_readonly_signed_accounts, 0);

        // positions moved, semantics did not (besides the widened payer)
        let after = message.resolved_instructions();
        for (old, new) in before.iter().zip(after.iter()) {
            assert_eq!(old.program_id, new.program_id);
            let old_addrs: Vec<_> = old.accounts.iter().map(|e| e.address).collect();
            let new_addrs: Vec<_> = new.accounts.iter().map(|e| e.address).collect();
            assert_eq!(old_addrs, new_addrs);
        }
    }

    #[test]
    fn test_set_fee_payer_new_address() {
        let (message, program, vault) = base_message();
        let sponsor = Pubkey::new_unique();
        let message = set_fee_payer(message, sponsor);

        assert_eq!(message.fee_payer(), Some(&sponsor));
        let resolved = message.resolved_instructions();
        assert_eq!(resolved[0].program_id, program);
        assert_eq!(resolved[0].accounts[0].address, vault);
    }
}
