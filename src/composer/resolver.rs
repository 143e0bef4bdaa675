//! Address resolution against lookup table snapshots
//!
//! Two directions:
//! - [`resolve`]: `(table, index)` → address
//! - [`choose_encoding`]: address → cheapest [`AccountRef`]
//!
//! `choose_encoding` scans candidates strictly in the order supplied, so
//! an address present in several tables always maps to the same one.

use crate::composer::errors::ComposeError;
use crate::composer::types::{AccountRef, Address, LookupTable, TableSet};

/// Resolve an account reference to a concrete address
///
/// # Errors
///
/// - `UnknownTable` if an indirect reference names a table not in `tables`
/// - `IndexOutOfRange` if the index is past the end of the table snapshot
pub fn resolve(account: &AccountRef, tables: &TableSet) -> Result<Address, ComposeError> {
    match account {
        AccountRef::Direct { address, .. } => Ok(*address),
        AccountRef::Indirect { table, index, .. } => resolve_index(tables, table, *index),
    }
}

/// Resolve one index of one table
pub fn resolve_index(
    tables: &TableSet,
    table: &Address,
    index: u8,
) -> Result<Address, ComposeError> {
    let snapshot = tables
        .get(table)
        .ok_or(ComposeError::UnknownTable { table: *table })?;
    snapshot
        .get(index)
        .copied()
        .ok_or(ComposeError::IndexOutOfRange {
            table: *table,
            index,
            len: snapshot.len(),
        })
}

/// Choose how to encode `address`
///
/// Signers and the fee payer are always `Direct`: signature verification
/// needs them in the static section. Otherwise the first candidate table
/// holding the address wins. The returned `Direct` reference carries
/// `signer = is_signer`; both variants carry `writable`.
pub fn choose_encoding<'a, I>(
    address: &Address,
    writable: bool,
    is_signer: bool,
    is_payer: bool,
    candidate_tables: I,
) -> AccountRef
where
    I: IntoIterator<Item = &'a LookupTable>,
{
    let direct = AccountRef::Direct {
        address: *address,
        writable,
        signer: is_signer,
    };
    if is_signer || is_payer {
        return direct;
    }
    candidate_tables
        .into_iter()
        .find_map(|table| {
            table.position(address).map(|index| AccountRef::Indirect {
                table: table.address,
                index,
                writable,
            })
        })
        .unwrap_or(direct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::pubkey::Pubkey;

    fn table_with(entries: Vec<Pubkey>) -> LookupTable {
        LookupTable::new(Pubkey::new_unique(), entries)
    }

    #[test]
    fn test_resolve_direct_and_indirect() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let table = table_with(vec![a, b]);
        let key = table.address;
        let tables: TableSet = vec![table].into_iter().collect();

        assert_eq!(resolve(&AccountRef::readonly(a), &tables).unwrap(), a);
        let indirect = AccountRef::Indirect {
            table: key,
            index: 1,
            writable: false,
        };
        assert_eq!(resolve(&indirect, &tables).unwrap(), b);
    }

    #[test]
    fn test_resolve_unknown_table() {
        let missing = Pubkey::new_unique();
        let err = resolve(
            &AccountRef::Indirect {
                table: missing,
                index: 0,
                writable: true,
            },
            &TableSet::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ComposeError::UnknownTable { table } if table == missing));
    }

    #[test]
    fn test_resolve_index_out_of_range() {
        let table = table_with(vec![Pubkey::new_unique()]);
        let key = table.address;
        let tables: TableSet = vec![table].into_iter().collect();

        let err = resolve_index(&tables, &key, 1).unwrap_err();
        assert!(matches!(
            err,
            ComposeError::IndexOutOfRange { index: 1, len: 1, .. }
        ));
    }

    #[test]
    fn test_choose_encoding_first_table_wins() {
        let addr = Pubkey::new_unique();
        let first = table_with(vec![Pubkey::new_unique(), addr]);
        let second = table_with(vec![addr]);
        let candidates = vec![first.clone(), second.clone()];

        let encoded = choose_encoding(&addr, true, false, false, &candidates);
        assert_eq!(
            encoded,
            AccountRef::Indirect {
                table: first.address,
                index: 1,
                writable: true
            }
        );

        let reversed = vec![second.clone(), first];
        let encoded = choose_encoding(&addr, true, false, false, &reversed);
        assert_eq!(
            encoded,
            AccountRef::Indirect {
                table: second.address,
                index: 0,
                writable: true
            }
        );
    }

    #[test]
    fn test_choose_encoding_signer_and_payer_stay_direct() {
        let addr = Pubkey::new_unique();
        let candidates = vec![table_with(vec![addr])];

        assert_eq!(
            choose_encoding(&addr, false, true, false, &candidates),
            AccountRef::signer(addr, false)
        );
        assert_eq!(
            choose_encoding(&addr, true, false, true, &candidates),
            AccountRef::writable(addr)
        );
    }

    #[test]
    fn test_choose_encoding_absent_stays_direct() {
        let addr = Pubkey::new_unique();
        let candidates = vec![table_with(vec![Pubkey::new_unique()])];
        assert_eq!(
            choose_encoding(&addr, false, false, false, &candidates),
            AccountRef::readonly(addr)
        );
    }
}
