//! Lookup table fetching
//!
//! The engine itself never performs I/O; callers resolve the tables an
//! envelope references (plus any extra candidates) before composing.
//! [`fetch_tables`] does that concurrently through a [`LookupTableSource`].

use crate::composer::{referenced_tables, ComposeError, LookupTable, TableSet};
use crate::config::RpcConfig;
use crate::metrics::{metrics, Timer};
use async_trait::async_trait;
use futures::future::try_join_all;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    address_lookup_table::{self, state::AddressLookupTable},
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};

/// Fetch collaborator: `Ok(None)` means the table does not exist
#[async_trait]
pub trait LookupTableSource: Send + Sync {
    async fn fetch(&self, table: &Pubkey) -> Result<Option<LookupTable>, ComposeError>;
}

/// Pre-fetched snapshots held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticTableSource {
    tables: HashMap<Pubkey, LookupTable>,
}

impl StaticTableSource {
    pub fn new(tables: impl IntoIterator<Item = LookupTable>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.address, t)).collect(),
        }
    }

    pub fn insert(&mut self, table: LookupTable) {
        self.tables.insert(table.address, table);
    }
}

#[async_trait]
impl LookupTableSource for StaticTableSource {
    async fn fetch(&self, table: &Pubkey) -> Result<Option<LookupTable>, ComposeError> {
        Ok(self.tables.get(table).cloned())
    }
}

/// Reads lookup table accounts over JSON-RPC
///
/// Transport failures are retried with jittered exponential backoff; a
/// missing account is not retried.
pub struct RpcTableSource {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: usize,
}

impl RpcTableSource {
    pub fn new(client: Arc<RpcClient>, commitment: CommitmentConfig) -> Self {
        Self {
            client,
            commitment,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
            max_retries: 3,
        }
    }

    pub fn from_config(config: &RpcConfig) -> Result<Self, ComposeError> {
        let commitment = config.commitment_config()?;
        let client = RpcClient::new_with_timeout_and_commitment(
            config.url.clone(),
            Duration::from_millis(config.timeout_ms),
            commitment,
        );
        Ok(Self {
            client: Arc::new(client),
            commitment,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LookupTableSource for RpcTableSource {
    async fn fetch(&self, table: &Pubkey) -> Result<Option<LookupTable>, ComposeError> {
        let strategy = ExponentialBackoff::from_millis(self.base_delay_ms)
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .map(jitter)
            .take(self.max_retries);

        let response = Retry::spawn(strategy, || {
            self.client.get_account_with_commitment(table, self.commitment)
        })
        .await
        .map_err(|e| ComposeError::fetch_failed(*table, e.to_string()))?;

        match response.value {
            None => Ok(None),
            Some(account) => {
                if account.owner != address_lookup_table::program::id() {
                    return Err(ComposeError::fetch_failed(
                        *table,
                        format!("account owned by {}, not the lookup table program", account.owner),
                    ));
                }
                decode_table(*table, &account.data).map(Some)
            }
        }
    }
}

/// Decode on-chain lookup table account data
pub fn decode_table(address: Pubkey, data: &[u8]) -> Result<LookupTable, ComposeError> {
    let state = AddressLookupTable::deserialize(data)
        .map_err(|e| ComposeError::fetch_failed(address, format!("undecodable table: {e}")))?;
    Ok(LookupTable::new(address, state.addresses.to_vec()))
}

/// Fetch `tables` concurrently, keeping their order
///
/// Duplicates are fetched once. A table that does not exist fails the
/// whole call with `UnknownTable`.
pub async fn fetch_tables<S>(source: &S, tables: &[Pubkey]) -> Result<TableSet, ComposeError>
where
    S: LookupTableSource + ?Sized,
{
    let mut seen = HashSet::new();
    let unique: Vec<Pubkey> = tables.iter().copied().filter(|t| seen.insert(*t)).collect();

    let timer = Timer::new();
    let fetched = try_join_all(unique.iter().map(|table| async move {
        match source.fetch(table).await {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => Err(ComposeError::UnknownTable { table: *table }),
            Err(e) => Err(e),
        }
    }))
    .await;
    timer.observe_duration(&metrics().table_fetch_latency);

    match fetched {
        Ok(snapshots) => {
            metrics().tables_fetched.inc_by(snapshots.len() as u64);
            tracing::debug!(tables = snapshots.len(), "Fetched lookup tables");
            Ok(snapshots.into_iter().collect())
        }
        Err(e) => {
            metrics().table_fetch_failures.inc();
            tracing::warn!(error = %e, "Lookup table fetch failed");
            Err(e)
        }
    }
}

/// Fetch every table `envelope` references, then `extra_candidates`
///
/// The result order is the candidate order for recompilation: tables the
/// envelope already uses come first.
pub async fn fetch_for_envelope<S>(
    source: &S,
    envelope: &[u8],
    extra_candidates: &[Pubkey],
) -> Result<TableSet, ComposeError>
where
    S: LookupTableSource + ?Sized,
{
    let mut wanted = referenced_tables(envelope)?;
    wanted.extend_from_slice(extra_candidates);
    fetch_tables(source, &wanted).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(len: usize) -> LookupTable {
        LookupTable::new(
            Pubkey::new_unique(),
            (0..len).map(|_| Pubkey::new_unique()).collect(),
        )
    }

    /// Account data layout: 56-byte metadata header, then raw addresses
    fn encode_table(addresses: &[Pubkey]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes()); // LookupTable variant
        data.extend_from_slice(&u64::MAX.to_le_bytes()); // deactivation slot
        data.extend_from_slice(&0u64.to_le_bytes()); // last extended slot
        data.push(0); // last extended start index
        data.push(1); // authority: Some
        data.extend_from_slice(Pubkey::new_unique().as_ref());
        data.extend_from_slice(&[0, 0]); // padding
        for address in addresses {
            data.extend_from_slice(address.as_ref());
        }
        data
    }

    #[tokio::test]
    async fn test_fetch_tables_keeps_order_and_dedups() {
        let a = table(2);
        let b = table(3);
        let source = StaticTableSource::new(vec![a.clone(), b.clone()]);

        let set = fetch_tables(&source, &[b.address, a.address, b.address])
            .await
            .expect("fetches");
        let order: Vec<Pubkey> = set.iter().map(|t| t.address).collect();
        assert_eq!(order, vec![b.address, a.address]);
    }

    #[tokio::test]
    async fn test_fetch_missing_table() {
        let source = StaticTableSource::default();
        let missing = Pubkey::new_unique();
        let err = fetch_tables(&source, &[missing]).await.unwrap_err();
        assert!(matches!(err, ComposeError::UnknownTable { table } if table == missing));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_source_usable_as_trait_object() {
        let t = table(1);
        let source: Arc<dyn LookupTableSource> = Arc::new(StaticTableSource::new(vec![t.clone()]));
        let set = fetch_tables(source.as_ref(), &[t.address]).await.expect("fetches");
        assert_eq!(set.get(&t.address), Some(&t));
    }

    #[test]
    fn test_decode_table_account_data() {
        let addresses = vec![Pubkey::new_unique(), Pubkey::new_unique()];
        let key = Pubkey::new_unique();
        let decoded = decode_table(key, &encode_table(&addresses)).expect("decodes");
        assert_eq!(decoded, LookupTable::new(key, addresses));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_table(Pubkey::new_unique(), &[0u8; 10]).unwrap_err();
        assert!(matches!(err, ComposeError::TableFetch { .. }));
    }
}
