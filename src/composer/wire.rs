//! Wire format, through the SDK message and transaction types
//!
//! Messages and transactions are read and written with `bincode` over
//! `VersionedMessage` / `VersionedTransaction`; the SDK types carry the
//! compact-u16 length prefixes. Reading is strict: fixed-int encoding and
//! no trailing bytes, so a parsed message re-serializes to the same bytes.
//!
//! [`RawMessage`] is the flat view the engine works on before lookup tables
//! are resolved.

use crate::composer::errors::ComposeError;
use crate::composer::types::{AddressTableLookup, MessageHeader};
use bincode::Options;
use solana_sdk::{
    hash::Hash,
    instruction::CompiledInstruction,
    message::{legacy, v0, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};

/// Largest length a compact-u16 prefix can carry
pub const MAX_SHORT_VEC_LEN: usize = u16::MAX as usize;

/// Message wire version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageVersion {
    Legacy,
    V0,
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Parse a serialized message; every byte must be consumed
pub fn parse_message(bytes: &[u8]) -> Result<VersionedMessage, ComposeError> {
    if bytes.is_empty() {
        return Err(ComposeError::malformed("empty envelope"));
    }
    wire_options()
        .deserialize::<VersionedMessage>(bytes)
        .map_err(|e| ComposeError::malformed(format!("invalid message: {e}")))
}

/// Parse a serialized transaction (signature section + message)
///
/// The signature count must match the message header.
pub fn parse_transaction(bytes: &[u8]) -> Result<VersionedTransaction, ComposeError> {
    let tx = wire_options()
        .deserialize::<VersionedTransaction>(bytes)
        .map_err(|e| ComposeError::malformed(format!("invalid transaction: {e}")))?;
    let required = usize::from(tx.message.header().num_required_signatures);
    if tx.signatures.len() != required {
        return Err(ComposeError::malformed(format!(
            "transaction carries {} signatures but message requires {required}",
            tx.signatures.len()
        )));
    }
    Ok(tx)
}

pub fn serialize_message(message: &VersionedMessage) -> Result<Vec<u8>, ComposeError> {
    bincode::serialize(message).map_err(|e| {
        ComposeError::External(anyhow::anyhow!("message serialization failed: {e}"))
    })
}

pub fn serialize_transaction(tx: &VersionedTransaction) -> Result<Vec<u8>, ComposeError> {
    bincode::serialize(tx).map_err(|e| {
        ComposeError::External(anyhow::anyhow!("transaction serialization failed: {e}"))
    })
}

/// Error unless `len` fits a compact-u16 length prefix
pub fn check_short_vec_len(len: usize, what: &'static str) -> Result<(), ComposeError> {
    if len > MAX_SHORT_VEC_LEN {
        return Err(ComposeError::EncodingOverflow { what, len });
    }
    Ok(())
}

/// Serialized transaction length for a message: signature section + message
pub fn transaction_len(message: &[u8]) -> Result<usize, ComposeError> {
    let message = parse_message(message)?;
    let signatures = usize::from(message.header().num_required_signatures);
    let tx = VersionedTransaction {
        signatures: vec![Signature::default(); signatures],
        message,
    };
    bincode::serialized_size(&tx)
        .map(|size| size as usize)
        .map_err(|e| ComposeError::External(anyhow::anyhow!("transaction size: {e}")))
}

/// Wire-level message, before lookup tables are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub version: MessageVersion,
    pub header: MessageHeader,
    pub static_keys: Vec<Pubkey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
    pub address_table_lookups: Vec<AddressTableLookup>,
}

impl RawMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self, ComposeError> {
        parse_message(bytes).map(Self::from)
    }

    /// Serialize in the fixed section order
    pub fn serialize(self) -> Result<Vec<u8>, ComposeError> {
        serialize_message(&VersionedMessage::try_from(self)?)
    }
}

impl From<VersionedMessage> for RawMessage {
    fn from(message: VersionedMessage) -> Self {
        match message {
            VersionedMessage::Legacy(message) => Self {
                version: MessageVersion::Legacy,
                header: message.header,
                static_keys: message.account_keys,
                recent_blockhash: message.recent_blockhash,
                instructions: message.instructions,
                address_table_lookups: Vec::new(),
            },
            VersionedMessage::V0(message) => Self {
                version: MessageVersion::V0,
                header: message.header,
                static_keys: message.account_keys,
                recent_blockhash: message.recent_blockhash,
                instructions: message.instructions,
                address_table_lookups: message.address_table_lookups,
            },
        }
    }
}

impl TryFrom<RawMessage> for VersionedMessage {
    type Error = ComposeError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        match raw.version {
            MessageVersion::Legacy if !raw.address_table_lookups.is_empty() => Err(
                ComposeError::malformed("legacy messages cannot carry address table lookups"),
            ),
            MessageVersion::Legacy => Ok(VersionedMessage::Legacy(legacy::Message {
                header: raw.header,
                account_keys: raw.static_keys,
                recent_blockhash: raw.recent_blockhash,
                instructions: raw.instructions,
            })),
            MessageVersion::V0 => Ok(VersionedMessage::V0(v0::Message {
                header: raw.header,
                account_keys: raw.static_keys,
                recent_blockhash: raw.recent_blockhash,
                instructions: raw.instructions,
                address_table_lookups: raw.address_table_lookups,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> RawMessage {
        RawMessage {
            version: MessageVersion::V0,
            header: MessageHeader {
                num_required_signatures: 1,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 1,
            },
            static_keys: vec![Pubkey::new_unique(), Pubkey::new_unique()],
            recent_blockhash: Hash::new_unique(),
            instructions: vec![CompiledInstruction {
                program_id_index: 1,
                accounts: vec![0, 2],
                data: vec![9, 9, 9],
            }],
            address_table_lookups: vec![AddressTableLookup {
                account_key: Pubkey::new_unique(),
                writable_indexes: vec![4],
                readonly_indexes: vec![],
            }],
        }
    }

    #[test]
    fn test_raw_message_layout() {
        let raw = sample_message();
        let bytes = raw.clone().serialize().expect("serializes");

        assert_eq!(bytes[0], 0x80);
        assert_eq!(&bytes[1..4], &[1, 0, 1]);
        assert_eq!(bytes[4], 2);
        // prefix + header + keys + blockhash + ix section + lookup section
        let expected = 1 + 3 + 1 + 64 + 32 + (1 + 1 + 1 + 2 + 1 + 3) + (1 + 32 + 1 + 1 + 1);
        assert_eq!(bytes.len(), expected);
        assert_eq!(RawMessage::parse(&bytes).expect("parses"), raw);
    }

    #[test]
    fn test_parse_rejects_trailing_and_truncated() {
        let mut bytes = sample_message().serialize().expect("serializes");
        bytes.push(0);
        assert!(matches!(
            RawMessage::parse(&bytes),
            Err(ComposeError::MalformedEnvelope(_))
        ));
        bytes.truncate(bytes.len() - 10);
        assert!(matches!(
            RawMessage::parse(&bytes),
            Err(ComposeError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            RawMessage::parse(&[]),
            Err(ComposeError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_version() {
        let mut bytes = sample_message().serialize().expect("serializes");
        bytes[0] = 0x81;
        assert!(matches!(
            RawMessage::parse(&bytes),
            Err(ComposeError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_parse_rejects_aliased_length_prefix() {
        let bytes = sample_message().serialize().expect("serializes");
        // key count 2 written as the two-byte alias 0x82 0x00
        let mut aliased = bytes[..4].to_vec();
        aliased.extend_from_slice(&[0x82, 0x00]);
        aliased.extend_from_slice(&bytes[5..]);
        assert!(matches!(
            RawMessage::parse(&aliased),
            Err(ComposeError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_legacy_with_lookups_not_serializable() {
        let mut raw = sample_message();
        raw.version = MessageVersion::Legacy;
        assert!(matches!(
            raw.serialize(),
            Err(ComposeError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_transaction_framing() {
        let raw = sample_message();
        let message = raw.clone().serialize().expect("serializes");
        assert_eq!(transaction_len(&message).expect("len"), 1 + 64 + message.len());

        let versioned = VersionedMessage::try_from(raw).expect("converts");
        let tx = VersionedTransaction {
            signatures: vec![Signature::from([7u8; 64])],
            message: versioned.clone(),
        };
        let bytes = serialize_transaction(&tx).expect("serializes");
        assert_eq!(bytes.len(), 1 + 64 + message.len());
        let parsed = parse_transaction(&bytes).expect("parses");
        assert_eq!(parsed.signatures, tx.signatures);
        assert_eq!(parsed.message.serialize(), message);

        // signature count disagreeing with the header
        let unsigned = VersionedTransaction {
            signatures: vec![],
            message: versioned,
        };
        let bytes = serialize_transaction(&unsigned).expect("serializes");
        assert!(matches!(
            parse_transaction(&bytes),
            Err(ComposeError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_short_vec_len_limit() {
        assert!(check_short_vec_len(MAX_SHORT_VEC_LEN, "instruction data").is_ok());
        let err = check_short_vec_len(70_000, "instruction data").unwrap_err();
        assert!(matches!(
            err,
            ComposeError::EncodingOverflow {
                what: "instruction data",
                len: 70_000
            }
        ));
    }
}
