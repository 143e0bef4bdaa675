//! Envelope framing: input envelopes and composed output
//!
//! Routing services hand out either bare message bytes or a whole
//! serialized transaction (often base64). The output side frames the
//! composed message with a signature section: zeroed placeholders for an
//! unsigned transaction, or caller-provided signatures in signer order.

use crate::composer::budget::BudgetReport;
use crate::composer::compile::CompiledMessage;
use crate::composer::errors::ComposeError;
use crate::composer::wire::{parse_message, parse_transaction, serialize_transaction};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use solana_sdk::{
    message::VersionedMessage,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};
use std::borrow::Cow;
use std::collections::HashMap;

/// Envelope as received from upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Serialized message only
    Message(Vec<u8>),
    /// Signature section followed by the message; signatures are discarded
    Transaction(Vec<u8>),
}

impl Envelope {
    pub fn from_base64_message(text: &str) -> Result<Self, ComposeError> {
        Ok(Self::Message(decode_base64(text)?))
    }

    pub fn from_base64_transaction(text: &str) -> Result<Self, ComposeError> {
        Ok(Self::Transaction(decode_base64(text)?))
    }

    /// Classify raw bytes: a full transaction if they parse as one, else a message
    pub fn detect(bytes: Vec<u8>) -> Self {
        if parse_transaction(&bytes).is_ok() {
            Self::Transaction(bytes)
        } else {
            Self::Message(bytes)
        }
    }

    /// The message part of the envelope
    pub fn message_bytes(&self) -> Result<Cow<'_, [u8]>, ComposeError> {
        match self {
            Self::Message(bytes) => Ok(Cow::Borrowed(bytes)),
            Self::Transaction(bytes) => {
                let tx = parse_transaction(bytes)?;
                Ok(Cow::Owned(tx.message.serialize()))
            }
        }
    }
}

fn decode_base64(text: &str) -> Result<Vec<u8>, ComposeError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| ComposeError::malformed(format!("invalid base64: {e}")))
}

/// Result of a successful composition, ready for signing
///
/// `required_signers` is in signature order: the signature section of the
/// transaction is positional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedEnvelope {
    pub message: Vec<u8>,
    pub required_signers: Vec<Pubkey>,
    pub budget: BudgetReport,
}

impl ComposedEnvelope {
    pub fn new(compiled: CompiledMessage, budget: BudgetReport) -> Self {
        let required_signers = compiled.required_signers().to_vec();
        Self {
            message: compiled.into_bytes(),
            required_signers,
            budget,
        }
    }

    /// Serialized transaction size, signature section included
    pub fn tx_size(&self) -> u64 {
        self.budget.tx_bytes
    }

    pub fn compute_units(&self) -> u64 {
        self.budget.compute_units
    }

    pub fn fee_payer(&self) -> Option<&Pubkey> {
        self.required_signers.first()
    }

    /// Transaction bytes with zeroed signature placeholders
    pub fn unsigned_transaction(&self) -> Result<Vec<u8>, ComposeError> {
        let placeholders = vec![Signature::default(); self.required_signers.len()];
        self.frame(placeholders)
    }

    /// Transaction bytes with one signature per required signer
    ///
    /// # Errors
    ///
    /// `MissingSignature` naming the first signer without an entry in
    /// `signatures`.
    pub fn signed_transaction(
        &self,
        signatures: &HashMap<Pubkey, Signature>,
    ) -> Result<Vec<u8>, ComposeError> {
        let ordered = self.ordered_signatures(signatures)?;
        self.frame(ordered)
    }

    /// Collect signatures from `signers` and assemble the signed transaction
    pub fn sign_with(&self, signers: &[&dyn EnvelopeSigner]) -> Result<Vec<u8>, ComposeError> {
        let mut signatures = HashMap::with_capacity(self.required_signers.len());
        for signer in signers {
            for (address, signature) in signer.sign_payload(&self.message)? {
                signatures.insert(address, signature);
            }
        }
        self.signed_transaction(&signatures)
    }

    /// Unsigned transaction as base64, the form routing services exchange
    pub fn to_base64(&self) -> Result<String, ComposeError> {
        Ok(STANDARD.encode(self.unsigned_transaction()?))
    }

    /// The composed message as an SDK `VersionedMessage`
    pub fn to_versioned_message(&self) -> Result<VersionedMessage, ComposeError> {
        parse_message(&self.message)
    }

    /// SDK transaction carrying the given signatures in signer order
    pub fn to_versioned_transaction(
        &self,
        signatures: &HashMap<Pubkey, Signature>,
    ) -> Result<VersionedTransaction, ComposeError> {
        let ordered = self.ordered_signatures(signatures)?;
        self.transaction_with(ordered)
    }

    fn ordered_signatures(
        &self,
        signatures: &HashMap<Pubkey, Signature>,
    ) -> Result<Vec<Signature>, ComposeError> {
        self.required_signers
            .iter()
            .map(|signer| {
                signatures
                    .get(signer)
                    .copied()
                    .ok_or(ComposeError::MissingSignature(*signer))
            })
            .collect()
    }

    fn transaction_with(
        &self,
        signatures: Vec<Signature>,
    ) -> Result<VersionedTransaction, ComposeError> {
        Ok(VersionedTransaction {
            signatures,
            message: self.to_versioned_message()?,
        })
    }

    fn frame(&self, signatures: Vec<Signature>) -> Result<Vec<u8>, ComposeError> {
        serialize_transaction(&self.transaction_with(signatures)?)
    }
}

/// "Sign this payload" capability
///
/// Implementations return one `(address, signature)` pair per key they
/// hold. Key management stays with the implementor.
pub trait EnvelopeSigner {
    fn sign_payload(&self, payload: &[u8]) -> Result<Vec<(Pubkey, Signature)>, ComposeError>;
}

impl EnvelopeSigner for Keypair {
    fn sign_payload(&self, payload: &[u8]) -> Result<Vec<(Pubkey, Signature)>, ComposeError> {
        let signature = self
            .try_sign_message(payload)
            .map_err(|e| ComposeError::External(anyhow::Error::new(e)))?;
        Ok(vec![(self.pubkey(), signature)])
    }
}
