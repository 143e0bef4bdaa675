//! Budget validation: payload size and declared compute units
//!
//! Both ceilings are checked independently and reported, never enforced by
//! truncation. Nothing is simulated; compute units are what the message
//! declares.

use crate::composer::errors::ComposeError;
use crate::composer::types::Message;
use crate::composer::wire::transaction_len;
use borsh::BorshDeserialize;
use serde::{Deserialize, Serialize};
use solana_sdk::compute_budget::{self, ComputeBudgetInstruction};
use std::fmt;

/// Hard ceiling on serialized transaction size (packet data size)
pub const MAX_TX_BYTES: u64 = 1232;

/// Hard ceiling on compute units per transaction
pub const MAX_COMPUTE_UNITS: u64 = 1_400_000;

/// Units the runtime grants each instruction when no limit is requested
pub const DEFAULT_INSTRUCTION_COMPUTE_UNITS: u64 = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Size,
    Compute,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size => write!(f, "size"),
            Self::Compute => write!(f, "compute"),
        }
    }
}

/// One exceeded ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub limit: u64,
    pub actual: u64,
}

impl From<Violation> for ComposeError {
    fn from(v: Violation) -> Self {
        match v.kind {
            ViolationKind::Size => ComposeError::SizeExceeded {
                limit: v.limit,
                actual: v.actual,
            },
            ViolationKind::Compute => ComposeError::ComputeExceeded {
                limit: v.limit,
                actual: v.actual,
            },
        }
    }
}

/// Effective ceilings for one composer
///
/// Can be tighter than [`MAX_TX_BYTES`] / [`MAX_COMPUTE_UNITS`], never looser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLimits {
    max_tx_bytes: u64,
    max_compute_units: u64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_tx_bytes: MAX_TX_BYTES,
            max_compute_units: MAX_COMPUTE_UNITS,
        }
    }
}

impl BudgetLimits {
    /// Limits clamped to the hard ceilings
    pub fn new(max_tx_bytes: u64, max_compute_units: u64) -> Self {
        if max_tx_bytes > MAX_TX_BYTES {
            tracing::warn!(
                requested = max_tx_bytes,
                ceiling = MAX_TX_BYTES,
                "Size limit above hard ceiling, clamping"
            );
        }
        if max_compute_units > MAX_COMPUTE_UNITS {
            tracing::warn!(
                requested = max_compute_units,
                ceiling = MAX_COMPUTE_UNITS,
                "Compute limit above hard ceiling, clamping"
            );
        }
        Self {
            max_tx_bytes: max_tx_bytes.min(MAX_TX_BYTES),
            max_compute_units: max_compute_units.min(MAX_COMPUTE_UNITS),
        }
    }

    pub fn max_tx_bytes(&self) -> u64 {
        self.max_tx_bytes
    }

    pub fn max_compute_units(&self) -> u64 {
        self.max_compute_units
    }

    /// Measure a compiled message against these limits
    pub fn report(
        &self,
        compiled_message: &[u8],
        declared_compute_units: u64,
    ) -> Result<BudgetReport, ComposeError> {
        Ok(BudgetReport {
            tx_bytes: transaction_len(compiled_message)? as u64,
            compute_units: declared_compute_units,
            max_tx_bytes: self.max_tx_bytes,
            max_compute_units: self.max_compute_units,
        })
    }

    /// Every exceeded ceiling, size first
    pub fn violations(
        &self,
        compiled_message: &[u8],
        declared_compute_units: u64,
    ) -> Result<Vec<Violation>, ComposeError> {
        Ok(self
            .report(compiled_message, declared_compute_units)?
            .violations())
    }

    /// Check both ceilings, failing with the first violation
    ///
    /// # Errors
    ///
    /// - `SizeExceeded` / `ComputeExceeded` on a violation
    /// - `MalformedEnvelope` if the message bytes have no header
    pub fn validate(
        &self,
        compiled_message: &[u8],
        declared_compute_units: u64,
    ) -> Result<BudgetReport, ComposeError> {
        let report = self.report(compiled_message, declared_compute_units)?;
        match report.violations().into_iter().next() {
            Some(violation) => Err(violation.into()),
            None => Ok(report),
        }
    }
}

/// Measured usage against the limits that applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetReport {
    pub tx_bytes: u64,
    pub compute_units: u64,
    pub max_tx_bytes: u64,
    pub max_compute_units: u64,
}

impl BudgetReport {
    pub fn violations(&self) -> Vec<Violation> {
        let mut out = Vec::new();
        if self.tx_bytes > self.max_tx_bytes {
            out.push(Violation {
                kind: ViolationKind::Size,
                limit: self.max_tx_bytes,
                actual: self.tx_bytes,
            });
        }
        if self.compute_units > self.max_compute_units {
            out.push(Violation {
                kind: ViolationKind::Compute,
                limit: self.max_compute_units,
                actual: self.compute_units,
            });
        }
        out
    }

    pub fn is_within(&self) -> bool {
        self.violations().is_empty()
    }

    /// Bytes left before the size limit (0 when over)
    pub fn byte_headroom(&self) -> u64 {
        self.max_tx_bytes.saturating_sub(self.tx_bytes)
    }
}

/// Validate against the hard ceilings
pub fn validate(
    compiled_message: &[u8],
    declared_compute_units: u64,
) -> Result<BudgetReport, ComposeError> {
    BudgetLimits::default().validate(compiled_message, declared_compute_units)
}

/// Compute units the message declares
///
/// A `SetComputeUnitLimit` instruction wins; otherwise every instruction that
/// is not a compute budget instruction gets the runtime default, capped at
/// [`MAX_COMPUTE_UNITS`].
pub fn declared_compute_units(message: &Message) -> u64 {
    let compute_budget = compute_budget::id();
    let instructions = message.resolved_instructions();

    let requested = instructions
        .iter()
        .filter(|ix| ix.program_id == compute_budget)
        .find_map(|ix| match ComputeBudgetInstruction::try_from_slice(&ix.data) {
            Ok(ComputeBudgetInstruction::SetComputeUnitLimit(units)) => Some(u64::from(units)),
            _ => None,
        });
    if let Some(units) = requested {
        return units;
    }

    let metered = instructions
        .iter()
        .filter(|ix| ix.program_id != compute_budget)
        .count() as u64;
    (metered * DEFAULT_INSTRUCTION_COMPUTE_UNITS).min(MAX_COMPUTE_UNITS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::compile::compile;
    use crate::composer::splice::append_all;
    use crate::composer::types::{AccountRef, Instruction, TableSet};
    use solana_sdk::{compute_budget::ComputeBudgetInstruction, hash::Hash, pubkey::Pubkey};

    fn message_with(instructions: &[Instruction]) -> Message {
        append_all(
            Message::new(Pubkey::new_unique(), Hash::new_unique()),
            instructions,
            &TableSet::new(),
        )
        .expect("appends")
    }

    fn noop(accounts: usize, data_len: usize) -> Instruction {
        Instruction::new(
            Pubkey::new_unique(),
            (0..accounts)
                .map(|_| AccountRef::readonly(Pubkey::new_unique()))
                .collect(),
            vec![0u8; data_len],
        )
    }

    fn set_limit(units: u32) -> Instruction {
        let ix = ComputeBudgetInstruction::set_compute_unit_limit(units);
        Instruction::new(ix.program_id, vec![], ix.data)
    }

    #[test]
    fn test_limits_clamp_to_ceiling() {
        let limits = BudgetLimits::new(5_000, 2_000_000);
        assert_eq!(limits.max_tx_bytes(), MAX_TX_BYTES);
        assert_eq!(limits.max_compute_units(), MAX_COMPUTE_UNITS);

        let tighter = BudgetLimits::new(1_000, 600_000);
        assert_eq!(tighter.max_tx_bytes(), 1_000);
        assert_eq!(tighter.max_compute_units(), 600_000);
    }

    #[test]
    fn test_size_counts_signature_section() {
        let message = message_with(&[noop(2, 8)]);
        let compiled = compile(&message, &[]).expect("compiles");
        let report = validate(&compiled.bytes, 10_000).expect("within budget");
        // one signer: 1 byte count + 64 byte placeholder
        assert_eq!(report.tx_bytes, compiled.bytes.len() as u64 + 65);
        assert!(report.is_within());
        assert_eq!(report.byte_headroom(), MAX_TX_BYTES - report.tx_bytes);
    }

    #[test]
    fn test_size_exceeded_reported_not_truncated() {
        let message = message_with(&[noop(40, 200)]);
        let compiled = compile(&message, &[]).expect("compiles");
        let err = validate(&compiled.bytes, 10_000).unwrap_err();
        match err {
            ComposeError::SizeExceeded { limit, actual } => {
                assert_eq!(limit, MAX_TX_BYTES);
                assert!(actual > MAX_TX_BYTES);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_compute_exceeded() {
        let message = message_with(&[noop(1, 1)]);
        let compiled = compile(&message, &[]).expect("compiles");
        let err = validate(&compiled.bytes, MAX_COMPUTE_UNITS + 1).unwrap_err();
        assert!(matches!(
            err,
            ComposeError::ComputeExceeded { limit: MAX_COMPUTE_UNITS, .. }
        ));
    }

    #[test]
    fn test_violations_reports_both() {
        let message = message_with(&[noop(40, 200)]);
        let compiled = compile(&message, &[]).expect("compiles");
        let violations = BudgetLimits::default()
            .violations(&compiled.bytes, MAX_COMPUTE_UNITS * 2)
            .expect("measures");
        let kinds: Vec<_> = violations.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, vec![ViolationKind::Size, ViolationKind::Compute]);
    }

    #[test]
    fn test_tighter_limit_applies() {
        let message = message_with(&[noop(2, 8)]);
        let compiled = compile(&message, &[]).expect("compiles");
        let limits = BudgetLimits::new(100, MAX_COMPUTE_UNITS);
        assert!(matches!(
            limits.validate(&compiled.bytes, 0),
            Err(ComposeError::SizeExceeded { limit: 100, .. })
        ));
    }

    #[test]
    fn test_declared_units_from_limit_instruction() {
        let message = message_with(&[set_limit(345_000), noop(1, 1), noop(1, 1)]);
        assert_eq!(declared_compute_units(&message), 345_000);
    }

    #[test]
    fn test_declared_units_default_per_instruction() {
        let price = ComputeBudgetInstruction::set_compute_unit_price(1_000);
        let price = Instruction::new(price.program_id, vec![], price.data);
        let message = message_with(&[price, noop(1, 1), noop(1, 1)]);
        assert_eq!(
            declared_compute_units(&message),
            2 * DEFAULT_INSTRUCTION_COMPUTE_UNITS
        );

        let many: Vec<_> = (0..10).map(|_| noop(0, 0)).collect();
        assert_eq!(declared_compute_units(&message_with(&many)), MAX_COMPUTE_UNITS);
    }

    #[test]
    fn test_undecodable_budget_instruction_ignored() {
        // SetComputeUnitLimit tag with a truncated u32
        let truncated = Instruction::new(compute_budget::id(), vec![], vec![2, 0x10]);
        let message = message_with(&[truncated, noop(1, 1)]);
        assert_eq!(declared_compute_units(&message), DEFAULT_INSTRUCTION_COMPUTE_UNITS);
    }
}
