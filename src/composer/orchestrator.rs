//! Composition orchestrator
//!
//! `Received → Decompiled → Spliced → Compiled → Validated`, strictly
//! linear. The first failure stops the pipeline and is returned as a
//! [`Rejection`] naming the last stage reached; no partial output escapes.

use crate::composer::budget::{declared_compute_units, BudgetLimits};
use crate::composer::compile::compile;
use crate::composer::decompile::decompile;
use crate::composer::envelope::{ComposedEnvelope, Envelope};
use crate::composer::errors::ComposeError;
use crate::composer::splice::{append, insert_at, set_fee_payer};
use crate::composer::types::{Address, Instruction, TableSet};
use crate::config::BudgetConfig;
use crate::metrics::{metrics, Timer};
use crate::structured_logging::CompositionContext;
use std::fmt;
use thiserror::Error;

/// One caller edit, applied in request order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Splice {
    Append(Instruction),
    InsertAt {
        position: usize,
        instruction: Instruction,
    },
}

/// Everything one composition needs
///
/// `tables` resolves the envelope's lookups and the caller's indirect
/// references, and its order is the candidate order for recompilation.
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub envelope: Envelope,
    pub splices: Vec<Splice>,
    pub tables: TableSet,
    pub fee_payer: Option<Address>,
    pub compute_units: Option<u64>,
    pub correlation_id: Option<String>,
}

impl ComposeRequest {
    pub fn new(envelope: Envelope, tables: TableSet) -> Self {
        Self {
            envelope,
            splices: Vec::new(),
            tables,
            fee_payer: None,
            compute_units: None,
            correlation_id: None,
        }
    }

    pub fn append(mut self, instruction: Instruction) -> Self {
        self.splices.push(Splice::Append(instruction));
        self
    }

    pub fn insert_at(mut self, position: usize, instruction: Instruction) -> Self {
        self.splices.push(Splice::InsertAt {
            position,
            instruction,
        });
        self
    }

    /// Pay fees from `payer` instead of the envelope's fee payer
    pub fn with_fee_payer(mut self, payer: Address) -> Self {
        self.fee_payer = Some(payer);
        self
    }

    /// Declared compute units, overriding what the message declares
    pub fn with_compute_units(mut self, units: u64) -> Self {
        self.compute_units = Some(units);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Decompiled,
    Spliced,
    Compiled,
    Validated,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Decompiled => "decompiled",
            Self::Spliced => "spliced",
            Self::Compiled => "compiled",
            Self::Validated => "validated",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a composition
#[derive(Error, Debug)]
#[error("composition rejected after stage {stage}: {error}")]
pub struct Rejection {
    /// Last stage completed before the failure
    pub stage: Stage,
    pub correlation_id: String,
    #[source]
    pub error: ComposeError,
}

impl Rejection {
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }

    pub fn into_error(self) -> ComposeError {
        self.error
    }
}

/// Stateless composition engine
///
/// Holds only its budget limits; share it freely across tasks.
#[derive(Debug, Clone, Default)]
pub struct Composer {
    limits: BudgetLimits,
}

impl Composer {
    pub fn new(limits: BudgetLimits) -> Self {
        Self { limits }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.limits())
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Run the whole pipeline for one request
    pub fn compose(&self, request: &ComposeRequest) -> Result<ComposedEnvelope, Rejection> {
        let ctx = match &request.correlation_id {
            Some(id) => CompositionContext::with_correlation_id("compose", id.clone()),
            None => CompositionContext::new("compose"),
        };
        let timer = Timer::new();
        let m = metrics();
        m.compositions_total.inc();

        let mut stage = Stage::Received;
        match self.run(request, &ctx, &mut stage) {
            Ok(composed) => {
                timer.observe_duration(&m.composition_latency);
                m.compositions_composed.inc();
                m.composed_tx_bytes.observe(composed.tx_size() as f64);
                ctx.logger.log_composed(
                    composed.tx_size(),
                    composed.compute_units(),
                    composed.required_signers.len(),
                    ctx.elapsed_micros(),
                );
                Ok(composed)
            }
            Err(error) => {
                timer.observe_duration(&m.composition_latency);
                m.record_rejection(error.category());
                ctx.logger.log_rejected(
                    stage.as_str(),
                    error.category(),
                    &error.to_string(),
                    ctx.elapsed_micros(),
                );
                Err(Rejection {
                    stage,
                    correlation_id: ctx.correlation_id.clone(),
                    error,
                })
            }
        }
    }

    fn run(
        &self,
        request: &ComposeRequest,
        ctx: &CompositionContext,
        stage: &mut Stage,
    ) -> Result<ComposedEnvelope, ComposeError> {
        let tables = &request.tables;
        let bytes = request.envelope.message_bytes()?;
        ctx.logger
            .log_received(bytes.len(), request.splices.len(), tables.len());

        let mut message = decompile(&bytes, tables)?;
        *stage = Stage::Decompiled;
        ctx.logger.log_decompiled(
            message.account_list.len(),
            message.instructions.len(),
            message.address_table_lookups.len(),
        );

        if let Some(payer) = request.fee_payer {
            message = set_fee_payer(message, payer);
        }
        for splice in &request.splices {
            message = match splice {
                Splice::Append(instruction) => append(message, instruction, tables)?,
                Splice::InsertAt {
                    position,
                    instruction,
                } => insert_at(message, *position, instruction, tables)?,
            };
        }
        *stage = Stage::Spliced;
        ctx.logger
            .log_spliced(message.account_list.len(), message.instructions.len());

        let compiled = compile(&message, tables.as_slice())?;
        *stage = Stage::Compiled;
        let loaded = compiled.loaded_address_count();
        ctx.logger
            .log_compiled(compiled.static_keys.len(), loaded, compiled.bytes.len());

        let compute_units = request
            .compute_units
            .unwrap_or_else(|| declared_compute_units(&message));
        let budget = self.limits.validate(&compiled.bytes, compute_units)?;
        *stage = Stage::Validated;

        metrics().lookup_addresses_loaded.inc_by(loaded as u64);
        Ok(ComposedEnvelope::new(compiled, budget))
    }
}
