//! Quality Validator Service
//!
//! Owns the per-symbol state and applies the domain quality rules to each
//! record in arrival order. Findings are reported to the metrics sink and
//! returned to the caller; they never block forwarding.

use std::sync::Arc;

use crate::application::ports::MetricsSink;
use crate::domain::quality::{
    Clock, DEFAULT_MAX_SYMBOLS, QualityError, QualityThresholds, SymbolState, SymbolStates, assess,
};
use crate::domain::record::MarketRecord;

/// Stateful validator for a single ingestion task.
///
/// Not shared between tasks; all state is owned by the caller.
pub struct QualityValidator {
    thresholds: QualityThresholds,
    states: SymbolStates,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    total_sequence_gaps: u64,
    total_findings: u64,
}

impl QualityValidator {
    /// Create a validator tracking at most `max_symbols` symbols.
    #[must_use]
    pub fn new(
        thresholds: QualityThresholds,
        max_symbols: usize,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let states = SymbolStates::new(max_symbols, thresholds.history_capacity);
        Self {
            thresholds,
            states,
            clock,
            metrics,
            total_sequence_gaps: 0,
            total_findings: 0,
        }
    }

    /// Create a validator with default thresholds and capacity.
    #[must_use]
    pub fn with_defaults(clock: Arc<dyn Clock>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::new(
            QualityThresholds::default(),
            DEFAULT_MAX_SYMBOLS,
            clock,
            metrics,
        )
    }

    /// Check a record, update its symbol's state, and report findings.
    pub fn validate(&mut self, record: &MarketRecord) -> Vec<QualityError> {
        let symbol = record.symbol();
        let snapshot = symbol.as_deref().and_then(|s| self.states.get(s));
        let assessment = assess(
            snapshot,
            record,
            self.clock.now_micros(),
            &self.thresholds,
        );

        if let (Some(symbol), Some(observation)) = (symbol.as_deref(), assessment.observation) {
            self.states
                .get_or_insert(symbol)
                .observe(observation.sequence, observation.price);
        }

        for finding in &assessment.findings {
            self.metrics.quality_error(&finding.tag());
            if let QualityError::SequenceGap(skipped) = finding {
                self.total_sequence_gaps = self.total_sequence_gaps.saturating_add(*skipped);
                self.metrics.sequence_gaps(*skipped);
            }
        }
        self.total_findings += assessment.findings.len() as u64;

        if !assessment.findings.is_empty() {
            tracing::debug!(
                symbol = %record.symbol_label(),
                findings = ?assessment.findings,
                "Quality findings"
            );
        }

        assessment.findings
    }

    /// Current state of a symbol, if tracked.
    #[must_use]
    pub fn symbol_state(&self, symbol: &str) -> Option<&SymbolState> {
        self.states.get(symbol)
    }

    /// Number of symbols currently tracked.
    #[must_use]
    pub fn tracked_symbols(&self) -> usize {
        self.states.len()
    }

    /// Sum of all skipped sequences seen so far.
    #[must_use]
    pub const fn total_sequence_gaps(&self) -> u64 {
        self.total_sequence_gaps
    }

    /// Total findings emitted so far.
    #[must_use]
    pub const fn total_findings(&self) -> u64 {
        self.total_findings
    }
}
