//! Quality Rules
//!
//! Pure assessment of a market record against the prior state of its symbol.
//! Findings are annotations only: no finding stops a record from being
//! forwarded.
//!
//! # Check Order
//!
//! 1. Required fields (`symbol`, `price`, `timestamp`, `sequence`). Any
//!    missing field ends the assessment.
//! 2. Parsing of price, timestamp, and sequence. The first parse failure ends
//!    the assessment.
//! 3. Price bounds.
//! 4. Sequence continuity against the last observed sequence.
//! 5. Single-step price spike against the last observed price.
//! 6. Timestamp skew against the wall clock.
//!
//! `assess` never mutates state. It returns the observation the caller
//! should apply to the symbol's state, which keeps findings reproducible for
//! any given state snapshot.

mod clock;
mod state;

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use rust_decimal::Decimal;

pub use clock::{Clock, ManualClock, SystemClock};
pub use state::{DEFAULT_HISTORY_CAPACITY, DEFAULT_MAX_SYMBOLS, SymbolState, SymbolStates};

use crate::domain::record::{FieldError, MarketRecord, RequiredField};

// =============================================================================
// Quality Findings
// =============================================================================

/// A detected data-quality problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QualityError {
    /// A required field is absent or `null`.
    MissingField(RequiredField),
    /// Price is zero or negative.
    NegativePrice,
    /// Price is above the configured ceiling.
    SuspiciousHighPrice,
    /// Sequence jumped forward; carries the number of skipped sequences.
    SequenceGap(u64),
    /// Sequence did not advance past the last observed one.
    SequenceRegression,
    /// Price moved more than the spike threshold in one step.
    PriceSpike,
    /// Producer timestamp is too far from the wall clock.
    TimestampSkew,
    /// Datagram did not decode to a JSON object.
    JsonDecodeError,
    /// A required field did not parse.
    ParseError(RequiredField),
}

impl QualityError {
    /// Metric label for this finding.
    #[must_use]
    pub fn tag(&self) -> Cow<'static, str> {
        match self {
            Self::MissingField(field) => Cow::Owned(format!("missing_field_{}", field.key())),
            Self::NegativePrice => Cow::Borrowed("negative_price"),
            Self::SuspiciousHighPrice => Cow::Borrowed("suspicious_high_price"),
            Self::SequenceGap(skipped) => Cow::Owned(format!("sequence_gap_{skipped}")),
            Self::SequenceRegression => Cow::Borrowed("sequence_regression"),
            Self::PriceSpike => Cow::Borrowed("price_spike"),
            Self::TimestampSkew => Cow::Borrowed("timestamp_skew"),
            Self::JsonDecodeError => Cow::Borrowed("json_decode_error"),
            Self::ParseError(field) => Cow::Owned(format!("parse_error_{}", field.key())),
        }
    }
}

impl fmt::Display for QualityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

// =============================================================================
// Thresholds
// =============================================================================

/// Policy thresholds for the quality checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityThresholds {
    /// Prices above this are suspicious.
    pub max_price: Decimal,
    /// Relative single-step move that counts as a spike (0.05 = 5%).
    pub spike_threshold: Decimal,
    /// Largest tolerated distance between producer timestamp and wall clock.
    pub max_skew: Duration,
    /// Number of prices kept per symbol.
    pub history_capacity: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            max_price: Decimal::from(10_000),
            spike_threshold: Decimal::new(5, 2),
            max_skew: Duration::from_secs(60),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl QualityThresholds {
    fn max_skew_micros(&self) -> u64 {
        u64::try_from(self.max_skew.as_micros()).unwrap_or(u64::MAX)
    }
}

// =============================================================================
// Assessment
// =============================================================================

/// Parsed values to fold into the symbol's state after assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Sequence number to record as the last observed.
    pub sequence: u64,
    /// Price to append to the history.
    pub price: Decimal,
}

/// Result of assessing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    /// Findings, in check order.
    pub findings: Vec<QualityError>,
    /// Present when the record parsed far enough to update state.
    pub observation: Option<Observation>,
}

impl Assessment {
    const fn incomplete(findings: Vec<QualityError>) -> Self {
        Self {
            findings,
            observation: None,
        }
    }
}

/// Assess a record against a snapshot of its symbol's state.
///
/// `state` is `None` for a symbol that has not been seen yet.
#[must_use]
pub fn assess(
    state: Option<&SymbolState>,
    record: &MarketRecord,
    now_micros: i64,
    thresholds: &QualityThresholds,
) -> Assessment {
    let missing = record.missing_fields();
    if !missing.is_empty() {
        return Assessment::incomplete(
            missing.into_iter().map(QualityError::MissingField).collect(),
        );
    }

    let parsed = record.price().and_then(|price| {
        let timestamp = record.timestamp_micros()?;
        let sequence = record.sequence()?;
        Ok((price, timestamp, sequence))
    });
    let (price, timestamp_micros, sequence) = match parsed {
        Ok(values) => values,
        Err(FieldError::Invalid { field, .. } | FieldError::Missing(field)) => {
            return Assessment::incomplete(vec![QualityError::ParseError(field)]);
        }
    };

    let mut findings = Vec::new();

    if price <= Decimal::ZERO {
        findings.push(QualityError::NegativePrice);
    } else if price > thresholds.max_price {
        findings.push(QualityError::SuspiciousHighPrice);
    }

    if let Some(last) = state.and_then(SymbolState::last_sequence) {
        if sequence > last {
            let skipped = sequence - last - 1;
            if skipped > 0 {
                findings.push(QualityError::SequenceGap(skipped));
            }
        } else {
            findings.push(QualityError::SequenceRegression);
        }
    }

    let spiked = state
        .and_then(SymbolState::last_price)
        .is_some_and(|last_price| is_spike(last_price, price, thresholds.spike_threshold));
    if spiked {
        findings.push(QualityError::PriceSpike);
    }

    if timestamp_micros.abs_diff(now_micros) > thresholds.max_skew_micros() {
        findings.push(QualityError::TimestampSkew);
    }

    Assessment {
        findings,
        observation: Some(Observation { sequence, price }),
    }
}

/// Relative move from `previous` to `current` exceeds `threshold`.
///
/// Undefined (and never a spike) when `previous` is zero. A move too large
/// to represent as a `Decimal` counts as a spike.
fn is_spike(previous: Decimal, current: Decimal, threshold: Decimal) -> bool {
    if previous.is_zero() {
        return false;
    }
    current
        .checked_sub(previous)
        .map(|delta| delta.abs())
        .and_then(|delta| delta.checked_div(previous))
        .is_none_or(|change| change > threshold)
}
