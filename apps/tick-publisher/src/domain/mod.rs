//! Domain Layer - Market records and quality rules.
//!
//! This layer contains the decoded market-data record and the pure quality
//! assessment rules. Nothing here performs I/O or touches metrics; the
//! application layer wires these types to the broker and the metrics sink.

/// Decoded market-data records and field parsing.
pub mod record;

/// Quality findings, per-symbol state, and the assessment rules.
pub mod quality;
