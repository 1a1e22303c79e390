//! Per-Symbol Validation State
//!
//! `SymbolState` holds the last accepted sequence number and a bounded price
//! history for one symbol. `SymbolStates` owns every tracked symbol and
//! evicts the least recently observed one once its capacity is reached.

use std::collections::{BTreeMap, HashMap, VecDeque};

use rust_decimal::Decimal;

/// Default number of prices retained per symbol.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Default number of symbols tracked before eviction.
pub const DEFAULT_MAX_SYMBOLS: usize = 10_000;

// =============================================================================
// Symbol State
// =============================================================================

/// Validation memory for a single symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolState {
    last_sequence: Option<u64>,
    price_history: VecDeque<Decimal>,
    history_capacity: usize,
}

impl SymbolState {
    /// Create an empty state with the given price history capacity.
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        let history_capacity = history_capacity.max(1);
        Self {
            last_sequence: None,
            price_history: VecDeque::with_capacity(history_capacity),
            history_capacity,
        }
    }

    /// Last sequence number observed for this symbol.
    #[must_use]
    pub const fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Most recently observed price.
    #[must_use]
    pub fn last_price(&self) -> Option<Decimal> {
        self.price_history.back().copied()
    }

    /// Price history, oldest first.
    #[must_use]
    pub const fn price_history(&self) -> &VecDeque<Decimal> {
        &self.price_history
    }

    /// Record an accepted observation.
    ///
    /// The sequence always replaces the previous one, gaps and regressions
    /// included. The price is appended and the oldest price is evicted once
    /// the history is full.
    pub fn observe(&mut self, sequence: u64, price: Decimal) {
        self.last_sequence = Some(sequence);
        if self.price_history.len() == self.history_capacity {
            self.price_history.pop_front();
        }
        self.price_history.push_back(price);
    }
}

// =============================================================================
// Symbol State Store
// =============================================================================

#[derive(Debug)]
struct Slot {
    state: SymbolState,
    last_touch: u64,
}

/// Symbol states with least-recently-used eviction.
///
/// Every `get_or_insert` marks the symbol as most recently used. When a new
/// symbol arrives at capacity, the symbol untouched for longest is dropped.
#[derive(Debug)]
pub struct SymbolStates {
    slots: HashMap<String, Slot>,
    recency: BTreeMap<u64, String>,
    clock: u64,
    max_symbols: usize,
    history_capacity: usize,
    evictions: u64,
}

impl SymbolStates {
    /// Create an empty store.
    #[must_use]
    pub fn new(max_symbols: usize, history_capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
            max_symbols: max_symbols.max(1),
            history_capacity,
            evictions: 0,
        }
    }

    /// Look up a symbol without touching its recency.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&SymbolState> {
        self.slots.get(symbol).map(|slot| &slot.state)
    }

    /// Get a symbol's state, creating it if needed, and mark it as used.
    pub fn get_or_insert(&mut self, symbol: &str) -> &mut SymbolState {
        self.clock += 1;
        let touch = self.clock;

        if !self.slots.contains_key(symbol) && self.slots.len() >= self.max_symbols {
            self.evict_oldest();
        }

        let history_capacity = self.history_capacity;
        let slot = self
            .slots
            .entry(symbol.to_string())
            .or_insert_with(|| Slot {
                state: SymbolState::new(history_capacity),
                last_touch: touch,
            });

        if slot.last_touch != touch {
            self.recency.remove(&slot.last_touch);
            slot.last_touch = touch;
        }
        self.recency.insert(touch, symbol.to_string());

        &mut slot.state
    }

    /// Number of tracked symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no symbols are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total symbols evicted since creation.
    #[must_use]
    pub const fn evictions(&self) -> u64 {
        self.evictions
    }

    fn evict_oldest(&mut self) {
        if let Some((_, symbol)) = self.recency.pop_first() {
            self.slots.remove(&symbol);
            self.evictions += 1;
            tracing::debug!(symbol = %symbol, "Evicted least recently used symbol state");
        }
    }
}
