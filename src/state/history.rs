use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::ResultBundle;

/// Bounded time series of tracking cycles.
///
/// All series are index-aligned: entry `i` of every series belongs to
/// `timestamps[i]`. A game with no value for a cycle (failure, not yet
/// tracked, or no longer tracked) holds `None` at that index.
#[derive(Debug, Clone, Serialize)]
pub struct HistorySeries {
    pub timestamps: VecDeque<DateTime<Utc>>,
    pub total_profits: VecDeque<Decimal>,
    /// game URL → per-cycle profit, in order of first appearance
    pub game_profits: IndexMap<String, VecDeque<Option<Decimal>>>,
    #[serde(skip)]
    cap: usize,
}

impl HistorySeries {
    /// `cap` is clamped to at least 1.
    pub fn new(cap: usize) -> Self {
        Self {
            timestamps: VecDeque::new(),
            total_profits: VecDeque::new(),
            game_profits: IndexMap::new(),
            cap: cap.max(1),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Append one cycle, then trim every series from the front down to `cap`.
    pub fn record(&mut self, bundle: &ResultBundle, timestamp: DateTime<Utc>) {
        let prior_len = self.timestamps.len();
        self.timestamps.push_back(timestamp);
        self.total_profits.push_back(bundle.total_profit);

        for (url, outcome) in &bundle.results {
            self.game_profits
                .entry(url.clone())
                .or_insert_with(|| std::iter::repeat(None).take(prior_len).collect())
                .push_back(outcome.profit());
        }

        let len = self.timestamps.len();
        for series in self.game_profits.values_mut() {
            if series.len() < len {
                series.push_back(None);
            }
        }

        self.trim();
    }

    fn trim(&mut self) {
        let excess = self.timestamps.len().saturating_sub(self.cap);
        if excess == 0 {
            return;
        }
        self.timestamps.drain(..excess);
        self.total_profits.drain(..excess);
        for series in self.game_profits.values_mut() {
            let n = series.len().saturating_sub(self.cap);
            series.drain(..n);
        }
    }
}
