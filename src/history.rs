use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::MetricsResult;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Window used for the improvement trend: the last N scores against the N before.
const TREND_WINDOW: usize = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub result: MetricsResult,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub count: usize,
    pub latest_score: Option<f64>,
    pub previous_score: Option<f64>,
    pub score_delta: Option<f64>,
    pub average_score: Option<f64>,
    pub max_score: Option<f64>,
    /// Percent change of the recent window's mean against the window before it.
    pub improvement_trend: Option<f64>,
    pub duration_ms: i64,
}

/// Bounded rolling buffer of metrics results. Every derived value is
/// recomputed from the current entries on request.
#[derive(Debug, Clone)]
pub struct HistoryAggregator {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryAggregator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    pub fn latest_score(&self) -> Option<f64> {
        self.latest().map(|entry| entry.result.overall_score())
    }

    pub fn previous_score(&self) -> Option<f64> {
        let len = self.entries.len();
        if len < 2 {
            return None;
        }
        self.entries
            .get(len - 2)
            .map(|entry| entry.result.overall_score())
    }

    pub fn score_delta(&self) -> Option<f64> {
        Some(self.latest_score()? - self.previous_score()?)
    }

    pub fn average_score(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let total: f64 = self.scores().sum();
        Some(total / self.entries.len() as f64)
    }

    pub fn max_score(&self) -> Option<f64> {
        self.scores().reduce(f64::max)
    }

    pub fn improvement_trend(&self) -> Option<f64> {
        let len = self.entries.len();
        if len < TREND_WINDOW * 2 {
            return None;
        }
        let scores: Vec<f64> = self.scores().skip(len - TREND_WINDOW * 2).collect();
        let (earlier, recent) = scores.split_at(TREND_WINDOW);
        let earlier_avg = earlier.iter().sum::<f64>() / TREND_WINDOW as f64;
        let recent_avg = recent.iter().sum::<f64>() / TREND_WINDOW as f64;
        if earlier_avg == 0.0 {
            return None;
        }
        Some((recent_avg - earlier_avg) / earlier_avg * 100.0)
    }

    /// Readings of one named joint angle, oldest first. Entries without that
    /// angle are skipped.
    pub fn angle_series(&self, angle: &str) -> Vec<f64> {
        self.entries
            .iter()
            .filter_map(|entry| entry.result.angles().get(angle).copied())
            .collect()
    }

    pub fn angle_names(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .flat_map(|entry| entry.result.angles().keys().cloned())
            .collect()
    }

    pub fn stats(&self) -> SessionStats {
        let duration_ms = match (self.entries.front(), self.entries.back()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds(),
            _ => 0,
        };

        SessionStats {
            count: self.entries.len(),
            latest_score: self.latest_score(),
            previous_score: self.previous_score(),
            score_delta: self.score_delta(),
            average_score: self.average_score(),
            max_score: self.max_score(),
            improvement_trend: self.improvement_trend(),
            duration_ms,
        }
    }

    fn scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|entry| entry.result.overall_score())
    }
}

impl Default for HistoryAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
