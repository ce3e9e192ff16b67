use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::{SwapDirection, SwapEvent};

/// Fixed SOL volume ranges. The last one is open ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SolRange {
    #[serde(rename = "0_1")]
    UnderOne,
    #[serde(rename = "1_5")]
    OneToFive,
    #[serde(rename = "5_10")]
    FiveToTen,
    #[serde(rename = "10_plus")]
    TenPlus,
}

impl SolRange {
    pub const ALL: [SolRange; 4] = [
        SolRange::UnderOne,
        SolRange::OneToFive,
        SolRange::FiveToTen,
        SolRange::TenPlus,
    ];

    /// Lower bound inclusive, upper bound exclusive.
    pub fn bounds(&self) -> (f64, Option<f64>) {
        match self {
            SolRange::UnderOne => (0.0, Some(1.0)),
            SolRange::OneToFive => (1.0, Some(5.0)),
            SolRange::FiveToTen => (5.0, Some(10.0)),
            SolRange::TenPlus => (10.0, None),
        }
    }

    pub fn for_amount(sol: f64) -> SolRange {
        SolRange::ALL
            .into_iter()
            .find(|range| match range.bounds() {
                (_, Some(upper)) => sol < upper,
                (_, None) => true,
            })
            .unwrap_or(SolRange::TenPlus)
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SolRange::UnderOne => "0_1",
            SolRange::OneToFive => "1_5",
            SolRange::FiveToTen => "5_10",
            SolRange::TenPlus => "10_plus",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolRangeBucket {
    pub range: SolRange,
    pub count: usize,
    pub total_sol: f64,
    pub wallets: BTreeSet<String>,
}

impl SolRangeBucket {
    pub fn new(range: SolRange) -> Self {
        Self {
            range,
            count: 0,
            total_sol: 0.0,
            wallets: BTreeSet::new(),
        }
    }

    pub(crate) fn add_wallet(&mut self, wallet: &str, total_buy_sol: f64) {
        if self.wallets.insert(wallet.to_string()) {
            self.count += 1;
            self.total_sol += total_buy_sol;
        }
    }
}

/// Running per-wallet totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletAggregate {
    pub total_buy_sol: f64,
    pub total_sell_sol: f64,
    pub transaction_count: usize,
}

impl WalletAggregate {
    pub fn net_position(&self) -> f64 {
        self.total_buy_sol - self.total_sell_sol
    }

    pub fn record(&mut self, event: &SwapEvent) {
        match event.direction {
            SwapDirection::Buy => self.total_buy_sol += event.amount_sol,
            SwapDirection::Sell => self.total_sell_sol += event.amount_sol,
        }
        self.transaction_count += 1;
    }

    pub fn merge(&mut self, other: &WalletAggregate) {
        self.total_buy_sol += other.total_buy_sol;
        self.total_sell_sol += other.total_sell_sol;
        self.transaction_count += other.transaction_count;
    }
}

/// Inclusive analysis window; an open side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| timestamp >= start) && self.end.map_or(true, |end| timestamp <= end)
    }

    pub fn is_valid(&self) -> bool {
        match (self.start, self.end) {
            (Some(start), Some(end)) => start <= end,
            _ => true,
        }
    }
}

/// Completed snapshot of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub token: String,
    pub snapshot_time: DateTime<Utc>,
    pub time_range: TimeRange,
    pub buckets: [SolRangeBucket; 4],
    pub total_buy_volume: f64,
    pub total_sell_volume: f64,
    pub net_buy_volume: f64,
    pub unique_buyers: usize,
    pub unique_sellers: usize,
    pub event_count: usize,
    pub wallets: BTreeMap<String, WalletAggregate>,
}

impl AnalysisResult {
    pub fn bucket(&self, range: SolRange) -> &SolRangeBucket {
        &self.buckets[range.index()]
    }

    /// The range a wallet was bucketed into, if it bought anything.
    pub fn bucket_of(&self, wallet: &str) -> Option<SolRange> {
        self.buckets
            .iter()
            .find(|bucket| bucket.wallets.contains(wallet))
            .map(|bucket| bucket.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sol_range_boundaries() {
        assert_eq!(SolRange::for_amount(0.0), SolRange::UnderOne);
        assert_eq!(SolRange::for_amount(0.999), SolRange::UnderOne);
        assert_eq!(SolRange::for_amount(1.0), SolRange::OneToFive);
        assert_eq!(SolRange::for_amount(4.99), SolRange::OneToFive);
        assert_eq!(SolRange::for_amount(5.0), SolRange::FiveToTen);
        assert_eq!(SolRange::for_amount(10.0), SolRange::TenPlus);
        assert_eq!(SolRange::for_amount(1_000_000.0), SolRange::TenPlus);
    }

    #[test]
    fn test_ranges_are_ordered_and_indexed() {
        for (i, range) in SolRange::ALL.iter().enumerate() {
            assert_eq!(range.index(), i);
        }
        assert_eq!(serde_json::to_string(&SolRange::TenPlus).unwrap(), "\"10_plus\"");
    }

    #[test]
    fn test_time_range_is_inclusive() {
        let start = DateTime::from_timestamp(100, 0).unwrap();
        let end = DateTime::from_timestamp(200, 0).unwrap();
        let range = TimeRange::new(Some(start), Some(end));

        assert!(range.contains(start));
        assert!(range.contains(end));
        assert!(!range.contains(DateTime::from_timestamp(201, 0).unwrap()));
        assert!(TimeRange::unbounded().contains(DateTime::from_timestamp(0, 0).unwrap()));
        assert!(!TimeRange::new(Some(end), Some(start)).is_valid());
    }
}
