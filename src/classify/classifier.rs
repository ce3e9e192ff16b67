use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use log::debug;
use rayon::prelude::*;

use super::types::{AnalysisResult, SolRange, SolRangeBucket, TimeRange, WalletAggregate};
use crate::normalize::SwapEvent;

pub const DEFAULT_SHARD_SIZE: usize = 2048;

type WalletTotals = HashMap<String, WalletAggregate>;

/// Groups wallets into SOL volume buckets by their aggregate buy total.
#[derive(Debug, Clone, Copy)]
pub struct WalletClassifier {
    shard_size: usize,
}

impl Default for WalletClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletClassifier {
    pub fn new() -> Self {
        Self::with_shard_size(DEFAULT_SHARD_SIZE)
    }

    pub fn with_shard_size(shard_size: usize) -> Self {
        Self {
            shard_size: shard_size.max(1),
        }
    }

    pub fn classify(&self, token: &str, time_range: TimeRange, events: &[SwapEvent]) -> AnalysisResult {
        // Every shard has merged once this returns; bucketing reads only the merged map.
        let totals = self.aggregate(events, &time_range);
        let wallets: BTreeMap<String, WalletAggregate> = totals.into_iter().collect();

        let mut buckets = SolRange::ALL.map(SolRangeBucket::new);
        let mut total_buy_volume = 0.0;
        let mut total_sell_volume = 0.0;
        let mut unique_buyers = 0;
        let mut unique_sellers = 0;
        let mut event_count = 0;

        for (wallet, aggregate) in &wallets {
            event_count += aggregate.transaction_count;
            total_buy_volume += aggregate.total_buy_sol;
            total_sell_volume += aggregate.total_sell_sol;

            if aggregate.total_sell_sol > 0.0 {
                unique_sellers += 1;
            }
            if aggregate.total_buy_sol > 0.0 {
                unique_buyers += 1;
                let range = SolRange::for_amount(aggregate.total_buy_sol);
                buckets[range.index()].add_wallet(wallet, aggregate.total_buy_sol);
            }
        }

        debug!(
            "classified {} wallets from {} events for {} ({} buyers, {} sellers)",
            wallets.len(),
            event_count,
            token,
            unique_buyers,
            unique_sellers
        );

        AnalysisResult {
            token: token.to_string(),
            snapshot_time: Utc::now(),
            time_range,
            buckets,
            total_buy_volume,
            total_sell_volume,
            net_buy_volume: total_buy_volume - total_sell_volume,
            unique_buyers,
            unique_sellers,
            event_count,
            wallets,
        }
    }

    /// Per-wallet totals. Events are split into `shard_size` shards that are
    /// reduced in parallel and then summed; the merge does not depend on order.
    pub fn aggregate(&self, events: &[SwapEvent], time_range: &TimeRange) -> WalletTotals {
        events
            .par_chunks(self.shard_size)
            .map(|shard| reduce_shard(shard, time_range))
            .reduce(WalletTotals::new, |mut merged, partial| {
                merge_totals(&mut merged, partial);
                merged
            })
    }

    pub fn shard_size(&self) -> usize {
        self.shard_size
    }
}

fn reduce_shard(events: &[SwapEvent], time_range: &TimeRange) -> WalletTotals {
    let mut totals = WalletTotals::new();
    for event in events.iter().filter(|event| time_range.contains(event.timestamp)) {
        totals.entry(event.wallet.clone()).or_default().record(event);
    }
    totals
}

fn merge_totals(into: &mut WalletTotals, partial: WalletTotals) {
    for (wallet, aggregate) in partial {
        into.entry(wallet).or_default().merge(&aggregate);
    }
}
