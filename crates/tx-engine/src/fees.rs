//! Tiered fee estimation from network congestion signals.

use chain_btc::transaction::estimate_vsize;
use chain_eth::transaction::{EthFee, TRANSFER_GAS_LIMIT};
use chain_sol::transaction::DEFAULT_TRANSFER_COMPUTE_UNITS;
use serde::{Deserialize, Serialize};

use crate::config::FeeConfig;
use crate::registry::{ChainSpec, Protocol};
use crate::types::{Chain, Priority};

/// Virtual bytes a block can hold.
const BLOCK_VSIZE: u64 = 1_000_000;

/// Raw congestion data reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeeSignal {
    /// `(sat/vB, vsize)` buckets, in any order.
    Mempool {
        histogram: Vec<(u64, u64)>,
        median_rate: u64,
    },
    /// Recent blocks, oldest first.
    EvmHistory {
        base_fees: Vec<u128>,
        priority_fees: Vec<u128>,
    },
    /// Recent per-operation prices (micro-lamports per CU, drops).
    PerOperation { recent_fees: Vec<u64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeRate {
    SatPerVbyte(u64),
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    GasPrice(u128),
    PerOperation(u64),
}

impl FeeRate {
    /// Highest price per unit this rate may pay; what tiers are ordered by.
    pub fn cost(&self) -> u128 {
        match *self {
            FeeRate::SatPerVbyte(rate) => rate as u128,
            FeeRate::Eip1559 { max_fee_per_gas, .. } => max_fee_per_gas,
            FeeRate::GasPrice(price) => price,
            FeeRate::PerOperation(fee) => fee as u128,
        }
    }

    pub fn to_eth_fee(&self) -> Option<EthFee> {
        match *self {
            FeeRate::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Some(EthFee::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }),
            FeeRate::GasPrice(gas_price) => Some(EthFee::Legacy { gas_price }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Congestion {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    pub priority: Priority,
    pub rate: FeeRate,
    /// vsize, gas, compute units, or operations.
    pub limit: u64,
    /// Expected time to inclusion, seconds.
    pub expected_secs: (u64, u64),
    pub congestion: Congestion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub chain: Chain,
    pub economy: FeeTier,
    pub standard: FeeTier,
    pub priority: FeeTier,
    /// Built from the static fallback because no usable signal was available.
    pub degraded: bool,
}

impl FeeEstimate {
    pub fn tier(&self, priority: Priority) -> &FeeTier {
        match priority {
            Priority::Economy => &self.economy,
            Priority::Standard => &self.standard,
            Priority::Priority => &self.priority,
        }
    }

    pub fn tiers(&self) -> [&FeeTier; 3] {
        [&self.economy, &self.standard, &self.priority]
    }
}

/// Blocks to inclusion per tier: economy, standard, priority.
const TARGET_BLOCKS: [(u64, u64); 3] = [(6, 12), (2, 6), (1, 2)];

#[derive(Debug, Clone, Default)]
pub struct FeeEstimator {
    config: FeeConfig,
}

impl FeeEstimator {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    /// Turn a provider signal into tiers. `None` (or an unusable signal)
    /// yields the degraded static estimate.
    pub fn estimate(&self, spec: &ChainSpec, signal: Option<&FeeSignal>) -> FeeEstimate {
        let rates = match (spec.protocol, signal) {
            (Protocol::Bitcoin, Some(FeeSignal::Mempool { histogram, median_rate })) => {
                self.mempool_rates(spec, histogram, *median_rate)
            }
            (Protocol::Evm, Some(FeeSignal::EvmHistory { base_fees, priority_fees })) => {
                self.evm_rates(spec, base_fees, priority_fees)
            }
            (Protocol::Solana | Protocol::Xrp, Some(FeeSignal::PerOperation { recent_fees })) => {
                self.per_operation_rates(spec, recent_fees)
            }
            _ => None,
        };

        match rates {
            Some((rates, congestion)) => self.tiers(spec, rates, congestion, false),
            None => {
                if signal.is_some() {
                    log::warn!("{}: fee signal unusable, using static fallback", spec.chain);
                }
                self.fallback(spec)
            }
        }
    }

    /// Static estimate: never zero, always marked degraded.
    pub fn fallback(&self, spec: &ChainSpec) -> FeeEstimate {
        let fee = self.config.fallback_for(spec).max(spec.min_fee);
        let rate = match spec.protocol {
            Protocol::Bitcoin => FeeRate::SatPerVbyte(fee),
            Protocol::Evm if spec.supports_eip1559 => FeeRate::Eip1559 {
                max_fee_per_gas: fee as u128,
                max_priority_fee_per_gas: spec.min_fee as u128,
            },
            Protocol::Evm => FeeRate::GasPrice(fee as u128),
            Protocol::Solana | Protocol::Xrp => FeeRate::PerOperation(fee),
        };
        self.tiers(spec, [rate; 3], Congestion::Medium, true)
    }

    fn tiers(
        &self,
        spec: &ChainSpec,
        rates: [FeeRate; 3],
        congestion: Congestion,
        degraded: bool,
    ) -> FeeEstimate {
        let limit = match spec.protocol {
            Protocol::Bitcoin => estimate_vsize(1, 2),
            Protocol::Evm => TRANSFER_GAS_LIMIT,
            Protocol::Solana => DEFAULT_TRANSFER_COMPUTE_UNITS as u64,
            Protocol::Xrp => 1,
        };
        let block_secs = (spec.block_time_ms / 1_000).max(1);
        let tier = |i: usize, priority: Priority| FeeTier {
            priority,
            rate: rates[i],
            limit,
            expected_secs: (TARGET_BLOCKS[i].0 * block_secs, TARGET_BLOCKS[i].1 * block_secs),
            congestion,
        };
        FeeEstimate {
            chain: spec.chain,
            economy: tier(0, Priority::Economy),
            standard: tier(1, Priority::Standard),
            priority: tier(2, Priority::Priority),
            degraded,
        }
    }

    fn cap(&self, min: u128, median: u128) -> u128 {
        (median.saturating_mul(self.config.cap_multiplier as u128)).max(min)
    }

    fn mempool_rates(
        &self,
        spec: &ChainSpec,
        histogram: &[(u64, u64)],
        median_rate: u64,
    ) -> Option<([FeeRate; 3], Congestion)> {
        if histogram.is_empty() && median_rate == 0 {
            return None;
        }
        let mut buckets = histogram.to_vec();
        buckets.sort_by(|a, b| b.0.cmp(&a.0));
        let total = buckets.iter().fold(0u64, |acc, (_, vsize)| acc.saturating_add(*vsize));

        // Rate needed to land within the first `blocks` blocks.
        let rate_for = |blocks: u64| {
            let mut depth = 0u64;
            for (rate, vsize) in &buckets {
                depth = depth.saturating_add(*vsize);
                if depth >= blocks.saturating_mul(BLOCK_VSIZE) {
                    return *rate;
                }
            }
            spec.min_fee
        };

        let min = spec.min_fee as u128;
        let median = if median_rate > 0 { median_rate } else { rate_for(2) };
        let cap = self.cap(min, median as u128);
        let clamp = |r: u64| FeeRate::SatPerVbyte((r as u128).clamp(min, cap) as u64);

        let raw = [rate_for(TARGET_BLOCKS[0].0), rate_for(TARGET_BLOCKS[1].0), rate_for(1).saturating_add(1)];
        let congestion = match total / BLOCK_VSIZE {
            0 => Congestion::Low,
            1..=3 => Congestion::Medium,
            _ => Congestion::High,
        };
        Some((monotonic([clamp(raw[0]), clamp(raw[1]), clamp(raw[2])]), congestion))
    }

    fn evm_rates(
        &self,
        spec: &ChainSpec,
        base_fees: &[u128],
        priority_fees: &[u128],
    ) -> Option<([FeeRate; 3], Congestion)> {
        let latest_base = *base_fees.last()?;
        if priority_fees.is_empty() {
            return None;
        }
        let base_median = percentile(base_fees, 50);
        let tips = [
            percentile(priority_fees, 25),
            percentile(priority_fees, 50),
            percentile(priority_fees, 90),
        ];

        let min = spec.min_fee as u128;
        let cap = self.cap(min, base_median.saturating_add(tips[1]));
        let rates = tips.map(|tip| {
            let tip = tip.clamp(min, cap);
            if spec.supports_eip1559 {
                FeeRate::Eip1559 {
                    max_fee_per_gas: latest_base.saturating_mul(2).saturating_add(tip).clamp(tip, cap.max(tip)),
                    max_priority_fee_per_gas: tip,
                }
            } else {
                FeeRate::GasPrice(latest_base.saturating_add(tip).clamp(min, cap))
            }
        });

        let congestion = if latest_base.saturating_mul(4) > base_median.saturating_mul(5) {
            Congestion::High
        } else if latest_base > base_median {
            Congestion::Medium
        } else {
            Congestion::Low
        };
        Some((monotonic(rates), congestion))
    }

    fn per_operation_rates(
        &self,
        spec: &ChainSpec,
        recent_fees: &[u64],
    ) -> Option<([FeeRate; 3], Congestion)> {
        if recent_fees.is_empty() {
            return None;
        }
        let fees: Vec<u128> = recent_fees.iter().map(|f| *f as u128).collect();
        let (p25, p50, p90) = (percentile(&fees, 25), percentile(&fees, 50), percentile(&fees, 90));

        let min = spec.min_fee as u128;
        let cap = self.cap(min, p50);
        let clamp = |f: u128| FeeRate::PerOperation(f.clamp(min, cap) as u64);

        let congestion = if p90 >= p50.max(1).saturating_mul(4) {
            Congestion::High
        } else if p90 >= p50.max(1).saturating_mul(2) {
            Congestion::Medium
        } else {
            Congestion::Low
        };
        Some((monotonic([clamp(p25), clamp(p50), clamp(p90)]), congestion))
    }
}

/// Nearest-rank percentile of an unsorted sample.
fn percentile(values: &[u128], pct: usize) -> u128 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let rank = (pct * sorted.len()).div_ceil(100).max(1);
    sorted[rank.min(sorted.len()) - 1]
}

/// Raise each tier to at least the tier below it.
fn monotonic(mut rates: [FeeRate; 3]) -> [FeeRate; 3] {
    for i in 1..rates.len() {
        rates[i] = match (rates[i - 1], rates[i]) {
            (FeeRate::SatPerVbyte(lo), FeeRate::SatPerVbyte(hi)) => FeeRate::SatPerVbyte(hi.max(lo)),
            (FeeRate::GasPrice(lo), FeeRate::GasPrice(hi)) => FeeRate::GasPrice(hi.max(lo)),
            (FeeRate::PerOperation(lo), FeeRate::PerOperation(hi)) => FeeRate::PerOperation(hi.max(lo)),
            (
                FeeRate::Eip1559 {
                    max_fee_per_gas: lo_fee,
                    max_priority_fee_per_gas: lo_tip,
                },
                FeeRate::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                },
            ) => FeeRate::Eip1559 {
                max_fee_per_gas: max_fee_per_gas.max(lo_fee),
                max_priority_fee_per_gas: max_priority_fee_per_gas.max(lo_tip),
            },
            (_, hi) => hi,
        };
    }
    rates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    fn spec(chain: Chain) -> ChainSpec {
        Registry::standard().get(chain).unwrap().clone()
    }

    fn assert_monotonic(estimate: &FeeEstimate) {
        let [e, s, p] = estimate.tiers();
        assert!(e.rate.cost() <= s.rate.cost(), "{estimate:?}");
        assert!(s.rate.cost() <= p.rate.cost(), "{estimate:?}");
    }

    #[test]
    fn percentile_nearest_rank() {
        let v = [5u128, 1, 4, 2, 3];
        assert_eq!(percentile(&v, 25), 2);
        assert_eq!(percentile(&v, 50), 3);
        assert_eq!(percentile(&v, 90), 5);
        assert_eq!(percentile(&[9], 25), 9);
    }

    #[test]
    fn mempool_tiers_follow_depth() {
        let estimator = FeeEstimator::default();
        let signal = FeeSignal::Mempool {
            histogram: vec![(50, 500_000), (30, 1_000_000), (12, 2_000_000), (4, 5_000_000)],
            median_rate: 12,
        };
        let est = estimator.estimate(&spec(Chain::Bitcoin), Some(&signal));
        assert!(!est.degraded);
        assert_eq!(est.priority.rate, FeeRate::SatPerVbyte(31));
        assert_eq!(est.standard.rate, FeeRate::SatPerVbyte(12));
        assert_eq!(est.economy.rate, FeeRate::SatPerVbyte(4));
        assert_eq!(est.priority.congestion, Congestion::High);
        assert_monotonic(&est);
    }

    #[test]
    fn empty_mempool_pays_min_relay() {
        let estimator = FeeEstimator::default();
        let signal = FeeSignal::Mempool {
            histogram: vec![(3, 10_000)],
            median_rate: 2,
        };
        let est = estimator.estimate(&spec(Chain::Bitcoin), Some(&signal));
        assert_eq!(est.economy.rate, FeeRate::SatPerVbyte(1));
        assert_eq!(est.standard.rate, FeeRate::SatPerVbyte(1));
        assert_eq!(est.priority.rate, FeeRate::SatPerVbyte(2));
        assert_eq!(est.economy.congestion, Congestion::Low);
    }

    #[test]
    fn outlier_is_capped_at_k_times_median() {
        let estimator = FeeEstimator::default();
        let signal = FeeSignal::Mempool {
            histogram: vec![(5_000, 2_000_000)],
            median_rate: 10,
        };
        let est = estimator.estimate(&spec(Chain::Bitcoin), Some(&signal));
        assert_eq!(est.priority.rate, FeeRate::SatPerVbyte(100));
    }

    #[test]
    fn oversized_buckets_saturate_instead_of_overflowing() {
        let estimator = FeeEstimator::default();
        let signal = FeeSignal::Mempool {
            histogram: vec![(50, u64::MAX), (10, 1_000)],
            median_rate: 0,
        };
        let est = estimator.estimate(&spec(Chain::Bitcoin), Some(&signal));
        assert!(!est.degraded);
        assert_eq!(est.economy.rate, FeeRate::SatPerVbyte(50));
        assert_eq!(est.priority.rate, FeeRate::SatPerVbyte(51));
        assert_eq!(est.priority.congestion, Congestion::High);

        let signal = FeeSignal::Mempool {
            histogram: vec![(u64::MAX, 2_000_000)],
            median_rate: 10,
        };
        let est = estimator.estimate(&spec(Chain::Bitcoin), Some(&signal));
        assert_eq!(est.priority.rate, FeeRate::SatPerVbyte(100));
    }

    #[test]
    fn extreme_base_fees_do_not_overflow() {
        let estimator = FeeEstimator::default();
        let signal = FeeSignal::EvmHistory {
            base_fees: vec![u128::MAX, u128::MAX],
            priority_fees: vec![u128::MAX],
        };
        for chain in [Chain::Ethereum, Chain::Bsc] {
            let est = estimator.estimate(&spec(chain), Some(&signal));
            assert!(!est.degraded);
            assert_monotonic(&est);
        }
    }

    #[test]
    fn eip1559_tiers() {
        let estimator = FeeEstimator::default();
        let gwei = 1_000_000_000u128;
        let signal = FeeSignal::EvmHistory {
            base_fees: vec![20 * gwei, 20 * gwei, 20 * gwei],
            priority_fees: vec![1 * gwei, 2 * gwei, 3 * gwei, 4 * gwei],
        };
        let est = estimator.estimate(&spec(Chain::Ethereum), Some(&signal));
        assert_eq!(
            est.standard.rate,
            FeeRate::Eip1559 {
                max_fee_per_gas: 42 * gwei,
                max_priority_fee_per_gas: 2 * gwei,
            }
        );
        assert_eq!(est.standard.limit, 21_000);
        assert_eq!(est.standard.congestion, Congestion::Low);
        assert_monotonic(&est);
    }

    #[test]
    fn legacy_chain_gets_gas_price() {
        let estimator = FeeEstimator::default();
        let gwei = 1_000_000_000u128;
        let signal = FeeSignal::EvmHistory {
            base_fees: vec![gwei],
            priority_fees: vec![gwei],
        };
        let est = estimator.estimate(&spec(Chain::Bsc), Some(&signal));
        assert_eq!(est.standard.rate, FeeRate::GasPrice(2 * gwei));
    }

    #[test]
    fn per_operation_tiers() {
        let estimator = FeeEstimator::default();
        let signal = FeeSignal::PerOperation {
            recent_fees: vec![10, 10, 12, 15, 40],
        };
        let est = estimator.estimate(&spec(Chain::Xrp), Some(&signal));
        assert_eq!(est.economy.rate, FeeRate::PerOperation(10));
        assert_eq!(est.standard.rate, FeeRate::PerOperation(12));
        assert_eq!(est.priority.rate, FeeRate::PerOperation(40));
        assert_eq!(est.priority.congestion, Congestion::Medium);
    }

    #[test]
    fn missing_signal_falls_back_without_zero() {
        let estimator = FeeEstimator::default();
        for chain in Chain::ALL {
            let est = estimator.estimate(&spec(chain), None);
            assert!(est.degraded, "{chain}");
            for tier in est.tiers() {
                assert!(tier.rate.cost() > 0, "{chain}");
            }
            assert_monotonic(&est);
        }
    }

    #[test]
    fn mismatched_signal_is_degraded() {
        let estimator = FeeEstimator::default();
        let signal = FeeSignal::PerOperation { recent_fees: vec![5] };
        let est = estimator.estimate(&spec(Chain::Bitcoin), Some(&signal));
        assert!(est.degraded);
        assert_eq!(est.standard.rate, FeeRate::SatPerVbyte(20));
    }

    #[test]
    fn configured_fallback_overrides_registry() {
        let mut config = FeeConfig::default();
        config.static_fallbacks.insert(Chain::Bitcoin, 7);
        let est = FeeEstimator::new(config).estimate(&spec(Chain::Bitcoin), None);
        assert_eq!(est.priority.rate, FeeRate::SatPerVbyte(7));
    }
}
