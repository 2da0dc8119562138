//! Turns polled snapshots of cumulative counters into rates and chart history.
//!
//! The sampler is plain state owned by its caller: it performs no I/O, never
//! fails, and is driven one snapshot at a time.

pub mod window;

use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

pub use window::{ChartPoint, NetworkWindow, RollingWindow, WINDOW_CAPACITY};

/// Per-interface baselines not refreshed for this long are forgotten.
pub const DEFAULT_INTERFACE_TTL_SECS: i64 = 600;

/// Cumulative byte counters of one network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCounters {
    pub name: String,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
}

impl InterfaceCounters {
    pub fn new(name: impl Into<String>, bytes_received_total: u64, bytes_sent_total: u64) -> Self {
        Self {
            name: name.into(),
            bytes_received_total,
            bytes_sent_total,
        }
    }
}

/// Metrics captured at one poll instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    /// Per-core utilization, 0-100
    pub cpu_percent_per_core: Vec<f64>,
    pub network_counters: Vec<InterfaceCounters>,
}

impl Snapshot {
    /// An empty snapshot; every derived value comes out as zero.
    #[cfg(test)]
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu_percent_per_core: Vec::new(),
            network_counters: Vec::new(),
        }
    }

    fn totals(&self) -> (u64, u64) {
        self.network_counters.iter().fold((0u64, 0u64), |(rx, tx), iface| {
            (
                rx.saturating_add(iface.bytes_received_total),
                tx.saturating_add(iface.bytes_sent_total),
            )
        })
    }
}

/// Throughput in bytes per second derived from two consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    pub timestamp: DateTime<Utc>,
    pub receive_rate: f64,
    pub transmit_rate: f64,
}

/// Rates of a single interface along with its raw totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRate {
    pub name: String,
    pub receive_rate: f64,
    pub transmit_rate: f64,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
}

impl InterfaceRate {
    pub fn combined(&self) -> f64 {
        self.receive_rate + self.transmit_rate
    }
}

/// Everything the presentation layer needs after one ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetrics {
    pub timestamp: DateTime<Utc>,
    pub cpu_average: f64,
    pub cpu_window: Vec<ChartPoint>,
    pub aggregate_receive_rate: f64,
    pub aggregate_transmit_rate: f64,
    pub receive_window: Vec<ChartPoint>,
    pub transmit_window: Vec<ChartPoint>,
    /// Sorted by combined rate, busiest first
    pub per_interface_rates: Vec<InterfaceRate>,
}

impl DerivedMetrics {
    pub fn aggregate(&self) -> RateSample {
        RateSample {
            timestamp: self.timestamp,
            receive_rate: self.aggregate_receive_rate,
            transmit_rate: self.aggregate_transmit_rate,
        }
    }
}

/// Whether a baseline exists yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    /// Nothing ingested; rates are reported as zero.
    Cold,
    /// At least one snapshot ingested. Permanent for the session.
    Warm,
}

#[derive(Debug, Clone, Copy)]
struct CounterTotals {
    received: u64,
    sent: u64,
    captured_at: DateTime<Utc>,
}

/// Session-scoped rate calculator and chart history.
#[derive(Debug)]
pub struct MetricsSampler {
    previous_aggregate: Option<CounterTotals>,
    previous_per_interface: HashMap<String, CounterTotals>,
    cpu_window: RollingWindow<ChartPoint>,
    network_window: NetworkWindow,
    interface_ttl: Duration,
    last_sequence: Option<u64>,
    samples_ingested: u64,
    regressions_observed: u64,
}

impl MetricsSampler {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            previous_aggregate: None,
            previous_per_interface: HashMap::new(),
            cpu_window: RollingWindow::new(capacity),
            network_window: NetworkWindow::new(capacity),
            interface_ttl: Duration::seconds(DEFAULT_INTERFACE_TTL_SECS),
            last_sequence: None,
            samples_ingested: 0,
            regressions_observed: 0,
        }
    }

    /// Change how long an interface may be absent before its baseline is dropped.
    pub fn with_interface_ttl(mut self, ttl: Duration) -> Self {
        self.interface_ttl = ttl;
        self
    }

    pub fn state(&self) -> SamplerState {
        if self.previous_aggregate.is_some() {
            SamplerState::Warm
        } else {
            SamplerState::Cold
        }
    }

    pub fn cpu_window(&self) -> &RollingWindow<ChartPoint> {
        &self.cpu_window
    }

    pub fn network_window(&self) -> &NetworkWindow {
        &self.network_window
    }

    pub fn samples_ingested(&self) -> u64 {
        self.samples_ingested
    }

    pub fn regressions_observed(&self) -> u64 {
        self.regressions_observed
    }

    /// Number of interfaces with a stored baseline.
    pub fn tracked_interfaces(&self) -> usize {
        self.previous_per_interface.len()
    }

    /// Ingest a snapshot tagged with its poll sequence number.
    ///
    /// Snapshots whose sequence is not newer than the last one accepted here
    /// are dropped and `None` is returned.
    pub fn ingest_in_order(&mut self, sequence: u64, snapshot: Snapshot) -> Option<DerivedMetrics> {
        if let Some(last) = self.last_sequence {
            if sequence <= last {
                debug!(sequence, last, "dropping out-of-order snapshot");
                return None;
            }
        }
        self.last_sequence = Some(sequence);
        Some(self.ingest(snapshot))
    }

    /// Fold one snapshot into the sampler state and derive rates from it.
    pub fn ingest(&mut self, snapshot: Snapshot) -> DerivedMetrics {
        let now = snapshot.timestamp;
        let label = chart_label(now);

        let cpu_average = mean(&snapshot.cpu_percent_per_core);
        self.cpu_window.push(ChartPoint::new(label.clone(), cpu_average));

        let (sum_rx, sum_tx) = snapshot.totals();
        let (receive_rate, transmit_rate) = match self.previous_aggregate {
            None => (0.0, 0.0),
            Some(prev) => {
                let elapsed = elapsed_secs(now, prev.captured_at);
                (
                    self.direction_rate("total", "receive", sum_rx, prev.received, elapsed),
                    self.direction_rate("total", "transmit", sum_tx, prev.sent, elapsed),
                )
            }
        };
        self.previous_aggregate = Some(CounterTotals {
            received: sum_rx,
            sent: sum_tx,
            captured_at: now,
        });
        self.network_window.push(&label, receive_rate, transmit_rate);

        let mut per_interface_rates = Vec::with_capacity(snapshot.network_counters.len());
        for iface in &snapshot.network_counters {
            let (rx, tx) = match self.previous_per_interface.get(&iface.name).copied() {
                None => (0.0, 0.0),
                Some(prev) => {
                    let elapsed = elapsed_secs(now, prev.captured_at);
                    (
                        self.direction_rate(&iface.name, "receive", iface.bytes_received_total, prev.received, elapsed),
                        self.direction_rate(&iface.name, "transmit", iface.bytes_sent_total, prev.sent, elapsed),
                    )
                }
            };
            self.previous_per_interface.insert(
                iface.name.clone(),
                CounterTotals {
                    received: iface.bytes_received_total,
                    sent: iface.bytes_sent_total,
                    captured_at: now,
                },
            );
            per_interface_rates.push(InterfaceRate {
                name: iface.name.clone(),
                receive_rate: rx,
                transmit_rate: tx,
                bytes_received_total: iface.bytes_received_total,
                bytes_sent_total: iface.bytes_sent_total,
            });
        }
        // sort_by is stable: equal rates keep snapshot order
        per_interface_rates.sort_by(|a, b| b.combined().total_cmp(&a.combined()));

        self.prune_interfaces(now);
        self.samples_ingested += 1;

        DerivedMetrics {
            timestamp: now,
            cpu_average,
            cpu_window: self.cpu_window.to_vec(),
            aggregate_receive_rate: receive_rate,
            aggregate_transmit_rate: transmit_rate,
            receive_window: self.network_window.receive().to_vec(),
            transmit_window: self.network_window.transmit().to_vec(),
            per_interface_rates,
        }
    }

    /// Rate for one direction, clamped to zero when the counter went backwards.
    fn direction_rate(
        &mut self,
        scope: &str,
        direction: &'static str,
        current: u64,
        previous: u64,
        elapsed_secs: f64,
    ) -> f64 {
        match current.checked_sub(previous) {
            Some(delta) => delta as f64 / elapsed_secs,
            None => {
                self.regressions_observed += 1;
                warn!(scope, direction, previous, current, "counter regression, reporting zero rate");
                0.0
            }
        }
    }

    fn prune_interfaces(&mut self, now: DateTime<Utc>) {
        // A TTL reaching past chrono's range keeps every baseline
        let Some(cutoff) = now.checked_sub_signed(self.interface_ttl) else {
            return;
        };
        let before = self.previous_per_interface.len();
        self.previous_per_interface
            .retain(|_, totals| totals.captured_at >= cutoff);
        let pruned = before - self.previous_per_interface.len();
        if pruned > 0 {
            debug!(pruned, "forgot stale interface baselines");
        }
    }
}

impl Default for MetricsSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Seconds between two captures, never less than one.
fn elapsed_secs(now: DateTime<Utc>, then: DateTime<Utc>) -> f64 {
    ((now - then).num_milliseconds() as f64 / 1000.0).max(1.0)
}

fn chart_label(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn at_ms(ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(ms)
    }

    fn snap(ms: i64, cores: &[f64], ifaces: &[(&str, u64, u64)]) -> Snapshot {
        Snapshot {
            timestamp: at_ms(ms),
            cpu_percent_per_core: cores.to_vec(),
            network_counters: ifaces
                .iter()
                .map(|(name, rx, tx)| InterfaceCounters::new(*name, *rx, *tx))
                .collect(),
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn first_snapshot_only_sets_baseline() {
        let mut sampler = MetricsSampler::new();
        assert_eq!(sampler.state(), SamplerState::Cold);

        let derived = sampler.ingest(snap(0, &[10.0], &[("eth0", 5_000, 7_000), ("wlan0", 1, 2)]));

        assert_eq!(derived.aggregate_receive_rate, 0.0);
        assert_eq!(derived.aggregate_transmit_rate, 0.0);
        assert!(derived
            .per_interface_rates
            .iter()
            .all(|r| r.receive_rate == 0.0 && r.transmit_rate == 0.0));
        assert_eq!(sampler.state(), SamplerState::Warm);
        assert_eq!(derived.receive_window.len(), 1);
    }

    #[test]
    fn rate_is_delta_over_elapsed_seconds() {
        let mut sampler = MetricsSampler::new();
        sampler.ingest(snap(0, &[], &[("eth0", 1_000, 2_000)]));
        let derived = sampler.ingest(snap(4_000, &[], &[("eth0", 9_000, 2_400)]));

        assert_close(derived.aggregate_receive_rate, 2_000.0);
        assert_close(derived.aggregate_transmit_rate, 100.0);
        assert_close(derived.per_interface_rates[0].receive_rate, 2_000.0);
        assert_close(derived.per_interface_rates[0].transmit_rate, 100.0);
    }

    #[test]
    fn aggregate_sums_every_interface() {
        let mut sampler = MetricsSampler::new();
        sampler.ingest(snap(0, &[], &[("a", 100, 0), ("b", 200, 0)]));
        let derived = sampler.ingest(snap(2_000, &[], &[("a", 300, 0), ("b", 400, 50)]));

        assert_close(derived.aggregate_receive_rate, 200.0);
        assert_close(derived.aggregate_transmit_rate, 25.0);
    }

    #[test]
    fn counter_regression_clamps_to_zero() {
        let mut sampler = MetricsSampler::new();
        sampler.ingest(snap(0, &[], &[("eth0", 50_000, 1_000)]));
        let derived = sampler.ingest(snap(2_000, &[], &[("eth0", 10, 3_000)]));

        assert_eq!(derived.aggregate_receive_rate, 0.0);
        assert_close(derived.aggregate_transmit_rate, 1_000.0);
        assert_eq!(derived.per_interface_rates[0].receive_rate, 0.0);
        // aggregate and interface each count once
        assert_eq!(sampler.regressions_observed(), 2);
    }

    #[test]
    fn baseline_moves_to_the_regressed_value() {
        let mut sampler = MetricsSampler::new();
        sampler.ingest(snap(0, &[], &[("eth0", 50_000, 0)]));
        sampler.ingest(snap(1_000, &[], &[("eth0", 100, 0)]));
        let derived = sampler.ingest(snap(2_000, &[], &[("eth0", 600, 0)]));

        assert_close(derived.aggregate_receive_rate, 500.0);
        assert_close(derived.per_interface_rates[0].receive_rate, 500.0);
    }

    #[test]
    fn cpu_window_keeps_last_sixty_means() {
        let mut sampler = MetricsSampler::new();
        for i in 0..100 {
            let v = i as f64;
            sampler.ingest(snap(i * 2_000, &[v, v + 2.0], &[]));
        }

        let values: Vec<f64> = sampler.cpu_window().iter().map(|p| p.value).collect();
        let expected: Vec<f64> = (40..100).map(|i| i as f64 + 1.0).collect();
        assert_eq!(sampler.cpu_window().len(), WINDOW_CAPACITY);
        assert_eq!(values, expected);
        assert_eq!(sampler.network_window().len(), WINDOW_CAPACITY);
        assert_eq!(sampler.samples_ingested(), 100);
    }

    #[test]
    fn empty_core_list_averages_to_zero() {
        let mut sampler = MetricsSampler::new();
        let derived = sampler.ingest(Snapshot::empty(t0()));

        assert_eq!(derived.cpu_average, 0.0);
        assert_eq!(derived.cpu_window.len(), 1);
        assert_eq!(derived.cpu_window[0].value, 0.0);
        assert!(derived.per_interface_rates.is_empty());
    }

    #[test]
    fn cpu_average_is_arithmetic_mean() {
        let mut sampler = MetricsSampler::new();
        let derived = sampler.ingest(snap(0, &[10.0, 20.0, 60.0], &[]));
        assert_close(derived.cpu_average, 30.0);
    }

    #[test]
    fn interfaces_sorted_by_combined_rate() {
        let mut sampler = MetricsSampler::new();
        sampler.ingest(snap(0, &[], &[("c", 0, 0), ("b", 0, 0), ("a", 0, 0)]));
        let derived = sampler.ingest(snap(1_000, &[], &[("c", 10, 10), ("b", 0, 50), ("a", 100, 0)]));

        let order: Vec<(&str, f64)> = derived
            .per_interface_rates
            .iter()
            .map(|r| (r.name.as_str(), r.combined()))
            .collect();
        assert_eq!(order, vec![("a", 100.0), ("b", 50.0), ("c", 20.0)]);
    }

    #[test]
    fn equal_rates_keep_snapshot_order() {
        let mut sampler = MetricsSampler::new();
        let derived = sampler.ingest(snap(0, &[], &[("lo", 1, 1), ("eth0", 2, 2), ("eth1", 3, 3)]));
        let names: Vec<&str> = derived.per_interface_rates.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["lo", "eth0", "eth1"]);
    }

    #[test]
    fn sub_second_polls_use_one_second_floor() {
        let mut sampler = MetricsSampler::new();
        sampler.ingest(snap(0, &[], &[("eth0", 0, 0)]));
        let derived = sampler.ingest(snap(500, &[], &[("eth0", 1_000, 400)]));

        assert_close(derived.aggregate_receive_rate, 1_000.0);
        assert_close(derived.aggregate_transmit_rate, 400.0);
    }

    #[test]
    fn clock_skew_backwards_uses_one_second_floor() {
        let mut sampler = MetricsSampler::new();
        sampler.ingest(snap(5_000, &[], &[("eth0", 0, 0)]));
        let derived = sampler.ingest(snap(1_000, &[], &[("eth0", 300, 0)]));

        assert_close(derived.aggregate_receive_rate, 300.0);
    }

    #[test]
    fn new_interface_starts_cold() {
        let mut sampler = MetricsSampler::new();
        sampler.ingest(snap(0, &[], &[("eth0", 0, 0)]));
        let derived = sampler.ingest(snap(1_000, &[], &[("eth0", 100, 0), ("tun0", 5_000, 5_000)]));

        let tun = derived
            .per_interface_rates
            .iter()
            .find(|r| r.name == "tun0")
            .unwrap();
        assert_eq!(tun.receive_rate, 0.0);
        assert_eq!(tun.transmit_rate, 0.0);
        assert_eq!(tun.bytes_received_total, 5_000);
    }

    #[test]
    fn huge_interface_ttl_never_prunes() {
        let ttl = Duration::try_seconds(10_000_000_000_000).unwrap();
        let mut sampler = MetricsSampler::new().with_interface_ttl(ttl);
        sampler.ingest(snap(0, &[], &[("eth0", 0, 0)]));
        sampler.ingest(Snapshot::empty(at_ms(86_400_000)));
        assert_eq!(sampler.tracked_interfaces(), 1);

        let derived = sampler.ingest(snap(86_402_000, &[], &[("eth0", 2_000, 0)]));
        assert!(derived.per_interface_rates[0].receive_rate > 0.0);
    }

    #[test]
    fn warm_state_survives_empty_snapshots() {
        let mut sampler = MetricsSampler::new();
        sampler.ingest(snap(0, &[], &[("eth0", 10, 10)]));
        sampler.ingest(Snapshot::empty(at_ms(1_000)));
        assert_eq!(sampler.state(), SamplerState::Warm);
    }

    #[test]
    fn out_of_order_snapshots_are_dropped() {
        let mut sampler = MetricsSampler::new();
        assert!(sampler.ingest_in_order(1, snap(0, &[], &[("eth0", 0, 0)])).is_some());
        assert!(sampler.ingest_in_order(3, snap(4_000, &[], &[("eth0", 4_000, 0)])).is_some());

        // response to poll 2 arrives late
        assert!(sampler.ingest_in_order(2, snap(2_000, &[], &[("eth0", 2_000, 0)])).is_none());
        assert!(sampler.ingest_in_order(3, snap(4_000, &[], &[("eth0", 4_000, 0)])).is_none());
        assert_eq!(sampler.samples_ingested(), 2);

        let derived = sampler
            .ingest_in_order(4, snap(6_000, &[], &[("eth0", 5_000, 0)]))
            .unwrap();
        assert_close(derived.aggregate_receive_rate, 500.0);
    }

    #[test]
    fn stale_interfaces_are_forgotten() {
        let mut sampler = MetricsSampler::new().with_interface_ttl(Duration::seconds(10));
        sampler.ingest(snap(0, &[], &[("eth0", 0, 0), ("usb0", 100, 100)]));
        assert_eq!(sampler.tracked_interfaces(), 2);

        sampler.ingest(snap(5_000, &[], &[("eth0", 10, 10)]));
        assert_eq!(sampler.tracked_interfaces(), 2);

        sampler.ingest(snap(11_000, &[], &[("eth0", 20, 20)]));
        assert_eq!(sampler.tracked_interfaces(), 1);

        // back after pruning: no baseline, so no rate
        let derived = sampler.ingest(snap(12_000, &[], &[("eth0", 30, 30), ("usb0", 900, 900)]));
        let usb = derived.per_interface_rates.iter().find(|r| r.name == "usb0").unwrap();
        assert_eq!(usb.combined(), 0.0);
    }
}
