// networking/src/delay.rs

//! Per-peer latency statistics, adaptive timeouts, and partition risk
//! scoring (spec §4.D).

use crate::peer::PeerId;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

const DEFAULT_HISTORY_CAPACITY: usize = 100;
const DEFAULT_PREDICTION_WINDOW: usize = 10;
const DEFAULT_PARTITION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High = 1,
    Normal = 2,
    Low = 3,
}

struct PeerLatencyInfo {
    history: VecDeque<Duration>,
    min: Duration,
    max: Duration,
    last_updated: Instant,
}

impl PeerLatencyInfo {
    fn new(capacity: usize, sample: Duration, now: Instant) -> Self {
        let mut history = VecDeque::with_capacity(capacity);
        history.push_back(sample);
        Self {
            history,
            min: sample,
            max: sample,
            last_updated: now,
        }
    }

    fn record(&mut self, sample: Duration, capacity: usize, now: Instant) {
        self.history.push_back(sample);
        if self.history.len() > capacity {
            self.history.pop_front();
        }
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        self.last_updated = now;
    }

    fn avg(&self) -> Duration {
        if self.history.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.history.iter().sum();
        total / self.history.len() as u32
    }

    fn stdev(&self) -> f64 {
        let n = self.history.len();
        if n < 2 {
            return 0.0;
        }
        let avg = self.avg().as_secs_f64();
        let variance = self
            .history
            .iter()
            .map(|d| {
                let diff = d.as_secs_f64() - avg;
                diff * diff
            })
            .sum::<f64>()
            / n as f64;
        variance.sqrt()
    }

    /// `reliability = 1 / (1 + stdev/avg)`.
    fn reliability(&self) -> f64 {
        let avg = self.avg().as_secs_f64();
        if avg <= 0.0 {
            return 1.0;
        }
        1.0 / (1.0 + self.stdev() / avg)
    }

    /// Linear regression over the last `window` samples, clamped at zero.
    fn predict(&self, window: usize) -> Option<Duration> {
        if self.history.is_empty() {
            return None;
        }
        let n = self.history.len().min(window);
        let samples: Vec<f64> = self.history.iter().rev().take(n).map(|d| d.as_secs_f64()).collect();
        if samples.len() < 2 {
            return Some(self.history.back().copied().unwrap_or(Duration::ZERO));
        }
        // `samples` is newest-first; regress against index so index n-1 is oldest.
        let xs: Vec<f64> = (0..samples.len()).map(|i| i as f64).collect();
        let mean_x = xs.iter().sum::<f64>() / xs.len() as f64;
        let mean_y = samples.iter().sum::<f64>() / samples.len() as f64;
        let mut num = 0.0;
        let mut den = 0.0;
        for (x, y) in xs.iter().zip(samples.iter()) {
            num += (x - mean_x) * (y - mean_y);
            den += (x - mean_x).powi(2);
        }
        let slope = if den.abs() > f64::EPSILON { num / den } else { 0.0 };
        // Next sample corresponds to x = -1 in this newest-first indexing.
        let predicted = mean_y + slope * (-1.0 - mean_x);
        Some(Duration::from_secs_f64(predicted.max(0.0)))
    }
}

/// Per-peer latency tracking with adaptive timeout and partition-risk
/// scoring.
pub struct NetworkDelayHandler {
    inner: RwLock<HashMap<PeerId, PeerLatencyInfo>>,
    history_capacity: usize,
    prediction_window: usize,
    min_timeout: Duration,
    max_timeout: Duration,
    timeout_multiplier: f64,
    high_priority_factor: f64,
    partition_threshold: f64,
}

impl NetworkDelayHandler {
    pub fn new(min_timeout: Duration, max_timeout: Duration, timeout_multiplier: f64, high_priority_factor: f64) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            prediction_window: DEFAULT_PREDICTION_WINDOW,
            min_timeout,
            max_timeout,
            timeout_multiplier,
            high_priority_factor,
            partition_threshold: DEFAULT_PARTITION_THRESHOLD,
        }
    }

    pub fn record_sample(&self, id: PeerId, sample: Duration, now: Instant) {
        let mut inner = self.inner.write();
        inner
            .entry(id)
            .and_modify(|info| info.record(sample, self.history_capacity, now))
            .or_insert_with(|| PeerLatencyInfo::new(self.history_capacity, sample, now));
    }

    fn network_avg(inner: &HashMap<PeerId, PeerLatencyInfo>) -> Duration {
        if inner.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = inner.values().map(|i| i.avg()).sum();
        total / inner.len() as u32
    }

    /// `timeout = clamp(avg*multiplier + stdev, [min, max])`, tightened for
    /// high-priority peers.
    pub fn timeout_for(&self, id: &PeerId) -> Duration {
        let inner = self.inner.read();
        let Some(info) = inner.get(id) else {
            return self.min_timeout;
        };
        let avg = info.avg().as_secs_f64();
        let base = avg * self.timeout_multiplier + info.stdev();
        let mut timeout = Duration::from_secs_f64(base.max(0.0));
        if self.priority_locked(id, &inner) == Priority::High {
            timeout = timeout.mul_f64(self.high_priority_factor);
        }
        timeout.clamp(self.min_timeout, self.max_timeout)
    }

    pub fn predicted_latency(&self, id: &PeerId) -> Option<Duration> {
        self.inner.read().get(id).and_then(|info| info.predict(self.prediction_window))
    }

    pub fn reliability_for(&self, id: &PeerId) -> f64 {
        self.inner.read().get(id).map(|info| info.reliability()).unwrap_or(0.0)
    }

    pub fn priority_for(&self, id: &PeerId) -> Priority {
        let inner = self.inner.read();
        self.priority_locked(id, &inner)
    }

    /// (avg_ms, max_ms) across every tracked peer's latency history.
    pub fn network_latency_ms(&self) -> (f64, f64) {
        let inner = self.inner.read();
        if inner.is_empty() {
            return (0.0, 0.0);
        }
        let avg = Self::network_avg(&inner).as_secs_f64() * 1000.0;
        let max = inner.values().map(|i| i.max).max().unwrap_or(Duration::ZERO).as_secs_f64() * 1000.0;
        (avg, max)
    }

    fn priority_locked(&self, id: &PeerId, inner: &HashMap<PeerId, PeerLatencyInfo>) -> Priority {
        let Some(info) = inner.get(id) else {
            return Priority::Normal;
        };
        let avg = info.avg();
        let net_avg = Self::network_avg(inner);
        let reliability = info.reliability();
        if !net_avg.is_zero() && avg < net_avg / 2 && reliability > 0.8 {
            Priority::High
        } else if (!net_avg.is_zero() && avg > net_avg * 2) || reliability < 0.3 {
            Priority::Low
        } else {
            Priority::Normal
        }
    }

    /// Clusters current averages by proximity (threshold 20% of the
    /// median) and derives `risk = min(1, (clusters-1)*0.2 + max(0, gap/median - 1)*0.5)`.
    pub fn partition_risk(&self) -> f64 {
        let inner = self.inner.read();
        let mut avgs: Vec<f64> = inner.values().map(|i| i.avg().as_secs_f64()).collect();
        if avgs.len() < 2 {
            return 0.0;
        }
        avgs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = avgs[avgs.len() / 2];
        if median <= 0.0 {
            return 0.0;
        }
        let threshold = median * 0.2;

        let mut clusters = 1usize;
        let mut max_gap = 0.0f64;
        for pair in avgs.windows(2) {
            let gap = pair[1] - pair[0];
            if gap > threshold {
                clusters += 1;
                max_gap = max_gap.max(gap);
            }
        }
        let risk = (clusters - 1) as f64 * 0.2 + (max_gap / median - 1.0).max(0.0) * 0.5;
        risk.min(1.0)
    }

    pub fn is_partitioned(&self) -> bool {
        self.partition_risk() > self.partition_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sample_timeout_equals_avg_times_multiplier() {
        let handler = NetworkDelayHandler::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.5);
        let id = PeerId::random();
        let now = Instant::now();
        handler.record_sample(id, Duration::from_millis(500), now);

        let timeout = handler.timeout_for(&id);
        assert_eq!(timeout, Duration::from_secs(1)); // clamped up from 1s base*2=1s exactly at floor
    }

    #[test]
    fn test_unknown_peer_gets_min_timeout() {
        let handler = NetworkDelayHandler::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.5);
        assert_eq!(handler.timeout_for(&PeerId::random()), Duration::from_secs(1));
    }

    #[test]
    fn test_partition_risk_zero_with_uniform_latencies() {
        let handler = NetworkDelayHandler::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.5);
        let now = Instant::now();
        for _ in 0..3 {
            handler.record_sample(PeerId::random(), Duration::from_millis(100), now);
        }
        assert_eq!(handler.partition_risk(), 0.0);
    }

    #[test]
    fn test_partition_risk_nonzero_with_clustered_latencies() {
        let handler = NetworkDelayHandler::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.5);
        let now = Instant::now();
        handler.record_sample(PeerId::random(), Duration::from_millis(10), now);
        handler.record_sample(PeerId::random(), Duration::from_millis(15), now);
        handler.record_sample(PeerId::random(), Duration::from_millis(2000), now);

        assert!(handler.partition_risk() > 0.0);
    }
}
