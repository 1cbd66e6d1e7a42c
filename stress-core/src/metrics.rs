// stress-core/src/metrics.rs
// Named duration/count accumulators reduced to rates at teardown

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// How a metric is reduced, within an instance and across instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Σcount / Σduration within an instance, harmonic mean across instances
    HarmonicMean,
    /// Geometric mean of per-segment rates
    GeometricMean,
    /// Summed
    Total,
    /// Largest value
    Maximum,
}

impl Reduction {
    pub fn as_u8(self) -> u8 {
        match self {
            Reduction::HarmonicMean => 1,
            Reduction::GeometricMean => 2,
            Reduction::Total => 3,
            Reduction::Maximum => 4,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Reduction::HarmonicMean),
            2 => Some(Reduction::GeometricMean),
            3 => Some(Reduction::Total),
            4 => Some(Reduction::Maximum),
            _ => None,
        }
    }

    /// Combine per-instance values. Non-finite and, for means, non-positive
    /// values are ignored.
    pub fn combine(self, values: &[f64]) -> Option<f64> {
        let finite = values.iter().copied().filter(|v| v.is_finite());
        match self {
            Reduction::HarmonicMean => {
                let positive: Vec<f64> = finite.filter(|v| *v > 0.0).collect();
                if positive.is_empty() {
                    return None;
                }
                let inverse_sum: f64 = positive.iter().map(|v| 1.0 / v).sum();
                Some(positive.len() as f64 / inverse_sum)
            }
            Reduction::GeometricMean => geometric_mean(finite.filter(|v| *v > 0.0)),
            Reduction::Total => {
                let values: Vec<f64> = finite.collect();
                (!values.is_empty()).then(|| values.iter().sum())
            }
            Reduction::Maximum => finite.fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            }),
        }
    }
}

fn geometric_mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut log_sum = 0.0;
    let mut n = 0usize;
    for v in values {
        log_sum += v.ln();
        n += 1;
    }
    (n > 0).then(|| (log_sum / n as f64).exp())
}

/// Receiver for reduced metrics at teardown
pub trait MetricsSink {
    fn set_metric(&mut self, name: &str, value: f64, reduction: Reduction);
}

/// A reported metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub reduction: Reduction,
}

impl MetricsSink for Vec<Metric> {
    fn set_metric(&mut self, name: &str, value: f64, reduction: Reduction) {
        match self.iter_mut().find(|m| m.name == name) {
            Some(existing) => {
                existing.value = value;
                existing.reduction = reduction;
            }
            None => self.push(Metric {
                name: name.to_string(),
                value,
                reduction,
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct Accumulator {
    name: String,
    reduction: Reduction,
    duration: f64,
    count: f64,
    /// per-segment rates, kept only for geometric means
    rates: Vec<f64>,
    /// direct values for Total/Maximum
    value: Option<f64>,
}

/// Per-instance metric accumulators
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    accumulators: Vec<Accumulator>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, name: &str, reduction: Reduction) -> &mut Accumulator {
        let idx = match self.accumulators.iter().position(|a| a.name == name) {
            Some(idx) => idx,
            None => {
                self.accumulators.push(Accumulator {
                    name: name.to_string(),
                    reduction,
                    duration: 0.0,
                    count: 0.0,
                    rates: Vec::new(),
                    value: None,
                });
                self.accumulators.len() - 1
            }
        };
        &mut self.accumulators[idx]
    }

    /// Add one `(duration, count)` segment to a rate metric
    pub fn add(&mut self, name: &str, reduction: Reduction, duration: Duration, count: f64) {
        let secs = duration.as_secs_f64();
        let acc = self.slot(name, reduction);
        acc.duration += secs;
        acc.count += count;
        if reduction == Reduction::GeometricMean && secs > 0.0 && count > 0.0 {
            acc.rates.push(count / secs);
        }
    }

    /// Time `f` and account `count` units against `name`
    pub fn time<T>(&mut self, name: &str, reduction: Reduction, count: f64, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.add(name, reduction, start.elapsed(), count);
        out
    }

    /// Record a plain value for `Total` or `Maximum` metrics
    pub fn record(&mut self, name: &str, reduction: Reduction, value: f64) {
        let acc = self.slot(name, reduction);
        acc.value = Some(match (acc.value, reduction) {
            (Some(prev), Reduction::Maximum) => prev.max(value),
            (Some(prev), _) => prev + value,
            (None, _) => value,
        });
    }

    /// Reduced value for one metric
    pub fn value(&self, name: &str) -> Option<f64> {
        self.accumulators
            .iter()
            .find(|a| a.name == name)
            .and_then(Self::reduce)
    }

    fn reduce(acc: &Accumulator) -> Option<f64> {
        if let Some(value) = acc.value {
            return Some(value);
        }
        match acc.reduction {
            Reduction::GeometricMean => geometric_mean(acc.rates.iter().copied()),
            _ => (acc.duration > 0.0).then(|| acc.count / acc.duration),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// Publish every reduced metric into `sink`
    pub fn publish(&self, sink: &mut dyn MetricsSink) {
        for acc in &self.accumulators {
            match Self::reduce(acc) {
                Some(value) => sink.set_metric(&acc.name, value, acc.reduction),
                None => debug!("metric '{}' has no samples, not reported", acc.name),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harmonic_rate_is_total_over_total() {
        let mut metrics = Metrics::new();
        metrics.add("ops per sec", Reduction::HarmonicMean, Duration::from_secs(2), 100.0);
        metrics.add("ops per sec", Reduction::HarmonicMean, Duration::from_secs(4), 100.0);

        let value = metrics.value("ops per sec").unwrap();
        assert!((value - 200.0 / 6.0).abs() < 1e-9);
        // not the arithmetic mean of 50 and 25
        assert!((value - 37.5).abs() > 1.0);
    }

    #[test]
    fn test_geometric_rate() {
        let mut metrics = Metrics::new();
        metrics.add("rate", Reduction::GeometricMean, Duration::from_secs(1), 10.0);
        metrics.add("rate", Reduction::GeometricMean, Duration::from_secs(1), 1000.0);

        let value = metrics.value("rate").unwrap();
        assert!((value - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_time_accounts_closure() {
        let mut metrics = Metrics::new();
        let out = metrics.time("sleeps per sec", Reduction::HarmonicMean, 2.0, || {
            std::thread::sleep(Duration::from_millis(20));
            7
        });
        assert_eq!(out, 7);

        // two units over at least 20ms
        let value = metrics.value("sleeps per sec").unwrap();
        assert!(value > 0.0 && value <= 100.0, "rate {}", value);
    }

    #[test]
    fn test_record_total_and_max() {
        let mut metrics = Metrics::new();
        metrics.record("bytes", Reduction::Total, 10.0);
        metrics.record("bytes", Reduction::Total, 5.0);
        metrics.record("peak", Reduction::Maximum, 3.0);
        metrics.record("peak", Reduction::Maximum, 9.0);
        metrics.record("peak", Reduction::Maximum, 4.0);

        assert_eq!(metrics.value("bytes"), Some(15.0));
        assert_eq!(metrics.value("peak"), Some(9.0));
    }

    #[test]
    fn test_publish_skips_empty() {
        let mut metrics = Metrics::new();
        metrics.add("never", Reduction::HarmonicMean, Duration::ZERO, 0.0);
        metrics.add("rate", Reduction::HarmonicMean, Duration::from_millis(500), 50.0);

        let mut sink: Vec<Metric> = Vec::new();
        metrics.publish(&mut sink);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].name, "rate");
        assert!((sink[0].value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_cross_instance_combine() {
        let harmonic = Reduction::HarmonicMean.combine(&[100.0, 300.0]).unwrap();
        assert!((harmonic - 150.0).abs() < 1e-9);

        let geometric = Reduction::GeometricMean.combine(&[4.0, 9.0]).unwrap();
        assert!((geometric - 6.0).abs() < 1e-9);

        assert_eq!(Reduction::Total.combine(&[1.0, 2.0, 3.0]), Some(6.0));
        assert_eq!(Reduction::Maximum.combine(&[1.0, 7.0, 3.0]), Some(7.0));
        assert_eq!(Reduction::HarmonicMean.combine(&[]), None);
        assert_eq!(Reduction::Total.combine(&[f64::NAN]), None);
    }

    #[test]
    fn test_reduction_u8_round_trip() {
        for r in [
            Reduction::HarmonicMean,
            Reduction::GeometricMean,
            Reduction::Total,
            Reduction::Maximum,
        ] {
            assert_eq!(Reduction::from_u8(r.as_u8()), Some(r));
        }
        assert_eq!(Reduction::from_u8(0), None);
    }
}
