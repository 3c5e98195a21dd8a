use crate::error::{ConfigError, SensorError};
use crate::reading::{AggregatedTemperature, SensorReading};
use crate::source::{SensorSource, TimedSource};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Readings older than this at poll time are discarded.
    pub max_reading_age: Duration,
    pub read_timeout: Duration,
    pub min_valid_sources: usize,
    /// Reported when nothing has ever been read successfully.
    pub sentinel_celsius: f64,
    pub plausible_range: RangeInclusive<f64>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_reading_age: Duration::from_secs(1),
            read_timeout: Duration::from_millis(250),
            min_valid_sources: 1,
            sentinel_celsius: 100.0,
            plausible_range: -40.0..=150.0,
        }
    }
}

/// Per-source outcome of the most recent poll.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceStatus {
    Contributed(f64),
    Rejected(SensorError),
    Stale,
}

/// Polls every registered source and reduces the survivors to one
/// control temperature (the hottest).
pub struct SensorAggregator {
    config: AggregatorConfig,
    sources: Vec<TimedSource>,
    last_good: Option<f64>,
    last_status: Vec<(String, SourceStatus)>,
}

impl SensorAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            sources: Vec::new(),
            last_good: None,
            last_status: Vec::new(),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Takes ownership of `source` and runs it on its own worker thread.
    pub fn register(&mut self, source: Box<dyn SensorSource>) -> Result<(), ConfigError> {
        let id = source.id().to_string();
        if self.sources.iter().any(|s| s.id() == id) {
            return Err(ConfigError::DuplicateSource { id });
        }
        let timed =
            TimedSource::spawn(source, self.config.read_timeout).map_err(|e| ConfigError::Spawn {
                name: format!("sensor-{id}"),
                reason: e.to_string(),
            })?;
        self.sources.push(timed);
        Ok(())
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.id())
    }

    pub fn last_known_good(&self) -> Option<f64> {
        self.last_good
    }

    pub fn last_status(&self) -> &[(String, SourceStatus)] {
        &self.last_status
    }

    /// Reads all sources concurrently and joins them against one deadline.
    pub fn poll(&mut self) -> AggregatedTemperature {
        let started = Instant::now();
        let deadline = started + self.config.read_timeout;
        let pending: Vec<_> = self.sources.iter().map(|s| s.request()).collect();
        let readings: Vec<SensorReading> = pending
            .into_iter()
            .map(|p| p.wait_until(deadline))
            .collect();
        self.reduce(readings, Instant::now())
    }

    /// Filters and reduces one batch of readings taken for the pass at `now`.
    pub fn reduce(&mut self, readings: Vec<SensorReading>, now: Instant) -> AggregatedTemperature {
        let mut hottest: Option<f64> = None;
        let mut contributing = BTreeSet::new();
        self.last_status.clear();

        for reading in readings {
            let status = self.classify(&reading, now);
            if let SourceStatus::Contributed(celsius) = status {
                hottest = Some(hottest.map_or(celsius, |h| h.max(celsius)));
                contributing.insert(reading.source_id().to_string());
            } else {
                log::debug!("source {} rejected: {:?}", reading.source_id(), status);
            }
            self.last_status
                .push((reading.source_id().to_string(), status));
        }

        let degraded = contributing.len() < self.config.min_valid_sources;
        match hottest {
            Some(value) => {
                self.last_good = Some(value);
                AggregatedTemperature {
                    value,
                    degraded,
                    contributing_sources: contributing,
                    retained: false,
                }
            }
            None => AggregatedTemperature {
                value: self.last_good.unwrap_or(self.config.sentinel_celsius),
                degraded: true,
                contributing_sources: contributing,
                retained: true,
            },
        }
    }

    fn classify(&self, reading: &SensorReading, now: Instant) -> SourceStatus {
        let Some(celsius) = reading.celsius() else {
            let fault = reading.fault().cloned().unwrap_or(SensorError::Unreadable {
                reason: "invalid reading".to_string(),
            });
            return SourceStatus::Rejected(fault);
        };
        if reading.is_stale(now, self.config.max_reading_age) {
            return SourceStatus::Stale;
        }
        if !self.config.plausible_range.contains(&celsius) {
            return SourceStatus::Rejected(SensorError::Implausible { celsius });
        }
        SourceStatus::Contributed(celsius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(min_valid_sources: usize) -> SensorAggregator {
        SensorAggregator::new(AggregatorConfig {
            min_valid_sources,
            ..AggregatorConfig::default()
        })
    }

    fn bad(id: &str, at: Instant) -> SensorReading {
        SensorReading::invalid(
            id,
            at,
            SensorError::Unreadable {
                reason: "unplugged".into(),
            },
        )
    }

    #[test]
    fn hottest_source_wins() {
        let now = Instant::now();
        let mut agg = aggregator(1);
        let out = agg.reduce(
            vec![
                SensorReading::valid("cpu", 48.0, now),
                SensorReading::valid("gpu", 71.5, now),
                SensorReading::valid("hdd", 39.0, now),
            ],
            now,
        );
        assert_eq!(out.value, 71.5);
        assert!(!out.degraded);
        assert_eq!(out.contributing_sources.len(), 3);
    }

    #[test]
    fn all_invalid_retains_last_known_good() {
        let now = Instant::now();
        let mut agg = aggregator(1);
        agg.reduce(vec![SensorReading::valid("cpu", 55.0, now)], now);

        let out = agg.reduce(vec![bad("cpu", now), bad("gpu", now)], now);
        assert!(out.degraded);
        assert!(out.retained);
        assert_eq!(out.value, 55.0);
        assert!(out.is_fully_degraded());
    }

    #[test]
    fn sentinel_before_first_good_reading() {
        let now = Instant::now();
        let mut agg = aggregator(1);
        let out = agg.reduce(vec![bad("cpu", now)], now);
        assert!(out.degraded);
        assert_eq!(out.value, AggregatorConfig::default().sentinel_celsius);
    }

    #[test]
    fn below_minimum_is_degraded_but_used() {
        let now = Instant::now();
        let mut agg = aggregator(2);
        let out = agg.reduce(
            vec![SensorReading::valid("cpu", 60.0, now), bad("gpu", now)],
            now,
        );
        assert!(out.degraded);
        assert!(!out.retained);
        assert_eq!(out.value, 60.0);
    }

    #[test]
    fn stale_and_implausible_readings_are_dropped() {
        let now = Instant::now();
        let old = now - Duration::from_secs(5);
        let mut agg = aggregator(1);
        let out = agg.reduce(
            vec![
                SensorReading::valid("stale", 90.0, old),
                SensorReading::valid("glitch", 400.0, now),
                SensorReading::valid("ok", 42.0, now),
            ],
            now,
        );
        assert_eq!(out.value, 42.0);
        assert_eq!(
            out.contributing_sources.into_iter().collect::<Vec<_>>(),
            vec!["ok".to_string()]
        );
        assert_eq!(agg.last_status()[0].1, SourceStatus::Stale);
        assert!(matches!(
            agg.last_status()[1].1,
            SourceStatus::Rejected(SensorError::Implausible { .. })
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut agg = aggregator(1);
        agg.register(Box::new(crate::source::SysfsSensor::new("cpu", "/nonexistent")))
            .unwrap();
        let err = agg
            .register(Box::new(crate::source::SysfsSensor::new("cpu", "/other")))
            .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateSource { id: "cpu".into() });
    }

    #[test]
    fn poll_reads_registered_sources() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("temp1_input");
        let b = dir.path().join("temp2_input");
        std::fs::write(&a, "41000").unwrap();
        std::fs::write(&b, "63250").unwrap();

        let mut agg = aggregator(2);
        agg.register(Box::new(crate::source::SysfsSensor::new("a", &a)))
            .unwrap();
        agg.register(Box::new(crate::source::SysfsSensor::new("b", &b)))
            .unwrap();
        let out = agg.poll();
        assert_eq!(out.value, 63.25);
        assert!(!out.degraded);
    }
}
