//! Metric observations and per-variant experiment results.

use chrono::{DateTime, Utc};
use flagline_core::types::{ExperimentResult, MetricSummary, MetricValue};
use flagline_core::{FlagError, FlagResult};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::engine::ExperimentEngine;
use crate::keys;

/// Inclusive time range used to restrict which observations count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Single-pass mean/variance (Welford).
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
}

impl MetricAccumulator {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Sample standard deviation; zero below two observations.
    pub fn std_dev(&self) -> f64 {
        if self.count > 1 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        }
    }

    /// Mean and confidence half-width `z * s / sqrt(n)`, `None` with no data.
    pub fn summary(&self, z_score: f64) -> Option<MetricSummary> {
        if self.count == 0 {
            return None;
        }
        let std_dev = self.std_dev();
        let confidence_interval = if self.count > 1 {
            z_score * std_dev / (self.count as f64).sqrt()
        } else {
            0.0
        };
        Some(MetricSummary {
            mean: self.mean,
            confidence_interval,
            std_dev,
            sample_size: self.count,
        })
    }
}

impl FromIterator<f64> for MetricAccumulator {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut acc = Self::default();
        for value in iter {
            acc.push(value);
        }
        acc
    }
}

impl ExperimentEngine {
    /// Append an observation stamped with the current time.
    pub async fn record_metric(
        &self,
        experiment: &str,
        variant: &str,
        metric: &str,
        value: f64,
    ) -> FlagResult<()> {
        self.record_observation(MetricValue {
            experiment: experiment.to_string(),
            variant: variant.to_string(),
            metric: metric.to_string(),
            value,
            timestamp: Utc::now(),
        })
        .await
    }

    /// Append an observation. No deduplication and no ordering guarantees
    /// between concurrent writers.
    pub async fn record_observation(&self, observation: MetricValue) -> FlagResult<()> {
        if !observation.value.is_finite() {
            return Err(FlagError::Validation(format!(
                "metric '{}' value {} is not a finite number",
                observation.metric, observation.value
            )));
        }
        let key = keys::observations(
            &observation.experiment,
            &observation.variant,
            &observation.metric,
        );
        self.store
            .list_push(&key, &serde_json::to_string(&observation)?)
            .await?;
        self.store
            .add_to_set(&keys::observation_index(&observation.experiment), &key)
            .await?;
        metrics::counter!("metrics.observation.recorded").increment(1);
        Ok(())
    }

    /// Results for every declared variant over all recorded observations.
    pub async fn get_experiment_results(
        &self,
        experiment_name: &str,
    ) -> FlagResult<Vec<ExperimentResult>> {
        self.get_experiment_results_in(experiment_name, None).await
    }

    /// Results restricted to observations inside `window`, when given.
    ///
    /// Recomputed from raw records on every call. A declared metric with no
    /// observations for a variant is left out of that variant's result.
    pub async fn get_experiment_results_in(
        &self,
        experiment_name: &str,
        window: Option<TimeWindow>,
    ) -> FlagResult<Vec<ExperimentResult>> {
        let Some(experiment) = self.experiments.get_experiment(experiment_name).await? else {
            return Ok(Vec::new());
        };

        let mut users_per_variant: HashMap<String, u64> = HashMap::new();
        for assignment in self.experiments.assignments(experiment_name).await? {
            *users_per_variant.entry(assignment.variant).or_default() += 1;
        }

        let (start_time, end_time) = match window {
            Some(w) => (w.start, w.end),
            None => (
                experiment.start_time.unwrap_or(experiment.created_at),
                experiment.end_time.unwrap_or_else(Utc::now),
            ),
        };

        let mut results = Vec::with_capacity(experiment.variants.len());
        for variant in &experiment.variants {
            let total_users = users_per_variant.get(&variant.name).copied().unwrap_or(0);
            let mut metrics = BTreeMap::new();

            // Observations only count for variants that have enrolled users.
            if total_users > 0 {
                for metric in &experiment.metrics {
                    let accumulator = self
                        .accumulate(experiment_name, &variant.name, metric, window)
                        .await?;
                    if let Some(summary) = accumulator.summary(self.z_score) {
                        metrics.insert(metric.clone(), summary);
                    }
                }
            }

            debug!(
                experiment = %experiment_name,
                variant = %variant.name,
                total_users,
                metrics = metrics.len(),
                "Variant results computed"
            );
            results.push(ExperimentResult {
                experiment: experiment_name.to_string(),
                variant: variant.name.clone(),
                total_users,
                metrics,
                start_time,
                end_time,
            });
        }
        Ok(results)
    }

    async fn accumulate(
        &self,
        experiment: &str,
        variant: &str,
        metric: &str,
        window: Option<TimeWindow>,
    ) -> FlagResult<MetricAccumulator> {
        let raw = self
            .store
            .list_range(&keys::observations(experiment, variant, metric), 0, -1)
            .await?;
        let mut accumulator = MetricAccumulator::default();
        for record in raw {
            let observation: MetricValue = match serde_json::from_str(&record) {
                Ok(observation) => observation,
                Err(e) => {
                    warn!(experiment, variant, metric, error = %e, "Skipping unreadable observation");
                    continue;
                }
            };
            if window.map_or(true, |w| w.contains(observation.timestamp)) {
                accumulator.push(observation.value);
            }
        }
        Ok(accumulator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_matches_textbook_statistics() {
        let acc: MetricAccumulator = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter().collect();
        let summary = acc.summary(1.96).unwrap();
        let expected_sd = (32.0f64 / 7.0).sqrt();
        assert_eq!(summary.sample_size, 8);
        assert!((summary.mean - 5.0).abs() < 1e-12);
        assert!((summary.std_dev - expected_sd).abs() < 1e-12);
        assert!((summary.confidence_interval - 1.96 * expected_sd / 8f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_single_observation_has_zero_interval() {
        let acc: MetricAccumulator = [42.5].into_iter().collect();
        let summary = acc.summary(1.96).unwrap();
        assert_eq!(summary.mean, 42.5);
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.confidence_interval, 0.0);
    }

    #[test]
    fn test_no_observations_no_summary() {
        assert!(MetricAccumulator::default().summary(1.96).is_none());
    }

    #[test]
    fn test_identical_values_are_exact() {
        let acc: MetricAccumulator = std::iter::repeat(1.0).take(3).collect();
        let summary = acc.summary(1.96).unwrap();
        assert_eq!(summary.mean, 1.0);
        assert_eq!(summary.confidence_interval, 0.0);
    }

    #[test]
    fn test_window_is_inclusive() {
        let start = Utc::now();
        let end = start + chrono::Duration::minutes(5);
        let window = TimeWindow::new(start, end);
        assert!(window.contains(start));
        assert!(window.contains(end));
        assert!(!window.contains(end + chrono::Duration::seconds(1)));
    }
}
