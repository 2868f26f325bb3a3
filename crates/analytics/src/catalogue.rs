//! Store-backed metric definitions and their sample lists.

use chrono::{DateTime, Utc};
use flagline_core::types::{MetricAggregation, MetricDefinition, MetricSample, TimeRange};
use flagline_core::{FlagError, FlagResult};
use flagline_store::codec::{decode_hash, encode_hash};
use flagline_store::KvStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::aggregate;

const METRIC_INDEX: &str = "metrics";

fn definition_key(name: &str) -> String {
    format!("metric:{name}")
}

fn samples_key(name: &str) -> String {
    format!("metric_values:{name}")
}

#[derive(Clone)]
pub struct MetricCatalogue {
    store: Arc<dyn KvStore>,
}

impl MetricCatalogue {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Store a definition, replacing any previous one with the same name.
    pub async fn create_metric(&self, metric: MetricDefinition) -> FlagResult<MetricDefinition> {
        if metric.name.is_empty() {
            return Err(FlagError::Validation("metric name must not be empty".into()));
        }
        self.store
            .set_hash(&definition_key(&metric.name), &encode_hash(&metric)?)
            .await?;
        self.store.add_to_set(METRIC_INDEX, &metric.name).await?;
        info!(metric = %metric.name, kind = ?metric.kind, "Metric defined");
        Ok(metric)
    }

    pub async fn get_metric(&self, name: &str) -> FlagResult<Option<MetricDefinition>> {
        match self.store.get_hash(&definition_key(name)).await? {
            Some(fields) => Ok(Some(decode_hash(fields)?)),
            None => Ok(None),
        }
    }

    /// All definitions, sorted by name.
    pub async fn list_metrics(&self) -> FlagResult<Vec<MetricDefinition>> {
        let mut names: Vec<String> = self
            .store
            .members_of(METRIC_INDEX)
            .await?
            .into_iter()
            .collect();
        names.sort();
        let mut metrics = Vec::with_capacity(names.len());
        for name in names {
            if let Some(metric) = self.get_metric(&name).await? {
                metrics.push(metric);
            }
        }
        Ok(metrics)
    }

    /// Append a sample. Samples are accepted whether or not the metric is defined.
    pub async fn record_sample(&self, sample: MetricSample) -> FlagResult<()> {
        if !sample.value.is_finite() {
            return Err(FlagError::Validation(format!(
                "metric '{}' value {} is not a finite number",
                sample.metric_name, sample.value
            )));
        }
        self.store
            .list_push(&samples_key(&sample.metric_name), &serde_json::to_string(&sample)?)
            .await?;
        metrics::counter!("analytics.sample.recorded").increment(1);
        Ok(())
    }

    /// Samples with `start <= timestamp <= end` whose labels include every
    /// pair in `labels`, oldest first.
    pub async fn metric_values(
        &self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        labels: &BTreeMap<String, String>,
    ) -> FlagResult<Vec<MetricSample>> {
        let raw = self.store.list_range(&samples_key(name), 0, -1).await?;
        let mut samples = Vec::new();
        for record in raw {
            let sample: MetricSample = match serde_json::from_str(&record) {
                Ok(sample) => sample,
                Err(e) => {
                    warn!(metric = %name, error = %e, "Skipping unreadable sample");
                    continue;
                }
            };
            let in_range = start <= sample.timestamp && sample.timestamp <= end;
            let labelled = labels
                .iter()
                .all(|(k, v)| sample.labels.get(k) == Some(v));
            if in_range && labelled {
                samples.push(sample);
            }
        }
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    /// Aggregate the samples of `name` over a range; see [`aggregate::resolve_window`]
    /// for how missing bounds are filled in.
    pub async fn aggregate_metric(
        &self,
        name: &str,
        time_range: TimeRange,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        labels: BTreeMap<String, String>,
    ) -> FlagResult<MetricAggregation> {
        let window = aggregate::resolve_window(time_range, start, end, Utc::now())?;
        let values: Vec<f64> = self
            .metric_values(name, window.0, window.1, &labels)
            .await?
            .into_iter()
            .map(|s| s.value)
            .collect();
        debug!(metric = %name, range = ?time_range, samples = values.len(), "Aggregating metric");
        Ok(aggregate::aggregate(name, time_range, window, labels, values))
    }
}
