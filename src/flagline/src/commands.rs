use anyhow::Context as _;
use chrono::Utc;
use flagline_analytics::MetricCatalogue;
use flagline_core::config::{AppConfig, StoreBackend};
use flagline_core::types::{
    Experiment, FeatureFlag, MetricDefinition, MetricSample, TargetingRule, TimeRange,
    UserSegment,
};
use flagline_core::value::Context;
use flagline_experiments::ExperimentEngine;
use flagline_flags::FlagService;
use flagline_store::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::Command;

/// Definitions accepted by `flagline import`.
#[derive(Debug, Default, Deserialize)]
struct ImportBundle {
    #[serde(default)]
    rules: Vec<TargetingRule>,
    #[serde(default)]
    segments: Vec<UserSegment>,
    #[serde(default)]
    experiments: Vec<Experiment>,
    #[serde(default)]
    flags: Vec<FeatureFlag>,
    #[serde(default)]
    metrics: Vec<MetricDefinition>,
}

#[derive(Debug, Serialize)]
struct ImportSummary {
    rules: usize,
    segments: usize,
    experiments: usize,
    flags: usize,
    metrics: usize,
}

#[derive(Debug, Serialize)]
struct AssignOutput<'a> {
    experiment: &'a str,
    user_id: &'a str,
    variant: Option<String>,
}

#[derive(Debug, Serialize)]
struct FlagOutput<'a> {
    key: &'a str,
    value: Option<serde_json::Value>,
}

/// Services sharing one store handle.
struct Services {
    engine: ExperimentEngine,
    flags: FlagService,
    catalogue: MetricCatalogue,
}

impl Services {
    fn new(store: Arc<dyn KvStore>, config: &AppConfig) -> Self {
        Self {
            engine: ExperimentEngine::new(store.clone()).with_results_config(&config.results),
            flags: FlagService::new(store.clone()),
            catalogue: MetricCatalogue::new(store),
        }
    }
}

/// Refuse the in-process store for commands whose state must survive the
/// process: each invocation would start from an empty keyspace.
pub fn ensure_backend(command: &Command, backend: StoreBackend) -> anyhow::Result<()> {
    if backend == StoreBackend::Memory && command.needs_persistent_store() {
        anyhow::bail!(
            "this command needs a persistent store; the memory backend is discarded when \
             the process exits. Use --backend redis or set FLAGLINE__STORE__BACKEND=redis"
        );
    }
    Ok(())
}

pub async fn run(command: Command, store: Arc<dyn KvStore>, config: &AppConfig) -> anyhow::Result<()> {
    let services = Services::new(store, config);
    let engine = &services.engine;

    match command {
        Command::Evaluate { rules, context } => {
            let rules: Vec<TargetingRule> = read_json(&rules)?;
            let context = parse_context(&context)?;
            let evaluations = engine.targeting().evaluate_rules(&rules, &context);
            print_json(&evaluations)
        }
        Command::Import { file } => {
            let bundle: ImportBundle = read_json(&file)?;
            let summary = import(&services, bundle).await?;
            info!(
                rules = summary.rules,
                segments = summary.segments,
                experiments = summary.experiments,
                flags = summary.flags,
                metrics = summary.metrics,
                "Import complete"
            );
            print_json(&summary)
        }
        Command::Assign {
            experiment,
            user_id,
            context,
        } => {
            let context = parse_context(&context)?;
            let variant = engine.assign_variant(&experiment, &user_id, &context).await?;
            print_json(&AssignOutput {
                experiment: &experiment,
                user_id: &user_id,
                variant,
            })
        }
        Command::Record {
            experiment,
            variant,
            metric,
            value,
        } => {
            engine
                .record_metric(&experiment, &variant, &metric, value)
                .await?;
            Ok(())
        }
        Command::Results { experiment } => {
            let results = engine.get_experiment_results(&experiment).await?;
            print_json(&results)
        }
        Command::Flag { key } => {
            let value = services.flags.flag_value(&key).await?;
            print_json(&FlagOutput { key: &key, value })
        }
        Command::Sample {
            metric,
            value,
            labels,
        } => {
            services
                .catalogue
                .record_sample(MetricSample {
                    metric_name: metric,
                    value,
                    labels: parse_labels(&labels)?,
                    timestamp: Utc::now(),
                })
                .await?;
            Ok(())
        }
        Command::Aggregate {
            metric,
            range,
            labels,
        } => {
            let aggregation = services
                .catalogue
                .aggregate_metric(&metric, parse_range(&range)?, None, None, parse_labels(&labels)?)
                .await?;
            print_json(&aggregation)
        }
    }
}

async fn import(services: &Services, bundle: ImportBundle) -> anyhow::Result<ImportSummary> {
    let summary = ImportSummary {
        rules: bundle.rules.len(),
        segments: bundle.segments.len(),
        experiments: bundle.experiments.len(),
        flags: bundle.flags.len(),
        metrics: bundle.metrics.len(),
    };
    let engine = &services.engine;
    for rule in bundle.rules {
        engine.targeting().create_rule(rule).await?;
    }
    for segment in bundle.segments {
        engine.targeting().create_segment(segment).await?;
    }
    for experiment in bundle.experiments {
        let name = experiment.name.clone();
        engine
            .experiments()
            .create_experiment(experiment)
            .await
            .with_context(|| format!("importing experiment '{name}'"))?;
    }
    for flag in bundle.flags {
        let key = flag.key.clone();
        services
            .flags
            .create_flag(flag)
            .await
            .with_context(|| format!("importing flag '{key}'"))?;
    }
    for metric in bundle.metrics {
        services.catalogue.create_metric(metric).await?;
    }
    Ok(summary)
}

fn parse_context(raw: &str) -> anyhow::Result<Context> {
    serde_json::from_str(raw).context("context must be a JSON object of strings, numbers, booleans or lists")
}

fn parse_labels(raw: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("label '{pair}' must look like key=value"))
        })
        .collect()
}

fn parse_range(raw: &str) -> anyhow::Result<TimeRange> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .with_context(|| format!("unknown time range '{raw}'"))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagline_core::value::AttributeValue;
    use flagline_store::MemoryStore;
    use std::path::PathBuf;

    #[test]
    fn test_parse_context() {
        let ctx = parse_context(r#"{"plan": "beta", "seats": 12}"#).unwrap();
        assert_eq!(ctx["plan"], AttributeValue::from("beta"));
        assert_eq!(ctx["seats"], AttributeValue::from(12i64));
        assert!(parse_context(r#"{"nested": {"a": 1}}"#).is_err());
        assert!(parse_context("[1, 2]").is_err());
    }

    #[test]
    fn test_parse_labels_and_range() {
        let labels = parse_labels(&["region=eu".to_string(), "tier=gold".to_string()]).unwrap();
        assert_eq!(labels["region"], "eu");
        assert_eq!(labels["tier"], "gold");
        assert!(parse_labels(&["region".to_string()]).is_err());

        assert_eq!(parse_range("week").unwrap(), TimeRange::Week);
        assert!(parse_range("fortnight").is_err());
    }

    #[test]
    fn test_memory_backend_only_serves_stateless_commands() {
        let evaluate = Command::Evaluate {
            rules: PathBuf::from("rules.json"),
            context: "{}".into(),
        };
        assert!(ensure_backend(&evaluate, StoreBackend::Memory).is_ok());

        let stateful = [
            Command::Import {
                file: PathBuf::from("bundle.json"),
            },
            Command::Assign {
                experiment: "checkout-button".into(),
                user_id: "user-42".into(),
                context: "{}".into(),
            },
            Command::Record {
                experiment: "checkout-button".into(),
                variant: "control".into(),
                metric: "clicked".into(),
                value: 1.0,
            },
            Command::Results {
                experiment: "checkout-button".into(),
            },
            Command::Flag {
                key: "dark-mode".into(),
            },
        ];
        for command in &stateful {
            let err = ensure_backend(command, StoreBackend::Memory).unwrap_err();
            assert!(err.to_string().contains("--backend redis"), "{command:?}");
            assert!(ensure_backend(command, StoreBackend::Redis).is_ok());
        }
    }

    #[tokio::test]
    async fn test_import_bundle() {
        let bundle: ImportBundle = serde_json::from_str(
            r#"{
                "rules": [
                    {"name": "beta-users",
                     "conditions": [{"attribute": "plan", "operator": "equals", "value": "beta"}]}
                ],
                "experiments": [
                    {"name": "checkout-button", "status": "running",
                     "targeting_rules": ["beta-users"], "metrics": ["clicked"],
                     "variants": [
                        {"name": "control", "type": "control", "weight": 1.0},
                        {"name": "green", "type": "treatment"}
                     ]}
                ],
                "flags": [
                    {"key": "dark-mode", "name": "Dark mode", "type": "boolean", "value": true}
                ],
                "metrics": [
                    {"name": "latency_ms", "type": "histogram", "labels": ["region"]}
                ]
            }"#,
        )
        .unwrap();

        let services = Services::new(Arc::new(MemoryStore::new()), &AppConfig::default());
        let summary = import(&services, bundle).await.unwrap();
        assert_eq!(summary.rules, 1);
        assert_eq!(summary.segments, 0);
        assert_eq!(summary.experiments, 1);
        assert_eq!(summary.flags, 1);
        assert_eq!(summary.metrics, 1);

        let beta = parse_context(r#"{"plan": "beta"}"#).unwrap();
        let variant = services
            .engine
            .assign_variant("checkout-button", "user-42", &beta)
            .await
            .unwrap();
        assert!(variant.is_some());
        assert_eq!(
            services.flags.flag_value("dark-mode").await.unwrap(),
            Some(serde_json::Value::Bool(true))
        );
        assert!(services.catalogue.get_metric("latency_ms").await.unwrap().is_some());
    }
}
