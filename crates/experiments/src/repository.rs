//! Store-backed experiment definitions.

use chrono::Utc;
use flagline_core::types::{Experiment, ExperimentAssignment, ExperimentStatus};
use flagline_core::{FlagError, FlagResult};
use flagline_store::codec::{decode_hash, encode_hash};
use flagline_store::KvStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{bucketing, keys};

#[derive(Clone)]
pub struct ExperimentRepository {
    store: Arc<dyn KvStore>,
}

impl ExperimentRepository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Store a new experiment, replacing any definition under the same name.
    pub async fn create_experiment(&self, experiment: Experiment) -> FlagResult<Experiment> {
        validate(&experiment)?;
        self.store
            .set_hash(&keys::experiment(&experiment.name), &encode_hash(&experiment)?)
            .await?;
        self.store
            .add_to_set(keys::EXPERIMENT_INDEX, &experiment.name)
            .await?;
        info!(
            experiment = %experiment.name,
            variants = experiment.variants.len(),
            status = ?experiment.status,
            "Experiment created"
        );
        Ok(experiment)
    }

    pub async fn get_experiment(&self, name: &str) -> FlagResult<Option<Experiment>> {
        match self.store.get_hash(&keys::experiment(name)).await? {
            Some(fields) => Ok(Some(decode_hash(fields)?)),
            None => Ok(None),
        }
    }

    /// Replace an existing experiment. Past assignments are left untouched.
    pub async fn update_experiment(
        &self,
        name: &str,
        mut experiment: Experiment,
    ) -> FlagResult<Option<Experiment>> {
        let Some(existing) = self.get_experiment(name).await? else {
            return Ok(None);
        };
        experiment.name = name.to_string();
        validate(&experiment)?;
        experiment.created_at = existing.created_at;
        experiment.updated_at = Utc::now();
        self.store
            .set_hash(&keys::experiment(name), &encode_hash(&experiment)?)
            .await?;
        info!(experiment = %name, status = ?experiment.status, "Experiment updated");
        Ok(Some(experiment))
    }

    pub async fn set_status(
        &self,
        name: &str,
        status: ExperimentStatus,
    ) -> FlagResult<Option<Experiment>> {
        let Some(mut experiment) = self.get_experiment(name).await? else {
            return Ok(None);
        };
        experiment.status = status;
        self.update_experiment(name, experiment).await
    }

    /// Remove an experiment together with its assignments and observations.
    pub async fn delete_experiment(&self, name: &str) -> FlagResult<bool> {
        if !self.store.exists(&keys::experiment(name)).await? {
            return Ok(false);
        }

        let index = keys::assignment_index(name);
        let users = self.store.get_hash(&index).await?.unwrap_or_default();
        for user_id in users.keys() {
            self.store.delete(&keys::assignment(name, user_id)).await?;
        }
        self.store.delete(&index).await?;

        // Covers variants dropped by later edits and undeclared metrics too.
        let observation_index = keys::observation_index(name);
        for key in self.store.members_of(&observation_index).await? {
            self.store.delete(&key).await?;
        }
        self.store.delete(&observation_index).await?;

        self.store.delete(&keys::experiment(name)).await?;
        self.store.remove_from_set(keys::EXPERIMENT_INDEX, name).await?;
        info!(experiment = %name, assignments = users.len(), "Experiment deleted");
        Ok(true)
    }

    /// All experiments, sorted by name.
    pub async fn list_experiments(&self) -> FlagResult<Vec<Experiment>> {
        let mut names: Vec<String> = self
            .store
            .members_of(keys::EXPERIMENT_INDEX)
            .await?
            .into_iter()
            .collect();
        names.sort();
        let mut experiments = Vec::with_capacity(names.len());
        for name in names {
            if let Some(experiment) = self.get_experiment(&name).await? {
                experiments.push(experiment);
            }
        }
        Ok(experiments)
    }

    /// Every assignment recorded for an experiment.
    pub async fn assignments(&self, name: &str) -> FlagResult<Vec<ExperimentAssignment>> {
        let records = self
            .store
            .get_hash(&keys::assignment_index(name))
            .await?
            .unwrap_or_default();
        let mut assignments = Vec::with_capacity(records.len());
        for (user_id, raw) in records {
            match serde_json::from_str::<ExperimentAssignment>(&raw) {
                Ok(assignment) => assignments.push(assignment),
                Err(e) => {
                    warn!(experiment = %name, user_id = %user_id, error = %e, "Skipping unreadable assignment record");
                }
            }
        }
        Ok(assignments)
    }
}

fn validate(experiment: &Experiment) -> FlagResult<()> {
    if experiment.name.is_empty() {
        return Err(FlagError::Validation("experiment name must not be empty".into()));
    }
    bucketing::total_weight(&experiment.name, &experiment.variants)?;

    let mut seen = HashSet::new();
    for variant in &experiment.variants {
        if !seen.insert(variant.name.as_str()) {
            return Err(FlagError::Configuration(format!(
                "experiment '{}' declares variant '{}' twice",
                experiment.name, variant.name
            )));
        }
    }
    if experiment.sample_size == Some(0) {
        return Err(FlagError::Validation(format!(
            "experiment '{}' sample_size must be positive",
            experiment.name
        )));
    }
    Ok(())
}
