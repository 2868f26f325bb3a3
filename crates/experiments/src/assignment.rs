//! Sticky variant assignment.
//!
//! Check-then-write is not atomic across processes. Two racing first-time
//! requests for the same user both derive the same variant from the pure
//! bucketing step, so whichever write lands last stores the same value.

use chrono::Utc;
use flagline_core::types::ExperimentAssignment;
use flagline_core::value::Context;
use flagline_core::FlagResult;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::engine::ExperimentEngine;
use crate::{bucketing, keys};

impl ExperimentEngine {
    /// Variant for `user_id` in `experiment_name`, or `None` when the
    /// experiment is missing, not running, full, or the context matches none
    /// of its targeting rules.
    ///
    /// A stored assignment is returned as-is, even if the experiment has been
    /// edited since it was written.
    pub async fn assign_variant(
        &self,
        experiment_name: &str,
        user_id: &str,
        context: &Context,
    ) -> FlagResult<Option<String>> {
        let Some(experiment) = self.experiments.get_experiment(experiment_name).await? else {
            debug!(experiment = %experiment_name, "Experiment not found");
            return Ok(None);
        };
        if !experiment.is_running() {
            debug!(experiment = %experiment_name, status = ?experiment.status, "Experiment not running");
            return Ok(None);
        }

        let sticky_key = keys::assignment(experiment_name, user_id);
        if let Some(variant) = self.store.get(&sticky_key).await? {
            metrics::counter!("assignment.sticky_hit").increment(1);
            return Ok(Some(variant));
        }

        if !experiment.targeting_rules.is_empty() {
            let evaluations = self
                .targeting
                .evaluate_rule_names(&experiment.targeting_rules, context)
                .await?;
            if !evaluations.iter().any(|e| e.result) {
                metrics::counter!("assignment.targeting_miss").increment(1);
                debug!(
                    experiment = %experiment_name,
                    user_id = %user_id,
                    rules = evaluations.len(),
                    "No targeting rule matched"
                );
                return Ok(None);
            }
        }

        if let Some(cap) = experiment.sample_size {
            let enrolled = self.assignment_count(experiment_name).await?;
            // A user already in the index (sticky write lost) is not a new enrolment.
            if enrolled >= cap
                && self.get_assignment(experiment_name, user_id).await?.is_none()
            {
                debug!(experiment = %experiment_name, enrolled, cap, "Sample size reached");
                return Ok(None);
            }
        }

        let variant = match bucketing::bucket_variant(
            &experiment.name,
            user_id,
            &experiment.variants,
        ) {
            Ok(variant) => variant.name.clone(),
            Err(e) => {
                warn!(experiment = %experiment_name, error = %e, "Cannot bucket user");
                return Err(e);
            }
        };

        let assignment = ExperimentAssignment {
            experiment: experiment_name.to_string(),
            user_id: user_id.to_string(),
            variant: variant.clone(),
            assigned_at: Utc::now(),
        };
        // Index record first, sticky key last: a failed sticky write is
        // repaired by the next call, which buckets the user identically.
        self.store
            .set_hash(
                &keys::assignment_index(experiment_name),
                &HashMap::from([(user_id.to_string(), serde_json::to_string(&assignment)?)]),
            )
            .await?;
        self.store.set(&sticky_key, &variant).await?;

        metrics::counter!("assignment.created").increment(1);
        info!(
            experiment = %experiment_name,
            user_id = %user_id,
            variant = %variant,
            "Variant assigned"
        );
        Ok(Some(variant))
    }

    /// The stored assignment for a user, if one exists. An unreadable record
    /// is logged and treated as absent, like in [`ExperimentRepository::assignments`].
    ///
    /// [`ExperimentRepository::assignments`]: crate::ExperimentRepository::assignments
    pub async fn get_assignment(
        &self,
        experiment_name: &str,
        user_id: &str,
    ) -> FlagResult<Option<ExperimentAssignment>> {
        let Some(fields) = self
            .store
            .get_hash(&keys::assignment_index(experiment_name))
            .await?
        else {
            return Ok(None);
        };
        let Some(raw) = fields.get(user_id) else {
            return Ok(None);
        };
        match serde_json::from_str(raw) {
            Ok(assignment) => Ok(Some(assignment)),
            Err(e) => {
                warn!(experiment = %experiment_name, user_id = %user_id, error = %e, "Skipping unreadable assignment record");
                Ok(None)
            }
        }
    }

    /// Number of users assigned so far.
    pub async fn assignment_count(&self, experiment_name: &str) -> FlagResult<u64> {
        self.store
            .hash_len(&keys::assignment_index(experiment_name))
            .await
    }
}
