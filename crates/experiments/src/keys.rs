//! Store key layout for the experiment namespace.

pub const EXPERIMENT_INDEX: &str = "experiments";

pub fn experiment(name: &str) -> String {
    format!("experiment:{name}")
}

/// String key holding the sticky variant for one user.
pub fn assignment(experiment: &str, user_id: &str) -> String {
    format!("experiment_assignment:{experiment}:{user_id}")
}

/// Hash of user id -> JSON assignment record, one per experiment.
pub fn assignment_index(experiment: &str) -> String {
    format!("experiment_assignments:{experiment}")
}

/// List of JSON observations for one (experiment, variant, metric).
pub fn observations(experiment: &str, variant: &str, metric: &str) -> String {
    format!("experiment_metrics:{experiment}:{variant}:{metric}")
}

/// Set of every observation list key written for an experiment.
pub fn observation_index(experiment: &str) -> String {
    format!("experiment_observation_keys:{experiment}")
}
