use flagline_core::config::ResultsConfig;
use flagline_store::KvStore;
use flagline_targeting::TargetingService;
use std::sync::Arc;

use crate::repository::ExperimentRepository;

/// Experimentation engine for A/B/n testing: sticky assignment, metric
/// recording and results. Holds nothing but a handle to the store, so any
/// number of engines (or processes) can serve the same experiments.
#[derive(Clone)]
pub struct ExperimentEngine {
    pub(crate) store: Arc<dyn KvStore>,
    pub(crate) experiments: ExperimentRepository,
    pub(crate) targeting: TargetingService,
    pub(crate) z_score: f64,
}

impl ExperimentEngine {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            experiments: ExperimentRepository::new(store.clone()),
            targeting: TargetingService::new(store.clone()),
            store,
            z_score: ResultsConfig::default().z_score,
        }
    }

    pub fn with_results_config(mut self, config: &ResultsConfig) -> Self {
        self.z_score = config.z_score;
        self
    }

    pub fn experiments(&self) -> &ExperimentRepository {
        &self.experiments
    }

    pub fn targeting(&self) -> &TargetingService {
        &self.targeting
    }
}
