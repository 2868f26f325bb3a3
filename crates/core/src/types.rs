use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::value::AttributeValue;

// ─── Targeting ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    In,
    NotIn,
    Between,
    NotBetween,
}

/// One attribute comparison. Conditions inside a rule are AND-ed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingCondition {
    pub attribute: String,
    pub operator: Operator,
    pub value: AttributeValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TargetingCondition {
    pub fn new(
        attribute: impl Into<String>,
        operator: Operator,
        value: impl Into<AttributeValue>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            value: value.into(),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetingRule {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Vec<TargetingCondition>,
    /// Share of contexts admitted by the rollout gate, 0-100.
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl TargetingRule {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            conditions: Vec::new(),
            percentage: None,
            start_time: None,
            end_time: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_condition(mut self, condition: TargetingCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_percentage(mut self, percentage: f64) -> Self {
        self.percentage = Some(percentage);
        self
    }

    pub fn with_window(
        mut self,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    /// Attribute names of every condition, in declaration order.
    pub fn condition_attributes(&self) -> Vec<String> {
        self.conditions.iter().map(|c| c.attribute.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupOperator {
    And,
    Or,
}

/// A named combination of rules evaluated together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rules: Vec<TargetingRule>,
    pub operator: GroupOperator,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Outcome of evaluating one rule against one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule_name: String,
    pub result: bool,
    pub matched_conditions: Vec<String>,
    pub unmatched_conditions: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// A named attribute bag for labelling audiences. Not read by the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSegment {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl UserSegment {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ─── Experiments ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantType {
    Control,
    Treatment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    #[serde(rename = "type")]
    pub variant_type: VariantType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub configuration: HashMap<String, serde_json::Value>,
}

impl Variant {
    pub fn control(name: impl Into<String>, weight: f64) -> Self {
        Self::new(name, VariantType::Control, weight)
    }

    pub fn treatment(name: impl Into<String>, weight: f64) -> Self {
        Self::new(name, VariantType::Treatment, weight)
    }

    fn new(name: impl Into<String>, variant_type: VariantType, weight: f64) -> Self {
        Self {
            name: name.into(),
            variant_type,
            description: None,
            weight,
            configuration: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: ExperimentStatus,
    pub variants: Vec<Variant>,
    /// Names of targeting rules; a user qualifies when any of them matches.
    #[serde(default)]
    pub targeting_rules: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Maximum number of users to enrol.
    #[serde(default)]
    pub sample_size: Option<u64>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    pub fn new(name: impl Into<String>, variants: Vec<Variant>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            status: ExperimentStatus::Draft,
            variants,
            targeting_rules: Vec::new(),
            metrics: Vec::new(),
            start_time: None,
            end_time: None,
            sample_size: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ExperimentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_targeting_rules(mut self, rules: Vec<String>) -> Self {
        self.targeting_rules = rules;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<String>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_sample_size(mut self, sample_size: u64) -> Self {
        self.sample_size = Some(sample_size);
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentAssignment {
    pub experiment: String,
    pub user_id: String,
    pub variant: String,
    pub assigned_at: DateTime<Utc>,
}

/// One metric observation. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub experiment: String,
    pub variant: String,
    pub metric: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    /// Half-width of the confidence interval around `mean`.
    pub confidence_interval: f64,
    pub std_dev: f64,
    pub sample_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub experiment: String,
    pub variant: String,
    pub total_users: u64,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

// ─── Feature flags ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    Boolean,
    String,
    Number,
    Json,
}

impl FlagType {
    /// Whether `value` has the JSON shape this type declares. `Json` takes anything.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::Boolean => value.is_boolean(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Json => true,
        }
    }
}

/// A named, typed configuration value that can be switched off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub flag_type: FlagType,
    pub value: serde_json::Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl FeatureFlag {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        flag_type: FlagType,
        value: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            name: name.into(),
            description: None,
            flag_type,
            value,
            enabled: true,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Partial update: only the fields that are `Some` are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlagUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub flag_type: Option<FlagType>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

impl FeatureFlagUpdate {
    pub fn apply(self, flag: &mut FeatureFlag) {
        if let Some(name) = self.name {
            flag.name = name;
        }
        if let Some(description) = self.description {
            flag.description = Some(description);
        }
        if let Some(flag_type) = self.flag_type {
            flag.flag_type = flag_type;
        }
        if let Some(value) = self.value {
            flag.value = value;
        }
        if let Some(enabled) = self.enabled {
            flag.enabled = enabled;
        }
        if let Some(tags) = self.tags {
            flag.tags = tags;
        }
        if let Some(metadata) = self.metadata {
            flag.metadata = metadata;
        }
    }
}

// ─── Analytics ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

/// Catalogue entry describing a free-standing metric and its label names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            kind,
            description: None,
            labels: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One labelled sample of a catalogue metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    Hour,
    Day,
    Week,
    Month,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAggregation {
    pub metric_name: String,
    pub time_range: TimeRange,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub values: Vec<f64>,
    pub labels: BTreeMap<String, String>,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

fn default_true() -> bool {
    true
}
fn default_weight() -> f64 {
    1.0
}
fn default_status() -> ExperimentStatus {
    ExperimentStatus::Draft
}
