//! Store-backed CRUD for targeting rules and user segments.

use chrono::Utc;
use flagline_core::types::{RuleEvaluation, TargetingRule, UserSegment};
use flagline_core::value::Context;
use flagline_core::{FlagError, FlagResult};
use flagline_store::codec::{decode_hash, encode_hash};
use flagline_store::KvStore;
use std::sync::Arc;
use tracing::info;

use crate::engine;

const RULE_INDEX: &str = "rules";
const SEGMENT_INDEX: &str = "segments";

fn rule_key(name: &str) -> String {
    format!("rule:{name}")
}

fn segment_key(name: &str) -> String {
    format!("segment:{name}")
}

/// Rules and segments keyed by name, plus an index set per kind.
#[derive(Clone)]
pub struct TargetingService {
    store: Arc<dyn KvStore>,
}

impl TargetingService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    // ─── Rules ──────────────────────────────────────────────────────────────

    pub async fn create_rule(&self, rule: TargetingRule) -> FlagResult<TargetingRule> {
        validate_rule(&rule)?;
        self.store
            .set_hash(&rule_key(&rule.name), &encode_hash(&rule)?)
            .await?;
        self.store.add_to_set(RULE_INDEX, &rule.name).await?;
        info!(rule = %rule.name, conditions = rule.conditions.len(), "Targeting rule created");
        Ok(rule)
    }

    pub async fn get_rule(&self, name: &str) -> FlagResult<Option<TargetingRule>> {
        match self.store.get_hash(&rule_key(name)).await? {
            Some(fields) => Ok(Some(decode_hash(fields)?)),
            None => Ok(None),
        }
    }

    /// Replace the rule stored under `name`. `None` if there is no such rule.
    pub async fn update_rule(
        &self,
        name: &str,
        mut rule: TargetingRule,
    ) -> FlagResult<Option<TargetingRule>> {
        let Some(existing) = self.get_rule(name).await? else {
            return Ok(None);
        };
        validate_rule(&rule)?;
        rule.name = name.to_string();
        rule.created_at = existing.created_at;
        rule.updated_at = Utc::now();
        self.store
            .set_hash(&rule_key(name), &encode_hash(&rule)?)
            .await?;
        info!(rule = %name, "Targeting rule updated");
        Ok(Some(rule))
    }

    pub async fn delete_rule(&self, name: &str) -> FlagResult<bool> {
        let key = rule_key(name);
        if !self.store.exists(&key).await? {
            return Ok(false);
        }
        self.store.delete(&key).await?;
        self.store.remove_from_set(RULE_INDEX, name).await?;
        info!(rule = %name, "Targeting rule deleted");
        Ok(true)
    }

    /// All rules, sorted by name. Index entries whose hash is gone are skipped.
    pub async fn list_rules(&self) -> FlagResult<Vec<TargetingRule>> {
        let mut names: Vec<String> = self.store.members_of(RULE_INDEX).await?.into_iter().collect();
        names.sort();
        let mut rules = Vec::with_capacity(names.len());
        for name in names {
            if let Some(rule) = self.get_rule(&name).await? {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    /// Evaluate a list of rules.
    pub fn evaluate_rules(&self, rules: &[TargetingRule], context: &Context) -> Vec<RuleEvaluation> {
        engine::evaluate_rules(rules, context)
    }

    /// Resolve rules by name and evaluate them in the given order.
    /// Names with no stored rule are skipped.
    pub async fn evaluate_rule_names(
        &self,
        names: &[String],
        context: &Context,
    ) -> FlagResult<Vec<RuleEvaluation>> {
        let mut rules = Vec::with_capacity(names.len());
        for name in names {
            if let Some(rule) = self.get_rule(name).await? {
                rules.push(rule);
            }
        }
        Ok(engine::evaluate_rules(&rules, context))
    }

    // ─── Segments ───────────────────────────────────────────────────────────

    pub async fn create_segment(&self, segment: UserSegment) -> FlagResult<UserSegment> {
        self.store
            .set_hash(&segment_key(&segment.name), &encode_hash(&segment)?)
            .await?;
        self.store.add_to_set(SEGMENT_INDEX, &segment.name).await?;
        info!(segment = %segment.name, "User segment created");
        Ok(segment)
    }

    pub async fn get_segment(&self, name: &str) -> FlagResult<Option<UserSegment>> {
        match self.store.get_hash(&segment_key(name)).await? {
            Some(fields) => Ok(Some(decode_hash(fields)?)),
            None => Ok(None),
        }
    }

    pub async fn update_segment(
        &self,
        name: &str,
        mut segment: UserSegment,
    ) -> FlagResult<Option<UserSegment>> {
        let Some(existing) = self.get_segment(name).await? else {
            return Ok(None);
        };
        segment.name = name.to_string();
        segment.created_at = existing.created_at;
        segment.updated_at = Utc::now();
        self.store
            .set_hash(&segment_key(name), &encode_hash(&segment)?)
            .await?;
        Ok(Some(segment))
    }

    pub async fn delete_segment(&self, name: &str) -> FlagResult<bool> {
        let key = segment_key(name);
        if !self.store.exists(&key).await? {
            return Ok(false);
        }
        self.store.delete(&key).await?;
        self.store.remove_from_set(SEGMENT_INDEX, name).await?;
        info!(segment = %name, "User segment deleted");
        Ok(true)
    }

    pub async fn list_segments(&self) -> FlagResult<Vec<UserSegment>> {
        let mut names: Vec<String> = self
            .store
            .members_of(SEGMENT_INDEX)
            .await?
            .into_iter()
            .collect();
        names.sort();
        let mut segments = Vec::with_capacity(names.len());
        for name in names {
            if let Some(segment) = self.get_segment(&name).await? {
                segments.push(segment);
            }
        }
        Ok(segments)
    }
}

fn validate_rule(rule: &TargetingRule) -> FlagResult<()> {
    if rule.name.is_empty() {
        return Err(FlagError::Validation("rule name must not be empty".into()));
    }
    if let Some(percentage) = rule.percentage {
        if !(0.0..=100.0).contains(&percentage) {
            return Err(FlagError::Validation(format!(
                "rule '{}' percentage {percentage} is outside 0-100",
                rule.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagline_core::types::{Operator, TargetingCondition};
    use flagline_core::value::{context, AttributeValue};
    use flagline_store::MemoryStore;

    fn service() -> TargetingService {
        TargetingService::new(Arc::new(MemoryStore::new()))
    }

    fn beta_users() -> TargetingRule {
        TargetingRule::new("beta-users").with_condition(TargetingCondition::new(
            "plan",
            Operator::Equals,
            "beta",
        ))
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let svc = service();
        svc.create_rule(beta_users()).await.unwrap();
        svc.create_rule(TargetingRule::new("adults").with_percentage(25.0))
            .await
            .unwrap();

        let stored = svc.get_rule("beta-users").await.unwrap().unwrap();
        assert_eq!(stored.conditions.len(), 1);
        assert_eq!(stored.conditions[0].value, AttributeValue::from("beta"));

        let names: Vec<_> = svc
            .list_rules()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["adults", "beta-users"]);

        let updated = svc
            .update_rule("beta-users", TargetingRule::new("ignored").with_percentage(10.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "beta-users");
        assert_eq!(updated.created_at, stored.created_at);
        let reread = svc.get_rule("beta-users").await.unwrap().unwrap();
        assert!(reread.conditions.is_empty());
        assert_eq!(reread.percentage, Some(10.0));

        assert!(svc.delete_rule("beta-users").await.unwrap());
        assert!(!svc.delete_rule("beta-users").await.unwrap());
        assert!(svc.get_rule("beta-users").await.unwrap().is_none());
        assert_eq!(svc.list_rules().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_rule_is_none() {
        let svc = service();
        assert!(svc.update_rule("ghost", beta_users()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_percentage_out_of_range_is_rejected() {
        let svc = service();
        let err = svc
            .create_rule(TargetingRule::new("bad").with_percentage(120.0))
            .await
            .unwrap_err();
        assert!(matches!(err, FlagError::Validation(_)));
    }

    #[tokio::test]
    async fn test_evaluate_rule_names_skips_unknown() {
        let svc = service();
        svc.create_rule(beta_users()).await.unwrap();

        let evals = svc
            .evaluate_rule_names(
                &["missing".to_string(), "beta-users".to_string()],
                &context([("plan", "beta")]),
            )
            .await
            .unwrap();
        assert_eq!(evals.len(), 1);
        assert_eq!(evals[0].rule_name, "beta-users");
        assert!(evals[0].result);
    }

    #[tokio::test]
    async fn test_segment_crud() {
        let svc = service();
        let mut segment = UserSegment::new("nordics");
        segment
            .attributes
            .insert("region".into(), AttributeValue::from("nordics"));
        segment
            .attributes
            .insert("tier".into(), AttributeValue::from(2i64));
        svc.create_segment(segment).await.unwrap();

        let mut replacement = UserSegment::new("nordics");
        replacement
            .attributes
            .insert("region".into(), AttributeValue::from("scandinavia"));
        svc.update_segment("nordics", replacement).await.unwrap().unwrap();

        let stored = svc.get_segment("nordics").await.unwrap().unwrap();
        assert_eq!(stored.attributes.len(), 1);
        assert_eq!(stored.attributes["region"], AttributeValue::from("scandinavia"));

        assert_eq!(svc.list_segments().await.unwrap().len(), 1);
        assert!(svc.delete_segment("nordics").await.unwrap());
        assert!(svc.list_segments().await.unwrap().is_empty());
        assert!(svc.update_segment("nordics", UserSegment::new("x")).await.unwrap().is_none());
    }
}
