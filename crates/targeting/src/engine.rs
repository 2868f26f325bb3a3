//! Rule evaluation: enablement, time window, percentage rollout, then conditions.

use chrono::{DateTime, Utc};
use flagline_core::types::{GroupOperator, RuleEvaluation, RuleGroup, TargetingRule};
use flagline_core::value::Context;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::conditions;

/// Evaluate a rule against `context` at the current instant.
pub fn evaluate_rule(rule: &TargetingRule, context: &Context) -> RuleEvaluation {
    evaluate_rule_at(rule, context, Utc::now())
}

/// Evaluate a rule as of `now`.
///
/// Gates run in order and any of them can end evaluation early; a gated-out
/// rule reports no matched conditions and every condition as unmatched.
pub fn evaluate_rule_at(
    rule: &TargetingRule,
    context: &Context,
    now: DateTime<Utc>,
) -> RuleEvaluation {
    if !rule.enabled {
        debug!(rule = %rule.name, "Rule disabled");
        return gated_out(rule, now);
    }

    if rule.start_time.is_some_and(|start| now < start)
        || rule.end_time.is_some_and(|end| now > end)
    {
        debug!(rule = %rule.name, now = %now, "Rule outside its time window");
        return gated_out(rule, now);
    }

    if let Some(percentage) = rule.percentage {
        let bucket = context_bucket(context);
        if (bucket as f64) >= percentage {
            debug!(rule = %rule.name, bucket, percentage, "Context outside rollout percentage");
            return gated_out(rule, now);
        }
    }

    let (matched, unmatched): (Vec<_>, Vec<_>) = rule
        .conditions
        .iter()
        .partition(|condition| conditions::evaluate(condition, context));

    RuleEvaluation {
        rule_name: rule.name.clone(),
        result: unmatched.is_empty(),
        matched_conditions: matched.iter().map(|c| c.attribute.clone()).collect(),
        unmatched_conditions: unmatched.iter().map(|c| c.attribute.clone()).collect(),
        evaluated_at: now,
    }
}

/// Evaluate each rule independently, preserving input order.
pub fn evaluate_rules(rules: &[TargetingRule], context: &Context) -> Vec<RuleEvaluation> {
    let now = Utc::now();
    rules
        .iter()
        .map(|rule| evaluate_rule_at(rule, context, now))
        .collect()
}

/// Combine a group's rules with its logical operator.
///
/// An empty AND group matches; an empty OR group does not.
pub fn evaluate_group(group: &RuleGroup, context: &Context) -> bool {
    if !group.enabled {
        return false;
    }
    let evaluations = evaluate_rules(&group.rules, context);
    match group.operator {
        GroupOperator::And => evaluations.iter().all(|e| e.result),
        GroupOperator::Or => evaluations.iter().any(|e| e.result),
    }
}

/// Rollout bucket (0-99) of a whole context.
///
/// SHA-256 over the canonical JSON (keys sorted, compact), read as one
/// big-endian integer and reduced modulo 100. Two identical contexts always
/// land in the same bucket, regardless of which user sent them.
pub fn context_bucket(context: &Context) -> u8 {
    // A BTreeMap of strings to plain values always serializes.
    let canonical = serde_json::to_vec(context).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    let bucket = digest
        .iter()
        .fold(0u32, |acc, byte| (acc * 256 + u32::from(*byte)) % 100);
    bucket as u8
}

fn gated_out(rule: &TargetingRule, now: DateTime<Utc>) -> RuleEvaluation {
    RuleEvaluation {
        rule_name: rule.name.clone(),
        result: false,
        matched_conditions: Vec::new(),
        unmatched_conditions: rule.condition_attributes(),
        evaluated_at: now,
    }
}
