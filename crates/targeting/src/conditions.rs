//! Single-condition evaluation. Every type mismatch is an explicit branch:
//! a condition never panics and never errors, it just fails to match.

use flagline_core::types::{Operator, TargetingCondition};
use flagline_core::value::{AttributeValue, Context, Scalar};

/// Evaluate one condition against a request context.
///
/// An attribute missing from the context never matches, whatever the operator.
pub fn evaluate(condition: &TargetingCondition, context: &Context) -> bool {
    let Some(actual) = context.get(&condition.attribute) else {
        return false;
    };
    compare(actual, condition.operator, &condition.value)
}

/// Apply `operator` to a context value (`actual`) and a condition value (`expected`).
pub fn compare(actual: &AttributeValue, operator: Operator, expected: &AttributeValue) -> bool {
    match operator {
        Operator::Equals => actual == expected,
        Operator::NotEquals => actual != expected,
        Operator::Contains => contains(actual, expected).unwrap_or(false),
        Operator::NotContains => match actual {
            AttributeValue::String(_) | AttributeValue::List(_) => {
                contains(actual, expected).map_or(false, |found| !found)
            }
            _ => true,
        },
        Operator::GreaterThan => numeric_pair(actual, expected).map_or(false, |(a, e)| a > e),
        Operator::LessThan => numeric_pair(actual, expected).map_or(false, |(a, e)| a < e),
        Operator::In => expected
            .as_list()
            .map_or(false, |list| member_of(actual, list)),
        Operator::NotIn => expected
            .as_list()
            .map_or(false, |list| !member_of(actual, list)),
        Operator::Between => match (range_bounds(expected), actual.as_number()) {
            (Some((lo, hi)), Some(v)) => lo <= v && v <= hi,
            _ => false,
        },
        Operator::NotBetween => match (range_bounds(expected), actual.as_number()) {
            (Some((lo, hi)), Some(v)) => !(lo <= v && v <= hi),
            (Some(_), None) => true,
            (None, _) => false,
        },
    }
}

/// Membership of `needle` in a string or list haystack.
///
/// `None` when the pair cannot be compared: the haystack is not a string or
/// list, or the needle has the wrong shape for it.
fn contains(haystack: &AttributeValue, needle: &AttributeValue) -> Option<bool> {
    match haystack {
        AttributeValue::String(s) => needle.as_str().map(|n| s.contains(n)),
        AttributeValue::List(items) => needle.as_scalar().map(|n| items.contains(&n)),
        _ => None,
    }
}

fn member_of(value: &AttributeValue, list: &[Scalar]) -> bool {
    value.as_scalar().map_or(false, |v| list.contains(&v))
}

fn numeric_pair(a: &AttributeValue, b: &AttributeValue) -> Option<(f64, f64)> {
    Some((a.as_number()?, b.as_number()?))
}

/// `[lo, hi]` from a two-element numeric list.
fn range_bounds(value: &AttributeValue) -> Option<(f64, f64)> {
    match value.as_list()? {
        [lo, hi] => Some((lo.as_number()?, hi.as_number()?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagline_core::value::context;

    const ALL_OPERATORS: [Operator; 10] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::Contains,
        Operator::NotContains,
        Operator::GreaterThan,
        Operator::LessThan,
        Operator::In,
        Operator::NotIn,
        Operator::Between,
        Operator::NotBetween,
    ];

    fn list(items: &[Scalar]) -> AttributeValue {
        AttributeValue::List(items.to_vec())
    }

    #[test]
    fn test_missing_attribute_fails_closed_for_every_operator() {
        let empty = Context::new();
        let other = context([("country", "SE")]);
        for operator in ALL_OPERATORS {
            let condition = TargetingCondition::new("plan", operator, list(&["beta".into()]));
            assert!(!evaluate(&condition, &empty), "{operator:?} matched an empty context");
            assert!(!evaluate(&condition, &other), "{operator:?} matched without the attribute");
        }
    }

    #[test]
    fn test_equality() {
        let ctx = context([("plan", "beta")]);
        assert!(evaluate(&TargetingCondition::new("plan", Operator::Equals, "beta"), &ctx));
        assert!(!evaluate(&TargetingCondition::new("plan", Operator::Equals, "free"), &ctx));
        assert!(evaluate(&TargetingCondition::new("plan", Operator::NotEquals, "free"), &ctx));
        // Different types are simply unequal.
        assert!(evaluate(&TargetingCondition::new("plan", Operator::NotEquals, 1.0), &ctx));
    }

    #[test]
    fn test_contains_on_strings_and_lists() {
        let ctx = context([
            ("email", AttributeValue::from("ana@company.com")),
            ("tags", list(&["vip".into(), 7.0.into()])),
            ("age", AttributeValue::from(40i64)),
        ]);

        assert!(compare(&ctx["email"], Operator::Contains, &"@company".into()));
        assert!(!compare(&ctx["email"], Operator::Contains, &"@other".into()));
        assert!(compare(&ctx["tags"], Operator::Contains, &"vip".into()));
        assert!(compare(&ctx["tags"], Operator::Contains, &7.0.into()));
        assert!(compare(&ctx["tags"], Operator::NotContains, &"basic".into()));
        assert!(!compare(&ctx["tags"], Operator::NotContains, &"vip".into()));

        // Haystack of the wrong type: contains fails closed, not_contains fails open.
        assert!(!compare(&ctx["age"], Operator::Contains, &"4".into()));
        assert!(compare(&ctx["age"], Operator::NotContains, &"4".into()));
    }

    #[test]
    fn test_malformed_needle_never_matches() {
        let email = AttributeValue::from("ana@company.com");
        assert!(!compare(&email, Operator::Contains, &5.0.into()));
        assert!(!compare(&email, Operator::NotContains, &5.0.into()));

        let tags = list(&["vip".into()]);
        assert!(!compare(&tags, Operator::Contains, &list(&["vip".into()])));
    }

    #[test]
    fn test_numeric_comparisons() {
        let age = AttributeValue::from(30i64);
        assert!(compare(&age, Operator::GreaterThan, &18.0.into()));
        assert!(!compare(&age, Operator::GreaterThan, &30.0.into()));
        assert!(compare(&age, Operator::LessThan, &30.5.into()));
        assert!(!compare(&"30".into(), Operator::GreaterThan, &18.0.into()));
        assert!(!compare(&age, Operator::LessThan, &"40".into()));
    }

    #[test]
    fn test_in_and_not_in() {
        let country = AttributeValue::from("SE");
        let nordics = list(&["SE".into(), "NO".into(), "DK".into()]);
        assert!(compare(&country, Operator::In, &nordics));
        assert!(!compare(&country, Operator::NotIn, &nordics));
        assert!(compare(&"DE".into(), Operator::NotIn, &nordics));

        // Condition value must be a list for both.
        assert!(!compare(&country, Operator::In, &"SE".into()));
        assert!(!compare(&country, Operator::NotIn, &"SE".into()));
    }

    #[test]
    fn test_between_is_inclusive() {
        let range = list(&[18.0.into(), 65.0.into()]);
        for (age, inside) in [(18.0, true), (40.0, true), (65.0, true), (17.9, false), (66.0, false)] {
            let value = AttributeValue::from(age);
            assert_eq!(compare(&value, Operator::Between, &range), inside, "age {age}");
            assert_eq!(compare(&value, Operator::NotBetween, &range), !inside, "age {age}");
        }
    }

    #[test]
    fn test_between_type_mismatches() {
        let range = list(&[18.0.into(), 65.0.into()]);
        let name = AttributeValue::from("ana");
        assert!(!compare(&name, Operator::Between, &range));
        assert!(compare(&name, Operator::NotBetween, &range));

        // Malformed ranges never match.
        let age = AttributeValue::from(30i64);
        for bad in [
            list(&[18.0.into()]),
            list(&[1.0.into(), 2.0.into(), 3.0.into()]),
            list(&["a".into(), "z".into()]),
            AttributeValue::from(30i64),
        ] {
            assert!(!compare(&age, Operator::Between, &bad));
            assert!(!compare(&age, Operator::NotBetween, &bad));
        }
    }
}
