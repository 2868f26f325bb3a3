//! Deterministic weighted variant selection.
//!
//! The choice is a pure function of `(experiment, user_id, variants)`:
//!
//! 1. `d = SHA-256("{experiment}:{user_id}")` over the UTF-8 bytes.
//! 2. `u` = first 8 bytes of `d` as a big-endian `u64`.
//! 3. `point = (u >> 11) / 2^53`, a uniform value in `[0, 1)`.
//! 4. Walk the variants in declared order, accumulating `weight / total`; the
//!    first variant whose running total exceeds `point` is chosen.
//!
//! Any implementation following these steps picks the same variant.

use flagline_core::types::Variant;
use flagline_core::{FlagError, FlagResult};
use sha2::{Digest, Sha256};

/// Position of a user on the unit interval for one experiment.
pub fn bucket_point(experiment: &str, user_id: &str) -> f64 {
    let digest = Sha256::digest(format!("{experiment}:{user_id}").as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let value = u64::from_be_bytes(head);
    (value >> 11) as f64 / (1u64 << 53) as f64
}

/// Sum of weights, or a configuration error if the variants cannot be bucketed.
pub fn total_weight(experiment: &str, variants: &[Variant]) -> FlagResult<f64> {
    if variants.is_empty() {
        return Err(FlagError::Configuration(format!(
            "experiment '{experiment}' has no variants"
        )));
    }
    if let Some(bad) = variants
        .iter()
        .find(|v| !v.weight.is_finite() || v.weight < 0.0)
    {
        return Err(FlagError::Configuration(format!(
            "experiment '{experiment}' variant '{}' has invalid weight {}",
            bad.name, bad.weight
        )));
    }
    let total: f64 = variants.iter().map(|v| v.weight).sum();
    if total <= 0.0 {
        return Err(FlagError::Configuration(format!(
            "experiment '{experiment}' has only zero-weight variants"
        )));
    }
    Ok(total)
}

/// Pick the variant for `user_id`. Zero-weight variants are never chosen.
pub fn bucket_variant<'a>(
    experiment: &str,
    user_id: &str,
    variants: &'a [Variant],
) -> FlagResult<&'a Variant> {
    let total = total_weight(experiment, variants)?;
    let point = bucket_point(experiment, user_id);

    let mut cumulative = 0.0;
    for variant in variants.iter().filter(|v| v.weight > 0.0) {
        cumulative += variant.weight / total;
        if point < cumulative {
            return Ok(variant);
        }
    }

    // Rounding can leave the final bound a hair under 1.0.
    variants
        .iter()
        .rev()
        .find(|v| v.weight > 0.0)
        .ok_or_else(|| {
            FlagError::Configuration(format!(
                "experiment '{experiment}' has only zero-weight variants"
            ))
        })
}
