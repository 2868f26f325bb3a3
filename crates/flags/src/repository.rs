//! Store-backed feature flag CRUD.

use chrono::Utc;
use flagline_core::types::{FeatureFlag, FeatureFlagUpdate};
use flagline_core::{FlagError, FlagResult};
use flagline_store::codec::{decode_hash, encode_hash};
use flagline_store::KvStore;
use std::sync::Arc;
use tracing::{debug, info};

const FLAG_INDEX: &str = "flags";

fn flag_key(key: &str) -> String {
    format!("flag:{key}")
}

#[derive(Clone)]
pub struct FlagService {
    store: Arc<dyn KvStore>,
}

impl FlagService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Store a new flag. Fails with [`FlagError::Conflict`] if the key is taken.
    pub async fn create_flag(&self, flag: FeatureFlag) -> FlagResult<FeatureFlag> {
        validate(&flag)?;
        if self.store.exists(&flag_key(&flag.key)).await? {
            return Err(FlagError::Conflict(format!(
                "flag '{}' already exists",
                flag.key
            )));
        }
        self.store
            .set_hash(&flag_key(&flag.key), &encode_hash(&flag)?)
            .await?;
        self.store.add_to_set(FLAG_INDEX, &flag.key).await?;
        info!(flag = %flag.key, flag_type = ?flag.flag_type, "Feature flag created");
        Ok(flag)
    }

    pub async fn get_flag(&self, key: &str) -> FlagResult<Option<FeatureFlag>> {
        match self.store.get_hash(&flag_key(key)).await? {
            Some(fields) => Ok(Some(decode_hash(fields)?)),
            None => Ok(None),
        }
    }

    /// Apply a partial update. `None` if there is no such flag; the merged
    /// flag must still type-check or nothing is written.
    pub async fn update_flag(
        &self,
        key: &str,
        update: FeatureFlagUpdate,
    ) -> FlagResult<Option<FeatureFlag>> {
        let Some(mut flag) = self.get_flag(key).await? else {
            return Ok(None);
        };
        update.apply(&mut flag);
        validate(&flag)?;
        flag.updated_at = Utc::now();
        self.store
            .set_hash(&flag_key(key), &encode_hash(&flag)?)
            .await?;
        info!(flag = %key, enabled = flag.enabled, "Feature flag updated");
        Ok(Some(flag))
    }

    pub async fn delete_flag(&self, key: &str) -> FlagResult<bool> {
        let hash_key = flag_key(key);
        if !self.store.exists(&hash_key).await? {
            return Ok(false);
        }
        self.store.delete(&hash_key).await?;
        self.store.remove_from_set(FLAG_INDEX, key).await?;
        info!(flag = %key, "Feature flag deleted");
        Ok(true)
    }

    /// All flags, sorted by key.
    pub async fn list_flags(&self) -> FlagResult<Vec<FeatureFlag>> {
        let mut keys: Vec<String> = self.store.members_of(FLAG_INDEX).await?.into_iter().collect();
        keys.sort();
        let mut flags = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(flag) = self.get_flag(&key).await? {
                flags.push(flag);
            }
        }
        Ok(flags)
    }

    /// The value to serve for `key`: `None` when the flag is missing or disabled.
    pub async fn flag_value(&self, key: &str) -> FlagResult<Option<serde_json::Value>> {
        match self.get_flag(key).await? {
            Some(flag) if flag.enabled => Ok(Some(flag.value)),
            Some(_) => {
                debug!(flag = %key, "Feature flag disabled");
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

fn validate(flag: &FeatureFlag) -> FlagResult<()> {
    if flag.key.is_empty() {
        return Err(FlagError::Validation("flag key must not be empty".into()));
    }
    if flag.name.is_empty() {
        return Err(FlagError::Validation(format!(
            "flag '{}' must have a name",
            flag.key
        )));
    }
    if !flag.flag_type.accepts(&flag.value) {
        return Err(FlagError::Validation(format!(
            "flag '{}' value {} does not match type {:?}",
            flag.key, flag.value, flag.flag_type
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagline_core::types::FlagType;
    use flagline_store::MemoryStore;
    use serde_json::json;

    fn service() -> FlagService {
        FlagService::new(Arc::new(MemoryStore::new()))
    }

    fn dark_mode() -> FeatureFlag {
        FeatureFlag::new("dark-mode", "Dark mode", FlagType::Boolean, json!(false))
            .with_tags(vec!["ui".into()])
    }

    #[tokio::test]
    async fn test_flag_crud() {
        let svc = service();
        let created = svc.create_flag(dark_mode()).await.unwrap();
        svc.create_flag(FeatureFlag::new(
            "checkout-copy",
            "Checkout copy",
            FlagType::String,
            json!("Buy now"),
        ))
        .await
        .unwrap();

        let stored = svc.get_flag("dark-mode").await.unwrap().unwrap();
        assert_eq!(stored, created);

        let keys: Vec<_> = svc
            .list_flags()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.key)
            .collect();
        assert_eq!(keys, vec!["checkout-copy", "dark-mode"]);

        assert!(svc.delete_flag("dark-mode").await.unwrap());
        assert!(!svc.delete_flag("dark-mode").await.unwrap());
        assert!(svc.get_flag("dark-mode").await.unwrap().is_none());
        assert_eq!(svc.list_flags().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_is_a_conflict() {
        let svc = service();
        svc.create_flag(dark_mode()).await.unwrap();
        let err = svc.create_flag(dark_mode()).await.unwrap_err();
        assert!(matches!(err, FlagError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_partial_update_keeps_other_fields() {
        let svc = service();
        let created = svc.create_flag(dark_mode()).await.unwrap();

        let updated = svc
            .update_flag(
                "dark-mode",
                FeatureFlagUpdate {
                    value: Some(json!(true)),
                    ..FeatureFlagUpdate::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.value, json!(true));
        assert_eq!(updated.name, "Dark mode");
        assert_eq!(updated.tags, vec!["ui"]);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);

        let reread = svc.get_flag("dark-mode").await.unwrap().unwrap();
        assert_eq!(reread, updated);

        assert!(svc
            .update_flag("ghost", FeatureFlagUpdate::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_values_must_match_their_type() {
        let svc = service();
        let err = svc
            .create_flag(FeatureFlag::new("limit", "Limit", FlagType::Number, json!("ten")))
            .await
            .unwrap_err();
        assert!(matches!(err, FlagError::Validation(_)));

        svc.create_flag(FeatureFlag::new(
            "layout",
            "Layout",
            FlagType::Json,
            json!({"columns": 3}),
        ))
        .await
        .unwrap();

        // A type change without a matching value is rejected and not written.
        svc.create_flag(dark_mode()).await.unwrap();
        let err = svc
            .update_flag(
                "dark-mode",
                FeatureFlagUpdate {
                    flag_type: Some(FlagType::Number),
                    ..FeatureFlagUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FlagError::Validation(_)));
        let stored = svc.get_flag("dark-mode").await.unwrap().unwrap();
        assert_eq!(stored.flag_type, FlagType::Boolean);
    }

    #[tokio::test]
    async fn test_disabled_flag_serves_nothing() {
        let svc = service();
        svc.create_flag(dark_mode()).await.unwrap();
        assert_eq!(svc.flag_value("dark-mode").await.unwrap(), Some(json!(false)));

        svc.update_flag(
            "dark-mode",
            FeatureFlagUpdate {
                enabled: Some(false),
                ..FeatureFlagUpdate::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(svc.flag_value("dark-mode").await.unwrap(), None);
        assert_eq!(svc.flag_value("ghost").await.unwrap(), None);
    }
}
