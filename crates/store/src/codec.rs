//! Mapping between records and store hashes: one hash field per top-level
//! struct field, each holding that field's JSON encoding.

use flagline_core::{FlagError, FlagResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub fn encode_hash<T: Serialize>(record: &T) -> FlagResult<HashMap<String, String>> {
    match serde_json::to_value(record)? {
        Value::Object(fields) => fields
            .into_iter()
            .map(|(name, value)| -> FlagResult<(String, String)> {
                Ok((name, serde_json::to_string(&value)?))
            })
            .collect(),
        other => Err(FlagError::Validation(format!(
            "only JSON objects can be stored as hashes, got {other}"
        ))),
    }
}

pub fn decode_hash<T: DeserializeOwned>(fields: HashMap<String, String>) -> FlagResult<T> {
    let mut object = Map::with_capacity(fields.len());
    for (name, raw) in fields {
        object.insert(name, serde_json::from_str(&raw)?);
    }
    Ok(serde_json::from_value(Value::Object(object))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        weight: f64,
        tags: Vec<String>,
        ends: Option<DateTime<Utc>>,
    }

    #[test]
    fn test_fields_are_json_encoded_individually() {
        let record = Record {
            name: "checkout".into(),
            weight: 0.5,
            tags: vec!["web".into()],
            ends: None,
        };
        let fields = encode_hash(&record).unwrap();
        assert_eq!(fields["name"], "\"checkout\"");
        assert_eq!(fields["tags"], "[\"web\"]");
        assert_eq!(fields["ends"], "null");

        let decoded: Record = decode_hash(fields).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(matches!(encode_hash(&42), Err(FlagError::Validation(_))));
    }
}
