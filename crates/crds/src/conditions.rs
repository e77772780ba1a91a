//! Status conditions keyed by type
//!
//! Conditions are held in a map from `type` to condition so that a write for an
//! existing type always replaces it in place. The externally visible list is
//! sorted by type, which keeps the serialized status deterministic.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

/// Status of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The controller cannot tell
    Unknown,
}

impl ConditionStatus {
    /// String form used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { ConditionStatus::True } else { ConditionStatus::False }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conditions of an OpenShiftControlPlane, unique per type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSet {
    by_type: BTreeMap<String, Condition>,
}

impl ConditionSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a condition, stamping transitions with the current time
    ///
    /// See [`ConditionSet::set_condition_at`].
    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        observed_generation: Option<i64>,
    ) -> bool {
        self.set_condition_at(condition_type, status, reason, message, observed_generation, Utc::now())
    }

    /// Upsert a condition by type and return whether anything changed
    ///
    /// 1. If no condition of this type exists it is added with
    ///    `lastTransitionTime = now`.
    /// 2. If one exists with the same status, only reason, message and
    ///    observedGeneration are refreshed; `lastTransitionTime` is preserved.
    /// 3. If the status differs, every field is replaced and
    ///    `lastTransitionTime` moves to `now`.
    pub fn set_condition_at(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        observed_generation: Option<i64>,
        now: DateTime<Utc>,
    ) -> bool {
        let status = status.as_str();

        let Some(existing) = self.by_type.get_mut(condition_type) else {
            self.by_type.insert(
                condition_type.to_string(),
                Condition {
                    type_: condition_type.to_string(),
                    status: status.to_string(),
                    reason: reason.to_string(),
                    message: message.to_string(),
                    observed_generation,
                    last_transition_time: Time(now),
                },
            );
            return true;
        };

        let mut changed = false;

        if existing.status != status {
            existing.status = status.to_string();
            existing.last_transition_time = Time(now);
            changed = true;
        }

        if existing.reason != reason {
            existing.reason = reason.to_string();
            changed = true;
        }

        if existing.message != message {
            existing.message = message.to_string();
            changed = true;
        }

        if existing.observed_generation != observed_generation {
            existing.observed_generation = observed_generation;
            changed = true;
        }

        changed
    }

    /// Replace the whole set
    ///
    /// Later entries win when the input repeats a type.
    pub fn replace_all(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        self.by_type = conditions
            .into_iter()
            .map(|c| (c.type_.clone(), c))
            .collect();
    }

    /// Find a condition by type
    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.by_type.get(condition_type)
    }

    /// True when the condition is present and `True`
    pub fn is_true(&self, condition_type: &str) -> bool {
        self.is_present_and_equal(condition_type, ConditionStatus::True)
    }

    /// True when the condition is present and `False`
    pub fn is_false(&self, condition_type: &str) -> bool {
        self.is_present_and_equal(condition_type, ConditionStatus::False)
    }

    /// True when the condition is present with the given status
    pub fn is_present_and_equal(&self, condition_type: &str, status: ConditionStatus) -> bool {
        self.get(condition_type).is_some_and(|c| c.status == status.as_str())
    }

    /// Number of conditions
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// True when there are no conditions
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Conditions in their serialized order (sorted by type)
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.by_type.values()
    }

    /// Conditions as a list in their serialized order
    pub fn to_vec(&self) -> Vec<Condition> {
        self.by_type.values().cloned().collect()
    }
}

impl FromIterator<Condition> for ConditionSet {
    fn from_iter<T: IntoIterator<Item = Condition>>(iter: T) -> Self {
        let mut set = ConditionSet::new();
        set.replace_all(iter);
        set
    }
}

impl Serialize for ConditionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.by_type.values())
    }
}

impl<'de> Deserialize<'de> for ConditionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let conditions = Vec::<Condition>::deserialize(deserializer)?;
        Ok(conditions.into_iter().collect())
    }
}

/// Listed as a map-type list keyed by `type`
impl JsonSchema for ConditionSet {
    fn schema_name() -> Cow<'static, str> {
        "ConditionSet".into()
    }

    fn inline_schema() -> bool {
        true
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        let mut schema = <Vec<Condition> as JsonSchema>::json_schema(generator);
        schema.insert("x-kubernetes-list-type".to_string(), json!("map"));
        schema.insert("x-kubernetes-list-map-keys".to_string(), json!(["type"]));
        schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_set_condition_adds_new_type() {
        let mut conditions = ConditionSet::new();
        let now = Utc::now();

        let changed = conditions.set_condition_at("Ready", ConditionStatus::False, "Waiting", "not yet", Some(1), now);

        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions.get("Ready").unwrap().last_transition_time, Time(now));
    }

    #[test]
    fn test_same_status_preserves_transition_time() {
        let mut conditions = ConditionSet::new();
        let first = Utc::now();
        let later = first + Duration::minutes(5);

        conditions.set_condition_at("Ready", ConditionStatus::False, "Waiting", "not yet", Some(1), first);
        let changed = conditions.set_condition_at("Ready", ConditionStatus::False, "StillWaiting", "still not", Some(2), later);

        let ready = conditions.get("Ready").unwrap();
        assert!(changed);
        assert_eq!(ready.last_transition_time, Time(first));
        assert_eq!(ready.reason, "StillWaiting");
        assert_eq!(ready.message, "still not");
        assert_eq!(ready.observed_generation, Some(2));
    }

    #[test]
    fn test_identical_write_is_not_a_change() {
        let mut conditions = ConditionSet::new();
        let first = Utc::now();

        conditions.set_condition_at("Ready", ConditionStatus::True, "Done", "ok", Some(1), first);
        let changed = conditions.set_condition_at("Ready", ConditionStatus::True, "Done", "ok", Some(1), first + Duration::minutes(1));

        assert!(!changed);
        assert_eq!(conditions.get("Ready").unwrap().last_transition_time, Time(first));
    }

    #[test]
    fn test_status_change_moves_transition_time() {
        let mut conditions = ConditionSet::new();
        let first = Utc::now();
        let later = first + Duration::minutes(5);

        conditions.set_condition_at("Ready", ConditionStatus::False, "Waiting", "", Some(1), first);
        conditions.set_condition_at("Ready", ConditionStatus::True, "Done", "", Some(1), later);

        let ready = conditions.get("Ready").unwrap();
        assert_eq!(ready.status, "True");
        assert_eq!(ready.last_transition_time, Time(later));
    }

    #[test]
    fn test_serializes_sorted_by_type() {
        // Whole seconds, the precision of metav1.Time on the wire
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut conditions = ConditionSet::new();
        conditions.set_condition_at("Ready", ConditionStatus::False, "Waiting", "", None, now);
        conditions.set_condition_at("Degraded", ConditionStatus::False, "AsExpected", "", None, now);
        conditions.set_condition_at("BootstrapComplete", ConditionStatus::False, "Waiting", "", None, now);

        let json = serde_json::to_value(&conditions).unwrap();
        assert_eq!(json[0]["lastTransitionTime"], "2024-05-01T12:00:00Z");
        let types: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["type"].as_str().unwrap())
            .collect();

        assert_eq!(types, vec!["BootstrapComplete", "Degraded", "Ready"]);

        let back: ConditionSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, conditions);
    }

    #[test]
    fn test_replace_all_dedupes_by_type() {
        let mut conditions = ConditionSet::new();
        conditions.set_condition("Ready", ConditionStatus::True, "Done", "", None);

        let stale = conditions.get("Ready").unwrap().clone();
        let mut fresh = stale.clone();
        fresh.status = "False".to_string();

        conditions.replace_all(vec![stale, fresh]);

        assert_eq!(conditions.len(), 1);
        assert!(conditions.is_false("Ready"));
    }

    #[test]
    fn test_schema_is_map_list_of_conditions() {
        let schema = serde_json::to_value(schemars::schema_for!(ConditionSet)).unwrap();

        assert_eq!(schema["type"], "array");
        assert_eq!(schema["x-kubernetes-list-type"], "map");
        assert_eq!(schema["x-kubernetes-list-map-keys"][0], "type");
    }
}
