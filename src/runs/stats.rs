//! The per-run stats document
//!
//! A JSON object keyed by stage name, each stage a flat map of metrics:
//!
//! ```json
//! {
//!   "scanner": { "status": "done", "files": 1200, "elapsed": 812.4, ... },
//!   "cmp3":    { "status": "done", "dark": 3, "missing": 0, ... }
//! }
//! ```
//!
//! Readers must cope with stages that are absent (run still in progress)
//! and with metrics that are `null`, so every accessor returns `Option`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Status of one stage (and, derived, of a run)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Started,
    Done,
    Failed,
    Aborted,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Started => "started",
            StageStatus::Done => "done",
            StageStatus::Failed => "failed",
            StageStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(StageStatus::Started),
            "done" => Some(StageStatus::Done),
            "failed" => Some(StageStatus::Failed),
            "aborted" => Some(StageStatus::Aborted),
            _ => None,
        }
    }

    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageStatus::Started)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nested stage → metrics document of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunStats {
    stages: Map<String, Value>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a stats document; non-object roots are rejected
    pub fn from_json(text: &str) -> Result<Self, String> {
        match serde_json::from_str::<Value>(text).map_err(|e| e.to_string())? {
            Value::Object(stages) => Ok(Self { stages }),
            other => Err(format!("expected a JSON object, found {}", type_name(&other))),
        }
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.stages).unwrap_or_else(|_| "{}".to_string())
    }

    /// Stage names present
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }

    /// Metrics of one stage, if the stage exists and is an object
    pub fn stage(&self, name: &str) -> Option<&Map<String, Value>> {
        self.stages.get(name).and_then(Value::as_object)
    }

    pub fn stage_status(&self, name: &str) -> Option<StageStatus> {
        self.get_str(name, "status").and_then(StageStatus::parse)
    }

    pub fn get(&self, stage: &str, key: &str) -> Option<&Value> {
        self.stage(stage)?.get(key).filter(|v| !v.is_null())
    }

    pub fn get_u64(&self, stage: &str, key: &str) -> Option<u64> {
        let value = self.get(stage, key)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    }

    pub fn get_f64(&self, stage: &str, key: &str) -> Option<f64> {
        self.get(stage, key)?.as_f64()
    }

    pub fn get_str(&self, stage: &str, key: &str) -> Option<&str> {
        self.get(stage, key)?.as_str()
    }

    pub fn get_bool(&self, stage: &str, key: &str) -> Option<bool> {
        self.get(stage, key)?.as_bool()
    }

    /// Replace a stage record
    pub fn set_stage(&mut self, name: &str, record: Value) {
        self.stages.insert(name.to_string(), record);
    }

    /// Update selected keys of a stage record, creating it if needed
    pub fn merge_stage(&mut self, name: &str, fields: Map<String, Value>) {
        let entry = self
            .stages
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(existing) = entry {
            existing.extend(fields);
        }
    }

    /// Status of the whole run, derived from its stages.
    ///
    /// Any failed stage makes the run failed, then aborted, then started;
    /// the run is done only when every stage with a status is done.
    pub fn overall_status(&self) -> Option<StageStatus> {
        let statuses: Vec<StageStatus> = self
            .stages
            .keys()
            .filter_map(|name| self.stage_status(name))
            .collect();
        if statuses.is_empty() {
            return None;
        }
        for status in [StageStatus::Failed, StageStatus::Aborted, StageStatus::Started] {
            if statuses.contains(&status) {
                return Some(status);
            }
        }
        Some(StageStatus::Done)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tolerates_absent_and_null() {
        let stats = RunStats::from_json(
            r#"{"scanner": {"status": "done", "files": null, "dirs": 12, "elapsed": 3.5},
                "cmp3": "garbage"}"#,
        )
        .unwrap();

        assert_eq!(stats.stage_status("scanner"), Some(StageStatus::Done));
        assert_eq!(stats.get_u64("scanner", "files"), None);
        assert_eq!(stats.get_u64("scanner", "dirs"), Some(12));
        assert_eq!(stats.get_u64("scanner", "elapsed"), Some(3));
        assert_eq!(stats.get_f64("scanner", "elapsed"), Some(3.5));
        assert!(stats.stage("cmp3").is_none());
        assert!(stats.stage("dark_action").is_none());
        assert_eq!(stats.get_u64("dark_action", "confirmed"), None);
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(RunStats::from_json("[1, 2]").is_err());
        assert!(RunStats::from_json("not json").is_err());
    }

    #[test]
    fn test_merge_stage() {
        let mut stats = RunStats::new();
        let mut fields = Map::new();
        fields.insert("status".into(), json!("started"));
        stats.merge_stage("cmp3", fields);

        let mut more = Map::new();
        more.insert("status".into(), json!("done"));
        more.insert("dark".into(), json!(4));
        stats.merge_stage("cmp3", more);

        assert_eq!(stats.stage_status("cmp3"), Some(StageStatus::Done));
        assert_eq!(stats.get_u64("cmp3", "dark"), Some(4));
    }

    #[test]
    fn test_overall_status() {
        let mut stats = RunStats::new();
        assert_eq!(stats.overall_status(), None);

        stats.set_stage("scanner", json!({"status": "done"}));
        stats.set_stage("cmp3", json!({"status": "started"}));
        assert_eq!(stats.overall_status(), Some(StageStatus::Started));

        stats.set_stage("cmp3", json!({"status": "done"}));
        assert_eq!(stats.overall_status(), Some(StageStatus::Done));

        stats.set_stage("dark_action", json!({"status": "aborted"}));
        assert_eq!(stats.overall_status(), Some(StageStatus::Aborted));

        stats.set_stage("missing_action", json!({"status": "failed"}));
        assert_eq!(stats.overall_status(), Some(StageStatus::Failed));
    }

    #[test]
    fn test_round_trip_keeps_unknown_stages() {
        let text = r#"{"custom": {"x": [1, 2, 3]}, "scanner": {"status": "done"}}"#;
        let stats = RunStats::from_json(text).unwrap();
        let again = RunStats::from_json(&stats.to_json_pretty()).unwrap();
        assert_eq!(stats, again);
        assert!(again.stage_names().any(|s| s == "custom"));
    }
}
