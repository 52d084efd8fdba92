pub mod hash;
pub mod loader;
pub mod pool;

pub use hash::ContentHash;
pub use loader::{
    count_lines, parse_issues, resolve_beads_path, JsonlLoader, LoadError, LoadOptions,
    LoadWarning, Loaded, Loader, BEADS_DIR_ENV, DEFAULT_MAX_RECORD_BYTES,
};
pub use pool::{IssuePool, PoolStats};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_PRIORITY: i32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub design: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub status: IssueStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub issue_type: String,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub estimated_minutes: Option<i32>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub external_ref: Option<String>,
    #[serde(default)]
    pub source_repo: String,
    #[serde(default, deserialize_with = "deserialize_nullable_vec")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_nullable_vec")]
    pub dependencies: Vec<Dependency>,
    #[serde(default, deserialize_with = "deserialize_nullable_vec")]
    pub comments: Vec<Comment>,
}

impl Issue {
    pub fn new(id: impl Into<String>, title: impl Into<String>, status: IssueStatus) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            design: String::new(),
            acceptance_criteria: String::new(),
            notes: String::new(),
            status,
            priority: 2,
            issue_type: "task".to_string(),
            assignee: String::new(),
            estimated_minutes: None,
            created_at: None,
            updated_at: None,
            closed_at: None,
            external_ref: None,
            source_repo: String::new(),
            labels: Vec::new(),
            dependencies: Vec::new(),
            comments: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("issue id cannot be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err(format!("issue {} has an empty title", self.id));
        }
        if !(0..=MAX_PRIORITY).contains(&self.priority) {
            return Err(format!(
                "issue {} priority {} outside 0..={MAX_PRIORITY}",
                self.id, self.priority
            ));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Open,
    InProgress,
    Blocked,
    Deferred,
    Closed,
    Tombstone,
    #[serde(other)]
    Unknown,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Blocked => "blocked",
            IssueStatus::Deferred => "deferred",
            IssueStatus::Closed => "closed",
            IssueStatus::Tombstone => "tombstone",
            IssueStatus::Unknown => "unknown",
        }
    }

    /// Closed and tombstoned issues no longer take part in ready/blocked math.
    pub fn is_closed(&self) -> bool {
        matches!(self, IssueStatus::Closed | IssueStatus::Tombstone)
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "open" => Ok(IssueStatus::Open),
            "in_progress" | "in-progress" | "inprogress" => Ok(IssueStatus::InProgress),
            "blocked" => Ok(IssueStatus::Blocked),
            "deferred" => Ok(IssueStatus::Deferred),
            "closed" => Ok(IssueStatus::Closed),
            "tombstone" => Ok(IssueStatus::Tombstone),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(default)]
    pub issue_id: String,
    pub depends_on_id: String,
    #[serde(default, rename = "type")]
    pub dep_type: DependencyType,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    #[default]
    Blocks,
    Related,
    ParentChild,
    DiscoveredFrom,
    #[serde(other)]
    Unknown,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Blocks => "blocks",
            DependencyType::Related => "related",
            DependencyType::ParentChild => "parent-child",
            DependencyType::DiscoveredFrom => "discovered-from",
            DependencyType::Unknown => "unknown",
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, DependencyType::Blocks)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Deserialize an ID that can be either a string or a number into a String
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: serde_json::Value = serde_json::Value::deserialize(deserializer)?;
    match val {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

fn deserialize_nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_accepts_numeric_id_and_null_collections() {
        let raw = r#"{"id":42,"title":"Fix it","status":"in_progress","labels":null,"dependencies":null}"#;
        let issue: Issue = serde_json::from_str(raw).expect("parse issue");
        assert_eq!(issue.id, "42");
        assert_eq!(issue.status, IssueStatus::InProgress);
        assert!(issue.labels.is_empty());
        assert!(issue.dependencies.is_empty());
    }

    #[test]
    fn unknown_status_is_tolerated() {
        let raw = r#"{"id":"bd-1","title":"x","status":"pinned"}"#;
        let issue: Issue = serde_json::from_str(raw).expect("parse issue");
        assert_eq!(issue.status, IssueStatus::Unknown);
        assert!(!issue.is_closed());
    }

    #[test]
    fn validate_rejects_empty_title_and_bad_priority() {
        let mut issue = Issue::new("bd-1", "", IssueStatus::Open);
        assert!(issue.validate().is_err());
        issue.title = "ok".to_string();
        issue.priority = 9;
        assert!(issue.validate().is_err());
        issue.priority = 0;
        assert!(issue.validate().is_ok());
    }

    #[test]
    fn status_from_str_accepts_aliases() {
        assert_eq!(
            "In-Progress".parse::<IssueStatus>(),
            Ok(IssueStatus::InProgress)
        );
        assert_eq!("tombstone".parse::<IssueStatus>(), Ok(IssueStatus::Tombstone));
        assert!("nope".parse::<IssueStatus>().is_err());
        assert!(IssueStatus::Tombstone.is_closed());
    }

    #[test]
    fn dependency_type_defaults_to_blocking() {
        let raw = r#"{"depends_on_id":"bd-2"}"#;
        let dep: Dependency = serde_json::from_str(raw).expect("parse dependency");
        assert!(dep.dep_type.is_blocking());
        let related: Dependency =
            serde_json::from_str(r#"{"depends_on_id":"bd-2","type":"related"}"#).expect("parse");
        assert!(!related.dep_type.is_blocking());
    }
}
