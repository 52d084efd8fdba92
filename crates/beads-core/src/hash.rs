use crate::Issue;
use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};
use std::fmt;

const EMPTY_HASH: &str = "empty";
const PREFIX_CHARS: usize = 16;

/// Order-independent fingerprint of a loaded issue set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(issues: &[Issue]) -> Self {
        if issues.is_empty() {
            return Self(EMPTY_HASH.to_string());
        }

        let mut sorted: Vec<&Issue> = issues.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut hasher = Sha256::new();
        for issue in sorted {
            hash_issue(&mut hasher, issue);
        }
        Self(hex(&hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for log lines.
    pub fn prefix(&self) -> &str {
        match self.0.char_indices().nth(PREFIX_CHARS) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hash_issue(hasher: &mut Sha256, issue: &Issue) {
    for field in [
        issue.id.as_str(),
        issue.title.as_str(),
        issue.description.as_str(),
        issue.notes.as_str(),
        issue.design.as_str(),
        issue.acceptance_criteria.as_str(),
        issue.assignee.as_str(),
        issue.source_repo.as_str(),
        issue.external_ref.as_deref().unwrap_or_default(),
        issue.status.as_str(),
        issue.issue_type.as_str(),
    ] {
        write_field(hasher, field.as_bytes());
    }

    write_field(hasher, issue.priority.to_string().as_bytes());
    match issue.estimated_minutes {
        Some(minutes) => write_field(hasher, minutes.to_string().as_bytes()),
        None => write_field(hasher, b""),
    }
    write_time(hasher, issue.created_at);
    write_time(hasher, issue.updated_at);
    write_time(hasher, issue.closed_at);

    let mut labels: Vec<&str> = issue.labels.iter().map(String::as_str).collect();
    labels.sort_unstable();
    for label in labels {
        write_field(hasher, label.as_bytes());
    }
    hasher.update([0u8]);

    let mut deps: Vec<(&str, &str, String, &str)> = issue
        .dependencies
        .iter()
        .map(|dep| {
            (
                dep.depends_on_id.as_str(),
                dep.dep_type.as_str(),
                format_time(dep.created_at),
                dep.created_by.as_str(),
            )
        })
        .collect();
    deps.sort();
    for (depends_on, dep_type, created_at, created_by) in deps {
        write_field(hasher, depends_on.as_bytes());
        write_field(hasher, dep_type.as_bytes());
        write_field(hasher, created_at.as_bytes());
        write_field(hasher, created_by.as_bytes());
    }
    hasher.update([0u8]);

    for comment in &issue.comments {
        write_field(hasher, comment.author.as_bytes());
        write_field(hasher, comment.text.as_bytes());
    }
    hasher.update([0u8]);
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update(bytes);
    hasher.update([0u8]);
}

fn write_time(hasher: &mut Sha256, value: Option<DateTime<Utc>>) {
    write_field(hasher, format_time(value).as_bytes());
}

fn format_time(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .unwrap_or_default()
}

fn hex(digest: &[u8]) -> String {
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
