use crate::tier::{DatasetTier, TierOutcome};
use beads_core::{ContentHash, Issue, IssueStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::mem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counts {
    pub open: usize,
    pub ready: usize,
    pub blocked: usize,
    pub closed: usize,
    pub total: usize,
}

/// One line of the issue list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRow {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub status: IssueStatus,
    pub priority: i32,
    pub issue_type: String,
    pub assignee: String,
    pub ready: bool,
    /// Open blockers among the loaded issues.
    pub blocked_by: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardColumn {
    pub title: &'static str,
    pub rows: Vec<usize>,
}

const BOARD_COLUMNS: [&str; 4] = ["Open", "In Progress", "Blocked", "Closed"];

/// Immutable result of one refresh cycle.
///
/// Published behind an `Arc` and replaced wholesale by the next cycle.
#[derive(Debug)]
pub struct Snapshot {
    issues: Vec<Issue>,
    index: HashMap<String, usize>,
    pub rows: Vec<IssueRow>,
    pub board: Vec<BoardColumn>,
    pub counts: Counts,
    pub hash: ContentHash,
    pub tier: DatasetTier,
    pub source_issue_count_hint: usize,
    pub loaded_open_only: bool,
    pub truncated: usize,
    pub warning: Option<String>,
    pub load_warning_count: usize,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub size_bytes: usize,
}

impl Snapshot {
    /// Builds the view projections over `issues`.
    ///
    /// Issues are ordered newest first, then by id. `version` stays zero
    /// until the worker publishes the snapshot.
    pub fn build(
        mut issues: Vec<Issue>,
        hash: ContentHash,
        outcome: TierOutcome,
        load_warning_count: usize,
    ) -> Self {
        issues.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let index: HashMap<String, usize> = issues
            .iter()
            .enumerate()
            .map(|(idx, issue)| (issue.id.clone(), idx))
            .collect();

        let mut counts = Counts {
            total: issues.len(),
            ..Counts::default()
        };
        let mut board: Vec<BoardColumn> = BOARD_COLUMNS
            .into_iter()
            .map(|title| BoardColumn {
                title,
                rows: Vec::new(),
            })
            .collect();
        let mut rows = Vec::with_capacity(issues.len());

        for (idx, issue) in issues.iter().enumerate() {
            let closed = issue.is_closed();
            let blocked_by = if closed {
                0
            } else {
                open_blockers(issue, &issues, &index)
            };
            let blocked = !closed && (issue.status == IssueStatus::Blocked || blocked_by > 0);
            let ready = issue.status == IssueStatus::Open && blocked_by == 0;

            if closed {
                counts.closed += 1;
            } else {
                counts.open += 1;
            }
            if ready {
                counts.ready += 1;
            }
            if blocked {
                counts.blocked += 1;
            }

            let column = if closed {
                3
            } else if blocked {
                2
            } else if issue.status == IssueStatus::InProgress {
                1
            } else {
                0
            };
            board[column].rows.push(idx);

            rows.push(IssueRow {
                index: idx,
                id: issue.id.clone(),
                title: issue.title.clone(),
                status: issue.status.clone(),
                priority: issue.priority,
                issue_type: issue.issue_type.clone(),
                assignee: issue.assignee.clone(),
                ready,
                blocked_by,
            });
        }

        let mut snapshot = Self {
            issues,
            index,
            rows,
            board,
            counts,
            hash,
            tier: outcome.tier,
            source_issue_count_hint: outcome.source_issue_count_hint,
            loaded_open_only: outcome.loaded_open_only,
            truncated: outcome.truncated,
            warning: outcome.warning,
            load_warning_count,
            version: 0,
            created_at: Utc::now(),
            size_bytes: 0,
        };
        snapshot.size_bytes = snapshot.estimate_size();
        snapshot
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn get(&self, id: &str) -> Option<&Issue> {
        self.index.get(id).map(|idx| &self.issues[*idx])
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Hands back the issue buffer so it can be pooled.
    pub fn into_issues(self) -> Vec<Issue> {
        self.issues
    }

    fn estimate_size(&self) -> usize {
        let issues: usize = self.issues.iter().map(issue_size).sum();
        let issue_slack = (self.issues.capacity() - self.issues.len()) * mem::size_of::<Issue>();
        let index: usize = self
            .index
            .keys()
            .map(|key| key.capacity() + mem::size_of::<String>() + mem::size_of::<usize>())
            .sum();
        let rows: usize = self
            .rows
            .iter()
            .map(|row| {
                mem::size_of::<IssueRow>()
                    + row.id.capacity()
                    + row.title.capacity()
                    + row.issue_type.capacity()
                    + row.assignee.capacity()
            })
            .sum();
        let board: usize = self
            .board
            .iter()
            .map(|column| {
                mem::size_of::<BoardColumn>() + column.rows.capacity() * mem::size_of::<usize>()
            })
            .sum();
        mem::size_of::<Self>() + issues + issue_slack + index + rows + board
    }
}

fn open_blockers(issue: &Issue, issues: &[Issue], index: &HashMap<String, usize>) -> usize {
    issue
        .dependencies
        .iter()
        .filter(|dep| dep.dep_type.is_blocking())
        .filter_map(|dep| index.get(&dep.depends_on_id))
        .filter(|idx| !issues[**idx].is_closed())
        .count()
}

fn issue_size(issue: &Issue) -> usize {
    let text = issue.id.capacity()
        + issue.title.capacity()
        + issue.description.capacity()
        + issue.design.capacity()
        + issue.acceptance_criteria.capacity()
        + issue.notes.capacity()
        + issue.issue_type.capacity()
        + issue.assignee.capacity()
        + issue.source_repo.capacity()
        + issue.external_ref.as_ref().map_or(0, String::capacity);
    let labels: usize = issue
        .labels
        .iter()
        .map(|label| label.capacity() + mem::size_of::<String>())
        .sum();
    let deps: usize = issue
        .dependencies
        .iter()
        .map(|dep| {
            mem::size_of_val(dep)
                + dep.issue_id.capacity()
                + dep.depends_on_id.capacity()
                + dep.created_by.capacity()
        })
        .sum();
    let comments: usize = issue
        .comments
        .iter()
        .map(|comment| {
            mem::size_of_val(comment) + comment.author.capacity() + comment.text.capacity()
        })
        .sum();
    mem::size_of::<Issue>() + text + labels + deps + comments
}

#[cfg(test)]
mod tests {
    use super::*;
    use beads_core::{Dependency, DependencyType};
    use chrono::TimeZone;

    fn issue(id: &str, status: IssueStatus, day: u32) -> Issue {
        let mut issue = Issue::new(id, format!("Issue {id}"), status);
        issue.created_at = Utc.with_ymd_and_hms(2026, 1, day, 12, 0, 0).single();
        issue
    }

    fn blocks(issue: &mut Issue, on: &str) {
        issue.dependencies.push(Dependency {
            issue_id: issue.id.clone(),
            depends_on_id: on.to_string(),
            dep_type: DependencyType::Blocks,
            created_at: None,
            created_by: String::new(),
        });
    }

    fn build(issues: Vec<Issue>) -> Snapshot {
        let hash = ContentHash::of(&issues);
        Snapshot::build(issues, hash, TierOutcome::default(), 0)
    }

    #[test]
    fn rows_are_newest_first_then_by_id() {
        let snapshot = build(vec![
            issue("bd-a", IssueStatus::Open, 1),
            issue("bd-c", IssueStatus::Open, 3),
            issue("bd-b", IssueStatus::Open, 3),
        ]);
        let ids: Vec<_> = snapshot.rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-b", "bd-c", "bd-a"]);
        assert_eq!(snapshot.get("bd-a").map(|i| i.id.as_str()), Some("bd-a"));
        assert!(snapshot.get("bd-z").is_none());
    }

    #[test]
    fn counts_follow_blocking_dependencies() {
        let blocker = issue("bd-1", IssueStatus::Open, 1);
        let mut waiting = issue("bd-2", IssueStatus::Open, 2);
        blocks(&mut waiting, "bd-1");
        let done = issue("bd-3", IssueStatus::Closed, 3);
        let mut unblocked = issue("bd-4", IssueStatus::Open, 4);
        blocks(&mut unblocked, "bd-3");
        blocks(&mut unblocked, "bd-missing");

        let snapshot = build(vec![blocker, waiting, done, unblocked]);
        assert_eq!(
            snapshot.counts,
            Counts {
                open: 3,
                ready: 2,
                blocked: 1,
                closed: 1,
                total: 4,
            }
        );
        let board: Vec<usize> = snapshot.board.iter().map(|column| column.rows.len()).collect();
        assert_eq!(board, vec![2, 0, 1, 1]);
    }

    #[test]
    fn size_estimate_grows_with_content() {
        let small = build(vec![issue("bd-1", IssueStatus::Open, 1)]);
        let mut big_issue = issue("bd-1", IssueStatus::Open, 1);
        big_issue.description = "x".repeat(4096);
        let big = build(vec![big_issue]);
        assert!(small.size_bytes > 0);
        assert!(big.size_bytes >= small.size_bytes + 4096);
    }

    #[test]
    fn tier_outcome_is_carried() {
        let outcome = TierOutcome {
            tier: DatasetTier::Huge,
            source_issue_count_hint: 40,
            loaded_open_only: true,
            truncated: 39,
            warning: Some("open-only".to_string()),
        };
        let issues = vec![issue("bd-1", IssueStatus::Open, 1)];
        let hash = ContentHash::of(&issues);
        let snapshot = Snapshot::build(issues, hash, outcome, 2);
        assert_eq!(snapshot.tier, DatasetTier::Huge);
        assert!(snapshot.loaded_open_only);
        assert_eq!(snapshot.truncated, 39);
        assert_eq!(snapshot.load_warning_count, 2);
        assert_eq!(snapshot.into_issues().len(), 1);
    }
}
