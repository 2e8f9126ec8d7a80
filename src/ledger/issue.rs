//! Issue records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    /// Open and awaiting work.
    #[default]
    Open,
    /// Currently being worked.
    InProgress,
    /// Fixed.
    Resolved,
    /// Closed without further action.
    Closed,
}

/// Issue priority. Listing order is high, then medium, then low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuePriority {
    High,
    #[default]
    Medium,
    Low,
}

impl IssuePriority {
    /// Sort rank within issue listings.
    pub fn rank(&self) -> u8 {
        match self {
            IssuePriority::High => 0,
            IssuePriority::Medium => 1,
            IssuePriority::Low => 2,
        }
    }
}

/// A tracked issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Unique issue id.
    pub id: String,
    /// One-line summary.
    pub title: String,
    /// Problem statement.
    pub description: String,
    /// Current status.
    pub status: IssueStatus,
    /// Priority tier.
    pub priority: IssuePriority,
    /// Current classification labels; replaced wholesale on update.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Commits linked over time; appended to, never replaced.
    #[serde(default)]
    pub linked_commits: Vec<String>,
    /// Tasks linked over time; appended to, never replaced.
    #[serde(default)]
    pub linked_tasks: Vec<String>,
    /// How the issue was resolved, once it was.
    #[serde(default)]
    pub resolution: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating an issue.
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    /// Explicit id; auto-generated when `None`.
    pub id: Option<String>,
    /// One-line summary.
    pub title: String,
    /// Problem statement.
    pub description: String,
    /// Priority tier.
    pub priority: IssuePriority,
    /// Initial labels.
    pub labels: Vec<String>,
}

/// Field-level issue update. `None` fields are left untouched.
///
/// `labels` replaces the current classification outright; `linked_commits`
/// and `linked_tasks` accumulate history and are appended.
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    pub status: Option<IssueStatus>,
    pub priority: Option<IssuePriority>,
    pub labels: Option<Vec<String>>,
    pub linked_commits: Option<Vec<String>>,
    pub linked_tasks: Option<Vec<String>>,
    pub resolution: Option<String>,
}

impl IssueUpdate {
    /// Applies the update to an issue, stamping `updated_at`.
    pub fn apply(self, issue: &mut Issue, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            issue.status = status;
        }
        if let Some(priority) = self.priority {
            issue.priority = priority;
        }
        if let Some(labels) = self.labels {
            issue.labels = labels;
        }
        if let Some(commits) = self.linked_commits {
            issue.linked_commits.extend(commits);
        }
        if let Some(tasks) = self.linked_tasks {
            issue.linked_tasks.extend(tasks);
        }
        if let Some(resolution) = self.resolution {
            issue.resolution = Some(resolution);
        }
        issue.updated_at = now;
    }
}

/// The persisted issue document.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IssueDoc {
    #[serde(default)]
    pub issues: HashMap<String, Issue>,
}
