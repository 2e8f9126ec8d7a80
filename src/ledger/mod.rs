//! Durable ledger of orchestrations, dependency-linked tasks, and issues.
//!
//! State lives in two flat JSON documents under `.drydock/` at the
//! repository root: `orchestrations.json` (orchestration + task maps) and
//! `issues.json` (issue map). Each call reads the document, mutates it in
//! memory, and flushes it atomically. Single writer per repository is
//! assumed; there is no locking, and concurrent mutations are
//! last-writer-wins.

mod issue;
mod store;
mod task;

pub use issue::{Issue, IssueDoc, IssuePriority, IssueStatus, IssueUpdate, NewIssue};
pub use store::DocumentStore;
pub use task::{
    NewTask, Orchestration, OrchestrationDoc, OrchestrationStatus, Task, TaskFilter, TaskStatus,
    TaskUpdate,
};

use std::path::Path;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Ledger over the two per-repository documents.
pub struct Ledger {
    orchestrations: DocumentStore<OrchestrationDoc>,
    issues: DocumentStore<IssueDoc>,
}

impl Ledger {
    /// Opens the ledger rooted at `repo_root`.
    pub fn open(repo_root: &Path) -> Self {
        let dir = repo_root.join(".drydock");
        Self {
            orchestrations: DocumentStore::new(dir.join("orchestrations.json")),
            issues: DocumentStore::new(dir.join("issues.json")),
        }
    }

    // ---- orchestrations ----

    /// Creates an orchestration. The id is generated unless supplied.
    pub fn orchestration_create(
        &self,
        description: &str,
        id: Option<String>,
    ) -> Result<Orchestration> {
        let now = Utc::now();
        let orchestration = Orchestration {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            description: description.to_string(),
            status: OrchestrationStatus::Active,
            created_at: now,
            updated_at: now,
        };

        self.orchestrations.update(|doc| {
            if doc.orchestrations.contains_key(&orchestration.id) {
                return Err(Error::Config(format!(
                    "orchestration id already exists: {}",
                    orchestration.id
                )));
            }
            doc.orchestrations
                .insert(orchestration.id.clone(), orchestration.clone());
            Ok(())
        })?;

        tracing::info!(id = %orchestration.id, "created orchestration");
        Ok(orchestration)
    }

    /// Fetches an orchestration by id.
    pub fn orchestration_get(&self, id: &str) -> Result<Orchestration> {
        let doc = self.orchestrations.load()?;
        doc.orchestrations
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("orchestration {}", id)))
    }

    /// Lists orchestrations, optionally filtered by status, in creation order.
    pub fn orchestration_list(
        &self,
        status: Option<OrchestrationStatus>,
    ) -> Result<Vec<Orchestration>> {
        let doc = self.orchestrations.load()?;
        let mut list: Vec<Orchestration> = doc
            .orchestrations
            .values()
            .filter(|o| status.map(|s| o.status == s).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by_key(|o| o.created_at);
        Ok(list)
    }

    /// Updates an orchestration's status.
    pub fn orchestration_update(
        &self,
        id: &str,
        status: OrchestrationStatus,
    ) -> Result<Orchestration> {
        self.orchestrations.update(|doc| {
            let orchestration = doc
                .orchestrations
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("orchestration {}", id)))?;
            orchestration.status = status;
            orchestration.updated_at = Utc::now();
            Ok(orchestration.clone())
        })
    }

    // ---- tasks ----

    /// Creates a task. The owning orchestration must exist and the declared
    /// dependencies must not introduce a cycle.
    pub fn task_create(&self, new: NewTask) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: new.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            orchestration_id: new.orchestration_id,
            title: new.title,
            description: new.description,
            status: TaskStatus::Pending,
            dependencies: new.dependencies,
            branch: None,
            session_id: None,
            review_session_id: None,
            result: None,
            created_at: now,
            updated_at: now,
        };

        self.orchestrations.update(|doc| {
            if !doc.orchestrations.contains_key(&task.orchestration_id) {
                return Err(Error::NotFound(format!(
                    "orchestration {}",
                    task.orchestration_id
                )));
            }
            if doc.tasks.contains_key(&task.id) {
                return Err(Error::Config(format!("task id already exists: {}", task.id)));
            }
            if doc.would_cycle(&task.id, &task.dependencies) {
                return Err(Error::DependencyCycle(format!(
                    "task {} dependencies form a cycle",
                    task.id
                )));
            }
            doc.tasks.insert(task.id.clone(), task.clone());
            Ok(())
        })?;

        tracing::info!(id = %task.id, orchestration = %task.orchestration_id, "created task");
        Ok(task)
    }

    /// Fetches a task by id.
    pub fn task_get(&self, id: &str) -> Result<Task> {
        let doc = self.orchestrations.load()?;
        doc.tasks
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))
    }

    /// Lists tasks matching the filter, in creation order.
    pub fn task_list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let doc = self.orchestrations.load()?;
        let mut list: Vec<Task> = doc
            .tasks
            .values()
            .filter(|t| {
                filter
                    .orchestration_id
                    .as_ref()
                    .map(|id| &t.orchestration_id == id)
                    .unwrap_or(true)
            })
            .filter(|t| filter.status.map(|s| t.status == s).unwrap_or(true))
            .filter(|t| !filter.ready || doc.is_ready(t))
            .cloned()
            .collect();
        list.sort_by_key(|t| t.created_at);
        Ok(list)
    }

    /// Applies a field-level update to a task. A dependency change is
    /// re-validated for cycles.
    pub fn task_update(&self, id: &str, update: TaskUpdate) -> Result<Task> {
        self.orchestrations.update(|doc| {
            if !doc.tasks.contains_key(id) {
                return Err(Error::NotFound(format!("task {}", id)));
            }
            if let Some(deps) = &update.dependencies {
                if doc.would_cycle(id, deps) {
                    return Err(Error::DependencyCycle(format!(
                        "task {} dependencies form a cycle",
                        id
                    )));
                }
            }
            let task = doc.tasks.get_mut(id).expect("existence checked above");
            update.apply(task, Utc::now());
            Ok(task.clone())
        })
    }

    /// Returns the dependencies of `task_id` that have not reached terminal
    /// success. Unresolved dependency ids are dropped.
    pub fn unmet_dependencies(&self, task_id: &str) -> Result<Vec<String>> {
        let doc = self.orchestrations.load()?;
        let task = doc
            .tasks
            .get(task_id)
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
        Ok(doc.unmet_dependencies(task))
    }

    /// Reverse lookup from a sandbox branch name to its task, used by the
    /// merge flow to recover orchestration context.
    pub fn find_task_by_branch(&self, branch: &str) -> Result<Option<Task>> {
        let doc = self.orchestrations.load()?;
        Ok(doc
            .tasks
            .values()
            .find(|t| t.branch.as_deref() == Some(branch))
            .cloned())
    }

    // ---- issues ----

    /// Creates an issue. The id is generated unless supplied.
    pub fn issue_create(&self, new: NewIssue) -> Result<Issue> {
        let now = Utc::now();
        let issue = Issue {
            id: new.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            title: new.title,
            description: new.description,
            status: IssueStatus::Open,
            priority: new.priority,
            labels: new.labels,
            linked_commits: Vec::new(),
            linked_tasks: Vec::new(),
            resolution: None,
            created_at: now,
            updated_at: now,
        };

        self.issues.update(|doc| {
            if doc.issues.contains_key(&issue.id) {
                return Err(Error::Config(format!(
                    "issue id already exists: {}",
                    issue.id
                )));
            }
            doc.issues.insert(issue.id.clone(), issue.clone());
            Ok(())
        })?;

        tracing::info!(id = %issue.id, "created issue");
        Ok(issue)
    }

    /// Fetches an issue by id.
    pub fn issue_get(&self, id: &str) -> Result<Issue> {
        let doc = self.issues.load()?;
        doc.issues
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("issue {}", id)))
    }

    /// Lists issues, optionally filtered by status.
    ///
    /// Ordering is a guaranteed contract: priority tier (high, medium, low),
    /// then creation time ascending within a tier.
    pub fn issue_list(&self, status: Option<IssueStatus>) -> Result<Vec<Issue>> {
        let doc = self.issues.load()?;
        let mut list: Vec<Issue> = doc
            .issues
            .values()
            .filter(|i| status.map(|s| i.status == s).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by_key(|i| (i.priority.rank(), i.created_at));
        Ok(list)
    }

    /// Applies a field-level update to an issue.
    pub fn issue_update(&self, id: &str, update: IssueUpdate) -> Result<Issue> {
        self.issues.update(|doc| {
            let issue = doc
                .issues
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("issue {}", id)))?;
            update.apply(issue, Utc::now());
            Ok(issue.clone())
        })
    }
}
