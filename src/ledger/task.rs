//! Orchestration and task records.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an orchestration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationStatus {
    /// Decomposition and execution in progress.
    #[default]
    Active,
    /// All work finished.
    Completed,
    /// Abandoned after failure.
    Failed,
}

/// A multi-step orchestration session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orchestration {
    /// Unique orchestration id.
    pub id: String,
    /// What this orchestration sets out to do.
    pub description: String,
    /// Current status.
    pub status: OrchestrationStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be started.
    #[default]
    Pending,
    /// Currently being worked.
    InProgress,
    /// Completed successfully.
    Done,
    /// Failed.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status ends the task's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Whether this status counts as a satisfied dependency.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// A unit of work within an orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: String,
    /// Owning orchestration.
    pub orchestration_id: String,
    /// One-line summary.
    pub title: String,
    /// Full description of the work.
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
    /// Ids of tasks that must reach terminal success first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Sandbox branch assigned to this task, if any.
    #[serde(default)]
    pub branch: Option<String>,
    /// Agent session used for implementation.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Agent session used for review.
    #[serde(default)]
    pub review_session_id: Option<String>,
    /// Outcome summary once finished.
    #[serde(default)]
    pub result: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Explicit id; auto-generated when `None`.
    pub id: Option<String>,
    /// Owning orchestration id.
    pub orchestration_id: String,
    /// One-line summary.
    pub title: String,
    /// Full description.
    pub description: String,
    /// Dependency task ids.
    pub dependencies: Vec<String>,
}

/// Field-level task update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub dependencies: Option<Vec<String>>,
    pub branch: Option<String>,
    pub session_id: Option<String>,
    pub review_session_id: Option<String>,
    pub result: Option<String>,
}

impl TaskUpdate {
    /// Applies the update to a task, stamping `updated_at`.
    pub fn apply(self, task: &mut Task, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(dependencies) = self.dependencies {
            task.dependencies = dependencies;
        }
        if let Some(branch) = self.branch {
            task.branch = Some(branch);
        }
        if let Some(session_id) = self.session_id {
            task.session_id = Some(session_id);
        }
        if let Some(review_session_id) = self.review_session_id {
            task.review_session_id = Some(review_session_id);
        }
        if let Some(result) = self.result {
            task.result = Some(result);
        }
        task.updated_at = now;
    }
}

/// Filter predicates for task listing.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to one orchestration.
    pub orchestration_id: Option<String>,
    /// Restrict to a status.
    pub status: Option<TaskStatus>,
    /// Restrict to ready tasks: non-terminal status and no unmet
    /// dependencies.
    pub ready: bool,
}

/// The persisted orchestration+task document.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct OrchestrationDoc {
    #[serde(default)]
    pub orchestrations: HashMap<String, Orchestration>,
    #[serde(default)]
    pub tasks: HashMap<String, Task>,
}

impl OrchestrationDoc {
    /// Dependencies of `task` that have not reached terminal success.
    /// Dependency ids that resolve to no known task are dropped.
    pub fn unmet_dependencies(&self, task: &Task) -> Vec<String> {
        task.dependencies
            .iter()
            .filter(|dep| {
                self.tasks
                    .get(*dep)
                    .map(|t| !t.status.is_terminal_success())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Whether `task` is ready to run.
    pub fn is_ready(&self, task: &Task) -> bool {
        !task.status.is_terminal() && self.unmet_dependencies(task).is_empty()
    }

    /// Checks whether the dependency graph has a cycle reachable from
    /// `start`, assuming `deps` is the (possibly not yet inserted)
    /// dependency list of `start`. Unknown ids are ignored.
    pub fn would_cycle(&self, start: &str, deps: &[String]) -> bool {
        // Iterative three-color DFS. Gray nodes are on the current path, so
        // an edge back to one is a cycle; black nodes are fully explored and
        // never re-expanded, keeping shared substructure (diamonds) linear.
        enum Step<'a> {
            Enter(&'a str),
            Exit(&'a str),
        }
        #[derive(PartialEq)]
        enum Mark {
            Gray,
            Black,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        marks.insert(start, Mark::Gray);
        let mut stack: Vec<Step<'_>> = vec![Step::Exit(start)];
        stack.extend(deps.iter().map(|d| Step::Enter(d.as_str())));

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(node) => {
                    match marks.get(node) {
                        Some(Mark::Gray) => return true,
                        Some(Mark::Black) => continue,
                        None => {}
                    }
                    let next = match self.tasks.get(node) {
                        Some(task) => &task.dependencies[..],
                        None => continue,
                    };
                    marks.insert(node, Mark::Gray);
                    stack.push(Step::Exit(node));
                    stack.extend(next.iter().map(|d| Step::Enter(d.as_str())));
                }
                Step::Exit(node) => {
                    marks.insert(node, Mark::Black);
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, status: TaskStatus, deps: &[&str]) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            orchestration_id: "orch".to_string(),
            title: id.to_string(),
            description: String::new(),
            status,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            branch: None,
            session_id: None,
            review_session_id: None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn doc(tasks: Vec<Task>) -> OrchestrationDoc {
        let mut doc = OrchestrationDoc::default();
        for t in tasks {
            doc.tasks.insert(t.id.clone(), t);
        }
        doc
    }

    #[test]
    fn unmet_dependencies_ignores_done_and_unknown() {
        let doc = doc(vec![
            task("a", TaskStatus::Done, &[]),
            task("b", TaskStatus::Pending, &[]),
            task("c", TaskStatus::Pending, &["a", "b", "ghost"]),
        ]);

        let unmet = doc.unmet_dependencies(&doc.tasks["c"]);
        assert_eq!(unmet, vec!["b".to_string()]);
    }

    #[test]
    fn failed_dependency_counts_as_unmet() {
        let doc = doc(vec![
            task("a", TaskStatus::Failed, &[]),
            task("b", TaskStatus::Pending, &["a"]),
        ]);

        assert_eq!(doc.unmet_dependencies(&doc.tasks["b"]), vec!["a".to_string()]);
        assert!(!doc.is_ready(&doc.tasks["b"]));
    }

    #[test]
    fn ready_requires_non_terminal_status_and_no_unmet_deps() {
        let doc = doc(vec![
            task("a", TaskStatus::Done, &[]),
            task("b", TaskStatus::Pending, &["a"]),
            task("c", TaskStatus::Done, &[]),
            task("d", TaskStatus::Cancelled, &[]),
        ]);

        assert!(doc.is_ready(&doc.tasks["b"]));
        assert!(!doc.is_ready(&doc.tasks["c"]));
        assert!(!doc.is_ready(&doc.tasks["d"]));
    }

    #[test]
    fn cycle_detection_finds_self_reference() {
        let doc = doc(vec![]);
        assert!(doc.would_cycle("a", &["a".to_string()]));
    }

    #[test]
    fn cycle_detection_finds_indirect_cycle() {
        let doc = doc(vec![
            task("b", TaskStatus::Pending, &["c"]),
            task("c", TaskStatus::Pending, &["a"]),
        ]);

        assert!(doc.would_cycle("a", &["b".to_string()]));
    }

    #[test]
    fn cycle_detection_accepts_dag_with_shared_deps() {
        let doc = doc(vec![
            task("base", TaskStatus::Pending, &[]),
            task("left", TaskStatus::Pending, &["base"]),
            task("right", TaskStatus::Pending, &["base"]),
        ]);

        assert!(!doc.would_cycle("top", &["left".to_string(), "right".to_string()]));
    }

    #[test]
    fn cycle_detection_ignores_unknown_ids() {
        let doc = doc(vec![]);
        assert!(!doc.would_cycle("a", &["ghost".to_string()]));
    }

    #[test]
    fn cycle_detection_is_linear_on_chained_diamonds() {
        // A chain of diamonds (n_i -> l_i, r_i -> n_{i+1}) has exponentially
        // many paths; the check must not re-explore shared substructure.
        let levels = 64;
        let mut tasks = Vec::new();
        for i in 0..levels {
            let left = format!("l{}", i);
            let right = format!("r{}", i);
            let below = format!("n{}", i + 1);
            tasks.push(task(
                &format!("n{}", i),
                TaskStatus::Pending,
                &[left.as_str(), right.as_str()],
            ));
            tasks.push(task(&left, TaskStatus::Pending, &[below.as_str()]));
            tasks.push(task(&right, TaskStatus::Pending, &[below.as_str()]));
        }
        tasks.push(task(&format!("n{}", levels), TaskStatus::Pending, &[]));
        let mut doc = doc(tasks);

        let started = std::time::Instant::now();
        assert!(!doc.would_cycle("top", &["n0".to_string()]));
        assert!(
            started.elapsed() < std::time::Duration::from_secs(5),
            "cycle check took {:?} on a {}-task graph",
            started.elapsed(),
            3 * levels + 1
        );

        // An edge from the bottom back to the entry is still caught.
        doc.tasks
            .get_mut(&format!("n{}", levels))
            .unwrap()
            .dependencies = vec!["n0".to_string()];
        assert!(doc.would_cycle("top", &["n0".to_string()]));
    }

    #[test]
    fn update_applies_only_set_fields() {
        let mut t = task("a", TaskStatus::Pending, &[]);
        let before_created = t.created_at;

        let update = TaskUpdate {
            status: Some(TaskStatus::InProgress),
            branch: Some("sandbox-1".to_string()),
            ..TaskUpdate::default()
        };
        let now = Utc::now();
        update.apply(&mut t, now);

        assert_eq!(t.status, TaskStatus::InProgress);
        assert_eq!(t.branch.as_deref(), Some("sandbox-1"));
        assert_eq!(t.session_id, None);
        assert_eq!(t.created_at, before_created);
        assert_eq!(t.updated_at, now);
    }

    #[test]
    fn task_status_terminality() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Done.is_terminal_success());
        assert!(!TaskStatus::Failed.is_terminal_success());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&OrchestrationStatus::Active).unwrap(),
            "\"active\""
        );
    }
}
