//! Sandbox lifecycle: worktree + execution environment pairs.
//!
//! A sandbox is a git worktree on its own branch paired with an isolated
//! execution environment. [`SandboxCoordinator`] drives the lifecycle;
//! [`SandboxMeta`] is the per-worktree metadata file it maintains.

mod coordinator;
mod meta;

pub use coordinator::{
    CleanupReport, MergeOutcome, SandboxCoordinator, SandboxExec, SandboxInfo, SandboxUp,
};
pub use meta::{SandboxMeta, SandboxState, SessionRecord};
