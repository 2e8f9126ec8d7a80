//! Host credential forwarding for sandbox environments.
//!
//! Looks up a token on the host and forwards it into the container as an
//! environment variable. Lookup is best-effort: a missing credential is
//! logged and the sandbox proceeds without it. Values are never logged.

use std::collections::HashMap;
use std::process::Command;

/// Best-effort credential lookup for the container environment.
#[derive(Debug, Clone)]
pub struct CredentialForwarder {
    /// Environment variable name used on both host and container sides.
    var_name: String,
    /// Optional helper command that prints the token to stdout.
    helper: Option<Vec<String>>,
}

impl CredentialForwarder {
    /// Creates a forwarder for the given variable, optionally backed by a
    /// helper command (e.g. `["gh", "auth", "token"]`).
    pub fn new(var_name: impl Into<String>, helper: Option<Vec<String>>) -> Self {
        Self {
            var_name: var_name.into(),
            helper,
        }
    }

    /// Returns the variable name this forwarder injects.
    pub fn var_name(&self) -> &str {
        &self.var_name
    }

    /// Resolves the credential from the host environment, falling back to
    /// the helper command. Returns `None` if neither yields a value.
    pub fn resolve(&self) -> Option<String> {
        if let Ok(value) = std::env::var(&self.var_name) {
            if !value.trim().is_empty() {
                return Some(value);
            }
        }

        let helper = self.helper.as_ref()?;
        let (program, args) = helper.split_first()?;

        match Command::new(program).args(args).output() {
            Ok(output) if output.status.success() => {
                let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if token.is_empty() {
                    None
                } else {
                    Some(token)
                }
            }
            Ok(output) => {
                tracing::warn!(
                    helper = %program,
                    status = ?output.status.code(),
                    "credential helper exited nonzero, continuing without credential"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    helper = %program,
                    error = %e,
                    "credential helper unavailable, continuing without credential"
                );
                None
            }
        }
    }

    /// Builds the environment map to pass into the container. Empty when no
    /// credential could be resolved.
    pub fn environment(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if let Some(token) = self.resolve() {
            env.insert(self.var_name.clone(), token);
        } else {
            tracing::debug!(var = %self.var_name, "no credential resolved");
        }
        env
    }
}
