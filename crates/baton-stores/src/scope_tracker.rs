//! Scope tracking for reference lifecycle management.
//!
//! Tracks which refs belong to which lifecycle scope and computes the list
//! of refs to delete when a scope boundary closes.
//!
//! Scope hierarchy:
//! - step: cleaned up when the step completes
//! - execution: cleaned up when the execution completes
//! - workflow: attached to the transitive root execution, cleaned up when
//!   the whole workflow tree completes
//! - permanent: never tracked

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::Serialize;
use tracing::debug;

use baton_core::{ResultRef, Scope, StorageError};

#[derive(Default)]
struct TrackerState {
    /// execution_id -> execution-scoped ref URIs
    execution_refs: HashMap<String, HashSet<String>>,
    /// "execution_id:step_name" -> step-scoped ref URIs
    step_refs: HashMap<String, HashSet<String>>,
    /// root execution_id -> workflow-scoped ref URIs
    workflow_refs: HashMap<String, HashSet<String>>,
    /// parent execution_id -> child execution_ids
    workflow_tree: HashMap<String, HashSet<String>>,
    /// execution_id -> resolved workflow root (memoized)
    workflow_roots: HashMap<String, String>,
}

impl TrackerState {
    fn resolve_root(&mut self, execution_id: &str, parent_execution_id: Option<&str>) -> String {
        if let Some(root) = self.workflow_roots.get(execution_id) {
            return root.clone();
        }

        // Ancestors registered earlier carry the memoized root; an unseen
        // parent is itself the root.
        let root = match parent_execution_id {
            Some(parent) => match self.workflow_roots.get(parent) {
                Some(root) => root.clone(),
                None => {
                    self.workflow_roots
                        .insert(parent.to_string(), parent.to_string());
                    parent.to_string()
                }
            },
            None => execution_id.to_string(),
        };

        self.workflow_roots
            .insert(execution_id.to_string(), root.clone());
        root
    }

    fn drain_execution(&mut self, execution_id: &str) -> Vec<String> {
        let mut refs: Vec<String> = self
            .execution_refs
            .remove(execution_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();

        // Steps that never ran their own cleanup.
        let step_prefix = format!("{execution_id}:");
        let leftover_keys: Vec<String> = self
            .step_refs
            .keys()
            .filter(|key| key.starts_with(&step_prefix))
            .cloned()
            .collect();
        for key in leftover_keys {
            if let Some(set) = self.step_refs.remove(&key) {
                refs.extend(set);
            }
        }

        refs
    }
}

/// Aggregate tracker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeStats {
    pub execution_scopes: usize,
    pub step_scopes: usize,
    pub workflow_trees: usize,
    pub total_refs: usize,
}

/// Tracks refs by scope for cleanup.
///
/// All state sits behind one mutex so concurrent registrations (including
/// workflow-root memoization and adjacency updates) are atomic.
pub struct ScopeTracker {
    state: Mutex<TrackerState>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Register a reference in its scope.
    ///
    /// `step_name` is required for step-scoped refs; `parent_execution_id`
    /// links nested executions for workflow-scope tracking. Permanent refs
    /// are never tracked.
    pub fn register_ref(
        &self,
        result_ref: &ResultRef,
        execution_id: &str,
        step_name: Option<&str>,
        parent_execution_id: Option<&str>,
    ) -> Result<(), StorageError> {
        let uri = result_ref.uri.clone();
        let mut state = self
            .state
            .lock()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        match result_ref.scope {
            Scope::Step => {
                let Some(step_name) = step_name else {
                    return Err(StorageError::InvalidRef(
                        "step_name required for step-scoped refs".to_string(),
                    ));
                };
                let key = format!("{execution_id}:{step_name}");
                debug!(uri = %uri, key = %key, "registered step-scoped ref");
                state.step_refs.entry(key).or_default().insert(uri);
            }
            Scope::Execution => {
                debug!(uri = %uri, execution_id = %execution_id, "registered execution-scoped ref");
                state
                    .execution_refs
                    .entry(execution_id.to_string())
                    .or_default()
                    .insert(uri);
            }
            Scope::Workflow => {
                let root = state.resolve_root(execution_id, parent_execution_id);
                debug!(uri = %uri, root = %root, "registered workflow-scoped ref");
                state.workflow_refs.entry(root).or_default().insert(uri);

                if let Some(parent) = parent_execution_id {
                    state
                        .workflow_tree
                        .entry(parent.to_string())
                        .or_default()
                        .insert(execution_id.to_string());
                }
            }
            Scope::Permanent => {}
        }

        Ok(())
    }

    /// Refs to delete when a step completes.
    ///
    /// Pops the step's set; a second call before the step repopulates
    /// returns empty.
    pub fn get_refs_for_step_cleanup(&self, execution_id: &str, step_name: &str) -> Vec<String> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        let key = format!("{execution_id}:{step_name}");
        let refs: Vec<String> = state
            .step_refs
            .remove(&key)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        debug!(key = %key, count = refs.len(), "step cleanup");
        refs
    }

    /// Refs to delete when an execution completes.
    ///
    /// Includes leftover step-scoped sets for the execution, but never the
    /// workflow-scoped refs attached to this execution when it is only a
    /// non-root member.
    pub fn get_refs_for_execution_cleanup(&self, execution_id: &str) -> Vec<String> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        let refs = state.drain_execution(execution_id);
        debug!(execution_id = %execution_id, count = refs.len(), "execution cleanup");
        refs
    }

    /// Refs to delete when the whole workflow tree completes.
    ///
    /// Walks the children tree, draining execution scope at every node, then
    /// collects the workflow-scoped set attached to the root, and clears the
    /// tree and root memoization for all visited nodes.
    pub fn get_refs_for_workflow_cleanup(&self, root_execution_id: &str) -> Vec<String> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };

        let mut refs = Vec::new();
        let mut stack = vec![root_execution_id.to_string()];
        while let Some(execution_id) = stack.pop() {
            refs.extend(state.drain_execution(&execution_id));
            if let Some(children) = state.workflow_tree.remove(&execution_id) {
                stack.extend(children);
            }
            state.workflow_roots.remove(&execution_id);
        }

        if let Some(workflow_set) = state.workflow_refs.remove(root_execution_id) {
            refs.extend(workflow_set);
        }

        debug!(root = %root_execution_id, count = refs.len(), "workflow cleanup");
        refs
    }

    /// Statistics about tracked scopes.
    pub fn stats(&self) -> ScopeStats {
        let Ok(state) = self.state.lock() else {
            return ScopeStats {
                execution_scopes: 0,
                step_scopes: 0,
                workflow_trees: 0,
                total_refs: 0,
            };
        };
        let total_refs = state.execution_refs.values().map(HashSet::len).sum::<usize>()
            + state.step_refs.values().map(HashSet::len).sum::<usize>()
            + state.workflow_refs.values().map(HashSet::len).sum::<usize>();
        ScopeStats {
            execution_scopes: state.execution_refs.len(),
            step_scopes: state.step_refs.len(),
            workflow_trees: state.workflow_tree.len(),
            total_refs,
        }
    }
}

impl Default for ScopeTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::{RefMeta, StoreTier};

    fn make_ref(execution_id: &str, name: &str, scope: Scope) -> ResultRef {
        ResultRef::create(execution_id, name, StoreTier::Memory, scope, None, RefMeta::default())
            .unwrap()
    }

    #[test]
    fn test_step_scope_requires_step_name() {
        let tracker = ScopeTracker::new();
        let r = make_ref("e1", "out", Scope::Step);
        let err = tracker.register_ref(&r, "e1", None, None).unwrap_err();
        assert!(matches!(err, StorageError::InvalidRef(_)));
    }

    #[test]
    fn test_step_cleanup_pops_once() {
        let tracker = ScopeTracker::new();
        let r = make_ref("e1", "out", Scope::Step);
        tracker.register_ref(&r, "e1", Some("fetch"), None).unwrap();

        let first = tracker.get_refs_for_step_cleanup("e1", "fetch");
        assert_eq!(first, vec![r.uri.clone()]);
        assert!(tracker.get_refs_for_step_cleanup("e1", "fetch").is_empty());
    }

    #[test]
    fn test_execution_cleanup_includes_leftover_steps() {
        let tracker = ScopeTracker::new();
        let exec_ref = make_ref("e1", "a", Scope::Execution);
        let step_ref = make_ref("e1", "b", Scope::Step);
        tracker.register_ref(&exec_ref, "e1", None, None).unwrap();
        tracker.register_ref(&step_ref, "e1", Some("fetch"), None).unwrap();

        let refs = tracker.get_refs_for_execution_cleanup("e1");
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&exec_ref.uri));
        assert!(refs.contains(&step_ref.uri));
        assert!(tracker.get_refs_for_execution_cleanup("e1").is_empty());
    }

    #[test]
    fn test_execution_cleanup_leaves_workflow_refs_alone() {
        let tracker = ScopeTracker::new();
        let workflow_ref = make_ref("e2", "w", Scope::Workflow);
        // e2 is a child of root e1; its workflow ref attaches to e1.
        tracker
            .register_ref(&workflow_ref, "e2", None, Some("e1"))
            .unwrap();

        assert!(tracker.get_refs_for_execution_cleanup("e2").is_empty());
        assert!(tracker.get_refs_for_execution_cleanup("e1").is_empty());

        let refs = tracker.get_refs_for_workflow_cleanup("e1");
        assert_eq!(refs, vec![workflow_ref.uri]);
    }

    #[test]
    fn test_workflow_cleanup_walks_tree() {
        let tracker = ScopeTracker::new();
        let r1 = make_ref("e1", "a", Scope::Execution);
        let r2 = make_ref("e2", "b", Scope::Execution);
        let r3 = make_ref("e3", "c", Scope::Workflow);
        tracker.register_ref(&r1, "e1", None, None).unwrap();
        tracker.register_ref(&r2, "e2", None, None).unwrap();
        // e2 and e3 are children of e1; the workflow ref lands on the root.
        tracker.register_ref(&r3, "e2", None, Some("e1")).unwrap();
        tracker.register_ref(&r3, "e3", None, Some("e1")).unwrap();

        let refs = tracker.get_refs_for_workflow_cleanup("e1");
        assert!(refs.contains(&r1.uri));
        assert!(refs.contains(&r2.uri));
        assert!(refs.contains(&r3.uri));

        let stats = tracker.stats();
        assert_eq!(stats.total_refs, 0);
        assert_eq!(stats.workflow_trees, 0);
    }

    #[test]
    fn test_root_memoization_is_transitive() {
        let tracker = ScopeTracker::new();
        let r2 = make_ref("e2", "a", Scope::Workflow);
        let r3 = make_ref("e3", "b", Scope::Workflow);
        tracker.register_ref(&r2, "e2", None, Some("e1")).unwrap();
        // e3's parent is e2, whose root is already memoized as e1.
        tracker.register_ref(&r3, "e3", None, Some("e2")).unwrap();

        let refs = tracker.get_refs_for_workflow_cleanup("e1");
        assert_eq!(refs.len(), 2);
    }
}
