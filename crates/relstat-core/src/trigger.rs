//! Trigger matching and evaluation.

use crate::pipeline::{BranchFilter, PipelineDefinition};

/// Event that can start a pipeline.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    Push { branch: String },
    Manual { actor: Option<String> },
}

/// Matcher for determining if a pipeline should be triggered.
#[derive(Debug, Default)]
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Check if a pipeline should be triggered by an event.
    ///
    /// Manual runs are always allowed; pushes go through the branch filter.
    pub fn matches(&self, pipeline: &PipelineDefinition, event: &TriggerEvent) -> bool {
        match event {
            TriggerEvent::Manual { .. } => true,
            TriggerEvent::Push { branch } => {
                self.branch_matches(&pipeline.trigger.branches, normalize_branch(branch))
            }
        }
    }

    fn branch_matches(&self, filter: &BranchFilter, branch: &str) -> bool {
        let included = filter.include.is_empty()
            || filter.include.iter().any(|p| glob_match(p, branch));
        let excluded = filter.exclude.iter().any(|p| glob_match(p, branch));
        included && !excluded
    }
}

fn normalize_branch(branch: &str) -> &str {
    branch.strip_prefix("refs/heads/").unwrap_or(branch)
}

fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = normalize_branch(pattern);
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return text.starts_with(prefix);
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        let prefix_slash = format!("{}/", prefix);
        if let Some(rest) = text.strip_prefix(&prefix_slash) {
            return !rest.contains('/');
        }
        return false;
    }
    if let Some((head, tail)) = pattern.split_once('*') {
        return text.len() >= head.len() + tail.len()
            && text.starts_with(head)
            && text.ends_with(tail);
    }
    pattern == text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(include: &[&str], exclude: &[&str]) -> PipelineDefinition {
        let mut def = PipelineDefinition::builtin().unwrap();
        def.trigger.branches = BranchFilter {
            include: include.iter().map(|s| s.to_string()).collect(),
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        };
        def
    }

    fn push(branch: &str) -> TriggerEvent {
        TriggerEvent::Push {
            branch: branch.to_string(),
        }
    }

    #[test]
    fn test_builtin_never_triggers_on_push() {
        let def = PipelineDefinition::builtin().unwrap();
        let matcher = TriggerMatcher::new();
        for branch in ["main", "master", "release-sdk-status", "feature/x", "refs/heads/main"] {
            assert!(!matcher.matches(&def, &push(branch)), "{branch}");
        }
        assert!(matcher.matches(&def, &TriggerEvent::Manual { actor: None }));
    }

    #[test]
    fn test_branch_match_exact() {
        let matcher = TriggerMatcher::new();
        let def = pipeline(&["main"], &[]);
        assert!(matcher.matches(&def, &push("main")));
        assert!(matcher.matches(&def, &push("refs/heads/main")));
        assert!(!matcher.matches(&def, &push("develop")));
    }

    #[test]
    fn test_branch_match_glob() {
        let matcher = TriggerMatcher::new();
        let def = pipeline(&["feature/*", "release/**"], &["feature/wip"]);
        assert!(matcher.matches(&def, &push("feature/foo")));
        assert!(!matcher.matches(&def, &push("feature/wip")));
        assert!(!matcher.matches(&def, &push("feature/a/b")));
        assert!(matcher.matches(&def, &push("release/v1/hotfix")));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let matcher = TriggerMatcher::new();
        assert!(matcher.matches(&pipeline(&[], &[]), &push("any-branch")));
    }

    #[test]
    fn test_infix_glob() {
        assert!(glob_match("release-*-sdk", "release-2024-sdk"));
        assert!(!glob_match("ab*ba", "aba"));
    }
}
