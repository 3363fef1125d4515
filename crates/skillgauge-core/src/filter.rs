//! Task selection: enablement plus `--task` / `--tags` glob filters.

use glob::Pattern;

use crate::domain::{Result, SkillGaugeError, TaskDefinition};

/// Compiled task filters. Empty lists match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    names: Vec<Pattern>,
    tags: Vec<Pattern>,
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| SkillGaugeError::Config(format!("invalid filter pattern {p:?}: {e}")))
        })
        .collect()
}

impl TaskFilter {
    pub fn new(name_patterns: &[String], tag_patterns: &[String]) -> Result<Self> {
        Ok(Self {
            names: compile(name_patterns)?,
            tags: compile(tag_patterns)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.tags.is_empty()
    }

    /// A name pattern matches the display name or the id; a tag pattern
    /// matches any tag. Both kinds must match when both are given.
    pub fn matches(&self, task: &TaskDefinition) -> bool {
        let name_ok = self.names.is_empty()
            || self
                .names
                .iter()
                .any(|p| p.matches(&task.name) || p.matches(&task.id));
        let tag_ok = self.tags.is_empty()
            || self
                .tags
                .iter()
                .any(|p| task.tags.iter().any(|tag| p.matches(tag)));
        name_ok && tag_ok
    }

    /// Enabled tasks that pass the filters, in their original order.
    ///
    /// Selecting nothing is a configuration error.
    pub fn apply(&self, tasks: &[TaskDefinition]) -> Result<Vec<TaskDefinition>> {
        let selected: Vec<TaskDefinition> = tasks
            .iter()
            .filter(|t| t.enabled && self.matches(t))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(SkillGaugeError::Config(if self.is_empty() {
                "no enabled tasks".to_string()
            } else {
                "no tasks match the given --task/--tags filters".to_string()
            }));
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, name: &str, tags: &[&str], enabled: bool) -> TaskDefinition {
        let mut t = TaskDefinition::generated(id, name, "p");
        t.tags = tags.iter().map(|s| s.to_string()).collect();
        t.enabled = enabled;
        t
    }

    fn tasks() -> Vec<TaskDefinition> {
        vec![
            task("login-001", "Login flow", &["auth", "smoke"], true),
            task("search-001", "Search ranking", &["search"], true),
            task("logout-001", "Logout", &["auth"], false),
        ]
    }

    fn ids(selected: &[TaskDefinition]) -> Vec<&str> {
        selected.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_disabled_tasks_skipped() {
        let selected = TaskFilter::default().apply(&tasks()).unwrap();
        assert_eq!(ids(&selected), vec!["login-001", "search-001"]);
    }

    #[test]
    fn test_name_pattern_matches_name_or_id() {
        let f = TaskFilter::new(&["Search*".into()], &[]).unwrap();
        assert_eq!(ids(&f.apply(&tasks()).unwrap()), vec!["search-001"]);
        let f = TaskFilter::new(&["login-*".into()], &[]).unwrap();
        assert_eq!(ids(&f.apply(&tasks()).unwrap()), vec!["login-001"]);
    }

    #[test]
    fn test_both_filter_kinds_must_match() {
        let f = TaskFilter::new(&["*-001".into()], &["auth".into()]).unwrap();
        assert_eq!(ids(&f.apply(&tasks()).unwrap()), vec!["login-001"]);
    }

    #[test]
    fn test_empty_selection_is_error() {
        let f = TaskFilter::new(&[], &["nope".into()]).unwrap();
        assert!(matches!(f.apply(&tasks()), Err(SkillGaugeError::Config(_))));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(TaskFilter::new(&["[".into()], &[]).is_err());
    }
}
