//! Loading a benchmark spec and resolving its tasks.
//!
//! Everything that can be checked before a task runs is checked here, so a
//! bad spec fails with a configuration error instead of a half-finished run:
//! spec and task structure, validator parameters, duplicate task ids and
//! validator names, and the presence of on-disk fixtures.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::{BenchmarkSpec, Result, SkillGaugeError, TaskDefinition, TriggerSpec};
use crate::workspace::{self, confine};

/// A spec together with everything resolved from disk.
#[derive(Debug, Clone)]
pub struct LoadedSpec {
    pub spec: BenchmarkSpec,
    pub spec_path: PathBuf,
    /// Directory relative paths in the spec resolve against.
    pub spec_dir: PathBuf,
    /// Every task in declaration order, including disabled ones.
    pub tasks: Vec<TaskDefinition>,
    pub trigger: Option<TriggerSpec>,
}

/// Load the spec at `path`, its tasks and an adjacent trigger spec.
pub fn load_spec(path: &Path) -> Result<LoadedSpec> {
    let text = fs::read_to_string(path).map_err(|e| SkillGaugeError::UnresolvedPath {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let spec = BenchmarkSpec::from_yaml_str(&text)?;
    let spec_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let tasks = match &spec.tasks_from {
        Some(dataset) => load_dataset_tasks(&spec_dir, dataset)?,
        None => load_task_files(&spec_dir, &spec.tasks)?,
    };
    check_tasks(&spec, &spec_dir, &tasks)?;

    let trigger = TriggerSpec::load_beside(path)?;
    debug!(
        spec = %spec.name,
        tasks = tasks.len(),
        trigger_tests = trigger.is_some(),
        "spec loaded"
    );

    Ok(LoadedSpec {
        spec,
        spec_path: path.to_path_buf(),
        spec_dir,
        tasks,
        trigger,
    })
}

/// Expand task globs relative to `spec_dir`, in pattern order then path order.
fn load_task_files(spec_dir: &Path, patterns: &[String]) -> Result<Vec<TaskDefinition>> {
    if patterns.is_empty() {
        return Err(SkillGaugeError::InvalidSpec(
            "no tasks declared (set `tasks` or `tasks_from`)".to_string(),
        ));
    }

    let mut files: Vec<PathBuf> = Vec::new();
    let mut seen = HashSet::new();
    for pattern in patterns {
        let full = spec_dir.join(pattern);
        let full = full.to_string_lossy();
        let paths = glob::glob(&full)
            .map_err(|e| SkillGaugeError::Config(format!("invalid task pattern {pattern:?}: {e}")))?;
        for entry in paths {
            let path = entry.map_err(|e| SkillGaugeError::UnresolvedPath {
                path: e.path().to_path_buf(),
                reason: e.to_string(),
            })?;
            if path.is_file() && seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    if files.is_empty() {
        return Err(SkillGaugeError::UnresolvedPath {
            path: spec_dir.to_path_buf(),
            reason: format!("no task files matched patterns {patterns:?}"),
        });
    }

    files
        .iter()
        .map(|path| {
            let text = fs::read_to_string(path)?;
            TaskDefinition::from_yaml_str(&text).map_err(|e| match e {
                SkillGaugeError::Yaml(inner) => SkillGaugeError::InvalidTask {
                    task: path.display().to_string(),
                    reason: inner.to_string(),
                },
                other => other,
            })
        })
        .collect()
}

/// Generate prompt-only tasks from a YAML or JSON list of rows.
///
/// Each row is a map; `id`, `name` and `prompt` columns are recognised and
/// `{{column}}` placeholders in the prompt are filled from the row.
fn load_dataset_tasks(spec_dir: &Path, dataset: &str) -> Result<Vec<TaskDefinition>> {
    let path = confine(spec_dir, dataset).map_err(|reason| SkillGaugeError::UnresolvedPath {
        path: PathBuf::from(dataset),
        reason,
    })?;
    let text = fs::read_to_string(&path).map_err(|e| SkillGaugeError::UnresolvedPath {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    let rows: Vec<BTreeMap<String, serde_json::Value>> = serde_yaml::from_str(&text)?;
    if rows.is_empty() {
        return Err(SkillGaugeError::InvalidSpec(format!(
            "dataset {} has no rows",
            path.display()
        )));
    }

    Ok(rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let columns: BTreeMap<&str, String> = row
                .iter()
                .map(|(k, v)| (k.as_str(), scalar_text(v)))
                .collect();
            let fallback = format!("row-{}", i + 1);
            let pick = |key: &str| columns.get(key).filter(|v| !v.is_empty()).cloned();

            let name = pick("name").unwrap_or_else(|| fallback.clone());
            let id = pick("id").or_else(|| pick("name")).unwrap_or(fallback);
            let prompt = render_template(&pick("prompt").unwrap_or_default(), &columns);
            TaskDefinition::generated(id, name, prompt)
        })
        .collect())
}

fn scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace `{{key}}` with the row's value; unknown keys stay as written.
fn render_template(template: &str, vars: &BTreeMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Cross-task checks: unique ids, unique validator names per task, fixtures.
fn check_tasks(spec: &BenchmarkSpec, spec_dir: &Path, tasks: &[TaskDefinition]) -> Result<()> {
    let mut ids = HashSet::new();
    for task in tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(SkillGaugeError::invalid_task(&task.id, "duplicate task id"));
        }

        let mut names = HashSet::new();
        let task_graders = task.effective_graders();
        for grader in spec.graders.iter().chain(task_graders.iter()) {
            if !names.insert(grader.name.as_str()) {
                return Err(SkillGaugeError::invalid_grader(
                    &grader.name,
                    format!("duplicate validator name in task {}", task.id),
                ));
            }
        }

        let root = workspace::fixture_root(spec, task, spec_dir);
        workspace::check_fixtures(task, &root)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = "name: demo\nskill: demo-skill\nconfig:\n  trials_per_task: 1\n  timeout_seconds: 30\ntasks:\n  - tasks/*.yaml\n";

    fn write(dir: &Path, rel: &str, text: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_loads_tasks_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "eval.yaml", SPEC);
        write(dir.path(), "tasks/b.yaml", "id: b\ninputs:\n  prompt: second\n");
        write(dir.path(), "tasks/a.yaml", "id: a\ninputs:\n  prompt: first\n");

        let loaded = load_spec(&dir.path().join("eval.yaml")).unwrap();
        let ids: Vec<&str> = loaded.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(loaded.spec_dir, dir.path());
        assert!(loaded.trigger.is_none());
    }

    #[test]
    fn test_no_matching_task_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "eval.yaml", SPEC);
        let err = load_spec(&dir.path().join("eval.yaml")).unwrap_err();
        assert!(matches!(err, SkillGaugeError::UnresolvedPath { .. }));
    }

    #[test]
    fn test_invalid_trials_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "eval.yaml",
            &SPEC.replace("trials_per_task: 1", "trials_per_task: 0"),
        );
        write(dir.path(), "tasks/a.yaml", "id: a\n");
        assert!(matches!(
            load_spec(&dir.path().join("eval.yaml")).unwrap_err(),
            SkillGaugeError::Config(_)
        ));
    }

    #[test]
    fn test_duplicate_ids_and_grader_names() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "eval.yaml", SPEC);
        write(dir.path(), "tasks/a.yaml", "id: same\n");
        write(dir.path(), "tasks/b.yaml", "id: same\n");
        assert!(load_spec(&dir.path().join("eval.yaml")).is_err());

        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "eval.yaml",
            &format!("{SPEC}graders:\n  - type: keyword\n    name: output_contains\n"),
        );
        write(
            dir.path(),
            "tasks/a.yaml",
            "id: a\nexpected:\n  output_contains: [done]\n",
        );
        assert!(matches!(
            load_spec(&dir.path().join("eval.yaml")).unwrap_err(),
            SkillGaugeError::InvalidGrader { .. }
        ));
    }

    #[test]
    fn test_missing_fixture_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "eval.yaml", SPEC);
        write(
            dir.path(),
            "tasks/a.yaml",
            "id: a\ninputs:\n  files:\n    - path: app.py\n",
        );
        assert!(matches!(
            load_spec(&dir.path().join("eval.yaml")).unwrap_err(),
            SkillGaugeError::UnresolvedPath { .. }
        ));

        write(dir.path(), "fixtures/app.py", "print(1)\n");
        load_spec(&dir.path().join("eval.yaml")).unwrap();
    }

    #[test]
    fn test_unknown_grader_field_is_reported_with_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "eval.yaml", SPEC);
        write(
            dir.path(),
            "tasks/a.yaml",
            "id: a\ngraders:\n  - type: keyword\n    name: k\n    config:\n      must_contians: [x]\n",
        );
        let err = load_spec(&dir.path().join("eval.yaml")).unwrap_err();
        assert!(err.to_string().contains("a.yaml"));
    }

    #[test]
    fn test_dataset_generates_tasks() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "eval.yaml",
            "name: ds\nconfig:\n  trials_per_task: 1\n  timeout_seconds: 5\ntasks_from: data/rows.yaml\n",
        );
        write(
            dir.path(),
            "data/rows.yaml",
            "- id: r1\n  name: first\n  lang: rust\n  prompt: 'Explain {{lang}} lifetimes'\n- prompt: plain\n  n: 3\n",
        );
        let loaded = load_spec(&dir.path().join("eval.yaml")).unwrap();
        assert_eq!(loaded.tasks.len(), 2);
        assert_eq!(loaded.tasks[0].id, "r1");
        assert_eq!(loaded.tasks[0].inputs.prompt, "Explain rust lifetimes");
        assert_eq!(loaded.tasks[1].id, "row-2");
        assert_eq!(loaded.tasks[1].name, "row-2");
    }

    #[test]
    fn test_dataset_must_stay_in_spec_dir() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "eval.yaml",
            "name: ds\nconfig:\n  trials_per_task: 1\n  timeout_seconds: 5\ntasks_from: ../rows.yaml\n",
        );
        assert!(load_spec(&dir.path().join("eval.yaml")).is_err());
    }

    #[test]
    fn test_render_template() {
        let vars: BTreeMap<&str, String> = [("a", "1".to_string())].into_iter().collect();
        assert_eq!(render_template("x {{a}} {{ a }} {{b}} {{", &vars), "x 1 1 {{b}} {{");
    }
}
