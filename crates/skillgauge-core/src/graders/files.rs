//! Workspace-file validators: `file` and `diff`.
//!
//! Both resolve paths inside the attempt's workspace and refuse paths that
//! would escape it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Grader, GraderError, GradingContext, Verdict};
use crate::workspace::confine;

fn workspace_path(workspace: &Path, rel: &str) -> Result<PathBuf, GraderError> {
    confine(workspace, rel).map_err(GraderError::InvalidPath)
}

fn check_relative(rel: &str) -> Result<(), String> {
    confine(Path::new("/workspace"), rel).map(|_| ())
}

/// Regex checks against one workspace file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ContentPattern {
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_match: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not_match: Vec<String>,
}

/// Existence and content checks on workspace files.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_exist: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not_exist: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content_patterns: Vec<ContentPattern>,
}

impl FileParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.must_exist.is_empty()
            && self.must_not_exist.is_empty()
            && self.content_patterns.is_empty()
        {
            return Err("must have at least one of must_exist, must_not_exist or content_patterns".into());
        }
        for path in self
            .must_exist
            .iter()
            .chain(&self.must_not_exist)
            .chain(self.content_patterns.iter().map(|p| &p.path))
        {
            check_relative(path)?;
        }
        for cp in &self.content_patterns {
            for pattern in cp.must_match.iter().chain(&cp.must_not_match) {
                Regex::new(pattern).map_err(|e| format!("invalid pattern {pattern:?}: {e}"))?;
            }
        }
        Ok(())
    }

    /// Each content pattern carries one implicit existence check.
    fn total_checks(&self) -> usize {
        self.must_exist.len()
            + self.must_not_exist.len()
            + self
                .content_patterns
                .iter()
                .map(|cp| cp.must_match.len() + cp.must_not_match.len() + 1)
                .sum::<usize>()
    }

    fn check_content(
        &self,
        workspace: &Path,
        cp: &ContentPattern,
        failures: &mut Vec<String>,
    ) -> Result<(), GraderError> {
        let content = match std::fs::read_to_string(workspace_path(workspace, &cp.path)?) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() == ErrorKind::NotFound {
                    failures.push(format!("File not found for content check: {}", cp.path));
                } else {
                    failures.push(format!("Failed to read file {}: {e}", cp.path));
                }
                // Keep the check count stable when the file is absent.
                for pattern in &cp.must_match {
                    failures.push(format!(
                        "File {} missing expected pattern (file not found): {pattern}",
                        cp.path
                    ));
                }
                for pattern in &cp.must_not_match {
                    failures.push(format!(
                        "File {} could not verify absence of pattern (file not found): {pattern}",
                        cp.path
                    ));
                }
                return Ok(());
            }
        };

        for pattern in &cp.must_match {
            if !Regex::new(pattern)?.is_match(&content) {
                failures.push(format!("File {} missing expected pattern: {pattern}", cp.path));
            }
        }
        for pattern in &cp.must_not_match {
            if Regex::new(pattern)?.is_match(&content) {
                failures.push(format!("File {} contains forbidden pattern: {pattern}", cp.path));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Grader for FileParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        let Some(workspace) = ctx.workspace_dir.as_deref() else {
            return Ok(Verdict::fail("No workspace directory available for file grading"));
        };

        let mut failures = Vec::new();
        for rel in &self.must_exist {
            if !workspace_path(workspace, rel)?.exists() {
                failures.push(format!("File must exist but not found: {rel}"));
            }
        }
        for rel in &self.must_not_exist {
            if workspace_path(workspace, rel)?.exists() {
                failures.push(format!("File must not exist but found: {rel}"));
            }
        }
        for cp in &self.content_patterns {
            self.check_content(workspace, cp, &mut failures)?;
        }

        let details = json!({ "failures": failures.clone() });
        Ok(Verdict::from_checks(self.total_checks(), failures, "All file checks passed")
            .with_details(details))
    }
}

/// One file expected in the workspace after the attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExpectedFile {
    pub path: String,
    /// Reference file the workspace copy must equal byte for byte.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    /// Line fragments: `+text` or `text` must be present, `-text` absent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contains: Vec<String>,
}

/// Snapshot and fragment comparison of workspace files.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DiffParams {
    #[serde(default)]
    pub expected_files: Vec<ExpectedFile>,
    /// Directory snapshots resolve against; defaults to the spec directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
}

impl DiffParams {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.expected_files.is_empty() {
            return Err("must have at least one expected_files entry".into());
        }
        for (i, ef) in self.expected_files.iter().enumerate() {
            if ef.path.trim().is_empty() {
                return Err(format!("expected_files[{i}] missing required 'path'"));
            }
            check_relative(&ef.path)?;
            if ef.snapshot.is_none() && ef.contains.is_empty() {
                return Err(format!(
                    "expected_files[{i}] ('{}') must have 'snapshot' or 'contains'",
                    ef.path
                ));
            }
        }
        Ok(())
    }

    fn total_checks(&self) -> usize {
        self.expected_files
            .iter()
            .map(|ef| 1 + usize::from(ef.snapshot.is_some()) + ef.contains.len())
            .sum()
    }

    fn snapshot_path(&self, spec_dir: &Path, snapshot: &str) -> PathBuf {
        let snapshot = Path::new(snapshot);
        if snapshot.is_absolute() {
            return snapshot.to_path_buf();
        }
        match &self.context_dir {
            Some(dir) => spec_dir.join(dir).join(snapshot),
            None => spec_dir.join(snapshot),
        }
    }

    fn check_file(&self, ctx: &GradingContext, workspace: &Path, ef: &ExpectedFile) -> Result<Vec<String>, GraderError> {
        let mut failures = Vec::new();
        let actual = match std::fs::read(workspace_path(workspace, &ef.path)?) {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() == ErrorKind::NotFound {
                    failures.push(format!("Expected file not found in workspace: {}", ef.path));
                } else {
                    failures.push(format!("Failed to read workspace file {}: {e}", ef.path));
                }
                if ef.snapshot.is_some() {
                    failures.push(format!(
                        "Snapshot comparison skipped (file not found): {}",
                        ef.path
                    ));
                }
                for fragment in &ef.contains {
                    failures.push(format!(
                        "Contains check skipped (file not found): {} -> {fragment}",
                        ef.path
                    ));
                }
                return Ok(failures);
            }
        };

        if let Some(snapshot) = &ef.snapshot {
            match std::fs::read(self.snapshot_path(&ctx.spec_dir, snapshot)) {
                Ok(expected) if expected == actual => {}
                Ok(_) => failures.push(format!(
                    "File {} does not match snapshot {snapshot}",
                    ef.path
                )),
                Err(e) => failures.push(format!(
                    "Failed to read snapshot file {snapshot} for {}: {e}",
                    ef.path
                )),
            }
        }

        let text = String::from_utf8_lossy(&actual);
        for fragment in &ef.contains {
            let (must_be_present, body) = match fragment.strip_prefix('-') {
                Some(rest) => (false, rest),
                None => (true, fragment.strip_prefix('+').unwrap_or(fragment)),
            };
            let body = body.trim();
            if body.is_empty() {
                continue;
            }
            let found = text.contains(body);
            if must_be_present && !found {
                failures.push(format!("File {} missing expected fragment: {body}", ef.path));
            } else if !must_be_present && found {
                failures.push(format!(
                    "File {} contains fragment that should be absent: {body}",
                    ef.path
                ));
            }
        }
        Ok(failures)
    }
}

#[async_trait]
impl Grader for DiffParams {
    async fn grade(&self, ctx: &GradingContext) -> Result<Verdict, GraderError> {
        let Some(workspace) = ctx.workspace_dir.as_deref() else {
            return Ok(Verdict::fail("No workspace directory available for diff grading"));
        };

        let mut failures = Vec::new();
        for ef in &self.expected_files {
            failures.extend(self.check_file(ctx, workspace, ef)?);
        }

        let details = json!({
            "expected_files": self.expected_files,
            "failures": failures.clone(),
        });
        Ok(Verdict::from_checks(self.total_checks(), failures, "All diff checks passed")
            .with_details(details))
    }
}
