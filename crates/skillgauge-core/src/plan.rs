//! Runtime overrides merged over a loaded spec into an immutable plan.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::has_non_deterministic_graders;
use crate::domain::{BenchmarkSpec, Result, SkillGaugeError, TaskDefinition, TriggerSpec};
use crate::filter::TaskFilter;
use crate::loader::{load_spec, LoadedSpec};

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".skillgauge-cache";

/// Overrides from the command line or an embedding caller.
///
/// `None` keeps the spec's own setting.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub parallel: Option<bool>,
    pub workers: Option<usize>,
    pub fail_fast: Option<bool>,
    pub max_attempts: Option<u32>,
    pub cache: bool,
    pub cache_dir: Option<PathBuf>,
    pub task_patterns: Vec<String>,
    pub tag_patterns: Vec<String>,
    pub baseline: bool,
}

/// Everything a run needs, resolved once and never mutated.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub spec: Arc<BenchmarkSpec>,
    pub spec_dir: PathBuf,
    /// Selected tasks, in declaration order.
    pub tasks: Arc<Vec<TaskDefinition>>,
    pub trigger: Option<Arc<TriggerSpec>>,
    /// Cache directory, or `None` when caching is off for this run.
    pub cache_dir: Option<PathBuf>,
    pub baseline: bool,
    /// False on the baseline pass: requests carry no skill.
    pub skills_enabled: bool,
}

impl RunPlan {
    /// Load the spec at `path` and apply `options`.
    pub fn from_path(path: &Path, options: &RunOptions) -> Result<Self> {
        Self::resolve(load_spec(path)?, options)
    }

    pub fn resolve(loaded: LoadedSpec, options: &RunOptions) -> Result<Self> {
        let LoadedSpec {
            mut spec,
            spec_dir,
            tasks,
            trigger,
            ..
        } = loaded;

        if let Some(parallel) = options.parallel {
            spec.config.parallel = parallel;
        }
        if let Some(workers) = options.workers {
            if workers == 0 {
                return Err(SkillGaugeError::Config("workers must be at least 1".into()));
            }
            spec.config.max_workers = workers;
        }
        if let Some(fail_fast) = options.fail_fast {
            spec.config.fail_fast = fail_fast;
        }
        if let Some(attempts) = options.max_attempts {
            if attempts == 0 {
                return Err(SkillGaugeError::Config(
                    "max attempts must be at least 1".into(),
                ));
            }
            spec.config.max_attempts = attempts;
        }

        let filter = TaskFilter::new(&options.task_patterns, &options.tag_patterns)?;
        let tasks = filter.apply(&tasks)?;

        let mut baseline = options.baseline || spec.baseline;
        if baseline && !spec.has_skills() {
            warn!(
                spec = %spec.name,
                "baseline comparison requested but no skill_directories or required_skills are configured; running once"
            );
            baseline = false;
        }
        spec.baseline = baseline;

        let cache_dir = if !options.cache {
            None
        } else if has_non_deterministic_graders(&spec, &tasks) {
            info!(
                spec = %spec.name,
                "caching disabled: a configured validator is non-deterministic"
            );
            None
        } else {
            Some(
                options
                    .cache_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            )
        };

        Ok(Self {
            spec: Arc::new(spec),
            spec_dir,
            tasks: Arc::new(tasks),
            trigger: trigger.map(Arc::new),
            cache_dir,
            baseline,
            skills_enabled: true,
        })
    }

    /// Concurrent task slots: the pool size when parallel, else one.
    pub fn workers(&self) -> usize {
        if self.spec.config.parallel {
            self.spec.config.effective_workers()
        } else {
            1
        }
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_dir.is_some()
    }

    /// The same plan against a skills-stripped spec, for the baseline pass.
    pub fn without_skills(&self) -> Self {
        let mut spec = self.spec.without_skills();
        spec.baseline = false;
        Self {
            spec: Arc::new(spec),
            baseline: false,
            skills_enabled: false,
            ..self.clone()
        }
    }
}
