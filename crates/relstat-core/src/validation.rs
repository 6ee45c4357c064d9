//! Structural checks on a pipeline definition.
//!
//! These run before planning so that ordering mistakes are reported without
//! resolving any secrets.

use crate::interpolation::InterpolationContext;
use crate::pipeline::{ExportValue, JobDefinition, PipelineDefinition, StepAction};
use crate::plan::resolve_path;
use crate::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A single problem found in a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub job: Option<String>,
    pub step: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.job, &self.step) {
            (Some(job), Some(step)) => write!(f, "{}/{}: {}", job, step, self.message),
            (Some(job), None) => write!(f, "{}: {}", job, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Validate a pipeline, returning every issue found.
pub fn validate(pipeline: &PipelineDefinition) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if pipeline.name.trim().is_empty() {
        issues.push(issue(None, None, "pipeline name is empty"));
    }
    if pipeline.jobs.is_empty() {
        issues.push(issue(None, None, "pipeline defines no jobs"));
    }

    let mut input_names = HashSet::new();
    for input in &pipeline.inputs {
        if !input_names.insert(input.name.as_str()) {
            issues.push(issue(None, None, &format!("input {} declared twice", input.name)));
        }
    }

    let mut job_names = HashSet::new();
    for job in &pipeline.jobs {
        if !job_names.insert(job.name.as_str()) {
            issues.push(issue(Some(&job.name), None, "job name is not unique"));
        }
        validate_job(pipeline, job, &mut issues);
    }

    issues
}

/// Validate and turn any issues into a single error.
pub fn ensure_valid(pipeline: &PipelineDefinition) -> Result<()> {
    let issues = validate(pipeline);
    if issues.is_empty() {
        return Ok(());
    }
    let lines: Vec<_> = issues.iter().map(ToString::to_string).collect();
    Err(Error::PipelineValidation(lines.join("; ")))
}

fn validate_job(
    pipeline: &PipelineDefinition,
    job: &JobDefinition,
    issues: &mut Vec<ValidationIssue>,
) {
    let job_name = Some(job.name.as_str());

    if job.steps.is_empty() {
        issues.push(issue(job_name, None, "job has no steps"));
    }
    if job.timeout_minutes == 0 {
        issues.push(issue(job_name, None, "timeout_minutes must be greater than 0"));
    }
    if job.strategy.max_parallel == 0 {
        issues.push(issue(job_name, None, "strategy.max_parallel must be at least 1"));
    }

    let known: HashSet<&str> = pipeline
        .inputs
        .iter()
        .map(|i| i.name.as_str())
        .chain(pipeline.variables.keys().map(String::as_str))
        .chain(job.variables.keys().map(String::as_str))
        .collect();

    // Paths are compared relative to a placeholder sources directory.
    let base = Path::new("/sources");
    let mut step_names = HashSet::new();
    let mut runtime_seen = false;
    let mut cloned: HashSet<PathBuf> = HashSet::new();

    for step in &job.steps {
        let step_name = Some(step.name.as_str());
        let mut report = |message: String| issues.push(issue(job_name, step_name, &message));

        if !step_names.insert(step.name.as_str()) {
            report("step name is not unique".to_string());
        }

        for field in typed_fields(&step.action)
            .into_iter()
            .chain(step.working_directory.as_deref())
            .chain(step.env.values().map(String::as_str))
        {
            for name in InterpolationContext::references(field) {
                if !name.starts_with("env.") && !known.contains(name.as_str()) {
                    report(format!("references undefined variable {}", name));
                }
            }
        }

        // A script working outside the sources directory must run in a clone.
        if let (StepAction::Script(_), Some(raw)) = (&step.action, &step.working_directory) {
            let dir = resolve_path(base, Path::new(raw));
            if !dir.starts_with(base) && !cloned.iter().any(|c| dir.starts_with(c)) {
                report(format!("script runs in {} before it is cloned", raw));
            }
        }

        match &step.action {
            StepAction::UseRuntime(spec) => {
                if spec.version.trim().is_empty() {
                    report("use_runtime version is empty".to_string());
                }
                runtime_seen = true;
            }
            StepAction::Clone(spec) => {
                if !runtime_seen && job.steps.iter().any(|s| s.action.kind() == "use_runtime") {
                    report("clone runs before the runtime is installed".to_string());
                }
                if !cloned.insert(resolve_path(base, Path::new(&spec.path))) {
                    report(format!("{} is cloned twice", spec.path));
                }
            }
            StepAction::Checkout(spec) => {
                if !cloned.contains(&resolve_path(base, Path::new(&spec.path))) {
                    report(format!("checkout of {} before it is cloned", spec.path));
                }
            }
            action if action.needs_runtime() && !runtime_seen => {
                report(format!("{} step needs an earlier use_runtime step", action.kind()));
            }
            _ => {}
        }
    }
}

/// String fields of a typed step that must interpolate strictly.
fn typed_fields(action: &StepAction) -> Vec<&str> {
    match action {
        StepAction::UseRuntime(spec) => vec![spec.version.as_str()],
        StepAction::GitIdentity(id) => vec![id.email.as_str(), id.name.as_str()],
        StepAction::Clone(spec) => {
            let mut fields = vec![spec.repository.as_str(), spec.path.as_str()];
            if let Some(creds) = &spec.credentials {
                fields.push(creds.username.as_str());
                fields.push(creds.token.as_str());
            }
            fields
        }
        StepAction::Export(vars) => vars
            .values()
            .map(|v| match v {
                ExportValue::Value(s) => s.as_str(),
                ExportValue::Path { path } => path.as_str(),
            })
            .collect(),
        StepAction::Venv(spec) => vec![spec.path.as_str()],
        StepAction::Install(spec) => vec![spec.requirements.as_str()],
        StepAction::Checkout(spec) => vec![spec.path.as_str(), spec.branch.as_str()],
        StepAction::Script(spec) => std::iter::once(spec.path.as_str())
            .chain(spec.args.iter().map(String::as_str))
            .collect(),
        // Shell scripts may use `$(...)` for command substitution.
        StepAction::Run(_) => Vec::new(),
    }
}

fn issue(job: Option<&str>, step: Option<&str>, message: &str) -> ValidationIssue {
    ValidationIssue {
        job: job.map(str::to_string),
        step: step.map(str::to_string),
        message: message.to_string(),
    }
}
