//! Job execution.
//!
//! Steps run strictly in order in one shared environment. The first failing
//! step ends the job, and the whole job is bounded by its timeout.

use crate::environments::{Environment, HostEnvironment, JobEnvironment};
use crate::runner::{CommandRunner, OutputLine};
use crate::toolcache::RuntimeLocator;
use relstat_core::Error;
use relstat_core::plan::{CommandSpec, JobPlan, PlannedAction, PlannedStep};
use relstat_core::secrets::SecretMasker;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Progress of a running job.
#[derive(Debug, Clone)]
pub enum JobEvent {
    JobStarted {
        pipeline: String,
        job: String,
        label: String,
        steps: usize,
    },
    StepStarted {
        index: usize,
        total: usize,
        name: String,
        label: String,
        /// What the step will do, with secrets masked.
        description: String,
    },
    /// A masked line of command output.
    Output { step: String, line: OutputLine },
    StepFinished {
        index: usize,
        name: String,
        report: StepReport,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub success: bool,
    /// Exit code of the last command run, if the step ran one.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed {
        step: String,
        exit_code: Option<i32>,
        message: String,
    },
    TimedOut {
        minutes: u32,
    },
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub status: JobStatus,
    /// Reports for every step that started.
    pub steps: Vec<StepReport>,
    pub duration_ms: u64,
}

impl JobResult {
    pub fn success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    /// The failure as an error, if the job did not succeed.
    pub fn error(&self) -> Option<Error> {
        match &self.status {
            JobStatus::Succeeded => None,
            JobStatus::Failed {
                step,
                exit_code: Some(code),
                ..
            } => Some(Error::StepFailed {
                step: step.clone(),
                exit_code: *code,
            }),
            JobStatus::Failed { message, .. } => Some(Error::Internal(message.clone())),
            JobStatus::TimedOut { minutes } => Some(Error::JobTimeout { minutes: *minutes }),
        }
    }
}

struct StepOutcome {
    exit_code: Option<i32>,
    error: Option<String>,
}

impl StepOutcome {
    fn ok(exit_code: Option<i32>) -> Self {
        Self {
            exit_code,
            error: None,
        }
    }

    fn failed(exit_code: Option<i32>, error: String) -> Self {
        Self {
            exit_code,
            error: Some(error),
        }
    }
}

/// Runs a [`JobPlan`] on the host.
pub struct JobExecutor {
    runner: Arc<dyn CommandRunner>,
    locator: RuntimeLocator,
    environment: JobEnvironment,
}

impl JobExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, locator: RuntimeLocator) -> Self {
        Self {
            runner,
            locator,
            environment: JobEnvironment::from_process(),
        }
    }

    /// Replace the starting environment (the runner's own by default).
    pub fn with_environment(mut self, environment: JobEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub async fn execute(&self, plan: &JobPlan, events: mpsc::Sender<JobEvent>) -> JobResult {
        let start = Instant::now();
        info!(
            pipeline = %plan.pipeline,
            job = %plan.job,
            steps = plan.steps.len(),
            timeout_minutes = plan.timeout_minutes,
            "Starting job"
        );
        if plan.max_parallel > 1 {
            debug!(
                max_parallel = plan.max_parallel,
                "No matrix defined, running a single instance"
            );
        }

        let host = HostEnvironment::new(plan.sources_dir.clone());
        if let Err(e) = host.prepare().await {
            error!(error = %e, "Failed to prepare workspace");
            return JobResult {
                status: JobStatus::Failed {
                    step: "prepare".to_string(),
                    exit_code: None,
                    message: e.to_string(),
                },
                steps: Vec::new(),
                duration_ms: start.elapsed().as_millis() as u64,
            };
        }

        let _ = events
            .send(JobEvent::JobStarted {
                pipeline: plan.pipeline.clone(),
                job: plan.job.clone(),
                label: plan.label.clone(),
                steps: plan.steps.len(),
            })
            .await;

        let mut reports = Vec::new();
        let mut env = self.environment.clone();
        let status = match tokio::time::timeout(
            plan.timeout(),
            self.run_steps(plan, &mut env, &events, &mut reports),
        )
        .await
        {
            Ok(status) => status,
            Err(_) => {
                warn!(minutes = plan.timeout_minutes, "Job timed out");
                JobStatus::TimedOut {
                    minutes: plan.timeout_minutes,
                }
            }
        };

        if let Err(e) = host.cleanup().await {
            warn!(error = %e, "Workspace cleanup failed");
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        match &status {
            JobStatus::Succeeded => info!(job = %plan.job, duration_ms, "Job succeeded"),
            JobStatus::Failed { step, message, .. } => {
                error!(job = %plan.job, step = %step, error = %message, "Job failed")
            }
            JobStatus::TimedOut { .. } => {}
        }

        JobResult {
            status,
            steps: reports,
            duration_ms,
        }
    }

    async fn run_steps(
        &self,
        plan: &JobPlan,
        env: &mut JobEnvironment,
        events: &mpsc::Sender<JobEvent>,
        reports: &mut Vec<StepReport>,
    ) -> JobStatus {
        let total = plan.steps.len();

        for (index, step) in plan.steps.iter().enumerate() {
            let description = plan.masker.mask(&step.action.to_string());
            info!(step = %step.name, index, "{}", description);
            let _ = events
                .send(JobEvent::StepStarted {
                    index,
                    total,
                    name: step.name.clone(),
                    label: step.label.clone(),
                    description,
                })
                .await;

            let step_start = Instant::now();
            let outcome = self.run_step(step, env, &plan.masker, events).await;
            let report = StepReport {
                name: step.name.clone(),
                success: outcome.error.is_none(),
                exit_code: outcome.exit_code,
                duration_ms: step_start.elapsed().as_millis() as u64,
                error: outcome.error.map(|e| plan.masker.mask(&e)),
            };
            reports.push(report.clone());

            let _ = events
                .send(JobEvent::StepFinished {
                    index,
                    name: step.name.clone(),
                    report: report.clone(),
                })
                .await;

            if let Some(message) = report.error {
                return JobStatus::Failed {
                    step: step.name.clone(),
                    exit_code: report.exit_code,
                    message,
                };
            }
        }

        JobStatus::Succeeded
    }

    async fn run_step(
        &self,
        step: &PlannedStep,
        env: &mut JobEnvironment,
        masker: &SecretMasker,
        events: &mpsc::Sender<JobEvent>,
    ) -> StepOutcome {
        match &step.action {
            PlannedAction::UseRuntime(spec) => match self.locator.locate(spec).await {
                Ok(installation) => {
                    env.activate_runtime(&installation);
                    StepOutcome::ok(None)
                }
                Err(e) => StepOutcome::failed(None, e.to_string()),
            },
            PlannedAction::Export(vars) => {
                for (name, value) in vars {
                    env.export(name, value);
                }
                debug!(names = ?vars.keys().collect::<Vec<_>>(), "Exported variables");
                StepOutcome::ok(None)
            }
            PlannedAction::Exec(commands) => {
                let mut last = None;
                for command in commands {
                    let outcome = self.run_command(&step.name, command, env, masker, events).await;
                    if outcome.error.is_some() {
                        return outcome;
                    }
                    last = outcome.exit_code;
                }
                StepOutcome::ok(last)
            }
            PlannedAction::Venv { dir, command } => {
                let outcome = self.run_command(&step.name, command, env, masker, events).await;
                if outcome.error.is_none() {
                    env.activate_venv(dir);
                }
                outcome
            }
        }
    }

    async fn run_command(
        &self,
        step: &str,
        command: &CommandSpec,
        env: &JobEnvironment,
        masker: &SecretMasker,
        events: &mpsc::Sender<JobEvent>,
    ) -> StepOutcome {
        let command = env.resolve_program(command);
        let vars = env.to_env();
        let (tx, mut rx) = mpsc::channel::<OutputLine>(256);

        let forward = async {
            while let Some(mut line) = rx.recv().await {
                line.content = masker.mask(&line.content);
                let _ = events
                    .send(JobEvent::Output {
                        step: step.to_string(),
                        line,
                    })
                    .await;
            }
        };

        let (result, ()) = tokio::join!(self.runner.execute(&command, &vars, tx), forward);
        match result {
            Ok(result) if result.success => StepOutcome::ok(Some(result.exit_code)),
            Ok(result) => StepOutcome::failed(
                Some(result.exit_code),
                format!("{} exited with code {}", command.program, result.exit_code),
            ),
            Err(e) => StepOutcome::failed(None, e.to_string()),
        }
    }
}
