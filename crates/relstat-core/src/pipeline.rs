//! Pipeline definition types.
//!
//! These types represent the user-authored pipeline YAML configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// The release-SDK status pipeline shipped with the binary.
pub const BUILTIN_PIPELINE: &str = include_str!("../pipelines/release-sdk-status.yaml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub trigger: TriggerConfig,
    /// Values supplied from outside the file (pipeline variables and secrets).
    #[serde(default)]
    pub inputs: Vec<InputDefinition>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub jobs: Vec<JobDefinition>,
}

impl PipelineDefinition {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_PIPELINE)
    }

    /// Look up a job by name, or the only job when `name` is `None`.
    pub fn job(&self, name: Option<&str>) -> Result<&JobDefinition> {
        match name {
            Some(name) => self
                .jobs
                .iter()
                .find(|j| j.name == name)
                .ok_or_else(|| Error::JobNotFound(name.to_string())),
            None => match self.jobs.as_slice() {
                [job] => Ok(job),
                [] => Err(Error::InvalidPipeline("pipeline defines no jobs".into())),
                _ => Err(Error::InvalidPipeline(
                    "pipeline defines several jobs, pick one by name".into(),
                )),
            },
        }
    }

    pub fn secret_names(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter(|i| i.secret)
            .map(|i| i.name.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub branches: BranchFilter,
}

/// Branch patterns for push triggers. An exclude-only filter includes `*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Secret values are masked in all output.
    #[serde(default)]
    pub secret: bool,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default = "default_timeout")]
    pub timeout_minutes: u32,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub steps: Vec<StepDefinition>,
}

fn default_timeout() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_vm_image")]
    pub vm_image: String,
}

fn default_vm_image() -> String {
    "ubuntu-latest".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            vm_image: default_vm_image(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Upper bound on concurrently running instances of the job.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: u32,
}

fn default_max_parallel() -> u32 {
    1
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Extra environment for this step only.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_shell() -> String {
    "bash".to_string()
}

impl StepDefinition {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// Select a language runtime and put it first on `PATH`.
    UseRuntime(RuntimeSpec),
    /// Configure the git identity used by later steps.
    GitIdentity(GitIdentity),
    Clone(CloneSpec),
    /// Export variables to every later step.
    Export(BTreeMap<String, ExportValue>),
    /// Create a virtual environment and activate it.
    Venv(VenvSpec),
    /// Install dependencies from a requirements manifest.
    Install(InstallSpec),
    Checkout(CheckoutSpec),
    /// Invoke a script with the active interpreter.
    Script(ScriptSpec),
    /// Arbitrary shell command.
    Run(String),
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::UseRuntime(_) => "use_runtime",
            StepAction::GitIdentity(_) => "git_identity",
            StepAction::Clone(_) => "clone",
            StepAction::Export(_) => "export",
            StepAction::Venv(_) => "venv",
            StepAction::Install(_) => "install",
            StepAction::Checkout(_) => "checkout",
            StepAction::Script(_) => "script",
            StepAction::Run(_) => "run",
        }
    }

    /// Whether the step runs the interpreter selected by `use_runtime`.
    pub fn needs_runtime(&self) -> bool {
        matches!(
            self,
            StepAction::Venv(_) | StepAction::Install(_) | StepAction::Script(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    #[serde(default = "default_runtime")]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub architecture: Architecture,
}

fn default_runtime() -> String {
    "python".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    #[default]
    X64,
    X86,
    Arm64,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::X64 => "x64",
            Architecture::X86 => "x86",
            Architecture::Arm64 => "arm64",
        }
    }

    /// Whether this architecture matches the machine the runner is on.
    pub fn is_host(&self) -> bool {
        let host = std::env::consts::ARCH;
        match self {
            Architecture::X64 => host == "x86_64",
            Architecture::X86 => host == "x86",
            Architecture::Arm64 => host == "aarch64",
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitIdentity {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneSpec {
    pub repository: String,
    pub path: String,
    #[serde(default)]
    pub credentials: Option<CloneCredentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneCredentials {
    pub username: String,
    pub token: String,
}

/// An exported value: a literal string or a path resolved to absolute form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportValue {
    Path { path: String },
    Value(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenvSpec {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSpec {
    pub requirements: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSpec {
    pub path: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSpec {
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
}
