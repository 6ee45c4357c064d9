//! Step execution engine for relstat.

pub mod environments;
pub mod executor;
pub mod runner;
pub mod shell;
pub mod toolcache;

pub use environments::{Environment, HostEnvironment, JobEnvironment};
pub use executor::{JobEvent, JobExecutor, JobResult, JobStatus, StepReport};
pub use runner::{CommandResult, CommandRunner, OutputLine, OutputStream, RunnerConfig};
pub use shell::ProcessRunner;
pub use toolcache::{RuntimeInstallation, RuntimeLocator};
