//! Command handlers.

use crate::commands::JobArgs;
use crate::config::CliConfig;
use crate::output;
use anyhow::{Context, Result, bail};
use console::style;
use relstat_core::pipeline::{BUILTIN_PIPELINE, PipelineDefinition};
use relstat_core::plan::{JobPlan, JobPlanner, resolve_inputs};
use relstat_core::secrets::{EnvProvider, FileProvider, ProviderChain};
use relstat_core::trigger::{TriggerEvent, TriggerMatcher};
use relstat_core::validation::{ensure_valid, validate as validate_pipeline};
use relstat_runner::{JobExecutor, ProcessRunner, RuntimeLocator};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn load_pipeline(path: Option<&Path>, config: &CliConfig) -> Result<PipelineDefinition> {
    match path.or(config.default_pipeline.as_deref()) {
        Some(path) => PipelineDefinition::load(path)
            .with_context(|| format!("Failed to load pipeline {}", path.display())),
        None => Ok(PipelineDefinition::builtin()?),
    }
}

async fn build_provider(args: &JobArgs, config: &CliConfig) -> Result<ProviderChain> {
    let mut chain = ProviderChain::new();
    if let Some(path) = &args.secrets_file {
        chain.push(Box::new(FileProvider::load_json(path).await?));
    }
    if let Some(path) = &args.env_file {
        chain.push(Box::new(FileProvider::load_dotenv(path)?));
    }
    let prefix = args.env_prefix.clone().or_else(|| config.env_prefix.clone());
    chain.push(Box::new(EnvProvider::new(prefix)));
    Ok(chain)
}

async fn prepare_plan(args: &JobArgs, config: &CliConfig) -> Result<JobPlan> {
    let pipeline = load_pipeline(args.pipeline.as_deref(), config)?;
    ensure_valid(&pipeline)?;
    let job = pipeline.job(args.job.as_deref())?;

    let provider = build_provider(args, config).await?;
    info!(providers = ?provider.names(), "Resolving inputs");
    let overrides: HashMap<String, String> = args.vars.iter().cloned().collect();
    let ctx = resolve_inputs(&pipeline, &overrides, &provider).await?;

    let sources_dir = match &args.sources_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Cannot determine current directory")?,
    };
    let sources_dir = std::path::absolute(&sources_dir)
        .with_context(|| format!("Invalid sources directory {}", sources_dir.display()))?;

    Ok(JobPlanner::new(sources_dir, ctx).plan(&pipeline, job)?)
}

/// Run a job locally.
pub async fn run(config: &CliConfig, args: JobArgs) -> Result<()> {
    let plan = prepare_plan(&args, config).await?;

    let tool_cache = args.tool_cache.clone().or_else(|| config.tool_cache.clone());
    let locator = match tool_cache {
        Some(dir) => RuntimeLocator::new(Some(dir)),
        None => RuntimeLocator::from_env(),
    };
    let executor = JobExecutor::new(Arc::new(ProcessRunner::default()), locator);

    let (tx, mut rx) = mpsc::channel(1024);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            output::print_event(&event);
        }
    });

    let result = tokio::select! {
        result = executor.execute(&plan, tx) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping running step");
            bail!("Job {} interrupted", plan.job);
        }
    };
    let _ = printer.await;

    output::print_summary(&result);
    match result.error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Print the resolved commands.
pub async fn plan(config: &CliConfig, args: JobArgs) -> Result<()> {
    let plan = prepare_plan(&args, config).await?;

    println!(
        "\n{} {} / {}",
        style("▶").cyan().bold(),
        style(&plan.pipeline).bold(),
        plan.label
    );
    println!(
        "  sources: {}, timeout: {} min, max_parallel: {}\n",
        plan.sources_dir.display(),
        plan.timeout_minutes,
        plan.max_parallel
    );
    for (i, line) in plan.describe().iter().enumerate() {
        println!("  {:>2}. {}", i + 1, line);
    }
    Ok(())
}

/// Validate a pipeline definition.
pub fn validate(config: &CliConfig, path: Option<&Path>) -> Result<()> {
    let definition = load_pipeline(path, config)?;
    let issues = validate_pipeline(&definition);

    if !issues.is_empty() {
        for issue in &issues {
            println!("{} {}", style("✗").red(), issue);
        }
        bail!("Pipeline \"{}\" has {} problem(s)", definition.name, issues.len());
    }

    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        definition.name
    );
    for job in &definition.jobs {
        println!("    - {} ({} steps)", job.name, job.steps.len());
    }
    Ok(())
}

/// Report whether a push to `branch` would start the pipeline.
pub fn trigger(config: &CliConfig, branch: &str, path: Option<&Path>) -> Result<()> {
    let definition = load_pipeline(path, config)?;
    let event = TriggerEvent::Push {
        branch: branch.to_string(),
    };

    if TriggerMatcher::new().matches(&definition, &event) {
        println!(
            "{} A push to {} starts {}",
            style("✓").green(),
            style(branch).bold(),
            definition.name
        );
    } else {
        println!(
            "{} A push to {} does not start {}; run it manually",
            style("i").blue(),
            style(branch).bold(),
            definition.name
        );
    }
    Ok(())
}

/// Write the built-in definition to `path`.
pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        let overwrite = dialoguer::Confirm::new()
            .with_prompt(format!("{} exists. Overwrite?", path.display()))
            .default(false)
            .interact()?;
        if !overwrite {
            println!("{} Left {} unchanged", style("!").yellow(), path.display());
            return Ok(());
        }
    }

    std::fs::write(path, BUILTIN_PIPELINE)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> Result<()> {
    let path: PathBuf = CliConfig::config_path()?;
    println!("Config file: {}", path.display());
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

/// Set configuration value.
pub fn set_config(key: &str, value: &str) -> Result<()> {
    let mut config = CliConfig::load()?;
    config.set(key, value)?;
    config.save()?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}
