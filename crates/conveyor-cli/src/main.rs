//! Conveyor - CI pipeline runner
//!
//! Runs one pipeline definition for one commit.
//!
//! ## Commands
//!
//! - `run`: Execute a pipeline definition against a ref and commit
//! - `check`: Validate a pipeline definition without running it

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conveyor_core::{Credentials, GitRef, PipelineDefinition, RunContext};
use conveyor_engine::{cancel_pair, render_summary, to_json, ExecutorConfig, Pipeline};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CI pipeline orchestration core", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted output (logs and report)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline definition for one ref and commit
    Run {
        /// Path to the pipeline definition (YAML)
        definition: PathBuf,

        /// Triggering ref name
        #[arg(long = "ref", default_value = "main")]
        git_ref: String,

        /// Treat the ref as a tag instead of a branch
        #[arg(long)]
        tag: bool,

        /// Commit SHA the pipeline runs against
        #[arg(long, default_value = "HEAD")]
        commit: String,

        /// Workspace directory (a temporary directory when omitted)
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Extra variable exported into every job (KEY=VALUE, repeatable)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        variables: Vec<String>,

        /// Registry username for release steps
        #[arg(long, env = "CONVEYOR_REGISTRY_USER")]
        registry_user: Option<String>,

        /// Registry password for release steps
        #[arg(long, env = "CONVEYOR_REGISTRY_PASSWORD", hide_env_values = true)]
        registry_password: Option<String>,

        /// Per-step timeout in seconds
        #[arg(long, default_value_t = 3600)]
        step_timeout: u64,

        /// Cleanup bound after cancellation, in seconds
        #[arg(long, default_value_t = 10)]
        grace_period: u64,
    },

    /// Validate a pipeline definition and print its digest
    Check {
        /// Path to the pipeline definition (YAML)
        definition: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    conveyor_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            definition,
            git_ref,
            tag,
            commit,
            workspace,
            variables,
            registry_user,
            registry_password,
            step_timeout,
            grace_period,
        } => {
            cmd_run(RunArgs {
                definition,
                git_ref,
                tag,
                commit,
                workspace,
                variables,
                registry_user,
                registry_password,
                step_timeout,
                grace_period,
                json: cli.json,
            })
            .await
        }
        Commands::Check { definition } => cmd_check(&definition, cli.json),
    }
}

struct RunArgs {
    definition: PathBuf,
    git_ref: String,
    tag: bool,
    commit: String,
    workspace: Option<PathBuf>,
    variables: Vec<String>,
    registry_user: Option<String>,
    registry_password: Option<String>,
    step_timeout: u64,
    grace_period: u64,
    json: bool,
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let def = PipelineDefinition::from_path(&args.definition)
        .with_context(|| format!("failed to load {}", args.definition.display()))?;

    let git_ref = if args.tag {
        GitRef::Tag(args.git_ref)
    } else {
        GitRef::Branch(args.git_ref)
    };

    let mut ctx = RunContext::new(git_ref, args.commit)
        .with_credentials(Credentials::new(args.registry_user, args.registry_password));
    for pair in &args.variables {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid variable '{}', expected KEY=VALUE", pair))?;
        ctx = ctx.with_variable(key, value);
    }

    let config = ExecutorConfig {
        step_timeout: Duration::from_secs(args.step_timeout),
        grace_period: Duration::from_secs(args.grace_period),
    };

    // Keep the tempdir guard alive for the whole run.
    let tempdir;
    let workspace = match &args.workspace {
        Some(path) => {
            std::fs::create_dir_all(path)
                .with_context(|| format!("failed to create workspace {}", path.display()))?;
            path.clone()
        }
        None => {
            tempdir = tempfile::tempdir().context("failed to create workspace")?;
            tempdir.path().to_path_buf()
        }
    };

    // Ctrl-C cancels in-flight jobs; cleanup steps still run under the
    // grace period and the report below covers whatever settled.
    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, stopping in-flight jobs");
            handle.cancel();
        }
    });

    let result = Pipeline::run_with_cancel(&def, ctx, &workspace, config, cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&to_json(&result))?);
    } else {
        println!("{}", render_summary(&result));
    }

    if !result.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_check(definition: &PathBuf, json: bool) -> Result<()> {
    let def = PipelineDefinition::from_path(definition)
        .with_context(|| format!("failed to load {}", definition.display()))?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "stages": def.stages,
                "jobs": def.job_count(),
                "digest": def.digest(),
            })
        );
    } else {
        info!(
            stages = def.stages.len(),
            jobs = def.job_count(),
            "definition is valid"
        );
        println!("digest: {}", def.digest());
    }
    Ok(())
}
