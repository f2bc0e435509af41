//! muster CLI - test-execution orchestrator.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use muster::config::{self, CiContext, SuiteOptions};
use muster::executor::ProcessExecutor;
use muster::orchestrator::{OrchestratorOptions, TestOrchestrator};
use muster::registry::{self, RegistryError};
use muster::sighandler::WorkerRegistry;
use muster::{expand_suites, logflush};

#[derive(Parser)]
#[command(name = "muster")]
#[command(about = "Test-execution orchestrator for multi-kind test corpora", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "muster.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run suites
    Run {
        /// Suites to run (all defined suites when omitted)
        suites: Vec<String>,

        /// Restrict suites to these test files
        #[arg(short, long = "test")]
        tests: Vec<String>,

        /// Shuffle test order within each suite
        #[arg(long)]
        shuffle: bool,

        /// Seed for the test-order shuffle
        #[arg(long)]
        seed: Option<u64>,

        /// Override parallel job count inside each suite
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Repeat each suite this many times
        #[arg(long)]
        repeat_suites: Option<usize>,

        /// Repeat each test this many times
        #[arg(long)]
        repeat_tests: Option<usize>,

        /// Stop the whole run on the first suite failure
        #[arg(long)]
        fail_fast: bool,

        /// List which tests would run and which would be excluded, without
        /// running anything
        #[arg(long)]
        dry_run: bool,

        /// Report file path override
        #[arg(long)]
        report_file: Option<PathBuf>,

        /// Expand tag-aware suites into CI variants
        #[arg(long)]
        ci: bool,

        /// CI patch-build context (selects the unreliable/reliable matrix)
        #[arg(long)]
        patch_build: bool,

        /// CI task name
        #[arg(long)]
        task_name: Option<String>,

        /// CI build-variant name
        #[arg(long)]
        variant_name: Option<String>,

        /// CI distro id
        #[arg(long)]
        distro_id: Option<String>,
    },

    /// List the suites that are available to execute
    ListSuites,

    /// List the suites that run the specified tests
    FindSuites {
        /// Test files to look up (every member test when omitted)
        tests: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            suites,
            tests,
            shuffle,
            seed,
            jobs,
            repeat_suites,
            repeat_tests,
            fail_fast,
            dry_run,
            report_file,
            ci,
            patch_build,
            task_name,
            variant_name,
            distro_id,
        } => {
            let ci_context = ci.then(|| CiContext {
                patch_build,
                task_name,
                variant_name,
                distro_id,
            });
            let overrides = RunOverrides {
                suites,
                tests,
                shuffle,
                seed,
                jobs,
                repeat_suites,
                repeat_tests,
                fail_fast,
                dry_run,
                report_file,
                ci_context,
            };
            run_suites(&cli.config, overrides).await
        }
        Commands::ListSuites => list_suites(&cli.config),
        Commands::FindSuites { tests } => find_suites(&cli.config, &tests),
    }
}

/// CLI-level overrides applied on top of the configuration file.
struct RunOverrides {
    suites: Vec<String>,
    tests: Vec<String>,
    shuffle: bool,
    seed: Option<u64>,
    jobs: Option<usize>,
    repeat_suites: Option<usize>,
    repeat_tests: Option<usize>,
    fail_fast: bool,
    dry_run: bool,
    report_file: Option<PathBuf>,
    ci_context: Option<CiContext>,
}

async fn run_suites(config_path: &Path, overrides: RunOverrides) -> Result<()> {
    let mut config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if overrides.shuffle {
        config.muster.shuffle = true;
    }
    if let Some(seed) = overrides.seed {
        config.muster.seed = seed;
    }
    if let Some(report_file) = overrides.report_file {
        config.muster.report_file = report_file;
    }

    info!("loaded configuration from {}", config_path.display());

    // Resolve and expand the suite list
    let suites = match registry::resolve_suites(&config, &overrides.suites, &overrides.tests) {
        Ok(suites) => suites,
        Err(err @ RegistryError::SuiteNotFound { .. }) | Err(err @ RegistryError::NoSuites) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    let suites = match &overrides.ci_context {
        Some(ctx) => expand_suites(suites, ctx),
        None => suites,
    };

    // Apply CLI option overrides; per-variant options win over the CLI.
    let base_options = SuiteOptions {
        fail_fast: overrides.fail_fast.then_some(true),
        num_jobs: overrides.jobs,
        repeat_suites: overrides.repeat_suites,
        repeat_tests: overrides.repeat_tests,
        ..SuiteOptions::inherit_all()
    };
    let mut suites: Vec<_> = suites
        .iter()
        .map(|suite| suite.with_options(base_options.combine(&suite.options)))
        .collect();

    info!("resolved {} suite(s) to execute", suites.len());

    if overrides.dry_run {
        for suite in &suites {
            println!("Tests that would be run in suite {}:", suite.display_name());
            if suite.tests.is_empty() {
                println!("  (no tests)");
            }
            for test in &suite.tests {
                println!("  {}", test.path);
            }
            println!(
                "Tests that would be excluded from suite {}:",
                suite.display_name()
            );
            if suite.excluded.is_empty() {
                println!("  (no tests)");
            }
            for test in &suite.excluded {
                println!("  {}", test.path);
            }
        }
        return Ok(());
    }

    // Background log delivery; drained by the finalizer before exit.
    let (mut flush_handle, records) = logflush::start(config.muster.log_file.clone());

    // A user interrupt cancels in-flight test processes; the executor
    // surfaces it as a fatal interruption.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for interrupt: {}", e);
                return;
            }
            info!("received interrupt, aborting run");
            cancel.cancel();
        });
    }

    let workers = WorkerRegistry::default();
    let executor = ProcessExecutor::new(
        config.muster.jobs,
        Duration::from_secs(config.muster.test_timeout_secs),
        cancel,
        workers.clone(),
    );
    let options = OrchestratorOptions {
        shuffle: config.muster.shuffle,
        seed: config.muster.seed,
        report_file: config.muster.report_file.clone(),
        archival: config.archival.clone(),
        procman: config.procman.clone(),
    };
    let orchestrator = TestOrchestrator::new(executor, options, workers, Some(records));

    let outcome = orchestrator.execute(&mut suites).await;
    muster::report::print_summary(&suites);

    // Last step on every exit path; may terminate without returning.
    let action = logflush::finalize(
        &mut flush_handle,
        outcome.interrupted,
        outcome.exit_code,
        Duration::from_secs(config.muster.flush_timeout_secs),
    )
    .await;
    logflush::terminate(action)
}

fn list_suites(config_path: &Path) -> Result<()> {
    let config = config::load_config(config_path)?;
    println!("Suites available to execute:");
    for name in registry::suite_names(&config) {
        println!("  {}", name);
    }
    Ok(())
}

fn find_suites(config_path: &Path, tests: &[String]) -> Result<()> {
    let config = config::load_config(config_path)?;
    let suites = registry::resolve_suites(&config, &[], &[])?;

    let mut memberships: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for suite in &suites {
        for test in &suite.tests {
            memberships
                .entry(test.path.as_str())
                .or_default()
                .push(suite.name());
        }
    }

    let selected: Vec<&str> = if tests.is_empty() {
        memberships.keys().copied().collect()
    } else {
        tests.iter().map(String::as_str).collect()
    };
    for test in selected {
        let names = match memberships.get(test) {
            Some(names) => names.join(", "),
            None => "(none)".to_string(),
        };
        println!("{} will be run by the following suite(s): {}", test, names);
    }
    Ok(())
}
