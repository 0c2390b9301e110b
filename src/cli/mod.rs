//! churnflow CLI Module
//!
//! Command-line interface for validating data, running hyperparameter
//! searches, promoting the best run and serving it.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{PipelineConfig, Workspace};
use crate::contract::{FeatureContract, FeatureMatrix, Labels};
use crate::data::DataLoader;
use crate::error::ChurnError;
use crate::evaluation::METRIC_SUITE;
use crate::optimizer::Tuner;
use crate::registry::{ModelPointer, Promoter, PromotionOutcome};
use crate::tracking::{ExperimentLedger, FsArtifactStore, RunFilter, RunStatus, TrainingRun};
use crate::training::Trainer;
use crate::validation::{DataValidator, RuleSetValidator};

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // box inner width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn line_box_top()    { println!("  {}", dim("┌─────────────────────────────────────────────────────────┐")); }
fn line_box_bottom() { println!("  {}", dim("└─────────────────────────────────────────────────────────┘")); }
fn line_box_sep()    { println!("  {}", dim("├─────────────────────────────────────────────────────────┤")); }

fn line_box(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let pad = W.saturating_sub(visible_len);
    println!("  {}  {}{} {}", dim("│"), content, " ".repeat(pad), dim("│"));
}

fn line_box_center(content: &str) {
    let visible_len = strip_ansi(content).chars().count();
    let total_pad = W.saturating_sub(visible_len);
    let left = total_pad / 2;
    let right = total_pad - left;
    println!("  {}  {}{}{} {}", dim("│"), " ".repeat(left), content, " ".repeat(right), dim("│"));
}

fn line_box_empty() { line_box(""); }

fn strip_ansi(s: &str) -> String {
    let mut out = String::new();
    let mut in_escape = false;
    for c in s.chars() {
        if c == '\x1b' { in_escape = true; continue; }
        if in_escape { if c == 'm' { in_escape = false; } continue; }
        out.push(c);
    }
    out
}

fn kv(key: &str, val: &str) -> String {
    format!("{} {}", muted(key), val.white())
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn fmt_metric(run: &TrainingRun, name: &str) -> String {
    run.metric(name).map_or_else(|| "-".to_string(), |v| format!("{:.4}", v))
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "churnflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Churn model search, experiment tracking and serving")]
#[command(long_about = None)]
pub struct Cli {
    /// Pipeline home (ledger, artifacts, active model pointer)
    #[arg(long, global = true, env = "CHURNFLOW_HOME", default_value = "./churnflow")]
    pub home: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the data quality gate over a dataset
    Validate {
        /// Input CSV file
        #[arg(short, long)]
        data: PathBuf,

        /// Feature contract JSON (defaults to the telco contract)
        #[arg(long)]
        contract: Option<PathBuf>,

        /// Target column name
        #[arg(short, long, default_value = "Churn")]
        target: String,
    },

    /// Run a hyperparameter search and record every trial
    Search {
        /// Input CSV file
        #[arg(short, long)]
        data: PathBuf,

        /// Pipeline config JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Feature contract JSON (defaults to the telco contract)
        #[arg(long)]
        contract: Option<PathBuf>,

        /// Override the trial budget
        #[arg(long)]
        max_trials: Option<usize>,

        /// Promote the best run once the search finishes
        #[arg(long)]
        promote: bool,
    },

    /// Promote the best recorded run if it beats the active model
    Promote {
        /// Pipeline config JSON
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List recorded runs
    Runs {
        /// Only runs with this status (running, succeeded, failed)
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Write a default pipeline config
    Init {
        /// Output file
        #[arg(short, long, default_value = "churnflow.json")]
        output: PathBuf,
    },

    /// Serve the active model over HTTP
    Serve {
        /// Server port
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Server host
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Probability at or above which a customer is predicted to churn
        /// (defaults to the threshold the active model was scored with)
        #[arg(long)]
        threshold: Option<f64>,
    },
}

// ─── Shared setup ──────────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(p) => PipelineConfig::from_file(p)?,
        None => PipelineConfig::default(),
    };
    Ok(config)
}

fn load_contract(path: Option<&Path>) -> anyhow::Result<Arc<FeatureContract>> {
    let contract = match path {
        Some(p) => {
            let contract: FeatureContract = serde_json::from_slice(&std::fs::read(p)?)?;
            contract.validate()?;
            contract
        }
        None => FeatureContract::telco(),
    };
    Ok(Arc::new(contract))
}

fn load_dataset(data: &Path, contract: Arc<FeatureContract>, target: &str) -> anyhow::Result<(FeatureMatrix, Labels)> {
    step_run("Loading data");
    let start = Instant::now();
    let loaded = DataLoader::new(contract).with_target(target).load_csv(data)?;
    step_done(&format!(
        "{} rows, {} churners in {:?}",
        loaded.0.len(),
        loaded.1.positives(),
        start.elapsed()
    ));
    Ok(loaded)
}

fn print_violations(err: &ChurnError) {
    for v in err.violations().iter().take(20) {
        println!("  {} {:<24} {}", "✗".red(), v.field, muted(&format!("[{}] {}", v.rule_id, v.message)));
    }
    if err.violations().len() > 20 {
        println!("  {}", dim(&format!("... {} more", err.violations().len() - 20)));
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_validate(data: &Path, contract: Option<&Path>, target: &str) -> anyhow::Result<()> {
    section("Validate");

    let contract = load_contract(contract)?;
    let (matrix, _) = match load_dataset(data, contract, target) {
        Ok(loaded) => loaded,
        Err(e) => {
            println!("{}", "failed".red());
            if let Some(churn) = e.downcast_ref::<ChurnError>() {
                print_violations(churn);
            }
            return Err(e);
        }
    };

    let report = RuleSetValidator::telco().validate(&matrix);
    println!();
    println!(
        "  {:<16} {}/{}",
        muted("Checks passed"),
        report.passed_checks.to_string().white().bold(),
        report.total_checks
    );

    if report.passed {
        println!("  {} {}", ok("✓"), "dataset passed the quality gate");
        println!();
        Ok(())
    } else {
        let err = ChurnError::DataQualityError(report.violations);
        print_violations(&err);
        println!();
        Err(err.into())
    }
}

pub fn cmd_search(
    home: &Path,
    data: &Path,
    config: Option<&Path>,
    contract: Option<&Path>,
    max_trials: Option<usize>,
    promote: bool,
) -> anyhow::Result<()> {
    section("Search");

    let mut config = load_config(config)?;
    if let Some(n) = max_trials {
        config.budget.max_trials = Some(n);
        config.validate()?;
    }

    let contract = load_contract(contract)?;
    let (features, labels) = load_dataset(data, contract, &config.target_column)?;

    let workspace = Workspace::new(home);
    workspace.ensure()?;
    let ledger = Arc::new(ExperimentLedger::open(workspace.ledger_path())?);
    let store = Arc::new(FsArtifactStore::new(workspace.artifacts_dir())?);

    let mut trainer = Trainer::new(store.clone(), ledger.run_ids())
        .with_evaluator(config.evaluator()?)
        .with_seed(config.seed);
    if let Some(timeout) = config.trial_timeout() {
        trainer = trainer.with_trial_timeout(timeout);
    }
    let tuner = Tuner::new(trainer, Arc::clone(&ledger), config.tuner_config())?
        .with_validator(Arc::new(RuleSetValidator::telco()));

    let metric = config.ranking_metric.as_str();
    let mut stream = match tuner.search(&features, &labels, &config.search_space, config.budget) {
        Ok(stream) => stream,
        Err(e) => {
            print_violations(&e);
            return Err(e.into());
        }
    };

    println!();
    println!(
        "  {:<12} {:<20} {:>10} {:>10}",
        muted("Run"),
        muted("Model"),
        muted(metric),
        muted("Status")
    );
    println!("  {}", dim(&"─".repeat(56)));

    for item in stream.by_ref() {
        let run = item?;
        let model = run
            .config
            .get(crate::training::MODEL_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "default".to_string());
        let status = match run.status {
            RunStatus::Succeeded => ok("ok"),
            _ => run.failure_reason.as_deref().unwrap_or("failed").red(),
        };
        println!(
            "  {:<12} {:<20} {:>10} {:>10}",
            run.run_id.to_string(),
            model,
            fmt_metric(&run, metric),
            status
        );
    }

    let summary = stream.finish()?;
    println!("  {}", dim(&"─".repeat(56)));
    println!();
    println!("  {:<16} {}", muted("Succeeded"), summary.trials_succeeded.to_string().white());
    println!("  {:<16} {}", muted("Failed"), summary.trials_failed.to_string().white());
    println!("  {:<16} {:.2}s", muted("Elapsed"), summary.elapsed_secs);
    if let (Some(id), Some(score)) = (summary.best_run_id, summary.best_score) {
        println!("  {} {} {} {:.4}", ok("best"), id.to_string().white().bold(), muted(&format!("{}:", metric)), score);
    }
    println!();

    if promote {
        promote_best(&workspace, &config, &ledger, store)?;
    }
    Ok(())
}

pub fn cmd_promote(home: &Path, config: Option<&Path>) -> anyhow::Result<()> {
    section("Promote");

    let config = load_config(config)?;
    let workspace = Workspace::new(home);
    let ledger = ExperimentLedger::open(workspace.ledger_path())?;
    let store = Arc::new(FsArtifactStore::new(workspace.artifacts_dir())?);
    promote_best(&workspace, &config, &ledger, store)
}

fn promote_best(
    workspace: &Workspace,
    config: &PipelineConfig,
    ledger: &ExperimentLedger,
    store: Arc<FsArtifactStore>,
) -> anyhow::Result<()> {
    let pointer = Arc::new(ModelPointer::open(workspace.active_path())?);
    let promoter = Promoter::new(pointer, store)
        .with_ranking(config.ranking())
        .with_min_improvement_margin(config.min_improvement_margin)?;

    match promoter.promote(ledger)? {
        PromotionOutcome::Promoted(active) => {
            println!(
                "  {} {} {} {} {:.4}",
                ok("promoted"),
                active.run_id.to_string().white().bold(),
                dim(&format!("v{}", active.version)),
                muted(&format!("{}:", active.metric)),
                active.score
            );
        }
        PromotionOutcome::Retained(active) => {
            println!(
                "  {} {} {}",
                "retained".yellow(),
                active.run_id.to_string().white().bold(),
                dim(&format!("v{} is still the best model", active.version))
            );
        }
    }
    println!();
    Ok(())
}

pub fn cmd_runs(home: &Path, status: Option<&str>, limit: usize) -> anyhow::Result<()> {
    section("Runs");

    let workspace = Workspace::new(home);
    let ledger = ExperimentLedger::open(workspace.ledger_path())?;

    let mut filter = RunFilter::new().with_limit(limit);
    if let Some(s) = status {
        filter = filter.with_status(s.parse()?);
    }

    let metrics: Vec<&str> = METRIC_SUITE.iter().take(4).map(|m| m.as_str()).collect();
    print!("  {:<12} {:<10}", muted("Run"), muted("Status"));
    for m in &metrics {
        print!(" {:>10}", muted(m));
    }
    println!();
    println!("  {}", dim(&"─".repeat(66)));

    for run in ledger.list(&filter) {
        print!("  {:<12} {:<10}", run.run_id.to_string(), run.status.as_str());
        for m in &metrics {
            print!(" {:>10}", fmt_metric(&run, m));
        }
        println!();
        if let Some(reason) = &run.failure_reason {
            println!("  {:<12} {}", "", dim(reason));
        }
    }

    println!();
    println!(
        "  {} {} succeeded, {} failed",
        muted(&format!("{} runs:", ledger.len())),
        ledger.count(RunStatus::Succeeded),
        ledger.count(RunStatus::Failed)
    );
    println!();
    Ok(())
}

pub fn cmd_init(output: &Path) -> anyhow::Result<()> {
    PipelineConfig::default().to_file(output)?;
    println!("  {} wrote {}", ok("✓"), output.display());
    Ok(())
}

// ─── Serve ─────────────────────────────────────────────────────────────────────

pub async fn cmd_serve(home: &Path, host: &str, port: u16, threshold: Option<f64>) -> anyhow::Result<()> {
    use crate::server::{run_server, ServerConfig};

    println!();
    line_box_top();
    line_box_empty();
    line_box_center(&format!("{}", "churnflow".white().bold()));
    line_box_center(&format!("{}", dim(&format!("v{}", env!("CARGO_PKG_VERSION")))));
    line_box_empty();
    line_box_sep();
    line_box_empty();
    line_box(&kv("Predict", &format!("http://{}:{}/api/predict", host, port)));
    line_box(&kv("Model  ", &format!("http://{}:{}/api/model", host, port)));
    line_box(&kv("Health ", &format!("http://{}:{}/api/health", host, port)));
    line_box_empty();
    line_box_sep();
    line_box_empty();
    line_box_center(&format!("{}", dim("ctrl+c to stop")));
    line_box_empty();
    line_box_bottom();
    println!();

    let config = ServerConfig {
        host: host.to_string(),
        port,
        home: home.to_path_buf(),
        threshold,
        ..Default::default()
    };

    run_server(config).await
}
