//! reposcope - multi-repository analysis orchestration
//!
//! Runs pluggable analyzers across linked repositories on a bounded worker
//! pool, caches per-file results by content hash, maps dependencies between
//! the repositories and tracks detached background agents.
//!
//! Exit codes:
//!   0 - Success (no findings above threshold, or no --fail-on set)
//!   1 - Runtime error (invalid input, config, dependency cycle, etc.)
//!   2 - Findings found at or above the --fail-on threshold

mod agents;
mod analyzers;
mod cache;
mod classify;
mod cli;
mod config;
mod context;
mod error;
mod fsutil;
mod graph;
mod models;
mod orchestrator;
mod report;
mod scanner;
mod worker;

use agents::AgentStatus;
use anyhow::{Context, Result};
use chrono::Utc;
use cli::{AgentCommand, AnalyzeArgs, Args, CacheCommand, Commands, GapsArgs, GraphArgs, OutputFormat, WorkerArgs};
use config::{Config, CONFIG_FILE};
use context::RunContext;
use error::ScopeError;
use graph::GraphBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use models::Severity;
use report::{FindingsSink, JsonDirectorySink, RunMetadata, RunReport};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            if e.downcast_ref::<ScopeError>().is_some_and(ScopeError::is_validation) {
                eprintln!("   Nothing was run. Check the repository paths and `reposcope analyzers`.");
            }
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .reposcope.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Add your linked repositories under [repositories] paths.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// Logs go to stderr; stdout carries command output (and the worker's
/// JSON record).
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Dispatch a subcommand. Returns the process exit code.
async fn run(args: Args) -> Result<i32> {
    let Some(command) = args.command.clone() else {
        return Ok(0);
    };

    // The worker gets everything it needs on the command line
    if let Commands::Worker(worker_args) = &command {
        return run_worker(worker_args);
    }

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;
    let ctx = RunContext::new(config);

    match command {
        Commands::Analyze(analyze) => run_analyze(&ctx, &analyze, args.quiet).await,
        Commands::Graph(graph) => run_graph(&ctx, &graph).await,
        Commands::Gaps(gaps) => run_gaps(&ctx, &gaps).await,
        Commands::Cache { action } => run_cache(&ctx, &action),
        Commands::Agent { action } => run_agent(&ctx, action).await,
        Commands::Analyzers => {
            println!("🧩 Registered analyzers:\n");
            for spec in analyzers::REGISTRY {
                println!("   {:<12} {}", spec.name, spec.description);
            }
            Ok(0)
        }
        Commands::Worker(_) => Ok(0),
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Hidden `worker` subcommand: one unit, record on stdout.
fn run_worker(args: &WorkerArgs) -> Result<i32> {
    let cache = match (&args.cache_dir, args.no_cache) {
        (Some(dir), false) => Some(cache::CacheStore::for_current_version(dir)),
        _ => None,
    };

    let record = worker::run_analyzer(&args.analyzer, &args.repo, args.include_external, cache.as_ref())?;
    println!("{}", serde_json::to_string(&record)?);
    Ok(0)
}

async fn run_analyze(ctx: &RunContext, args: &AnalyzeArgs, quiet: bool) -> Result<i32> {
    let names = ctx.config.analyzers.enabled.clone();
    let repos = ctx.repositories.clone();
    if repos.is_empty() {
        anyhow::bail!("No repositories given and none configured under [repositories]");
    }

    let mut orchestrator = ctx.orchestrator()?;
    println!(
        "🔬 Analyzing {} repositories with {} ({} isolation, {} workers)",
        repos.len(),
        names.join(", "),
        ctx.config.orchestrator.isolation,
        orchestrator.max_workers()
    );

    let progress_bar = (!quiet).then(|| {
        let pb = ProgressBar::new((repos.len() * names.len()) as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Arc::new(pb)
    });
    if let Some(pb) = &progress_bar {
        let pb = Arc::clone(pb);
        orchestrator = orchestrator.with_progress(Arc::new(move |repo: &str, analyzer: &str, ok: bool| {
            let name = Path::new(repo)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            pb.set_message(format!("{} {}/{}", if ok { "✓" } else { "✗" }, name, analyzer));
            pb.inc(1);
        }));
    }

    let mut outcome = orchestrator.run(&repos, &names).await?;
    if let Some(pb) = &progress_bar {
        pb.finish_and_clear();
    }
    for failure in outcome.failures() {
        if let Some(traceback) = &failure.traceback {
            debug!("{} on {} failed:\n{}", failure.analyzer, failure.repo_path, traceback);
        }
    }
    classify::annotate(&mut outcome);

    let report = RunReport::new(
        RunMetadata {
            analysis_date: Utc::now(),
            tool_version: ctx.tool_version.clone(),
            analyzers: names,
            isolation: ctx.config.orchestrator.isolation.to_string(),
            cache_enabled: ctx.config.cache.enabled,
        },
        &outcome,
    );

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };
    std::fs::create_dir_all(&ctx.output_dir)
        .with_context(|| format!("Failed to create {}", ctx.output_dir.display()))?;
    let report_path = ctx
        .output_dir
        .join(format!("reposcope_report.{}", args.format.extension()));
    std::fs::write(&report_path, &output)
        .with_context(|| format!("Failed to write report to {}", report_path.display()))?;

    let sink = JsonDirectorySink::new(&ctx.output_dir);
    for repo in &report.repositories {
        if let Err(e) = sink.persist(repo) {
            warn!("Could not persist findings for {}: {:#}", repo.name, e);
        }
    }

    print_run_summary(&report);
    println!("\n✅ Analysis complete! Report saved to: {}", report_path.display());

    if let Some(cache) = ctx.analysis_cache() {
        let stats = cache.stats();
        println!(
            "   Cache: {} entries, hit rate {:.1}%",
            stats.total_entries,
            stats.hit_rate()
        );
    }

    // Check --fail-on threshold
    if let Some(fail_level) = args.fail_on {
        if report.has_findings_at_or_above(Severity::from(fail_level)) {
            eprintln!(
                "\n⛔ Findings at or above {:?} severity. Failing (exit code 2).",
                fail_level
            );
            return Ok(2);
        }
    }

    Ok(0)
}

fn print_run_summary(report: &RunReport) {
    let summary = &report.summary;
    let findings = &summary.findings;

    println!("\n📊 Analysis Summary:");
    println!(
        "   Units: {} | ✅ {} succeeded | ❌ {} failed | ⏱️  {} timed out",
        summary.total_units, summary.succeeded, summary.failed, summary.timed_out
    );
    println!("   Total findings: {}", findings.total);
    println!(
        "   - 🔴 Critical: {} | 🟠 High: {} | 🟡 Medium: {} | 🟢 Low: {} | 🔵 Info: {}",
        findings.critical, findings.high, findings.medium, findings.low, findings.info
    );
    println!("   Duration: {:.1}s", summary.elapsed_secs);

    for repo in &report.repositories {
        for failure in &repo.failures {
            println!("   ❌ {}/{}: {}", repo.name, failure.analyzer, failure.error);
        }
    }
}

async fn run_graph(ctx: &RunContext, args: &GraphArgs) -> Result<i32> {
    let repos = ctx.linked_repos()?;
    let graph = GraphBuilder::default().build_concurrent(&repos).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
    } else {
        println!(
            "🕸️  Dependency graph: {} repositories, {} edges\n",
            repos.len(),
            graph.edge_count()
        );
        for repo in graph.nodes() {
            let deps: Vec<&str> = graph
                .dependencies_of(repo)
                .map(|d| d.iter().map(String::as_str).collect())
                .unwrap_or_default();
            let dependents: Vec<&str> = graph.dependents_of(repo).into_iter().collect();

            match (deps.is_empty(), dependents.is_empty()) {
                (true, true) => println!("   {}", repo),
                (false, true) => println!("   {} → {}", repo, deps.join(", ")),
                (true, false) => println!("   {} (used by {})", repo, dependents.join(", ")),
                (false, false) => println!(
                    "   {} → {} (used by {})",
                    repo,
                    deps.join(", "),
                    dependents.join(", ")
                ),
            }
        }
        if !graph.links().is_empty() {
            println!("\n🔗 Package links:");
            for link in graph.links() {
                println!(
                    "   {} → {} via {} ({} / {})",
                    link.repo,
                    link.dependency,
                    link.package,
                    link.used_version.as_deref().unwrap_or("any"),
                    link.available_version.as_deref().unwrap_or("unversioned")
                );
            }
        }
        for cycle in graph.circular_dependencies() {
            println!("   ⚠️  cycle: {}", cycle.join(" ↔ "));
        }
    }

    if args.levels {
        let levels = graph.levels()?;
        println!("\n📶 Analysis levels:");
        for (i, level) in levels.iter().enumerate() {
            println!("   {}: {}", i, level.join(", "));
        }
    }

    Ok(0)
}

async fn run_gaps(ctx: &RunContext, args: &GapsArgs) -> Result<i32> {
    let repos = ctx.linked_repos()?;
    let graph = GraphBuilder::default().build_concurrent(&repos).await;
    let gaps = graph.version_gaps();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&gaps)?);
        return Ok(0);
    }

    if gaps.is_empty() {
        println!("✅ No version gaps between {} repositories.", repos.len());
        return Ok(0);
    }

    println!("🔍 {} version gap(s):\n", gaps.len());
    for gap in &gaps {
        println!("   {} {}", gap.severity.emoji(), gap.message);
    }
    Ok(0)
}

fn run_cache(ctx: &RunContext, action: &CacheCommand) -> Result<i32> {
    let store = ctx.cache_store();

    match action {
        CacheCommand::Stats => {
            let stats = store.stats();
            println!("🗄️  Cache at {}", store.root().display());
            println!("   Tool version: {}", store.tool_version());
            println!("   Entries: {}", stats.total_entries);
            println!("   Size: {} bytes", stats.total_size_bytes);
            println!(
                "   Hits: {} | Misses: {} | Hit rate: {:.1}%",
                stats.hit_count,
                stats.miss_count,
                stats.hit_rate()
            );
            match stats.last_cleared {
                Some(when) => println!("   Last cleared: {}", when.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("   Last cleared: never"),
            }
        }
        CacheCommand::Clear => {
            let removed = store.clear()?;
            println!("🧹 Cleared {} cache entries.", removed);
        }
        CacheCommand::InvalidateRepo { repo } => {
            let removed = store.invalidate_repository(repo);
            println!("🧹 Removed {} entries for {}.", removed, repo.display());
        }
        CacheCommand::InvalidateFile { repo, file } => {
            let removed = store.invalidate_file(repo, file);
            println!("🧹 Removed {} entries for {}.", removed, file);
        }
    }

    Ok(0)
}

async fn run_agent(ctx: &RunContext, action: AgentCommand) -> Result<i32> {
    let manager = ctx.agent_manager()?;

    match action {
        AgentCommand::Spawn {
            command,
            args,
            resource,
        } => {
            // Agents are judged by their stderr, so keep it for errors only
            let mut args = args;
            if !args
                .iter()
                .any(|a| matches!(a.as_str(), "--quiet" | "-q" | "--verbose" | "-v"))
            {
                args.insert(0, "--quiet".to_string());
            }
            let record = manager.spawn(&command, &args, resource.as_deref())?;
            println!("🚀 Spawned agent {}", record.id);
            if let Some(pid) = record.pid {
                println!("   pid: {}", pid);
            }
            println!("   logs: {}", manager.log_path(&record.id, false).display());
        }
        AgentCommand::List => {
            let records = manager.list()?;
            if records.is_empty() {
                println!("No agents in {}.", manager.root().display());
            }
            for record in records {
                let finished = record
                    .finished()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{} {:<40} {:<9} {} {:<19} {}",
                    record.status.emoji(),
                    record.id,
                    record.status,
                    record.started.format("%Y-%m-%d %H:%M:%S"),
                    finished,
                    record.command
                );
            }
        }
        AgentCommand::Show { id } => {
            let record = manager.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        AgentCommand::Wait {
            ids,
            timeout,
            interval,
        } => {
            let poll = interval
                .map(Duration::from_millis)
                .unwrap_or_else(|| ctx.poll_interval());
            let targets = (!ids.is_empty()).then_some(ids.as_slice());
            let records = manager
                .wait(targets, Duration::from_secs(timeout), poll)
                .await?;

            let failed = records
                .iter()
                .filter(|r| r.status == AgentStatus::Failed)
                .count();
            println!("✅ {} agent(s) finished, {} failed.", records.len(), failed);
        }
        AgentCommand::Logs { id, stderr } => {
            print!("{}", manager.read_log(&id, stderr)?);
        }
    }

    Ok(0)
}
