//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::Severity;
use crate::orchestrator::Isolation;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// reposcope - run static analyzers across linked repositories
///
/// Fans analyzers out over many repositories in parallel, caches per-file
/// results by content hash, maps dependencies between the repositories and
/// runs long jobs as background agents.
///
/// Examples:
///   reposcope analyze ../api ../web --analyzer security,debt
///   reposcope graph --levels
///   reposcope gaps
///   reposcope agent spawn analyze ../api
///   reposcope agent wait --timeout 600
///   reposcope --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .reposcope.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Generate a default .reposcope.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run analyzers against repositories
    Analyze(AnalyzeArgs),

    /// Show the dependency graph between repositories
    Graph(GraphArgs),

    /// Report version mismatches between linked repositories
    Gaps(GapsArgs),

    /// Inspect or clear the result cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },

    /// Run and track background agents
    Agent {
        #[command(subcommand)]
        action: AgentCommand,
    },

    /// List registered analyzers
    Analyzers,

    /// Run one analyzer on one repository and print the record as JSON
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct AnalyzeArgs {
    /// Repositories to analyze (defaults to [repositories] in the config)
    #[arg(value_name = "REPO")]
    pub repos: Vec<PathBuf>,

    /// Analyzers to run (comma-separated or repeated)
    #[arg(short, long, value_name = "NAME", value_delimiter = ',')]
    pub analyzer: Option<Vec<String>>,

    /// Worker pool size (0 = one per CPU)
    #[arg(short, long, value_name = "NUM")]
    pub workers: Option<usize>,

    /// Per-unit timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Where units run
    #[arg(long, value_name = "MODE")]
    pub isolation: Option<Isolation>,

    /// Do not read or write the result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Analyze vendored/third-party directories too
    #[arg(long)]
    pub include_external: bool,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Directory for the report and per-repository findings
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Fail if findings at or above this severity are found
    ///
    /// Useful for CI pipelines. Exit code 2 when threshold is exceeded.
    /// Values: critical, high, medium, low
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct GraphArgs {
    /// Repositories to map (defaults to [repositories] in the config)
    #[arg(value_name = "REPO")]
    pub repos: Vec<PathBuf>,

    /// Print parallel-safe analysis levels
    #[arg(long)]
    pub levels: bool,

    /// Print the graph as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct GapsArgs {
    /// Repositories to check (defaults to [repositories] in the config)
    #[arg(value_name = "REPO")]
    pub repos: Vec<PathBuf>,

    /// Print gaps as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// Show entry count, size and hit rate
    Stats,
    /// Remove every entry and reset counters
    Clear,
    /// Remove all entries of one repository
    InvalidateRepo {
        #[arg(value_name = "REPO")]
        repo: PathBuf,
    },
    /// Remove the entries of one file, for every analyzer
    InvalidateFile {
        #[arg(value_name = "REPO")]
        repo: PathBuf,
        /// Path relative to the repository root
        #[arg(value_name = "FILE")]
        file: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AgentCommand {
    /// Run a reposcope command in the background
    Spawn {
        /// Subcommand to run, e.g. `analyze`
        #[arg(value_name = "COMMAND")]
        command: String,
        /// Arguments passed through to the command
        #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Resource the agent works on; also its working directory
        #[arg(long, value_name = "PATH")]
        resource: Option<PathBuf>,
    },
    /// List agents and their status
    List,
    /// Show one agent's record
    Show {
        #[arg(value_name = "ID")]
        id: String,
    },
    /// Wait until agents finish
    Wait {
        /// Agents to wait for (default: all)
        #[arg(value_name = "ID")]
        ids: Vec<String>,
        /// Give up after this many seconds
        #[arg(long, default_value = "3600", value_name = "SECS")]
        timeout: u64,
        /// Poll interval in milliseconds (defaults to the config value)
        #[arg(long, value_name = "MS")]
        interval: Option<u64>,
    },
    /// Print an agent's output log
    Logs {
        #[arg(value_name = "ID")]
        id: String,
        /// Print stderr instead of stdout
        #[arg(long)]
        stderr: bool,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct WorkerArgs {
    #[arg(long, value_name = "NAME")]
    pub analyzer: String,

    #[arg(long, value_name = "PATH")]
    pub repo: PathBuf,

    #[arg(long)]
    pub include_external: bool,

    #[arg(long, conflicts_with = "cache_dir")]
    pub no_cache: bool,

    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
        }
    }
}

/// Severity level for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl From<FailOnLevel> for Severity {
    fn from(level: FailOnLevel) -> Self {
        match level {
            FailOnLevel::Low => Severity::Low,
            FailOnLevel::Medium => Severity::Medium,
            FailOnLevel::High => Severity::High,
            FailOnLevel::Critical => Severity::Critical,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.command.is_none() {
            return Err("A subcommand is required (try --help)".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match &self.command {
            Some(Commands::Analyze(analyze)) => {
                if analyze.timeout == Some(0) {
                    return Err("Timeout must be at least 1 second".to_string());
                }
                if let Some(names) = &analyze.analyzer {
                    if names.is_empty() {
                        return Err("--analyzer needs at least one name".to_string());
                    }
                }
            }
            Some(Commands::Agent {
                action: AgentCommand::Wait { interval, .. },
            }) => {
                if *interval == Some(0) {
                    return Err("Poll interval must be at least 1 ms".to_string());
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["reposcope"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_analyze_arguments() {
        let args = parse(&[
            "analyze",
            "a",
            "b",
            "-a",
            "security,debt",
            "--workers",
            "3",
            "--format",
            "json",
            "--fail-on",
            "high",
        ]);

        let Some(Commands::Analyze(analyze)) = args.command else {
            panic!("expected analyze");
        };
        assert_eq!(analyze.repos, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(
            analyze.analyzer,
            Some(vec!["security".to_string(), "debt".to_string()])
        );
        assert_eq!(analyze.workers, Some(3));
        assert_eq!(analyze.format, OutputFormat::Json);
        assert_eq!(analyze.fail_on, Some(FailOnLevel::High));
    }

    #[test]
    fn test_agent_spawn_passes_through_flags() {
        let args = parse(&["agent", "spawn", "analyze", "../api", "--no-cache"]);

        match args.command {
            Some(Commands::Agent {
                action: AgentCommand::Spawn { command, args, resource },
            }) => {
                assert_eq!(command, "analyze");
                assert_eq!(args, vec!["../api", "--no-cache"]);
                assert!(resource.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_worker_is_hidden_but_parses() {
        let args = parse(&["worker", "--analyzer", "debt", "--repo", "/tmp", "--no-cache"]);
        assert!(matches!(args.command, Some(Commands::Worker(ref w)) if w.no_cache));
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = parse(&["analyzers"]);
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let args = parse(&["analyze", "--timeout", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_fail_on_maps_to_severity() {
        assert_eq!(Severity::from(FailOnLevel::Medium), Severity::Medium);
        assert!(Severity::from(FailOnLevel::Critical) > Severity::from(FailOnLevel::High));
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&["analyzers"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
