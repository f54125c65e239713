use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use linecov::cli;
use linecov::report::{CiEnv, PathMode, ReportConfig, DEFAULT_SERVICE_NAME};
use linecov::upload::{HttpTransport, Transport, COVERALLS_JOBS_URL};

/// linecov: statement coverage persistence and Coveralls reporting.
#[derive(Parser)]
#[command(name = "linecov", version, about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a Coveralls report from a persisted coverage file.
    Report {
        /// Path to the persisted coverage file.
        file: PathBuf,

        /// Repository token for the coverage service.
        #[arg(long, env = "COVERALLS_REPO_TOKEN", hide_env_values = true)]
        token: String,

        /// Service name sent with the report.
        #[arg(long, default_value = DEFAULT_SERVICE_NAME)]
        service_name: String,

        /// Attach CI job metadata (TRAVIS_JOB_ID, TRAVIS_PULL_REQUEST).
        #[arg(long)]
        ci: bool,

        /// How source files are named in the report.
        #[arg(long, value_enum, default_value_t = PathMode::Relative)]
        path_mode: PathMode,

        /// Project root; files outside it are not reported in relative mode.
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Upload the report instead of printing it.
        #[arg(long)]
        upload: bool,

        /// Jobs endpoint used with --upload.
        #[arg(long, default_value = COVERALLS_JOBS_URL)]
        endpoint: String,
    },

    /// Merge prior coverage into current coverage (max hit count per line).
    Merge {
        /// Coverage of the current run.
        current: PathBuf,

        /// Previously persisted coverage.
        prior: PathBuf,

        /// Output file (may be one of the inputs).
        #[arg(long)]
        into: PathBuf,

        /// Fail on duplicate records or inconsistent line data.
        #[arg(long)]
        strict: bool,
    },

    /// List per-file coverage of a persisted coverage file.
    Summary {
        file: PathBuf,

        /// Sort by coverage rate ascending (show worst files first).
        #[arg(long)]
        sort_by_coverage: bool,
    },

    /// Show line-level coverage for a source file.
    Lines {
        file: PathBuf,

        /// The source file key as stored in the coverage data.
        source_file: String,

        /// Show only uncovered lines.
        #[arg(long)]
        uncovered: bool,
    },
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let output = match cli.command {
        Commands::Report {
            file,
            token,
            service_name,
            ci,
            path_mode,
            root,
            upload,
            endpoint,
        } => {
            let config = ReportConfig {
                service_name,
                path_mode,
                include_ci: ci,
                ci_env: CiEnv::default(),
            };
            let transport = upload.then(|| HttpTransport::new(endpoint));
            cli::cmd_report(
                &file,
                &token,
                config,
                &root,
                transport.as_ref().map(|t| t as &dyn Transport),
            )?
        }
        Commands::Merge {
            current,
            prior,
            into,
            strict,
        } => cli::cmd_merge(&current, &prior, &into, strict)?,
        Commands::Summary {
            file,
            sort_by_coverage,
        } => cli::cmd_summary(&file, sort_by_coverage)?,
        Commands::Lines {
            file,
            source_file,
            uncovered,
        } => cli::cmd_lines(&file, &source_file, uncovered)?,
    };

    print!("{output}");
    Ok(())
}
