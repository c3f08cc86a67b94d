//! CLI binary entrypoint.

mod commands;
mod error;
mod format;

use clap::{Parser, Subcommand};
use commands::{WorkerRoleArg, run_info, run_init, run_jobs, run_orchestrate, run_search, run_serve_storage, run_status, run_worker};
use error::{CliError, ExitCode};
use format::{OutputArgs, OutputMode};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pyindex", version, about = "Python codebase indexing and semantic search", long_about = None)]
struct Cli {
    #[command(flatten)]
    output: OutputArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show build and version details.
    Info,
    /// Write a `projectid` marker at a codebase root.
    Init {
        /// Directory to mark as a project root.
        codebase_root: PathBuf,
        /// Optional human-readable description stored in the marker.
        #[arg(long)]
        description: Option<String>,
        /// Overwrite an existing marker's description, keeping its id.
        #[arg(long)]
        force: bool,
    },
    /// Run the Storage Engine request broker.
    ServeStorage {
        /// Path to a config file, merged over defaults and environment overrides.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run one long-running worker process.
    Worker {
        /// Which worker loop to run.
        #[arg(long, value_enum)]
        role: WorkerRoleArg,
        /// Path to a config file, merged over defaults and environment overrides.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Supervise the configured worker processes until killed.
    Orchestrate {
        /// Path to a config file, merged over defaults and environment overrides.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Report the most recent cycle recorded for each worker kind.
    Status {
        /// Path to a config file, merged over defaults and environment overrides.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List the most recent worker cycles, newest first.
    Jobs {
        /// Path to a config file, merged over defaults and environment overrides.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Maximum number of cycles to list.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Search a project's indexed code.
    Search {
        /// Path to a config file, merged over defaults and environment overrides.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Project to search within.
        #[arg(long)]
        project_id: String,
        /// Free-text query.
        query: String,
        /// Maximum number of matches to return.
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
}

pub(crate) struct CliOutput {
    stdout: String,
    stderr: String,
    exit_code: ExitCode,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let mode = OutputMode::from_args(&cli.output);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => return exit_with_error(&CliError::Io(error)),
    };

    match runtime.block_on(run(&cli.command, mode)) {
        Ok(output) => match write_output(&output) {
            Ok(()) => std::process::ExitCode::from(output.exit_code.as_u8()),
            Err(error) => exit_with_error(&error),
        },
        Err(error) => exit_with_error(&error),
    }
}

fn exit_with_error(error: &CliError) -> std::process::ExitCode {
    let _ = writeln!(io::stderr(), "error: {error}");
    std::process::ExitCode::from(error.exit_code().as_u8())
}

async fn run(command: &Commands, mode: OutputMode) -> Result<CliOutput, CliError> {
    match command {
        Commands::Info => run_info(mode),
        Commands::Init { codebase_root, description, force } => run_init(mode, codebase_root, description.as_deref(), *force),
        Commands::ServeStorage { config } => run_serve_storage(mode, config.as_deref()).await,
        Commands::Worker { role, config } => run_worker(mode, *role, config.as_deref()).await,
        Commands::Orchestrate { config } => run_orchestrate(mode, config.as_deref()).await,
        Commands::Status { config } => run_status(mode, config.as_deref()).await,
        Commands::Jobs { config, limit } => run_jobs(mode, config.as_deref(), *limit).await,
        Commands::Search { config, project_id, query, top_k } => run_search(mode, config.as_deref(), project_id, query, *top_k).await,
    }
}

fn write_output(output: &CliOutput) -> io::Result<()> {
    if !output.stdout.is_empty() {
        io::stdout().write_all(output.stdout.as_bytes())?;
    }
    if !output.stderr.is_empty() {
        io::stderr().write_all(output.stderr.as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn version_flag_is_supported() {
        let result = Cli::command().try_get_matches_from(["pyindex", "--version"]);
        let is_version = matches!(result, Err(error) if error.kind() == clap::error::ErrorKind::DisplayVersion);
        assert!(is_version, "expected clap to render version");
    }

    #[test]
    fn cli_parses_worker_role() -> Result<(), Box<dyn std::error::Error>> {
        let cli = Cli::try_parse_from(["pyindex", "worker", "--role", "file-watcher"])?;
        match cli.command {
            Commands::Worker { role, config } => {
                assert_eq!(role, WorkerRoleArg::FileWatcher);
                assert_eq!(config, None);
            },
            _ => return Err("expected worker command".into()),
        }
        Ok(())
    }

    #[test]
    fn cli_parses_search_flags() -> Result<(), Box<dyn std::error::Error>> {
        let cli = Cli::try_parse_from(["pyindex", "search", "--project-id", "abc", "needle", "--top-k", "5"])?;
        match cli.command {
            Commands::Search { project_id, query, top_k, .. } => {
                assert_eq!(project_id, "abc");
                assert_eq!(query, "needle");
                assert_eq!(top_k, 5);
            },
            _ => return Err("expected search command".into()),
        }
        Ok(())
    }

    #[test]
    fn cli_parses_init_flags() -> Result<(), Box<dyn std::error::Error>> {
        let cli = Cli::try_parse_from(["pyindex", "init", "/tmp/project", "--description", "demo", "--force"])?;
        match cli.command {
            Commands::Init { codebase_root, description, force } => {
                assert_eq!(codebase_root, PathBuf::from("/tmp/project"));
                assert_eq!(description.as_deref(), Some("demo"));
                assert!(force);
            },
            _ => return Err("expected init command".into()),
        }
        Ok(())
    }

    #[test]
    fn exit_codes_for_errors() {
        let io_error = CliError::Io(io::Error::other("io"));
        assert_eq!(io_error.exit_code(), ExitCode::Io);

        let invalid = CliError::InvalidInput("bad".to_owned());
        assert_eq!(invalid.exit_code(), ExitCode::InvalidInput);
    }
}
