mod config;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use regex::Regex;

use stoker_core::{EngineAdapter, NullDiagnostics, Statement, StdoutSink};

use config::StokerConfig;

#[derive(Parser)]
#[command(
    name = "stoker",
    about = "Drive a long-running compiler engine over its command protocol"
)]
struct Cli {
    /// Engine binary (overrides STOKER_ENGINE_BIN and the config file)
    #[arg(long, global = true)]
    engine: Option<PathBuf>,

    /// Engine root path (overrides STOKER_ENGINE_ROOT and the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Target architecture (overrides STOKER_ENGINE_ARCH and the config file)
    #[arg(long, global = true)]
    arch: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a stoker config file (no engine required)
    Init {
        /// Engine binary path
        #[arg(long)]
        engine: PathBuf,
        /// Engine root path
        #[arg(long)]
        root: PathBuf,
        /// Target architecture
        #[arg(long, default_value = "x64")]
        arch: String,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Compile a single file
    CompileFile {
        /// File to compile
        path: String,
    },
    /// Compile everything below one or more workspace roots
    CompileWorkspace {
        /// Workspace roots to compile
        #[arg(required = true)]
        roots: Vec<String>,
    },
    /// Load all known definitions below a path
    Load {
        /// Path to load from
        path: String,
    },
    /// Run a single file
    RunFile {
        /// File to run
        path: String,
    },
    /// Send a raw statement and wait for a success or failure pattern
    Run {
        /// Statement text in the engine's expression syntax
        code: String,
        /// Regex resolving the statement as succeeded
        #[arg(long, default_value = "(?m)^OK\\b")]
        success: String,
        /// Regex rejecting the statement as failed
        #[arg(long, default_value = "(?m)^ERROR\\b")]
        failure: String,
    },
    /// Run the configured clean subcommand and discard engine build state
    Clean,
    /// Resolve the definition site for a byte offset in a file
    Goto {
        /// File containing the reference
        path: String,
        /// Byte offset of the reference within the file
        offset: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Init only writes the config file; it needs no engine.
    if let Commands::Init {
        engine,
        root,
        arch,
        force,
    } = &cli.command
    {
        return config::cmd_init(engine, root, arch, *force);
    }

    let resolved = StokerConfig::resolve(
        cli.engine.as_deref(),
        cli.root.as_deref(),
        cli.arch.as_deref(),
    )?;
    let settle_window = resolved.engine.response_timeout;

    tracing::info!(
        binary = %resolved.engine.binary.display(),
        root = %resolved.engine.root_path.display(),
        arch = %resolved.engine.architecture,
        "driving engine"
    );

    let adapter = EngineAdapter::new(
        resolved.engine,
        Arc::new(StdoutSink),
        Arc::new(NullDiagnostics),
    )
    .context("failed to build the engine adapter")?;

    let result = dispatch(&adapter, cli.command, settle_window).await;
    adapter.stop().await;

    if let Err(e) = result {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn dispatch(
    adapter: &EngineAdapter,
    command: Commands,
    settle_window: Duration,
) -> anyhow::Result<()> {
    match command {
        // Handled in main before the adapter exists.
        Commands::Init { .. } => Ok(()),

        Commands::CompileFile { path } => {
            adapter.compile_file(&path).await?;
            drain(settle_window).await;
            Ok(())
        }

        Commands::CompileWorkspace { roots } => {
            let roots: Vec<&str> = roots.iter().map(String::as_str).collect();
            adapter.compile_workspaces(&roots).await?;
            drain(settle_window).await;
            Ok(())
        }

        Commands::Load { path } => {
            adapter.load_all_known(&path).await?;
            drain(settle_window).await;
            Ok(())
        }

        Commands::RunFile { path } => {
            adapter.run_current_file(&path).await?;
            drain(settle_window).await;
            Ok(())
        }

        Commands::Run {
            code,
            success,
            failure,
        } => {
            let statement = Statement::new(
                code,
                Regex::new(&success).context("invalid success pattern")?,
                Regex::new(&failure).context("invalid failure pattern")?,
            );
            adapter.run_statement(statement).await?;
            println!("statement succeeded");
            Ok(())
        }

        Commands::Clean => {
            // The bracketed report already streamed through the stdout sink.
            adapter.clean().await?;
            Ok(())
        }

        Commands::Goto { path, offset } => {
            let location = adapter.goto(&path, offset).await?;
            println!("{}:{}", location.file, location.offset);
            Ok(())
        }
    }
}

/// Fire-and-forget sends return before the engine answers; linger briefly so
/// the streamed output reaches stdout before the process exits.
async fn drain(window: Duration) {
    tokio::time::sleep(window).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_carry_usable_patterns() {
        let cli = Cli::parse_from(["stoker", "run", "build();"]);
        let Commands::Run {
            success, failure, ..
        } = cli.command
        else {
            panic!("expected the run subcommand");
        };
        Regex::new(&success).expect("default success pattern compiles");
        Regex::new(&failure).expect("default failure pattern compiles");
    }

    #[test]
    fn global_flags_parse_before_the_subcommand() {
        let cli = Cli::parse_from([
            "stoker",
            "--engine",
            "/opt/engine",
            "--root",
            "/work",
            "compile-file",
            "a.src",
        ]);
        assert_eq!(cli.engine, Some(PathBuf::from("/opt/engine")));
        assert_eq!(cli.root, Some(PathBuf::from("/work")));
        assert!(matches!(cli.command, Commands::CompileFile { .. }));
    }
}
