use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Once};

use anyhow::Context;
use clap::{Parser, Subcommand};
use strand_core::tree::loader::load_program;
use strand_core::{Engine, ExecutionFault, HeapStats, RuntimeConfig};
use tracing::info;


static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "strand::engine=debug,strand::gc=info,strand::heap=info,strand_cli=info";

/// Exit status for programs that end with an execution fault.
const EXIT_FAULT: i32 = 1;
/// Exit status for programs stopped by their deadline.
const EXIT_TIMEOUT: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "strand", author, version, about = "Run strand node programs", long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load a node program (JSON or YAML) and run it to completion.
    Run {
        #[arg(value_name = "PROGRAM", value_parser = parse_sanitized_path)]
        program: PathBuf,
        /// TOML runtime configuration
        #[arg(long, value_name = "FILE", value_parser = parse_sanitized_path)]
        config: Option<PathBuf>,
        /// Overrides the configured deadline; 0 disables it
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
        /// Run the collector in no-op mode
        #[arg(long)]
        no_gc: bool,
        /// Explore `collect` alternatives flagged as parallel on worker threads
        #[arg(long)]
        parallel: bool,
        /// Print heap counters to stderr after the run
        #[arg(long)]
        stats: bool,
    },
    /// Load and validate a node program without running it.
    Check {
        #[arg(value_name = "PROGRAM", value_parser = parse_sanitized_path)]
        program: PathBuf,
        #[arg(long, value_name = "FILE", value_parser = parse_sanitized_path)]
        config: Option<PathBuf>,
    },
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(anyhow::anyhow!(
                "Parent directory components ('..') are not allowed in file paths."
            ));
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `STRAND_TRACE=1` turns on the default filter; any other non-toggle value is used as the
/// filter itself. Without it, `RUST_LOG` still applies when set.
fn maybe_init_tracing() {
    let raw = std::env::var("STRAND_TRACE").ok();
    let enabled = raw.as_deref().is_some_and(env_toggle_enabled);
    let rust_log = std::env::var("RUST_LOG").ok();
    if !enabled && rust_log.is_none() {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = raw
            .as_deref()
            .filter(|r| env_toggle_enabled(r))
            .and_then(filter_expr_from)
            .or(rust_log);

        let builder = fmt().with_writer(std::io::stderr);

        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };

        let _ = builder.try_init();
    });
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load(path),
        None => Ok(RuntimeConfig::default()),
    }
}

fn print_stats(stats: &HeapStats, steps: u64) {
    eprintln!("steps:          {}", steps);
    eprintln!("allocations:    {}", stats.allocations);
    eprintln!("deallocations:  {}", stats.deallocations);
    eprintln!("live cells:     {}", stats.live_cells);
    eprintln!("generations:    {} (chain depth {})", stats.generations, stats.chain_depth);
    eprintln!("cow copies:     {}", stats.cow_copies);
    eprintln!("gc passes:      {} (threshold {})", stats.gc_passes, stats.gc_threshold);
}

fn exit_code(fault: &ExecutionFault) -> i32 {
    if fault.is_timeout() { EXIT_TIMEOUT } else { EXIT_FAULT }
}

fn main() -> anyhow::Result<()> {
    maybe_init_tracing();

    match CliArgs::parse().command {
        Commands::Run {
            program,
            config,
            timeout_ms,
            no_gc,
            parallel,
            stats,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(ms) = timeout_ms {
                config.timeout_ms = ms;
            }
            if no_gc {
                config.gc_enabled = false;
            }
            if parallel {
                config.parallel_branches = true;
            }
            config.validate()?;

            let tree = load_program(&program, &config)?;
            info!(target: "strand_cli", program = %program.display(), nodes = tree.len(), "loaded");
            let mut engine = Engine::with_config(Arc::new(tree), Arc::new(config));
            let outcome = engine.run();
            if stats {
                print_stats(&engine.stats(), engine.steps());
            }
            match outcome {
                Ok(value) => {
                    let json = serde_json::to_string(&value).context("Failed to serialize result")?;
                    println!("{}", json);
                    Ok(())
                }
                Err(fault) => {
                    eprintln!("Error: {}", fault);
                    std::process::exit(exit_code(&fault));
                }
            }
        }
        Commands::Check { program, config } => {
            let config = load_config(config.as_deref())?;
            let tree = load_program(&program, &config)?;
            println!("{}: ok ({} nodes)", program.display(), tree.len());
            Ok(())
        }
    }
}
