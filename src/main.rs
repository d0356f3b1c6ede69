mod app;
mod config;
mod display;
mod error;
mod nss;
mod protocol;
mod system;

use clap::{Parser, Subcommand};
use system::simulated::Fault;
use std::process;
use tracing_subscriber::EnvFilter;

/// Verify the identity daemon's lookaside cache lifecycle against a live or simulated host
#[derive(Debug, Parser)]
#[command(name = "memcache-verify", version, about)]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run built-in scenarios and scenario files
    Run {
        /// Built-in scenario names; all of them when none are given
        scenarios: Vec<String>,

        /// Harness configuration file (TOML)
        #[arg(short, long)]
        config: Option<String>,

        /// Scenario file (TOML); may be repeated
        #[arg(short, long = "file")]
        files: Vec<String>,

        /// Run against a simulated host instead of the configured target
        #[arg(long, env = "DEMO_MODE")]
        demo: bool,

        /// Write every report to this TOML file
        #[arg(long)]
        report: Option<String>,

        /// Show passing checks as well
        #[arg(long)]
        checks: bool,

        /// Make the simulated host misbehave; may be repeated
        #[arg(long = "fault", value_enum)]
        faults: Vec<Fault>,
    },
    /// List the built-in scenarios
    List,
    /// Describe a built-in scenario
    Show {
        name: String,

        /// Print as a scenario file instead
        #[arg(long)]
        toml: bool,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: cannot start async runtime: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Run {
            scenarios,
            config,
            files,
            demo,
            report,
            checks,
            faults,
        } => rt.block_on(app::run(app::RunOptions {
            config,
            scenarios,
            files,
            demo,
            report,
            show_checks: checks,
            faults,
        })),
        Command::List => {
            app::list();
            Ok(true)
        }
        Command::Show { name, toml } => app::show(&name, toml).map(|()| true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(2);
        }
    }
}
