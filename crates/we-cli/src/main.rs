//! WE command-line host
//!
//! Loads compiled programs into the engine, runs them and inspects them:
//! - `we run` executes a program with arguments and prints the final stack
//! - `we disasm` lists the instructions of a program

use std::path::PathBuf;

use clap::{ArgAction, CommandFactory, FromArgMatches, Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "we")]
#[command(about = "Host for WE engine programs", long_about = None)]
#[command(version)]
struct Cli {
    /// Log engine activity (repeat for per-instruction tracing)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a compiled program
    Run {
        /// Program file
        program: PathBuf,
        /// Number argument (repeatable, order kept with --arg-str)
        #[arg(long = "arg", value_name = "N", allow_negative_numbers = true)]
        numbers: Vec<i64>,
        /// Buffer argument (repeatable, order kept with --arg)
        #[arg(long = "arg-str", value_name = "S")]
        strings: Vec<String>,
        /// TOML file with VM options
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the configured stack size
        #[arg(long)]
        stack_size: Option<usize>,
        /// Resume a yielding program up to this many more times
        #[arg(long, default_value = "0")]
        resume: u32,
        /// Print the final stack as JSON
        #[arg(long)]
        json: bool,
    },

    /// Disassemble a compiled program
    Disasm {
        /// Program file
        program: PathBuf,
    },
}

/// Install the log subscriber; `RUST_LOG` wins over `--verbose`
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info,we_engine=debug",
        _ => "debug,we_engine=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            program,
            config,
            stack_size,
            resume,
            json,
            ..
        } => {
            let arguments = match matches.subcommand_matches("run") {
                Some(run) => commands::run::ordered_arguments(run),
                None => Vec::new(),
            };
            let options = config::load_options(config.as_deref(), stack_size)?;
            commands::run::execute(commands::run::RunArgs {
                program,
                arguments,
                options,
                resume,
                json,
            })?;
        }

        Commands::Disasm { program } => {
            commands::disasm::execute(&program)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_arguments_keep_order() {
        use commands::run::{ordered_arguments, Argument};

        let matches = Cli::command()
            .try_get_matches_from([
                "we", "run", "p.bin", "--arg", "1", "--arg-str", "x", "--arg", "-2",
            ])
            .unwrap();
        let run = matches.subcommand_matches("run").unwrap();
        assert_eq!(
            ordered_arguments(run),
            vec![
                Argument::Number(1),
                Argument::Bytes("x".to_string()),
                Argument::Number(-2),
            ]
        );
    }
}
