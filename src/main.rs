mod cli;
mod commands;
mod config;
mod engine;
mod manifest;
mod progress;
mod provider;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Stack file
    pub file: PathBuf,
    /// State file override
    pub state: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        file: cli.file,
        state: cli.state,
    };

    match run(&ctx, cli.command) {
        Ok(code) => code,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<ExitCode> {
    match command {
        Command::Validate => commands::validate::run(ctx).map(|()| ExitCode::SUCCESS),
        Command::Plan(args) => commands::plan::run(ctx, &args).map(|()| ExitCode::SUCCESS),
        Command::Apply(args) => commands::apply::apply(ctx, &args),
        Command::Destroy(args) => commands::apply::destroy(ctx, &args),
        Command::Output(args) => commands::output::run(ctx, &args).map(|()| ExitCode::SUCCESS),
        Command::State(cmd) => commands::state::run(ctx, &cmd).map(|()| ExitCode::SUCCESS),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "groundwork", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}
