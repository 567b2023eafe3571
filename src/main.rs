mod config;
mod daemon;
mod model;
mod parse;
mod remote;
mod render;
mod selection;
mod tui;

use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
    process,
};

use anyhow::{Context, Result};
use clap::Parser;
use config::{build_config, AppConfig, Cli};
use env_logger::{Env, Target};
use log::{debug, LevelFilter};

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    init_logging(config.log_level, config.log_file.as_deref())?;
    debug!("starting transmission dashboard");
    if config.once {
        return print_once(&config);
    }
    tui::run(config)
}

fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let Some(path) = log_file else {
        let env = Env::default().default_filter_or(level.to_string());
        let _ = env_logger::Builder::from_env(env)
            .format_timestamp(None)
            .format_target(false)
            .try_init();
        return Ok(());
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let file_level = level.max(LevelFilter::Debug);
    let env = Env::default().default_filter_or(file_level.to_string());
    let _ = env_logger::Builder::from_env(env)
        .target(Target::Pipe(Box::new(file)))
        .try_init();
    Ok(())
}

/// Non-interactive mode: one poll, written back out in the daemon's layout.
fn print_once(config: &AppConfig) -> Result<()> {
    let client = remote::RemoteClient::new(&config.remote);
    let parser = parse::OutputParser::new().context("failed to build output parser")?;
    let output = client
        .fetch_output()
        .context("unable to talk to daemon")?;
    let transfers = daemon::collect_transfers(&parser, &output);

    let mut stdout = io::stdout().lock();
    for (index, transfer) in transfers.iter().enumerate() {
        if index > 0 {
            writeln!(stdout)?;
        }
        write!(stdout, "{}", transfer.to_remote_text())?;
    }
    Ok(())
}
