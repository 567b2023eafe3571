use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use dirs::config_dir;
use log::LevelFilter;
use serde::Deserialize;

use crate::selection::SelectionPolicy;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub poll_interval: Duration,
    pub input_tick: Duration,
    pub selection_policy: SelectionPolicy,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
    pub once: bool,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub remote_bin: String,
    pub daemon_bin: String,
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub manage_daemon: bool,
}

impl RemoteConfig {
    pub fn label(&self) -> String {
        match &self.host {
            Some(host) => format!("{} @ {}", self.remote_bin, host),
            None => self.remote_bin.clone(),
        }
    }
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Live terminal dashboard for a Transmission daemon", long_about = None)]
pub struct Cli {
    /// Daemon address passed to transmission-remote, e.g. `localhost:9091`.
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub remote_bin: Option<String>,
    #[arg(long)]
    pub daemon_bin: Option<String>,
    /// Seconds between status polls.
    #[arg(long)]
    pub poll_interval: Option<f64>,
    #[arg(long)]
    pub input_tick_ms: Option<u64>,
    /// Never start or stop the daemon; only watch it.
    #[arg(long = "no-manage-daemon", action = ArgAction::SetTrue)]
    pub no_manage_daemon: bool,
    /// `revalidate` or `lazy`.
    #[arg(long)]
    pub selection_policy: Option<String>,
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub log_file: Option<PathBuf>,
    /// Poll once, print the parsed transfers and exit.
    #[arg(long, action = ArgAction::SetTrue)]
    pub once: bool,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    remote: Option<FileRemoteConfig>,
    poll_interval: Option<f64>,
    input_tick_ms: Option<u64>,
    selection_policy: Option<String>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRemoteConfig {
    remote_bin: Option<String>,
    daemon_bin: Option<String>,
    host: Option<String>,
    username: Option<String>,
    password: Option<String>,
    manage_daemon: Option<bool>,
}

pub fn build_config(cli: &Cli) -> Result<AppConfig> {
    let file_config = load_file_config(cli.config.as_deref())?;
    resolve(cli, file_config.unwrap_or_default())
}

fn resolve(cli: &Cli, file_config: FileConfig) -> Result<AppConfig> {
    let remote_file = file_config.remote.unwrap_or_default();

    let remote_bin = cli
        .remote_bin
        .clone()
        .or_else(|| env::var("TMS_TUI_REMOTE_BIN").ok())
        .or(remote_file.remote_bin)
        .unwrap_or_else(|| "transmission-remote".to_string());

    let daemon_bin = cli
        .daemon_bin
        .clone()
        .or_else(|| env::var("TMS_TUI_DAEMON_BIN").ok())
        .or(remote_file.daemon_bin)
        .unwrap_or_else(|| "transmission-daemon".to_string());

    let host = cli
        .host
        .clone()
        .or_else(|| env::var("TRANSMISSION_HOST").ok())
        .or(remote_file.host);

    let username = cli
        .username
        .clone()
        .or_else(|| env::var("TRANSMISSION_USERNAME").ok())
        .or(remote_file.username);

    let password = cli
        .password
        .clone()
        .or_else(|| env::var("TRANSMISSION_PASSWORD").ok())
        .or(remote_file.password);

    let manage_daemon = if cli.no_manage_daemon {
        false
    } else {
        env_bool("TMS_TUI_MANAGE_DAEMON")
            .or(remote_file.manage_daemon)
            .unwrap_or(true)
    };

    let poll_secs = cli
        .poll_interval
        .or_else(|| env_var_parse("TMS_TUI_POLL_INTERVAL"))
        .or(file_config.poll_interval)
        .unwrap_or(1.0);

    if !poll_secs.is_finite() || poll_secs <= 0.0 {
        anyhow::bail!("poll interval must be positive");
    }

    let input_tick_ms = cli
        .input_tick_ms
        .or_else(|| env_var_parse("TMS_TUI_INPUT_TICK_MS"))
        .or(file_config.input_tick_ms)
        .unwrap_or(250);

    if input_tick_ms == 0 {
        anyhow::bail!("input tick must be positive");
    }

    let policy_str = cli
        .selection_policy
        .clone()
        .or_else(|| env::var("TMS_TUI_SELECTION_POLICY").ok())
        .or(file_config.selection_policy);
    let selection_policy = match policy_str {
        Some(name) => SelectionPolicy::from_name(&name)
            .with_context(|| format!("unknown selection policy {name:?}"))?,
        None => SelectionPolicy::default(),
    };

    let log_level_str = cli
        .log_level
        .clone()
        .or_else(|| env::var("TMS_TUI_LOG_LEVEL").ok())
        .or(file_config.log_level)
        .unwrap_or_else(|| "error".to_string());
    let log_level = parse_level(&log_level_str).unwrap_or(LevelFilter::Error);

    let log_file = cli
        .log_file
        .clone()
        .or_else(|| env::var_os("TMS_TUI_LOG_FILE").map(PathBuf::from))
        .or(file_config.log_file);

    Ok(AppConfig {
        remote: RemoteConfig {
            remote_bin,
            daemon_bin,
            host,
            username,
            password,
            manage_daemon,
        },
        poll_interval: Duration::from_secs_f64(poll_secs),
        input_tick: Duration::from_millis(input_tick_ms),
        selection_policy,
        log_level,
        log_file,
        once: cli.once,
    })
}

/// Accepts the `log` level names plus a few common aliases.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "none" => Some(LevelFilter::Off),
        "crit" | "critical" => Some(LevelFilter::Error),
        "warning" => Some(LevelFilter::Warn),
        other => LevelFilter::from_str(other).ok(),
    }
}

fn load_file_config(path: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = path {
        return read_file_config(path);
    }

    if let Ok(env_path) = env::var("TMS_TUI_CONFIG") {
        return read_file_config(Path::new(&env_path));
    }

    match config_dir() {
        Some(dir) => read_file_config(&dir.join("tms-tui").join("config.toml")),
        None => Ok(None),
    }
}

fn read_file_config(path: &Path) -> Result<Option<FileConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(Some(parsed))
}

fn env_var_parse<T>(name: &str) -> Option<T>
where
    T: FromStr,
{
    env::var(name).ok().and_then(|value| value.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .and_then(|value| match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}
