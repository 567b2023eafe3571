use std::{
    ffi::OsString,
    io,
    process::{Command, ExitStatus, Output},
};

use log::debug;
use thiserror::Error;

use crate::config::RemoteConfig;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("cannot find `{program}`, make sure it's installed")]
    NotFound { program: String },
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {output}")]
    NonZeroExit {
        command: String,
        status: ExitStatus,
        output: String,
    },
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Anything that can produce one raw status payload per call.
pub trait PollSource {
    fn poll(&self) -> RemoteResult<String>;
}

/// Wraps the `transmission-remote` and `transmission-daemon` executables.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    remote_bin: String,
    daemon_bin: String,
    connection: Vec<OsString>,
}

impl RemoteClient {
    pub fn new(config: &RemoteConfig) -> Self {
        let mut connection = Vec::new();
        if let Some(host) = &config.host {
            connection.push(OsString::from(host));
        }
        if let Some(user) = &config.username {
            let credentials = match &config.password {
                Some(pass) => format!("{user}:{pass}"),
                None => user.clone(),
            };
            connection.push(OsString::from("--auth"));
            connection.push(OsString::from(credentials));
        }
        Self {
            remote_bin: config.remote_bin.clone(),
            daemon_bin: config.daemon_bin.clone(),
            connection,
        }
    }

    pub fn remote_bin(&self) -> &str {
        &self.remote_bin
    }

    /// Full status of every torrent, with file listings.
    pub fn fetch_output(&self) -> RemoteResult<String> {
        self.remote(&["--torrent", "all", "--info", "--files"])
    }

    /// Succeeds when the daemon answers a listing request.
    pub fn ping(&self) -> RemoteResult<()> {
        self.remote(&["--list"]).map(|_| ())
    }

    pub fn request_exit(&self) -> RemoteResult<()> {
        self.remote(&["--exit"]).map(|_| ())
    }

    pub fn launch_daemon(&self) -> RemoteResult<()> {
        exec(&self.daemon_bin, &[]).map(|_| ())
    }

    fn remote(&self, args: &[&str]) -> RemoteResult<String> {
        let mut full: Vec<OsString> = self.connection.clone();
        full.extend(args.iter().map(OsString::from));
        exec(&self.remote_bin, &full)
    }
}

impl PollSource for RemoteClient {
    fn poll(&self) -> RemoteResult<String> {
        self.fetch_output()
    }
}

fn exec(program: &str, args: &[OsString]) -> RemoteResult<String> {
    // Arguments may carry --auth credentials; keep them out of the log.
    debug!("executing {program} ({} args)", args.len());
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => RemoteError::NotFound {
                program: program.to_string(),
            },
            _ => RemoteError::Spawn {
                program: program.to_string(),
                source,
            },
        })?;
    into_stdout(program, output)
}

fn into_stdout(program: &str, output: Output) -> RemoteResult<String> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = format!("{}{}", stdout, stderr).trim().to_string();
    Err(RemoteError::NonZeroExit {
        command: program.to_string(),
        status: output.status,
        output: combined,
    })
}
