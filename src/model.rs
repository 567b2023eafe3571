use std::{collections::BTreeMap, fmt};

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * 60;
const SECONDS_PER_DAY: u64 = 60 * 60 * 24;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransferId(String);

impl TransferId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One torrent as reported by a single poll of the daemon.
///
/// `info` holds the TRANSFER section verbatim, keyed by lower-cased field
/// name. The daemon decides which fields appear, so every accessor below
/// returns `Option`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub id: TransferId,
    pub name: String,
    pub info: BTreeMap<String, String>,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub id: String,
    pub done: String,
    pub priority: String,
    pub get: String,
    pub size: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Finished,
    Idle,
    Other(String),
}

impl TransferState {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "Finished" => TransferState::Finished,
            "Idle" => TransferState::Idle,
            other => TransferState::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            TransferState::Finished => "Finished",
            TransferState::Idle => "Idle",
            TransferState::Other(raw) => raw,
        }
    }
}

impl Transfer {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.info.get(key).map(String::as_str)
    }

    /// Parsed `percent done`. A NaN or unreadable value counts as missing.
    pub fn percent_done(&self) -> Option<f64> {
        let raw = self.field("percent done")?;
        let number = raw.trim().trim_end_matches('%').trim();
        number.parse::<f64>().ok().filter(|value| value.is_finite())
    }

    /// The `have` amount without its parenthesised verification note.
    pub fn have(&self) -> Option<&str> {
        self.field("have").map(|raw| extract_up_to(raw, " ("))
    }

    pub fn eta(&self) -> Option<&str> {
        self.field("eta")
    }

    pub fn upload_speed(&self) -> Option<&str> {
        self.field("upload speed")
    }

    pub fn download_speed(&self) -> Option<&str> {
        self.field("download speed")
    }

    pub fn ratio(&self) -> Option<&str> {
        self.field("ratio")
    }

    pub fn state(&self) -> Option<TransferState> {
        self.field("state").map(TransferState::from_raw)
    }

    pub fn eta_label(&self) -> String {
        match self.state() {
            Some(TransferState::Finished) => return "Done".to_string(),
            Some(TransferState::Idle) => return "N/A".to_string(),
            _ => {}
        }
        match self.eta() {
            Some(raw) => match parse_eta_seconds(raw) {
                Some(seconds) => format_eta(seconds),
                None => raw.to_string(),
            },
            None => "N/A".to_string(),
        }
    }

    /// Writes the record back out in the daemon's `--info --files` layout.
    pub fn to_remote_text(&self) -> String {
        RemoteText(self).to_string()
    }
}

struct RemoteText<'a>(&'a Transfer);

impl fmt::Display for RemoteText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transfer = self.0;
        writeln!(f, "NAME")?;
        writeln!(f, "  Id: {}", transfer.id)?;
        writeln!(f, "  Name: {}", transfer.name)?;
        writeln!(f)?;
        writeln!(f, "TRANSFER")?;
        for (key, value) in &transfer.info {
            writeln!(f, "  {key}: {value}")?;
        }
        if transfer.files.is_empty() {
            return Ok(());
        }
        writeln!(f)?;
        writeln!(f, "{} ({} files):", transfer.name, transfer.files.len())?;
        writeln!(f, "  #  Done Priority Get      Size  Name")?;
        for file in &transfer.files {
            writeln!(
                f,
                "{:>3}: {:>4} {:<8} {:<3} {:>9}  {}",
                file.id, file.done, file.priority, file.get, file.size, file.name
            )?;
        }
        Ok(())
    }
}

/// Pulls the seconds count out of an ETA such as `"4 minutes (245 seconds)"`.
pub fn parse_eta_seconds(raw: &str) -> Option<u64> {
    let start = raw.find('(')? + 1;
    let inner = &raw[start..];
    let digits = inner.split_whitespace().next()?;
    digits.trim_end_matches(')').parse().ok()
}

pub fn format_eta(seconds: u64) -> String {
    if seconds == 0 {
        return "done".to_string();
    }
    if seconds < SECONDS_PER_MINUTE {
        return format!("{seconds} secs");
    }

    let days = seconds / SECONDS_PER_DAY;
    if days > 2 {
        return format!("{days} days");
    }

    let remainder = seconds % SECONDS_PER_DAY;
    let hours = remainder / SECONDS_PER_HOUR;
    let remainder = remainder % SECONDS_PER_HOUR;
    let minutes = remainder / SECONDS_PER_MINUTE;

    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}")
    } else if hours > 0 {
        format!("{hours}:{minutes:02} hrs")
    } else {
        let seconds = remainder % SECONDS_PER_MINUTE;
        format!("{minutes}.{seconds:02} mins")
    }
}

pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.1}%"),
        None => "N/A".to_string(),
    }
}

fn extract_up_to<'a>(text: &'a str, boundary: &str) -> &'a str {
    match text.find(boundary) {
        Some(index) => &text[..index],
        None => text,
    }
}
