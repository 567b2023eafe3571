use std::collections::BTreeMap;

use log::debug;
use regex::Regex;
use thiserror::Error;

use crate::model::{FileEntry, Transfer, TransferId};

const SECTION_MARKER: &str = "NAME";
const FILES_COUNT_MARKER: &str = "files):";
const FILES_HEADER_MARKER: &str = "Done Priority";
const FILE_LINE_PATTERN: &str = r"(\d+):\s+([0-9]+%)\s+(\S+)\s+(\S+)\s+([0-9.]+ \S+)\s+(.*)$";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("record {chunk} ({}): line without a key/value separator: {line:?}", id_label(.id))]
    MissingSeparator {
        chunk: usize,
        id: Option<String>,
        line: String,
    },
    #[error("record {chunk} ({}): malformed file line: {line:?}", id_label(.id))]
    MalformedFileLine {
        chunk: usize,
        id: Option<String>,
        line: String,
    },
    #[error("record {chunk}: missing `{field}` in `{section}` section")]
    MissingField {
        chunk: usize,
        section: &'static str,
        field: &'static str,
    },
    #[error("invalid file line pattern: {0}")]
    Pattern(#[from] regex::Error),
}

fn id_label(id: &Option<String>) -> String {
    match id {
        Some(id) => format!("id {id}"),
        None => "id unknown".to_string(),
    }
}

pub type RecordResult = Result<Transfer, ParseError>;

/// Turns `transmission-remote --info --files` output into `Transfer` records.
pub struct OutputParser {
    file_line: Regex,
}

type Sections = BTreeMap<String, BTreeMap<String, String>>;

impl OutputParser {
    pub fn new() -> Result<Self, ParseError> {
        Ok(Self {
            file_line: Regex::new(FILE_LINE_PATTERN)?,
        })
    }

    /// Parses one poll's payload. Each record is returned on its own so a
    /// caller can drop a malformed one without losing the rest.
    pub fn parse_output(&self, output: &str) -> Vec<RecordResult> {
        let chunks = split_transfer_chunks(output);
        if chunks.is_empty() {
            debug!("no transfers found in output: {output:?}");
        }
        chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| self.parse_record(index, chunk))
            .collect()
    }

    pub fn parse_record(&self, chunk_index: usize, chunk: &str) -> RecordResult {
        let lines: Vec<&str> = chunk.lines().collect();
        let split = files_section_start(&lines).unwrap_or(lines.len());
        let (info_lines, file_lines) = lines.split_at(split);

        let mut sections = parse_sections(chunk_index, info_lines)?;
        let mut name_section = sections.remove("name").unwrap_or_default();
        let id = name_section.remove("id");
        // skip the count line and the column header
        let file_rows = file_lines.get(2..).unwrap_or_default();
        let files = self.parse_files(chunk_index, id.as_deref(), file_rows)?;

        let id = id.ok_or(ParseError::MissingField {
            chunk: chunk_index,
            section: "name",
            field: "id",
        })?;
        let name = name_section
            .remove("name")
            .ok_or(ParseError::MissingField {
                chunk: chunk_index,
                section: "name",
                field: "name",
            })?;

        Ok(Transfer {
            id: TransferId::new(id),
            name,
            info: sections.remove("transfer").unwrap_or_default(),
            files,
        })
    }

    fn parse_files(
        &self,
        chunk_index: usize,
        id: Option<&str>,
        lines: &[&str],
    ) -> Result<Vec<FileEntry>, ParseError> {
        lines
            .iter()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let caps = self
                    .file_line
                    .captures(line)
                    .ok_or_else(|| ParseError::MalformedFileLine {
                        chunk: chunk_index,
                        id: id.map(str::to_string),
                        line: line.to_string(),
                    })?;
                let group = |index: usize| {
                    caps.get(index)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default()
                };
                Ok(FileEntry {
                    id: group(1),
                    done: group(2),
                    priority: group(3),
                    get: group(4),
                    size: group(5),
                    name: group(6),
                })
            })
            .collect()
    }
}

/// Index of the `<name> (N files):` line, recognised only when it ends its
/// line and is directly followed by the column header.
fn files_section_start(lines: &[&str]) -> Option<usize> {
    lines.windows(2).position(|pair| {
        pair[0].trim_end().ends_with(FILES_COUNT_MARKER) && pair[1].contains(FILES_HEADER_MARKER)
    })
}

/// Splits a payload at every `NAME` marker line; each chunk keeps its marker.
fn split_transfer_chunks(output: &str) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    for line in output.lines() {
        if line.trim_end() == SECTION_MARKER {
            if let Some(chunk) = current.take() {
                chunks.push(chunk);
            }
            current = Some(String::new());
        }
        if let Some(chunk) = current.as_mut() {
            chunk.push_str(line);
            chunk.push('\n');
        }
    }
    chunks.extend(current);
    chunks
}

fn parse_sections(chunk_index: usize, lines: &[&str]) -> Result<Sections, ParseError> {
    let mut sections = Sections::new();
    for block in lines.split(|line| line.trim().is_empty()) {
        let Some((title, body)) = block.split_first() else {
            continue;
        };
        let title = title.trim().to_lowercase();
        let mut fields = BTreeMap::new();
        for line in body {
            let Some((key, value)) = line.split_once(':') else {
                let id = match title.as_str() {
                    "name" => fields.get("id"),
                    _ => sections.get("name").and_then(|name| name.get("id")),
                };
                return Err(ParseError::MissingSeparator {
                    chunk: chunk_index,
                    id: id.cloned(),
                    line: line.trim().to_string(),
                });
            };
            fields.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
        sections.insert(title, fields);
    }
    Ok(sections)
}
