// Copyright (c) The restree Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The persisted form of a test result: one version-tagged text file per
//! test.
//!
//! A result file contains, in order:
//!
//! - A header line identifying the format version. Readers accept the two
//!   historical header forms and reject anything else with a distinct
//!   unrecognized-header error.
//! - A test-description block (source file, URL, and parameters).
//! - An optional environment block.
//! - A result-properties block.
//! - One block per section: the title, each stream's byte counts and escaped
//!   text, and the section's result line.
//! - A trailing overall status line.
//!
//! Stream text and property values are backslash-escaped so that every value
//! occupies exactly one line.

use crate::{
    errors::ResultFileError,
    section::SectionSnapshot,
    status::TestStatus,
    test_description::TestDescription,
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{collections::BTreeMap, fmt::Write as _, fs, io};

/// The header written by this version of the harness.
pub const HEADER_V2: &str = "#Test Results (version 2)";

/// The header of the previous format version, still accepted on read.
pub const HEADER_V1: &str = "#Test Results (version 1)";

const DESCRIPTION_MARKER: &str = "#-----testdescription-----";
const ENVIRONMENT_MARKER: &str = "#-----environment-----";
const RESULT_PROPS_MARKER: &str = "#-----testresult-----";
const SECTION_PREFIX: &str = "#section:";
const STREAM_FENCE: &str = "----------";
const SECTION_RESULT_PREFIX: &str = "result: ";
const FINAL_STATUS_PREFIX: &str = "test result: ";

const DESC_FILE_KEY: &str = "file";
const DESC_URL_KEY: &str = "url";

/// Everything needed to write (or reconstruct) one result file.
#[derive(Clone, Debug)]
pub struct RecordSnapshot {
    /// The test URL the record belongs to.
    pub url: String,
    /// The originating test description, if known.
    pub desc: Option<TestDescription>,
    /// The environment block, possibly empty.
    pub env: IndexMap<String, String>,
    /// The result-properties block.
    pub props: IndexMap<String, String>,
    /// The record's sections, in order.
    pub sections: Vec<SectionSnapshot>,
    /// The overall status.
    pub status: TestStatus,
}

/// Writes a record snapshot to `path`, creating parent directories as
/// needed.
pub fn write(path: &Utf8Path, snapshot: &RecordSnapshot) -> Result<(), ResultFileError> {
    let mut out = String::new();
    render(snapshot, &mut out);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| ResultFileError::Io {
            path: path.to_owned(),
            error,
        })?;
    }
    fs::write(path, out).map_err(|error| ResultFileError::Io {
        path: path.to_owned(),
        error,
    })
}

fn render(snapshot: &RecordSnapshot, out: &mut String) {
    out.push_str(HEADER_V2);
    out.push('\n');

    out.push_str(DESCRIPTION_MARKER);
    out.push('\n');
    if let Some(desc) = &snapshot.desc {
        writeln_prop(out, DESC_FILE_KEY, desc.file().as_str());
        writeln_prop(out, DESC_URL_KEY, desc.url());
        for (key, value) in desc.params() {
            writeln_prop(out, key, value);
        }
    } else {
        writeln_prop(out, DESC_URL_KEY, &snapshot.url);
    }

    if !snapshot.env.is_empty() {
        out.push_str(ENVIRONMENT_MARKER);
        out.push('\n');
        for (key, value) in &snapshot.env {
            writeln_prop(out, key, value);
        }
    }

    out.push_str(RESULT_PROPS_MARKER);
    out.push('\n');
    for (key, value) in &snapshot.props {
        writeln_prop(out, key, value);
    }

    for (index, section) in snapshot.sections.iter().enumerate() {
        let _ = writeln!(out, "{SECTION_PREFIX}{index} {}", section.title);
        for (name, text, total) in &section.streams {
            let _ = writeln!(
                out,
                "{STREAM_FENCE}{name}:({}/{total}){STREAM_FENCE}",
                text.len()
            );
            out.push_str(&escape(text));
            out.push('\n');
        }
        let status = section
            .status
            .clone()
            .unwrap_or_else(|| TestStatus::error("section status missing"));
        let _ = writeln!(out, "{SECTION_RESULT_PREFIX}{status}");
    }

    let _ = writeln!(out, "{FINAL_STATUS_PREFIX}{}", snapshot.status);
}

fn writeln_prop(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "{key}={}", escape(value));
}

/// Loads a record snapshot from `path`.
///
/// A missing file is reported as [`ResultFileError::NotFound`]; a file with
/// an unknown header as [`ResultFileError::UnrecognizedHeader`]; any other
/// structural fault as [`ResultFileError::Parse`].
pub fn load(path: &Utf8Path) -> Result<RecordSnapshot, ResultFileError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Err(ResultFileError::NotFound {
                path: path.to_owned(),
            });
        }
        Err(error) => {
            return Err(ResultFileError::Io {
                path: path.to_owned(),
                error,
            });
        }
    };
    parse(path, &contents)
}

fn parse(path: &Utf8Path, contents: &str) -> Result<RecordSnapshot, ResultFileError> {
    let mut lines = contents.lines().enumerate().peekable();

    let (_, header) = lines.next().ok_or_else(|| ResultFileError::parse(
        path,
        1,
        "empty file",
    ))?;
    if header != HEADER_V2 && header != HEADER_V1 {
        return Err(ResultFileError::UnrecognizedHeader {
            path: path.to_owned(),
            header: header.to_owned(),
        });
    }

    expect_line(path, &mut lines, DESCRIPTION_MARKER)?;
    let desc_props = read_props(path, &mut lines)?;
    let url = desc_props
        .get(DESC_URL_KEY)
        .cloned()
        .ok_or_else(|| ResultFileError::parse(path, 0, "test description has no URL"))?;
    let desc = desc_props.get(DESC_FILE_KEY).map(|file| {
        let params: BTreeMap<String, String> = desc_props
            .iter()
            .filter(|(key, _)| key.as_str() != DESC_FILE_KEY && key.as_str() != DESC_URL_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        TestDescription::new(Utf8PathBuf::from(file), url.clone(), params)
    });

    let mut env = IndexMap::new();
    if next_is(&mut lines, ENVIRONMENT_MARKER) {
        lines.next();
        env = read_props(path, &mut lines)?;
    }

    expect_line(path, &mut lines, RESULT_PROPS_MARKER)?;
    let props = read_props(path, &mut lines)?;

    let mut sections = Vec::new();
    let mut status = None;
    while let Some((index, line)) = lines.next() {
        let line_no = index + 1;
        if let Some(rest) = line.strip_prefix(SECTION_PREFIX) {
            let title = rest
                .split_once(' ')
                .map(|(_, title)| title)
                .ok_or_else(|| ResultFileError::parse(path, line_no, "malformed section line"))?;
            sections.push(read_section(path, title, &mut lines)?);
        } else if let Some(rest) = line.strip_prefix(FINAL_STATUS_PREFIX) {
            status = Some(rest.parse::<TestStatus>().map_err(|_| {
                ResultFileError::parse(path, line_no, format!("bad status line: `{rest}`"))
            })?);
            break;
        } else {
            return Err(ResultFileError::parse(
                path,
                line_no,
                format!("unexpected line: `{line}`"),
            ));
        }
    }
    let status = status
        .ok_or_else(|| ResultFileError::parse(path, 0, "missing trailing status line"))?;

    Ok(RecordSnapshot {
        url,
        desc,
        env,
        props,
        sections,
        status,
    })
}

type Lines<'a> = std::iter::Peekable<std::iter::Enumerate<std::str::Lines<'a>>>;

fn read_section(
    path: &Utf8Path,
    title: &str,
    lines: &mut Lines<'_>,
) -> Result<SectionSnapshot, ResultFileError> {
    let mut streams = Vec::new();
    loop {
        let Some((index, line)) = lines.next() else {
            return Err(ResultFileError::parse(path, 0, "unterminated section"));
        };
        let line_no = index + 1;
        if let Some(rest) = line.strip_prefix(SECTION_RESULT_PREFIX) {
            let status = rest.parse::<TestStatus>().map_err(|_| {
                ResultFileError::parse(path, line_no, format!("bad section result: `{rest}`"))
            })?;
            return Ok(SectionSnapshot {
                title: title.to_owned(),
                streams,
                status: Some(status),
            });
        }
        let header = line
            .strip_prefix(STREAM_FENCE)
            .and_then(|rest| rest.strip_suffix(STREAM_FENCE))
            .ok_or_else(|| {
                ResultFileError::parse(path, line_no, format!("expected stream header: `{line}`"))
            })?;
        let (name, counts) = header.split_once(":(").ok_or_else(|| {
            ResultFileError::parse(path, line_no, "malformed stream header")
        })?;
        let counts = counts.strip_suffix(')').ok_or_else(|| {
            ResultFileError::parse(path, line_no, "malformed stream header")
        })?;
        let total = counts
            .split_once('/')
            .map(|(_, total)| total)
            .unwrap_or(counts)
            .parse::<usize>()
            .map_err(|_| ResultFileError::parse(path, line_no, "bad stream byte count"))?;

        let Some((text_index, text_line)) = lines.next() else {
            return Err(ResultFileError::parse(path, 0, "missing stream text"));
        };
        let text = unescape(text_line)
            .map_err(|message| ResultFileError::parse(path, text_index + 1, message))?;
        streams.push((name.to_owned(), text, total));
    }
}

fn expect_line(path: &Utf8Path, lines: &mut Lines<'_>, expected: &str) -> Result<(), ResultFileError> {
    match lines.next() {
        Some((_, line)) if line == expected => Ok(()),
        Some((index, line)) => Err(ResultFileError::parse(
            path,
            index + 1,
            format!("expected `{expected}`, found `{line}`"),
        )),
        None => Err(ResultFileError::parse(
            path,
            0,
            format!("expected `{expected}`, found end of file"),
        )),
    }
}

fn next_is(lines: &mut Lines<'_>, expected: &str) -> bool {
    matches!(lines.peek(), Some((_, line)) if *line == expected)
}

fn read_props(
    path: &Utf8Path,
    lines: &mut Lines<'_>,
) -> Result<IndexMap<String, String>, ResultFileError> {
    let mut props = IndexMap::new();
    while let Some((index, line)) = lines.peek() {
        if line.starts_with('#')
            || line.starts_with(STREAM_FENCE)
            || line.starts_with(FINAL_STATUS_PREFIX)
        {
            break;
        }
        let line_no = index + 1;
        let (key, value) = line.split_once('=').ok_or_else(|| {
            ResultFileError::parse(path, line_no, format!("expected key=value, found `{line}`"))
        })?;
        let value = unescape(value).map_err(|message| {
            ResultFileError::parse(path, line_no, message)
        })?;
        props.insert(key.to_owned(), value);
        lines.next();
    }
    Ok(props)
}

/// Escapes backslashes and line terminators so a value fits on one line.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(text: &str) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(format!("bad escape `\\{other}`")),
            None => return Err("dangling backslash".to_owned()),
        }
    }
    Ok(out)
}
