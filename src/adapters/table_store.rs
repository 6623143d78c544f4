//! CSV table files with atomic, comment-preserving rewrites.
//!
//! Files are split into logical records first (newlines inside quotes do not
//! end a record) so that empty lines survive a round trip; each record is
//! then parsed with the `csv` crate. Writes go to a temporary file in the
//! target's directory and are renamed into place.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::error::TrailError;
use crate::domain::table::{Row, RowEditor, Table};

/// Bounded retry with exponential backoff for file I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 2000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    fn run<T>(&self, operation: &str, path: &Path, mut f: impl FnMut() -> io::Result<T>) -> Result<T, (u32, io::Error)> {
        let attempts = self.attempts.max(1);
        let mut delay_ms = self.initial_delay_ms;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= attempts || !is_transient(&err) {
                        return Err((attempt, err));
                    }
                    debug!(
                        "{} {} attempt {}/{} failed ({}), retrying in {}ms",
                        operation,
                        path.display(),
                        attempt,
                        attempts,
                        err,
                        delay_ms
                    );
                    thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms = ((delay_ms as f64 * self.backoff_factor) as u64).min(self.max_delay_ms);
                }
            }
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    !matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidData
    )
}

#[derive(Debug, Clone, Default)]
pub struct TableStore {
    retry: RetryPolicy,
}

impl TableStore {
    pub fn new(retry: RetryPolicy) -> Self {
        TableStore { retry }
    }

    /// Every row of the file, comments and blank lines included.
    pub fn read_all(&self, path: &Path) -> Result<Table, TrailError> {
        let text = self
            .retry
            .run("read", path, || fs::read_to_string(path))
            .map_err(|(_, err)| TrailError::Io(err))?;
        parse_table(&text).map_err(|reason| TrailError::Table {
            path: path.display().to_string(),
            reason,
        })
    }

    /// Like [`read_all`](Self::read_all), but a missing or empty file yields an
    /// empty table with `columns`.
    pub fn read_or_default(&self, path: &Path, columns: &[String]) -> Result<Table, TrailError> {
        match fs::metadata(path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Table::new(columns.to_vec()));
            }
            Ok(meta) if meta.len() == 0 => return Ok(Table::new(columns.to_vec())),
            _ => {}
        }
        self.read_all(path)
    }

    /// Replace the file contents atomically.
    pub fn write_all(&self, path: &Path, table: &Table) -> Result<(), TrailError> {
        let contents = render_table(table).map_err(|reason| TrailError::Table {
            path: path.display().to_string(),
            reason,
        })?;
        self.retry
            .run("write", path, || write_atomic(path, &contents))
            .map_err(|(attempts, err)| {
                warn!("giving up on {} after {} attempts: {}", path.display(), attempts, err);
                TrailError::WriteFailed {
                    path: path.display().to_string(),
                    attempts,
                    reason: err.to_string(),
                }
            })
    }

    /// Mutate rows whose id matches `predicate` and write once.
    /// Returns the number of rows that changed; nothing is written when zero.
    pub fn update_rows<P, M>(&self, path: &Path, predicate: P, mutator: M) -> Result<usize, TrailError>
    where
        P: FnMut(&str) -> bool,
        M: FnMut(&mut RowEditor<'_>),
    {
        let mut table = self.read_all(path)?;
        let changed = table.update(predicate, mutator);
        if changed > 0 {
            self.write_all(path, &table)?;
        }
        Ok(changed)
    }

    /// Read (or start from `columns`), apply `f`, and write back if anything
    /// changed. Returns `f`'s result and the number of rows changed or added.
    pub fn modify<R>(
        &self,
        path: &Path,
        columns: &[String],
        f: impl FnOnce(&mut Table) -> R,
    ) -> Result<(R, usize), TrailError> {
        let before = self.read_or_default(path, columns)?;
        let mut table = before.clone();
        let result = f(&mut table);
        if table == before {
            return Ok((result, 0));
        }
        let changed = table
            .rows()
            .iter()
            .zip(before.rows())
            .filter(|(a, b)| a != b)
            .count()
            + table.len().saturating_sub(before.len());
        self.write_all(path, &table)?;
        Ok((result, changed))
    }
}

fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "table".to_string());

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    if let Ok(meta) = fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Split `text` into logical records, honouring quoted newlines.
///
/// A quote opens a quoted field only as the first byte of a field; anywhere
/// else it is an ordinary character, as the `csv` reader treats it.
fn split_records(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut records = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut field_start = true;
    let mut i = 0;
    while i < bytes.len() {
        match (bytes[i], in_quotes) {
            (b'"', true) if bytes.get(i + 1) == Some(&b'"') => i += 1,
            (b'"', true) => in_quotes = false,
            (b'"', false) if field_start => {
                in_quotes = true;
                field_start = false;
            }
            (b',', false) => field_start = true,
            (b'\n', false) => {
                records.push(text[start..i].strip_suffix('\r').unwrap_or(&text[start..i]));
                start = i + 1;
                field_start = true;
            }
            (_, false) => field_start = false,
            (_, true) => {}
        }
        i += 1;
    }
    if start < text.len() {
        records.push(&text[start..]);
    }
    records
}

fn parse_record(line: &str) -> Result<Vec<String>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Ok(record.iter().map(str::to_string).collect()),
        Ok(false) => Ok(Vec::new()),
        Err(e) => Err(format!("CSV parse error: {e}")),
    }
}

pub fn parse_table(text: &str) -> Result<Table, String> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = split_records(text).into_iter();
    let header = records.next().ok_or_else(|| "missing header row".to_string())?;
    let columns: Vec<String> = parse_record(header)?
        .into_iter()
        .map(|c| c.trim().to_string())
        .collect();
    if columns.iter().all(|c| c.is_empty()) {
        return Err("missing header row".to_string());
    }

    let mut table = Table::new(columns);
    for (index, line) in records.enumerate() {
        if line.is_empty() {
            table.push(Row::empty_line());
            continue;
        }
        let cells = parse_record(line).map_err(|e| format!("line {}: {}", index + 2, e))?;
        table.push(Row::verbatim(cells, line.to_string()));
    }
    Ok(table)
}

fn encode_record(cells: &[String]) -> Result<String, String> {
    if cells.is_empty() {
        return Ok(String::new());
    }
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(cells).map_err(|e| e.to_string())?;
    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    let mut line = String::from_utf8(bytes).map_err(|e| e.to_string())?;
    if line.ends_with('\n') {
        line.pop();
    }
    Ok(line)
}

pub fn render_table(table: &Table) -> Result<String, String> {
    let mut out = encode_record(table.columns())?;
    out.push('\n');
    for row in table.rows() {
        let line = match row.raw() {
            Some(raw) => raw.to_string(),
            None if row.is_data() && row.cells().len() < table.columns().len() => {
                let mut cells = row.cells().to_vec();
                cells.resize(table.columns().len(), String::new());
                encode_record(&cells)?
            }
            None => encode_record(row.cells())?,
        };
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}
