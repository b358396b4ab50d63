use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{OutputMode, OutputSink, StorageFormat};
use crate::error::SinkError;
use crate::models::MatchRecord;

/// Local-file sink. Whole-file rewrites go through a sibling temp file and a
/// rename, so readers see either the old content or the new, never a mix.
pub struct FileSink {
    path: PathBuf,
    mode: OutputMode,
    format: StorageFormat,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, mode: OutputMode, format: StorageFormat) -> Self {
        FileSink {
            path: path.into(),
            mode,
            format,
        }
    }

    fn write_json(&self, records: &[MatchRecord]) -> Result<(), SinkError> {
        let mut all = match self.mode {
            OutputMode::Append => self.read_json_array()?,
            OutputMode::Overwrite => Vec::with_capacity(records.len()),
        };
        for rec in records {
            all.push(serde_json::to_value(rec)?);
        }
        let body = serde_json::to_vec_pretty(&Value::Array(all))?;
        commit_atomically(&self.path, &body)
    }

    fn write_jsonl(&self, records: &[MatchRecord]) -> Result<(), SinkError> {
        let mut body = Vec::new();
        for rec in records {
            serde_json::to_writer(&mut body, rec)?;
            body.push(b'\n');
        }
        match self.mode {
            OutputMode::Overwrite => commit_atomically(&self.path, &body),
            OutputMode::Append => {
                if body.is_empty() {
                    return Ok(());
                }
                ensure_parent(&self.path)?;
                let mut file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .append(true)
                    .open(&self.path)
                    .map_err(|e| SinkError::io(&self.path, e))?;
                // An unterminated last line must not swallow the first new record
                if !ends_with_newline(&mut file).map_err(|e| SinkError::io(&self.path, e))? {
                    body.insert(0, b'\n');
                }
                // One write call for the whole staged batch
                file.write_all(&body)
                    .and_then(|_| file.sync_data())
                    .map_err(|e| SinkError::io(&self.path, e))
            }
        }
    }

    /// Existing records as raw JSON values, so earlier content is carried over
    /// untouched. A missing or blank file counts as empty.
    fn read_json_array(&self) -> Result<Vec<Value>, SinkError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SinkError::io(&self.path, e)),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => Ok(items),
            Ok(_) => Err(SinkError::Corrupt {
                path: self.path.clone(),
                reason: "expected a JSON array".to_string(),
            }),
            Err(e) => Err(SinkError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

impl OutputSink for FileSink {
    fn write(&self, records: &[MatchRecord]) -> Result<(), SinkError> {
        match self.format {
            StorageFormat::Json => self.write_json(records)?,
            StorageFormat::Jsonl => self.write_jsonl(records)?,
        }
        debug!(
            "Wrote {} records to {} ({:?}, {:?})",
            records.len(),
            self.path.display(),
            self.mode,
            self.format
        );
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// `true` for an empty file or one whose last byte is a newline.
fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn ensure_parent(path: &Path) -> Result<(), SinkError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|e| SinkError::io(dir, e))
        }
        _ => Ok(()),
    }
}

/// Write `body` next to `path`, flush it, then rename it into place.
fn commit_atomically(path: &Path, body: &[u8]) -> Result<(), SinkError> {
    ensure_parent(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    let staged = fs::File::create(&tmp).and_then(|mut f| {
        f.write_all(body)?;
        f.sync_all()
    });
    if let Err(e) = staged {
        let _ = fs::remove_file(&tmp);
        return Err(SinkError::io(&tmp, e));
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        SinkError::io(path, e)
    })
}
