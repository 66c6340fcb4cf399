// src/run_log.rs
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{Local, NaiveDate};
use log::{info, warn};

use crate::error::{Error, Result};

const DATE_FORMAT: &str = "%m/%d/%Y";
const DELIMITER: char = '\t';

/// One mark: the encoder reading and the operator's comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub encoder_value: String,
    pub comment: String,
}

impl LogEntry {
    pub fn new(encoder_value: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            encoder_value: encoder_value.into(),
            comment: comment.into(),
        }
    }

    /// Tab-delimited row including the trailing newline.
    pub fn to_row(&self) -> String {
        format!(
            "{}{}{}\n",
            quote_field(&self.encoder_value),
            DELIMITER,
            quote_field(&self.comment)
        )
    }
}

// Fields that would break the row (delimiter, quote, line break) are quoted
// with inner quotes doubled. Anything else is written as-is.
fn quote_field(field: &str) -> String {
    if field.contains([DELIMITER, '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Appends `.{extension}` when the chosen path has none.
pub fn with_default_extension(path: PathBuf, extension: &str) -> PathBuf {
    if path.extension().is_some() || extension.is_empty() {
        path
    } else {
        path.with_extension(extension)
    }
}

/// The append-only log of the current run.
#[derive(Debug, Default)]
pub struct RunLog {
    file_path: Option<PathBuf>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Whether a mark would currently land somewhere.
    pub fn is_open_for_append(&self) -> bool {
        self.file_path.as_deref().is_some_and(Path::is_file)
    }

    pub fn validate_entry_location(entry_location: &str) -> Result<()> {
        if entry_location.is_empty() {
            return Err(Error::Validation("Enter the Entry Location".to_string()));
        }
        Ok(())
    }

    /// Starts a new run at `destination`, dated today.
    ///
    /// `None` means the save prompt was dismissed: nothing happens and
    /// `Ok(false)` is returned.
    pub fn start_run(&mut self, entry_location: &str, destination: Option<&Path>) -> Result<bool> {
        self.start_run_dated(entry_location, destination, Local::now().date_naive())
    }

    pub fn start_run_dated(
        &mut self,
        entry_location: &str,
        destination: Option<&Path>,
        date: NaiveDate,
    ) -> Result<bool> {
        Self::validate_entry_location(entry_location)?;
        let Some(path) = destination else {
            return Ok(false);
        };

        let mut writer = BufWriter::new(File::create(path)?);
        write!(
            writer,
            "Date: {}\nEntry Location: {}\n\n",
            date.format(DATE_FORMAT),
            entry_location
        )?;
        writer.flush()?;

        info!("Started run at {}", path.display());
        self.file_path = Some(path.to_path_buf());
        Ok(true)
    }

    /// Continues an existing run; the file is not touched.
    pub fn open_run(&mut self, path: Option<&Path>) -> Result<bool> {
        let Some(path) = path else {
            return Ok(false);
        };
        if !path.is_file() {
            warn!("Opened run file {} does not exist yet", path.display());
        }
        info!("Continuing run at {}", path.display());
        self.file_path = Some(path.to_path_buf());
        Ok(true)
    }

    /// Appends one row. Never creates or truncates the file.
    pub fn mark(&mut self, entry: &LogEntry) -> Result<()> {
        let path = self.file_path.as_deref().ok_or(Error::NoActiveRun)?;
        let mut file = OpenOptions::new().append(true).open(path).map_err(|e| {
            warn!("Cannot append to {}: {}", path.display(), e);
            Error::NoActiveRun
        })?;
        file.write_all(entry.to_row().as_bytes())?;
        file.flush()?;
        info!("Marked {} in {}", entry.encoder_value, path.display());
        Ok(())
    }
}
