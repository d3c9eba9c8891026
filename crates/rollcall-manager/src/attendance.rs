//! Simulated attendance: every registered student is marked present for
//! each readable class photo, and the sheet is exported as a workbook.

use crate::error::ExportError;
use chrono::NaiveDateTime;
use rollcall_store::RosterTable;
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Column titles of the exported sheet.
pub const ATTENDANCE_COLUMNS: [&str; 4] = ["Enrollment", "Name", "Date", "Time"];

const FILE_PREFIX: &str = "attendance_";
const FILE_SUFFIX: &str = ".xlsx";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceEntry {
    pub enrollment: String,
    pub name: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM:SS`
    pub time: String,
}

impl AttendanceEntry {
    pub fn cells(&self) -> [&str; 4] {
        [&self.enrollment, &self.name, &self.date, &self.time]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceSheet {
    pub taken_at: NaiveDateTime,
    pub entries: Vec<AttendanceEntry>,
}

/// Mark every roster student present once per readable photo, keeping the
/// first entry for each enrollment.
pub fn take_attendance<P: AsRef<Path>>(
    roster: &RosterTable,
    photos: &[P],
    now: NaiveDateTime,
) -> Result<AttendanceSheet, ExportError> {
    if roster.is_empty() {
        return Err(ExportError::NoStudents);
    }

    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H:%M:%S").to_string();

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    let mut processed = 0;
    for photo in photos {
        let photo = photo.as_ref();
        if let Err(e) = image::open(photo) {
            tracing::warn!(path = %photo.display(), error = %e, "skipping unreadable photo");
            continue;
        }
        processed += 1;
        for record in roster {
            if seen.insert(record.enrollment.clone()) {
                entries.push(AttendanceEntry {
                    enrollment: record.enrollment.clone(),
                    name: record.name.clone(),
                    date: date.clone(),
                    time: time.clone(),
                });
            }
        }
    }

    if processed == 0 {
        return Err(ExportError::NoReadablePhotos);
    }
    tracing::info!(photos = processed, present = entries.len(), "attendance taken");
    Ok(AttendanceSheet { taken_at: now, entries })
}

impl AttendanceSheet {
    /// `attendance_{YYYYmmdd_HHMMSS}.xlsx`
    pub fn file_name(&self) -> String {
        format!(
            "{FILE_PREFIX}{}{FILE_SUFFIX}",
            self.taken_at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Rows for document export, in column order.
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.entries
            .iter()
            .map(|e| e.cells().iter().map(|c| c.to_string()).collect())
            .collect()
    }

    /// Write the sheet into `dir` and return the file path. A sheet taken in
    /// the same second replaces the earlier file.
    pub fn write_xlsx(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(dir).map_err(|source| ExportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(self.file_name());

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let bold = Format::new().set_bold();
        for (col, title) in (0u16..).zip(ATTENDANCE_COLUMNS) {
            sheet.write_string_with_format(0, col, title, &bold)?;
        }
        for (row, entry) in (1u32..).zip(&self.entries) {
            for (col, value) in (0u16..).zip(entry.cells()) {
                sheet.write_string(row, col, value)?;
            }
        }
        workbook.save(&path)?;

        tracing::info!(path = %path.display(), rows = self.entries.len(), "attendance sheet written");
        Ok(path)
    }
}

/// Attendance workbooks in `dir`, newest first. A missing directory has none.
pub fn list_attendance_files(dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    let io_err = |source: std::io::Error| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) {
            files.push(entry.path());
        }
    }
    // Timestamped names sort chronologically
    files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(files)
}
