//! Roster table persisted as a CSV file.
//!
//! The file is always read and written whole. Callers load the table, change
//! it in memory, and save the full result back.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column header of the roster file, in order.
pub const ROSTER_HEADER: [&str; 4] = ["Enrollment", "Name", "Class", "ImagePath"];

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("roster CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// One registered student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    #[serde(rename = "Enrollment")]
    pub enrollment: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Class", default)]
    pub class_name: String,
    /// Asset folder key; empty in the file when unset.
    #[serde(rename = "ImagePath", default)]
    pub image_location: Option<String>,
}

/// In-memory roster, at most one record per enrollment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterTable {
    records: Vec<StudentRecord>,
}

impl RosterTable {
    /// Build a table, keeping the first record seen for each enrollment.
    pub fn new(records: impl IntoIterator<Item = StudentRecord>) -> Self {
        let mut table = Self::default();
        for record in records {
            if table.contains(&record.enrollment) {
                tracing::warn!(enrollment = %record.enrollment, "duplicate roster row ignored");
                continue;
            }
            table.records.push(record);
        }
        table
    }

    pub fn records(&self) -> &[StudentRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StudentRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, enrollment: &str) -> Option<&StudentRecord> {
        self.records.iter().find(|r| r.enrollment == enrollment)
    }

    pub fn contains(&self, enrollment: &str) -> bool {
        self.find(enrollment).is_some()
    }

    /// Insert `record`, replacing an existing one with the same enrollment in
    /// place. Returns the replaced record.
    pub fn upsert(&mut self, record: StudentRecord) -> Option<StudentRecord> {
        match self.records.iter_mut().find(|r| r.enrollment == record.enrollment) {
            Some(slot) => Some(std::mem::replace(slot, record)),
            None => {
                self.records.push(record);
                None
            }
        }
    }

    pub fn remove(&mut self, enrollment: &str) -> Option<StudentRecord> {
        let idx = self.records.iter().position(|r| r.enrollment == enrollment)?;
        Some(self.records.remove(idx))
    }

    pub fn enrollments(&self) -> HashSet<&str> {
        self.records.iter().map(|r| r.enrollment.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a RosterTable {
    type Item = &'a StudentRecord;
    type IntoIter = std::slice::Iter<'a, StudentRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// CSV file holding the roster.
#[derive(Debug, Clone)]
pub struct RosterStore {
    path: PathBuf,
}

impl RosterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole table. A missing file is an empty roster.
    pub fn load(&self) -> Result<RosterTable, RosterError> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "roster file missing; starting empty");
            return Ok(RosterTable::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)?;
        let records = reader
            .deserialize::<StudentRecord>()
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(path = %self.path.display(), rows = records.len(), "roster loaded");
        Ok(RosterTable::new(records))
    }

    /// Replace the file with `table`.
    ///
    /// Rows go to a sibling temp file that is renamed over the roster, so a
    /// concurrent reader sees either the old or the new table.
    pub fn save(&self, table: &RosterTable) -> Result<(), RosterError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| RosterError::Io { path, source }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let tmp = self.path.with_extension("csv.tmp");
        {
            // Header written by hand so an empty table still gets one
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(&tmp)?;
            writer.write_record(ROSTER_HEADER)?;
            for record in table {
                writer.serialize(record)?;
            }
            writer.flush().map_err(io_err(&tmp))?;
        }

        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        tracing::debug!(path = %self.path.display(), rows = table.len(), "roster saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "rollcall-roster-test-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    fn record(enrollment: &str, name: &str, class_name: &str) -> StudentRecord {
        StudentRecord {
            enrollment: enrollment.to_string(),
            name: name.to_string(),
            class_name: class_name.to_string(),
            image_location: None,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let store = RosterStore::new(scratch_dir("missing").join("students.csv"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_writes_exact_layout() {
        let dir = scratch_dir("layout");
        let store = RosterStore::new(dir.join("students.csv"));

        let mut jane = record("E1", "Jane Doe", "10A");
        jane.image_location = Some("student_images/10A/E1_Jane_Doe".into());
        let table = RosterTable::new([jane, record("E2", "Lee, Sam", "9B")]);
        store.save(&table).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            text,
            "Enrollment,Name,Class,ImagePath\n\
             E1,Jane Doe,10A,student_images/10A/E1_Jane_Doe\n\
             E2,\"Lee, Sam\",9B,\n"
        );
        assert!(!dir.join("students.csv.tmp").exists());

        assert_eq!(store.load().unwrap(), table);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_empty_table_keeps_header() {
        let dir = scratch_dir("empty");
        let store = RosterStore::new(dir.join("students.csv"));
        store.save(&RosterTable::default()).unwrap();

        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "Enrollment,Name,Class,ImagePath\n"
        );
        assert!(store.load().unwrap().is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_legacy_columns_default() {
        let dir = scratch_dir("legacy");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("students.csv");
        fs::write(&path, "Enrollment,Name\n E7 , Ann Lee \n").unwrap();

        let table = RosterStore::new(&path).load().unwrap();
        assert_eq!(table.records(), &[record("E7", "Ann Lee", "")]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_duplicate_rows_keep_first() {
        let dir = scratch_dir("dupes");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("students.csv");
        fs::write(
            &path,
            "Enrollment,Name,Class,ImagePath\nE1,First,10A,\nE1,Second,10B,\n",
        )
        .unwrap();

        let table = RosterStore::new(&path).load().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.find("E1").unwrap().name, "First");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut table = RosterTable::new([record("E1", "A", "1"), record("E2", "B", "1")]);

        let old = table.upsert(record("E1", "A2", "2"));
        assert_eq!(old.unwrap().name, "A");
        assert_eq!(table.records()[0].name, "A2");
        assert_eq!(table.len(), 2);

        assert!(table.upsert(record("E3", "C", "1")).is_none());
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_remove_and_enrollments() {
        let mut table = RosterTable::new([record("E1", "A", "1"), record("E2", "B", "1")]);
        assert_eq!(table.remove("E1").unwrap().name, "A");
        assert!(table.remove("E1").is_none());
        assert!(!table.contains("E1"));
        assert_eq!(table.enrollments(), HashSet::from(["E2"]));
    }
}
