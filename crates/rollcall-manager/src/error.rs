use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// One item of a batch that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Image index or blob key.
    pub item: String,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(item: impl ToString, reason: impl ToString) -> Self {
        Self {
            item: item.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.reason)
    }
}

/// Failures of one batch, rendered `a: why; b: why`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Failures(pub Vec<ItemFailure>);

impl Failures {
    pub fn push(&mut self, failure: ItemFailure) {
        self.0.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|f| f.item.as_str())
    }
}

impl fmt::Display for Failures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("enrollment {0:?} must not contain '/', '\\' or '_'")]
    InvalidEnrollment(String),
    #[error("unreadable image")]
    UnreadableImage(#[source] image::ImageError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("registration cancelled")]
    Cancelled,
    #[error("student not found")]
    StudentNotFound(String),
    #[error("failed to store {} of {total} images under {folder_key}: {failures}", .failures.len())]
    UploadFailed {
        folder_key: String,
        total: usize,
        failures: Failures,
    },
    #[error("removed {enrollment} from the roster but some assets were not deleted: {failures}")]
    PartialRemoval {
        enrollment: String,
        failures: Failures,
    },
    #[error("removed {} orphaned folder(s) but some assets were not deleted: {failures}", .removed.len())]
    PartialCleanup {
        removed: Vec<String>,
        failures: Failures,
    },
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::DetectorError),
    #[error("roster error: {0}")]
    Roster(#[from] rollcall_store::RosterError),
    #[error("storage error: {0}")]
    Blob(#[from] rollcall_store::BlobError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("no students registered")]
    NoStudents,
    #[error("no readable photos")]
    NoReadablePhotos,
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("PDF error: {0}")]
    Pdf(#[from] printpdf::Error),
}

/// Success flag plus message, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl<T: fmt::Display, E: fmt::Display> From<Result<T, E>> for Outcome {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(summary) => Self::ok(summary.to_string()),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}
