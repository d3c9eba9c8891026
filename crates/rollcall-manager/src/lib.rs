//! rollcall-manager: student lifecycle over the roster and asset stores,
//! plus attendance and document export.

pub mod attendance;
pub mod document;
pub mod error;
pub mod layout;
pub mod manager;

pub use attendance::{list_attendance_files, take_attendance, AttendanceEntry, AttendanceSheet, ATTENDANCE_COLUMNS};
pub use document::{paginate, render_pdf, Page, PageLayout};
pub use error::{ExportError, Failures, ItemFailure, ManagerError, Outcome};
pub use layout::{clean_token, AssetLayout, DEFAULT_ASSET_PREFIX};
pub use manager::{
    AddSummary, CleanupReport, Conflict, ManagerSettings, NewStudent, OverwriteDecision,
    RemoveSummary, StudentManager,
};
