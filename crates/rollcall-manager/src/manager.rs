//! Student lifecycle: register, remove, reconcile.
//!
//! Every operation loads the whole roster, computes the new table in memory,
//! and writes it back at the end. Add is two-phase: all images are stored
//! first and the roster is written only when every upload succeeded. A crash
//! between the phases leaves an orphaned asset folder that [`StudentManager::cleanup`]
//! removes.

use crate::error::{Failures, ItemFailure, ManagerError};
use crate::layout::{enrollment_is_key_safe, AssetLayout, StudentFolder};
use image::{DynamicImage, ImageFormat};
use rollcall_core::{
    extract_face, Augmenter, DetectionParams, FaceDetector, DEFAULT_AUGMENTATION_COUNT,
};
use rollcall_store::{BlobStore, RosterStore, RosterTable, StudentRecord};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;

/// Tunables for [`StudentManager`].
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub layout: AssetLayout,
    /// Images written per student.
    pub augmentation_count: usize,
    pub detection: DetectionParams,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            layout: AssetLayout::default(),
            augmentation_count: DEFAULT_AUGMENTATION_COUNT,
            detection: DetectionParams::default(),
        }
    }
}

/// Registration input, as entered by the operator.
#[derive(Debug, Clone, Copy)]
pub struct NewStudent<'a> {
    pub enrollment: &'a str,
    pub name: &'a str,
    pub class_name: &'a str,
    /// Encoded photo (any format the `image` crate can decode).
    pub photo: &'a [u8],
}

impl NewStudent<'_> {
    /// Field checks that need neither the detector nor the stores.
    pub fn validate(&self) -> Result<(), ManagerError> {
        let enrollment = required("enrollment", self.enrollment)?;
        required("name", self.name)?;
        required("class", self.class_name)?;
        if self.photo.is_empty() {
            return Err(ManagerError::MissingField("image"));
        }
        if !enrollment_is_key_safe(enrollment) {
            return Err(ManagerError::InvalidEnrollment(enrollment.to_string()));
        }
        Ok(())
    }
}

/// Existing data that a registration would replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub enrollment: String,
    /// Roster record already holding this enrollment.
    pub existing: Option<StudentRecord>,
    /// Folder the new images would go to.
    pub folder_key: String,
    /// Number of blobs already in `folder_key`.
    pub existing_images: usize,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.existing {
            Some(record) => write!(
                f,
                "enrollment {} is already registered to {} ({})",
                self.enrollment, record.name, record.class_name
            )?,
            None => write!(f, "enrollment {} is not on the roster", self.enrollment)?,
        }
        if self.existing_images > 0 {
            write!(f, "; {} has {} image(s)", self.folder_key, self.existing_images)?;
        }
        Ok(())
    }
}

/// Caller's answer to a [`Conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteDecision {
    Overwrite,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddSummary {
    pub enrollment: String,
    pub folder_key: String,
    pub images_written: usize,
    pub replaced: bool,
}

impl fmt::Display for AddSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "registered {}: {} images written to {}",
            self.enrollment, self.images_written, self.folder_key
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveSummary {
    pub enrollment: String,
    pub folder_key: String,
    pub images_deleted: usize,
}

impl fmt::Display for RemoveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "removed {} ({} images deleted)", self.enrollment, self.images_deleted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Folder keys deleted, sorted.
    pub removed: Vec<String>,
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.removed.is_empty() {
            return f.write_str("no orphaned folders found");
        }
        write!(f, "removed {} orphaned folder(s): {}", self.removed.len(), self.removed.join(", "))
    }
}

pub struct StudentManager<B, D, A> {
    blobs: B,
    roster: RosterStore,
    detector: D,
    augmenter: A,
    settings: ManagerSettings,
}

/// Operations that do not touch face detection.
impl<B: BlobStore, D, A> StudentManager<B, D, A> {
    pub fn new(blobs: B, roster: RosterStore, detector: D, augmenter: A, settings: ManagerSettings) -> Self {
        Self {
            blobs,
            roster,
            detector,
            augmenter,
            settings,
        }
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn roster_store(&self) -> &RosterStore {
        &self.roster
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Delete a student's record and assets.
    ///
    /// The record is dropped even when some blobs could not be deleted; the
    /// leftovers are reported and will be caught by [`Self::cleanup`].
    pub fn remove(&mut self, enrollment: &str) -> Result<RemoveSummary, ManagerError> {
        let enrollment = enrollment.trim();
        let mut table = self.roster.load()?;
        let Some(record) = table.remove(enrollment) else {
            return Err(ManagerError::StudentNotFound(enrollment.to_string()));
        };

        let folder_key = self
            .settings
            .layout
            .folder_key(&record.class_name, &record.enrollment, &record.name);

        let mut failures = Failures::default();
        let mut deleted = 0;
        match self.blobs.list(&format!("{folder_key}/")) {
            Ok(keys) => {
                for key in keys {
                    match self.blobs.delete(&key) {
                        Ok(()) => deleted += 1,
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "failed to delete student image");
                            failures.push(ItemFailure::new(key, e));
                        }
                    }
                }
            }
            Err(e) => failures.push(ItemFailure::new(&folder_key, e)),
        }

        self.roster.save(&table)?;
        tracing::info!(enrollment, folder = %folder_key, deleted, "student removed");

        if !failures.is_empty() {
            return Err(ManagerError::PartialRemoval {
                enrollment: enrollment.to_string(),
                failures,
            });
        }
        Ok(RemoveSummary {
            enrollment: enrollment.to_string(),
            folder_key,
            images_deleted: deleted,
        })
    }

    /// Delete every asset folder whose enrollment is not on the roster.
    pub fn cleanup(&mut self) -> Result<CleanupReport, ManagerError> {
        let table = self.roster.load()?;
        let enrolled = table.enrollments();
        let layout = &self.settings.layout;

        let mut folders: BTreeMap<StudentFolder, Vec<String>> = BTreeMap::new();
        for key in self.blobs.list(&layout.root_prefix())? {
            if let Some(folder) = layout.parse_student_folder(&key) {
                folders.entry(folder).or_default().push(key);
            }
        }

        let mut removed = Vec::new();
        let mut failures = Failures::default();
        for (folder, keys) in folders {
            if enrolled.contains(folder.enrollment()) {
                continue;
            }
            let folder_key = layout.folder_key_of(&folder);
            for key in &keys {
                if let Err(e) = self.blobs.delete(key) {
                    tracing::warn!(key = %key, error = %e, "failed to delete orphaned image");
                    failures.push(ItemFailure::new(key, e));
                }
            }
            tracing::info!(folder = %folder_key, images = keys.len(), "orphaned folder removed");
            removed.push(folder_key);
        }

        if !failures.is_empty() {
            return Err(ManagerError::PartialCleanup { removed, failures });
        }
        Ok(CleanupReport { removed })
    }

    pub fn list(&self) -> Result<RosterTable, ManagerError> {
        Ok(self.roster.load()?)
    }
}

impl<B: BlobStore, D: FaceDetector, A: Augmenter> StudentManager<B, D, A> {
    /// Register a student from one photo.
    ///
    /// `resolve` is consulted only when the enrollment is already on the
    /// roster or the target folder already holds images.
    pub fn add<F>(&mut self, student: NewStudent<'_>, resolve: F) -> Result<AddSummary, ManagerError>
    where
        F: FnOnce(&Conflict) -> OverwriteDecision,
    {
        student.validate()?;
        let enrollment = student.enrollment.trim();
        let name = student.name.trim();
        let class_name = student.class_name.trim();

        let photo = image::load_from_memory(student.photo).map_err(ManagerError::UnreadableImage)?;
        let crop = extract_face(&mut self.detector, &photo, &self.settings.detection)?
            .ok_or(ManagerError::NoFaceDetected)?;

        let layout = &self.settings.layout;
        let folder_key = layout.folder_key(class_name, enrollment, name);
        let folder_prefix = format!("{folder_key}/");

        let mut table = self.roster.load()?;
        let existing = table.find(enrollment).cloned();
        let existing_keys = self.blobs.list(&folder_prefix)?;

        let replaced = existing.is_some() || !existing_keys.is_empty();
        if replaced {
            let conflict = Conflict {
                enrollment: enrollment.to_string(),
                existing: existing.clone(),
                folder_key: folder_key.clone(),
                existing_images: existing_keys.len(),
            };
            if resolve(&conflict) == OverwriteDecision::Keep {
                tracing::info!(enrollment, "registration declined on conflict");
                return Err(ManagerError::Cancelled);
            }

            tracing::info!(enrollment, folder = %folder_key, "overwriting existing registration");
            delete_all(&mut self.blobs, &existing_keys)?;
            if let Some(old) = &existing {
                let old_folder = layout.folder_key(&old.class_name, &old.enrollment, &old.name);
                if old_folder != folder_key {
                    let old_keys = self.blobs.list(&format!("{old_folder}/"))?;
                    delete_all(&mut self.blobs, &old_keys)?;
                }
                table.remove(enrollment);
            }
        }

        let count = self.settings.augmentation_count;
        let variants = self.augmenter.produce(&crop.image, count);

        let mut failures = Failures::default();
        for (i, variant) in variants.iter().enumerate() {
            let index = i + 1;
            let key = layout.image_key(&folder_key, enrollment, name, index);
            let stored = encode_jpeg(variant)
                .map_err(|e| e.to_string())
                .and_then(|bytes| self.blobs.put(&key, &bytes).map_err(|e| e.to_string()));
            if let Err(reason) = stored {
                tracing::warn!(key = %key, %reason, "failed to store augmented image");
                failures.push(ItemFailure::new(index, reason));
            }
        }

        if !failures.is_empty() {
            return Err(ManagerError::UploadFailed {
                folder_key,
                total: variants.len(),
                failures,
            });
        }

        table.upsert(StudentRecord {
            enrollment: enrollment.to_string(),
            name: name.to_string(),
            class_name: class_name.to_string(),
            image_location: Some(folder_key.clone()),
        });
        self.roster.save(&table)?;

        tracing::info!(enrollment, folder = %folder_key, images = variants.len(), replaced, "student registered");
        Ok(AddSummary {
            enrollment: enrollment.to_string(),
            folder_key,
            images_written: variants.len(),
            replaced,
        })
    }
}

fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ManagerError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ManagerError::MissingField(field));
    }
    Ok(value)
}

fn delete_all<B: BlobStore>(blobs: &mut B, keys: &[String]) -> Result<(), ManagerError> {
    for key in keys {
        blobs.delete(key)?;
    }
    Ok(())
}

/// JPEG has no alpha and no 16-bit mode: grayscale is kept, the rest goes to RGB8.
fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    match image {
        DynamicImage::ImageLuma8(_) => image.write_to(&mut buf, ImageFormat::Jpeg)?,
        _ => DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buf, ImageFormat::Jpeg)?,
    }
    Ok(buf.into_inner())
}
