//! rollcall-core: face extraction and training-set augmentation.
//!
//! Faces are located with SCRFD running on ONNX Runtime over the intensity
//! channel, cropped from the original photo, then expanded into a batch of
//! randomized variants for recognition-model training.

pub mod augment;
pub mod detector;
pub mod extract;
pub mod types;

use std::path::PathBuf;

pub use augment::{AugmentParams, Augmenter, RandomAugmenter, DEFAULT_AUGMENTATION_COUNT};
pub use detector::{DetectorError, FaceDetector, ScrfdDetector};
pub use extract::{extract_face, FaceCrop};
pub use types::{DetectionParams, FaceRegion};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`, falling back to
/// `~/.local/share/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}
