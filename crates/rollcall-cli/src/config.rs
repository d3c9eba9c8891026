use rollcall_core::{DetectionParams, DEFAULT_AUGMENTATION_COUNT, DETECTOR_MODEL_FILE};
use rollcall_manager::{AssetLayout, ManagerSettings, DEFAULT_ASSET_PREFIX};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for all rollcall state.
    pub data_dir: PathBuf,
    /// Roster CSV file.
    pub roster_path: PathBuf,
    /// Directory backing the local blob store.
    pub blob_root: PathBuf,
    /// Key prefix of student asset folders inside the blob store.
    pub asset_prefix: String,
    /// Where attendance workbooks are written.
    pub attendance_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Augmented images written per student.
    pub augmentation_count: usize,
    pub scale_factor: f32,
    pub min_neighbors: usize,
    pub min_level_size: u32,
    /// Fixed augmentation seed; random when unset.
    pub augment_seed: Option<u64>,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("ROLLCALL_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("rollcall")
        });

        let path_or = |key: &str, default: PathBuf| var(key).map(PathBuf::from).unwrap_or(default);
        let defaults = DetectionParams::default();

        Self {
            roster_path: path_or("ROLLCALL_ROSTER_PATH", data_dir.join("students.csv")),
            blob_root: path_or("ROLLCALL_BLOB_ROOT", data_dir.clone()),
            asset_prefix: var("ROLLCALL_ASSET_PREFIX").unwrap_or_else(|| DEFAULT_ASSET_PREFIX.to_string()),
            attendance_dir: path_or("ROLLCALL_ATTENDANCE_DIR", data_dir.join("attendance_files")),
            model_dir: path_or("ROLLCALL_MODEL_DIR", rollcall_core::default_model_dir()),
            augmentation_count: parse_or(&var, "ROLLCALL_AUGMENTATION_COUNT", DEFAULT_AUGMENTATION_COUNT),
            scale_factor: parse_or(&var, "ROLLCALL_SCALE_FACTOR", defaults.scale_factor),
            min_neighbors: parse_or(&var, "ROLLCALL_MIN_NEIGHBORS", defaults.min_neighbors),
            min_level_size: parse_or(&var, "ROLLCALL_MIN_LEVEL_SIZE", defaults.min_level_size),
            augment_seed: var("ROLLCALL_AUGMENT_SEED").and_then(|v| v.parse().ok()),
            data_dir,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }

    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_level_size: self.min_level_size,
        }
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            layout: AssetLayout::new(self.asset_prefix.as_str()),
            augmentation_count: self.augmentation_count,
            detection: self.detection_params(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
