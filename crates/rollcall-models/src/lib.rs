//! Pinned ONNX models and their integrity checks.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One downloadable model and its pinned digest.
pub struct ModelFile {
    pub name: &'static str,
    pub url: &'static str,
    pub sha256: &'static str,
    pub size_display: &'static str,
}

// Checksum taken from the HuggingFace Git LFS pointer (oid sha256: field).
pub const MODELS: &[ModelFile] = &[ModelFile {
    name: "det_10g.onnx",
    url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx",
    sha256: "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
    size_display: "16 MB",
}];

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {name} ({path})")]
    MissingModel { name: &'static str, path: PathBuf },

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("failed to open model file: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "model checksum mismatch for {name} ({path})\n  expected: {expected}\n  got:      {got}"
    )]
    ChecksumMismatch {
        name: &'static str,
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Look up a manifest entry by file name.
pub fn find_model(name: &str) -> Result<&'static ModelFile, ModelIntegrityError> {
    MODELS
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| ModelIntegrityError::UnknownModel(name.to_string()))
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| ModelIntegrityError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// State of one manifest model inside a model directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Ready,
    Missing,
    /// Present but unreadable or with the wrong digest.
    Corrupt,
}

/// Check `model` against its pinned digest at `path`.
pub fn verify_file(model: &ModelFile, path: &Path) -> Result<(), ModelIntegrityError> {
    if !path.exists() {
        return Err(ModelIntegrityError::MissingModel {
            name: model.name,
            path: path.to_path_buf(),
        });
    }

    let got = sha256_file_hex(path)?;
    if got != model.sha256 {
        return Err(ModelIntegrityError::ChecksumMismatch {
            name: model.name,
            path: path.to_path_buf(),
            expected: model.sha256.to_string(),
            got,
        });
    }
    Ok(())
}

pub fn model_status(model_dir: &Path, model: &ModelFile) -> ModelStatus {
    match verify_file(model, &model_dir.join(model.name)) {
        Ok(()) => ModelStatus::Ready,
        Err(ModelIntegrityError::MissingModel { .. }) => ModelStatus::Missing,
        Err(_) => ModelStatus::Corrupt,
    }
}

/// Verify one manifest model inside `model_dir` and return its path.
pub fn verify_model(model_dir: &Path, name: &str) -> Result<PathBuf, ModelIntegrityError> {
    let model = find_model(name)?;
    let path = model_dir.join(model.name);
    verify_file(model, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "rollcall-models-test-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    fn fake_model(sha256: &'static str) -> ModelFile {
        ModelFile {
            name: "model.onnx",
            url: "",
            sha256,
            size_display: "5 B",
        }
    }

    // sha256("hello")
    const HELLO_SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_sha256_of_known_content() {
        let dir = scratch_dir("digest");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.onnx");
        fs::write(&path, b"hello").unwrap();

        assert_eq!(sha256_file_hex(&path).unwrap(), HELLO_SHA);
        verify_file(&fake_model(HELLO_SHA), &path).unwrap();
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_model_status() {
        let dir = scratch_dir("status");
        let good = fake_model(HELLO_SHA);
        assert_eq!(model_status(&dir, &good), ModelStatus::Missing);

        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("model.onnx"), b"hello").unwrap();
        assert_eq!(model_status(&dir, &good), ModelStatus::Ready);
        assert_eq!(model_status(&dir, &fake_model("00")), ModelStatus::Corrupt);

        let err = verify_file(&fake_model("00"), &dir.join("model.onnx")).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::ChecksumMismatch { .. }));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_verify_model_by_name() {
        let dir = scratch_dir("by-name");
        let err = verify_model(&dir, "det_10g.onnx").unwrap_err();
        assert!(matches!(err, ModelIntegrityError::MissingModel { .. }));
        assert!(matches!(
            verify_model(&dir, "w600k_r50.onnx"),
            Err(ModelIntegrityError::UnknownModel(_))
        ));
        assert_eq!(find_model("det_10g.onnx").unwrap().size_display, "16 MB");
    }
}
