//! SCRFD face detector via ONNX Runtime.
//!
//! The model is run over an image pyramid. Raw anchor hits from every level are
//! mapped back to source coordinates and merged by neighbor grouping; a region
//! is only reported once enough raw hits agree on it.

use crate::types::{DetectionParams, FaceRegion};
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
/// Edge tolerance, as a fraction of mean box size, for two hits to be neighbors.
const GROUP_EPS: f32 = 0.2;
/// Hard stop on pyramid depth.
const MAX_PYRAMID_LEVELS: usize = 64;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (run `rollcall setup` to download it)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("invalid detection parameters: {0}")]
    InvalidParams(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Frontal face detector.
///
/// Implementations return every accepted region in the order the detector
/// produced it. Callers decide which one to use.
pub trait FaceDetector {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, DetectorError>;
}

impl<D: FaceDetector + ?Sized> FaceDetector for Box<D> {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        (**self).detect(gray, params)
    }
}

/// A single above-threshold anchor, before grouping.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Hit {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    score: f32,
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
}

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let outputs = output_layout(&output_names);
        tracing::debug!(?outputs, "SCRFD output tensor mapping");

        Ok(Self { session, outputs })
    }

    /// Run one pyramid level and return its raw hits in source coordinates.
    fn detect_level(&mut self, gray: &GrayImage, scale: f32) -> Result<Vec<Hit>, DetectorError> {
        let (input, letterbox) = letterbox(gray, scale);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut hits = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let layout = self.outputs[pos];

            let (_, scores) = outputs[layout.score]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[layout.bbox]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            hits.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                SCRFD_CONFIDENCE_THRESHOLD,
            ));
        }

        Ok(hits)
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(
        &mut self,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        if params.scale_factor <= 1.0 || !params.scale_factor.is_finite() {
            return Err(DetectorError::InvalidParams(format!(
                "scale factor must be greater than 1.0, got {}",
                params.scale_factor
            )));
        }

        let (width, height) = gray.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        for (level, scale) in pyramid_scales(width, height, params).into_iter().enumerate() {
            let level_hits = self.detect_level(gray, scale)?;
            tracing::debug!(level, scale, hits = level_hits.len(), "SCRFD pyramid level");
            hits.extend(level_hits);
        }

        let regions = group_hits(&hits, params.min_neighbors);
        tracing::debug!(
            hits = hits.len(),
            regions = regions.len(),
            min_neighbors = params.min_neighbors,
            "SCRFD detection complete"
        );
        Ok(regions)
    }
}

/// Letterbox scale for each pyramid level, finest first.
///
/// Level 0 fits the whole image into the model input. Each following level
/// shrinks it by `scale_factor`, so a fixed anchor covers a window 10% (for
/// the default factor) larger relative to the image. Levels whose short side
/// would drop below `min_level_size` are skipped; level 0 always runs.
fn pyramid_scales(width: u32, height: u32, params: &DetectionParams) -> Vec<f32> {
    let input = SCRFD_INPUT_SIZE as f32;
    let base = (input / width as f32).min(input / height as f32);
    let short_side = width.min(height) as f32;

    let mut scales = vec![base];
    let mut scale = base / params.scale_factor;
    while short_side * scale >= params.min_level_size as f32 && scales.len() < MAX_PYRAMID_LEVELS {
        scales.push(scale);
        scale /= params.scale_factor;
    }
    scales
}

/// Resize `gray` by `scale`, centre it on a mid-grey canvas and normalize it
/// into a NCHW float tensor.
fn letterbox(gray: &GrayImage, scale: f32) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = gray.dimensions();
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
    let pad_x = (SCRFD_INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (SCRFD_INPUT_SIZE - new_h) as f32 / 2.0;

    let resized = imageops::resize(gray, new_w as u32, new_h as u32, FilterType::Triangle);

    // Padding with SCRFD_MEAN normalizes to 0.0
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    let x_start = pad_x.floor() as usize;
    let y_start = pad_y.floor() as usize;

    for (x, y, pixel) in resized.enumerate_pixels() {
        let normalized = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        let (tx, ty) = (x_start + x as usize, y_start + y as usize);
        // Grayscale → 3-channel: replicate Y
        tensor[[0, 0, ty, tx]] = normalized;
        tensor[[0, 1, ty, tx]] = normalized;
        tensor[[0, 2, ty, tx]] = normalized;
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Map output tensors to stride slots.
///
/// Exports either name tensors "score_8", "bbox_16", ... or use generic
/// numeric names, in which case the standard positional order applies:
/// `[0-2]` scores, `[3-5]` bboxes (strides 8, 16, 32).
fn output_layout(names: &[String]) -> [StrideOutputs; 3] {
    let position = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                score: position("score", stride)?,
                bbox: position("bbox", stride)?,
            })
        })
        .collect();

    match named {
        Some(layout) => {
            tracing::info!("SCRFD: using name-based output tensor mapping");
            [layout[0], layout[1], layout[2]]
        }
        None => {
            tracing::info!(?names, "SCRFD: output names not recognized, using positional mapping");
            [
                StrideOutputs { score: 0, bbox: 3 },
                StrideOutputs { score: 1, bbox: 4 },
                StrideOutputs { score: 2, bbox: 5 },
            ]
        }
    }
}

/// Decode the above-threshold anchors of one stride, in raster order.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Hit> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut hits = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let bbox_off = idx * 4;
        let Some(offsets) = bboxes.get(bbox_off..bbox_off + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid_w) as f32 * step;
        let anchor_y = (cell / grid_w) as f32 * step;

        let x1 = (anchor_x - offsets[0] * step - letterbox.pad_x) / letterbox.scale;
        let y1 = (anchor_y - offsets[1] * step - letterbox.pad_y) / letterbox.scale;
        let x2 = (anchor_x + offsets[2] * step - letterbox.pad_x) / letterbox.scale;
        let y2 = (anchor_y + offsets[3] * step - letterbox.pad_y) / letterbox.scale;

        hits.push(Hit {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            score,
        });
    }

    hits
}

/// Two hits are neighbors when every edge agrees within `GROUP_EPS` of their
/// mean size.
fn is_neighbor(a: &Hit, b: &Hit) -> bool {
    let delta = GROUP_EPS * (a.width.min(b.width) + a.height.min(b.height)) * 0.5;
    (a.x - b.x).abs() <= delta
        && (a.y - b.y).abs() <= delta
        && (a.x + a.width - b.x - b.width).abs() <= delta
        && (a.y + a.height - b.y - b.height).abs() <= delta
}

/// Merge neighboring hits into regions.
///
/// Each group is averaged into one region and kept only if it has at least
/// `min_neighbors` members. Regions come out in the order their first hit
/// was produced, not ranked by score or size.
fn group_hits(hits: &[Hit], min_neighbors: usize) -> Vec<FaceRegion> {
    // Union-find where the root is always the earliest member.
    let mut parent: Vec<usize> = (0..hits.len()).collect();
    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..hits.len() {
        for j in (i + 1)..hits.len() {
            if is_neighbor(&hits[i], &hits[j]) {
                let a = root(&mut parent, i);
                let b = root(&mut parent, j);
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    // root index → (sum x, sum y, sum w, sum h, sum score, count)
    let mut groups: BTreeMap<usize, [f32; 6]> = BTreeMap::new();
    for (i, hit) in hits.iter().enumerate() {
        let acc = groups.entry(root(&mut parent, i)).or_insert([0.0; 6]);
        acc[0] += hit.x;
        acc[1] += hit.y;
        acc[2] += hit.width;
        acc[3] += hit.height;
        acc[4] += hit.score;
        acc[5] += 1.0;
    }

    let required = min_neighbors.max(1);
    groups
        .into_values()
        .filter(|acc| acc[5] as usize >= required)
        .map(|acc| {
            let n = acc[5];
            FaceRegion {
                x: acc[0] / n,
                y: acc[1] / n,
                width: acc[2] / n,
                height: acc[3] / n,
                score: acc[4] / n,
                neighbors: n as usize,
            }
        })
        .collect()
}
