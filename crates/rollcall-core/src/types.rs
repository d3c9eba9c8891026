use serde::{Deserialize, Serialize};

/// A detected face, in source-image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Mean detector score of the raw hits merged into this region.
    pub score: f32,
    /// Number of raw detector hits merged into this region.
    pub neighbors: usize,
}

impl FaceRegion {
    /// Integer crop rectangle `(x, y, width, height)` clipped to an image of
    /// the given size, or `None` if nothing of the region lies inside it.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.round().clamp(0.0, width as f32) as u32;
        let y0 = self.y.round().clamp(0.0, height as f32) as u32;
        let x1 = (self.x + self.width).round().clamp(0.0, width as f32) as u32;
        let y1 = (self.y + self.height).round().clamp(0.0, height as f32) as u32;

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Detection policy handed to a [`FaceDetector`](crate::FaceDetector).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Growth of the search window relative to the image per pyramid step.
    pub scale_factor: f32,
    /// Raw overlapping hits required before a region is accepted.
    pub min_neighbors: usize,
    /// Smallest short side (pixels) of a pyramid level worth running.
    pub min_level_size: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_level_size: 320,
        }
    }
}
