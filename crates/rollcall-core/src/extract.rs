//! Face extraction: detect on the intensity channel, crop from the original.

use crate::detector::{DetectorError, FaceDetector};
use crate::types::{DetectionParams, FaceRegion};
use image::DynamicImage;

/// A face cut out of a source photo.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub region: FaceRegion,
    /// Cropped pixels, same channel layout as the source image.
    pub image: DynamicImage,
}

/// Locate a face in `image` and crop it.
///
/// The first region reported by the detector wins; there is no ranking by
/// size, score or position, so photos with several people crop whichever face
/// the detector found first. `Ok(None)` means no face was found.
pub fn extract_face<D: FaceDetector + ?Sized>(
    detector: &mut D,
    image: &DynamicImage,
    params: &DetectionParams,
) -> Result<Option<FaceCrop>, DetectorError> {
    let gray = image.to_luma8();
    let regions = detector.detect(&gray, params)?;

    if regions.len() > 1 {
        tracing::info!(count = regions.len(), "multiple faces detected; using the first");
    }

    let Some(region) = regions.into_iter().next() else {
        tracing::debug!(width = image.width(), height = image.height(), "no face detected");
        return Ok(None);
    };

    let Some((x, y, width, height)) = region.clamp_to(image.width(), image.height()) else {
        tracing::warn!(?region, "detected region lies outside the image");
        return Ok(None);
    };

    tracing::debug!(x, y, width, height, score = region.score, neighbors = region.neighbors, "face cropped");

    Ok(Some(FaceCrop {
        image: image.crop_imm(x, y, width, height),
        region,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Rgb, RgbImage, Rgba, RgbaImage};

    /// Returns fixed regions and remembers the frame it was given.
    struct FixedDetector {
        regions: Vec<FaceRegion>,
        seen: Option<(u32, u32)>,
    }

    impl FaceDetector for FixedDetector {
        fn detect(
            &mut self,
            gray: &GrayImage,
            _params: &DetectionParams,
        ) -> Result<Vec<FaceRegion>, DetectorError> {
            self.seen = Some(gray.dimensions());
            Ok(self.regions.clone())
        }
    }

    fn region(x: f32, y: f32, w: f32, h: f32, score: f32) -> FaceRegion {
        FaceRegion { x, y, width: w, height: h, score, neighbors: 5 }
    }

    fn detector(regions: Vec<FaceRegion>) -> FixedDetector {
        FixedDetector { regions, seen: None }
    }

    #[test]
    fn test_crop_matches_region() {
        let mut img = RgbImage::from_pixel(100, 80, Rgb([0, 0, 0]));
        img.put_pixel(20, 10, Rgb([255, 0, 0]));
        let img = DynamicImage::ImageRgb8(img);

        let mut det = detector(vec![region(20.0, 10.0, 30.0, 40.0, 0.9)]);
        let crop = extract_face(&mut det, &img, &DetectionParams::default())
            .unwrap()
            .expect("face");

        assert_eq!((crop.image.width(), crop.image.height()), (30, 40));
        assert_eq!(crop.image.to_rgb8().get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(det.seen, Some((100, 80)));
    }

    #[test]
    fn test_first_region_wins() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(200, 200));
        // The second face is larger and more confident but is not used
        let mut det = detector(vec![
            region(10.0, 10.0, 20.0, 20.0, 0.6),
            region(50.0, 50.0, 120.0, 120.0, 0.99),
        ]);
        let crop = extract_face(&mut det, &img, &DetectionParams::default())
            .unwrap()
            .expect("face");
        assert_eq!(crop.region.x, 10.0);
        assert_eq!((crop.image.width(), crop.image.height()), (20, 20));
    }

    #[test]
    fn test_no_face_is_none() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
        let mut det = detector(Vec::new());
        assert!(extract_face(&mut det, &img, &DetectionParams::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_region_outside_image_is_none() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
        let mut det = detector(vec![region(100.0, 100.0, 10.0, 10.0, 0.9)]);
        assert!(extract_face(&mut det, &img, &DetectionParams::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_crop_keeps_channel_layout() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(50, 50, Rgba([1, 2, 3, 4])));
        let mut det = detector(vec![region(5.0, 5.0, 10.0, 10.0, 0.9)]);
        let crop = extract_face(&mut det, &img, &DetectionParams::default())
            .unwrap()
            .expect("face");
        assert!(matches!(crop.image, DynamicImage::ImageRgba8(_)));
    }
}
