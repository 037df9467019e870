use crate::common::Result;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// A named 2-D landmark position in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }
}

/// Face bounding box. The origin may sit outside the frame when the detector
/// extrapolates near an edge; consumers must clamp before sampling pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersects the box with the frame, returning `(x, y, w, h)` of the
    /// in-bounds region, or `None` when the box lies entirely outside or the
    /// intersection is empty.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x.max(0) as i64;
        let y1 = self.y.max(0) as i64;
        let x2 = (self.x as i64 + self.width as i64).min(frame_width as i64);
        let y2 = (self.y as i64 + self.height as i64).min(frame_height as i64);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some((x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32))
    }
}

/// Facial landmarks reported by the detector. Eyes are always present; the
/// remaining keypoints depend on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nose: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouth_left: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouth_right: Option<Point>,
}

impl Landmarks {
    pub fn from_eyes(left_eye: Point, right_eye: Point) -> Self {
        Self {
            left_eye,
            right_eye,
            nose: None,
            mouth_left: None,
            mouth_right: None,
        }
    }
}

/// One candidate face found in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub landmarks: Landmarks,
}

/// External face detector seam. Implementations own their model runtime;
/// the capture and preprocessing code only sees detections.
pub trait FaceDetector {
    /// Returns every candidate face in the frame. An empty vec means no face
    /// was found and is not an error.
    fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<Detection>>;
}

/// Stand-in detector for exercising the capture pipeline without a model
/// backend: reports one full-confidence box covering the center half of the
/// frame, with eye positions placed where a frontal face would have them.
pub struct FixedRegionDetector;

impl FaceDetector for FixedRegionDetector {
    fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<Detection>> {
        let w = frame.width() / 2;
        let h = frame.height() / 2;
        let x = (frame.width() / 4) as i32;
        let y = (frame.height() / 4) as i32;

        let eye_y = y as f32 + h as f32 * 0.4;
        let landmarks = Landmarks::from_eyes(
            Point::new(x as f32 + w as f32 * 0.3, eye_y),
            Point::new(x as f32 + w as f32 * 0.7, eye_y),
        );

        Ok(vec![Detection {
            bbox: BoundingBox::new(x, y, w, h),
            confidence: 1.0,
            landmarks,
        }])
    }
}

/// Selection policy when a frame contains more than one detection: always the
/// highest-confidence candidate, ties broken by first occurrence.
pub fn select_best(detections: &[Detection]) -> Option<&Detection> {
    detections.iter().reduce(|best, candidate| {
        if candidate.confidence > best.confidence {
            candidate
        } else {
            best
        }
    })
}
