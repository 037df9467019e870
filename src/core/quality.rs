use crate::common::QualityConfig;
use crate::core::detection::Detection;
use image::DynamicImage;
use std::fmt;

/// Why a candidate frame was turned away.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    NoFace,
    LowConfidence(f32),
    FaceTooSmall,
    TooDark,
    TooBright,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NoFace => write!(f, "no face"),
            RejectReason::LowConfidence(c) => write!(f, "low confidence: {:.2}", c),
            RejectReason::FaceTooSmall => write!(f, "face too small"),
            RejectReason::TooDark => write!(f, "too dark"),
            RejectReason::TooBright => write!(f, "too bright"),
        }
    }
}

/// Accept/reject decision for one candidate frame. Transient; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }

    pub fn reason(&self) -> String {
        match self {
            Verdict::Accept => "ok".to_string(),
            Verdict::Reject(r) => r.to_string(),
        }
    }
}

/// Deterministic multi-criterion frame acceptance policy. Checks run in a
/// fixed order and the first failure wins, so a frame failing several
/// criteria always reports the same reason.
#[derive(Debug, Clone)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Pure function of the detection and the frame pixels; no I/O.
    pub fn evaluate(&self, detection: Option<&Detection>, frame: &DynamicImage) -> Verdict {
        let Some(face) = detection else {
            return Verdict::Reject(RejectReason::NoFace);
        };

        if face.confidence < self.config.min_confidence {
            return Verdict::Reject(RejectReason::LowConfidence(face.confidence));
        }

        if face.bbox.width < self.config.min_face_size
            || face.bbox.height < self.config.min_face_size
        {
            return Verdict::Reject(RejectReason::FaceTooSmall);
        }

        // The box may overhang the frame; sample only the clamped region. An
        // empty intersection means the face is effectively not in view.
        let Some(region) = face.bbox.clamp_to(frame.width(), frame.height()) else {
            return Verdict::Reject(RejectReason::FaceTooSmall);
        };
        let brightness = mean_brightness(frame, region);

        if brightness < self.config.min_brightness {
            return Verdict::Reject(RejectReason::TooDark);
        }
        if brightness > self.config.max_brightness {
            return Verdict::Reject(RejectReason::TooBright);
        }

        Verdict::Accept
    }
}

fn mean_brightness(frame: &DynamicImage, (x, y, w, h): (u32, u32, u32, u32)) -> f32 {
    let gray = frame.to_luma8();
    let mut sum = 0u64;

    for row in y..y + h {
        for col in x..x + w {
            sum += gray.get_pixel(col, row)[0] as u64;
        }
    }

    sum as f32 / (w as u64 * h as u64) as f32
}
