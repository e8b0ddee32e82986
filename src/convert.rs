//! Box conversion.
//!
//! Pure mappings from a `DetectionResult` into:
//! - `TrackedObjectCandidate`: the schema the stereo tracking sink ingests
//! - `ReportBox`: one entry of the outward `BoxReport`

use serde::{Deserialize, Serialize};

use crate::detect::DetectionResult;

/// One 2D box handed to the 3D tracking sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedObjectCandidate {
    /// Unique per detection (never reused within or across frames of one process).
    pub unique_id: String,
    pub label: i32,
    /// Confidence in the sink's scale (`0..=probability_scale`).
    pub probability: f32,
    /// Corners A (top-left), B (top-right), C (bottom-right), D (bottom-left), in pixels.
    pub bounding_box_2d: [[u32; 2]; 4],
    /// Object moves on the ground plane.
    pub is_grounded: bool,
}

/// One detection in the outward box report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportBox {
    pub class_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub confidence: f32,
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    /// Passed the ingestion threshold and was submitted to the tracking sink.
    pub ingested: bool,
}

/// Box report for one processed frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxReport {
    /// Arrival sequence assigned by the frame store.
    pub frame_seq: u64,
    pub source_seq: u64,
    pub frame_id: String,
    pub stamp_ms: u64,
    pub width: u32,
    pub height: u32,
    pub boxes: Vec<ReportBox>,
}

/// Conversion settings shared by every frame.
#[derive(Clone, Debug)]
pub struct BoxConverter {
    session: String,
    probability_scale: f32,
    is_grounded: bool,
    class_names: Vec<String>,
}

impl BoxConverter {
    /// Converter with a random session tag, so ids stay unique across restarts.
    pub fn new(probability_scale: f32, is_grounded: bool, class_names: Vec<String>) -> Self {
        Self::with_session(
            format!("{:08x}", rand::random::<u32>()),
            probability_scale,
            is_grounded,
            class_names,
        )
    }

    pub fn with_session(
        session: impl Into<String>,
        probability_scale: f32,
        is_grounded: bool,
        class_names: Vec<String>,
    ) -> Self {
        Self {
            session: session.into(),
            probability_scale,
            is_grounded,
            class_names,
        }
    }

    pub fn class_name(&self, class_id: u32) -> Option<&str> {
        self.class_names.get(class_id as usize).map(String::as_str)
    }

    /// Map detection `index` of frame `frame_seq` into the sink schema.
    pub fn to_candidate(
        &self,
        det: &DetectionResult,
        frame_seq: u64,
        index: usize,
        width: u32,
        height: u32,
    ) -> TrackedObjectCandidate {
        let (x0, y0, x1, y1) = det.bbox.corners();
        let left = clamp_px(x0, width);
        let top = clamp_px(y0, height);
        let right = clamp_px(x1, width);
        let bottom = clamp_px(y1, height);

        TrackedObjectCandidate {
            unique_id: format!("{}-{}-{}", self.session, frame_seq, index),
            label: det.class_id as i32,
            probability: (det.confidence * self.probability_scale)
                .clamp(0.0, self.probability_scale),
            bounding_box_2d: [[left, top], [right, top], [right, bottom], [left, bottom]],
            is_grounded: self.is_grounded,
        }
    }

    pub fn to_report_box(&self, det: &DetectionResult, ingested: bool) -> ReportBox {
        let (x_min, y_min, x_max, y_max) = det.bbox.corners();
        ReportBox {
            class_id: det.class_id,
            class_name: self.class_name(det.class_id).map(str::to_string),
            confidence: det.confidence,
            x_min,
            y_min,
            x_max,
            y_max,
            ingested,
        }
    }
}

/// Clamp a pixel coordinate into `0..=limit - 1`.
fn clamp_px(value: f32, limit: u32) -> u32 {
    let max = limit.saturating_sub(1) as f32;
    value.round().clamp(0.0, max) as u32
}
