use std::cmp::Ordering;

/// Axis-aligned box in image pixels, center/size form as produced by YOLO heads.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }

    /// `(x_min, y_min, x_max, y_max)`.
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        let half_w = self.w / 2.0;
        let half_h = self.h / 2.0;
        (
            self.cx - half_w,
            self.cy - half_h,
            self.cx + half_w,
            self.cy + half_h,
        )
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let (ax0, ay0, ax1, ay1) = self.corners();
        let (bx0, by0, bx1, by1) = other.corners();
        let iw = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
        let ih = (ay1.min(by1) - ay0.max(by0)).max(0.0);
        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One detected instance for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionResult {
    pub class_id: u32,
    /// Model confidence in `0.0..=1.0`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl DetectionResult {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// Greedy per-class non-maximum suppression. Keeps the highest-confidence box of each
/// overlapping cluster; output is sorted by descending confidence.
pub fn non_max_suppression(detections: &mut Vec<DetectionResult>, iou_threshold: f32) {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept = 0;
    for index in 0..detections.len() {
        let candidate = detections[index];
        let suppressed = detections[..kept].iter().any(|prev| {
            prev.class_id == candidate.class_id && prev.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}
