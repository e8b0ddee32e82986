#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;
use crate::detect::result::{non_max_suppression, BoundingBox, DetectionResult};

/// Letterbox fill value (YOLO convention).
const PAD_VALUE: f32 = 114.0 / 255.0;
/// Leading box coordinates in each YOLOv8 prediction column (cx, cy, w, h).
const CXCYWH: usize = 4;

/// Tract-based YOLOv8 detector.
///
/// Loads a local ONNX export once; each frame is letterboxed into the model input
/// (top-left aligned), and the `[1, 4 + classes, anchors]` output is decoded into
/// pixel-space boxes of the original frame, followed by per-class NMS.
/// All post-processing runs on plain host `f32` values.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_width: u32,
    input_height: u32,
    iou_threshold: f32,
}

impl TractBackend {
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width,
            input_height,
            iou_threshold: 0.45,
        })
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    /// Letterbox `image` into an NCHW tensor; returns the tensor and the resize ratio.
    fn build_input(&self, image: &RgbImage) -> Result<(Tensor, f32)> {
        let (w0, h0) = image.dimensions();
        if w0 == 0 || h0 == 0 {
            return Err(anyhow!("cannot run inference on an empty {}x{} frame", w0, h0));
        }
        let ratio = (self.input_width as f32 / w0 as f32).min(self.input_height as f32 / h0 as f32);
        let new_w = ((w0 as f32 * ratio).round() as u32).clamp(1, self.input_width);
        let new_h = ((h0 as f32 * ratio).round() as u32).clamp(1, self.input_height);
        let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.input_height as usize, self.input_width as usize),
            |(_, channel, y, x)| {
                if (x as u32) < new_w && (y as u32) < new_h {
                    resized.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0
                } else {
                    PAD_VALUE
                }
            },
        );
        Ok((input.into_tensor(), ratio))
    }

    fn decode_output(
        &self,
        outputs: TVec<TValue>,
        ratio: f32,
        min_confidence: f32,
    ) -> Result<Vec<DetectionResult>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] <= CXCYWH {
            return Err(anyhow!(
                "unexpected YOLOv8 output shape {:?}, expected [1, 4 + classes, anchors]",
                shape
            ));
        }
        let num_classes = shape[1] - CXCYWH;
        let anchors = shape[2];

        let mut detections = Vec::new();
        for a in 0..anchors {
            let (class_id, confidence) = (0..num_classes)
                .map(|c| (c, preds[[0, CXCYWH + c, a]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !confidence.is_finite() || confidence < min_confidence {
                continue;
            }
            let bbox = BoundingBox::new(
                preds[[0, 0, a]] / ratio,
                preds[[0, 1, a]] / ratio,
                preds[[0, 2, a]] / ratio,
                preds[[0, 3, a]] / ratio,
            );
            detections.push(DetectionResult::new(class_id as u32, confidence, bbox));
        }

        non_max_suppression(&mut detections, self.iou_threshold);
        Ok(detections)
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage, min_confidence: f32) -> Result<Vec<DetectionResult>> {
        let (input, ratio) = self.build_input(image)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_output(outputs, ratio, min_confidence)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_width, self.input_height);
        self.detect(&blank, 1.0).map(|_| ())
    }
}
