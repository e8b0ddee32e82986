use anyhow::{Context, Result};
use std::sync::Arc;

use crate::annotate::AnnotatedFrame;
use crate::bus::Bus;
use crate::convert::BoxReport;
use crate::frame::PixelEncoding;
use crate::ingest::{encode_image, ImageHeader};

/// Emits the per-frame outputs. Both publishes are best effort and independent.
pub struct ResultPublisher {
    bus: Arc<dyn Bus>,
    annotated_topic: String,
    report_topic: String,
}

impl ResultPublisher {
    pub fn new(
        bus: Arc<dyn Bus>,
        annotated_topic: impl Into<String>,
        report_topic: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            annotated_topic: annotated_topic.into(),
            report_topic: report_topic.into(),
        }
    }

    /// Publish the annotated image as a packed `rgb8` image message.
    pub fn publish_annotated(&self, frame: &AnnotatedFrame) -> Result<()> {
        let header = ImageHeader {
            seq: frame.source_seq,
            stamp_ms: frame.stamp_ms,
            frame_id: frame.frame_id.clone(),
            width: frame.image.width(),
            height: frame.image.height(),
            encoding: PixelEncoding::Rgb8,
            step: None,
        };
        let payload = encode_image(&header, frame.image.as_raw())?;
        self.bus
            .publish(&self.annotated_topic, payload)
            .with_context(|| format!("publish annotated frame to {}", self.annotated_topic))
    }

    pub fn publish_report(&self, report: &BoxReport) -> Result<()> {
        let payload = serde_json::to_vec(report).context("serialize box report")?;
        self.bus
            .publish(&self.report_topic, payload)
            .with_context(|| format!("publish box report to {}", self.report_topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::convert::ReportBox;
    use crate::ingest::decode_image;
    use image::{Rgb, RgbImage};

    #[test]
    fn annotated_frame_is_rgb8_image_message() {
        let bus = LocalBus::new();
        let publisher = ResultPublisher::new(Arc::new(bus.clone()), "out/image", "out/boxes");
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(1, 0, Rgb([1, 2, 3]));
        publisher
            .publish_annotated(&AnnotatedFrame {
                image,
                source_seq: 9,
                frame_id: "left".to_string(),
                stamp_ms: 100,
                boxes_drawn: 0,
            })
            .unwrap();

        let published = bus.published_on("out/image");
        assert_eq!(published.len(), 1);
        let (header, pixels) = decode_image(&published[0]).unwrap();
        assert_eq!(header.encoding, PixelEncoding::Rgb8);
        assert_eq!((header.width, header.height, header.seq), (2, 1, 9));
        assert_eq!(pixels, &[0, 0, 0, 1, 2, 3]);
        assert!(bus.published_on("out/boxes").is_empty());
    }

    #[test]
    fn report_is_json() {
        let bus = LocalBus::new();
        let publisher = ResultPublisher::new(Arc::new(bus.clone()), "out/image", "out/boxes");
        let report = BoxReport {
            frame_seq: 1,
            source_seq: 1,
            frame_id: "left".to_string(),
            stamp_ms: 0,
            width: 10,
            height: 10,
            boxes: vec![ReportBox {
                class_id: 2,
                class_name: None,
                confidence: 0.7,
                x_min: 1.0,
                y_min: 1.0,
                x_max: 3.0,
                y_max: 3.0,
                ingested: false,
            }],
        };
        publisher.publish_report(&report).unwrap();

        let published = bus.published_on("out/boxes");
        let decoded: BoxReport = serde_json::from_slice(&published[0]).unwrap();
        assert_eq!(decoded, report);
    }
}
