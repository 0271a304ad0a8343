#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::{BoundingBox, Detection};
use crate::error::SwitcherError;
use crate::frame::Frame;

/// Rows scoring below this are dropped before they reach the scorer.
const MIN_REPORTED_CONFIDENCE: f32 = 0.05;

/// Tract-based backend for YOLO-style ONNX models.
///
/// Expects a single `[1, 3, H, W]` float input and outputs whose last axis is
/// `[cx, cy, w, h, objectness, class scores...]` (YOLOv3 layout). The reported
/// confidence of a row is its best class score; the class name comes from the
/// labels file (one label per line, e.g. `coco.names`).
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    labels: Vec<String>,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model and its class labels from disk.
    pub fn new<P: AsRef<Path>, L: AsRef<Path>>(
        model_path: P,
        labels_path: L,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let labels = load_labels(labels_path.as_ref())?;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            labels,
            width,
            height,
        })
    }

    /// Nearest-neighbour resize into a normalized CHW tensor.
    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if !frame.is_well_formed() {
            return Err(SwitcherError::detector(format!(
                "malformed frame #{}: {} bytes for {}x{}",
                frame.sequence,
                frame.byte_len(),
                frame.width,
                frame.height
            ))
            .into());
        }

        let pixels = frame.pixels();
        let (src_w, src_h) = (frame.width as usize, frame.height as usize);
        let (dst_w, dst_h) = (self.width as usize, self.height as usize);
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, dst_h, dst_w), |(_, c, y, x)| {
            let sx = x * src_w / dst_w;
            let sy = y * src_h / dst_h;
            pixels[(sy * src_w + sx) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Vec<Detection>> {
        let mut detections = Vec::new();
        for output in outputs.iter() {
            let view = output
                .to_array_view::<f32>()
                .context("model output tensor was not f32")?;
            let row_len = *view
                .shape()
                .last()
                .ok_or_else(|| anyhow!("model output has no axes"))?;
            if row_len <= 5 {
                return Err(anyhow!("model output rows too short ({})", row_len));
            }
            let flat: Vec<f32> = view.iter().copied().collect();
            for row in flat.chunks_exact(row_len) {
                let scores = &row[5..];
                let Some((class_id, confidence)) = scores
                    .iter()
                    .copied()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                else {
                    continue;
                };
                if !confidence.is_finite() || confidence < MIN_REPORTED_CONFIDENCE {
                    continue;
                }
                let label = self
                    .labels
                    .get(class_id)
                    .cloned()
                    .unwrap_or_else(|| format!("class{}", class_id));
                let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
                detections.push(Detection::new(label, confidence).with_bbox(BoundingBox {
                    x: cx - w / 2.0,
                    y: cy - h / 2.0,
                    w,
                    h,
                }));
            }
        }
        Ok(detections)
    }
}

impl ObjectDetector for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| SwitcherError::detector(format!("ONNX inference failed: {}", e)))?;
        self.decode(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::new(
            vec![0u8; self.width as usize * self.height as usize * 3],
            self.width,
            self.height,
            0,
        );
        self.detect(&blank).map(|_| ())
    }
}

fn load_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read labels file {}: {}", path.display(), e))?;
    let labels: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        return Err(anyhow!("labels file {} is empty", path.display()));
    }
    Ok(labels)
}
