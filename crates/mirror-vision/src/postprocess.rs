use serde::Deserialize;

use crate::executor::RawOutput;
use crate::{nms, BBox, ClassCatalog, Detection, PipelineError, PipelineResult};

#[derive(Debug, Clone, Deserialize)]
pub struct PostprocessConfig {
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

fn default_max_detections() -> usize { 100 }
fn default_iou_threshold() -> f32 { 0.9 }
fn default_score_threshold() -> f32 { 0.4 }

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            max_detections: default_max_detections(),
            iou_threshold: default_iou_threshold(),
            score_threshold: default_score_threshold(),
        }
    }
}

/// What one frame contributes: everything worth drawing, and the single
/// best detection to vote with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDetections {
    pub detections: Vec<Detection>,
    pub vote_candidate: Option<Detection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// `[4+C, N]`
    AttributeMajor,
    /// `[N, 4+C]`
    CandidateMajor,
}

fn resolve_layout(raw: &RawOutput, stride: usize) -> PipelineResult<(Layout, usize)> {
    let dims: Vec<usize> = raw.shape.iter().copied().skip_while(|&d| d == 1).collect();
    let (layout, n) = match dims.as_slice() {
        [] => return Ok((Layout::CandidateMajor, 0)),
        [a, n] if *a == stride => (Layout::AttributeMajor, *n),
        [n, s] if *s == stride => (Layout::CandidateMajor, *n),
        // a single candidate collapses to [stride]
        [s] if *s == stride => (Layout::CandidateMajor, 1),
        other => {
            return Err(PipelineError::infer(format!(
                "unexpected output dims {:?}: expected [{s}, N] or [N, {s}]",
                other,
                s = stride
            )))
        }
    };
    if raw.data.len() != n * stride {
        return Err(PipelineError::infer(format!(
            "output has {} values, shape {:?} needs {}",
            raw.data.len(),
            raw.shape,
            n * stride
        )));
    }
    Ok((layout, n))
}

/// Turn raw rows into corner-form detections, one per candidate.
/// `class_index` is the argmax over class scores (first index on ties).
pub fn decode(raw: &RawOutput, num_classes: usize) -> PipelineResult<Vec<Detection>> {
    if num_classes == 0 {
        return Ok(Vec::new());
    }
    let stride = 4 + num_classes;
    let (layout, n) = resolve_layout(raw, stride)?;
    let at = |i: usize, k: usize| match layout {
        Layout::AttributeMajor => raw.data[k * n + i],
        Layout::CandidateMajor => raw.data[i * stride + k],
    };

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let mut best_c = 0usize;
        let mut best_p = f32::NEG_INFINITY;
        for c in 0..num_classes {
            let p = at(i, 4 + c);
            if p > best_p { best_p = p; best_c = c; }
        }
        out.push(Detection {
            bbox: BBox::from_center(at(i, 0), at(i, 1), at(i, 2), at(i, 3)),
            score: best_p,
            class_index: best_c,
        });
    }
    Ok(out)
}

/// Decode, suppress, drop excluded classes, and pick the vote candidate.
pub fn postprocess(raw: &RawOutput, catalog: &ClassCatalog, cfg: &PostprocessConfig) -> PipelineResult<FrameDetections> {
    let candidates = decode(raw, catalog.len())?;
    let mut detections = nms::suppress(candidates, cfg.max_detections, cfg.iou_threshold, cfg.score_threshold);
    detections.retain(|d| catalog.is_eligible(d.class_index));

    let mut vote_candidate: Option<Detection> = None;
    for d in &detections {
        if vote_candidate.map_or(true, |best| d.score > best.score) {
            vote_candidate = Some(*d);
        }
    }

    Ok(FrameDetections { detections, vote_candidate })
}
