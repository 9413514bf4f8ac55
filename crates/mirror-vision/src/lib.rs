mod nms;
pub mod camera;
pub mod error;
pub mod executor;
pub mod overlay;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod voting;
#[cfg(feature = "executor-tflite")]
pub mod tflite;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use error::{PipelineError, PipelineResult};

/// Corner-form box in model input space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        let x1 = cx - w / 2.0;
        let y1 = cy - h / 2.0;
        Self { x1, y1, x2: x1 + w, y2: y1 + h }
    }

    pub fn width(&self) -> f32 { self.x2 - self.x1 }
    pub fn height(&self) -> f32 { self.y2 - self.y1 }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        nms::iou(self, other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BBox,
    pub score: f32,
    pub class_index: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub classes: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<usize>,
}

/// Class names addressed by the detector's class index.
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    names: Vec<String>,
    excluded: BTreeSet<usize>,
}

impl ClassCatalog {
    pub fn new(names: Vec<String>, excluded: impl IntoIterator<Item = usize>) -> Self {
        Self { names, excluded: excluded.into_iter().collect() }
    }

    pub fn from_config(cfg: &CatalogConfig) -> Self {
        Self::new(cfg.classes.clone(), cfg.exclude.iter().copied())
    }

    pub fn len(&self) -> usize { self.names.len() }
    pub fn is_empty(&self) -> bool { self.names.is_empty() }

    pub fn name(&self, class_index: usize) -> Option<&str> {
        self.names.get(class_index).map(String::as_str)
    }

    pub fn is_excluded(&self, class_index: usize) -> bool {
        self.excluded.contains(&class_index)
    }

    /// Known to the catalog and not excluded.
    pub fn is_eligible(&self, class_index: usize) -> bool {
        class_index < self.names.len() && !self.is_excluded(class_index)
    }

    pub fn excluded(&self) -> impl Iterator<Item = usize> + '_ {
        self.excluded.iter().copied()
    }
}
