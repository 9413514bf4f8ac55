use image::{imageops::{self, FilterType}, RgbImage};
use serde::Deserialize;

use crate::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub backend: String, // "tflite"
    pub path: String,
    pub input_width: u32,
    pub input_height: u32,
    /// Flip the letterboxed input left-right, for a selfie-style display.
    #[serde(default = "default_mirror")]
    pub mirror: bool,
    pub num_threads: Option<i32>,
}

fn default_mirror() -> bool { true }

/// Dense f32 tensor, NHWC.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub data: Vec<f32>,
    pub shape: [usize; 4],
}

impl Tensor {
    pub fn filled(shape: [usize; 4], value: f32) -> Self {
        Self { data: vec![value; shape.iter().product()], shape }
    }
}

/// Factors mapping model-space boxes back to display space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRatios {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    pub input_width: u32,
    pub input_height: u32,
    pub mirror: bool,
}

impl Preprocessor {
    pub fn new(cfg: &ModelConfig) -> Self {
        Self { input_width: cfg.input_width, input_height: cfg.input_height, mirror: cfg.mirror }
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.input_height as usize, self.input_width as usize, 3]
    }

    /// Letterbox to a square (padding bottom/right), resize, normalize to [0,1].
    pub fn run(&self, frame: &RgbImage) -> PipelineResult<(Tensor, ScaleRatios)> {
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return Err(PipelineError::InvalidFrame(format!("zero-area frame {}x{}", w, h)));
        }

        let size = w.max(h);
        let mut padded = RgbImage::new(size, size);
        imageops::replace(&mut padded, frame, 0, 0);

        let mut resized = imageops::resize(&padded, self.input_width, self.input_height, FilterType::Triangle);
        if self.mirror {
            imageops::flip_horizontal_in_place(&mut resized);
        }

        let data = resized
            .as_raw()
            .iter()
            .map(|&c| c as f32 / 255.0)
            .collect();

        let ratios = ScaleRatios { x: size as f32 / w as f32, y: size as f32 / h as f32 };
        Ok((Tensor { data, shape: self.input_shape() }, ratios))
    }
}

/// Wrap a packed RGB buffer, rejecting empty or mis-sized ones.
pub fn frame_from_rgb(width: u32, height: u32, data: Vec<u8>) -> PipelineResult<RgbImage> {
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidFrame(format!("zero-area frame {}x{}", width, height)));
    }
    let len = data.len();
    RgbImage::from_raw(width, height, data).ok_or_else(|| {
        PipelineError::InvalidFrame(format!("buffer of {} bytes does not fit {}x{} rgb", len, width, height))
    })
}
