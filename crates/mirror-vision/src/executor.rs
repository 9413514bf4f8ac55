//! The inference engine boundary. Anything that turns a preprocessed tensor
//! into the detector's raw per-candidate output can sit behind
//! [`InferenceExecutor`].

use tracing::info;

use crate::preprocess::{ModelConfig, Tensor};
use crate::{PipelineError, PipelineResult};

/// Raw detector output, one row per candidate: `cx, cy, w, h, score_0..score_{C-1}`.
///
/// Accepted shapes (leading 1s are ignored):
/// - `[4+C, N]` attribute-major, the usual YOLOv8 export
/// - `[N, 4+C]` candidate-major
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

pub trait InferenceExecutor: Send {
    fn name(&self) -> &'static str;

    fn infer(&mut self, input: &Tensor) -> PipelineResult<RawOutput>;

    /// Run one throwaway inference so the first real frame is not slow.
    fn warm_up(&mut self, input_shape: [usize; 4]) -> PipelineResult<()> {
        self.infer(&Tensor::filled(input_shape, 1.0)).map(|_| ())
    }
}

/// Load the backend named in `cfg.backend` and warm it up.
pub fn load(cfg: &ModelConfig) -> PipelineResult<Box<dyn InferenceExecutor>> {
    let mut exec: Box<dyn InferenceExecutor> = match cfg.backend.as_str() {
        "tflite" => load_tflite(cfg)?,
        other => return Err(PipelineError::Load(format!("unknown model.backend: {}", other))),
    };

    let shape = [1, cfg.input_height as usize, cfg.input_width as usize, 3];
    exec.warm_up(shape)
        .map_err(|e| PipelineError::Load(format!("warm-up failed: {}", e)))?;
    info!("executor: {} ready ({})", exec.name(), cfg.path);
    Ok(exec)
}

#[cfg(feature = "executor-tflite")]
fn load_tflite(cfg: &ModelConfig) -> PipelineResult<Box<dyn InferenceExecutor>> {
    Ok(Box::new(crate::tflite::TfliteExecutor::new(cfg)?))
}

#[cfg(not(feature = "executor-tflite"))]
fn load_tflite(_cfg: &ModelConfig) -> PipelineResult<Box<dyn InferenceExecutor>> {
    Err(PipelineError::Load(
        "model.backend=tflite but binary not built with --features executor-tflite".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        calls: usize,
    }

    impl InferenceExecutor for Echo {
        fn name(&self) -> &'static str { "echo" }
        fn infer(&mut self, input: &Tensor) -> PipelineResult<RawOutput> {
            self.calls += 1;
            Ok(RawOutput { data: vec![input.data[0]], shape: vec![1] })
        }
    }

    fn cfg(backend: &str) -> ModelConfig {
        ModelConfig {
            backend: backend.into(),
            path: "model.tflite".into(),
            input_width: 4,
            input_height: 4,
            mirror: true,
            num_threads: None,
        }
    }

    #[test]
    fn default_warm_up_runs_once_with_ones() {
        let mut e = Echo { calls: 0 };
        e.warm_up([1, 2, 2, 3]).unwrap();
        assert_eq!(e.calls, 1);
    }

    #[test]
    fn unknown_backend_is_load_error() {
        let err = load(&cfg("onnx")).err().unwrap();
        assert!(matches!(err, PipelineError::Load(m) if m.contains("onnx")));
    }

    #[cfg(not(feature = "executor-tflite"))]
    #[test]
    fn tflite_without_feature_is_load_error() {
        let err = load(&cfg("tflite")).err().unwrap();
        assert!(matches!(err, PipelineError::Load(m) if m.contains("executor-tflite")));
    }
}
