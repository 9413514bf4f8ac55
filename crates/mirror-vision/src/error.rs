use thiserror::Error;

/// Failures of the per-frame pipeline and of the components feeding it.
///
/// None of these are fatal to the process. `Acquisition` and `Load` keep the
/// session from starting; `InvalidFrame` and `Infer` only drop the current frame.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("camera unavailable: {0}")]
    Acquisition(String),

    #[error("failed to load model: {0}")]
    Load(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// `consecutive` is filled in by the pipeline; executors report 0.
    #[error("inference failed ({consecutive} in a row): {message}")]
    Infer { message: String, consecutive: u32 },
}

impl PipelineError {
    pub fn infer(message: impl Into<String>) -> Self {
        PipelineError::Infer { message: message.into(), consecutive: 0 }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
