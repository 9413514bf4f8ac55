use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::executor::InferenceExecutor;
use crate::overlay::{self, DrawCommand, OverlayConfig};
use crate::postprocess::{postprocess, PostprocessConfig};
use crate::preprocess::Preprocessor;
use crate::voting::VotingEngine;
use crate::{ClassCatalog, PipelineError, PipelineResult};

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Consecutive inference failures before the user is told detection is degraded.
    #[serde(default = "default_failure_limit")]
    pub max_consecutive_infer_failures: u32,
}

fn default_failure_limit() -> u32 { 5 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_consecutive_infer_failures: default_failure_limit() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    /// A reference clip is playing; frames are not submitted.
    Suspended,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Skipped,
    Processed {
        detections: usize,
        overlay: Vec<DrawCommand>,
        fired: Option<String>,
    },
}

pub struct Pipeline {
    pre: Preprocessor,
    executor: Box<dyn InferenceExecutor>,
    catalog: ClassCatalog,
    post_cfg: PostprocessConfig,
    overlay_cfg: OverlayConfig,
    voting: VotingEngine,
    state: PipelineState,
    failure_limit: u32,
    infer_failures: u32,
}

impl Pipeline {
    pub fn new(
        pre: Preprocessor,
        executor: Box<dyn InferenceExecutor>,
        catalog: ClassCatalog,
        post_cfg: PostprocessConfig,
        overlay_cfg: OverlayConfig,
        voting: VotingEngine,
        cfg: &PipelineConfig,
    ) -> Self {
        Self {
            pre,
            executor,
            catalog,
            post_cfg,
            overlay_cfg,
            voting,
            state: PipelineState::Running,
            failure_limit: cfg.max_consecutive_infer_failures.max(1),
            infer_failures: 0,
        }
    }

    pub fn state(&self) -> PipelineState { self.state }
    pub fn catalog(&self) -> &ClassCatalog { &self.catalog }
    pub fn voting(&self) -> &VotingEngine { &self.voting }
    pub fn failure_limit(&self) -> u32 { self.failure_limit }

    pub fn suspend(&mut self) {
        self.state = PipelineState::Suspended;
    }

    pub fn resume(&mut self) {
        self.state = PipelineState::Running;
    }

    pub fn reset_votes(&mut self) {
        self.voting.reset();
    }

    /// True when `err` is the failure that just hit the reporting limit.
    pub fn is_degraded(&self, err: &PipelineError) -> bool {
        matches!(err, PipelineError::Infer { consecutive, .. } if *consecutive == self.failure_limit)
    }

    /// One frame through preprocess, inference, postprocess and voting.
    /// Votes are only counted once the whole frame succeeded.
    pub fn process_frame(&mut self, frame: &RgbImage) -> PipelineResult<FrameOutcome> {
        if self.state == PipelineState::Suspended {
            return Ok(FrameOutcome::Skipped);
        }

        let (tensor, ratios) = self.pre.run(frame)?;
        let frame_dets = self
            .executor
            .infer(&tensor)
            .and_then(|raw| postprocess(&raw, &self.catalog, &self.post_cfg))
            .map_err(|e| self.on_infer_error(e))?;
        self.infer_failures = 0;

        let vote = frame_dets
            .vote_candidate
            .and_then(|d| self.catalog.name(d.class_index));
        self.voting.observe(vote);
        let fired = self.voting.evaluate();

        debug!(
            "frame: dets={} vote={:?} fired={:?}",
            frame_dets.detections.len(),
            vote,
            fired
        );

        let overlay = overlay::render(&frame_dets.detections, ratios, &self.catalog, &self.overlay_cfg);
        Ok(FrameOutcome::Processed { detections: frame_dets.detections.len(), overlay, fired })
    }

    fn on_infer_error(&mut self, err: PipelineError) -> PipelineError {
        match err {
            PipelineError::Infer { message, .. } => {
                self.infer_failures = self.infer_failures.saturating_add(1);
                if self.infer_failures == self.failure_limit {
                    warn!("pipeline: {} consecutive inference failures, last: {}", self.infer_failures, message);
                }
                PipelineError::Infer { message, consecutive: self.infer_failures }
            }
            other => other,
        }
    }
}
