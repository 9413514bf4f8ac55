use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

use mirror_game::clips::ClipConfig;
use mirror_game::GameConfig;
use mirror_vision::camera::CameraConfig;
use mirror_vision::overlay::OverlayConfig;
use mirror_vision::postprocess::PostprocessConfig;
use mirror_vision::preprocess::ModelConfig;
use mirror_vision::CatalogConfig;

use crate::{Config, RuntimeCfg};

pub(crate) fn run(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    check_model(&cfg.model)?;
    check_catalog(&cfg.catalog)?;
    check_postprocess(&cfg.postprocess)?;
    anyhow::ensure!(cfg.voting.threshold >= 1, "voting.threshold must be >= 1");
    check_overlay(&cfg.overlay)?;
    check_game(&cfg.game)?;
    check_camera(&cfg.camera)?;
    check_clips(&cfg.clips)?;
    check_runtime(&cfg.runtime)?;

    if !Path::new(&cfg.model.path).exists() {
        warn!("model file {} not found", cfg.model.path);
    }

    info!("doctor: OK");
    Ok(())
}

pub fn check_model(m: &ModelConfig) -> Result<()> {
    anyhow::ensure!(m.backend == "tflite", "model.backend must be \"tflite\"");
    anyhow::ensure!(!m.path.is_empty(), "model.path missing");
    anyhow::ensure!(m.input_width > 0 && m.input_height > 0, "model input size must be > 0");
    if let Some(n) = m.num_threads {
        anyhow::ensure!(n >= 1, "model.num_threads must be >= 1");
    }
    Ok(())
}

pub fn check_catalog(c: &CatalogConfig) -> Result<()> {
    anyhow::ensure!(!c.classes.is_empty(), "catalog.classes is empty");
    if let Some(bad) = c.exclude.iter().find(|&&i| i >= c.classes.len()) {
        anyhow::bail!("catalog.exclude index {} out of range (0..{})", bad, c.classes.len());
    }
    anyhow::ensure!(
        c.exclude.len() < c.classes.len(),
        "catalog.exclude leaves no class that can be recognized"
    );
    Ok(())
}

pub fn check_postprocess(p: &PostprocessConfig) -> Result<()> {
    anyhow::ensure!(p.max_detections >= 1, "postprocess.max_detections must be >= 1");
    anyhow::ensure!(
        p.score_threshold > 0.0 && p.score_threshold <= 1.0,
        "postprocess.score_threshold must be in (0, 1]"
    );
    anyhow::ensure!(
        p.iou_threshold > 0.0 && p.iou_threshold <= 1.0,
        "postprocess.iou_threshold must be in (0, 1]"
    );
    Ok(())
}

pub fn check_overlay(o: &OverlayConfig) -> Result<()> {
    anyhow::ensure!(o.canvas_width > 0 && o.canvas_height > 0, "overlay canvas size must be > 0");
    anyhow::ensure!(o.min_area >= 0.0, "overlay.min_area must be >= 0");
    Ok(())
}

pub fn check_game(g: &GameConfig) -> Result<()> {
    anyhow::ensure!(g.round_seconds > 0, "game.round_seconds must be > 0");
    Ok(())
}

pub fn check_camera(c: &CameraConfig) -> Result<()> {
    match c.mode.as_str() {
        "libcamera-jpeg" => {}
        "v4l2-mjpeg" => anyhow::ensure!(!c.device.is_empty(), "camera.device missing for v4l2-mjpeg"),
        "image-dir" => anyhow::ensure!(Path::new(&c.dir).is_dir(), "camera.dir {} is not a directory", c.dir),
        other => anyhow::bail!("unknown camera.mode: {}", other),
    }
    if c.mode != "image-dir" {
        anyhow::ensure!(c.width > 0 && c.height > 0, "camera size must be > 0");
    }
    Ok(())
}

pub fn check_clips(c: &ClipConfig) -> Result<()> {
    if c.classes.is_empty() {
        info!("doctor: no reference clips configured");
        return Ok(());
    }
    anyhow::ensure!(!c.player.is_empty(), "clips.player is empty");
    anyhow::ensure!(
        c.player.iter().any(|a| a.contains("{path}")),
        "clips.player has no {{path}} placeholder"
    );
    if !Path::new(&c.dir).is_dir() {
        warn!("clips.dir {} not found; clips will be skipped", c.dir);
    }
    Ok(())
}

pub(crate) fn check_runtime(r: &RuntimeCfg) -> Result<()> {
    anyhow::ensure!(
        r.max_consecutive_infer_failures >= 1,
        "runtime.max_consecutive_infer_failures must be >= 1"
    );
    if let Some(n) = r.max_frames {
        anyhow::ensure!(n >= 1, "runtime.max_frames must be >= 1");
    }
    Ok(())
}
