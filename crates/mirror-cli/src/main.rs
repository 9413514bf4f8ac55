use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use mirror_game::clips::ClipConfig;
use mirror_game::GameConfig;
use mirror_vision::camera::CameraConfig;
use mirror_vision::overlay::{self, OverlayConfig};
use mirror_vision::pipeline::PipelineConfig;
use mirror_vision::postprocess::{postprocess, PostprocessConfig};
use mirror_vision::preprocess::{ModelConfig, Preprocessor};
use mirror_vision::voting::VotingConfig;
use mirror_vision::{executor, CatalogConfig, ClassCatalog};

mod doctor;
mod frames;
mod session;

#[derive(Debug, Parser)]
#[command(name = "mirror", version, about = "Magic Mirror - learn objects, then find them again")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config file.
    Doctor,
    /// Start a session. Commands are read from stdin: learn, game, skip, quit, open, status.
    Run,
    /// Run one image through the detector and print what it finds.
    Detect {
        image: String,
        /// Write the overlay as PNG here.
        #[arg(long)]
        out: Option<String>,
    },
    Model { #[command(subcommand)] cmd: ModelCmd },
}

#[derive(Debug, Subcommand)]
enum ModelCmd { Inspect }

#[derive(Debug, serde::Deserialize)]
struct Config {
    model: ModelConfig,
    catalog: CatalogConfig,
    camera: CameraConfig,

    #[serde(default)]
    postprocess: PostprocessConfig,
    #[serde(default)]
    voting: VotingConfig,
    #[serde(default)]
    overlay: OverlayConfig,
    #[serde(default)]
    game: GameConfig,
    #[serde(default)]
    clips: ClipConfig,
    #[serde(default)]
    runtime: RuntimeCfg,
}

#[derive(Debug, serde::Deserialize)]
struct RuntimeCfg {
    #[serde(default = "default_frame_interval_ms")]
    frame_interval_ms: u64,
    /// Stop after this many processed frames (demos, replays).
    max_frames: Option<u64>,
    #[serde(default = "default_failure_limit")]
    max_consecutive_infer_failures: u32,
}

fn default_frame_interval_ms() -> u64 { 100 }
fn default_failure_limit() -> u32 { PipelineConfig::default().max_consecutive_infer_failures }

impl Default for RuntimeCfg {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            max_frames: None,
            max_consecutive_infer_failures: default_failure_limit(),
        }
    }
}

impl RuntimeCfg {
    fn pipeline(&self) -> PipelineConfig {
        PipelineConfig { max_consecutive_infer_failures: self.max_consecutive_infer_failures }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor::run(&cfg)?,
        Command::Run => session::run(&cfg).await?,
        Command::Detect { image, out } => detect(&cfg, &image, out.as_deref())?,
        Command::Model { cmd } => model_cmd(&cfg, cmd)?,
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct DetectionLine<'a> {
    class: &'a str,
    #[serde(flatten)]
    det: &'a mirror_vision::Detection,
}

fn detect(cfg: &Config, path: &str, out: Option<&str>) -> Result<()> {
    let frame = image::open(path).with_context(|| format!("open image {}", path))?.to_rgb8();
    let catalog = ClassCatalog::from_config(&cfg.catalog);
    let pre = Preprocessor::new(&cfg.model);
    let mut exec = executor::load(&cfg.model)?;

    let (tensor, ratios) = pre.run(&frame)?;
    let raw = exec.infer(&tensor)?;
    let dets = postprocess(&raw, &catalog, &cfg.postprocess)?;
    info!("detect: {} detections in {}", dets.detections.len(), path);

    for d in &dets.detections {
        let line = DetectionLine { class: catalog.name(d.class_index).unwrap_or("?"), det: d };
        println!("{}", serde_json::to_string(&line)?);
    }
    if let Some(best) = dets.vote_candidate.and_then(|d| catalog.name(d.class_index)) {
        println!("vote: {}", best);
    }

    if let Some(out) = out {
        let cmds = overlay::render(&dets.detections, ratios, &catalog, &cfg.overlay);
        overlay::rasterize(&cmds, cfg.overlay.canvas_width, cfg.overlay.canvas_height)
            .save(out)
            .with_context(|| format!("write overlay {}", out))?;
        info!("detect: overlay written to {}", out);
    }
    Ok(())
}

fn model_cmd(cfg: &Config, cmd: ModelCmd) -> Result<()> {
    match cmd {
        ModelCmd::Inspect => inspect_model(&cfg.model),
    }
}

#[cfg(feature = "executor-tflite")]
fn inspect_model(model: &ModelConfig) -> Result<()> {
    let mut exec = mirror_vision::tflite::TfliteExecutor::new(model)?;
    print!("{}", exec.inspect()?);
    Ok(())
}

#[cfg(not(feature = "executor-tflite"))]
fn inspect_model(_model: &ModelConfig) -> Result<()> {
    anyhow::bail!("model inspect needs a build with --features executor-tflite")
}
