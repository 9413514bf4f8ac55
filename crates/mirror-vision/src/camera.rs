use image::RgbImage;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::{PipelineError, PipelineResult};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CameraConfig {
    pub mode: String,   // "libcamera-jpeg" | "v4l2-mjpeg" | "image-dir"
    #[serde(default)]
    pub device: String, // /dev/video0 (v4l2)
    #[serde(default)]
    pub dir: String,    // image-dir
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }

/// Where frames come from. Capture modes shell out for one JPEG per frame;
/// `image-dir` replays a directory of stills in name order, looping.
pub enum FrameSource {
    Command(CameraConfig),
    ImageDir { files: Vec<PathBuf>, next: usize },
}

impl FrameSource {
    pub fn open(cfg: &CameraConfig) -> PipelineResult<Self> {
        match cfg.mode.as_str() {
            "libcamera-jpeg" | "v4l2-mjpeg" => Ok(Self::Command(cfg.clone())),
            "image-dir" => {
                let files = list_images(Path::new(&cfg.dir))?;
                info!("camera: replaying {} images from {}", files.len(), cfg.dir);
                Ok(Self::ImageDir { files, next: 0 })
            }
            other => Err(PipelineError::Acquisition(format!("unknown camera.mode: {}", other))),
        }
    }

    pub async fn next_frame(&mut self) -> PipelineResult<RgbImage> {
        match self {
            FrameSource::Command(cfg) => {
                let jpeg = capture_jpeg(cfg).await?;
                decode(&jpeg)
            }
            FrameSource::ImageDir { files, next } => {
                let path = &files[*next % files.len()];
                *next = (*next + 1) % files.len();
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| PipelineError::Acquisition(format!("read {}: {}", path.display(), e)))?;
                decode(&bytes)
            }
        }
    }
}

fn decode(bytes: &[u8]) -> PipelineResult<RgbImage> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgb8())
        .map_err(|e| PipelineError::InvalidFrame(format!("decode: {}", e)))
}

fn list_images(dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    let rd = std::fs::read_dir(dir)
        .map_err(|e| PipelineError::Acquisition(format!("open image dir {}: {}", dir.display(), e)))?;
    let mut files: Vec<PathBuf> = rd
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
                Some("jpg" | "jpeg" | "png")
            )
        })
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(PipelineError::Acquisition(format!("no jpg/png images in {}", dir.display())));
    }
    Ok(files)
}

pub async fn capture_jpeg(cfg: &CameraConfig) -> PipelineResult<Vec<u8>> {
    match cfg.mode.as_str() {
        "libcamera-jpeg" => capture_libcamera(cfg).await,
        "v4l2-mjpeg" => capture_v4l2_ffmpeg(cfg).await,
        other => Err(PipelineError::Acquisition(format!("camera.mode {} cannot capture jpeg", other))),
    }
}

async fn run_capture(mut cmd: Command, what: &str) -> PipelineResult<Vec<u8>> {
    let out = cmd
        .output()
        .await
        .map_err(|e| PipelineError::Acquisition(format!("run {}: {}", what, e)))?;
    if !out.status.success() {
        return Err(PipelineError::Acquisition(format!("{} failed: {}", what, out.status)));
    }
    Ok(out.stdout)
}

async fn capture_libcamera(cfg: &CameraConfig) -> PipelineResult<Vec<u8>> {
    let mut cmd = Command::new("libcamera-still");
    cmd.args([
        "-n",                 // no preview
        "-t", "1",            // 1ms
        "--width", &cfg.width.to_string(),
        "--height", &cfg.height.to_string(),
        "-o", "-",            // stdout
    ]);

    debug!("capture: libcamera-still");
    run_capture(cmd, "libcamera-still").await
}

async fn capture_v4l2_ffmpeg(cfg: &CameraConfig) -> PipelineResult<Vec<u8>> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args([
        "-hide_banner","-loglevel","error",
        "-f","video4linux2",
        "-input_format","mjpeg",
        "-video_size",&format!("{}x{}", cfg.width, cfg.height),
        "-i",&cfg.device,
        "-vframes","1",
        "-f","image2pipe",
        "-vcodec","mjpeg",
        "-",
    ]);

    debug!("capture: ffmpeg v4l2");
    run_capture(cmd, "ffmpeg capture").await
}
