use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct ClipConfig {
    #[serde(default)]
    pub dir: String,
    #[serde(default = "default_ext")]
    pub ext: String,
    /// Classes that have a reference clip.
    #[serde(default)]
    pub classes: Vec<String>,
    /// Classes in `classes` that should still not play (e.g. expressions).
    #[serde(default)]
    pub skip_classes: Vec<String>,
    /// Player argv; `{path}` is replaced with the clip file.
    #[serde(default = "default_player")]
    pub player: Vec<String>,
}

fn default_ext() -> String { "mp4".into() }

fn default_player() -> Vec<String> {
    ["ffplay", "-autoexit", "-loglevel", "error", "{path}"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            ext: default_ext(),
            classes: Vec::new(),
            skip_classes: Vec::new(),
            player: default_player(),
        }
    }
}

/// Which recognized classes get a reference clip.
#[derive(Debug, Clone, Default)]
pub struct ClipPolicy {
    classes: Vec<String>,
    skip: Vec<String>,
}

impl ClipPolicy {
    pub fn new(classes: &[String], skip: &[String]) -> Self {
        let lower = |v: &[String]| v.iter().map(|s| s.to_lowercase()).collect();
        Self { classes: lower(classes), skip: lower(skip) }
    }

    pub fn from_config(cfg: &ClipConfig) -> Self {
        Self::new(&cfg.classes, &cfg.skip_classes)
    }

    pub fn is_eligible(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.classes.contains(&name) && !self.skip.contains(&name)
    }
}

pub struct ClipLibrary {
    dir: PathBuf,
    ext: String,
}

impl ClipLibrary {
    pub fn new(cfg: &ClipConfig) -> Self {
        Self { dir: PathBuf::from(&cfg.dir), ext: cfg.ext.clone() }
    }

    pub fn resolve(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name.to_lowercase(), self.ext))
    }
}

/// A playing clip. Dropping it cancels playback too.
pub struct ClipHandle {
    pub id: u64,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ClipHandle {
    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ClipHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

pub struct ClipPlayer {
    library: ClipLibrary,
    argv: Vec<String>,
    next_id: u64,
}

impl ClipPlayer {
    pub fn new(cfg: &ClipConfig) -> Self {
        Self { library: ClipLibrary::new(cfg), argv: cfg.player.clone(), next_id: 1 }
    }

    /// Start playback of `name`'s clip. `done(id)` is sent when the player
    /// exits on its own (or cannot start); nothing is sent after a cancel.
    pub fn play<T, F>(&mut self, name: &str, tx: mpsc::Sender<T>, done: F) -> ClipHandle
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;

        let path = self.library.resolve(name);
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|a| a.replace("{path}", &path.display().to_string()))
            .collect();
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

        info!("clip: playing {} ({})", name, path.display());
        let task = tokio::spawn(async move {
            if !path.exists() {
                warn!("clip: {} not found, skipping", path.display());
                let _ = tx.send(done(id)).await;
                return;
            }
            let Some((prog, args)) = argv.split_first() else {
                warn!("clip: empty player command");
                let _ = tx.send(done(id)).await;
                return;
            };

            let mut child = match Command::new(prog)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn()
            {
                Ok(c) => c,
                Err(e) => {
                    warn!("clip: failed to start {}: {}", prog, e);
                    let _ = tx.send(done(id)).await;
                    return;
                }
            };

            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(s) if !s.success() => warn!("clip: player exited with {}", s),
                        Err(e) => warn!("clip: wait failed: {}", e),
                        Ok(_) => debug!("clip {} finished", id),
                    }
                    let _ = tx.send(done(id)).await;
                }
                _ = cancel_rx => {
                    let _ = child.kill().await;
                    debug!("clip {} cancelled", id);
                }
            }
        });

        ClipHandle { id, cancel: Some(cancel_tx), task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg(dir: &str, player: &[&str]) -> ClipConfig {
        ClipConfig {
            dir: dir.into(),
            classes: vec!["Dog".into(), "happy".into()],
            skip_classes: vec!["happy".into()],
            player: player.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn eligibility_is_case_insensitive_and_honours_skip() {
        let p = ClipPolicy::from_config(&cfg("", &[]));
        assert!(p.is_eligible("dog"));
        assert!(p.is_eligible("DOG"));
        assert!(!p.is_eligible("happy"));
        assert!(!p.is_eligible("cat"));
    }

    #[test]
    fn resolves_lowercase_path() {
        let lib = ClipLibrary::new(&cfg("/clips", &[]));
        assert_eq!(lib.resolve("Dog"), PathBuf::from("/clips/dog.mp4"));
    }

    #[tokio::test]
    async fn missing_clip_completes_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        let mut player = ClipPlayer::new(&cfg(&tmp.path().display().to_string(), &["true"]));
        let (tx, mut rx) = mpsc::channel(4);
        let h = player.play("dog", tx, |id| id);
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(got, Some(h.id));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn player_exit_reports_done() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("dog.mp4"), b"").unwrap();
        let mut player = ClipPlayer::new(&cfg(&tmp.path().display().to_string(), &["true", "{path}"]));
        let (tx, mut rx) = mpsc::channel(4);
        let h = player.play("dog", tx, |id| id);
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(got, Some(h.id));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_sends_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("dog.mp4"), b"").unwrap();
        let mut player = ClipPlayer::new(&cfg(&tmp.path().display().to_string(), &["sleep", "30"]));
        let (tx, mut rx) = mpsc::channel::<u64>(4);
        let h = player.play("dog", tx, |id| id);
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.cancel();
        // sender is dropped with the task, so the channel closes without a value
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(got, None);
    }
}
